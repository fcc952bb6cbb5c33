//! Spreadsheet page geometry.
//!
//! [`compute`] turns a resolved [`PrintConfigRule`] and the measured content
//! extents of one sheet into a [`ResolvedPageLayout`]: scale factor, explicit
//! breaks, and the physical size of every page. All sizes are in points.

use crate::config::{LayoutMode, Orientation, PaperSize, PrintConfigRule, ScalingMode};
use crate::error::{ConversionError, Result};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Screen the exported pages are tuned for (a 24-inch 1080p panel).
pub const SCREEN_TARGET_PX: (u32, u32) = (1920, 1080);

/// Pixel density of the target screen.
pub const SCREEN_TARGET_PPI: u32 = 92;

/// Smallest scale a Fit mode may apply. At 92 PPI this keeps 11pt body text
/// around 8px high, which is still legible and OCR-friendly.
pub const MIN_READABLE_SCALE: f64 = 0.6;

/// Largest page dimension a PDF viewer accepts.
pub const MAX_PAGE_POINTS: f64 = 14400.0;

const POINTS_PER_INCH: f64 = 72.0;
const MM_PER_POINT: f64 = 25.4 / 72.0;
const EPSILON: f64 = 1e-6;

/// Measured content size of one sheet, per column and per row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContentExtents {
    /// Sheet name, used in error messages.
    pub sheet: String,
    pub column_widths: Vec<f64>,
    pub row_heights: Vec<f64>,
}

impl ContentExtents {
    pub fn new(column_widths: Vec<f64>, row_heights: Vec<f64>) -> Self {
        Self {
            sheet: String::new(),
            column_widths,
            row_heights,
        }
    }

    /// Attach the sheet name.
    pub fn named(mut self, sheet: impl Into<String>) -> Self {
        self.sheet = sheet.into();
        self
    }

    /// No columns or no rows with any size.
    pub fn is_empty(&self) -> bool {
        self.column_widths.iter().sum::<f64>() <= 0.0 || self.row_heights.iter().sum::<f64>() <= 0.0
    }

    fn validate(&self) -> Result<()> {
        let invalid = self
            .column_widths
            .iter()
            .chain(&self.row_heights)
            .any(|v| !v.is_finite() || *v < 0.0);
        if invalid {
            return Err(self.error("content sizes must be finite and non-negative"));
        }
        if self.column_widths.is_empty() || self.row_heights.is_empty() || self.is_empty() {
            return Err(self.error("sheet has no content"));
        }
        Ok(())
    }

    fn error(&self, message: &str) -> ConversionError {
        ConversionError::Layout {
            sheet: self.sheet.clone(),
            message: message.to_string(),
        }
    }
}

/// Page margins in points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageMargins {
    pub top: f64,
    pub bottom: f64,
    pub left: f64,
    pub right: f64,
    pub header: f64,
    pub footer: f64,
}

impl PageMargins {
    fn from_rule(rule: &PrintConfigRule) -> Self {
        let m = rule.margins.inches(&rule.margins_custom);
        Self {
            top: m.top * POINTS_PER_INCH,
            bottom: m.bottom * POINTS_PER_INCH,
            left: m.left * POINTS_PER_INCH,
            right: m.right * POINTS_PER_INCH,
            header: m.header * POINTS_PER_INCH,
            footer: m.footer * POINTS_PER_INCH,
        }
    }

    pub fn horizontal(&self) -> f64 {
        self.left + self.right
    }

    pub fn vertical(&self) -> f64 {
        self.top + self.bottom
    }

    /// Margins in inches, as SpreadsheetML stores them.
    pub fn inches(&self) -> [f64; 6] {
        [
            self.top,
            self.bottom,
            self.left,
            self.right,
            self.header,
            self.footer,
        ]
        .map(|v| v / POINTS_PER_INCH)
    }
}

/// One physical page: the cells it holds and its size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageGeometry {
    /// Zero-based row range.
    pub rows: Range<usize>,
    /// Zero-based column range.
    pub columns: Range<usize>,
    pub width: f64,
    pub height: f64,
}

/// Page layout for one sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedPageLayout {
    /// Nominal page width.
    pub page_width: f64,
    /// Nominal page height.
    pub page_height: f64,
    pub scale: f64,
    /// Explicit row breaks (first row of each band after the first).
    pub row_breaks: Vec<usize>,
    /// Explicit column breaks.
    pub column_breaks: Vec<usize>,
    /// Physical pages, down then across.
    pub pages: Vec<PageGeometry>,
    pub margins: PageMargins,
    pub mode: LayoutMode,
    pub scaling: ScalingMode,
    pub orientation: Orientation,
    pub paper_size: PaperSize,
    pub print_header_footer: bool,
    pub print_row_col_headings: bool,
}

impl ResolvedPageLayout {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// First row of every page except those starting at row 0.
    pub fn row_page_starts(&self) -> Vec<usize> {
        page_starts(self.pages.iter().map(|p| p.rows.start))
    }

    /// First column of every page except those starting at column 0.
    pub fn column_page_starts(&self) -> Vec<usize> {
        page_starts(self.pages.iter().map(|p| p.columns.start))
    }

    /// Scale as a whole percent, clamped to what spreadsheet engines accept.
    pub fn scale_percent(&self) -> u32 {
        ((self.scale * 100.0).round() as u32).clamp(10, 400)
    }

    /// Fit-to-pages counts `(wide, tall)` for the Fit modes, 0 meaning
    /// unbounded.
    ///
    /// None when the sheet has explicit breaks or still spans several pages
    /// along a fitted axis: spreadsheet engines drop manual breaks under
    /// fit-to-page, so those layouts keep the computed scale instead.
    pub fn fit_to_pages(&self) -> Option<(u32, u32)> {
        if !self.row_breaks.is_empty() || !self.column_breaks.is_empty() {
            return None;
        }
        let one_wide = self.column_page_starts().is_empty();
        let one_tall = self.row_page_starts().is_empty();
        match self.scaling {
            ScalingMode::FitColumns if one_wide => Some((1, 0)),
            ScalingMode::FitRows if one_tall => Some((0, 1)),
            ScalingMode::FitSheet if one_wide && one_tall => Some((1, 1)),
            _ => None,
        }
    }

    /// Page size in millimetres when it differs from the named paper size,
    /// as `(width, height)`.
    pub fn custom_paper_mm(&self) -> Option<(f64, f64)> {
        let (short, long) = self.paper_size.points();
        let (width, height) = match self.orientation {
            Orientation::Portrait => (short, long),
            Orientation::Landscape => (long, short),
        };
        if (self.page_width - width).abs() < 0.5 && (self.page_height - height).abs() < 0.5 {
            return None;
        }
        Some((self.page_width * MM_PER_POINT, self.page_height * MM_PER_POINT))
    }

    /// Zoom at which one page spans the width of the target screen.
    pub fn screen_zoom(&self) -> f64 {
        let page_px = self.page_width / POINTS_PER_INCH * f64::from(SCREEN_TARGET_PPI);
        f64::from(SCREEN_TARGET_PX.0) / page_px
    }
}

fn page_starts(starts: impl Iterator<Item = usize>) -> Vec<usize> {
    let mut starts: Vec<usize> = starts.filter(|s| *s > 0).collect();
    starts.sort_unstable();
    starts.dedup();
    starts
}

/// Compute the page layout of one sheet.
pub fn compute(rule: &PrintConfigRule, extents: &ContentExtents) -> Result<ResolvedPageLayout> {
    extents.validate()?;

    let margins = PageMargins::from_rule(rule);
    let column_bands = bands(extents.column_widths.len(), rule.columns_per_page);
    let row_bands = bands(extents.row_heights.len(), rule.rows_per_page);
    let widest = max_band_extent(&extents.column_widths, &column_bands);
    let tallest = max_band_extent(&extents.row_heights, &row_bands);

    let (base_width, base_height) = base_page(rule);
    if base_width - margins.horizontal() <= 0.0 || base_height - margins.vertical() <= 0.0 {
        return Err(extents.error("margins leave no printable area"));
    }

    let (scale, page_width, page_height, pages) = match rule.mode {
        LayoutMode::OnePage => {
            let fit = fit_scale(
                rule,
                MAX_PAGE_POINTS - margins.horizontal(),
                MAX_PAGE_POINTS - margins.vertical(),
                widest,
                tallest,
            );
            let pages = one_page_per_band(extents, &column_bands, &row_bands, fit.scale, &margins);
            let width = pages.iter().map(|p| p.width).fold(0.0, f64::max);
            let height = pages.iter().map(|p| p.height).fold(0.0, f64::max);
            (fit.scale, width, height, pages)
        }
        LayoutMode::ScreenOptimized => {
            let fit = fit_scale(
                rule,
                base_width - margins.horizontal(),
                base_height - margins.vertical(),
                widest,
                tallest,
            );
            let mut width = base_width;
            let mut height = base_height;
            if fit.grow_width {
                width = (widest * fit.scale + margins.horizontal()).min(MAX_PAGE_POINTS);
                height = height.max(screen_height(width).min(MAX_PAGE_POINTS));
            }
            if fit.grow_height {
                height = (tallest * fit.scale + margins.vertical()).min(MAX_PAGE_POINTS);
            }
            let pages = chunked_pages(
                extents,
                &column_bands,
                &row_bands,
                fit.scale,
                &margins,
                (width, height),
            );
            (fit.scale, width, height, pages)
        }
    };

    Ok(ResolvedPageLayout {
        page_width,
        page_height,
        scale,
        row_breaks: row_bands.iter().skip(1).map(|b| b.start).collect(),
        column_breaks: column_bands.iter().skip(1).map(|b| b.start).collect(),
        pages,
        margins,
        mode: rule.mode,
        scaling: rule.scaling,
        orientation: rule.orientation,
        paper_size: rule.paper_size,
        print_header_footer: rule.print_header_footer,
        print_row_col_headings: rule.print_row_col_headings,
    })
}

fn base_page(rule: &PrintConfigRule) -> (f64, f64) {
    let (short, long) = rule.paper_size.points();
    let (width, height) = match rule.orientation {
        Orientation::Portrait => (short, long),
        Orientation::Landscape => (long, short),
    };
    match rule.mode {
        LayoutMode::ScreenOptimized => (width, screen_height(width)),
        LayoutMode::OnePage => (width, height),
    }
}

fn screen_height(width: f64) -> f64 {
    width * f64::from(SCREEN_TARGET_PX.1) / f64::from(SCREEN_TARGET_PX.0)
}

struct FitScale {
    scale: f64,
    grow_width: bool,
    grow_height: bool,
}

fn fit_scale(
    rule: &PrintConfigRule,
    available_width: f64,
    available_height: f64,
    widest: f64,
    tallest: f64,
) -> FitScale {
    let ratio = |available: f64, content: f64| {
        if content > 0.0 {
            (available / content).min(1.0)
        } else {
            1.0
        }
    };
    let fixed = |scale| FitScale {
        scale,
        grow_width: false,
        grow_height: false,
    };
    match rule.scaling {
        ScalingMode::NoScaling => fixed(1.0),
        ScalingMode::Custom => fixed(f64::from(rule.scaling_percent.unwrap_or(100)) / 100.0),
        ScalingMode::FitColumns => {
            let s = ratio(available_width, widest);
            FitScale {
                scale: s.max(MIN_READABLE_SCALE),
                grow_width: s < MIN_READABLE_SCALE,
                grow_height: false,
            }
        }
        ScalingMode::FitRows => {
            let s = ratio(available_height, tallest);
            FitScale {
                scale: s.max(MIN_READABLE_SCALE),
                grow_width: false,
                grow_height: s < MIN_READABLE_SCALE,
            }
        }
        ScalingMode::FitSheet => {
            let sw = ratio(available_width, widest);
            let sh = ratio(available_height, tallest);
            FitScale {
                scale: sw.min(sh).max(MIN_READABLE_SCALE),
                grow_width: sw < MIN_READABLE_SCALE,
                grow_height: sh < MIN_READABLE_SCALE,
            }
        }
    }
}

fn bands(count: usize, per_page: Option<u32>) -> Vec<Range<usize>> {
    match per_page {
        Some(n) if n > 0 => {
            let n = n as usize;
            (0..count)
                .step_by(n)
                .map(|start| start..(start + n).min(count))
                .collect()
        }
        _ => vec![0..count],
    }
}

fn band_extent(sizes: &[f64], band: &Range<usize>) -> f64 {
    sizes[band.clone()].iter().sum()
}

fn max_band_extent(sizes: &[f64], bands: &[Range<usize>]) -> f64 {
    bands
        .iter()
        .map(|b| band_extent(sizes, b))
        .fold(0.0, f64::max)
}

/// Greedily split a band into chunks whose scaled extent fits `available`.
/// Returns each chunk with its scaled content extent.
fn chunk_band(
    sizes: &[f64],
    band: &Range<usize>,
    scale: f64,
    available: f64,
) -> Vec<(Range<usize>, f64)> {
    let mut chunks = Vec::new();
    let mut start = band.start;
    let mut extent = 0.0;
    for i in band.clone() {
        let size = sizes[i] * scale;
        if i > start && extent + size > available + EPSILON {
            chunks.push((start..i, extent));
            start = i;
            extent = 0.0;
        }
        extent += size;
    }
    chunks.push((start..band.end, extent));
    chunks
}

/// Sizes along one axis: full chunks take the nominal size, the trailing chunk
/// of each band is trimmed to its content.
fn axis_chunks(
    sizes: &[f64],
    bands: &[Range<usize>],
    scale: f64,
    nominal: f64,
    margin: f64,
) -> Vec<(Range<usize>, f64)> {
    let available = nominal - margin;
    bands
        .iter()
        .flat_map(|band| {
            let chunks = chunk_band(sizes, band, scale, available);
            let last = chunks.len() - 1;
            chunks
                .into_iter()
                .enumerate()
                .map(move |(i, (range, extent))| {
                    let size = if i == last {
                        (extent + margin).min(nominal)
                    } else {
                        nominal
                    };
                    (range, size)
                })
        })
        .collect()
}

fn chunked_pages(
    extents: &ContentExtents,
    column_bands: &[Range<usize>],
    row_bands: &[Range<usize>],
    scale: f64,
    margins: &PageMargins,
    (page_width, page_height): (f64, f64),
) -> Vec<PageGeometry> {
    let columns = axis_chunks(
        &extents.column_widths,
        column_bands,
        scale,
        page_width,
        margins.horizontal(),
    );
    let rows = axis_chunks(
        &extents.row_heights,
        row_bands,
        scale,
        page_height,
        margins.vertical(),
    );

    let mut pages = Vec::with_capacity(columns.len() * rows.len());
    for (column_range, width) in &columns {
        for (row_range, height) in &rows {
            pages.push(PageGeometry {
                rows: row_range.clone(),
                columns: column_range.clone(),
                width: *width,
                height: *height,
            });
        }
    }
    pages
}

fn one_page_per_band(
    extents: &ContentExtents,
    column_bands: &[Range<usize>],
    row_bands: &[Range<usize>],
    scale: f64,
    margins: &PageMargins,
) -> Vec<PageGeometry> {
    let mut pages = Vec::with_capacity(column_bands.len() * row_bands.len());
    for columns in column_bands {
        let width = (band_extent(&extents.column_widths, columns) * scale + margins.horizontal())
            .min(MAX_PAGE_POINTS);
        for rows in row_bands {
            let height = (band_extent(&extents.row_heights, rows) * scale + margins.vertical())
                .min(MAX_PAGE_POINTS);
            pages.push(PageGeometry {
                rows: rows.clone(),
                columns: columns.clone(),
                width,
                height,
            });
        }
    }
    pages
}
