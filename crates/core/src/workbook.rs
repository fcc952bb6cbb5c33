//! Workbook measurement and page setup.
//!
//! Cell content is measured from the text itself rather than from the stored
//! column widths, so the layout follows what is actually on the sheet. The
//! computed layouts are written back into a working copy of the workbook,
//! never into the original input.

use crate::config::Orientation;
use crate::error::{ConversionError, Result};
use crate::layout::{ContentExtents, ResolvedPageLayout};
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tracing::debug;
use umya_spreadsheet::structs::{Break, OrientationValues};
use umya_spreadsheet::{Spreadsheet, Worksheet};
use unicode_width::UnicodeWidthStr;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Default font size when a cell carries no font.
const DEFAULT_FONT_SIZE: f64 = 11.0;

/// Width of one character cell at 11pt, in points (7px at 96 DPI).
const CHAR_WIDTH_POINTS: f64 = 5.25;

/// Horizontal cell padding on each side.
const CELL_PADDING_POINTS: f64 = 2.25;

/// Default row height.
const DEFAULT_ROW_HEIGHT_POINTS: f64 = 15.0;

const LINE_HEIGHT_FACTOR: f64 = 1.3;

/// Measured extents of one sheet.
#[derive(Debug, Clone)]
pub struct SheetMeasurement {
    pub name: String,
    pub extents: ContentExtents,
    /// Number of non-empty cells.
    pub cells: usize,
}

impl SheetMeasurement {
    pub fn is_empty(&self) -> bool {
        self.cells == 0 || self.extents.is_empty()
    }
}

/// Page setup for one sheet of a workbook.
#[derive(Debug, Clone)]
pub struct SheetPageSetup {
    pub sheet: String,
    pub layout: ResolvedPageLayout,
}

/// Width of `text` in points at `font_size`, counting wide characters twice.
pub fn text_width_points(text: &str, font_size: f64) -> f64 {
    let columns = text
        .lines()
        .map(UnicodeWidthStr::width)
        .max()
        .unwrap_or(0);
    columns as f64 * CHAR_WIDTH_POINTS * (font_size / DEFAULT_FONT_SIZE)
}

/// Height of `text` in points at `font_size`.
pub fn text_height_points(text: &str, font_size: f64) -> f64 {
    let lines = text.lines().count().max(1);
    lines as f64 * font_size * LINE_HEIGHT_FACTOR
}

fn read(path: &Path) -> Result<Spreadsheet> {
    umya_spreadsheet::reader::xlsx::read(path).map_err(|e| ConversionError::Workbook {
        path: path.to_path_buf(),
        message: format!("Failed to read workbook: {}", e),
    })
}

/// Measure every sheet of an `.xlsx` workbook, in workbook order.
pub fn measure(path: &Path) -> Result<Vec<SheetMeasurement>> {
    let book = read(path)?;
    let sheets: Vec<SheetMeasurement> = book
        .get_sheet_collection()
        .iter()
        .map(measure_sheet)
        .collect();
    debug!(
        path = %path.display(),
        sheets = sheets.len(),
        "Measured workbook"
    );
    Ok(sheets)
}

/// Measure one sheet from its cell text and fonts.
///
/// Only stored cells are visited, so a stray value far from the data costs
/// nothing beyond the size of the extents.
pub fn measure_sheet(sheet: &Worksheet) -> SheetMeasurement {
    let name = sheet.get_name().to_string();

    let mut column_widths: Vec<f64> = Vec::new();
    let mut row_heights: Vec<f64> = Vec::new();
    let mut cells = 0;

    for cell in sheet.get_cell_collection() {
        let value = cell.get_value();
        if value.trim().is_empty() {
            continue;
        }
        cells += 1;

        let font_size = cell
            .get_style()
            .get_font()
            .map(|f| *f.get_size())
            .filter(|s| *s > 0.0)
            .unwrap_or(DEFAULT_FONT_SIZE);

        let coordinate = cell.get_coordinate();
        let col = coordinate.get_col_num().saturating_sub(1) as usize;
        let row = coordinate.get_row_num().saturating_sub(1) as usize;
        widen(
            &mut column_widths,
            col,
            text_width_points(&value, font_size) + 2.0 * CELL_PADDING_POINTS,
        );
        widen(&mut row_heights, row, text_height_points(&value, font_size));
    }

    // Empty rows inside the used range still take vertical space.
    for dimension in sheet.get_row_dimensions() {
        let height = *dimension.get_height();
        let index = dimension.get_row_num().saturating_sub(1) as usize;
        if height > 0.0 && index < row_heights.len() {
            row_heights[index] = row_heights[index].max(height);
        }
    }
    for height in row_heights.iter_mut().filter(|h| **h == 0.0) {
        *height = DEFAULT_ROW_HEIGHT_POINTS;
    }

    SheetMeasurement {
        extents: ContentExtents::new(column_widths, row_heights).named(name.clone()),
        name,
        cells,
    }
}

fn widen(sizes: &mut Vec<f64>, index: usize, size: f64) {
    if sizes.len() <= index {
        sizes.resize(index + 1, 0.0);
    }
    sizes[index] = sizes[index].max(size);
}

/// Write page setups into the workbook at `path`, in place.
///
/// Sheets without a setup keep their own page setup.
pub fn apply_page_setup(path: &Path, setups: &[SheetPageSetup]) -> Result<()> {
    let mut book = read(path)?;
    let mut patches = HashMap::new();
    for (index, sheet) in book.get_sheet_collection_mut().iter_mut().enumerate() {
        let name = sheet.get_name().to_string();
        if let Some(setup) = setups.iter().find(|s| s.sheet == name) {
            apply_to_sheet(sheet, &setup.layout);
            let patch = SheetXmlPatch::for_layout(&setup.layout);
            if !patch.is_empty() {
                // The xlsx writer names sheet parts by collection position.
                patches.insert(format!("xl/worksheets/sheet{}.xml", index + 1), patch);
            }
        }
    }
    umya_spreadsheet::writer::xlsx::write(&book, path).map_err(|e| ConversionError::Workbook {
        path: path.to_path_buf(),
        message: format!("Failed to write workbook: {}", e),
    })?;
    if !patches.is_empty() {
        patch_package(path, &patches)?;
    }
    debug!(
        path = %path.display(),
        sheets = setups.len(),
        patched = patches.len(),
        "Applied page setup"
    );
    Ok(())
}

fn apply_to_sheet(sheet: &mut Worksheet, layout: &ResolvedPageLayout) {
    let page_setup = sheet.get_page_setup_mut();
    page_setup.set_scale(layout.scale_percent());
    page_setup.set_paper_size(layout.paper_size.xlsx_code());
    page_setup.set_orientation(match layout.orientation {
        Orientation::Portrait => OrientationValues::Portrait,
        Orientation::Landscape => OrientationValues::Landscape,
    });
    if let Some((wide, tall)) = layout.fit_to_pages() {
        page_setup.set_fit_to_width(wide);
        page_setup.set_fit_to_height(tall);
    }

    let [top, bottom, left, right, header, footer] = layout.margins.inches();
    let margins = sheet.get_page_margins_mut();
    margins.set_top(top);
    margins.set_bottom(bottom);
    margins.set_left(left);
    margins.set_right(right);
    margins.set_header(header);
    margins.set_footer(footer);

    let header_footer = sheet.get_header_footer_mut();
    if layout.print_header_footer {
        header_footer.get_odd_header_mut().set_value("&C&A");
        header_footer.get_odd_footer_mut().set_value("&CPage &P of &N");
    } else {
        header_footer.get_odd_header_mut().set_value("");
        header_footer.get_odd_footer_mut().set_value("");
    }

    // A break with id N falls after the N-th row (1-based), which is the
    // zero-based start of the next page.
    for start in layout.row_page_starts() {
        let mut brk = Break::default();
        brk.set_id(start as u32);
        brk.set_manual_page_break(true);
        sheet.get_row_breaks_mut().add_break_list(brk);
    }
    for start in layout.column_page_starts() {
        let mut brk = Break::default();
        brk.set_id(start as u32);
        brk.set_manual_page_break(true);
        sheet.get_column_breaks_mut().add_break_list(brk);
    }
}

/// Print settings the spreadsheet model has no field for, written straight
/// into the sheet XML.
#[derive(Debug, Clone, Default, PartialEq)]
struct SheetXmlPatch {
    /// `sheetPr/pageSetUpPr fitToPage`, which makes `fitToWidth`/`fitToHeight` count.
    fit_to_page: bool,
    /// `printOptions headings`.
    headings: bool,
    /// `pageSetup paperWidth`/`paperHeight` in millimetres.
    paper_mm: Option<(f64, f64)>,
}

impl SheetXmlPatch {
    fn for_layout(layout: &ResolvedPageLayout) -> Self {
        Self {
            fit_to_page: layout.fit_to_pages().is_some(),
            headings: layout.print_row_col_headings,
            paper_mm: layout.custom_paper_mm(),
        }
    }

    fn is_empty(&self) -> bool {
        !self.fit_to_page && !self.headings && self.paper_mm.is_none()
    }

    fn apply(&self, xml: &str) -> std::result::Result<String, String> {
        let mut xml = xml.to_string();

        if self.fit_to_page {
            const FIT: &str = r#"<pageSetUpPr fitToPage="1"/>"#;
            if let Some(tag) = find_start_tag(&xml, "sheetPr") {
                if tag.self_closing {
                    // `<sheetPr .../>` becomes `<sheetPr ...>FIT</sheetPr>`.
                    let open = xml[tag.start..tag.end - 2].trim_end().to_string();
                    xml.replace_range(tag.start..tag.end, &format!("{}>{}</sheetPr>", open, FIT));
                } else {
                    let close = xml[tag.end..]
                        .find("</sheetPr>")
                        .map(|i| tag.end + i)
                        .ok_or("unterminated sheetPr")?;
                    xml.insert_str(close, FIT);
                }
            } else {
                let root = find_start_tag(&xml, "worksheet").ok_or("missing worksheet element")?;
                xml.insert_str(root.end, &format!("<sheetPr>{}</sheetPr>", FIT));
            }
        }

        if self.headings {
            if let Some(tag) = find_start_tag(&xml, "printOptions") {
                xml.insert_str(tag.start + "<printOptions".len(), r#" headings="1""#);
            } else {
                let anchor = find_start_tag(&xml, "pageMargins")
                    .or_else(|| find_start_tag(&xml, "pageSetup"))
                    .ok_or("missing pageMargins element")?;
                xml.insert_str(anchor.start, r#"<printOptions headings="1"/>"#);
            }
        }

        if let Some((width, height)) = self.paper_mm {
            let tag = find_start_tag(&xml, "pageSetup").ok_or("missing pageSetup element")?;
            xml.insert_str(
                tag.start + "<pageSetup".len(),
                &format!(r#" paperWidth="{:.1}mm" paperHeight="{:.1}mm""#, width, height),
            );
        }

        Ok(xml)
    }
}

struct StartTag {
    start: usize,
    /// Index just past the closing `>`.
    end: usize,
    self_closing: bool,
}

/// First start tag named exactly `name`, so `sheetPr` never matches `sheetProtection`.
fn find_start_tag(xml: &str, name: &str) -> Option<StartTag> {
    let needle = format!("<{}", name);
    let mut from = 0;
    while let Some(offset) = xml[from..].find(&needle) {
        let start = from + offset;
        let after = start + needle.len();
        match xml[after..].chars().next() {
            Some(c) if c == '>' || c == '/' || c.is_whitespace() => {
                let end = after + xml[after..].find('>')? + 1;
                let self_closing = xml[..end].ends_with("/>");
                return Some(StartTag {
                    start,
                    end,
                    self_closing,
                });
            }
            _ => from = after,
        }
    }
    None
}

/// Rewrite the named parts of the package at `path`, copying the rest as is.
fn patch_package(path: &Path, patches: &HashMap<String, SheetXmlPatch>) -> Result<()> {
    let workbook_error = |message: String| ConversionError::Workbook {
        path: path.to_path_buf(),
        message,
    };
    let zip_error = |e: zip::result::ZipError| workbook_error(format!("Failed to patch workbook: {}", e));

    let source = File::open(path).map_err(|e| ConversionError::path(path, e))?;
    let mut archive = ZipArchive::new(source).map_err(zip_error)?;

    let patched_path = path.with_extension("patched.xlsx");
    let target = File::create(&patched_path).map_err(|e| ConversionError::path(&patched_path, e))?;
    let mut writer = ZipWriter::new(target);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(zip_error)?;
        let Some(patch) = patches.get(entry.name()) else {
            writer.raw_copy_file(entry).map_err(zip_error)?;
            continue;
        };
        let name = entry.name().to_string();
        let mut xml = String::new();
        entry
            .read_to_string(&mut xml)
            .map_err(|e| ConversionError::path(path, e))?;
        let xml = patch
            .apply(&xml)
            .map_err(|e| workbook_error(format!("{}: {}", name, e)))?;
        writer.start_file(name, options).map_err(zip_error)?;
        writer
            .write_all(xml.as_bytes())
            .map_err(|e| ConversionError::path(&patched_path, e))?;
    }
    writer.finish().map_err(zip_error)?;

    std::fs::rename(&patched_path, path).map_err(|e| ConversionError::path(path, e))
}
