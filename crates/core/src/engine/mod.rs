//! Conversion engines.
//!
//! An engine knows how to export one Office file to PDF and how to turn a
//! legacy or macro-enabled spreadsheet into a plain `.xlsx`. [`render`] sits on
//! top of an engine and adds the spreadsheet layout pass.

pub mod automation;
pub mod headless;

pub use automation::{
    AutomationEngine, AutomationPool, AutomationSession, AutomationTask, ContextLease,
    OfficeScriptFactory, SessionFactory,
};
pub use headless::HeadlessEngine;

use crate::config::{ConverterConfig, EngineKind, PowerPointConfig, WordConfig};
use crate::error::{ConversionError, Result};
use crate::job::SheetSummary;
use crate::layout;
use crate::rules::RuleSet;
use crate::workbook::{self, SheetMeasurement, SheetPageSetup};
use crate::{needs_normalization, DocumentKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Print options for one sheet that the page setup in the file cannot carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetPrintOptions {
    pub name: String,
    pub print_row_col_headings: bool,
    pub print_header_footer: bool,
}

/// Options handed to an engine for one export.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportOptions {
    pub word: WordConfig,
    pub powerpoint: PowerPointConfig,
    /// Excel only, in workbook order.
    pub sheets: Vec<SheetPrintOptions>,
}

impl ExportOptions {
    pub fn from_config(config: &ConverterConfig) -> Self {
        Self {
            word: config.word.clone(),
            powerpoint: config.powerpoint.clone(),
            sheets: Vec::new(),
        }
    }
}

/// A platform conversion engine.
#[async_trait]
pub trait ConversionEngine: Send + Sync {
    /// Engine name for logs.
    fn name(&self) -> &'static str;

    /// Export `input` to PDF and return the PDF bytes.
    ///
    /// `scratch` is a directory owned by the calling job.
    async fn export_pdf(
        &self,
        input: &Path,
        kind: DocumentKind,
        options: &ExportOptions,
        scratch: &Path,
    ) -> Result<Vec<u8>>;

    /// Convert a spreadsheet (`.xls`, `.xlsm`, `.csv`) to `.xlsx` inside
    /// `scratch` and return the new path.
    async fn normalize_spreadsheet(&self, input: &Path, scratch: &Path) -> Result<PathBuf>;
}

/// Result of rendering one file.
#[derive(Debug, Clone)]
pub struct RenderOutput {
    pub pdf: Vec<u8>,
    /// Per-sheet layout outcome, empty for Word and PowerPoint.
    pub sheets: Vec<SheetSummary>,
}

/// Render one file to PDF.
///
/// Spreadsheets go through a working copy in `scratch`: normalize if needed,
/// measure, lay out each sheet, write the page setup, then export. The input
/// file itself is only ever read.
pub async fn render(
    engine: &dyn ConversionEngine,
    input: &Path,
    rules: &RuleSet,
    options: &ExportOptions,
    scratch: &Path,
) -> Result<RenderOutput> {
    let kind = DocumentKind::from_path(input)?;
    if !input.exists() {
        return Err(ConversionError::InputNotFound(input.to_path_buf()));
    }

    match kind {
        DocumentKind::Word | DocumentKind::PowerPoint => {
            let pdf = engine.export_pdf(input, kind, options, scratch).await?;
            Ok(RenderOutput {
                pdf,
                sheets: Vec::new(),
            })
        }
        DocumentKind::Excel => render_spreadsheet(engine, input, rules, options, scratch).await,
    }
}

async fn render_spreadsheet(
    engine: &dyn ConversionEngine,
    input: &Path,
    rules: &RuleSet,
    options: &ExportOptions,
    scratch: &Path,
) -> Result<RenderOutput> {
    let working = if needs_normalization(input) {
        let normalized = engine.normalize_spreadsheet(input, scratch).await?;
        debug!(input = %input.display(), normalized = %normalized.display(), "Normalized spreadsheet");
        normalized
    } else {
        let name = input
            .file_name()
            .ok_or_else(|| ConversionError::path(input, "file has no name"))?;
        let copy = scratch.join(name);
        tokio::fs::copy(input, &copy)
            .await
            .map_err(|e| ConversionError::path(&copy, e))?;
        copy
    };

    let measurements = {
        let path = working.clone();
        tokio::task::spawn_blocking(move || workbook::measure(&path))
            .await
            .map_err(|e| workbook_task_error(&working, e))??
    };

    let (setups, sheets) = plan_layouts(input, rules, &measurements)?;

    {
        let path = working.clone();
        let setups = setups.clone();
        tokio::task::spawn_blocking(move || workbook::apply_page_setup(&path, &setups))
            .await
            .map_err(|e| workbook_task_error(&working, e))??;
    }

    let mut options = options.clone();
    options.sheets = setups
        .iter()
        .map(|s| SheetPrintOptions {
            name: s.sheet.clone(),
            print_row_col_headings: s.layout.print_row_col_headings,
            print_header_footer: s.layout.print_header_footer,
        })
        .collect();

    let pdf = engine
        .export_pdf(&working, DocumentKind::Excel, &options, scratch)
        .await?;
    Ok(RenderOutput { pdf, sheets })
}

/// Resolve a rule and compute a layout for every sheet with content.
pub fn plan_layouts(
    input: &Path,
    rules: &RuleSet,
    measurements: &[SheetMeasurement],
) -> Result<(Vec<SheetPageSetup>, Vec<SheetSummary>)> {
    let mut setups = Vec::new();
    let mut summaries = Vec::with_capacity(measurements.len());

    for sheet in measurements {
        if sheet.is_empty() {
            debug!(sheet = %sheet.name, "Skipping empty sheet");
            summaries.push(SheetSummary::skipped(&sheet.name));
            continue;
        }
        let rule = rules.resolve(&sheet.name);
        match layout::compute(rule, &sheet.extents) {
            Ok(layout) => {
                info!(
                    sheet = %sheet.name,
                    priority = rule.priority,
                    scale = layout.scale,
                    pages = layout.page_count(),
                    "Sheet layout"
                );
                summaries.push(SheetSummary {
                    name: sheet.name.clone(),
                    skipped: false,
                    pages: layout.page_count(),
                    scale: layout.scale,
                    page_width: layout.page_width,
                    page_height: layout.page_height,
                    rule_priority: Some(rule.priority),
                });
                setups.push(SheetPageSetup {
                    sheet: sheet.name.clone(),
                    layout,
                });
            }
            Err(e) => {
                warn!(sheet = %sheet.name, error = %e, "Skipping sheet without usable layout");
                summaries.push(SheetSummary::skipped(&sheet.name));
            }
        }
    }

    if setups.is_empty() {
        return Err(ConversionError::Layout {
            sheet: input.display().to_string(),
            message: "workbook has no sheet with content".to_string(),
        });
    }
    Ok((setups, summaries))
}

fn workbook_task_error(path: &Path, err: tokio::task::JoinError) -> ConversionError {
    ConversionError::Workbook {
        path: path.to_path_buf(),
        message: format!("workbook task failed: {}", err),
    }
}

/// Find the PDF an engine wrote into `dir`.
///
/// Engines usually name it after the input stem, but not always.
pub(crate) fn find_pdf(dir: &Path, input: &Path) -> Option<PathBuf> {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    let expected = dir.join(format!("{}.pdf", stem));
    if expected.exists() {
        return Some(expected);
    }
    std::fs::read_dir(dir).ok().and_then(|entries| {
        entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .find(|p| {
                p.extension()
                    .map(|ext| ext.eq_ignore_ascii_case("pdf"))
                    .unwrap_or(false)
            })
    })
}

/// Create the engine the configuration asks for.
///
/// `auto` picks Office automation on Windows and headless LibreOffice
/// everywhere else.
pub fn create_engine(config: &ConverterConfig) -> Result<Arc<dyn ConversionEngine>> {
    let kind = match config.conversion.engine {
        EngineKind::Auto if cfg!(windows) => EngineKind::Automation,
        EngineKind::Auto => EngineKind::Headless,
        other => other,
    };
    let engine: Arc<dyn ConversionEngine> = match kind {
        EngineKind::Automation => Arc::new(AutomationEngine::new(
            config.conversion.workers,
            Arc::new(OfficeScriptFactory::new()?),
        )?),
        _ => Arc::new(HeadlessEngine::new(&config.conversion)?),
    };
    info!(engine = engine.name(), workers = config.conversion.workers, "Conversion engine ready");
    Ok(engine)
}
