//! # office-to-pdf-core
//!
//! Batch conversion of Office documents (Word, Excel, PowerPoint) to PDF.
//!
//! The library discovers documents under an input tree and resolves a print
//! configuration for every Excel sheet. It then drives a bounded pool of
//! conversion workers under per-job timeouts:
//!
//! - **Headless LibreOffice** on Linux-class hosts
//! - **Office automation** on Windows-class hosts
//! - **Dynamic page geometry** for spreadsheets, measured from cell content
//! - **Streaming progress** with a moving-average ETA
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use office_to_pdf_core::{create_engine, CancelToken, ConverterConfig, JobDispatcher};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConverterConfig::load(Path::new("config.yaml"))?;
//!     let engine = create_engine(&config)?;
//!     let dispatcher = JobDispatcher::new(config, engine)?;
//!
//!     let result = dispatcher.run(CancelToken::new()).await?;
//!     println!(
//!         "{} succeeded, {} failed in {:?}",
//!         result.succeeded, result.failed, result.elapsed
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Progress
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use office_to_pdf_core::{CancelToken, ConverterConfig, JobDispatcher, ProgressReporter};
//! # async fn example(dispatcher: JobDispatcher) -> anyhow::Result<()> {
//! let mut snapshots = Box::pin(ProgressReporter::snapshots(dispatcher.subscribe()));
//! tokio::spawn(async move {
//!     while let Some(s) = snapshots.next().await {
//!         println!("{}/{} eta {:?}", s.completed_count, s.total_count, s.eta_seconds);
//!     }
//! });
//! dispatcher.run(CancelToken::new()).await?;
//! # Ok(())
//! # }
//! ```

pub mod cancel;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod job;
pub mod layout;
pub mod logging;
pub mod paths;
pub mod progress;
pub mod rules;
pub mod workbook;

use serde::{Deserialize, Serialize};
use std::path::Path;

// Re-export main types for convenience
pub use cancel::CancelToken;
pub use config::{
    ConversionConfig, ConverterConfig, EngineKind, LayoutMode, LoggingConfig, MarginPreset,
    Orientation, PaperSize, PrintConfigRule, ScalingMode,
};
pub use dispatcher::{ConversionTrigger, Discovery, JobDispatcher, JobEvent};
pub use engine::{create_engine, ConversionEngine, RenderOutput};
pub use error::{ConversionError, Result};
pub use job::{BatchResult, ConversionJob, JobStatus};
pub use layout::{ContentExtents, ResolvedPageLayout};
pub use logging::{init_logging, LogChannel, LogLine};
pub use paths::{map_output, PathMapper};
pub use progress::{ProgressReporter, ProgressSnapshot};
pub use rules::RuleSet;

/// Supported Office file extensions.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "doc", "docx", "rtf", "xls", "xlsx", "xlsm", "csv", "ppt", "pptx",
];

/// Check if a file extension is supported.
pub fn is_supported_extension(ext: &str) -> bool {
    SUPPORTED_EXTENSIONS
        .iter()
        .any(|&e| e.eq_ignore_ascii_case(ext))
}

/// Check if a file has a supported extension.
pub fn is_supported_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(is_supported_extension)
}

/// Office application family a document belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentKind {
    Word,
    Excel,
    PowerPoint,
}

impl DocumentKind {
    /// Classify by extension, case-insensitively.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "doc" | "docx" | "rtf" => Some(DocumentKind::Word),
            "xls" | "xlsx" | "xlsm" | "csv" => Some(DocumentKind::Excel),
            "ppt" | "pptx" => Some(DocumentKind::PowerPoint),
            _ => None,
        }
    }

    /// Classify a path by its extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = extension_of(path);
        Self::from_extension(&ext).ok_or(ConversionError::UnsupportedFormat { extension: ext })
    }

    /// Short label used in logs and summaries.
    pub fn label(&self) -> &'static str {
        match self {
            DocumentKind::Word => "word",
            DocumentKind::Excel => "excel",
            DocumentKind::PowerPoint => "powerpoint",
        }
    }
}

/// Whether a spreadsheet must be converted to `.xlsx` before it can be measured.
pub fn needs_normalization(path: &Path) -> bool {
    matches!(extension_of(path).as_str(), "xls" | "xlsm" | "csv")
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase()
}
