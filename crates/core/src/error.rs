//! Error types for office-to-pdf conversion.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the office-to-pdf library.
///
/// Only [`ConversionError::Config`] and [`ConversionError::ConfigLoad`] abort a
/// whole batch; everything else is recorded on the job that raised it.
#[derive(Error, Debug)]
pub enum ConversionError {
    /// Malformed or underspecified configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Configuration document could not be read or parsed.
    #[error("Failed to load configuration '{path}': {message}")]
    ConfigLoad { path: PathBuf, message: String },

    /// Degenerate sheet content, no layout can be produced.
    #[error("Layout error for sheet '{sheet}': {message}")]
    Layout { sheet: String, message: String },

    /// The conversion engine reported a failure.
    #[error("Conversion failed for '{path}': {message}")]
    Render { path: PathBuf, message: String },

    /// Unsupported file format.
    #[error("Unsupported file format: {extension}. Supported: {}", crate::SUPPORTED_EXTENSIONS.join(", "))]
    UnsupportedFormat { extension: String },

    /// Output location could not be prepared or written.
    #[error("Output path error for '{path}': {message}")]
    Path { path: PathBuf, message: String },

    /// Two inputs map to the same output file.
    #[error("Output '{output}' for '{requested}' is already claimed by '{existing}'")]
    OutputCollision {
        output: PathBuf,
        existing: PathBuf,
        requested: PathBuf,
    },

    /// Job exceeded its deadline.
    #[error("Conversion timed out after {timeout:?} for '{path}'")]
    Timeout { path: PathBuf, timeout: Duration },

    /// Job was cancelled by a batch shutdown.
    #[error("Conversion of '{0}' was cancelled")]
    Cancelled(PathBuf),

    /// Conversion engine executable or automation host is missing.
    #[error("Conversion engine not found: {0}")]
    EngineNotFound(String),

    /// Engine process failed to start.
    #[error("Failed to start conversion process: {0}")]
    ProcessStartFailed(#[from] std::io::Error),

    /// Input file not found.
    #[error("Input file not found: {0}")]
    InputNotFound(PathBuf),

    /// Spreadsheet could not be read or rewritten.
    #[error("Workbook error for '{path}': {message}")]
    Workbook { path: PathBuf, message: String },

    /// Automation pool shut down.
    #[error("Automation context pool has been shut down")]
    PoolShutdown,

    /// Channel communication error.
    #[error("Internal channel error: {0}")]
    ChannelError(String),
}

/// Result type alias for convenience.
pub type Result<T> = std::result::Result<T, ConversionError>;

impl ConversionError {
    /// Whether this error aborts the whole batch before any job starts.
    pub fn is_batch_fatal(&self) -> bool {
        matches!(
            self,
            ConversionError::Config(_) | ConversionError::ConfigLoad { .. }
        )
    }

    pub(crate) fn render(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        ConversionError::Render {
            path: path.into(),
            message: message.into(),
        }
    }

    pub(crate) fn path(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        ConversionError::Path {
            path: path.into(),
            message: err.to_string(),
        }
    }
}
