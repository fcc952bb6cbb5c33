//! Configuration types for office-to-pdf conversion.
//!
//! The configuration document is YAML. Every section and key is optional and
//! falls back to the defaults below, so an empty file is a valid configuration.

use crate::error::{ConversionError, Result};
use crate::rules::RuleSet;
use crate::DocumentKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Logging verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive string for `EnvFilter`.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is not set.
    pub level: LogLevel,

    /// Directory for rolling log files.
    /// Default: `./logs`.
    pub log_dir: PathBuf,

    /// Number of log lines kept for the console tail.
    /// Default: 20, allowed 5..=100.
    pub console_lines: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            log_dir: PathBuf::from("./logs"),
            console_lines: 20,
        }
    }
}

/// Which conversion engine drives the export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// Native automation on Windows, headless LibreOffice elsewhere.
    #[default]
    Auto,
    /// One headless LibreOffice process per job.
    Headless,
    /// Dedicated Office automation contexts.
    Automation,
}

/// Output filename suffix per document kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuffixConfig {
    pub word: String,
    pub excel: String,
    pub powerpoint: String,
}

impl Default for SuffixConfig {
    fn default() -> Self {
        Self {
            word: "_d".to_string(),
            excel: "_x".to_string(),
            powerpoint: "_p".to_string(),
        }
    }
}

impl SuffixConfig {
    /// Suffix for a document kind.
    pub fn for_kind(&self, kind: DocumentKind) -> &str {
        match kind {
            DocumentKind::Word => &self.word,
            DocumentKind::Excel => &self.excel,
            DocumentKind::PowerPoint => &self.powerpoint,
        }
    }
}

/// Batch-level conversion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionConfig {
    /// Root scanned for input documents.
    pub input_root: PathBuf,

    /// Root the output tree is mirrored into.
    pub output_root: PathBuf,

    /// Number of concurrently running jobs.
    /// Default: 4, allowed 1..=32.
    pub workers: usize,

    /// Per-job deadline in minutes.
    /// Default: 30, allowed 1..=120.
    pub timeout_minutes: u64,

    /// Keep per-job scratch directories after the run.
    pub keep_temp_files: bool,

    /// Allow a later input to take over an output path already claimed in this run.
    pub overwrite: bool,

    /// Engine selection.
    pub engine: EngineKind,

    /// Path to the soffice binary. If None, searches well-known locations and PATH.
    pub soffice_path: Option<PathBuf>,

    /// Parent directory for job scratch directories.
    /// Default: system temp directory.
    pub temp_dir: Option<PathBuf>,

    /// Output filename suffixes.
    pub suffixes: SuffixConfig,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            input_root: PathBuf::from("./input"),
            output_root: PathBuf::from("./output"),
            workers: 4,
            timeout_minutes: 30,
            keep_temp_files: false,
            overwrite: false,
            engine: EngineKind::Auto,
            soffice_path: None,
            temp_dir: None,
            suffixes: SuffixConfig::default(),
        }
    }
}

impl ConversionConfig {
    /// Per-job deadline.
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_minutes * 60)
    }
}

/// Page orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    Portrait,
    #[default]
    Landscape,
}

/// Paper sizes understood by both engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PaperSize {
    A3,
    #[default]
    A4,
    A5,
    Letter,
    Legal,
    Tabloid,
}

impl PaperSize {
    /// Portrait (width, height) in points.
    pub fn points(&self) -> (f64, f64) {
        match self {
            PaperSize::A3 => (842.0, 1191.0),
            PaperSize::A4 => (595.0, 842.0),
            PaperSize::A5 => (420.0, 595.0),
            PaperSize::Letter => (612.0, 792.0),
            PaperSize::Legal => (612.0, 1008.0),
            PaperSize::Tabloid => (792.0, 1224.0),
        }
    }

    /// SpreadsheetML `paperSize` code.
    pub fn xlsx_code(&self) -> u32 {
        match self {
            PaperSize::Letter => 1,
            PaperSize::Tabloid => 3,
            PaperSize::Legal => 5,
            PaperSize::A3 => 8,
            PaperSize::A4 => 9,
            PaperSize::A5 => 11,
        }
    }
}

/// Margin presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarginPreset {
    #[default]
    Normal,
    Wide,
    Narrow,
    Custom,
}

/// Custom margins in inches.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomMargins {
    pub top: f64,
    pub bottom: f64,
    pub left: f64,
    pub right: f64,
    pub header: f64,
    pub footer: f64,
}

impl Default for CustomMargins {
    fn default() -> Self {
        Self {
            top: 1.0,
            bottom: 1.0,
            left: 1.25,
            right: 1.25,
            header: 0.3,
            footer: 0.3,
        }
    }
}

impl MarginPreset {
    /// Concrete margins in inches.
    pub fn inches(&self, custom: &CustomMargins) -> CustomMargins {
        let uniform = |top, bottom, left, right| CustomMargins {
            top,
            bottom,
            left,
            right,
            header: 0.3,
            footer: 0.3,
        };
        match self {
            MarginPreset::Normal => uniform(0.75, 0.75, 0.7, 0.7),
            MarginPreset::Narrow => uniform(0.5, 0.5, 0.5, 0.5),
            MarginPreset::Wide => uniform(1.0, 1.0, 1.0, 1.0),
            MarginPreset::Custom => *custom,
        }
    }
}

/// Excel scaling modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingMode {
    NoScaling,
    FitSheet,
    #[default]
    FitColumns,
    FitRows,
    Custom,
}

/// Excel page layout modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutMode {
    /// Every break range becomes a single page sized to its content.
    OnePage,
    /// Pages follow the 16:9 shape of a 1080p screen.
    #[default]
    ScreenOptimized,
}

/// One print rule for Excel sheets.
///
/// A rule without `sheets` is a default rule and applies to every sheet that no
/// specific rule claims.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrintConfigRule {
    /// Lower number wins.
    pub priority: u32,

    /// Sheet-name patterns (`*` and `?` wildcards). None = default rule.
    pub sheets: Option<Vec<String>>,

    pub mode: LayoutMode,

    /// Explicit page break every N rows.
    pub rows_per_page: Option<u32>,

    /// Explicit page break every N columns.
    pub columns_per_page: Option<u32>,

    pub scaling: ScalingMode,

    /// Percent for `ScalingMode::Custom`, 10..=400.
    pub scaling_percent: Option<u32>,

    pub margins: MarginPreset,

    pub margins_custom: CustomMargins,

    pub print_header_footer: bool,

    pub print_row_col_headings: bool,

    pub orientation: Orientation,

    pub paper_size: PaperSize,
}

impl Default for PrintConfigRule {
    fn default() -> Self {
        Self {
            priority: 99,
            sheets: None,
            mode: LayoutMode::ScreenOptimized,
            rows_per_page: None,
            columns_per_page: None,
            scaling: ScalingMode::FitColumns,
            scaling_percent: None,
            margins: MarginPreset::Normal,
            margins_custom: CustomMargins::default(),
            print_header_footer: true,
            print_row_col_headings: false,
            orientation: Orientation::Landscape,
            paper_size: PaperSize::A4,
        }
    }
}

impl PrintConfigRule {
    /// Create a specific rule for the given sheet patterns.
    pub fn for_sheets<I, S>(priority: u32, sheets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            priority,
            sheets: Some(sheets.into_iter().map(Into::into).collect()),
            ..Default::default()
        }
    }

    /// Set the scaling mode.
    pub fn scaling(mut self, scaling: ScalingMode) -> Self {
        self.scaling = scaling;
        self
    }

    /// Use custom scaling at the given percent.
    pub fn scaling_percent(mut self, percent: u32) -> Self {
        self.scaling = ScalingMode::Custom;
        self.scaling_percent = Some(percent);
        self
    }

    /// Set the layout mode.
    pub fn mode(mut self, mode: LayoutMode) -> Self {
        self.mode = mode;
        self
    }

    /// Break every `rows` rows.
    pub fn rows_per_page(mut self, rows: u32) -> Self {
        self.rows_per_page = Some(rows);
        self
    }

    /// Break every `columns` columns.
    pub fn columns_per_page(mut self, columns: u32) -> Self {
        self.columns_per_page = Some(columns);
        self
    }

    /// Whether this is a default (unmatched-sheet) rule.
    pub fn is_default(&self) -> bool {
        self.sheets.is_none()
    }
}

/// Excel settings: the rule set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExcelSettings {
    pub rules: Vec<PrintConfigRule>,
}

impl Default for ExcelSettings {
    fn default() -> Self {
        Self {
            rules: vec![PrintConfigRule::default()],
        }
    }
}

/// Word print settings, applied by the automation engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WordConfig {
    pub orientation: Orientation,
    pub paper_size: PaperSize,
    pub margins: MarginPreset,
    pub margins_custom: CustomMargins,
    pub fit_to_page: bool,
}

impl Default for WordConfig {
    fn default() -> Self {
        Self {
            orientation: Orientation::Portrait,
            paper_size: PaperSize::A4,
            margins: MarginPreset::Normal,
            margins_custom: CustomMargins::default(),
            fit_to_page: true,
        }
    }
}

/// PowerPoint export settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerPointConfig {
    /// Export hidden slides too.
    pub include_hidden: bool,
    /// Draw a frame around each slide.
    pub frame_slides: bool,
}

/// Root configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    pub logging: LoggingConfig,
    pub conversion: ConversionConfig,
    pub word: WordConfig,
    pub excel: ExcelSettings,
    pub powerpoint: PowerPointConfig,
}

impl ConverterConfig {
    /// Load and validate a YAML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConversionError::ConfigLoad {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let config = Self::from_yaml_str(&content).map_err(|e| match e {
            ConversionError::ConfigLoad { message, .. } => ConversionError::ConfigLoad {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })?;
        debug!(path = %path.display(), rules = config.excel.rules.len(), "Loaded configuration");
        Ok(config)
    }

    /// Parse and validate a YAML configuration document.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Self = if content.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(content).map_err(|e| ConversionError::ConfigLoad {
                path: PathBuf::from("<inline>"),
                message: e.to_string(),
            })?
        };
        config.validate()?;
        Ok(config)
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| ConversionError::Config(e.to_string()))
    }

    /// Deep-merge a JSON override into a copy of this configuration.
    ///
    /// Objects merge key by key; any other value replaces the original.
    pub fn with_override(&self, overrides: &serde_json::Value) -> Result<Self> {
        let mut base =
            serde_json::to_value(self).map_err(|e| ConversionError::Config(e.to_string()))?;
        merge_json(&mut base, overrides);
        let merged: Self = serde_json::from_value(base)
            .map_err(|e| ConversionError::Config(format!("invalid override: {e}")))?;
        merged.validate()?;
        Ok(merged)
    }

    /// Set the number of workers.
    pub fn workers(mut self, workers: usize) -> Self {
        self.conversion.workers = workers;
        self
    }

    /// Set input and output roots.
    pub fn roots(mut self, input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        self.conversion.input_root = input.into();
        self.conversion.output_root = output.into();
        self
    }

    /// Replace the Excel rule set.
    pub fn excel_rules(mut self, rules: Vec<PrintConfigRule>) -> Self {
        self.excel.rules = rules;
        self
    }

    /// Validate the entire configuration.
    pub fn validate(&self) -> Result<()> {
        let c = &self.conversion;
        if !(1..=32).contains(&c.workers) {
            return Err(ConversionError::Config(format!(
                "workers must be between 1 and 32, got {}",
                c.workers
            )));
        }
        if !(1..=120).contains(&c.timeout_minutes) {
            return Err(ConversionError::Config(format!(
                "timeout_minutes must be between 1 and 120, got {}",
                c.timeout_minutes
            )));
        }
        if !(5..=100).contains(&self.logging.console_lines) {
            return Err(ConversionError::Config(format!(
                "console_lines must be between 5 and 100, got {}",
                self.logging.console_lines
            )));
        }
        for (name, suffix) in [
            ("word", &c.suffixes.word),
            ("excel", &c.suffixes.excel),
            ("powerpoint", &c.suffixes.powerpoint),
        ] {
            if suffix.contains(['/', '\\']) {
                return Err(ConversionError::Config(format!(
                    "{name} suffix must not contain path separators: {suffix:?}"
                )));
            }
        }
        RuleSet::new(self.excel.rules.clone())?;
        Ok(())
    }
}

fn merge_json(base: &mut serde_json::Value, patch: &serde_json::Value) {
    match (base, patch) {
        (serde_json::Value::Object(base), serde_json::Value::Object(patch)) => {
            for (key, value) in patch {
                match base.get_mut(key) {
                    Some(slot) => merge_json(slot, value),
                    None => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (slot, value) => *slot = value.clone(),
    }
}
