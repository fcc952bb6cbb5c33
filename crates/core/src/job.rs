//! Job records and batch results.

use crate::error::{ConversionError, Result};
use crate::DocumentKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl JobStatus {
    /// Whether no further transition is allowed.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::TimedOut | JobStatus::Cancelled
        )
    }

    /// Status a job ends in for the given error.
    pub fn for_error(error: &ConversionError) -> Self {
        match error {
            ConversionError::Timeout { .. } => JobStatus::TimedOut,
            ConversionError::Cancelled(_) => JobStatus::Cancelled,
            _ => JobStatus::Failed,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::TimedOut => "timed out",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Layout outcome of one Excel sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetSummary {
    pub name: String,
    /// Empty sheet, left out of the layout.
    pub skipped: bool,
    pub pages: usize,
    pub scale: f64,
    pub page_width: f64,
    pub page_height: f64,
    /// Priority of the rule that was applied.
    pub rule_priority: Option<u32>,
}

impl SheetSummary {
    pub fn skipped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            skipped: true,
            pages: 0,
            scale: 1.0,
            page_width: 0.0,
            page_height: 0.0,
            rule_priority: None,
        }
    }
}

/// One file's conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionJob {
    /// Discovery index.
    pub id: usize,
    pub source: PathBuf,
    /// None when no output location could be derived.
    pub output: Option<PathBuf>,
    pub kind: DocumentKind,
    pub status: JobStatus,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration: Option<Duration>,
    pub error: Option<String>,
    pub sheets: Vec<SheetSummary>,
}

impl ConversionJob {
    pub fn new(id: usize, source: PathBuf, output: Option<PathBuf>, kind: DocumentKind) -> Self {
        Self {
            id,
            source,
            output,
            kind,
            status: JobStatus::Queued,
            enqueued_at: Utc::now(),
            started_at: None,
            finished_at: None,
            duration: None,
            error: None,
            sheets: Vec::new(),
        }
    }

    /// Queued -> Running.
    pub fn start(&mut self) {
        if self.status == JobStatus::Queued {
            self.status = JobStatus::Running;
            self.started_at = Some(Utc::now());
        }
    }

    /// Move to a terminal status. Returns false if the job was already terminal.
    pub fn finish(&mut self, status: JobStatus, error: Option<String>) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        let now = Utc::now();
        self.status = status;
        self.error = error;
        self.finished_at = Some(now);
        self.duration = self
            .started_at
            .and_then(|s| (now - s).to_std().ok())
            .or(Some(Duration::ZERO));
        true
    }

    /// Record a result: success or the error's status.
    pub fn complete(&mut self, result: &Result<()>) -> bool {
        match result {
            Ok(()) => self.finish(JobStatus::Succeeded, None),
            Err(e) => self.finish(JobStatus::for_error(e), Some(e.to_string())),
        }
    }

    /// File name for display.
    pub fn file_name(&self) -> String {
        self.source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.source.display().to_string())
    }
}

/// Outcome of a batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    /// Jobs in discovery order.
    pub jobs: Vec<ConversionJob>,
    /// Files that were found but not supported.
    pub skipped_files: Vec<PathBuf>,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub cancelled: usize,
    pub skipped: usize,
    pub total: usize,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
}

impl BatchResult {
    /// Build from finished jobs in any order.
    pub fn new(
        mut jobs: Vec<ConversionJob>,
        skipped_files: Vec<PathBuf>,
        started_at: DateTime<Utc>,
        elapsed: Duration,
    ) -> Self {
        jobs.sort_by_key(|j| j.id);
        let count = |status| jobs.iter().filter(|j| j.status == status).count();
        let succeeded = count(JobStatus::Succeeded);
        let failed = count(JobStatus::Failed);
        let timed_out = count(JobStatus::TimedOut);
        let cancelled = count(JobStatus::Cancelled);
        let skipped = skipped_files.len();
        Self {
            total: succeeded + failed + timed_out + cancelled + skipped,
            jobs,
            skipped_files,
            succeeded,
            failed,
            timed_out,
            cancelled,
            skipped,
            started_at,
            elapsed,
        }
    }

    /// Whether every job succeeded.
    pub fn all_succeeded(&self) -> bool {
        self.succeeded == self.jobs.len()
    }

    /// Jobs that did not succeed.
    pub fn problems(&self) -> impl Iterator<Item = &ConversionJob> {
        self.jobs
            .iter()
            .filter(|j| j.status != JobStatus::Succeeded)
    }

    /// Plain-text report.
    pub fn summary_text(&self) -> String {
        let rule = "=".repeat(60);
        let thin = "-".repeat(60);
        let finished = self.started_at
            + chrono::Duration::from_std(self.elapsed).unwrap_or_else(|_| chrono::Duration::zero());

        let mut out = String::new();
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "DOCUMENT CONVERSION SUMMARY");
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out);
        let _ = writeln!(out, "Start Time:    {}", self.started_at.format("%Y-%m-%d %H:%M:%S"));
        let _ = writeln!(out, "End Time:      {}", finished.format("%Y-%m-%d %H:%M:%S"));
        let _ = writeln!(out, "Duration:      {:.1} seconds", self.elapsed.as_secs_f64());
        let _ = writeln!(out);
        let _ = writeln!(out, "Total Files:   {}", self.total);
        let _ = writeln!(out, "Succeeded:     {}", self.succeeded);
        let _ = writeln!(out, "Failed:        {}", self.failed);
        let _ = writeln!(out, "Timed Out:     {}", self.timed_out);
        let _ = writeln!(out, "Cancelled:     {}", self.cancelled);
        let _ = writeln!(out, "Skipped:       {}", self.skipped);
        let _ = writeln!(out);

        let problems: Vec<_> = self.problems().collect();
        if problems.is_empty() {
            let _ = writeln!(out, "{thin}");
            let _ = writeln!(out, "No errors occurred.");
            let _ = writeln!(out, "{thin}");
        } else {
            let _ = writeln!(out, "{thin}");
            let _ = writeln!(out, "ERRORS");
            let _ = writeln!(out, "{thin}");
            let _ = writeln!(out);
            for job in problems {
                let _ = writeln!(out, "File:   {}", job.source.display());
                let _ = writeln!(out, "Status: {}", job.status);
                if let Some(error) = &job.error {
                    let _ = writeln!(out, "Error:  {}", error);
                }
                let _ = writeln!(out);
            }
        }

        if !self.skipped_files.is_empty() {
            let _ = writeln!(out, "{thin}");
            let _ = writeln!(out, "SKIPPED (unsupported)");
            let _ = writeln!(out, "{thin}");
            for file in &self.skipped_files {
                let _ = writeln!(out, "{}", file.display());
            }
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "{rule}");
        out
    }

    /// Write `summary_<timestamp>.txt` into `dir`.
    pub fn write_summary(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir).map_err(|e| ConversionError::path(dir, e))?;
        let path = dir.join(format!(
            "summary_{}.txt",
            self.started_at.format("%Y%m%d%H%M%S")
        ));
        std::fs::write(&path, self.summary_text()).map_err(|e| ConversionError::path(&path, e))?;
        info!(path = %path.display(), "Summary report written");
        Ok(path)
    }
}
