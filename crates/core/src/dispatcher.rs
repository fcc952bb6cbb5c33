//! Batch orchestration: discovery, bounded dispatch, per-job deadlines.
//!
//! Every job moves Queued -> Running -> one terminal status. Jobs run with at
//! most `workers` in flight; a job that overruns its deadline or is caught by a
//! batch cancellation has its render future dropped, which releases the engine
//! slot it held. Failures stay on the job that raised them.

use crate::cancel::CancelToken;
use crate::config::ConverterConfig;
use crate::engine::{self, ConversionEngine, ExportOptions};
use crate::error::{ConversionError, Result};
use crate::job::{BatchResult, ConversionJob, JobStatus, SheetSummary};
use crate::paths::PathMapper;
use crate::rules::RuleSet;
use crate::{is_supported_file, DocumentKind};
use async_channel::{unbounded, Receiver, Sender};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tracing::{debug, error, info, info_span, warn, Instrument};
use walkdir::WalkDir;

/// Suffix of in-progress output files.
pub const PART_SUFFIX: &str = ".part";

/// Lifecycle event published to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    BatchStarted {
        total: usize,
        concurrency: usize,
    },
    Started {
        job_id: usize,
        file: String,
    },
    Finished {
        job_id: usize,
        file: String,
        status: JobStatus,
        duration: Duration,
    },
    BatchFinished {
        succeeded: usize,
        failed: usize,
        timed_out: usize,
        cancelled: usize,
        skipped: usize,
    },
}

/// Remote request to convert a set of files.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversionTrigger {
    pub files: Vec<PathBuf>,
    /// Deep-merged into the dispatcher's configuration for this batch only.
    #[serde(default)]
    pub config_override: Option<serde_json::Value>,
}

/// Files found under an input root.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Discovery {
    /// Supported documents, sorted by path.
    pub files: Vec<PathBuf>,
    /// Files with an unsupported extension.
    pub skipped: Vec<PathBuf>,
}

impl Discovery {
    /// Split an explicit file list into supported and skipped files.
    pub fn from_files(files: impl IntoIterator<Item = PathBuf>) -> Self {
        let (files, skipped) = files.into_iter().partition(|f: &PathBuf| is_supported_file(f));
        Self { files, skipped }
    }
}

/// Walk `root` recursively for convertible documents.
///
/// Office lock files (`~$name.docx`) are ignored.
pub fn discover(root: &Path) -> Result<Discovery> {
    if !root.is_dir() {
        return Err(ConversionError::InputNotFound(root.to_path_buf()));
    }

    let mut discovery = Discovery::default();
    for entry in WalkDir::new(root).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable entry during discovery");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.file_name().to_string_lossy().starts_with("~$") {
            debug!(path = %entry.path().display(), "Ignoring Office lock file");
            continue;
        }
        let path = entry.into_path();
        if is_supported_file(&path) {
            discovery.files.push(path);
        } else {
            discovery.skipped.push(path);
        }
    }
    discovery.files.sort();
    discovery.skipped.sort();

    info!(
        root = %root.display(),
        files = discovery.files.len(),
        skipped = discovery.skipped.len(),
        "Discovery complete"
    );
    Ok(discovery)
}

type Subscribers = Arc<Mutex<Vec<Sender<JobEvent>>>>;

/// Runs batches of conversions against one engine.
pub struct JobDispatcher {
    config: ConverterConfig,
    rules: Arc<RuleSet>,
    engine: Arc<dyn ConversionEngine>,
    subscribers: Subscribers,
    timeout_override: Option<Duration>,
}

impl JobDispatcher {
    /// Validate the configuration and build the rule set.
    pub fn new(config: ConverterConfig, engine: Arc<dyn ConversionEngine>) -> Result<Self> {
        config.validate()?;
        let rules = RuleSet::new(config.excel.rules.clone())?;
        info!(
            engine = engine.name(),
            workers = config.conversion.workers,
            rules = rules.len(),
            "Dispatcher ready"
        );
        Ok(Self {
            config,
            rules: Arc::new(rules),
            engine,
            subscribers: Arc::new(Mutex::new(Vec::new())),
            timeout_override: None,
        })
    }

    /// Use `timeout` as the per-job deadline instead of `timeout_minutes`.
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_override = Some(timeout);
        self
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    /// Deadline applied to each job.
    pub fn job_timeout(&self) -> Duration {
        self.timeout_override
            .unwrap_or_else(|| self.config.conversion.job_timeout())
    }

    /// Stream of lifecycle events for every batch run after this call.
    pub fn subscribe(&self) -> Receiver<JobEvent> {
        let (tx, rx) = unbounded();
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(tx);
        }
        rx
    }

    fn emit(&self, event: JobEvent) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.retain(|tx| tx.try_send(event.clone()).is_ok());
        }
    }

    /// Discover under the configured input root and convert everything found.
    pub async fn run(&self, cancel: CancelToken) -> Result<BatchResult> {
        let discovery = discover(&self.config.conversion.input_root)?;
        self.execute(discovery, cancel).await
    }

    /// Convert an explicit list of files.
    pub async fn run_files(&self, files: Vec<PathBuf>, cancel: CancelToken) -> Result<BatchResult> {
        self.execute(Discovery::from_files(files), cancel).await
    }

    /// Convert the files of a remote trigger, applying its configuration override.
    pub async fn run_trigger(
        &self,
        trigger: ConversionTrigger,
        cancel: CancelToken,
    ) -> Result<BatchResult> {
        let Some(overrides) = &trigger.config_override else {
            return self.run_files(trigger.files, cancel).await;
        };
        let config = self.config.with_override(overrides)?;
        let rules = RuleSet::new(config.excel.rules.clone())?;
        debug!(files = trigger.files.len(), "Running trigger with configuration override");
        let scoped = JobDispatcher {
            config,
            rules: Arc::new(rules),
            engine: Arc::clone(&self.engine),
            subscribers: Arc::clone(&self.subscribers),
            timeout_override: self.timeout_override,
        };
        scoped.run_files(trigger.files, cancel).await
    }

    async fn execute(&self, discovery: Discovery, cancel: CancelToken) -> Result<BatchResult> {
        let started_at = Utc::now();
        let start = Instant::now();
        let conversion = &self.config.conversion;
        let workers = conversion.workers.max(1);
        let timeout = self.job_timeout();
        let options = ExportOptions::from_config(&self.config);
        let mapper = PathMapper::new(
            &conversion.input_root,
            &conversion.output_root,
            conversion.suffixes.clone(),
            conversion.overwrite,
        );

        let Discovery { files, mut skipped } = discovery;
        let mut jobs = Vec::with_capacity(files.len());
        for file in files {
            let kind = match DocumentKind::from_path(&file) {
                Ok(kind) => kind,
                Err(_) => {
                    skipped.push(file);
                    continue;
                }
            };
            let mut job = ConversionJob::new(jobs.len(), file, None, kind);
            match mapper.map(&job.source, kind) {
                Ok(output) => job.output = Some(output),
                Err(e) => {
                    warn!(file = %job.source.display(), error = %e, "No output location");
                    job.finish(JobStatus::Failed, Some(e.to_string()));
                }
            }
            jobs.push(job);
        }

        info!(jobs = jobs.len(), skipped = skipped.len(), workers, "Batch started");
        self.emit(JobEvent::BatchStarted {
            total: jobs.len(),
            concurrency: workers,
        });

        let finished: Vec<ConversionJob> = stream::iter(jobs)
            .map(|job| self.run_job(job, &options, timeout, &cancel))
            .buffer_unordered(workers)
            .collect()
            .await;

        let result = BatchResult::new(finished, skipped, started_at, start.elapsed());
        info!(
            succeeded = result.succeeded,
            failed = result.failed,
            timed_out = result.timed_out,
            cancelled = result.cancelled,
            skipped = result.skipped,
            elapsed = ?result.elapsed,
            "Batch finished"
        );
        match result.write_summary(&conversion.output_root) {
            Ok(path) => debug!(path = %path.display(), "Wrote summary report"),
            Err(e) => warn!(error = %e, "Could not write summary report"),
        }
        self.emit(JobEvent::BatchFinished {
            succeeded: result.succeeded,
            failed: result.failed,
            timed_out: result.timed_out,
            cancelled: result.cancelled,
            skipped: result.skipped,
        });
        Ok(result)
    }

    async fn run_job(
        &self,
        mut job: ConversionJob,
        options: &ExportOptions,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> ConversionJob {
        if !job.status.is_terminal() && cancel.is_cancelled() {
            job.finish(
                JobStatus::Cancelled,
                Some(ConversionError::Cancelled(job.source.clone()).to_string()),
            );
        }
        if job.status.is_terminal() {
            self.emit_finished(&job);
            return job;
        }

        let Some(output) = job.output.clone() else {
            job.complete(&Err(ConversionError::path(&job.source, "no output location")));
            self.emit_finished(&job);
            return job;
        };

        job.start();
        self.emit(JobEvent::Started {
            job_id: job.id,
            file: job.file_name(),
        });

        let span = info_span!("job", id = job.id, file = %job.file_name());
        let result = async {
            info!(kind = job.kind.label(), output = %output.display(), "Converting");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(ConversionError::Cancelled(job.source.clone())),
                outcome = tokio::time::timeout(timeout, self.convert(&job.source, &output, options)) => {
                    match outcome {
                        Ok(result) => result,
                        Err(_) => Err(ConversionError::Timeout {
                            path: job.source.clone(),
                            timeout,
                        }),
                    }
                }
            }
        }
        .instrument(span.clone())
        .await;

        let _entered = span.enter();
        match result {
            Ok(sheets) => {
                job.sheets = sheets;
                job.complete(&Ok(()));
                info!(duration = ?job.duration, "Converted");
            }
            Err(e) => {
                error!(error = %e, "Conversion failed");
                job.complete(&Err(e));
            }
        }
        self.emit_finished(&job);
        job
    }

    fn emit_finished(&self, job: &ConversionJob) {
        self.emit(JobEvent::Finished {
            job_id: job.id,
            file: job.file_name(),
            status: job.status,
            duration: job.duration.unwrap_or_default(),
        });
    }

    /// Render one file inside its own scratch directory and write the PDF.
    async fn convert(
        &self,
        source: &Path,
        output: &Path,
        options: &ExportOptions,
    ) -> Result<Vec<SheetSummary>> {
        let scratch = self.scratch_dir()?;
        let rendered = engine::render(
            self.engine.as_ref(),
            source,
            &self.rules,
            options,
            scratch.path(),
        )
        .await;

        if self.config.conversion.keep_temp_files {
            let kept = scratch.keep();
            debug!(path = %kept.display(), "Keeping scratch directory");
        }

        let rendered = rendered?;
        if rendered.pdf.is_empty() {
            return Err(ConversionError::render(source, "engine produced an empty PDF"));
        }
        write_output(output, &rendered.pdf).await?;
        Ok(rendered.sheets)
    }

    fn scratch_dir(&self) -> Result<TempDir> {
        let parent = self
            .config
            .conversion
            .temp_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        std::fs::create_dir_all(&parent).map_err(|e| ConversionError::path(&parent, e))?;
        TempDir::with_prefix_in("office-to-pdf-", &parent)
            .map_err(|e| ConversionError::path(&parent, e))
    }
}

/// Write through a `.part` file of this job's own, next to the output, so a
/// reader never sees a half-written PDF and jobs sharing an output never share
/// a staging file. The staging file is removed if the job is dropped midway.
async fn write_output(output: &Path, pdf: &[u8]) -> Result<()> {
    let parent = output
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let name = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let part = tempfile::Builder::new()
        .prefix(&format!(".{}.", name))
        .suffix(PART_SUFFIX)
        .tempfile_in(parent)
        .map_err(|e| ConversionError::path(parent, e))?;
    tokio::fs::write(part.path(), pdf)
        .await
        .map_err(|e| ConversionError::path(part.path(), e))?;
    part.persist(output)
        .map_err(|e| ConversionError::path(output, e.error))?;
    Ok(())
}
