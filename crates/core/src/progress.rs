//! Batch progress and ETA, folded from the dispatcher's event stream.

use crate::dispatcher::JobEvent;
use crate::job::JobStatus;
use futures::stream::{Stream, StreamExt};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::time::Duration;
use tracing::warn;

/// Completed durations kept for the ETA moving average.
pub const ETA_WINDOW: usize = 10;

/// Point-in-time view of a batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub completed_count: usize,
    pub total_count: usize,
    /// Most recently started job that is still running.
    pub current_file: Option<String>,
    /// None until the first job with a measurable duration finishes.
    pub eta_seconds: Option<f64>,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub cancelled: usize,
    pub running: usize,
    /// The batch reported its end.
    pub finished: bool,
}

impl ProgressSnapshot {
    /// Completed fraction in 0.0..=1.0.
    pub fn fraction(&self) -> f64 {
        if self.total_count == 0 {
            return if self.finished { 1.0 } else { 0.0 };
        }
        (self.completed_count as f64 / self.total_count as f64).min(1.0)
    }
}

/// Progress state for one batch at a time.
#[derive(Debug, Clone, Default)]
pub struct ProgressReporter {
    total: usize,
    concurrency: usize,
    /// job id -> file, ordered by start.
    running: BTreeMap<usize, String>,
    start_order: Vec<usize>,
    completed: HashSet<usize>,
    durations: VecDeque<Duration>,
    succeeded: usize,
    failed: usize,
    timed_out: usize,
    cancelled: usize,
    finished: bool,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lazily turn lifecycle events into snapshots, one per event.
    pub fn snapshots<S>(events: S) -> impl Stream<Item = ProgressSnapshot>
    where
        S: Stream<Item = JobEvent>,
    {
        events.scan(ProgressReporter::new(), |reporter, event| {
            reporter.apply(&event);
            futures::future::ready(Some(reporter.snapshot()))
        })
    }

    /// Fold one event into the state.
    pub fn apply(&mut self, event: &JobEvent) {
        match event {
            JobEvent::BatchStarted { total, concurrency } => {
                if !self.running.is_empty() {
                    warn!(
                        running = self.running.len(),
                        "Batch start while jobs are running, ignoring"
                    );
                    return;
                }
                *self = Self {
                    total: *total,
                    concurrency: (*concurrency).max(1),
                    ..Self::default()
                };
            }
            JobEvent::Started { job_id, file } => {
                if self.completed.contains(job_id) {
                    return;
                }
                if self.running.insert(*job_id, file.clone()).is_none() {
                    self.start_order.push(*job_id);
                }
            }
            JobEvent::Finished {
                job_id,
                status,
                duration,
                ..
            } => {
                self.running.remove(job_id);
                self.start_order.retain(|id| id != job_id);
                if !self.completed.insert(*job_id) {
                    return;
                }
                match status {
                    JobStatus::Succeeded => self.succeeded += 1,
                    JobStatus::Failed => self.failed += 1,
                    JobStatus::TimedOut => self.timed_out += 1,
                    JobStatus::Cancelled => self.cancelled += 1,
                    JobStatus::Queued | JobStatus::Running => {}
                }
                if *status != JobStatus::Cancelled && !duration.is_zero() {
                    if self.durations.len() == ETA_WINDOW {
                        self.durations.pop_front();
                    }
                    self.durations.push_back(*duration);
                }
            }
            JobEvent::BatchFinished { .. } => {
                self.finished = true;
            }
        }
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    /// Estimated seconds until the batch is done.
    ///
    /// Average of the recent durations, times the remaining jobs, spread over
    /// the slots those jobs can use.
    pub fn eta_seconds(&self) -> Option<f64> {
        let remaining = self.total.saturating_sub(self.completed.len());
        if remaining == 0 {
            return Some(0.0);
        }
        if self.durations.is_empty() {
            return None;
        }
        let average = self.durations.iter().map(Duration::as_secs_f64).sum::<f64>()
            / self.durations.len() as f64;
        let lanes = self.concurrency.max(1).min(remaining);
        Some(average * remaining as f64 / lanes as f64)
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            completed_count: self.completed.len(),
            total_count: self.total,
            current_file: self
                .start_order
                .last()
                .and_then(|id| self.running.get(id))
                .cloned(),
            eta_seconds: self.eta_seconds(),
            succeeded: self.succeeded,
            failed: self.failed,
            timed_out: self.timed_out,
            cancelled: self.cancelled,
            running: self.running.len(),
            finished: self.finished,
        }
    }
}
