//! Logging setup and the live log tail.
//!
//! [`init_logging`] installs the global subscriber: stderr, a daily rolling
//! file, and optionally a [`LogChannel`]. The channel receives every event as
//! one finished [`LogLine`], tagged with the job whose span it was emitted in,
//! so lines from concurrent jobs never interleave mid-line.

use crate::config::LoggingConfig;
use crate::error::{ConversionError, Result};
use async_channel::{unbounded, Receiver, Sender};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt::{self, Write as _};
use std::sync::{Arc, Mutex};
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id};
use tracing::{Event, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt as tfmt, EnvFilter, Layer};

/// Base name of the rolling log files.
pub const LOG_FILE_PREFIX: &str = "office-to-pdf.log";

/// One complete log record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub target: String,
    /// Job the event belongs to, if it was emitted inside a job span.
    pub job_id: Option<u64>,
    pub file: Option<String>,
    /// Message followed by any structured fields as `key=value`.
    pub message: String,
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:>5}", self.timestamp.format("%H:%M:%S"), self.level)?;
        match (&self.job_id, &self.file) {
            (Some(id), Some(file)) => write!(f, " [#{} {}]", id, file)?,
            (Some(id), None) => write!(f, " [#{}]", id)?,
            (None, Some(file)) => write!(f, " [{}]", file)?,
            (None, None) => {}
        }
        write!(f, " {}", self.message)
    }
}

struct ChannelInner {
    capacity: usize,
    tail: Mutex<VecDeque<LogLine>>,
    subscribers: Mutex<Vec<Sender<LogLine>>>,
}

/// Bounded tail of recent log lines plus live subscribers.
#[derive(Clone)]
pub struct LogChannel {
    inner: Arc<ChannelInner>,
}

impl fmt::Debug for LogChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogChannel")
            .field("capacity", &self.inner.capacity)
            .finish()
    }
}

impl LogChannel {
    /// Keep at most `capacity` lines.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                capacity: capacity.max(1),
                tail: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Sized by `console_lines`.
    pub fn from_config(config: &LoggingConfig) -> Self {
        Self::new(config.console_lines)
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Append a line and forward it to subscribers.
    pub fn publish(&self, line: LogLine) {
        if let Ok(mut subscribers) = self.inner.subscribers.lock() {
            subscribers.retain(|tx| tx.try_send(line.clone()).is_ok());
        }
        if let Ok(mut tail) = self.inner.tail.lock() {
            if tail.len() == self.inner.capacity {
                tail.pop_front();
            }
            tail.push_back(line);
        }
    }

    /// Current tail, oldest first.
    pub fn tail(&self) -> Vec<LogLine> {
        self.inner
            .tail
            .lock()
            .map(|tail| tail.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Lines published after this call.
    pub fn subscribe(&self) -> Receiver<LogLine> {
        let (tx, rx) = unbounded();
        if let Ok(mut subscribers) = self.inner.subscribers.lock() {
            subscribers.push(tx);
        }
        rx
    }

    /// Layer feeding this channel.
    pub fn layer(&self) -> LogTailLayer {
        LogTailLayer {
            channel: self.clone(),
        }
    }
}

/// `tracing_subscriber` layer that publishes into a [`LogChannel`].
#[derive(Debug, Clone)]
pub struct LogTailLayer {
    channel: LogChannel,
}

/// Job identity recorded on a `job` span.
#[derive(Debug, Clone, Default)]
struct JobFields {
    id: Option<u64>,
    file: Option<String>,
}

impl Visit for JobFields {
    fn record_u64(&mut self, field: &Field, value: u64) {
        if field.name() == "id" {
            self.id = Some(value);
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        if field.name() == "id" {
            self.id = u64::try_from(value).ok();
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "file" {
            self.file = Some(value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "file" {
            self.file = Some(format!("{:?}", value));
        }
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.fields.trim_start().to_string()
        } else {
            format!("{}{}", self.message, self.fields)
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

impl<S> Layer<S> for LogTailLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        if attrs.metadata().name() != "job" {
            return;
        }
        let mut fields = JobFields::default();
        attrs.record(&mut fields);
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(fields);
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let job = ctx.event_scope(event).and_then(|scope| {
            scope
                .into_iter()
                .find_map(|span| span.extensions().get::<JobFields>().cloned())
        });
        let (job_id, file) = job.map(|j| (j.id, j.file)).unwrap_or((None, None));

        let metadata = event.metadata();
        self.channel.publish(LogLine {
            timestamp: Utc::now(),
            level: metadata.level().to_string(),
            target: metadata.target().to_string(),
            job_id,
            file,
            message: visitor.finish(),
        });
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the configured level. Keep the returned guard alive
/// for as long as file logging should work.
pub fn init_logging(config: &LoggingConfig, channel: Option<&LogChannel>) -> Result<WorkerGuard> {
    std::fs::create_dir_all(&config.log_dir)
        .map_err(|e| ConversionError::path(&config.log_dir, e))?;

    let file_appender = tracing_appender::rolling::daily(&config.log_dir, LOG_FILE_PREFIX);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_filter()));

    let stderr_layer = tfmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();
    let file_layer = tfmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_names(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .with(channel.map(LogChannel::layer))
        .try_init()
        .map_err(|e| ConversionError::Config(format!("logging already initialized: {}", e)))?;

    Ok(guard)
}
