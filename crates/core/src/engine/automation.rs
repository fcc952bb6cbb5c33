//! Office automation engine.
//!
//! Office automation objects are single-threaded, so every automation context
//! lives on its own OS thread for its whole life. A job leases one context,
//! sends it work over a channel and waits for the reply. Leases always go back
//! to the pool; a lease dropped mid-task (timeout or cancellation) raises the
//! context's abort flag and has the context recreated before it is reused.
//!
//! The Office context itself is a PowerShell host process that keeps the
//! Office applications open and takes one JSON request per line on stdin.
//! Recycling a context kills its host and starts a new one.

use super::{find_pdf, ConversionEngine, ExportOptions};
use crate::config::Orientation;
use crate::error::{ConversionError, Result};
use crate::DocumentKind;
use async_channel::{bounded, Receiver, Sender};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Work for one automation context.
#[derive(Debug, Clone)]
pub enum AutomationTask {
    /// Export `input` to the PDF at `output`.
    Export {
        input: PathBuf,
        kind: DocumentKind,
        options: ExportOptions,
        output: PathBuf,
    },
    /// Save the spreadsheet `input` as `.xlsx` at `output`.
    Normalize { input: PathBuf, output: PathBuf },
}

/// One automation context. Created, used and closed on a single thread.
pub trait AutomationSession {
    /// Run a task. Implementations poll `abort` and give up once it is set.
    fn run(&mut self, task: &AutomationTask, abort: &AtomicBool) -> Result<()>;

    /// Release the context.
    fn close(&mut self) {}
}

/// Creates automation sessions on their context threads.
pub trait SessionFactory: Send + Sync {
    fn create(&self, slot: usize) -> Result<Box<dyn AutomationSession>>;
}

impl<F> SessionFactory for F
where
    F: Fn(usize) -> Result<Box<dyn AutomationSession>> + Send + Sync,
{
    fn create(&self, slot: usize) -> Result<Box<dyn AutomationSession>> {
        self(slot)
    }
}

enum ContextMessage {
    Run(AutomationTask, oneshot::Sender<Result<()>>),
    Recycle,
}

/// Handle to one context thread.
struct ContextHandle {
    slot: usize,
    tx: crossbeam_channel::Sender<ContextMessage>,
    abort: Arc<AtomicBool>,
}

/// Exclusive use of one automation context for one job.
pub struct ContextLease {
    handle: Option<ContextHandle>,
    pool: Sender<ContextHandle>,
    in_flight: bool,
}

impl ContextLease {
    /// Slot number of the leased context.
    pub fn slot(&self) -> Option<usize> {
        self.handle.as_ref().map(|h| h.slot)
    }

    /// Run a task on the leased context and wait for it.
    pub async fn run(&mut self, task: AutomationTask) -> Result<()> {
        let handle = self.handle.as_ref().ok_or(ConversionError::PoolShutdown)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        handle
            .tx
            .send(ContextMessage::Run(task, reply_tx))
            .map_err(|_| ConversionError::PoolShutdown)?;
        self.in_flight = true;
        let result = reply_rx.await.map_err(|_| ConversionError::PoolShutdown)?;
        self.in_flight = false;
        result
    }
}

impl Drop for ContextLease {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if self.in_flight {
            warn!(slot = handle.slot, "Automation task interrupted, recycling context");
            handle.abort.store(true, Ordering::SeqCst);
            let _ = handle.tx.send(ContextMessage::Recycle);
        }
        let _ = self.pool.try_send(handle);
    }
}

/// Fixed set of automation contexts, one dedicated thread each.
pub struct AutomationPool {
    contexts_tx: Sender<ContextHandle>,
    contexts_rx: Receiver<ContextHandle>,
    threads: Vec<JoinHandle<()>>,
    recycled: Arc<AtomicUsize>,
    size: usize,
}

impl std::fmt::Debug for AutomationPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutomationPool")
            .field("size", &self.size)
            .field("available", &self.contexts_rx.len())
            .field("recycled", &self.recycled.load(Ordering::SeqCst))
            .finish()
    }
}

impl AutomationPool {
    /// Start `size` context threads.
    pub fn new(size: usize, factory: Arc<dyn SessionFactory>) -> Result<Self> {
        let size = size.max(1);
        let (contexts_tx, contexts_rx) = bounded(size);
        let recycled = Arc::new(AtomicUsize::new(0));
        let mut threads = Vec::with_capacity(size);

        for slot in 0..size {
            let (tx, rx) = crossbeam_channel::unbounded();
            let abort = Arc::new(AtomicBool::new(false));
            let thread = std::thread::Builder::new()
                .name(format!("office-automation-{}", slot))
                .spawn({
                    let factory = Arc::clone(&factory);
                    let abort = Arc::clone(&abort);
                    let recycled = Arc::clone(&recycled);
                    move || context_thread(slot, factory, rx, abort, recycled)
                })?;
            threads.push(thread);
            contexts_tx
                .try_send(ContextHandle { slot, tx, abort })
                .map_err(|e| ConversionError::ChannelError(e.to_string()))?;
        }

        info!(size, "Automation pool started");
        Ok(Self {
            contexts_tx,
            contexts_rx,
            threads,
            recycled,
            size,
        })
    }

    /// Wait for a free context.
    pub async fn lease(&self) -> Result<ContextLease> {
        let handle = self
            .contexts_rx
            .recv()
            .await
            .map_err(|_| ConversionError::PoolShutdown)?;
        Ok(ContextLease {
            handle: Some(handle),
            pool: self.contexts_tx.clone(),
            in_flight: false,
        })
    }

    /// Number of contexts.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Contexts currently not leased.
    pub fn available(&self) -> usize {
        self.contexts_rx.len()
    }

    /// How many times a context was recreated after an interrupted task.
    pub fn recycled(&self) -> usize {
        self.recycled.load(Ordering::SeqCst)
    }

    /// Stop handing out contexts. Threads exit once their handles are dropped.
    pub fn shutdown(&self) {
        info!("Shutting down automation pool");
        self.contexts_rx.close();
        while let Ok(handle) = self.contexts_rx.try_recv() {
            drop(handle);
        }
    }

    /// Number of context threads still running.
    pub fn live_threads(&self) -> usize {
        self.threads.iter().filter(|t| !t.is_finished()).count()
    }
}

impl Drop for AutomationPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn context_thread(
    slot: usize,
    factory: Arc<dyn SessionFactory>,
    rx: crossbeam_channel::Receiver<ContextMessage>,
    abort: Arc<AtomicBool>,
    recycled: Arc<AtomicUsize>,
) {
    let mut session = factory.create(slot).map_err(|e| e.to_string());
    if let Err(e) = &session {
        error!(slot, error = %e, "Failed to create automation context");
    }

    for message in rx.iter() {
        match message {
            ContextMessage::Run(task, reply) => {
                let result = match session.as_mut() {
                    Ok(s) => s.run(&task, &abort),
                    Err(e) => Err(ConversionError::EngineNotFound(e.clone())),
                };
                let _ = reply.send(result);
            }
            ContextMessage::Recycle => {
                if let Ok(s) = session.as_mut() {
                    s.close();
                }
                session = factory.create(slot).map_err(|e| e.to_string());
                abort.store(false, Ordering::SeqCst);
                recycled.fetch_add(1, Ordering::SeqCst);
                debug!(slot, "Automation context recreated");
            }
        }
    }

    if let Ok(s) = session.as_mut() {
        s.close();
    }
    debug!(slot, "Automation context thread exiting");
}

/// Engine backed by an [`AutomationPool`].
#[derive(Debug)]
pub struct AutomationEngine {
    pool: AutomationPool,
}

impl AutomationEngine {
    pub fn new(contexts: usize, factory: Arc<dyn SessionFactory>) -> Result<Self> {
        Ok(Self {
            pool: AutomationPool::new(contexts, factory)?,
        })
    }

    pub fn pool(&self) -> &AutomationPool {
        &self.pool
    }

    async fn run(&self, task: AutomationTask) -> Result<()> {
        let mut lease = self.pool.lease().await?;
        lease.run(task).await
    }
}

#[async_trait]
impl ConversionEngine for AutomationEngine {
    fn name(&self) -> &'static str {
        "automation"
    }

    async fn export_pdf(
        &self,
        input: &Path,
        kind: DocumentKind,
        options: &ExportOptions,
        scratch: &Path,
    ) -> Result<Vec<u8>> {
        let outdir = scratch.join(format!("pdf-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&outdir).map_err(|e| ConversionError::path(&outdir, e))?;
        let stem = input
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("output");
        let output = outdir.join(format!("{}.pdf", stem));

        self.run(AutomationTask::Export {
            input: input.to_path_buf(),
            kind,
            options: options.clone(),
            output,
        })
        .await?;

        let pdf = find_pdf(&outdir, input)
            .ok_or_else(|| ConversionError::render(input, "PDF output file not found"))?;
        tokio::fs::read(&pdf)
            .await
            .map_err(|e| ConversionError::render(input, format!("cannot read PDF: {}", e)))
    }

    async fn normalize_spreadsheet(&self, input: &Path, scratch: &Path) -> Result<PathBuf> {
        let outdir = scratch.join("normalized");
        std::fs::create_dir_all(&outdir).map_err(|e| ConversionError::path(&outdir, e))?;
        let stem = input
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("workbook");
        let output = outdir.join(format!("{}.xlsx", stem));

        self.run(AutomationTask::Normalize {
            input: input.to_path_buf(),
            output: output.clone(),
        })
        .await?;

        if !output.exists() {
            return Err(ConversionError::render(
                input,
                "normalized workbook was not produced",
            ));
        }
        Ok(output)
    }
}

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long a host gets to quit its applications after its input closes.
const HOST_EXIT_GRACE: Duration = Duration::from_secs(10);

/// Stderr lines kept for error messages.
const STDERR_TAIL_LINES: usize = 20;

/// Prefix of reply lines, so stray output from Office calls is never read as one.
const REPLY_MARKER: &str = "@@reply ";

/// Long-lived PowerShell host. Reads one JSON request per line, keeps each
/// Office application open across requests and quits them when input ends.
const HOST_SCRIPT: &str = r#"$ErrorActionPreference = 'Stop'
[Console]::InputEncoding = [System.Text.Encoding]::UTF8
[Console]::OutputEncoding = [System.Text.Encoding]::UTF8
$apps = @{}

function New-App([string]$progId) {
    $app = New-Object -ComObject $progId
    switch ($progId) {
        'Word.Application' { $app.Visible = $false; $app.DisplayAlerts = 0 }
        'Excel.Application' { $app.Visible = $false; $app.DisplayAlerts = $false; $app.ScreenUpdating = $false }
    }
    return $app
}

function Get-App([string]$progId) {
    $app = $apps[$progId]
    if ($null -ne $app) {
        try { $null = $app.Name } catch { $app = $null }
    }
    if ($null -eq $app) {
        $app = New-App $progId
        $apps[$progId] = $app
    }
    return $app
}

function Invoke-Word($t) {
    $word = Get-App 'Word.Application'
    $doc = $word.Documents.Open($t.in, $false, $true)
    try {
        $ps = $doc.PageSetup
        $ps.Orientation = $t.options.orientation
        $ps.TopMargin = $t.options.top
        $ps.BottomMargin = $t.options.bottom
        $ps.LeftMargin = $t.options.left
        $ps.RightMargin = $t.options.right
        $doc.ExportAsFixedFormat($t.out, 17, $false, 0)
    } finally {
        $doc.Close($false)
    }
}

function Invoke-Excel($t) {
    $excel = Get-App 'Excel.Application'
    $wb = $excel.Workbooks.Open($t.in, 0, $true)
    try {
        foreach ($sheet in $t.options.sheets) {
            $ws = $wb.Worksheets.Item($sheet.name)
            $ws.PageSetup.PrintHeadings = [bool]$sheet.print_row_col_headings
        }
        $wb.ExportAsFixedFormat(0, $t.out)
    } finally {
        $wb.Close($false)
    }
}

function Invoke-PowerPoint($t) {
    $pp = Get-App 'PowerPoint.Application'
    $pres = $pp.Presentations.Open($t.in, $true, $false, $false)
    try {
        $pres.PrintOptions.PrintHiddenSlides = [int][bool]$t.options.include_hidden
        $pres.PrintOptions.FrameSlides = [int][bool]$t.options.frame_slides
        $pres.SaveAs($t.out, 32)
    } finally {
        $pres.Close()
    }
}

function Invoke-Normalize($t) {
    $excel = Get-App 'Excel.Application'
    if ([System.IO.Path]::GetExtension($t.in) -ieq '.csv') {
        $excel.Workbooks.OpenText($t.in, 65001, 1, 1, 1, $false, $false, $false, $true)
        $wb = $excel.ActiveWorkbook
    } else {
        $wb = $excel.Workbooks.Open($t.in, 0, $true)
    }
    try {
        $wb.SaveAs($t.out, 51)
    } finally {
        $wb.Close($false)
    }
}

while ($null -ne ($line = [Console]::In.ReadLine())) {
    if ($line.Trim() -eq '') { continue }
    $t = $line | ConvertFrom-Json
    try {
        switch ($t.op) {
            'word' { $null = Invoke-Word $t }
            'excel' { $null = Invoke-Excel $t }
            'powerpoint' { $null = Invoke-PowerPoint $t }
            'normalize' { $null = Invoke-Normalize $t }
            default { throw "unknown operation '$($t.op)'" }
        }
        $reply = @{ id = $t.id; ok = $true }
    } catch {
        $reply = @{ id = $t.id; ok = $false; error = $_.Exception.Message }
    }
    [Console]::Out.WriteLine('@@reply ' + ($reply | ConvertTo-Json -Compress))
    [Console]::Out.Flush()
}

foreach ($app in $apps.Values) {
    try { $app.Quit() } catch {}
    [void][System.Runtime.InteropServices.Marshal]::ReleaseComObject($app)
}
"#;

/// One request to the host.
#[derive(Debug, Serialize)]
struct HostRequest<'a> {
    id: u64,
    op: &'static str,
    #[serde(rename = "in")]
    input: &'a Path,
    #[serde(rename = "out")]
    output: &'a Path,
    options: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct HostReply {
    id: u64,
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Creates [`OfficeScriptSession`]s driving Office through PowerShell.
#[derive(Debug, Clone)]
pub struct OfficeScriptFactory {
    powershell: PathBuf,
}

impl OfficeScriptFactory {
    /// Locate PowerShell.
    pub fn new() -> Result<Self> {
        let powershell = which::which("powershell")
            .or_else(|_| which::which("pwsh"))
            .map_err(|_| ConversionError::EngineNotFound("powershell".to_string()))?;
        Ok(Self { powershell })
    }
}

impl SessionFactory for OfficeScriptFactory {
    fn create(&self, slot: usize) -> Result<Box<dyn AutomationSession>> {
        Ok(Box::new(OfficeScriptSession::start(&self.powershell, slot)?))
    }
}

/// Running host process and the threads draining its output.
struct ScriptHost {
    child: Child,
    stdin: ChildStdin,
    replies: crossbeam_channel::Receiver<HostReply>,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
}

impl ScriptHost {
    fn spawn(powershell: &Path, script: &Path, slot: usize) -> Result<Self> {
        let mut child = Command::new(powershell)
            .args([
                "-NoProfile",
                "-NonInteractive",
                "-ExecutionPolicy",
                "Bypass",
                "-File",
            ])
            .arg(script)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let pipes = (child.stdin.take(), child.stdout.take(), child.stderr.take());
        let (Some(stdin), Some(stdout), Some(stderr)) = pipes else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ConversionError::ChannelError(
                "automation host pipes unavailable".to_string(),
            ));
        };

        let (tx, replies) = crossbeam_channel::unbounded();
        std::thread::Builder::new()
            .name(format!("office-automation-{}-out", slot))
            .spawn(move || {
                for line in BufReader::new(stdout).lines().map_while(|l| l.ok()) {
                    let Some(json) = line.strip_prefix(REPLY_MARKER) else {
                        debug!(slot, line = %line, "Automation host output");
                        continue;
                    };
                    match serde_json::from_str::<HostReply>(json) {
                        Ok(reply) => {
                            if tx.send(reply).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(slot, error = %e, "Unreadable automation reply"),
                    }
                }
            })?;

        let stderr_tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        std::thread::Builder::new()
            .name(format!("office-automation-{}-err", slot))
            .spawn({
                let tail = Arc::clone(&stderr_tail);
                move || {
                    for line in BufReader::new(stderr).lines().map_while(|l| l.ok()) {
                        if let Ok(mut tail) = tail.lock() {
                            if tail.len() == STDERR_TAIL_LINES {
                                tail.pop_front();
                            }
                            tail.push_back(line);
                        }
                    }
                }
            })?;

        debug!(slot, pid = child.id(), "Automation host started");
        Ok(Self {
            child,
            stdin,
            replies,
            stderr_tail,
        })
    }

    fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    fn send(&mut self, line: &str) -> std::io::Result<()> {
        writeln!(self.stdin, "{}", line)?;
        self.stdin.flush()
    }

    fn stderr_tail(&self) -> String {
        self.stderr_tail
            .lock()
            .map(|tail| tail.iter().cloned().collect::<Vec<_>>().join("\n"))
            .unwrap_or_default()
    }

    /// Close input so the host quits its applications, then kill it if it lingers.
    fn shutdown(self) {
        let Self { mut child, stdin, .. } = self;
        drop(stdin);
        let deadline = std::time::Instant::now() + HOST_EXIT_GRACE;
        while std::time::Instant::now() < deadline {
            if !matches!(child.try_wait(), Ok(None)) {
                return;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
        warn!(pid = child.id(), "Automation host did not exit, killing it");
        let _ = child.kill();
        let _ = child.wait();
    }

    fn kill(mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Automation context backed by one long-lived PowerShell host that keeps
/// the Office applications open between tasks.
pub struct OfficeScriptSession {
    powershell: PathBuf,
    slot: usize,
    workdir: tempfile::TempDir,
    script: PathBuf,
    host: Option<ScriptHost>,
    next_id: u64,
}

impl OfficeScriptSession {
    /// Write the host script and start the host.
    pub fn start(powershell: &Path, slot: usize) -> Result<Self> {
        let workdir = tempfile::TempDir::with_prefix(format!("office-automation-{}-", slot))?;
        let script = workdir.path().join("host.ps1");
        std::fs::write(&script, HOST_SCRIPT).map_err(|e| ConversionError::path(&script, e))?;
        let host = ScriptHost::spawn(powershell, &script, slot)?;
        Ok(Self {
            powershell: powershell.to_path_buf(),
            slot,
            workdir,
            script,
            host: Some(host),
            next_id: 0,
        })
    }

    fn operation(task: &AutomationTask) -> &'static str {
        match task {
            AutomationTask::Export { kind, .. } => match kind {
                DocumentKind::Word => "word",
                DocumentKind::Excel => "excel",
                DocumentKind::PowerPoint => "powerpoint",
            },
            AutomationTask::Normalize { .. } => "normalize",
        }
    }

    /// Options document the host reads for a task.
    fn options_json(task: &AutomationTask) -> serde_json::Value {
        match task {
            AutomationTask::Export {
                kind: DocumentKind::Word,
                options,
                ..
            } => {
                let word = &options.word;
                let margins = word.margins.inches(&word.margins_custom);
                serde_json::json!({
                    "orientation": match word.orientation {
                        Orientation::Portrait => 0,
                        Orientation::Landscape => 1,
                    },
                    "top": margins.top * 72.0,
                    "bottom": margins.bottom * 72.0,
                    "left": margins.left * 72.0,
                    "right": margins.right * 72.0,
                })
            }
            AutomationTask::Export {
                kind: DocumentKind::Excel,
                options,
                ..
            } => serde_json::json!({ "sheets": options.sheets }),
            AutomationTask::Export {
                kind: DocumentKind::PowerPoint,
                options,
                ..
            } => serde_json::to_value(&options.powerpoint).unwrap_or_default(),
            AutomationTask::Normalize { .. } => serde_json::json!({}),
        }
    }

    /// Request line for a task.
    fn request_line(id: u64, task: &AutomationTask) -> Result<String> {
        let (input, output) = task.paths();
        let request = HostRequest {
            id,
            op: Self::operation(task),
            input,
            output,
            options: Self::options_json(task),
        };
        serde_json::to_string(&request).map_err(|e| ConversionError::render(input, e.to_string()))
    }

    /// The running host, restarted if it died since the last task.
    fn host(&mut self) -> Result<&mut ScriptHost> {
        let running = self.host.as_mut().is_some_and(ScriptHost::is_running);
        if !running {
            if let Some(dead) = self.host.take() {
                warn!(
                    slot = self.slot,
                    stderr = %dead.stderr_tail(),
                    "Automation host exited, restarting"
                );
                dead.kill();
            }
            self.host = Some(ScriptHost::spawn(&self.powershell, &self.script, self.slot)?);
        }
        self.host.as_mut().ok_or_else(|| {
            ConversionError::ChannelError("automation host unavailable".to_string())
        })
    }

    fn host_failure(&mut self, input: &Path, what: &str) -> ConversionError {
        let stderr = match self.host.take() {
            Some(host) => {
                let tail = host.stderr_tail();
                host.kill();
                tail
            }
            None => String::new(),
        };
        ConversionError::render(input, format!("{}: {}", what, stderr.trim()))
    }
}

impl AutomationTask {
    fn paths(&self) -> (&Path, &Path) {
        match self {
            AutomationTask::Export { input, output, .. } => (input, output),
            AutomationTask::Normalize { input, output } => (input, output),
        }
    }
}

impl AutomationSession for OfficeScriptSession {
    fn run(&mut self, task: &AutomationTask, abort: &AtomicBool) -> Result<()> {
        let (input, _) = task.paths();
        self.next_id += 1;
        let id = self.next_id;
        let line = Self::request_line(id, task)?;

        let sent = self.host()?.send(&line);
        if sent.is_err() {
            return Err(self.host_failure(input, "automation host stopped accepting work"));
        }
        let replies = match self.host.as_ref() {
            Some(host) => host.replies.clone(),
            None => return Err(self.host_failure(input, "automation host unavailable")),
        };

        loop {
            if abort.load(Ordering::SeqCst) {
                // Whatever the host was doing is abandoned with it.
                if let Some(host) = self.host.take() {
                    host.kill();
                }
                return Err(ConversionError::Cancelled(input.to_path_buf()));
            }
            match replies.recv_timeout(POLL_INTERVAL) {
                Ok(reply) if reply.id == id => {
                    return if reply.ok {
                        Ok(())
                    } else {
                        Err(ConversionError::render(
                            input,
                            format!(
                                "automation script failed: {}",
                                reply.error.unwrap_or_default().trim()
                            ),
                        ))
                    };
                }
                Ok(stale) => {
                    debug!(slot = self.slot, id = stale.id, "Dropping stale automation reply")
                }
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                    return Err(self.host_failure(input, "automation host exited"));
                }
            }
        }
    }

    fn close(&mut self) {
        if let Some(host) = self.host.take() {
            host.shutdown();
        }
        debug!(
            slot = self.slot,
            workdir = %self.workdir.path().display(),
            "Automation session closed"
        );
    }
}
