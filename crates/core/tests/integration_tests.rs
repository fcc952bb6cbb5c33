//! Integration tests for office-to-pdf-core.
//!
//! Most tests drive the dispatcher against a scripted engine. Tests that need
//! a real LibreOffice skip themselves when `soffice` is not installed.
//!
//! Run with: cargo test --package office-to-pdf-core --test integration_tests

use async_trait::async_trait;
use futures::StreamExt;
use office_to_pdf_core::{
    config::{ConverterConfig, PrintConfigRule, ScalingMode},
    dispatcher::PART_SUFFIX,
    engine::{ExportOptions, HeadlessEngine},
    CancelToken, ConversionEngine, ConversionError, DocumentKind, JobDispatcher, JobEvent,
    JobStatus, ProgressReporter, Result,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Get the path to the generated fixtures directory
fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("tests/fixtures/output")
}

/// Check if LibreOffice is available
fn libreoffice_available() -> bool {
    which::which("soffice").is_ok()
        || which::which("libreoffice").is_ok()
        || Path::new("/Applications/LibreOffice.app/Contents/MacOS/soffice").exists()
}

macro_rules! require_soffice {
    () => {
        if !libreoffice_available() {
            eprintln!("Skipping test: LibreOffice not found");
            return;
        }
    };
}

// ============================================================================
// Scripted engine
// ============================================================================

/// Engine whose behaviour is chosen per file stem.
#[derive(Default)]
struct ScriptedEngine {
    /// Stems that never finish.
    hang: HashSet<String>,
    /// Stems that fail.
    fail: HashSet<String>,
    delay: Duration,
    /// Bytes appended to every PDF.
    padding: usize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    exports: Mutex<Vec<(PathBuf, ExportOptions)>>,
    normalized: Mutex<Vec<PathBuf>>,
}

impl ScriptedEngine {
    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    fn hang(mut self, stem: &str) -> Self {
        self.hang.insert(stem.to_string());
        self
    }

    fn fail(mut self, stem: &str) -> Self {
        self.fail.insert(stem.to_string());
        self
    }

    fn padded(mut self, bytes: usize) -> Self {
        self.padding = bytes;
        self
    }
}

/// Decrements the active counter even when the export future is dropped.
struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn stem_of(path: &Path) -> String {
    path.file_stem().unwrap().to_string_lossy().into_owned()
}

#[async_trait]
impl ConversionEngine for ScriptedEngine {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn export_pdf(
        &self,
        input: &Path,
        _kind: DocumentKind,
        options: &ExportOptions,
        _scratch: &Path,
    ) -> Result<Vec<u8>> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        let _guard = ActiveGuard(&self.active);

        self.exports
            .lock()
            .unwrap()
            .push((input.to_path_buf(), options.clone()));

        let stem = stem_of(input);
        if self.hang.contains(&stem) {
            futures::future::pending::<()>().await;
        }
        tokio::time::sleep(self.delay).await;
        if self.fail.contains(&stem) {
            return Err(ConversionError::Render {
                path: input.to_path_buf(),
                message: "scripted failure".into(),
            });
        }
        let mut pdf = format!("%PDF-1.7 {}", stem).into_bytes();
        pdf.resize(pdf.len() + self.padding, b' ');
        Ok(pdf)
    }

    async fn normalize_spreadsheet(&self, input: &Path, scratch: &Path) -> Result<PathBuf> {
        self.normalized.lock().unwrap().push(input.to_path_buf());
        let out = scratch.join(format!("{}.xlsx", stem_of(input)));
        std::fs::copy(input, &out).map_err(ConversionError::from)?;
        Ok(out)
    }
}

fn write_docs(root: &Path, names: &[&str]) {
    for name in names {
        let path = root.join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, name.as_bytes()).unwrap();
    }
}

/// Workbook with a small `Summary` sheet and a wide `Detail` sheet.
fn write_report_workbook(path: &Path) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut book = umya_spreadsheet::new_file();
    book.new_sheet("Detail").unwrap();
    {
        let sheets = book.get_sheet_collection_mut();
        sheets[0].set_name("Summary");
        sheets[0].get_cell_mut("A1").set_value("Quarter");
        sheets[0].get_cell_mut("B1").set_value("Revenue");
        sheets[0].get_cell_mut("A2").set_value("Q1");
        sheets[0].get_cell_mut("B2").set_value("1250000");
        for row in 1..=60u32 {
            for col in 1..=12u32 {
                sheets[1]
                    .get_cell_mut((col, row))
                    .set_value(format!("Line item {row}-{col}"));
            }
        }
    }
    umya_spreadsheet::writer::xlsx::write(&book, path).unwrap();
}

/// In-progress output files left anywhere under `dir`.
fn staging_files(dir: &Path) -> Vec<PathBuf> {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.into_path())
        .filter(|p| p.to_string_lossy().ends_with(PART_SUFFIX))
        .collect()
}

fn dir_is_empty(dir: &Path) -> bool {
    std::fs::read_dir(dir).unwrap().next().is_none()
}

fn config(input: &Path, output: &Path, workers: usize) -> ConverterConfig {
    ConverterConfig::default()
        .roots(input, output)
        .workers(workers)
        .excel_rules(vec![
            PrintConfigRule::for_sheets(1, ["Summary"]).scaling(ScalingMode::FitColumns),
            PrintConfigRule::default().scaling(ScalingMode::NoScaling),
        ])
}

// ============================================================================
// Dispatch, deadlines and concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_hanging_job_times_out_without_blocking_the_batch() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    write_docs(
        input.path(),
        &["a1.docx", "a2.docx", "a3.docx", "a4.pptx", "a5.doc"],
    );

    let engine = Arc::new(ScriptedEngine::with_delay(Duration::from_millis(50)).hang("a3"));
    let dispatcher = JobDispatcher::new(config(input.path(), output.path(), 2), engine.clone())
        .unwrap()
        .with_job_timeout(Duration::from_millis(400));

    let result = dispatcher.run(CancelToken::new()).await.unwrap();

    assert_eq!(result.total, 5);
    assert_eq!(result.succeeded, 4);
    assert_eq!(result.timed_out, 1);
    assert_eq!(result.jobs[2].status, JobStatus::TimedOut);
    assert!(result.jobs[2].error.as_deref().unwrap().contains("timed out"));
    assert!(engine.max_active.load(Ordering::SeqCst) <= 2);
    assert_eq!(engine.active.load(Ordering::SeqCst), 0);

    for name in ["a1_d.pdf", "a2_d.pdf", "a4_p.pdf", "a5_d.pdf"] {
        assert!(output.path().join(name).exists(), "{name} missing");
    }
    assert!(!output.path().join("a3_d.pdf").exists());
    assert!(staging_files(output.path()).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_hanging_workbook_times_out_and_cleans_up() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    for n in 1..=5 {
        write_report_workbook(&input.path().join(format!("r{n}.xlsx")));
    }

    let mut config = config(input.path(), output.path(), 2);
    config.conversion.temp_dir = Some(scratch.path().to_path_buf());
    let engine = Arc::new(ScriptedEngine::with_delay(Duration::from_millis(20)).hang("r3"));
    let dispatcher = JobDispatcher::new(config, engine.clone())
        .unwrap()
        .with_job_timeout(Duration::from_secs(3));

    let result = dispatcher.run(CancelToken::new()).await.unwrap();

    assert_eq!(result.total, 5);
    assert_eq!(result.succeeded, 4, "{:?}", result.problems().collect::<Vec<_>>());
    assert_eq!(result.timed_out, 1);
    assert_eq!(result.jobs[2].status, JobStatus::TimedOut);
    assert!(engine.max_active.load(Ordering::SeqCst) <= 2);
    assert_eq!(engine.active.load(Ordering::SeqCst), 0);

    // The hung job got as far as export with its prepared copy.
    let exports = engine.exports.lock().unwrap();
    let hung = exports
        .iter()
        .find(|(path, _)| path.file_stem().unwrap() == "r3")
        .expect("r3 reached export");
    assert_eq!(hung.1.sheets.len(), 2);
    assert!(!hung.0.starts_with(input.path()));

    for n in [1, 2, 4, 5] {
        assert!(output.path().join(format!("r{n}_x.pdf")).exists());
    }
    assert!(!output.path().join("r3_x.pdf").exists());
    assert!(staging_files(output.path()).is_empty());
    assert!(dir_is_empty(scratch.path()), "working copies left behind");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failures_are_isolated_and_jobs_keep_discovery_order() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    write_docs(
        input.path(),
        &["b.docx", "a.pptx", "c.rtf", "notes.txt", "sub/d.ppt"],
    );

    let engine = Arc::new(ScriptedEngine::with_delay(Duration::from_millis(5)).fail("b"));
    let dispatcher = JobDispatcher::new(config(input.path(), output.path(), 3), engine).unwrap();
    let result = dispatcher.run(CancelToken::new()).await.unwrap();

    let names: Vec<_> = result.jobs.iter().map(|j| j.file_name()).collect();
    assert_eq!(names, vec!["a.pptx", "b.docx", "c.rtf", "d.ppt"]);
    assert_eq!(result.failed, 1);
    assert_eq!(result.succeeded, 3);
    assert_eq!(result.skipped, 1);
    assert_eq!(
        result.total,
        result.succeeded + result.failed + result.timed_out + result.cancelled + result.skipped
    );
    assert!(output.path().join("sub/d_p.pdf").exists());

    let summaries: Vec<_> = std::fs::read_dir(output.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("summary_"))
        .collect();
    assert_eq!(summaries.len(), 1);
    let text = std::fs::read_to_string(summaries[0].path()).unwrap();
    assert!(text.contains("b.docx"));
    assert!(text.contains("scripted failure"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_output_collision_fails_second_job() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    write_docs(input.path(), &["memo.doc", "memo.docx"]);

    let engine = Arc::new(ScriptedEngine::default());
    let dispatcher = JobDispatcher::new(config(input.path(), output.path(), 2), engine).unwrap();
    let result = dispatcher.run(CancelToken::new()).await.unwrap();

    assert_eq!(result.succeeded, 1);
    assert_eq!(result.failed, 1);
    assert!(result.jobs[1].error.as_deref().unwrap().contains("already claimed"));
    assert!(result.jobs[1].started_at.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_overwrite_collision_writes_one_whole_output() {
    for _ in 0..5 {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        write_docs(input.path(), &["memo.doc", "memo.docx"]);

        let mut config = config(input.path(), output.path(), 2);
        config.conversion.overwrite = true;
        let padding = 8 << 20;
        let engine = Arc::new(ScriptedEngine::default().padded(padding));
        let dispatcher = JobDispatcher::new(config, engine).unwrap();
        let result = dispatcher.run(CancelToken::new()).await.unwrap();

        assert_eq!(result.succeeded, 2, "{:?}", result.problems().collect::<Vec<_>>());
        let pdf = std::fs::read(output.path().join("memo_d.pdf")).unwrap();
        assert_eq!(pdf.len(), "%PDF-1.7 memo".len() + padding);
        assert!(pdf.starts_with(b"%PDF-1.7 memo"));
        assert!(pdf[13..].iter().all(|b| *b == b' '));
        assert!(staging_files(output.path()).is_empty());
    }
}

// ============================================================================
// Spreadsheets
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_workbook_mirrors_tree_and_resolves_rules_per_sheet() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    write_report_workbook(&input.path().join("reports/q1.xlsx"));

    let engine = Arc::new(ScriptedEngine::default());
    let dispatcher =
        JobDispatcher::new(config(input.path(), output.path(), 1), engine.clone()).unwrap();
    let result = dispatcher.run(CancelToken::new()).await.unwrap();

    assert_eq!(result.succeeded, 1, "{:?}", result.jobs[0].error);
    let pdf = output.path().join("reports/q1_x.pdf");
    assert_eq!(std::fs::read(&pdf).unwrap(), b"%PDF-1.7 q1");

    let sheets = &result.jobs[0].sheets;
    assert_eq!(sheets.len(), 2);
    assert_eq!(sheets[0].name, "Summary");
    assert_eq!(sheets[0].rule_priority, Some(1));
    assert_eq!(sheets[1].name, "Detail");
    assert_eq!(sheets[1].rule_priority, Some(99));
    assert_eq!(sheets[1].scale, 1.0);
    assert!(sheets[1].pages > 1);

    let exports = engine.exports.lock().unwrap();
    let names: Vec<_> = exports[0].1.sheets.iter().map(|s| s.name.clone()).collect();
    assert_eq!(names, vec!["Summary", "Detail"]);
    assert!(!exports[0].0.starts_with(input.path()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_macro_workbook_is_normalized_and_left_untouched() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let source = input.path().join("budget.xlsm");
    write_report_workbook(&source);
    let before = std::fs::read(&source).unwrap();
    let modified = std::fs::metadata(&source).unwrap().modified().unwrap();

    let engine = Arc::new(ScriptedEngine::default());
    let dispatcher =
        JobDispatcher::new(config(input.path(), output.path(), 1), engine.clone()).unwrap();
    let result = dispatcher.run(CancelToken::new()).await.unwrap();

    assert_eq!(result.succeeded, 1, "{:?}", result.jobs[0].error);
    assert!(output.path().join("budget_x.pdf").exists());
    assert_eq!(engine.normalized.lock().unwrap().as_slice(), &[source.clone()]);
    assert_eq!(std::fs::read(&source).unwrap(), before);
    assert_eq!(std::fs::metadata(&source).unwrap().modified().unwrap(), modified);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sparse_workbook_converts_within_deadline() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let mut book = umya_spreadsheet::new_file();
    {
        let sheet = &mut book.get_sheet_collection_mut()[0];
        sheet.get_cell_mut("A1").set_value("Opening balance");
        sheet.get_cell_mut((16384u32, 20000u32)).set_value("stray");
    }
    umya_spreadsheet::writer::xlsx::write(&book, input.path().join("sparse.xlsx")).unwrap();

    let engine = Arc::new(ScriptedEngine::default());
    let dispatcher = JobDispatcher::new(config(input.path(), output.path(), 1), engine)
        .unwrap()
        .with_job_timeout(Duration::from_secs(20));
    let result = dispatcher.run(CancelToken::new()).await.unwrap();

    assert_eq!(result.succeeded, 1, "{:?}", result.jobs[0].error);
    assert!(output.path().join("sparse_x.pdf").exists());
    assert_eq!(result.jobs[0].sheets.len(), 1);
}

// ============================================================================
// Cancellation and progress
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancellation_drains_queued_jobs() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    write_docs(input.path(), &["1.docx", "2.docx", "3.docx", "4.docx"]);

    let engine = Arc::new(ScriptedEngine::with_delay(Duration::from_secs(30)));
    let dispatcher = JobDispatcher::new(config(input.path(), output.path(), 1), engine).unwrap();
    let events = dispatcher.subscribe();
    let cancel = CancelToken::new();

    let trigger = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                if matches!(event, JobEvent::Started { .. }) {
                    cancel.cancel();
                    break;
                }
            }
        })
    };

    let result = tokio::time::timeout(Duration::from_secs(10), dispatcher.run(cancel))
        .await
        .expect("cancellation should end the batch")
        .unwrap();
    trigger.await.unwrap();

    assert_eq!(result.cancelled, 4);
    assert!(result.jobs[0].started_at.is_some());
    assert!(result.jobs[1..].iter().all(|j| j.started_at.is_none()));
    assert!(result.jobs.iter().all(|j| j.status == JobStatus::Cancelled));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_progress_stream_follows_batch() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    write_docs(
        input.path(),
        &["p1.docx", "p2.docx", "p3.pptx", "p4.pptx", "p5.docx", "p6.rtf"],
    );

    let engine = Arc::new(ScriptedEngine::with_delay(Duration::from_millis(20)).fail("p4"));
    let dispatcher = JobDispatcher::new(config(input.path(), output.path(), 3), engine).unwrap();
    let snapshots = ProgressReporter::snapshots(dispatcher.subscribe());
    let collector = tokio::spawn(async move {
        let mut snapshots = Box::pin(snapshots);
        let mut seen = Vec::new();
        while let Some(snapshot) = snapshots.next().await {
            let done = snapshot.finished;
            seen.push(snapshot);
            if done {
                break;
            }
        }
        seen
    });

    dispatcher.run(CancelToken::new()).await.unwrap();
    let seen = collector.await.unwrap();

    let last = seen.last().unwrap();
    assert!(last.finished);
    assert_eq!(last.total_count, 6);
    assert_eq!(last.completed_count, 6);
    assert_eq!(last.succeeded, 5);
    assert_eq!(last.failed, 1);
    assert_eq!(last.running, 0);
    assert_eq!(last.eta_seconds, Some(0.0));
    assert!(seen
        .windows(2)
        .all(|w| w[0].completed_count <= w[1].completed_count));
    assert!(seen.iter().all(|s| s.running <= 3));
}

// ============================================================================
// Real LibreOffice
// ============================================================================

#[tokio::test]
async fn test_headless_csv_to_pdf() {
    require_soffice!();

    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    std::fs::write(
        input.path().join("ledger.csv"),
        "Item,Amount,Note\nCoffee,3.5,Café\nTea,2.0,Trà xanh\n",
    )
    .unwrap();

    let config = config(input.path(), output.path(), 1);
    let engine = match HeadlessEngine::new(&config.conversion) {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            eprintln!("Skipping test: {}", e);
            return;
        }
    };
    let dispatcher = JobDispatcher::new(config, engine).unwrap();
    let result = dispatcher.run(CancelToken::new()).await.unwrap();

    assert_eq!(result.succeeded, 1, "{:?}", result.jobs[0].error);
    let pdf = std::fs::read(output.path().join("ledger_x.pdf")).unwrap();
    assert!(pdf.starts_with(b"%PDF"));
}

#[tokio::test]
async fn test_headless_fixture_documents() {
    require_soffice!();

    let fixtures = fixtures_dir();
    if !fixtures.exists() {
        eprintln!("Skipping test: fixtures not generated at {:?}", fixtures);
        return;
    }

    let output = TempDir::new().unwrap();
    let config = config(&fixtures, output.path(), 2);
    let engine = match HeadlessEngine::new(&config.conversion) {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            eprintln!("Skipping test: {}", e);
            return;
        }
    };
    let dispatcher = JobDispatcher::new(config, engine).unwrap();
    let result = dispatcher.run(CancelToken::new()).await.unwrap();

    for job in result.problems() {
        eprintln!("{}: {} {:?}", job.source.display(), job.status, job.error);
    }
    assert!(result.succeeded > 0);
    assert_eq!(result.timed_out, 0);
}
