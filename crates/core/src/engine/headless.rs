//! Headless LibreOffice engine.
//!
//! Every export spawns one `soffice --headless` process. Processes run in
//! parallel, which LibreOffice only allows when each one has its own user
//! profile, so the engine keeps a small set of profile slots and leases one
//! per process.

use super::{find_pdf, ConversionEngine, ExportOptions};
use crate::config::ConversionConfig;
use crate::error::{ConversionError, Result};
use crate::DocumentKind;
use async_channel::{bounded, Receiver, Sender};
use async_process::Command;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Instant;
use tempfile::TempDir;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// CSV import filter: comma separated, double-quoted, UTF-8, from line 1.
const CSV_INFILTER: &str = "CSV:44,34,76,1";

/// A LibreOffice user profile one process at a time may use.
struct ProfileSlot {
    id: usize,
    profile_dir: TempDir,
    docs_processed: AtomicU32,
}

impl std::fmt::Debug for ProfileSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileSlot")
            .field("id", &self.id)
            .field("profile_dir", &self.profile_dir.path())
            .field("docs_processed", &self.docs_processed.load(Ordering::SeqCst))
            .finish()
    }
}

impl ProfileSlot {
    fn new(id: usize) -> Result<Self> {
        let profile_dir = TempDir::with_prefix(format!("lo-profile-{}-", id))?;
        debug!(slot = id, profile = ?profile_dir.path(), "Created LibreOffice profile");
        Ok(Self {
            id,
            profile_dir,
            docs_processed: AtomicU32::new(0),
        })
    }

    fn profile_url(&self) -> String {
        let path = self.profile_dir.path().to_string_lossy().replace('\\', "/");
        if path.starts_with('/') {
            format!("file://{}", path)
        } else {
            format!("file:///{}", path)
        }
    }
}

/// Exclusive use of one profile slot.
///
/// A lease dropped before [`SlotLease::complete`] belonged to a killed
/// process; its profile may hold stale locks and is replaced.
struct SlotLease {
    slot: Option<ProfileSlot>,
    pool: Sender<ProfileSlot>,
    completed: bool,
}

impl SlotLease {
    fn slot(&self) -> Result<&ProfileSlot> {
        self.slot.as_ref().ok_or(ConversionError::PoolShutdown)
    }

    fn complete(&mut self) {
        self.completed = true;
        if let Some(slot) = &self.slot {
            slot.docs_processed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        let Some(slot) = self.slot.take() else {
            return;
        };
        let slot = if self.completed {
            slot
        } else {
            match ProfileSlot::new(slot.id) {
                Ok(fresh) => {
                    debug!(slot = slot.id, "Replaced profile after interrupted conversion");
                    fresh
                }
                Err(e) => {
                    warn!(slot = slot.id, error = %e, "Could not replace profile, reusing it");
                    slot
                }
            }
        };
        let _ = self.pool.try_send(slot);
    }
}

/// LibreOffice in headless mode, one process per export.
#[derive(Debug)]
pub struct HeadlessEngine {
    soffice_path: PathBuf,
    slots_tx: Sender<ProfileSlot>,
    slots_rx: Receiver<ProfileSlot>,
    slot_count: usize,
    total_processed: AtomicUsize,
}

impl HeadlessEngine {
    /// Locate soffice and create one profile slot per worker.
    pub fn new(config: &ConversionConfig) -> Result<Self> {
        let soffice_path = Self::find_soffice(config.soffice_path.as_deref())?;
        Self::with_binary(soffice_path, config.workers)
    }

    /// Use a specific soffice binary.
    pub fn with_binary(soffice_path: PathBuf, slots: usize) -> Result<Self> {
        let slot_count = slots.max(1);
        let (slots_tx, slots_rx) = bounded(slot_count);
        for id in 0..slot_count {
            slots_tx
                .try_send(ProfileSlot::new(id)?)
                .map_err(|e| ConversionError::ChannelError(e.to_string()))?;
        }
        debug!(soffice = ?soffice_path, slots = slot_count, "Headless engine initialized");
        Ok(Self {
            soffice_path,
            slots_tx,
            slots_rx,
            slot_count,
            total_processed: AtomicUsize::new(0),
        })
    }

    /// Find the soffice binary.
    pub fn find_soffice(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(path.to_path_buf());
            }
            return Err(ConversionError::EngineNotFound(format!(
                "soffice not found at {}",
                path.display()
            )));
        }

        let candidates = [
            // macOS
            "/Applications/LibreOffice.app/Contents/MacOS/soffice",
            // Linux
            "/usr/bin/soffice",
            "/usr/lib/libreoffice/program/soffice",
            "/opt/libreoffice/program/soffice",
            // Snap (Ubuntu)
            "/snap/bin/libreoffice.soffice",
            // Windows
            "C:\\Program Files\\LibreOffice\\program\\soffice.exe",
        ];

        for candidate in candidates {
            let path = PathBuf::from(candidate);
            if path.exists() {
                return Ok(path);
            }
        }

        which::which("soffice")
            .or_else(|_| which::which("libreoffice"))
            .map_err(|_| ConversionError::EngineNotFound("soffice (LibreOffice)".to_string()))
    }

    /// Number of profile slots.
    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    /// Total successful soffice runs.
    pub fn total_processed(&self) -> usize {
        self.total_processed.load(Ordering::SeqCst)
    }

    /// `--convert-to` argument for a PDF export.
    pub fn pdf_filter(kind: DocumentKind, options: &ExportOptions) -> String {
        match kind {
            DocumentKind::Word => "pdf:writer_pdf_Export".to_string(),
            DocumentKind::Excel => "pdf:calc_pdf_Export".to_string(),
            DocumentKind::PowerPoint if options.powerpoint.include_hidden => {
                r#"pdf:impress_pdf_Export:{"ExportHiddenSlides":{"type":"boolean","value":"true"}}"#
                    .to_string()
            }
            DocumentKind::PowerPoint => "pdf:impress_pdf_Export".to_string(),
        }
    }

    async fn lease(&self) -> Result<SlotLease> {
        let slot = self
            .slots_rx
            .recv()
            .await
            .map_err(|_| ConversionError::PoolShutdown)?;
        Ok(SlotLease {
            slot: Some(slot),
            pool: self.slots_tx.clone(),
            completed: false,
        })
    }

    /// Run one soffice conversion into `outdir`.
    async fn run_soffice(
        &self,
        input: &Path,
        convert_to: &str,
        infilter: Option<&str>,
        outdir: &Path,
    ) -> Result<()> {
        let start = Instant::now();
        let mut lease = self.lease().await?;
        let (slot_id, profile_url) = {
            let slot = lease.slot()?;
            (slot.id, slot.profile_url())
        };

        std::fs::create_dir_all(outdir).map_err(|e| ConversionError::path(outdir, e))?;

        let mut cmd = Command::new(&self.soffice_path);
        cmd.args([
            "--headless",
            "--invisible",
            "--nologo",
            "--nofirststartwizard",
            "--norestore",
        ]);

        // A separate profile per process is required for parallel runs.
        cmd.arg(format!("-env:UserInstallation={}", profile_url));
        if let Some(filter) = infilter {
            cmd.arg(format!("--infilter={}", filter));
        }
        cmd.args(["--convert-to", convert_to, "--outdir"]);
        cmd.arg(outdir);
        cmd.arg(input);
        cmd.kill_on_drop(true);

        debug!(slot = slot_id, input = ?input.file_name(), convert_to, "Running soffice");
        let output = cmd.output().await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            debug!(slot = slot_id, stdout = %stdout.trim(), "soffice output");
        }
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!(
                slot = slot_id,
                input = ?input,
                status = ?output.status.code(),
                stderr = %stderr.trim(),
                "soffice conversion failed"
            );
            lease.complete();
            return Err(ConversionError::render(
                input,
                format!("soffice exited with {}: {}", output.status, stderr.trim()),
            ));
        }

        lease.complete();
        self.total_processed.fetch_add(1, Ordering::SeqCst);
        debug!(
            slot = slot_id,
            input = ?input.file_name(),
            elapsed = ?start.elapsed(),
            "soffice finished"
        );
        Ok(())
    }
}

#[async_trait]
impl ConversionEngine for HeadlessEngine {
    fn name(&self) -> &'static str {
        "headless"
    }

    async fn export_pdf(
        &self,
        input: &Path,
        kind: DocumentKind,
        options: &ExportOptions,
        scratch: &Path,
    ) -> Result<Vec<u8>> {
        let outdir = scratch.join(format!("pdf-{}", Uuid::new_v4()));
        let filter = Self::pdf_filter(kind, options);
        self.run_soffice(input, &filter, None, &outdir).await?;

        let pdf = find_pdf(&outdir, input)
            .ok_or_else(|| ConversionError::render(input, "PDF output file not found"))?;
        tokio::fs::read(&pdf)
            .await
            .map_err(|e| ConversionError::render(input, format!("cannot read PDF: {}", e)))
    }

    async fn normalize_spreadsheet(&self, input: &Path, scratch: &Path) -> Result<PathBuf> {
        let outdir = scratch.join("normalized");
        let is_csv = input
            .extension()
            .map(|e| e.eq_ignore_ascii_case("csv"))
            .unwrap_or(false);
        self.run_soffice(
            input,
            "xlsx:Calc MS Excel 2007 XML",
            is_csv.then_some(CSV_INFILTER),
            &outdir,
        )
        .await?;

        let stem = input
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("workbook");
        let normalized = outdir.join(format!("{}.xlsx", stem));
        if !normalized.exists() {
            return Err(ConversionError::render(
                input,
                "normalized workbook was not produced",
            ));
        }
        Ok(normalized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_profiles_are_unique() {
        let a = ProfileSlot::new(0).unwrap();
        let b = ProfileSlot::new(1).unwrap();
        assert_ne!(a.profile_dir.path(), b.profile_dir.path());
        assert!(a.profile_url().starts_with("file://"));
    }

    #[test]
    fn test_pdf_filters() {
        let mut options = ExportOptions::default();
        assert_eq!(
            HeadlessEngine::pdf_filter(DocumentKind::Word, &options),
            "pdf:writer_pdf_Export"
        );
        assert_eq!(
            HeadlessEngine::pdf_filter(DocumentKind::Excel, &options),
            "pdf:calc_pdf_Export"
        );
        assert_eq!(
            HeadlessEngine::pdf_filter(DocumentKind::PowerPoint, &options),
            "pdf:impress_pdf_Export"
        );
        options.powerpoint.include_hidden = true;
        assert!(HeadlessEngine::pdf_filter(DocumentKind::PowerPoint, &options)
            .contains("ExportHiddenSlides"));
    }

    #[test]
    fn test_find_soffice_with_explicit_nonexistent_path() {
        let result = HeadlessEngine::find_soffice(Some(Path::new("/nonexistent/soffice")));
        assert!(matches!(result, Err(ConversionError::EngineNotFound(_))));
    }

    #[test]
    fn test_find_soffice_with_explicit_valid_path() {
        // Any existing file is accepted as an explicit binary.
        let current_exe = std::env::current_exe().unwrap();
        let result = HeadlessEngine::find_soffice(Some(&current_exe)).unwrap();
        assert_eq!(result, current_exe);
    }

    #[tokio::test]
    async fn test_lease_returns_slot_on_drop() {
        let engine =
            HeadlessEngine::with_binary(PathBuf::from("/nonexistent/soffice"), 1).unwrap();
        let mut first = engine.lease().await.unwrap();
        let first_profile = first.slot().unwrap().profile_dir.path().to_path_buf();
        first.complete();
        drop(first);

        let second = engine.lease().await.unwrap();
        assert_eq!(second.slot().unwrap().profile_dir.path(), first_profile);
        assert_eq!(
            second.slot().unwrap().docs_processed.load(Ordering::SeqCst),
            1
        );
    }

    #[tokio::test]
    async fn test_interrupted_lease_replaces_profile() {
        let engine =
            HeadlessEngine::with_binary(PathBuf::from("/nonexistent/soffice"), 1).unwrap();
        let lease = engine.lease().await.unwrap();
        let old_profile = lease.slot().unwrap().profile_dir.path().to_path_buf();
        drop(lease);

        let lease = engine.lease().await.unwrap();
        assert_ne!(lease.slot().unwrap().profile_dir.path(), old_profile);
        assert!(!old_profile.exists());
    }

    #[tokio::test]
    async fn test_missing_binary_is_process_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let input = dir.path().join("a.docx");
        std::fs::write(&input, b"x").unwrap();
        let engine =
            HeadlessEngine::with_binary(PathBuf::from("/nonexistent/soffice"), 1).unwrap();

        let err = engine
            .export_pdf(&input, DocumentKind::Word, &ExportOptions::default(), dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, ConversionError::ProcessStartFailed(_)));
        // The slot is still usable afterwards.
        assert!(engine.lease().await.is_ok());
    }

    #[tokio::test]
    async fn test_engine_from_config_with_missing_binary() {
        let mut config = ConversionConfig::default();
        config.soffice_path = Some(PathBuf::from("/nonexistent/path/to/soffice"));
        let result = HeadlessEngine::new(&config);
        assert!(matches!(result, Err(ConversionError::EngineNotFound(_))));
    }
}
