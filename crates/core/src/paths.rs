//! Output path derivation.
//!
//! Mirrors the input tree under the output root and names each PDF after its
//! source with a per-kind suffix: `reports/q1.xlsx` becomes `reports/q1_x.pdf`.

use crate::config::SuffixConfig;
use crate::error::{ConversionError, Result};
use crate::DocumentKind;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Derive the output path for `file` and create its parent directories.
pub fn map_output(
    input_root: &Path,
    output_root: &Path,
    file: &Path,
    kind: DocumentKind,
    suffixes: &SuffixConfig,
) -> Result<PathBuf> {
    let output = output_path(input_root, output_root, file, kind, suffixes)?;
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConversionError::path(parent, e))?;
    }
    Ok(output)
}

/// Same as [`map_output`] without touching the filesystem.
pub fn output_path(
    input_root: &Path,
    output_root: &Path,
    file: &Path,
    kind: DocumentKind,
    suffixes: &SuffixConfig,
) -> Result<PathBuf> {
    let stem = file
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ConversionError::path(file, "file has no usable name"))?;
    let name = format!("{}{}.pdf", stem, suffixes.for_kind(kind));

    let relative_dir = file
        .strip_prefix(input_root)
        .ok()
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .unwrap_or_default();
    if relative_dir.as_os_str().is_empty() && !file.starts_with(input_root) {
        debug!(file = %file.display(), "File is outside the input root, writing at output root");
    }

    Ok(output_root.join(relative_dir).join(name))
}

/// Output mapping with a per-run claim table.
///
/// `report.doc` and `report.docx` both map to `report_d.pdf`; the second one
/// is rejected unless `overwrite` is set.
#[derive(Debug)]
pub struct PathMapper {
    input_root: PathBuf,
    output_root: PathBuf,
    suffixes: SuffixConfig,
    overwrite: bool,
    claims: Mutex<HashMap<PathBuf, PathBuf>>,
}

impl PathMapper {
    pub fn new(
        input_root: impl Into<PathBuf>,
        output_root: impl Into<PathBuf>,
        suffixes: SuffixConfig,
        overwrite: bool,
    ) -> Self {
        Self {
            input_root: input_root.into(),
            output_root: output_root.into(),
            suffixes,
            overwrite,
            claims: Mutex::new(HashMap::new()),
        }
    }

    /// Map `file` and record the claim.
    pub fn map(&self, file: &Path, kind: DocumentKind) -> Result<PathBuf> {
        let output = output_path(
            &self.input_root,
            &self.output_root,
            file,
            kind,
            &self.suffixes,
        )?;

        {
            let mut claims = self
                .claims
                .lock()
                .map_err(|_| ConversionError::path(&output, "claim table poisoned"))?;
            match claims.get(&output) {
                Some(existing) if existing != file => {
                    if !self.overwrite {
                        return Err(ConversionError::OutputCollision {
                            output,
                            existing: existing.clone(),
                            requested: file.to_path_buf(),
                        });
                    }
                    warn!(
                        output = %output.display(),
                        previous = %existing.display(),
                        file = %file.display(),
                        "Output claimed twice, later input wins"
                    );
                    claims.insert(output.clone(), file.to_path_buf());
                }
                Some(_) => {}
                None => {
                    claims.insert(output.clone(), file.to_path_buf());
                }
            }
        }

        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConversionError::path(parent, e))?;
        }
        Ok(output)
    }

    /// Number of claimed outputs.
    pub fn claimed(&self) -> usize {
        self.claims.lock().map(|c| c.len()).unwrap_or(0)
    }
}
