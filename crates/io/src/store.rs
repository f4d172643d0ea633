// Side-store persistence and lookup

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use opmerge_recon::sidecar::{is_merge_id, output_stem};
use opmerge_recon::{MergeError, Sidecar, SIDECAR_SUFFIX};
use tracing::{debug, warn};

use crate::error::IoError;
use crate::fsutil::write_durable;

/// Directory of `<stem>.<merge-id>.sidecar.json` documents.
#[derive(Debug, Clone)]
pub struct SidecarStore {
    dir: PathBuf,
}

impl SidecarStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Durably write `sidecar`; returns the written path.
    pub fn save(&self, sidecar: &Sidecar) -> Result<PathBuf, IoError> {
        let path = self.dir.join(sidecar.file_name());
        let json = sidecar.to_json().map_err(|e| IoError::Json {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        write_durable(&path, json.as_bytes())?;
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Sidecar, IoError> {
        let text = std::fs::read_to_string(path).map_err(|e| IoError::read(path, e))?;
        Sidecar::from_json(&text).map_err(|e| match e {
            MergeError::UnsupportedSchema { found, expected } => IoError::UnsupportedSchema {
                path: path.to_path_buf(),
                found,
                expected,
            },
            other => IoError::Json {
                path: path.to_path_buf(),
                reason: other.to_string(),
            },
        })
    }

    /// Load the side-store of one specific merge. A missing file is an error,
    /// and so is an id that is not one [`merge_id`] could produce.
    ///
    /// [`merge_id`]: opmerge_recon::sidecar::merge_id
    pub fn load_by_id(&self, merged_file: &str, merge_id: &str) -> Result<Sidecar, IoError> {
        if !is_merge_id(merge_id) {
            return Err(IoError::InvalidMergeId(merge_id.to_string()));
        }
        let stem = output_stem(merged_file);
        let path = self.dir.join(format!("{stem}.{merge_id}{SIDECAR_SUFFIX}"));
        if !path.is_file() {
            return Err(IoError::SidecarNotFound {
                dir: self.dir.clone(),
                stem: stem.to_string(),
                merge_id: Some(merge_id.to_string()),
            });
        }
        Self::load(&path)
    }

    /// Newest side-store for `merged_file` whose source names account for
    /// every identity value in the merged table.
    ///
    /// Unreadable or incompatible candidates are skipped with a warning.
    pub fn find_latest(
        &self,
        merged_file: &str,
        identities: &[Vec<String>],
    ) -> Result<(PathBuf, Sidecar), IoError> {
        let stem = output_stem(merged_file);
        for path in self.candidates(stem)? {
            let sidecar = match Self::load(&path) {
                Ok(s) => s,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping side-store candidate");
                    continue;
                }
            };
            if sidecar.matches_identities(identities) {
                debug!(path = %path.display(), merge_id = %sidecar.manifest.merge_id, "side-store selected");
                return Ok((path, sidecar));
            }
            debug!(path = %path.display(), "side-store does not match identity columns");
        }

        Err(IoError::SidecarNotFound {
            dir: self.dir.clone(),
            stem: stem.to_string(),
            merge_id: None,
        })
    }

    /// Candidate documents for `stem`, newest modification time first.
    fn candidates(&self, stem: &str) -> Result<Vec<PathBuf>, IoError> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }
        let prefix = format!("{stem}.");
        let entries = std::fs::read_dir(&self.dir).map_err(|e| IoError::read(&self.dir, e))?;

        let mut found: Vec<(SystemTime, PathBuf)> = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| IoError::read(&self.dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(id) = name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(SIDECAR_SUFFIX))
            else {
                continue;
            };
            // a dotted middle belongs to a longer stem
            if id.is_empty() || id.contains('.') {
                continue;
            }
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            found.push((modified, entry.path()));
        }

        found.sort_by(|a, b| b.cmp(a));
        Ok(found.into_iter().map(|(_, path)| path).collect())
    }
}
