// SPDX-License-Identifier: MPL-2.0

//! Asset persistence after engine dispatch
//!
//! The engine writes its outputs to scratch paths; once a dispatch
//! completes, the named files are handed to the asset store in a single
//! call. The store is a thin collaborator — the pipeline owns no
//! persistent state of its own.

use crate::engine::OutputPaths;
use crate::errors::PipelineError;
use chrono::Local;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Timestamp format for capture base names
const BASE_NAME_FORMAT: &str = "%Y-%m-%d-%H-%M-%S-%3f";

/// Build the base name for a capture's output files.
/// Burst outputs carry a marker suffix so merged shots sort together.
pub fn capture_base_name(burst: bool) -> String {
    let stamp = Local::now().format(BASE_NAME_FORMAT);
    if burst {
        format!("{}_HDRPLUS", stamp)
    } else {
        stamp.to_string()
    }
}

/// Destination for processed outputs
pub trait AssetStore: Send + Sync {
    /// Persist the named output files for one capture base name.
    /// Called exactly once per completed dispatch, after the engine
    /// returns. Outputs the engine chose not to produce are skipped.
    fn persist(&self, base_name: &str, outputs: &OutputPaths)
    -> Result<Vec<PathBuf>, PipelineError>;
}

/// Filesystem store moving engine outputs into a target directory
#[derive(Debug, Clone)]
pub struct FsAssetStore {
    root: PathBuf,
}

impl FsAssetStore {
    /// Create a store rooted at `root`, creating the directory if needed
    pub fn new(root: PathBuf) -> std::io::Result<Self> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Default root: the user's pictures directory, falling back to the
    /// current directory
    pub fn default_root() -> PathBuf {
        dirs::picture_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("rawburst")
    }

    fn persist_one(&self, base_name: &str, src: &Path) -> Result<Option<PathBuf>, PipelineError> {
        if !src.exists() {
            debug!(path = ?src, "Engine produced no file here, skipping");
            return Ok(None);
        }
        let ext = src.extension().and_then(|e| e.to_str()).unwrap_or("bin");
        let dst = self.root.join(format!("{}.{}", base_name, ext));

        // Rename when the scratch dir shares a filesystem with the root;
        // copy+remove otherwise
        if std::fs::rename(src, &dst).is_err() {
            std::fs::copy(src, &dst)?;
            std::fs::remove_file(src)?;
        }
        Ok(Some(dst))
    }
}

impl AssetStore for FsAssetStore {
    fn persist(
        &self,
        base_name: &str,
        outputs: &OutputPaths,
    ) -> Result<Vec<PathBuf>, PipelineError> {
        let mut persisted = Vec::new();
        for src in outputs.iter() {
            if let Some(dst) = self.persist_one(base_name, src)? {
                persisted.push(dst);
            }
        }
        info!(base_name, count = persisted.len(), "Outputs persisted");
        Ok(persisted)
    }
}

/// Store stand-in that records nothing, for tests and dry runs
#[derive(Debug, Default)]
pub struct NullAssetStore;

impl AssetStore for NullAssetStore {
    fn persist(
        &self,
        base_name: &str,
        _outputs: &OutputPaths,
    ) -> Result<Vec<PathBuf>, PipelineError> {
        debug!(base_name, "Null store discarded outputs");
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_name_marks_bursts() {
        let single = capture_base_name(false);
        let burst = capture_base_name(true);
        assert!(!single.ends_with("_HDRPLUS"));
        assert!(burst.ends_with("_HDRPLUS"));
    }

    #[test]
    fn test_fs_store_moves_existing_outputs() {
        let scratch = std::env::temp_dir().join("rawburst-store-test-scratch");
        let root = std::env::temp_dir().join("rawburst-store-test-root");
        let _ = std::fs::remove_dir_all(&scratch);
        let _ = std::fs::remove_dir_all(&root);
        std::fs::create_dir_all(&scratch).unwrap();

        let tiff = scratch.join("work.tiff");
        std::fs::write(&tiff, b"tiff bytes").unwrap();

        let outputs = OutputPaths {
            tiff: Some(tiff.clone()),
            jpg: Some(scratch.join("missing.jpg")), // Never produced
            dng: None,
        };

        let store = FsAssetStore::new(root.clone()).unwrap();
        let persisted = store.persist("2026-01-01-00-00-00-000", &outputs).unwrap();

        assert_eq!(persisted.len(), 1);
        assert!(persisted[0].ends_with("2026-01-01-00-00-00-000.tiff"));
        assert!(persisted[0].exists());
        assert!(!tiff.exists());

        let _ = std::fs::remove_dir_all(&scratch);
        let _ = std::fs::remove_dir_all(&root);
    }
}
