//! Filesystem layout for a Strata dataset.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use common_error::StrataResult;

use crate::manifest::FragmentId;

static SCRATCH_SEQ: AtomicU64 = AtomicU64::new(0);

/// Manages the filesystem layout of one dataset.
///
/// ```text
/// <root>/
/// ├── data/
/// │   └── <fragment_id>.strata
/// └── _metadata/
///     └── manifest.json
/// ```
#[derive(Debug, Clone)]
pub struct DatasetLayout {
    root: PathBuf,
}

impl DatasetLayout {
    /// Create a layout rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Get the dataset root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the fragment data directory.
    pub fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    /// Get the metadata directory.
    pub fn metadata_dir(&self) -> PathBuf {
        self.root.join("_metadata")
    }

    /// Get the manifest file path.
    pub fn manifest_path(&self) -> PathBuf {
        self.metadata_dir().join("manifest.json")
    }

    /// File name of a committed fragment.
    pub fn fragment_file_name(id: FragmentId) -> String {
        format!("{id:08}.strata")
    }

    /// Path of a committed fragment.
    pub fn fragment_path(&self, id: FragmentId) -> PathBuf {
        self.data_dir().join(Self::fragment_file_name(id))
    }

    /// Path a fragment is written to before its atomic rename into place.
    ///
    /// Unique per call (process id plus a process-wide counter), so racing
    /// writers never share a scratch file even when they target the same
    /// fragment id.
    pub fn scratch_fragment_path(&self) -> PathBuf {
        let seq = SCRATCH_SEQ.fetch_add(1, Ordering::Relaxed);
        self.data_dir()
            .join(format!(".tmp-{}-{seq}.strata", std::process::id()))
    }

    /// Resolve a fragment file name recorded in the manifest.
    pub fn resolve_fragment(&self, file: &str) -> PathBuf {
        self.data_dir().join(file)
    }

    /// Whether a dataset exists here (valid or not) — i.e. a manifest file
    /// is present.
    pub fn exists(&self) -> bool {
        self.manifest_path().exists()
    }

    /// Create the data and metadata directories.
    pub fn create_dirs(&self) -> StrataResult<()> {
        std::fs::create_dir_all(self.data_dir())?;
        std::fs::create_dir_all(self.metadata_dir())?;
        Ok(())
    }
}
