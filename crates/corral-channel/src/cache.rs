//! On-disk repodata cache at `<cache dir>/<short sha256 of url>/repodata.json`.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use corral_util::errors::CorralError;
use corral_util::hash::short_hash;

const REPODATA_FILE: &str = "repodata.json";

#[derive(Debug, Clone)]
pub struct RepodataCache {
    root: PathBuf,
}

impl RepodataCache {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    /// The root directory of this cache.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Cache file for a repodata URL.
    pub fn path_for(&self, url: &str) -> PathBuf {
        self.root.join(short_hash(url)).join(REPODATA_FILE)
    }

    /// Cached bytes if the entry is younger than `max_age`.
    pub fn get_fresh(&self, url: &str, max_age: Duration) -> Option<Vec<u8>> {
        let path = self.path_for(url);
        let modified = std::fs::metadata(&path).and_then(|m| m.modified()).ok()?;
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO);
        if age > max_age {
            return None;
        }
        std::fs::read(&path).ok()
    }

    /// Cached bytes regardless of age.
    pub fn get_any(&self, url: &str) -> Option<Vec<u8>> {
        std::fs::read(self.path_for(url)).ok()
    }

    /// Store repodata bytes, replacing any previous entry atomically.
    pub fn put(&self, url: &str, data: &[u8]) -> miette::Result<PathBuf> {
        let path = self.path_for(url);
        corral_util::fs::write_atomic(&path, data).map_err(CorralError::Io)?;
        Ok(path)
    }
}
