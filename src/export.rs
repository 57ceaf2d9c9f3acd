//! Timestamp-named JSON dumps of the dependency graph.

use chrono::Utc;
use std::path::{Path, PathBuf};
use crate::config::SnapshotConfig;
use crate::graph::{Graph, GraphSnapshot};
use crate::Result;

/// Writes graph snapshots to `<dir>/<unix-epoch-seconds>.json`.
///
/// The directory must already exist. Two exports within the same second
/// overwrite each other.
#[derive(Debug, Clone)]
pub struct Exporter {
    dir: PathBuf,
}

impl Exporter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn from_config(config: &SnapshotConfig) -> Self {
        Self::new(config.resolve_export_dir())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, timestamp: i64) -> PathBuf {
        self.dir.join(format!("{}.json", timestamp))
    }

    pub fn export(&self, snapshot: &GraphSnapshot) -> Result<PathBuf> {
        let content = serde_json::to_vec(snapshot)?;
        let path = self.path_for(Utc::now().timestamp());
        std::fs::write(&path, content)?;
        Ok(path)
    }

    /// Flatten under the graph's read lock, then write with the lock released.
    pub fn export_graph(&self, graph: &Graph) -> Result<PathBuf> {
        let snapshot = graph.snapshot();
        self.export(&snapshot)
    }
}
