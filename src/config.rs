use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use crate::network::NodePopulation;
use crate::{MonitorError, Result};

/// Environment variable that overrides the default export directory.
pub const EXPORT_DIR_ENV: &str = "exportURL";

/// Export directory used when neither the config nor the environment names one.
pub const DEFAULT_EXPORT_DIR: &str = "export";

pub const DEFAULT_INTERVAL_SECS: u64 = 30;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub snapshot: SnapshotConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub interface: String,
    pub promiscuous: bool,
    /// Log every accepted edge at observation time.
    pub verbose: bool,
    pub node_population: NodePopulation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub interval_secs: u64,
    pub export_enabled: bool,
    pub export_dir: Option<PathBuf>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interface: String::new(),
            promiscuous: true,
            verbose: false,
            node_population: NodePopulation::default(),
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_INTERVAL_SECS,
            export_enabled: false,
            export_dir: None,
        }
    }
}

impl SnapshotConfig {
    /// Explicit directory first, then `exportURL` from the environment, then `export`.
    pub fn resolve_export_dir(&self) -> PathBuf {
        if let Some(ref dir) = self.export_dir {
            return dir.clone();
        }

        match std::env::var(EXPORT_DIR_ENV) {
            Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => PathBuf::from(DEFAULT_EXPORT_DIR),
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.capture.interface.trim().is_empty() {
            return Err(MonitorError::Config("interface not provided".to_string()));
        }

        if self.snapshot.interval_secs == 0 {
            return Err(MonitorError::Config(
                "snapshot interval must be at least one second".to_string(),
            ));
        }

        Ok(())
    }
}
