use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Ten minutes, the historical wait for the owner thread to come up.
pub const DEFAULT_STARTUP_TIMEOUT_MS: u64 = 600_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read engine config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse engine config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Tunables for the owner thread and the call protocol. Durations are kept
/// in milliseconds so the JSON form stays readable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Per-call timeout; `None` waits forever.
    pub call_timeout_ms: Option<u64>,
    pub startup_timeout_ms: u64,
    /// Time handed to the native event pump on every loop iteration.
    pub pump_slice_ms: u64,
    /// How long the owner thread waits for a request before pumping again.
    pub poll_interval_ms: u64,
    pub thread_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            call_timeout_ms: None,
            startup_timeout_ms: DEFAULT_STARTUP_TIMEOUT_MS,
            pump_slice_ms: 0,
            poll_interval_ms: 10,
            thread_name: "viz_owner".to_string(),
        }
    }
}

impl EngineConfig {
    /// Loads a config file, falling back to defaults when no path is given
    /// or the file does not exist yet.
    pub fn from_json_file(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn pump_slice(&self) -> Duration {
        Duration::from_millis(self.pump_slice_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let config = EngineConfig::from_json_file(Some(Path::new("does/not/exist.json")))
            .expect("defaults");
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.call_timeout(), None);
        assert_eq!(config.startup_timeout(), Duration::from_secs(600));
    }

    #[test]
    fn partial_json_overrides_selected_fields() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, r#"{{ "call_timeout_ms": 250, "thread_name": "viz_test" }}"#)
            .expect("write config");
        let config = EngineConfig::from_json_file(Some(file.path())).expect("parse");
        assert_eq!(config.call_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.thread_name, "viz_test");
        assert_eq!(config.poll_interval_ms, 10);
    }

    #[test]
    fn malformed_json_reports_path() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, "{{ not json").expect("write config");
        let err = EngineConfig::from_json_file(Some(file.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("failed to parse engine config"));
    }
}
