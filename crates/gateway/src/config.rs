//! Gateway configuration (`orchid.toml`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use orchid_domain::{Error, Result};
use orchid_store::RecorderMode;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub session: SessionSection,
    pub recording: RecordingSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address, e.g. `127.0.0.1:7433`.
    pub bind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root for recordings and replay entries.
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// Whether gateway sessions accept HITL prompts.
    pub interactive: bool,
    /// Workflow budget in seconds. 0 disables the timeout.
    pub run_timeout_secs: u64,
    /// Default prompt timeout in seconds. 0 means no default.
    pub prompt_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingSection {
    /// Record, replay, or disabled.
    pub mode: RecorderMode,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:7433".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
        }
    }
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            interactive: true,
            run_timeout_secs: 60,
            prompt_timeout_secs: 0,
        }
    }
}

impl Default for RecordingSection {
    fn default() -> Self {
        Self {
            mode: RecorderMode::Record,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            session: SessionSection::default(),
            recording: RecordingSection::default(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Config {
    /// Load from an explicit path, `./orchid.toml` when present, or
    /// defaults.
    pub fn load(path: Option<&Path>) -> Result<(Config, Option<PathBuf>)> {
        let candidate = match path {
            Some(p) => Some(p.to_path_buf()),
            None => {
                let default = PathBuf::from("orchid.toml");
                default.exists().then_some(default)
            }
        };
        match candidate {
            Some(p) => {
                let raw = std::fs::read_to_string(&p)?;
                let config: Config = toml::from_str(&raw)
                    .map_err(|e| Error::Usage(format!("config {}: {e}", p.display())))?;
                Ok((config, Some(p)))
            }
            None => Ok((Config::default(), None)),
        }
    }

    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        if self.server.bind.parse::<std::net::SocketAddr>().is_err() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: format!("server.bind `{}` is not a socket address", self.server.bind),
            });
        }
        if self.storage.data_dir.as_os_str().is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "storage.data_dir is empty".into(),
            });
        }
        if self.session.run_timeout_secs == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: "session.run_timeout_secs is 0 — workflows run unbounded".into(),
            });
        }
        if self.recording.mode == RecorderMode::Replay {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: "recording.mode is replay — live providers will not be called".into(),
            });
        }
        issues
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        (self.session.run_timeout_secs > 0)
            .then(|| Duration::from_secs(self.session.run_timeout_secs))
    }

    pub fn prompt_timeout(&self) -> Option<Duration> {
        (self.session.prompt_timeout_secs > 0)
            .then(|| Duration::from_secs(self.session.prompt_timeout_secs))
    }
}
