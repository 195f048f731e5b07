//! Configuration types for debugpool.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Top-level configuration loaded from a YAML file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Device pool settings
    pub pool: PoolSettings,
    /// External debugger settings
    pub debugger: DebuggerSettings,
    /// Logging settings
    pub logging: LoggingSettings,
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config =
            serde_yaml::from_str(yaml).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.pool.device_pattern.trim().is_empty() {
            return Err(Error::Config("pool.device_pattern cannot be empty".to_string()));
        }
        if self.debugger.program.trim().is_empty() {
            return Err(Error::Config("debugger.program cannot be empty".to_string()));
        }
        if self.debugger.prompt.is_empty() {
            return Err(Error::Config("debugger.prompt cannot be empty".to_string()));
        }
        if self.debugger.running_banner.is_empty() {
            return Err(Error::Config(
                "debugger.running_banner cannot be empty".to_string(),
            ));
        }
        // A pass-through exit would end the debugger behind the session's back.
        if !self.debugger.is_blacklisted(&self.debugger.exit_command) {
            return Err(Error::Config(format!(
                "debugger.command_blacklist must contain the exit command '{}'",
                self.debugger.exit_command
            )));
        }
        if self.logging.error_window == 0 {
            return Err(Error::Config("logging.error_window must be > 0".to_string()));
        }
        Ok(())
    }

    /// Path of the persisted status file.
    pub fn status_path(&self) -> PathBuf {
        self.pool.state_dir.join(&self.pool.status_file)
    }

    /// Directory holding per-device session logs.
    pub fn log_dir(&self) -> PathBuf {
        self.logging
            .log_dir
            .clone()
            .unwrap_or_else(|| self.pool.state_dir.join("logs"))
    }
}

/// Device pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Directory holding the status file (and logs, unless overridden)
    pub state_dir: PathBuf,
    /// Name of the status file inside `state_dir`
    pub status_file: String,
    /// Directory where device nodes live
    pub device_dir: PathBuf,
    /// Substring identifying debug adapter ports in `device_dir`
    pub device_pattern: String,
    /// Command name of processes that claim devices on their own behalf
    pub client_process_name: String,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            status_file: "status.json".to_string(),
            device_dir: PathBuf::from("/dev"),
            device_pattern: "ttyACM".to_string(),
            client_process_name: "debugpool".to_string(),
        }
    }
}

#[cfg(unix)]
fn default_state_dir() -> PathBuf {
    // SAFETY: getuid has no preconditions and cannot fail.
    let uid = unsafe { libc::getuid() };
    std::env::temp_dir().join(format!("debugpool-{uid}"))
}

#[cfg(not(unix))]
fn default_state_dir() -> PathBuf {
    std::env::temp_dir().join("debugpool")
}

/// External debugger settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebuggerSettings {
    /// Debugger executable
    pub program: String,
    /// Adapter driver passed ahead of the device argument (empty = none)
    pub driver: String,
    /// Prompt printed when the debugger is ready for a command
    pub prompt: String,
    /// Banner printed once the target is running freely
    pub running_banner: String,
    /// Command that ends the debugger
    pub exit_command: String,
    /// Commands never passed through to the debugger
    pub command_blacklist: BTreeSet<String>,
    /// Error codes after which a device is marked permanently bad
    pub fatal_error_codes: BTreeSet<u32>,
}

impl Default for DebuggerSettings {
    fn default() -> Self {
        Self {
            program: "mspdebug".to_string(),
            driver: "tilib".to_string(),
            prompt: "(mspdebug) ".to_string(),
            running_banner: "Running. Press Ctrl+C to interrupt...".to_string(),
            exit_command: "exit".to_string(),
            command_blacklist: ["alias", "blow_jtag_fuse", "exit", "run"]
                .into_iter()
                .map(String::from)
                .collect(),
            fatal_error_codes: [57].into_iter().collect(),
        }
    }
}

impl DebuggerSettings {
    /// Check if a command word is blacklisted.
    pub fn is_blacklisted(&self, command: &str) -> bool {
        self.command_blacklist.contains(command)
    }

    /// Check if an error code means the adapter behind a port is unusable.
    pub fn is_fatal(&self, code: u32) -> bool {
        self.fatal_error_codes.contains(&code)
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Session log directory (defaults to `<state_dir>/logs`)
    pub log_dir: Option<PathBuf>,
    /// Bytes at the end of a session log searched for an error code
    pub error_window: u64,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: None,
            error_window: 1024,
        }
    }
}
