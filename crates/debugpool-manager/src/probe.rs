//! OS process introspection used to validate recorded owners.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use debugpool_core::{PoolSettings, Result};

/// Narrow view of OS process state.
///
/// Every call may cost tens to hundreds of milliseconds, so the pool runs
/// them outside the status lock whenever it can.
pub trait ProcessProbe: Send + Sync {
    /// Identifiers of all debug adapter ports currently present, sorted.
    fn devices(&self) -> Result<Vec<String>>;

    /// Check if a process with this pid exists.
    fn is_alive(&self, pid: u32) -> bool;

    /// Command name of a running process.
    fn command_name(&self, pid: u32) -> Option<String>;

    /// Check if the process holds the device file open.
    fn has_open(&self, pid: u32, device: &str) -> bool;

    /// A process currently holding the device file open, if any.
    fn holder(&self, device: &str) -> Option<u32>;
}

/// [`ProcessProbe`] backed by `kill(2)`, `ps`, `lsof` and `fuser`.
#[derive(Debug, Clone)]
pub struct SystemProbe {
    device_dir: PathBuf,
    device_pattern: String,
}

impl SystemProbe {
    /// Create a probe for devices in `device_dir` whose name contains `device_pattern`.
    pub fn new(device_dir: impl Into<PathBuf>, device_pattern: impl Into<String>) -> Self {
        Self {
            device_dir: device_dir.into(),
            device_pattern: device_pattern.into(),
        }
    }

    /// Create a probe from pool settings.
    pub fn from_settings(settings: &PoolSettings) -> Self {
        Self::new(&settings.device_dir, &settings.device_pattern)
    }

    /// Full path of a device node.
    pub fn device_path(&self, device: &str) -> PathBuf {
        self.device_dir.join(device)
    }

    fn run(program: &str, args: &[&str]) -> Option<String> {
        let output = Command::new(program).args(args).output().ok()?;
        if !output.status.success() {
            debug!("{} {:?} exited with {}", program, args, output.status);
            return None;
        }
        Some(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl ProcessProbe for SystemProbe {
    fn devices(&self) -> Result<Vec<String>> {
        let mut devices = Vec::new();
        for entry in std::fs::read_dir(&self.device_dir)? {
            let name = entry?.file_name().to_string_lossy().to_string();
            if name.contains(&self.device_pattern) {
                devices.push(name);
            }
        }
        devices.sort();
        debug!("Found {} devices in {}", devices.len(), self.device_dir.display());
        Ok(devices)
    }

    #[cfg(unix)]
    fn is_alive(&self, pid: u32) -> bool {
        let pid: libc::pid_t = match pid.try_into() {
            Ok(pid) if pid > 0 => pid,
            _ => return false,
        };
        // SAFETY: signal 0 only performs the existence and permission check.
        if unsafe { libc::kill(pid, 0) } == 0 {
            return true;
        }
        std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }

    #[cfg(not(unix))]
    fn is_alive(&self, pid: u32) -> bool {
        self.command_name(pid).is_some()
    }

    fn command_name(&self, pid: u32) -> Option<String> {
        let stdout = Self::run("ps", &["-p", &pid.to_string(), "-o", "comm="])?;
        let name = stdout.trim();
        // ps may report a full path
        let name = Path::new(name).file_name()?.to_string_lossy().to_string();
        (!name.is_empty()).then_some(name)
    }

    fn has_open(&self, pid: u32, device: &str) -> bool {
        let path = self.device_path(device);
        Self::run("lsof", &["-p", &pid.to_string()])
            .map(|stdout| lists_path(&stdout, path.to_string_lossy().as_ref()))
            .unwrap_or(false)
    }

    fn holder(&self, device: &str) -> Option<u32> {
        let path = self.device_path(device);
        // fuser prints pids on stdout and everything else on stderr
        let stdout = Self::run("fuser", &[path.to_string_lossy().as_ref()])?;
        stdout.split_whitespace().find_map(|token| {
            token
                .trim_end_matches(|c: char| !c.is_ascii_digit())
                .parse()
                .ok()
        })
    }
}

/// Check if any `lsof` line names exactly `path` in its NAME column.
fn lists_path(lsof_output: &str, path: &str) -> bool {
    lsof_output
        .lines()
        .any(|line| line.split_whitespace().last() == Some(path))
}
