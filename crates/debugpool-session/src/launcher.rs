//! Starting a debugger process on a device.

use debugpool_core::{DebuggerChannel, DebuggerSettings, Result};
use debugpool_pty::PtyChannel;

use crate::log::LogSink;

/// Starts a debugger attached to one device.
pub trait Launcher: Send + Sync {
    /// Spawn the debugger for `device`, teeing its output into `transcript`.
    fn launch(&self, device: &str, transcript: LogSink) -> Result<Box<dyn DebuggerChannel>>;
}

/// Runs the configured debugger program under a pseudo-terminal.
#[derive(Debug, Clone)]
pub struct PtyLauncher {
    program: String,
    driver: String,
}

impl PtyLauncher {
    /// Launcher for `program` using the given driver name.
    pub fn new(program: impl Into<String>, driver: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            driver: driver.into(),
        }
    }

    /// Launcher for the debugger named in the settings.
    pub fn from_settings(settings: &DebuggerSettings) -> Self {
        Self::new(&settings.program, &settings.driver)
    }

    /// Command line arguments for a device: `<driver> -d <device>`.
    pub fn args(&self, device: &str) -> Vec<String> {
        vec![self.driver.clone(), "-d".to_string(), device.to_string()]
    }
}

impl Launcher for PtyLauncher {
    fn launch(&self, device: &str, transcript: LogSink) -> Result<Box<dyn DebuggerChannel>> {
        let channel = PtyChannel::spawn(&self.program, &self.args(device), Some(transcript.into()))?;
        Ok(Box::new(channel))
    }
}
