//! A live debugger session on a claimed device.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use debugpool_core::{DebuggerChannel, DebuggerSettings, Error, Result};
use debugpool_manager::DevicePool;

use crate::commands;
use crate::log::SessionLog;

/// Where the debugger is in its request/response cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Prompt shown, accepting commands.
    Ready,
    /// Target running; only an interrupt is accepted.
    Running,
    /// Debugger exited and the device was released.
    Terminated,
}

/// A debugger process attached to one device.
///
/// Created by [`crate::SessionDriver::start_session`]. End it with
/// [`Session::end`]; a session that is dropped while the debugger is still
/// up leaves the device claimed until the next check or refresh.
pub struct Session {
    device: String,
    channel: Box<dyn DebuggerChannel>,
    log: Option<SessionLog>,
    pool: Arc<DevicePool>,
    settings: Arc<DebuggerSettings>,
    state: SessionState,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("device", &self.device)
            .field("pid", &self.channel.pid())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub(crate) fn new(
        device: String,
        channel: Box<dyn DebuggerChannel>,
        log: SessionLog,
        pool: Arc<DevicePool>,
        settings: Arc<DebuggerSettings>,
    ) -> Self {
        Self {
            device,
            channel,
            log: Some(log),
            pool,
            settings,
            state: SessionState::Ready,
        }
    }

    /// Device this session runs on.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Pid of the debugger process.
    pub fn pid(&self) -> Option<u32> {
        self.channel.pid()
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Path of the device log, until the session ends.
    pub fn log_path(&self) -> Option<&Path> {
        self.log.as_ref().map(SessionLog::path)
    }

    /// Send a command and return everything printed before the next prompt.
    ///
    /// Commands whose first word is blacklisted are refused without touching
    /// the debugger.
    pub fn run_command(&mut self, text: &str) -> Result<String> {
        let text = text.trim();
        let command = text
            .split_whitespace()
            .next()
            .ok_or_else(|| Error::InvalidInput("empty command".to_string()))?;

        if self.settings.is_blacklisted(command) {
            warn!("Refused blacklisted command {:?} on {}", command, self.device);
            return Err(Error::CommandNotAllowed(command.to_string()));
        }
        self.require(SessionState::Ready, command)?;

        debug!("{} <- {}", self.device, text);
        self.channel.send_line(text)?;
        self.await_prompt()
    }

    /// Let the target run freely until [`interrupt`](Self::interrupt).
    ///
    /// Returns the output printed before the running banner.
    pub fn run_continue(&mut self) -> Result<String> {
        self.require(SessionState::Ready, commands::RUN)?;

        self.channel.send_line(commands::RUN)?;
        match self.channel.expect(&self.settings.running_banner) {
            Ok(output) => {
                self.state = SessionState::Running;
                info!("Target on {} running", self.device);
                Ok(output)
            }
            Err(e) => Err(self.lost(e)),
        }
    }

    /// Stop a running target; returns the output up to the prompt.
    pub fn interrupt(&mut self) -> Result<String> {
        self.require(SessionState::Running, "interrupt")?;

        self.channel.interrupt()?;
        let output = self.await_prompt()?;
        self.state = SessionState::Ready;
        info!("Target on {} interrupted", self.device);
        Ok(output)
    }

    /// Exit the debugger and return the device to the pool.
    ///
    /// The device is released only once the debugger's output stream closes.
    /// If the prompt comes back instead, the exit was refused and the device
    /// stays claimed.
    pub fn end(&mut self) -> Result<()> {
        match self.state {
            SessionState::Terminated => return Ok(()),
            SessionState::Running => {
                self.interrupt()?;
            }
            SessionState::Ready => {}
        }

        self.channel.send_line(&self.settings.exit_command)?;
        match self.channel.expect(&self.settings.prompt) {
            Err(Error::EndOfStream) => {
                self.terminate()?;
                info!("Session on {} ended", self.device);
                Ok(())
            }
            Ok(_) => {
                error!("Debugger on {} did not exit; device stays claimed", self.device);
                Err(Error::ExitNotConfirmed(self.device.clone()))
            }
            Err(e) => Err(e),
        }
    }

    fn require(&self, state: SessionState, what: &str) -> Result<()> {
        if self.state == state {
            return Ok(());
        }
        Err(Error::InvalidState(format!(
            "{} needs a {:?} session, {} is {:?}",
            what, state, self.device, self.state
        )))
    }

    fn await_prompt(&mut self) -> Result<String> {
        match self.channel.expect(&self.settings.prompt) {
            Ok(output) => Ok(output),
            Err(e) => Err(self.lost(e)),
        }
    }

    /// The debugger closed its output mid-session: it is gone, so is the claim.
    fn lost(&mut self, e: Error) -> Error {
        if matches!(e, Error::EndOfStream) {
            error!("Debugger on {} exited unexpectedly", self.device);
            if let Err(release) = self.terminate() {
                warn!("Cleanup of {} failed: {}", self.device, release);
            }
        }
        e
    }

    fn terminate(&mut self) -> Result<()> {
        if let Err(e) = self.channel.wait() {
            warn!("Waiting for debugger on {}: {}", self.device, e);
        }
        self.state = SessionState::Terminated;
        self.pool.release(&self.device)?;
        if let Some(log) = self.log.take() {
            log.close()?;
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.state != SessionState::Terminated {
            warn!(
                "Session on {} dropped without ending; device stays claimed until the next check",
                self.device
            );
        }
    }
}
