//! Starting sessions on pooled devices.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, warn};

use debugpool_core::{Config, DebuggerChannel, DebuggerSettings, Error, Result};
use debugpool_manager::DevicePool;

use crate::launcher::Launcher;
use crate::log::SessionLog;
use crate::session::Session;

/// Progress of a single start attempt.
enum StartPhase {
    /// Nothing claimed yet.
    Unallocated,
    /// Device claimed for this process, debugger not started.
    Claimed(String),
    /// Debugger started, prompt not yet seen.
    Spawned {
        device: String,
        log: SessionLog,
        channel: Box<dyn DebuggerChannel>,
    },
    /// Debugger exited before showing its prompt.
    ExitedEarly { device: String, log: SessionLog },
}

/// Opens debugger sessions on devices taken from a [`DevicePool`].
pub struct SessionDriver {
    pool: Arc<DevicePool>,
    launcher: Arc<dyn Launcher>,
    settings: Arc<DebuggerSettings>,
    log_dir: PathBuf,
    error_window: u64,
}

impl std::fmt::Debug for SessionDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionDriver")
            .field("log_dir", &self.log_dir)
            .field("error_window", &self.error_window)
            .finish_non_exhaustive()
    }
}

impl SessionDriver {
    /// Create a driver using the debugger and logging settings from `config`.
    pub fn new(pool: Arc<DevicePool>, launcher: Arc<dyn Launcher>, config: &Config) -> Self {
        Self {
            pool,
            launcher,
            settings: Arc::new(config.debugger.clone()),
            log_dir: config.log_dir(),
            error_window: config.logging.error_window,
        }
    }

    /// The pool sessions are drawn from.
    pub fn pool(&self) -> &Arc<DevicePool> {
        &self.pool
    }

    /// Claim a device and bring a debugger up on it.
    ///
    /// A debugger that exits before its prompt has its device marked bad when
    /// the reported code is fatal, or released otherwise, and the next device
    /// is tried. Each device is tried at most once per call, so the loop ends
    /// with [`Error::NoDeviceAvailable`] once the pool is exhausted.
    pub fn start_session(&self) -> Result<Session> {
        let mut tried = HashSet::new();
        let mut phase = StartPhase::Unallocated;

        loop {
            phase = match phase {
                StartPhase::Unallocated => {
                    StartPhase::Claimed(self.pool.acquire_excluding(&tried)?)
                }

                StartPhase::Claimed(device) => {
                    tried.insert(device.clone());
                    match self.spawn(&device) {
                        Ok((log, channel)) => StartPhase::Spawned {
                            device,
                            log,
                            channel,
                        },
                        Err(e) => {
                            error!("Failed to start debugger on {}: {}", device, e);
                            self.give_back(&device);
                            return Err(e);
                        }
                    }
                }

                StartPhase::Spawned {
                    device,
                    log,
                    mut channel,
                } => match channel.expect(&self.settings.prompt) {
                    Ok(_) => {
                        let pid = channel.pid().unwrap_or_else(|| self.pool.claimant());
                        if let Err(e) = self.pool.confirm(&device, pid) {
                            error!("Failed to confirm {} for pid {}: {}", device, pid, e);
                            self.abandon(&device, channel);
                            return Err(e);
                        }
                        info!("Session ready on {} (pid {})", device, pid);
                        return Ok(Session::new(
                            device,
                            channel,
                            log,
                            Arc::clone(&self.pool),
                            Arc::clone(&self.settings),
                        ));
                    }
                    Err(Error::EndOfStream) => {
                        if let Err(e) = channel.wait() {
                            warn!("Waiting for debugger on {}: {}", device, e);
                        }
                        StartPhase::ExitedEarly { device, log }
                    }
                    Err(e) => {
                        error!("Debugger on {} failed before its prompt: {}", device, e);
                        self.abandon(&device, channel);
                        return Err(e);
                    }
                },

                StartPhase::ExitedEarly { device, log } => {
                    let code = log.error_code(self.error_window).unwrap_or_else(|e| {
                        warn!("Could not read log for {}: {}", device, e);
                        None
                    });
                    if let Err(e) = log.close() {
                        warn!("Closing log for {}: {}", device, e);
                    }

                    match code {
                        Some(code) if self.settings.is_fatal(code) => {
                            warn!("Debugger on {} exited with fatal code {}", device, code);
                            self.pool.mark_bad(&device)?;
                        }
                        _ => {
                            warn!("Debugger on {} exited early (code {:?})", device, code);
                            self.pool.release(&device)?;
                        }
                    }
                    StartPhase::Unallocated
                }
            };
        }
    }

    fn spawn(&self, device: &str) -> Result<(SessionLog, Box<dyn DebuggerChannel>)> {
        let log = SessionLog::open(&self.log_dir, device)?;
        let channel = self.launcher.launch(device, log.sink())?;
        Ok((log, channel))
    }

    /// Stop a debugger that is still up, then release its device.
    ///
    /// The claim is kept if the process cannot be reaped.
    fn abandon(&self, device: &str, mut channel: Box<dyn DebuggerChannel>) {
        if let Err(e) = channel.kill() {
            warn!("Killing debugger on {}: {}", device, e);
        }
        match channel.wait() {
            Ok(()) => self.give_back(device),
            Err(e) => warn!("Debugger on {} not reaped, keeping claim: {}", device, e),
        }
    }

    /// Release a claim on the way out of a failed start.
    fn give_back(&self, device: &str) {
        if let Err(e) = self.pool.release(device) {
            warn!("Failed to release {} after failed start: {}", device, e);
        }
    }
}
