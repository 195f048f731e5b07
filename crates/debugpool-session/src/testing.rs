//! Testing utilities for debugpool.
//!
//! A [`Launcher`] whose debuggers follow a per-device script instead of
//! running a real program.

use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::sync::{Arc, Mutex};

use debugpool_core::{DebuggerChannel, Error, Result};

use crate::launcher::Launcher;
use crate::log::LogSink;

/// First pid handed out by [`ScriptedLauncher`]; later launches count up.
pub const FIRST_PID: u32 = 4000;

/// One answer to an `expect` call.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Output, followed by whatever marker was awaited.
    Output(&'static str),
    /// Stream closed.
    Eof,
    /// Read failed while the process stays up.
    Fail,
}

/// How the debugger on one device behaves.
#[derive(Debug, Clone)]
pub enum Script {
    /// Print the text and exit without a prompt.
    ExitEarly(&'static str),
    /// Show the prompt, then answer with these replies.
    Prompt(Vec<Reply>),
    /// Start, then fail to read before any prompt.
    BrokenStream,
    /// The program cannot be started.
    SpawnFails,
}

#[derive(Debug, Default)]
struct Wire {
    sent: Vec<String>,
    awaited: Vec<String>,
    interrupts: usize,
    kills: usize,
    waits: usize,
}

struct ScriptedChannel {
    pid: u32,
    replies: VecDeque<Reply>,
    wire: Arc<Mutex<Wire>>,
}

impl DebuggerChannel for ScriptedChannel {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn send_line(&mut self, line: &str) -> Result<()> {
        self.wire.lock().unwrap().sent.push(line.to_string());
        Ok(())
    }

    fn expect(&mut self, marker: &str) -> Result<String> {
        self.wire.lock().unwrap().awaited.push(marker.to_string());
        match self.replies.pop_front() {
            Some(Reply::Output(text)) => Ok(text.to_string()),
            Some(Reply::Fail) => Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "bad file descriptor",
            ))),
            Some(Reply::Eof) | None => Err(Error::EndOfStream),
        }
    }

    fn interrupt(&mut self) -> Result<()> {
        self.wire.lock().unwrap().interrupts += 1;
        Ok(())
    }

    fn kill(&mut self) -> Result<()> {
        self.wire.lock().unwrap().kills += 1;
        Ok(())
    }

    fn wait(&mut self) -> Result<()> {
        self.wire.lock().unwrap().waits += 1;
        Ok(())
    }
}

/// Scripted [`Launcher`].
///
/// Devices without a script fail to spawn. Everything sent to any launched
/// debugger is recorded on one shared wire.
#[derive(Default)]
pub struct ScriptedLauncher {
    scripts: HashMap<String, Script>,
    launched: Mutex<Vec<String>>,
    wire: Arc<Mutex<Wire>>,
}

impl ScriptedLauncher {
    /// Create a launcher following `scripts`.
    pub fn new<'a>(scripts: impl IntoIterator<Item = (&'a str, Script)>) -> Self {
        Self {
            scripts: scripts
                .into_iter()
                .map(|(device, script)| (device.to_string(), script))
                .collect(),
            ..Default::default()
        }
    }

    /// Devices launched so far, in order.
    pub fn launched(&self) -> Vec<String> {
        self.launched.lock().unwrap().clone()
    }

    /// Lines sent to debuggers.
    pub fn sent(&self) -> Vec<String> {
        self.wire.lock().unwrap().sent.clone()
    }

    /// Markers waited for.
    pub fn awaited(&self) -> Vec<String> {
        self.wire.lock().unwrap().awaited.clone()
    }

    /// Interrupts delivered.
    pub fn interrupts(&self) -> usize {
        self.wire.lock().unwrap().interrupts
    }

    /// Times a debugger was killed.
    pub fn kills(&self) -> usize {
        self.wire.lock().unwrap().kills
    }

    /// Times a debugger was waited on.
    pub fn waits(&self) -> usize {
        self.wire.lock().unwrap().waits
    }
}

impl Launcher for ScriptedLauncher {
    fn launch(&self, device: &str, mut transcript: LogSink) -> Result<Box<dyn DebuggerChannel>> {
        let pid = {
            let mut launched = self.launched.lock().unwrap();
            launched.push(device.to_string());
            FIRST_PID + launched.len() as u32 - 1
        };

        let replies = match self.scripts.get(device).cloned() {
            Some(Script::ExitEarly(text)) => {
                transcript.write_all(text.as_bytes())?;
                VecDeque::new()
            }
            Some(Script::Prompt(replies)) => std::iter::once(Reply::Output("MSP430 ready\n"))
                .chain(replies)
                .collect(),
            Some(Script::BrokenStream) => VecDeque::from([Reply::Fail]),
            Some(Script::SpawnFails) | None => {
                return Err(Error::PtyError(format!(
                    "cannot start debugger on {device}"
                )))
            }
        };

        Ok(Box::new(ScriptedChannel {
            pid,
            replies,
            wire: Arc::clone(&self.wire),
        }))
    }
}
