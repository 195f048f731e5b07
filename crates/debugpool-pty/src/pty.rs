//! PTY (Pseudo-Terminal) handling with portable-pty.

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use std::io::{Read, Write};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use debugpool_core::{DebuggerChannel, Error, Result};

/// Delay between polls of the non-blocking master.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Interrupt character delivered by [`PtyChannel::interrupt`].
const CTRL_C: u8 = 0x03;

/// Debugger process running under a PTY.
pub struct PtyChannel {
    /// Command that was spawned
    program: String,
    /// The master PTY end; keeps the terminal open
    _master: Box<dyn MasterPty + Send>,
    /// The child process
    child: Box<dyn Child + Send + Sync>,
    /// PTY writer
    writer: Box<dyn Write + Send>,
    /// PTY reader (non-blocking)
    reader: Box<dyn Read + Send>,
    /// Output received but not yet returned by `expect`
    pending: Vec<u8>,
    /// Last line sent, expected back as terminal echo
    echo: Option<String>,
    /// Copy of everything sent and received
    transcript: Option<Box<dyn Write + Send>>,
    /// Set once the child side of the PTY is closed
    eof: bool,
}

impl std::fmt::Debug for PtyChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyChannel")
            .field("program", &self.program)
            .field("pid", &self.child.process_id())
            .field("eof", &self.eof)
            .finish_non_exhaustive()
    }
}

impl PtyChannel {
    /// Spawn `program` under a new PTY.
    ///
    /// Everything written to or read from the PTY is also written to
    /// `transcript`, when given.
    pub fn spawn(
        program: &str,
        args: &[String],
        transcript: Option<Box<dyn Write + Send>>,
    ) -> Result<Self> {
        info!("Spawning PTY: program='{}' args={:?}", program, args);

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: 24,
                cols: 80,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| {
                error!("Failed to open PTY: {}", e);
                Error::PtyError(format!("Failed to open PTY: {e}"))
            })?;

        let mut cmd = CommandBuilder::new(program);
        for arg in args {
            cmd.arg(arg);
        }

        let child = pair.slave.spawn_command(cmd).map_err(|e| {
            error!("Failed to spawn command '{}': {}", program, e);
            Error::PtyError(format!("Failed to spawn command: {e}"))
        })?;
        // Only the child may hold the slave, so its exit closes the stream.
        drop(pair.slave);

        let writer = pair.master.take_writer().map_err(|e| {
            error!("Failed to take PTY writer: {}", e);
            Error::PtyError(format!("Failed to take writer: {e}"))
        })?;

        let reader = pair.master.try_clone_reader().map_err(|e| {
            error!("Failed to clone PTY reader: {}", e);
            Error::PtyError(format!("Failed to clone reader: {e}"))
        })?;

        // Non-blocking reads let `expect` poll without a reader thread
        #[cfg(unix)]
        {
            if let Some(master_fd) = pair.master.as_raw_fd() {
                // SAFETY: master_fd is a valid descriptor owned by pair.master,
                // which outlives these calls.
                let result = unsafe {
                    let flags = libc::fcntl(master_fd, libc::F_GETFL, 0);
                    if flags == -1 {
                        -1
                    } else {
                        libc::fcntl(master_fd, libc::F_SETFL, flags | libc::O_NONBLOCK)
                    }
                };
                if result == -1 {
                    error!("Failed to set master PTY to non-blocking mode");
                    return Err(Error::PtyError(
                        "Failed to set master PTY to non-blocking mode".to_string(),
                    ));
                }
                debug!("Set master PTY FD {} to non-blocking mode", master_fd);
            }
        }

        info!(
            "PTY spawned successfully: program='{}' pid={:?}",
            program,
            child.process_id()
        );

        Ok(Self {
            program: program.to_string(),
            _master: pair.master,
            child,
            writer,
            reader,
            pending: Vec::new(),
            echo: None,
            transcript,
            eof: false,
        })
    }

    /// Check if the child process is still running.
    pub fn is_alive(&mut self) -> bool {
        self.child.try_wait().ok().flatten().is_none()
    }

    /// Read whatever output is available without blocking.
    fn read_available(&mut self) -> Result<usize> {
        let mut buffer = [0u8; 4096];
        match self.reader.read(&mut buffer) {
            Ok(0) => {
                self.eof = true;
                Ok(0)
            }
            Ok(n) => {
                debug!("Read {} bytes from PTY", n);
                self.record(&buffer[..n]);
                self.pending.extend_from_slice(&buffer[..n]);
                Ok(n)
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => Ok(0),
            // Linux reports EIO on the master once the slave side is gone.
            #[cfg(unix)]
            Err(e) if e.raw_os_error() == Some(libc::EIO) => {
                self.eof = true;
                Ok(0)
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        debug!("Writing {} bytes to PTY", data.len());
        self.record(data);
        self.writer.write_all(data)?;
        self.writer.flush()?;
        Ok(())
    }

    fn record(&mut self, data: &[u8]) {
        if let Some(transcript) = self.transcript.as_mut() {
            if let Err(e) = transcript.write_all(data).and_then(|_| transcript.flush()) {
                warn!("Failed to write session transcript: {}", e);
            }
        }
    }

    /// Normalize line endings and drop the echoed command line.
    fn clean(&mut self, raw: &[u8]) -> String {
        let text = String::from_utf8_lossy(raw).replace("\r\n", "\n");
        match self.echo.take() {
            Some(echo) => match text.strip_prefix(echo.as_str()) {
                Some(rest) => rest.strip_prefix('\n').unwrap_or(rest).to_string(),
                None => text,
            },
            None => text,
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

impl DebuggerChannel for PtyChannel {
    fn pid(&self) -> Option<u32> {
        self.child.process_id()
    }

    fn send_line(&mut self, line: &str) -> Result<()> {
        self.echo = Some(line.to_string());
        self.write_bytes(format!("{line}\n").as_bytes())
    }

    fn expect(&mut self, marker: &str) -> Result<String> {
        loop {
            if let Some(pos) = find(&self.pending, marker.as_bytes()) {
                let rest = self.pending.split_off(pos + marker.len());
                let matched = std::mem::replace(&mut self.pending, rest);
                return Ok(self.clean(&matched[..pos]));
            }
            if self.eof {
                debug!(
                    "PTY closed before {:?}: program='{}'",
                    marker, self.program
                );
                return Err(Error::EndOfStream);
            }
            if self.read_available()? == 0 && !self.eof {
                std::thread::sleep(POLL_INTERVAL);
            }
        }
    }

    fn interrupt(&mut self) -> Result<()> {
        debug!("Sending interrupt to PTY: program='{}'", self.program);
        self.echo = None;
        self.write_bytes(&[CTRL_C])
    }

    fn kill(&mut self) -> Result<()> {
        info!("Killing PTY process: program='{}'", self.program);
        self.child
            .kill()
            .map_err(|e| Error::PtyError(format!("Kill failed: {e}")))
    }

    fn wait(&mut self) -> Result<()> {
        self.child
            .wait()
            .map(|_| ())
            .map_err(|e| Error::PtyError(format!("Wait failed: {e}")))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    const PROMPT: &str = "ready> ";

    /// Shell pretending to be a debugger: prompt, echo a reply, prompt again.
    fn fake_debugger() -> PtyChannel {
        let script = format!(
            "printf '{PROMPT}'; while read line; do \
             [ \"$line\" = exit ] && exit 0; \
             echo \"got $line\"; printf '{PROMPT}'; done"
        );
        PtyChannel::spawn("sh", &["-c".to_string(), script], None).unwrap()
    }

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_find() {
        assert_eq!(find(b"abc(mspdebug) ", b"(mspdebug) "), Some(3));
        assert_eq!(find(b"abc", b"abcd"), None);
    }

    #[test]
    fn test_pty_spawn() {
        let mut pty = fake_debugger();
        assert!(pty.pid().is_some());
        assert!(pty.is_alive());
        pty.kill().unwrap();
    }

    #[test]
    fn test_kill_then_wait_reaps_child() {
        let mut pty = fake_debugger();
        pty.expect(PROMPT).unwrap();
        pty.kill().unwrap();
        pty.wait().unwrap();
        assert!(!pty.is_alive());
        assert!(matches!(pty.expect(PROMPT), Err(Error::EndOfStream)));
    }

    #[test]
    fn test_request_response() {
        let mut pty = fake_debugger();
        assert_eq!(pty.expect(PROMPT).unwrap(), "");

        pty.send_line("regs").unwrap();
        assert_eq!(pty.expect(PROMPT).unwrap(), "got regs\n");

        pty.send_line("md 0x2400 4").unwrap();
        assert_eq!(pty.expect(PROMPT).unwrap(), "got md 0x2400 4\n");

        pty.kill().unwrap();
    }

    #[test]
    fn test_end_of_stream_after_exit() {
        let mut pty = fake_debugger();
        pty.expect(PROMPT).unwrap();
        pty.send_line("exit").unwrap();
        assert!(matches!(pty.expect(PROMPT), Err(Error::EndOfStream)));
        pty.wait().unwrap();
        assert!(!pty.is_alive());
    }

    #[test]
    fn test_early_exit_is_end_of_stream() {
        let mut pty = PtyChannel::spawn(
            "sh",
            &["-c".to_string(), "echo 'init failed (error = 57)'; exit 1".to_string()],
            None,
        )
        .unwrap();
        assert!(matches!(pty.expect(PROMPT), Err(Error::EndOfStream)));
    }

    #[test]
    fn test_interrupt_stops_foreground_process() {
        let mut pty = PtyChannel::spawn("cat", &[], None).unwrap();
        std::thread::sleep(Duration::from_millis(100));
        pty.interrupt().unwrap();
        assert!(matches!(pty.expect(PROMPT), Err(Error::EndOfStream)));
    }

    #[test]
    fn test_transcript_records_both_directions() {
        let transcript = SharedBuf::default();
        let script = format!("printf '{PROMPT}'; read line; echo \"got $line\"");
        let mut pty = PtyChannel::spawn(
            "sh",
            &["-c".to_string(), script],
            Some(Box::new(transcript.clone())),
        )
        .unwrap();

        pty.expect(PROMPT).unwrap();
        pty.send_line("step").unwrap();
        let _ = pty.expect(PROMPT);

        let recorded = String::from_utf8_lossy(&transcript.0.lock().unwrap()).to_string();
        assert!(recorded.contains(PROMPT));
        assert!(recorded.contains("step\n"));
        assert!(recorded.contains("got step"));
    }
}
