//! Per-device session logs.
//!
//! Everything the debugger prints is appended to `<log_dir>/<device>.log`.
//! When a debugger exits before showing its prompt, the tail of that file is
//! searched for the numeric code it reported.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local};
use tracing::debug;

use debugpool_core::{extract_error_code, Result};

/// Line marking the start of a session in a device log.
pub fn separator(at: DateTime<Local>) -> String {
    format!("\n\n\n<<<< {} >>>>\n\n\n", at.format("%a %b %e %H:%M:%S %Y"))
}

/// Append-only log of one session on one device.
#[derive(Debug)]
pub struct SessionLog {
    path: PathBuf,
    file: Arc<Mutex<File>>,
}

impl SessionLog {
    /// Open (or create) the log for `device` and write a session separator.
    pub fn open(log_dir: &Path, device: &str) -> Result<Self> {
        std::fs::create_dir_all(log_dir)?;
        let path = log_dir.join(format!("{device}.log"));
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)?;
        file.write_all(separator(Local::now()).as_bytes())?;
        file.flush()?;
        debug!("Opened session log {}", path.display());

        Ok(Self {
            path,
            file: Arc::new(Mutex::new(file)),
        })
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writer handle that appends to this log, for the debugger transcript.
    pub fn sink(&self) -> LogSink {
        LogSink(Arc::clone(&self.file))
    }

    /// Last error code reported within the final `window` bytes of the log.
    pub fn error_code(&self, window: u64) -> Result<Option<u32>> {
        self.sink().flush()?;

        let mut file = File::open(&self.path)?;
        let len = file.metadata()?.len();
        file.seek(SeekFrom::Start(len.saturating_sub(window)))?;
        let mut tail = Vec::new();
        file.read_to_end(&mut tail)?;

        Ok(extract_error_code(&String::from_utf8_lossy(&tail)))
    }

    /// Flush and close the log.
    pub fn close(self) -> Result<()> {
        self.sink().flush()?;
        debug!("Closed session log {}", self.path.display());
        Ok(())
    }
}

/// Shared append handle to a [`SessionLog`].
#[derive(Debug, Clone)]
pub struct LogSink(Arc<Mutex<File>>);

impl LogSink {
    fn file(&self) -> std::io::Result<std::sync::MutexGuard<'_, File>> {
        self.0
            .lock()
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::Other, "session log poisoned"))
    }
}

impl Write for LogSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.file()?.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file()?.flush()
    }
}

impl From<LogSink> for Box<dyn Write + Send> {
    fn from(sink: LogSink) -> Self {
        Box::new(sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_separator_format() {
        let at = Local.with_ymd_and_hms(2024, 3, 5, 9, 7, 2).unwrap();
        assert_eq!(separator(at), "\n\n\n<<<< Tue Mar  5 09:07:02 2024 >>>>\n\n\n");
    }

    #[test]
    fn test_open_appends_separator() {
        let dir = tempfile::tempdir().unwrap();
        SessionLog::open(dir.path(), "ttyACM0").unwrap().close().unwrap();
        SessionLog::open(dir.path(), "ttyACM0").unwrap().close().unwrap();

        let content = std::fs::read_to_string(dir.path().join("ttyACM0.log")).unwrap();
        assert_eq!(content.matches("<<<< ").count(), 2);
    }

    #[test]
    fn test_error_code_from_sink_output() {
        let dir = tempfile::tempdir().unwrap();
        let log = SessionLog::open(dir.path(), "ttyACM0").unwrap();
        let mut sink = log.sink();
        sink.write_all(b"MSP430_Initialize: Could not find device (error = 57)\n")
            .unwrap();

        assert_eq!(log.error_code(1024).unwrap(), Some(57));
    }

    #[test]
    fn test_error_code_outside_window_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let log = SessionLog::open(dir.path(), "ttyACM0").unwrap();
        let mut sink = log.sink();
        sink.write_all(b"(error = 57)\n").unwrap();
        sink.write_all(&[b'.'; 64]).unwrap();

        assert_eq!(log.error_code(32).unwrap(), None);
        assert_eq!(log.error_code(4096).unwrap(), Some(57));
    }

    #[test]
    fn test_error_code_last_match_wins() {
        let dir = tempfile::tempdir().unwrap();
        let log = SessionLog::open(dir.path(), "ttyACM1").unwrap();
        let mut sink = log.sink();
        sink.write_all(b"(error = 4)\nretrying\n(error = 57)\n").unwrap();

        assert_eq!(log.error_code(1024).unwrap(), Some(57));
    }
}
