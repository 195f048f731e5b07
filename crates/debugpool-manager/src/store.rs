//! Persisted device status, guarded by an exclusive file lock.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use debugpool_core::{Error, Owner, Result, StatusSnapshot};

use crate::probe::ProcessProbe;

/// The single source of truth for device ownership.
///
/// The backing file is only read or written inside [`StatusStore::with_lock`],
/// which holds an exclusive `flock` across the whole
/// read-modify-truncate-rewrite cycle. Separate processes (or separate
/// `StatusStore` handles on the same file) therefore never interleave.
pub struct StatusStore {
    path: PathBuf,
    /// Serializes callers sharing this handle; `flock` does not
    /// exclude holders of the same open file description.
    file: Mutex<File>,
    probe: Arc<dyn ProcessProbe>,
}

impl std::fmt::Debug for StatusStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl StatusStore {
    /// Open the status file, creating it (and its directory) if absent.
    ///
    /// `probe` is used to rebuild the mapping from live OS state whenever the
    /// file is empty or unreadable.
    pub fn open(path: impl Into<PathBuf>, probe: Arc<dyn ProcessProbe>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        debug!("Opened status file {}", path.display());

        Ok(Self {
            path,
            file: Mutex::new(file),
            probe,
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Probe used to rebuild the mapping and validate owners.
    pub fn probe(&self) -> &Arc<dyn ProcessProbe> {
        &self.probe
    }

    /// Run `f` on the current snapshot inside the exclusive critical section.
    ///
    /// The snapshot is persisted in full afterwards, whether or not `f`
    /// changed it.
    pub fn with_lock<T>(&self, f: impl FnOnce(&mut StatusSnapshot) -> T) -> Result<T> {
        let file = self
            .file
            .lock()
            .map_err(|_| Error::Lock("status file handle poisoned".to_string()))?;
        let file: &File = &file;

        let _lock = FileLock::exclusive(file)?;
        let mut snapshot = self.load(file)?;
        let result = f(&mut snapshot);
        Self::persist(file, &snapshot)?;
        Ok(result)
    }

    /// Copy of the current snapshot.
    pub fn read(&self) -> Result<StatusSnapshot> {
        self.with_lock(|snapshot| snapshot.clone())
    }

    fn load(&self, mut file: &File) -> Result<StatusSnapshot> {
        file.seek(SeekFrom::Start(0))?;
        let mut content = String::new();
        file.read_to_string(&mut content)?;

        if content.trim().is_empty() {
            info!("Status file {} is empty, rebuilding", self.path.display());
            return self.rebuild();
        }

        match serde_json::from_str(&content) {
            Ok(snapshot) => Ok(snapshot),
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Status file corrupted, rebuilding from live devices"
                );
                self.rebuild()
            }
        }
    }

    /// Fresh mapping: every present device, owned by whoever holds it open.
    fn rebuild(&self) -> Result<StatusSnapshot> {
        let snapshot: StatusSnapshot = self
            .probe
            .devices()?
            .into_iter()
            .map(|device| {
                let owner = self
                    .probe
                    .holder(&device)
                    .map_or(Owner::Free, Owner::OwnedBy);
                (device, owner)
            })
            .collect();
        info!("Rebuilt status with {} devices", snapshot.len());
        Ok(snapshot)
    }

    fn persist(mut file: &File, snapshot: &StatusSnapshot) -> Result<()> {
        file.seek(SeekFrom::Start(0))?;
        serde_json::to_writer_pretty(&mut file, snapshot)?;
        file.write_all(b"\n")?;
        let len = file.stream_position()?;
        file.set_len(len)?;
        file.flush()?;
        Ok(())
    }
}

/// Exclusive advisory lock on an open file, released on drop.
struct FileLock<'a> {
    file: &'a File,
}

impl<'a> FileLock<'a> {
    #[cfg(unix)]
    fn exclusive(file: &'a File) -> Result<Self> {
        use std::os::unix::io::AsRawFd;

        let fd = file.as_raw_fd();
        loop {
            // SAFETY: fd comes from a File borrowed for the lifetime of the guard.
            if unsafe { libc::flock(fd, libc::LOCK_EX) } == 0 {
                return Ok(Self { file });
            }
            let err = std::io::Error::last_os_error();
            if err.kind() != std::io::ErrorKind::Interrupted {
                return Err(Error::Lock(format!("flock failed: {err}")));
            }
        }
    }

    #[cfg(not(unix))]
    fn exclusive(_file: &'a File) -> Result<Self> {
        Err(Error::Lock(
            "status file locking requires a unix platform".to_string(),
        ))
    }
}

impl Drop for FileLock<'_> {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;

            // SAFETY: the borrowed File is still open.
            if unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_UN) } != 0 {
                warn!(
                    "Failed to unlock status file: {}",
                    std::io::Error::last_os_error()
                );
            }
        }
    }
}
