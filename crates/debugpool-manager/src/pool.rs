//! Device allocation and ownership resynchronization.
//!
//! Every operation is a single [`StatusStore`] critical section. Allocation
//! only scans the snapshot, so it is cheap; deciding whether a recorded pid
//! is still a real holder needs OS probes, which only `check` and
//! `reconcile` perform. Those probes run against a pre-read snapshot before
//! the lock is taken; inside the lock only records that changed in between
//! are probed again.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use debugpool_core::{Config, Error, Owner, Result, StatusSnapshot};

use crate::probe::{ProcessProbe, SystemProbe};
use crate::store::StatusStore;

/// Pool of debug adapter ports shared by cooperating processes.
#[derive(Debug)]
pub struct DevicePool {
    store: StatusStore,
    /// Command name of processes that claim devices for themselves
    client_process_name: String,
    /// Pid recorded by `acquire`
    claimant: u32,
}

impl DevicePool {
    /// Create a pool over an opened status store.
    pub fn new(store: StatusStore, client_process_name: impl Into<String>) -> Self {
        Self {
            store,
            client_process_name: client_process_name.into(),
            claimant: std::process::id(),
        }
    }

    /// Open the pool described by `config`, probing the real OS.
    pub fn open(config: &Config) -> Result<Self> {
        let probe = Arc::new(SystemProbe::from_settings(&config.pool));
        let store = StatusStore::open(config.status_path(), probe)?;
        Ok(Self::new(store, &config.pool.client_process_name))
    }

    /// Record a different pid on `acquire` (defaults to this process).
    pub fn with_claimant(mut self, pid: u32) -> Self {
        self.claimant = pid;
        self
    }

    /// Pid recorded by `acquire`.
    pub fn claimant(&self) -> u32 {
        self.claimant
    }

    /// The underlying status store.
    pub fn store(&self) -> &StatusStore {
        &self.store
    }

    fn probe(&self) -> &dyn ProcessProbe {
        self.store.probe().as_ref()
    }

    /// Check if `pid` is a live process that legitimately holds `device`.
    ///
    /// Either it is one of our own clients (matched by command name), or it
    /// has the device file open.
    pub fn is_legitimate(&self, pid: u32, device: &str) -> bool {
        let probe = self.probe();
        probe.is_alive(pid)
            && (probe.command_name(pid).as_deref() == Some(self.client_process_name.as_str())
                || probe.has_open(pid, device))
    }

    /// Destructive resync over all present devices. See [`DevicePool::reconcile`].
    pub fn refresh(&self) -> Result<()> {
        let known = self.probe().devices()?;
        self.reconcile(&known)
    }

    /// Rebuild the mapping for exactly `known` devices.
    ///
    /// Recorded owners that are alive and legitimate are kept; everything
    /// else, including devices marked bad, becomes free. Records for devices
    /// outside `known` are dropped. Meant for use after the physical device
    /// set changed, e.g. an adapter was replugged.
    pub fn reconcile(&self, known: &[String]) -> Result<()> {
        info!("Reconciling {} devices", known.len());
        let mut verdicts = Verdicts::new(self);

        let before = self.store.read()?;
        for device in known {
            if let Some(pid) = before.get(device).and_then(|owner| owner.pid()) {
                verdicts.legitimate(device, pid);
            }
        }

        self.store.with_lock(|status| {
            let next: StatusSnapshot = known
                .iter()
                .map(|device| {
                    let owner = match status.get(device) {
                        Some(Owner::OwnedBy(pid)) if verdicts.legitimate(device, pid) => {
                            Owner::OwnedBy(pid)
                        }
                        Some(Owner::OwnedBy(pid)) => {
                            debug!("Clearing stale owner {} of {}", pid, device);
                            Owner::Free
                        }
                        _ => Owner::Free,
                    };
                    (device.clone(), owner)
                })
                .collect();
            *status = next;
        })
    }

    /// Conservative resync of `subset` against all present devices.
    pub fn check_all(&self, subset: &[String]) -> Result<()> {
        let known = self.probe().devices()?;
        self.check(subset, &known)
    }

    /// Conservative, incremental resync of the devices in `subset`.
    ///
    /// Devices not in `known` are skipped. A recorded legitimate owner is
    /// never touched. Otherwise a process found holding the device is adopted
    /// as owner; failing that, a recorded pid is cleared to free while free
    /// and bad records stay as they are. Unrecorded devices are added.
    pub fn check(&self, subset: &[String], known: &[String]) -> Result<()> {
        let known: HashSet<&str> = known.iter().map(String::as_str).collect();
        let targets: Vec<&String> = subset
            .iter()
            .filter(|device| {
                let present = known.contains(device.as_str());
                if !present {
                    debug!("Skipping check of unknown device {}", device);
                }
                present
            })
            .collect();
        info!("Checking {} devices", targets.len());

        let mut verdicts = Verdicts::new(self);
        let before = self.store.read()?;
        for device in &targets {
            match before.get(device).and_then(|owner| owner.pid()) {
                Some(pid) if verdicts.legitimate(device, pid) => {}
                _ => {
                    verdicts.holder(device);
                }
            }
        }

        self.store.with_lock(|status| {
            for device in targets {
                match status.get(device) {
                    Some(current) => {
                        if let Some(pid) = current.pid() {
                            if verdicts.legitimate(device, pid) {
                                continue;
                            }
                        }
                        match verdicts.holder(device) {
                            Some(user) => {
                                info!("Adopting pid {} as owner of {}", user, device);
                                status.set(device.as_str(), Owner::OwnedBy(user));
                            }
                            None if current.pid().is_some() => {
                                info!("Clearing invalid owner of {}", device);
                                status.set(device.as_str(), Owner::Free);
                            }
                            None => {}
                        }
                    }
                    None => {
                        let owner = verdicts.holder(device).map_or(Owner::Free, Owner::OwnedBy);
                        info!("Recording new device {} as {}", device, owner);
                        status.set(device.as_str(), owner);
                    }
                }
            }
        })
    }

    /// Claim the first free device for this process.
    pub fn acquire(&self) -> Result<String> {
        self.acquire_excluding(&HashSet::new())
    }

    /// Claim the first free device that is not in `excluded`.
    ///
    /// The claim is tentative: the caller should [`confirm`](Self::confirm)
    /// it with the real user's pid or [`release`](Self::release) it promptly.
    pub fn acquire_excluding(&self, excluded: &HashSet<String>) -> Result<String> {
        let claimant = self.claimant;
        let device = self.store.with_lock(|status| {
            let device = status.first_free(excluded)?.to_string();
            status.set(device.as_str(), Owner::OwnedBy(claimant));
            Some(device)
        })?;

        match device {
            Some(device) => {
                info!("Acquired {} for pid {}", device, claimant);
                Ok(device)
            }
            None => {
                warn!("No free device (excluding {} already tried)", excluded.len());
                Err(Error::NoDeviceAvailable)
            }
        }
    }

    /// Label a claimed device with the pid of the process actually using it.
    pub fn confirm(&self, device: &str, pid: u32) -> Result<()> {
        if self.store.with_lock(|status| status.update(device, Owner::OwnedBy(pid)))? {
            info!("Confirmed {} for pid {}", device, pid);
        } else {
            warn!("confirm: no device {:?} for pid {}", device, pid);
        }
        Ok(())
    }

    /// Return a device to the pool.
    pub fn release(&self, device: &str) -> Result<()> {
        if self.store.with_lock(|status| status.update(device, Owner::Free))? {
            info!("Released {}", device);
        } else {
            warn!("release: no device {:?}", device);
        }
        Ok(())
    }

    /// Mark a device as not reaching a working adapter.
    ///
    /// Only [`reconcile`](Self::reconcile) clears the mark.
    pub fn mark_bad(&self, device: &str) -> Result<()> {
        if self.store.with_lock(|status| status.update(device, Owner::Bad))? {
            warn!("Marked {} as bad", device);
        } else {
            warn!("mark_bad: no device {:?}", device);
        }
        Ok(())
    }

    /// Current owner of a device; `None` if it is not recorded.
    pub fn status_of(&self, device: &str) -> Result<Option<Owner>> {
        self.store.with_lock(|status| status.get(device))
    }

    /// All records.
    pub fn snapshot(&self) -> Result<StatusSnapshot> {
        self.store.read()
    }
}

/// Memoized probe results for one resync.
struct Verdicts<'a> {
    pool: &'a DevicePool,
    legitimate: HashMap<(String, u32), bool>,
    holders: HashMap<String, Option<u32>>,
}

impl<'a> Verdicts<'a> {
    fn new(pool: &'a DevicePool) -> Self {
        Self {
            pool,
            legitimate: HashMap::new(),
            holders: HashMap::new(),
        }
    }

    fn legitimate(&mut self, device: &str, pid: u32) -> bool {
        let pool = self.pool;
        *self
            .legitimate
            .entry((device.to_string(), pid))
            .or_insert_with(|| pool.is_legitimate(pid, device))
    }

    fn holder(&mut self, device: &str) -> Option<u32> {
        let pool = self.pool;
        *self
            .holders
            .entry(device.to_string())
            .or_insert_with(|| pool.probe().holder(device))
    }
}
