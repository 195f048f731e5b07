//! Testing utilities for debugpool.
//!
//! Provides an in-memory [`ProcessProbe`] whose view of devices and processes
//! is set up by the test.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use debugpool_core::Result;

use crate::probe::ProcessProbe;

#[derive(Debug, Default)]
struct ProbeState {
    devices: Vec<String>,
    names: HashMap<u32, String>,
    open: HashSet<(u32, String)>,
    holders: HashMap<String, u32>,
    calls: usize,
}

/// Scripted [`ProcessProbe`].
///
/// A pid is alive once it has been given a name with [`FakeProbe::spawn`].
#[derive(Debug, Default)]
pub struct FakeProbe {
    state: Mutex<ProbeState>,
}

impl FakeProbe {
    /// Create a probe that reports the given devices.
    pub fn with_devices(devices: &[&str]) -> Self {
        let probe = Self::default();
        probe.set_devices(devices);
        probe
    }

    /// Replace the set of present devices.
    pub fn set_devices(&self, devices: &[&str]) {
        let mut state = self.state.lock().unwrap();
        state.devices = devices.iter().map(|d| d.to_string()).collect();
        state.devices.sort();
    }

    /// Make `pid` a live process called `name`.
    pub fn spawn(&self, pid: u32, name: &str) {
        self.state.lock().unwrap().names.insert(pid, name.to_string());
    }

    /// End process `pid`, closing everything it had open.
    pub fn kill(&self, pid: u32) {
        let mut state = self.state.lock().unwrap();
        state.names.remove(&pid);
        state.open.retain(|(p, _)| *p != pid);
        state.holders.retain(|_, p| *p != pid);
    }

    /// Record that `pid` has `device` open.
    pub fn open(&self, pid: u32, device: &str) {
        self.state
            .lock()
            .unwrap()
            .open
            .insert((pid, device.to_string()));
    }

    /// Set the external holder reported for a device.
    pub fn set_holder(&self, device: &str, pid: Option<u32>) {
        let mut state = self.state.lock().unwrap();
        match pid {
            Some(pid) => state.holders.insert(device.to_string(), pid),
            None => state.holders.remove(device),
        };
    }

    /// Number of process queries answered so far.
    pub fn calls(&self) -> usize {
        self.state.lock().unwrap().calls
    }
}

impl ProcessProbe for FakeProbe {
    fn devices(&self) -> Result<Vec<String>> {
        Ok(self.state.lock().unwrap().devices.clone())
    }

    fn is_alive(&self, pid: u32) -> bool {
        let mut state = self.state.lock().unwrap();
        state.calls += 1;
        state.names.contains_key(&pid)
    }

    fn command_name(&self, pid: u32) -> Option<String> {
        let mut state = self.state.lock().unwrap();
        state.calls += 1;
        state.names.get(&pid).cloned()
    }

    fn has_open(&self, pid: u32, device: &str) -> bool {
        let mut state = self.state.lock().unwrap();
        state.calls += 1;
        state.open.contains(&(pid, device.to_string()))
    }

    fn holder(&self, device: &str) -> Option<u32> {
        let mut state = self.state.lock().unwrap();
        state.calls += 1;
        state.holders.get(device).copied()
    }
}
