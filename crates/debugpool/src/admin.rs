//! Command-line arguments and pool administration.

use std::io::Write;
use std::path::PathBuf;

use clap::Parser;

use debugpool_manager::DevicePool;

/// Share debug adapters between concurrent debugger sessions.
#[derive(Debug, Parser)]
#[command(name = "debugpool", version, about)]
pub struct Cli {
    /// YAML configuration file
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Rebuild ownership from the devices present and the processes using them
    #[arg(short, long)]
    pub refresh: bool,

    /// Print the current status of every device
    #[arg(short, long)]
    pub list: bool,

    /// Check the status of a comma-separated list of devices
    #[arg(short, long, value_name = "TTYS")]
    pub check: Option<String>,

    /// Get the status of a comma-separated list of devices
    #[arg(short, long, value_name = "TTYS")]
    pub get: Option<String>,
}

impl Cli {
    /// True when no administrative action was requested.
    pub fn wants_session(&self) -> bool {
        !self.refresh && !self.list && self.check.is_none() && self.get.is_none()
    }

    /// Run the requested administrative actions, writing reports to `out`.
    pub fn administer(&self, pool: &DevicePool, out: &mut impl Write) -> anyhow::Result<()> {
        if self.refresh {
            pool.refresh()?;
        }
        if let Some(devices) = &self.check {
            pool.check_all(&split_devices(devices))?;
        }
        if let Some(devices) = &self.get {
            for device in split_devices(devices) {
                match pool.status_of(&device)? {
                    Some(owner) => writeln!(out, "{device:9} : {owner}")?,
                    None => writeln!(out, "{device:9} : not recorded")?,
                }
            }
        }
        if self.list {
            for (device, owner) in pool.snapshot()?.iter() {
                writeln!(out, "{device:9} : {owner}")?;
            }
        }
        Ok(())
    }
}

/// Split `ttyACM0, ttyACM1` into device identifiers.
pub fn split_devices(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|device| !device.is_empty())
        .map(str::to_string)
        .collect()
}
