//! Typed debugger operations built on [`Session::run_command`].

use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;

use tracing::debug;

use debugpool_core::{parse_memory, parse_register_map, parse_registers, Error, Result};

use crate::session::Session;

/// Let the target run freely.
pub const RUN: &str = "run";
/// Reset the target.
pub const RESET: &str = "reset";
/// Flash a firmware image.
pub const PROG: &str = "prog";
/// Write bytes to memory.
pub const MEMORY_WRITE: &str = "mw";
/// Fill a memory range with a repeating pattern.
pub const FILL: &str = "fill";
/// Set one register.
pub const SET_REGISTER: &str = "setreg";
/// Dump a memory range.
pub const MEMORY_DUMP: &str = "md";
/// Show all registers.
pub const REGISTERS: &str = "regs";
/// Execute one instruction.
pub const STEP: &str = "step";

fn hex_bytes(bytes: &[u8]) -> String {
    bytes.iter().fold(String::new(), |mut out, b| {
        let _ = write!(out, " {b:#04x}");
        out
    })
}

impl Session {
    /// Reset the target.
    pub fn reset(&mut self) -> Result<()> {
        self.run_command(RESET).map(drop)
    }

    /// Program the target with a firmware image.
    pub fn program_load(&mut self, image: &Path) -> Result<()> {
        self.run_command(&format!("{PROG} {}", image.display()))
            .map(drop)
    }

    /// Write `bytes` starting at `address`.
    pub fn memory_write(&mut self, address: u32, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Err(Error::InvalidInput("nothing to write".to_string()));
        }
        self.run_command(&format!("{MEMORY_WRITE} {address:#x}{}", hex_bytes(bytes)))
            .map(drop)
    }

    /// Fill `size` bytes from `address` with `pattern`, repeated.
    pub fn memory_fill(&mut self, address: u32, size: usize, pattern: &[u8]) -> Result<()> {
        if pattern.is_empty() {
            return Err(Error::InvalidInput("empty fill pattern".to_string()));
        }
        self.run_command(&format!(
            "{FILL} {address:#x} {size}{}",
            hex_bytes(pattern)
        ))
        .map(drop)
    }

    /// Set register `index` to `value`.
    pub fn set_register(&mut self, index: usize, value: u32) -> Result<()> {
        self.run_command(&format!("{SET_REGISTER} {index} {value:#x}"))
            .map(drop)
    }

    /// Read `size` bytes from `address`.
    pub fn memory_read(&mut self, address: u32, size: usize) -> Result<Vec<u8>> {
        let output = self.run_command(&format!("{MEMORY_DUMP} {address:#x} {size}"))?;
        let dump = parse_memory(&output)?;

        let base = dump
            .base
            .ok_or_else(|| Error::ParseError(format!("no memory rows in {output:?}")))?;
        if base != address {
            return Err(Error::AddressMismatch {
                requested: address,
                reported: base,
            });
        }

        dump.data
            .into_iter()
            .map(|value| {
                u8::try_from(value)
                    .map_err(|_| Error::ParseError(format!("memory value {value:#x} is not a byte")))
            })
            .collect()
    }

    /// All registers, indexed by register number.
    pub fn read_registers(&mut self) -> Result<Vec<u32>> {
        let output = self.run_command(REGISTERS)?;
        registers_in(&output)
    }

    /// Execute one instruction; returns the new program counter.
    pub fn single_step(&mut self) -> Result<u32> {
        let output = self.run_command(STEP)?;
        program_counter(&output)
    }

    /// Run the target for `interval`, then stop it; returns the program counter.
    pub fn run_for(&mut self, interval: Duration) -> Result<u32> {
        self.run_continue()?;
        std::thread::sleep(interval);
        let output = self.interrupt()?;
        debug!("Stopped {} after {:?}", self.device(), interval);
        program_counter(&output)
    }
}

fn registers_in(output: &str) -> Result<Vec<u32>> {
    let registers = parse_registers(output)?;
    if registers.is_empty() {
        return Err(Error::ParseError(format!("no registers in {output:?}")));
    }
    Ok(registers)
}

fn program_counter(output: &str) -> Result<u32> {
    parse_register_map(output)?
        .get(&0)
        .copied()
        .ok_or_else(|| Error::ParseError(format!("no PC in {output:?}")))
}
