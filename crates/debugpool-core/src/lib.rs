//! # debugpool-core
//!
//! Core types for debugpool.
//!
//! This crate contains all fundamental types with **no internal dependencies**
//! on other debugpool crates. It provides:
//!
//! - Ownership records and the persisted status snapshot
//! - Configuration loaded from YAML
//! - The request/response channel trait implemented by debugger transports
//! - Parsing of register and memory dumps printed by the debugger
//! - Error types
//!
//! ## Architecture
//!
//! This is Layer 0 in the architecture - all other crates depend on this one,
//! but this crate has no dependencies on other debugpool crates.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod config;
pub mod error;
pub mod owner;
pub mod reply;

// Re-export commonly used types
pub use channel::DebuggerChannel;
pub use config::{Config, DebuggerSettings, LoggingSettings, PoolSettings};
pub use error::{Error, Result};
pub use owner::{Owner, StatusSnapshot, BAD_MARKER};
pub use reply::{
    extract_error_code, parse_memory, parse_register_map, parse_registers, MemoryDump,
};
