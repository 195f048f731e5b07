//! # debugpool
//!
//! Command-line front end for the debug adapter pool.
//!
//! ## Overview
//!
//! The binary either administers the pool (refresh, list, check, get) or,
//! when no administrative flag is given, claims a device, starts a debugger
//! on it and relays commands from stdin.
//!
//! ## Architecture
//!
//! This is Layer 3 - the binary that ties together:
//! - debugpool-core: Core types and configuration
//! - debugpool-manager: Device ownership
//! - debugpool-session: Debugger sessions

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod admin;
pub mod console;

pub use admin::Cli;
pub use console::interact;
