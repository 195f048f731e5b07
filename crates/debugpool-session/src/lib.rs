//! # debugpool-session
//!
//! Debugger session lifecycle for debugpool.
//!
//! This crate provides:
//! - Session start with device allocation, spawn and retry across the pool
//! - Per-device session logs and post-mortem error code recovery
//! - Pass-through and typed debugger commands
//! - Session teardown and device release
//!
//! ## Architecture
//!
//! This is Layer 2 in the architecture - it depends on debugpool-core,
//! debugpool-pty and debugpool-manager.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod commands;
pub mod driver;
pub mod launcher;
pub mod log;
pub mod session;
pub mod testing;

// Re-export commonly used types
pub use driver::SessionDriver;
pub use launcher::{Launcher, PtyLauncher};
pub use log::{LogSink, SessionLog};
pub use session::{Session, SessionState};
