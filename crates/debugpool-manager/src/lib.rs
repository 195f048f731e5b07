//! # debugpool-manager
//!
//! Device ownership bookkeeping shared by every debugpool process.
//!
//! This crate provides:
//! - [`StatusStore`]: the persisted device-to-owner mapping, only reachable
//!   through one exclusive-lock critical section
//! - [`ProcessProbe`]: the narrow OS capability used to judge whether a
//!   recorded owner is still real
//! - [`DevicePool`]: allocation, release, marking and resynchronization
//!
//! ## Architecture
//!
//! This is Layer 1 in the architecture - it depends only on debugpool-core.
//! Separate processes coordinate exclusively through the status file lock.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod pool;
pub mod probe;
pub mod store;
pub mod testing;

// Re-export commonly used types
pub use pool::DevicePool;
pub use probe::{ProcessProbe, SystemProbe};
pub use store::StatusStore;
