//! # debugpool-pty
//!
//! Pseudo-terminal transport for debugpool.
//!
//! This crate provides [`PtyChannel`], a [`debugpool_core::DebuggerChannel`]
//! that runs the debugger under a PTY, waits for prompt and banner markers in
//! its output, and copies the whole exchange into a transcript.
//!
//! ## Architecture
//!
//! This is Layer 1 in the architecture - it depends only on debugpool-core.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod pty;

pub use pty::PtyChannel;
