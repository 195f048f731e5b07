//! Request/response channel to an interactive debugger process.

use crate::Result;

/// Half-duplex text channel to a spawned debugger.
///
/// One request is outstanding at a time: the caller sends a line, then waits
/// for a marker (the prompt, or the running banner) before sending the next.
pub trait DebuggerChannel: Send {
    /// Process id of the debugger, if it is a real OS process.
    fn pid(&self) -> Option<u32>;

    /// Send one command line (a newline is appended).
    fn send_line(&mut self, line: &str) -> Result<()>;

    /// Block until `marker` appears in the output.
    ///
    /// Returns the output preceding the marker and consumes the marker itself.
    /// Fails with [`crate::Error::EndOfStream`] if the process closes the
    /// stream first. There is no timeout.
    fn expect(&mut self, marker: &str) -> Result<String>;

    /// Deliver the terminal interrupt character (Ctrl+C).
    fn interrupt(&mut self) -> Result<()>;

    /// Forcibly terminate the process.
    fn kill(&mut self) -> Result<()>;

    /// Wait for the process to exit.
    fn wait(&mut self) -> Result<()>;
}
