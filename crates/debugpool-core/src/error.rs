//! Error types for debugpool.

use thiserror::Error;

/// Main error type for debugpool operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Every known device is owned, marked bad, or was already tried
    #[error("No device available")]
    NoDeviceAvailable,

    /// Command rejected before reaching the debugger
    #[error("Command not allowed: {0}")]
    CommandNotAllowed(String),

    /// Invalid input or parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Debugger reply did not have the expected shape
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Memory dump started somewhere other than the requested address
    #[error("Address mismatch: requested {requested:#x}, debugger reported {reported:#x}")]
    AddressMismatch {
        /// Address passed to the read
        requested: u32,
        /// Base address found in the dump
        reported: u32,
    },

    /// The debugger process closed its output stream
    #[error("Debugger closed the channel")]
    EndOfStream,

    /// Operation not valid in the current session state
    #[error("Invalid session state: {0}")]
    InvalidState(String),

    /// Exit command answered with a prompt instead of terminating
    #[error("Debugger on {0} did not exit; device left claimed")]
    ExitNotConfirmed(String),

    /// PTY-related errors
    #[error("PTY error: {0}")]
    PtyError(String),

    /// Status file lock could not be taken or an in-process lock was poisoned
    #[error("Lock error: {0}")]
    Lock(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_device_available_error() {
        assert_eq!(Error::NoDeviceAvailable.to_string(), "No device available");
    }

    #[test]
    fn test_command_not_allowed_error() {
        let err = Error::CommandNotAllowed("exit".to_string());
        assert_eq!(err.to_string(), "Command not allowed: exit");
    }

    #[test]
    fn test_address_mismatch_error() {
        let err = Error::AddressMismatch {
            requested: 0x2400,
            reported: 0x2410,
        };
        assert_eq!(
            err.to_string(),
            "Address mismatch: requested 0x2400, debugger reported 0x2410"
        );
    }

    #[test]
    fn test_exit_not_confirmed_error() {
        let err = Error::ExitNotConfirmed("ttyACM0".to_string());
        assert_eq!(
            err.to_string(),
            "Debugger on ttyACM0 did not exit; device left claimed"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_serialization_error_conversion() {
        let json_err = serde_json::from_str::<i32>("invalid json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
