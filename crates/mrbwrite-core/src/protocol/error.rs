//! Protocol errors

use std::fmt;

use thiserror::Error;

/// Errors that can occur during protocol communication
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Serial driver error
    #[error("Serial port error: {0}")]
    SerialError(String),

    /// Port does not exist or could not be opened
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// Transport is not open
    #[error("Not connected to board")]
    NotConnected,

    /// Transport is already open
    #[error("Already connected")]
    AlreadyConnected,

    /// A write to the transport failed
    #[error("Write failed while sending {stage}: {reason}")]
    WriteFailed {
        /// What was being sent: a command, "probe", or "payload"
        stage: String,
        /// Underlying error
        reason: String,
    },

    /// No reply to a command that requires one
    #[error("No acknowledgement for '{command}' within {timeout_ms}ms")]
    AckMissing {
        /// Command text
        command: String,
        /// How long the reply was awaited
        timeout_ms: u64,
    },

    /// The console answered with an error line
    #[error("Board rejected '{command}': {response}")]
    Rejected {
        /// Command text
        command: String,
        /// The error line
        response: String,
    },

    /// A reply did not contain what was expected
    #[error("Unexpected response: expected {expected}, got '{actual}'")]
    UnexpectedResponse {
        /// Expected content
        expected: String,
        /// Last line received
        actual: String,
    },

    /// Probe attempts ran out before the banner appeared
    #[error("Board did not answer after {attempts} probe attempts")]
    HandshakeExhausted {
        /// Probes sent
        attempts: u32,
    },

    /// The handshake deadline passed
    #[error("Handshake deadline of {deadline_ms}ms exceeded after {attempts} attempts")]
    DeadlineExceeded {
        /// Configured deadline
        deadline_ms: u64,
        /// Exchanges completed before the deadline
        attempts: u32,
    },

    /// Operation not allowed in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<serialport::Error> for ProtocolError {
    fn from(err: serialport::Error) -> Self {
        match err.kind {
            serialport::ErrorKind::NoDevice => ProtocolError::PortNotFound(err.description),
            _ => ProtocolError::SerialError(err.description),
        }
    }
}

/// The phase of a session in which an error occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Opening the port
    Connect,
    /// Probing for the banner and checking the version
    Handshake,
    /// Announcing and streaming the bytecode
    Upload,
    /// Triggering execution
    Execute,
    /// Closing the port
    Close,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionPhase::Connect => "connect",
            SessionPhase::Handshake => "handshake",
            SessionPhase::Upload => "upload",
            SessionPhase::Execute => "execute",
            SessionPhase::Close => "close",
        };
        f.write_str(name)
    }
}

/// A session failure, tagged with the phase that failed
#[derive(Error, Debug)]
#[error("{phase} failed: {source}")]
pub struct SessionError {
    /// Phase in which the error occurred
    pub phase: SessionPhase,
    /// Underlying protocol error
    #[source]
    pub source: ProtocolError,
}

impl SessionError {
    /// Wrap a protocol error with the phase it occurred in
    pub fn new(phase: SessionPhase, source: ProtocolError) -> Self {
        Self { phase, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_error_names_phase() {
        let err = SessionError::new(
            SessionPhase::Upload,
            ProtocolError::AckMissing {
                command: "write 54".to_string(),
                timeout_ms: 1000,
            },
        );
        let msg = err.to_string();
        assert!(msg.starts_with("upload failed"));
        assert!(msg.contains("write 54"));
    }

    #[test]
    fn test_serial_error_mapping() {
        let err: ProtocolError =
            serialport::Error::new(serialport::ErrorKind::NoDevice, "/dev/ttyUSB9").into();
        assert!(matches!(err, ProtocolError::PortNotFound(ref p) if p == "/dev/ttyUSB9"));

        let err: ProtocolError =
            serialport::Error::new(serialport::ErrorKind::InvalidInput, "bad baud").into();
        assert!(matches!(err, ProtocolError::SerialError(_)));
    }
}
