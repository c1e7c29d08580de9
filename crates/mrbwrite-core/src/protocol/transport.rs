//! Transport abstraction
//!
//! The protocol only needs four capabilities from the underlying link, so the
//! serial port and the simulated board both sit behind this trait.

use std::time::Duration;

use async_trait::async_trait;

use super::ProtocolError;

/// Outcome of waiting for one console line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// A complete line, trailing CR/LF removed
    Line(String),
    /// No complete line arrived within the timeout
    TimedOut,
}

impl Response {
    /// The received line, if any
    pub fn line(&self) -> Option<&str> {
        match self {
            Response::Line(line) => Some(line),
            Response::TimedOut => None,
        }
    }

    /// Take the received line, if any
    pub fn into_line(self) -> Option<String> {
        match self {
            Response::Line(line) => Some(line),
            Response::TimedOut => None,
        }
    }

    /// Whether the wait ended without a line
    pub fn is_timeout(&self) -> bool {
        matches!(self, Response::TimedOut)
    }
}

/// Byte-oriented, line-delimited duplex link to a board
#[async_trait]
pub trait Transport: Send {
    /// Open the link
    async fn open(&mut self, port: &str, baud_rate: u32) -> Result<(), ProtocolError>;

    /// Write bytes verbatim. Nothing is appended or interpreted.
    async fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), ProtocolError>;

    /// Wait for the next complete line.
    ///
    /// Resolves to exactly one of a line or [`Response::TimedOut`]. Bytes that
    /// arrive after the timeout stay buffered for the next call.
    async fn read_line(&mut self, timeout: Duration) -> Result<Response, ProtocolError>;

    /// Close the link. Closing a link that is not open is a no-op.
    async fn close(&mut self) -> Result<(), ProtocolError>;
}
