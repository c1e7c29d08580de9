//! Serial Console Protocol
//!
//! Implements the mruby/c console protocol used to load bytecode onto a board.
//!
//! The protocol is line oriented and strictly request/response: every command
//! is answered by at most one line, and the raw bytecode payload is the only
//! traffic that is not a text line.

mod channel;
pub mod codec;
pub mod commands;
mod error;
mod handshake;
pub mod serial;
mod session;
mod transport;
mod upload;

pub use channel::CommandChannel;
pub use codec::ConsoleLineCodec;
pub use commands::{Command, Terminator};
pub use error::{ProtocolError, SessionError, SessionPhase};
pub use handshake::{HandshakeReport, HandshakeSequencer, HandshakeState};
pub use serial::{list_ports, PortInfo, SerialTransport};
pub use session::{SessionController, SessionReport, SessionState};
pub use transport::{Response, Transport};
pub use upload::{BytecodeUploader, UploadReport};

/// Default baud rate of the mruby/c console
pub const DEFAULT_BAUD_RATE: u32 = 19200;

/// Default timeout for command acknowledgements in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// Timeout for each banner probe in milliseconds.
/// The board may still be booting, so this is deliberately generous.
pub const PROBE_TIMEOUT_MS: u64 = 5000;

/// Quiet window used to discard late probe answers after the banner matched
pub const DRAIN_WINDOW_MS: u64 = 100;

/// Prefix of the firmware banner that signals a ready console
pub const BANNER_PREFIX: &str = "+OK mruby/c";

/// Bytecode format version reported by compatible firmware
pub const EXPECTED_VERSION: &str = "RITE0300";

/// Longest console line kept before it is cut into a line of its own
pub const MAX_LINE_LENGTH: usize = 1024;
