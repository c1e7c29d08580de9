//! # mrbwrite Core Library
//!
//! Core functionality for flashing mruby/c bytecode onto microcontroller boards.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Serial transport and port enumeration
//! - Line-oriented command channel with per-read timeouts
//! - Banner handshake with bounded probe retries
//! - Length-prefixed bytecode upload and execution trigger
//! - Bytecode image validation and concatenation
//! - A simulated board for running sessions without hardware
//!
//! ## Example
//!
//! ```rust,ignore
//! use mrbwrite_core::{bytecode::BytecodeImage, config::FlashSettings, protocol::{SerialTransport, SessionController}};
//!
//! let image = BytecodeImage::from_file("sample.mrb")?;
//! let settings = FlashSettings::default().with_port("/dev/ttyUSB0");
//!
//! let mut session = SessionController::new(SerialTransport::new(), settings);
//! let report = session.run(&image).await?;
//! println!("sent {} bytes after {} probes", report.upload.bytes_sent, report.handshake.probe_attempts);
//! ```

pub mod bytecode;
pub mod config;
pub mod protocol;
pub mod sim;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::bytecode::{BytecodeError, BytecodeImage};
    pub use crate::config::{AckPolicy, ConnectionConfig, FlashSettings, VersionCheck};
    pub use crate::protocol::{
        list_ports, CommandChannel, PortInfo, ProtocolError, Response, SerialTransport,
        SessionController, SessionError, SessionPhase, SessionReport, SessionState, Transport,
    };
    pub use crate::sim::SimulatedBoard;
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
