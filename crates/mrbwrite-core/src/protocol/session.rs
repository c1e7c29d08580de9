//! Session management
//!
//! Owns the transport for the length of one flashing session and sequences
//! connect, handshake, upload, and execute. The transport is closed on every
//! exit path.

use tracing::{debug, info, warn};

use super::{
    BytecodeUploader, CommandChannel, HandshakeReport, HandshakeSequencer, ProtocolError,
    SessionError, SessionPhase, Transport, UploadReport,
};
use crate::bytecode::BytecodeImage;
use crate::config::FlashSettings;

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No port open
    Disconnected,
    /// Port open, console state unknown
    Connected,
    /// Probing for the banner
    HandshakeInProgress,
    /// Banner seen, ready for bytecode
    Ready,
    /// Announcing and streaming the image
    Uploading,
    /// Execute command sent
    Executing,
    /// Port closed at the end of a session
    Closed,
}

/// Summary of a completed session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    /// Port the board was reached on
    pub port_name: String,
    /// Baud rate used
    pub baud_rate: u32,
    /// Handshake observations
    pub handshake: HandshakeReport,
    /// Upload observations
    pub upload: UploadReport,
    /// Cumulative tx bytes, rx bytes, commands sent, lines received
    pub counters: (u64, u64, u64, u64),
}

/// Runs flashing sessions over one transport
pub struct SessionController<T: Transport> {
    channel: CommandChannel<T>,
    settings: FlashSettings,
    state: SessionState,
}

impl<T: Transport> SessionController<T> {
    /// Create a controller (not yet connected)
    pub fn new(transport: T, settings: FlashSettings) -> Self {
        Self {
            channel: CommandChannel::new(transport),
            settings,
            state: SessionState::Disconnected,
        }
    }

    /// Get current session state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Settings used for every session
    pub fn settings(&self) -> &FlashSettings {
        &self.settings
    }

    /// Access the underlying transport
    pub fn transport(&self) -> &T {
        self.channel.transport()
    }

    /// Unwrap the transport
    pub fn into_transport(self) -> T {
        self.channel.into_inner()
    }

    fn set_state(&mut self, state: SessionState) {
        debug!(from = ?self.state, to = ?state, "session state");
        self.state = state;
    }

    /// Flash `image` and start it.
    ///
    /// The transport is closed exactly once before this returns, whether the
    /// session succeeded or not.
    pub async fn run(&mut self, image: &BytecodeImage) -> Result<SessionReport, SessionError> {
        if !matches!(self.state, SessionState::Disconnected | SessionState::Closed) {
            return Err(SessionError::new(
                SessionPhase::Connect,
                ProtocolError::AlreadyConnected,
            ));
        }

        let outcome = self.drive(image).await;

        let closed = self.channel.transport_mut().close().await;
        self.channel.reset();
        self.set_state(SessionState::Closed);

        match (outcome, closed) {
            (Ok(report), Ok(())) => {
                info!(
                    port = %report.port_name,
                    bytes = report.upload.bytes_sent,
                    "session complete"
                );
                Ok(report)
            }
            (Ok(_), Err(e)) => Err(SessionError::new(SessionPhase::Close, e)),
            (Err(e), closed) => {
                if let Err(close_err) = closed {
                    warn!("failed to close port after {} error: {}", e.phase, close_err);
                }
                Err(e)
            }
        }
    }

    async fn drive(&mut self, image: &BytecodeImage) -> Result<SessionReport, SessionError> {
        self.settings.validate().map_err(|e| {
            SessionError::new(
                SessionPhase::Connect,
                ProtocolError::InvalidState(e.to_string()),
            )
        })?;

        let port_name = self.settings.connection.port_name.clone();
        let baud_rate = self.settings.connection.baud_rate;
        self.channel
            .transport_mut()
            .open(&port_name, baud_rate)
            .await
            .map_err(|e| SessionError::new(SessionPhase::Connect, e))?;
        self.set_state(SessionState::Connected);

        self.set_state(SessionState::HandshakeInProgress);
        let mut sequencer = HandshakeSequencer::new(
            self.settings.handshake.clone(),
            self.settings.connection.timeout(),
        );
        let handshake = sequencer
            .run(&mut self.channel)
            .await
            .map_err(|e| SessionError::new(SessionPhase::Handshake, e))?;
        self.set_state(SessionState::Ready);

        self.set_state(SessionState::Uploading);
        let uploader = BytecodeUploader::new(self.settings.upload.clone());
        let mut upload = uploader
            .upload(&mut self.channel, image)
            .await
            .map_err(|e| SessionError::new(SessionPhase::Upload, e))?;

        self.set_state(SessionState::Executing);
        uploader
            .execute(&mut self.channel, &mut upload)
            .await
            .map_err(|e| SessionError::new(SessionPhase::Execute, e))?;

        Ok(SessionReport {
            port_name,
            baud_rate,
            handshake,
            upload,
            counters: self.channel.counters(),
        })
    }
}
