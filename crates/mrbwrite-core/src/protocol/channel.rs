//! Command channel
//!
//! Correlates one outbound command with the next inbound line. There is never
//! more than one request outstanding, so responses are matched by arrival
//! order alone.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace};

use super::{Command, ProtocolError, Response, Transport};

/// Single-outstanding-request channel over a [`Transport`]
pub struct CommandChannel<T: Transport> {
    transport: T,
    /// Set once the banner has been observed; gates every non-probe write
    ready: bool,
    /// Metrics: cumulative bytes/lines sent & received
    tx_bytes: u64,
    rx_bytes: u64,
    tx_commands: u64,
    rx_lines: u64,
}

impl<T: Transport> CommandChannel<T> {
    /// Wrap an (already open or not yet open) transport
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            ready: false,
            tx_bytes: 0,
            rx_bytes: 0,
            tx_commands: 0,
            rx_lines: 0,
        }
    }

    /// Whether the board's ready banner has been observed
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Allow commands other than the probe
    pub(crate) fn mark_ready(&mut self) {
        self.ready = true;
    }

    /// Forget readiness and traffic counters, e.g. after the transport was
    /// closed
    pub(crate) fn reset(&mut self) {
        self.ready = false;
        self.tx_bytes = 0;
        self.rx_bytes = 0;
        self.tx_commands = 0;
        self.rx_lines = 0;
    }

    /// Get cumulative tx/rx bytes, commands sent and lines received
    pub fn counters(&self) -> (u64, u64, u64, u64) {
        (self.tx_bytes, self.rx_bytes, self.tx_commands, self.rx_lines)
    }

    /// Access the underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutable access to the underlying transport
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Unwrap the transport
    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Write a command, terminator included. No response is consumed.
    pub async fn send(&mut self, command: &Command) -> Result<(), ProtocolError> {
        if !command.is_probe() && !self.ready {
            return Err(ProtocolError::InvalidState(format!(
                "'{}' sent before the board reported ready",
                command.text
            )));
        }
        let bytes = command.to_bytes();
        debug!(command = %command.text, bytes = bytes.len(), "send");
        self.transport
            .write_bytes(&bytes)
            .await
            .map_err(|e| write_failed(&command.text, e))?;
        self.tx_bytes = self.tx_bytes.saturating_add(bytes.len() as u64);
        self.tx_commands = self.tx_commands.saturating_add(1);
        Ok(())
    }

    /// Write a raw payload. No terminator is appended and the bytes are not
    /// interpreted in any way.
    pub async fn send_raw(&mut self, payload: &[u8]) -> Result<(), ProtocolError> {
        if !self.ready {
            return Err(ProtocolError::InvalidState(
                "payload sent before the board reported ready".to_string(),
            ));
        }
        debug!(bytes = payload.len(), "send raw payload");
        self.transport
            .write_bytes(payload)
            .await
            .map_err(|e| write_failed("payload", e))?;
        self.tx_bytes = self.tx_bytes.saturating_add(payload.len() as u64);
        Ok(())
    }

    /// Wait for the next line, or time out.
    ///
    /// A timeout is an ordinary outcome here, not an error.
    pub async fn receive_line(&mut self, timeout: Duration) -> Result<Response, ProtocolError> {
        let response = self.transport.read_line(timeout).await?;
        match &response {
            Response::Line(line) => {
                debug!(%line, "recv");
                self.rx_bytes = self.rx_bytes.saturating_add(line.len() as u64);
                self.rx_lines = self.rx_lines.saturating_add(1);
            }
            Response::TimedOut => {
                trace!(timeout_ms = timeout.as_millis() as u64, "recv timed out");
            }
        }
        Ok(response)
    }

    /// Send a command and wait for its single-line response
    pub async fn send_and_receive(
        &mut self,
        command: &Command,
        timeout: Duration,
    ) -> Result<Response, ProtocolError> {
        self.send(command).await?;
        self.receive_line(timeout).await
    }

    /// Read and discard lines until the link stays quiet for `window`, or
    /// until `until` passes. Returns the discarded lines.
    pub async fn drain_stale(
        &mut self,
        window: Duration,
        until: Option<Instant>,
    ) -> Result<Vec<String>, ProtocolError> {
        let mut discarded = Vec::new();
        loop {
            let wait = match until {
                Some(until) => window.min(until.saturating_duration_since(Instant::now())),
                None => window,
            };
            if wait.is_zero() {
                break;
            }
            match self.receive_line(wait).await? {
                Response::Line(line) => {
                    debug!(%line, "discarding stale line");
                    discarded.push(line);
                }
                Response::TimedOut => break,
            }
        }
        Ok(discarded)
    }
}

fn write_failed(stage: &str, err: ProtocolError) -> ProtocolError {
    match err {
        ProtocolError::NotConnected => ProtocolError::NotConnected,
        other => ProtocolError::WriteFailed {
            stage: if stage.is_empty() {
                "probe".to_string()
            } else {
                stage.to_string()
            },
            reason: other.to_string(),
        },
    }
}
