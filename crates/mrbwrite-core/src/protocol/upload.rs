//! Bytecode upload
//!
//! Transfers an image to a ready console:
//!
//! 1. `write <N>\r\n` announces the payload length, the console acknowledges
//! 2. the N raw image bytes follow, with no terminator
//! 3. the console acknowledges the transfer (a missing reply is only a warning)
//! 4. `execute\r\n` starts the program
//!
//! With [`AckPolicy::Strict`] a missing or negative reply to step 1 aborts
//! before a single payload byte is written: a board that never entered write
//! mode would read the payload as console input.

use tracing::{info, warn};

use super::{CommandChannel, Command, ProtocolError, Response, Transport};
use crate::bytecode::BytecodeImage;
use crate::config::{AckPolicy, UploadSettings};

/// Prefix of a negative console reply
const ERROR_PREFIX: &str = "-ERR";

/// What the upload observed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReport {
    /// Payload bytes written
    pub bytes_sent: usize,
    /// CRC-32 of the payload
    pub checksum: u32,
    /// Reply to `write <N>`
    pub write_ack: Option<String>,
    /// Reply after the payload
    pub transfer_ack: Option<String>,
    /// Reply to `execute`
    pub execute_ack: Option<String>,
}

/// Sends an image to a ready board and starts it
pub struct BytecodeUploader {
    settings: UploadSettings,
}

impl BytecodeUploader {
    /// Create an uploader
    pub fn new(settings: UploadSettings) -> Self {
        Self { settings }
    }

    fn is_strict(&self) -> bool {
        self.settings.ack_policy == AckPolicy::Strict
    }

    /// Announce and stream `image` (steps 1-3)
    pub async fn upload<T: Transport>(
        &self,
        channel: &mut CommandChannel<T>,
        image: &BytecodeImage,
    ) -> Result<UploadReport, ProtocolError> {
        if !channel.is_ready() {
            return Err(ProtocolError::InvalidState(
                "upload attempted before handshake completed".to_string(),
            ));
        }
        let timeout = self.settings.ack_timeout();
        let mut report = UploadReport {
            checksum: image.checksum(),
            ..UploadReport::default()
        };
        info!(
            bytes = image.len(),
            crc32 = format_args!("{:#010x}", report.checksum),
            "uploading bytecode"
        );

        let announce = Command::write(image.len());
        match channel.send_and_receive(&announce, timeout).await? {
            Response::Line(line) => {
                if line.starts_with(ERROR_PREFIX) {
                    if self.is_strict() {
                        return Err(ProtocolError::Rejected {
                            command: announce.text,
                            response: line,
                        });
                    }
                    warn!(%line, "board rejected write, streaming anyway");
                }
                report.write_ack = Some(line);
            }
            Response::TimedOut => {
                if self.is_strict() {
                    return Err(ProtocolError::AckMissing {
                        command: announce.text,
                        timeout_ms: self.settings.ack_timeout_ms,
                    });
                }
                warn!("no acknowledgement for '{}', streaming anyway", announce.text);
            }
        }

        channel.send_raw(image.as_bytes()).await?;
        report.bytes_sent = image.len();

        match channel.receive_line(timeout).await? {
            Response::Line(line) => {
                info!(ack = %line, "transfer complete");
                report.transfer_ack = Some(line);
            }
            Response::TimedOut => {
                warn!(bytes = image.len(), "no acknowledgement after payload, continuing");
            }
        }
        Ok(report)
    }

    /// Start the uploaded program (step 4)
    pub async fn execute<T: Transport>(
        &self,
        channel: &mut CommandChannel<T>,
        report: &mut UploadReport,
    ) -> Result<(), ProtocolError> {
        let command = Command::execute();
        match channel
            .send_and_receive(&command, self.settings.ack_timeout())
            .await?
        {
            Response::Line(line) => {
                if line.starts_with(ERROR_PREFIX) && self.is_strict() {
                    return Err(ProtocolError::Rejected {
                        command: command.text,
                        response: line,
                    });
                }
                info!(ack = %line, "execution started");
                report.execute_ack = Some(line);
            }
            Response::TimedOut => warn!("no acknowledgement for 'execute'"),
        }
        Ok(())
    }
}
