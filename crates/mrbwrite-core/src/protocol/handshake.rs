//! Handshake sequencing
//!
//! Brings a board in an unknown state (mid-boot, idle at the prompt, or with
//! stale output still buffered) to a console that is known to be ready.
//!
//! The sequencer is an explicit state machine. Each call to
//! [`HandshakeSequencer::step`] performs one exchange; the attempt budget and
//! the overall deadline are checked before every exchange, so a board that
//! never answers cannot block the caller forever unless both are unset.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{
    CommandChannel, Command, ProtocolError, Response, Transport, BANNER_PREFIX, EXPECTED_VERSION,
};
use crate::config::{HandshakeSettings, VersionCheck};

/// Version queries allowed in `require` mode when no attempt limit is set
const MAX_VERSION_QUERIES: u32 = 3;

/// Handshake progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Sending empty lines until the banner appears
    ProbeBanner {
        /// Probes sent so far
        attempts: u32,
    },
    /// Querying the firmware version
    VersionCheck {
        /// Queries sent so far
        attempts: u32,
    },
    /// Console is ready for bytecode
    Ready,
}

/// What the handshake observed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandshakeReport {
    /// Number of probes sent, including the one answered by the banner
    pub probe_attempts: u32,
    /// The banner line
    pub banner: String,
    /// Reply to the version query, if one was sent and answered
    pub version: Option<String>,
    /// Whether the version reply named the expected bytecode version
    pub version_confirmed: bool,
    /// Late lines discarded after the banner
    pub discarded_lines: usize,
}

/// Drives the board console to the ready state
pub struct HandshakeSequencer {
    settings: HandshakeSettings,
    /// Timeout for the version query
    response_timeout: Duration,
    state: HandshakeState,
    started: Option<Instant>,
    report: HandshakeReport,
}

impl HandshakeSequencer {
    /// Create a sequencer; `response_timeout` bounds the version query
    pub fn new(settings: HandshakeSettings, response_timeout: Duration) -> Self {
        Self {
            settings,
            response_timeout,
            state: HandshakeState::ProbeBanner { attempts: 0 },
            started: None,
            report: HandshakeReport::default(),
        }
    }

    /// Current state
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Observations so far
    pub fn report(&self) -> &HandshakeReport {
        &self.report
    }

    /// Run until the console is ready or the budget is spent
    pub async fn run<T: Transport>(
        &mut self,
        channel: &mut CommandChannel<T>,
    ) -> Result<HandshakeReport, ProtocolError> {
        info!("waiting for board banner");
        loop {
            if self.step(channel).await? == HandshakeState::Ready {
                return Ok(self.report.clone());
            }
        }
    }

    /// Perform one exchange and return the new state
    pub async fn step<T: Transport>(
        &mut self,
        channel: &mut CommandChannel<T>,
    ) -> Result<HandshakeState, ProtocolError> {
        self.started.get_or_insert_with(Instant::now);
        self.state = match self.state {
            HandshakeState::ProbeBanner { attempts } => self.probe(channel, attempts).await?,
            HandshakeState::VersionCheck { attempts } => {
                self.check_version(channel, attempts).await?
            }
            HandshakeState::Ready => HandshakeState::Ready,
        };
        Ok(self.state)
    }

    /// Time left before the deadline, `None` if there is no deadline
    fn remaining(&self) -> Option<Duration> {
        let deadline = self.settings.deadline()?;
        let elapsed = self.started.map(|s| s.elapsed()).unwrap_or_default();
        Some(deadline.saturating_sub(elapsed))
    }

    /// Fail if another exchange would exceed the attempt budget or deadline
    fn check_budget(&self, attempts: u32) -> Result<(), ProtocolError> {
        if let Some(max) = self.settings.max_probe_attempts {
            if attempts >= max {
                return Err(ProtocolError::HandshakeExhausted { attempts });
            }
        }
        if self.remaining() == Some(Duration::ZERO) {
            return Err(self.deadline_exceeded(attempts));
        }
        Ok(())
    }

    fn deadline_exceeded(&self, attempts: u32) -> ProtocolError {
        ProtocolError::DeadlineExceeded {
            deadline_ms: self.settings.deadline_ms.unwrap_or_default(),
            attempts,
        }
    }

    /// Clip a per-exchange timeout to the time left
    fn bounded(&self, timeout: Duration) -> Duration {
        match self.remaining() {
            Some(left) => timeout.min(left),
            None => timeout,
        }
    }

    async fn probe<T: Transport>(
        &mut self,
        channel: &mut CommandChannel<T>,
        attempts: u32,
    ) -> Result<HandshakeState, ProtocolError> {
        self.check_budget(attempts)?;
        let attempt = attempts + 1;
        self.report.probe_attempts = attempt;

        let timeout = self.bounded(self.settings.probe_timeout());
        match channel.send_and_receive(&Command::probe(), timeout).await? {
            Response::Line(line) if line.starts_with(BANNER_PREFIX) => {
                info!(attempt, banner = %line, "board is ready");
                channel.mark_ready();
                self.report.banner = line;
                self.drain(channel).await?;
                Ok(match self.settings.version_check {
                    VersionCheck::Skip => HandshakeState::Ready,
                    _ => HandshakeState::VersionCheck { attempts: 0 },
                })
            }
            // Boot noise and empty lines count as "not yet"
            Response::Line(line) => {
                debug!(attempt, %line, "not the banner, probing again");
                Ok(HandshakeState::ProbeBanner { attempts: attempt })
            }
            Response::TimedOut => {
                debug!(attempt, "no banner yet, probing again");
                Ok(HandshakeState::ProbeBanner { attempts: attempt })
            }
        }
    }

    async fn drain<T: Transport>(
        &mut self,
        channel: &mut CommandChannel<T>,
    ) -> Result<(), ProtocolError> {
        let window = self.settings.drain_window();
        if window.is_zero() {
            return Ok(());
        }
        let until = self
            .started
            .zip(self.settings.deadline())
            .map(|(started, deadline)| started + deadline);
        let stale = channel.drain_stale(window, until).await?;
        if !stale.is_empty() {
            debug!(count = stale.len(), "discarded late probe replies");
        }
        self.report.discarded_lines = stale.len();
        // Console never went quiet before the deadline
        if self.remaining() == Some(Duration::ZERO) {
            return Err(self.deadline_exceeded(self.report.probe_attempts));
        }
        Ok(())
    }

    async fn check_version<T: Transport>(
        &mut self,
        channel: &mut CommandChannel<T>,
        attempts: u32,
    ) -> Result<HandshakeState, ProtocolError> {
        let require = self.settings.version_check == VersionCheck::Require;
        if require {
            let limit = self
                .settings
                .max_probe_attempts
                .unwrap_or(MAX_VERSION_QUERIES);
            if attempts >= limit || self.check_budget(attempts).is_err() {
                warn!(attempts, "version check gave up");
                return Err(ProtocolError::UnexpectedResponse {
                    expected: EXPECTED_VERSION.to_string(),
                    actual: self.report.version.clone().unwrap_or_default(),
                });
            }
        }
        let attempt = attempts + 1;

        let timeout = self.bounded(self.response_timeout);
        let response = channel
            .send_and_receive(&Command::version(), timeout)
            .await?;
        match response {
            Response::Line(line) => {
                let confirmed = line.contains(EXPECTED_VERSION);
                if confirmed {
                    info!(version = %line, "firmware version confirmed");
                } else {
                    warn!(version = %line, "firmware did not report {}", EXPECTED_VERSION);
                }
                self.report.version = Some(line);
                self.report.version_confirmed = confirmed;
                if confirmed || !require {
                    return Ok(HandshakeState::Ready);
                }
            }
            Response::TimedOut => {
                warn!(attempt, "no reply to version query");
                if !require {
                    return Ok(HandshakeState::Ready);
                }
            }
        }
        Ok(HandshakeState::VersionCheck { attempts: attempt })
    }
}
