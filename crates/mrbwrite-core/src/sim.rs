//! Simulated board - an in-process mruby/c console for testing
//!
//! Implements [`Transport`] without hardware. The board ignores a configurable
//! number of probes while "booting", then answers with the banner and handles
//! the `version`, `write`, and `execute` commands the way the firmware console
//! does. Every byte written is recorded so a session can be inspected
//! afterwards.

use std::collections::VecDeque;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::Instant;
use tracing::trace;

use crate::protocol::{ProtocolError, Response, Transport};

/// Banner printed once the simulated console is up
pub const SIM_BANNER: &str = "+OK mruby/c (simulated)";
/// Reply to `version`
pub const SIM_VERSION: &str = "+OK mruby/c RITE0300 (simulated)";
/// Reply to `write <N>`
pub const SIM_WRITE_ACK: &str = "+OK Write bytecode";
/// Reply once the announced payload has been received in full
pub const SIM_TRANSFER_ACK: &str = "+DONE";
/// Reply to `execute`
pub const SIM_EXECUTE_ACK: &str = "+OK Execute mruby/c.";

/// A line printed periodically once the console is up
struct Chatter {
    line: String,
    interval: Duration,
    next: Option<Instant>,
}

/// Simulated mruby/c board
pub struct SimulatedBoard {
    open: bool,
    opened_with: Option<(String, u32)>,
    open_calls: u32,
    close_calls: u32,
    fail_open: bool,
    fail_writes_after: Option<usize>,

    /// Probes ignored before the banner appears
    boot_probes: u32,
    /// Line printed for a probe while still booting
    boot_reply: Option<String>,
    probes_seen: u32,
    answers_probes: bool,
    version_reply: Option<String>,
    ack_write: bool,
    ack_transfer: bool,
    ack_execute: bool,
    response_delay: Duration,
    chatter: Option<Chatter>,

    /// Lines queued for the host, with the instant they become readable
    pending: VecDeque<(Instant, String)>,
    /// Command bytes not yet terminated by a newline
    line_buffer: Vec<u8>,
    /// Raw bytes still expected after `write <N>`
    payload_remaining: usize,
    payload: Vec<u8>,
    writes: Vec<Vec<u8>>,
    commands: Vec<String>,
    executed: bool,
}

impl Default for SimulatedBoard {
    fn default() -> Self {
        Self::ready()
    }
}

impl SimulatedBoard {
    /// A board whose console is already up and answers everything
    pub fn ready() -> Self {
        Self {
            open: false,
            opened_with: None,
            open_calls: 0,
            close_calls: 0,
            fail_open: false,
            fail_writes_after: None,
            boot_probes: 0,
            boot_reply: None,
            probes_seen: 0,
            answers_probes: true,
            version_reply: Some(SIM_VERSION.to_string()),
            ack_write: true,
            ack_transfer: true,
            ack_execute: true,
            response_delay: Duration::ZERO,
            chatter: None,
            pending: VecDeque::new(),
            line_buffer: Vec::new(),
            payload_remaining: 0,
            payload: Vec::new(),
            writes: Vec::new(),
            commands: Vec::new(),
            executed: false,
        }
    }

    /// A board that ignores the first `probes` probes while it boots
    pub fn booting(probes: u32) -> Self {
        Self {
            boot_probes: probes,
            ..Self::ready()
        }
    }

    /// A board that boots after a random number (0..=`max_probes`) of probes
    pub fn booting_random(max_probes: u32, seed: Option<u64>) -> Self {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::booting(rng.gen_range(0..=max_probes))
    }

    /// A board that never answers anything
    pub fn silent() -> Self {
        Self {
            answers_probes: false,
            version_reply: None,
            ack_write: false,
            ack_transfer: false,
            ack_execute: false,
            ..Self::ready()
        }
    }

    /// Print `line` for each probe received while booting
    pub fn with_boot_reply(mut self, line: impl Into<String>) -> Self {
        self.boot_reply = Some(line.into());
        self
    }

    /// Delay every reply by `delay`
    pub fn with_response_delay(mut self, delay: Duration) -> Self {
        self.response_delay = delay;
        self
    }

    /// Print `line` every `interval` once the banner has been sent, like a
    /// console that is still running a previous program
    pub fn with_chatter(mut self, line: impl Into<String>, interval: Duration) -> Self {
        self.chatter = Some(Chatter {
            line: line.into(),
            interval,
            next: None,
        });
        self
    }

    /// Reply to `version` with `line`, or not at all
    pub fn with_version_reply(mut self, line: Option<&str>) -> Self {
        self.version_reply = line.map(str::to_string);
        self
    }

    /// Do not acknowledge `write <N>`
    pub fn without_write_ack(mut self) -> Self {
        self.ack_write = false;
        self
    }

    /// Do not acknowledge the end of the payload
    pub fn without_transfer_ack(mut self) -> Self {
        self.ack_transfer = false;
        self
    }

    /// Do not acknowledge `execute`
    pub fn without_execute_ack(mut self) -> Self {
        self.ack_execute = false;
        self
    }

    /// Refuse to open
    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// Let `count` writes succeed, then fail every following write
    pub fn fail_writes_after(mut self, count: usize) -> Self {
        self.fail_writes_after = Some(count);
        self
    }

    /// Every chunk passed to `write_bytes`, in order
    pub fn writes(&self) -> &[Vec<u8>] {
        &self.writes
    }

    /// All bytes written, concatenated
    pub fn written(&self) -> Vec<u8> {
        self.writes.concat()
    }

    /// Console commands received (terminators removed), probes as ""
    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    /// Raw payload received after `write <N>`
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Number of probes received
    pub fn probes_seen(&self) -> u32 {
        self.probes_seen
    }

    /// Whether `execute` was received after a complete payload
    pub fn executed(&self) -> bool {
        self.executed
    }

    /// Port and baud rate of the last successful open
    pub fn opened_with(&self) -> Option<(&str, u32)> {
        self.opened_with.as_ref().map(|(p, b)| (p.as_str(), *b))
    }

    /// Number of `open` calls
    pub fn open_calls(&self) -> u32 {
        self.open_calls
    }

    /// Number of `close` calls
    pub fn close_calls(&self) -> u32 {
        self.close_calls
    }

    /// Whether the link is open
    pub fn is_open(&self) -> bool {
        self.open
    }

    fn reply(&mut self, line: impl Into<String>) {
        let at = Instant::now() + self.response_delay;
        self.pending.push_back((at, line.into()));
    }

    fn absorb(&mut self, mut bytes: &[u8]) {
        while !bytes.is_empty() {
            if self.payload_remaining > 0 {
                let take = self.payload_remaining.min(bytes.len());
                self.payload.extend_from_slice(&bytes[..take]);
                self.payload_remaining -= take;
                bytes = &bytes[take..];
                if self.payload_remaining == 0 && self.ack_transfer {
                    self.reply(SIM_TRANSFER_ACK);
                }
                continue;
            }
            match bytes.iter().position(|b| *b == b'\n') {
                Some(pos) => {
                    self.line_buffer.extend_from_slice(&bytes[..pos]);
                    bytes = &bytes[pos + 1..];
                    let raw = std::mem::take(&mut self.line_buffer);
                    let line = String::from_utf8_lossy(&raw)
                        .trim_end_matches('\r')
                        .to_string();
                    self.handle_command(line);
                }
                None => {
                    self.line_buffer.extend_from_slice(bytes);
                    bytes = &[];
                }
            }
        }
    }

    fn handle_command(&mut self, line: String) {
        trace!(%line, "simulated board received");
        self.commands.push(line.clone());
        let mut words = line.split_whitespace();
        match words.next() {
            None => {
                self.probes_seen += 1;
                if !self.answers_probes {
                    return;
                }
                if self.probes_seen > self.boot_probes {
                    self.reply(SIM_BANNER);
                    let banner_at = Instant::now() + self.response_delay;
                    if let Some(chatter) = self.chatter.as_mut() {
                        if chatter.next.is_none() {
                            chatter.next = Some(banner_at + chatter.interval);
                        }
                    }
                } else if let Some(noise) = self.boot_reply.clone() {
                    self.reply(noise);
                }
            }
            Some("version") => {
                if let Some(version) = self.version_reply.clone() {
                    self.reply(version);
                }
            }
            Some("write") => match words.next().and_then(|n| n.parse::<usize>().ok()) {
                Some(len) => {
                    self.payload.clear();
                    self.payload_remaining = len;
                    if self.ack_write {
                        self.reply(SIM_WRITE_ACK);
                    }
                }
                None => self.reply("-ERR Illegal length."),
            },
            Some("execute") => {
                self.executed = self.payload_remaining == 0 && !self.payload.is_empty();
                if self.ack_execute {
                    self.reply(SIM_EXECUTE_ACK);
                }
            }
            Some(_) => self.reply("-ERR Illegal command."),
        }
    }
}

#[async_trait]
impl Transport for SimulatedBoard {
    async fn open(&mut self, port: &str, baud_rate: u32) -> Result<(), ProtocolError> {
        self.open_calls += 1;
        if self.fail_open {
            return Err(ProtocolError::PortNotFound(port.to_string()));
        }
        if self.open {
            return Err(ProtocolError::AlreadyConnected);
        }
        self.open = true;
        self.opened_with = Some((port.to_string(), baud_rate));
        self.pending.clear();
        self.line_buffer.clear();
        self.payload_remaining = 0;
        if let Some(chatter) = self.chatter.as_mut() {
            chatter.next = None;
        }
        Ok(())
    }

    async fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        if !self.open {
            return Err(ProtocolError::NotConnected);
        }
        if let Some(limit) = self.fail_writes_after {
            if self.writes.len() >= limit {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged").into());
            }
        }
        self.writes.push(bytes.to_vec());
        self.absorb(bytes);
        Ok(())
    }

    async fn read_line(&mut self, timeout: Duration) -> Result<Response, ProtocolError> {
        if !self.open {
            return Err(ProtocolError::NotConnected);
        }
        let deadline = Instant::now() + timeout;
        let queued = self.pending.front().map(|(at, _)| *at);
        let chatter = self.chatter.as_ref().and_then(|c| c.next);
        let next = match (queued, chatter) {
            (Some(q), Some(c)) => Some(q.min(c)),
            (q, c) => q.or(c),
        };
        match next {
            Some(at) if at <= deadline => {
                tokio::time::sleep_until(at).await;
                if queued == Some(at) {
                    let line = self.pending.pop_front().map(|(_, line)| line);
                    return Ok(line.map_or(Response::TimedOut, Response::Line));
                }
                match self.chatter.as_mut() {
                    Some(chatter) => {
                        chatter.next = Some(at + chatter.interval);
                        Ok(Response::Line(chatter.line.clone()))
                    }
                    None => Ok(Response::TimedOut),
                }
            }
            _ => {
                tokio::time::sleep_until(deadline).await;
                Ok(Response::TimedOut)
            }
        }
    }

    async fn close(&mut self) -> Result<(), ProtocolError> {
        self.close_calls += 1;
        self.open = false;
        Ok(())
    }
}
