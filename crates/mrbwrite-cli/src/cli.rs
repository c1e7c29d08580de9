//! Command line arguments

use std::path::PathBuf;

use clap::Parser;
use mrbwrite_core::config::{AckPolicy, FlashSettings, VersionCheck};

/// Write mruby/c bytecode to a board over its serial console
#[derive(Parser, Debug)]
#[command(name = "mrbwrite", version)]
#[command(about = "Write mruby/c bytecode (.mrb) to a board and run it")]
pub struct Cli {
    /// Bytecode files; several files are sent as one image, in order
    pub files: Vec<PathBuf>,

    /// Serial port (defaults to the first port found)
    #[arg(short, long)]
    pub port: Option<String>,

    /// Baud rate
    #[arg(short, long)]
    pub baud: Option<u32>,

    /// Settings file (JSON)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// List serial ports and exit
    #[arg(short, long)]
    pub list_ports: bool,

    /// Give up after this many banner probes
    #[arg(long, value_name = "N")]
    pub probe_attempts: Option<u32>,

    /// Give up if the board is not ready within this many seconds
    #[arg(long, value_name = "SECS")]
    pub wait: Option<u64>,

    /// Do not query the firmware version
    #[arg(long, conflicts_with = "require_version")]
    pub skip_version: bool,

    /// Refuse boards that do not report the expected bytecode version
    #[arg(long)]
    pub require_version: bool,

    /// Stream the image even if the board does not acknowledge `write`
    #[arg(long)]
    pub lenient: bool,

    /// Talk to a simulated board instead of a serial port
    #[arg(long)]
    pub simulate: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Apply command line overrides on top of file settings
    pub fn apply(&self, mut settings: FlashSettings) -> FlashSettings {
        if let Some(port) = &self.port {
            settings.connection.port_name = port.clone();
        }
        if let Some(baud) = self.baud {
            settings.connection.baud_rate = baud;
        }
        if let Some(attempts) = self.probe_attempts {
            settings.handshake.max_probe_attempts = Some(attempts);
        }
        if let Some(secs) = self.wait {
            settings.handshake.deadline_ms = Some(secs.saturating_mul(1000));
        }
        if self.skip_version {
            settings.handshake.version_check = VersionCheck::Skip;
        } else if self.require_version {
            settings.handshake.version_check = VersionCheck::Require;
        }
        if self.lenient {
            settings.upload.ack_policy = AckPolicy::Lenient;
        }
        settings
    }
}
