//! mrbwrite: write mruby/c bytecode to a board over its serial console

mod cli;
mod files;
mod logging;

use anyhow::{bail, Context, Result};
use clap::Parser;
use mrbwrite_core::bytecode::BytecodeImage;
use mrbwrite_core::config::FlashSettings;
use mrbwrite_core::protocol::{
    list_ports, PortInfo, SerialTransport, SessionController, SessionReport, Transport,
};
use mrbwrite_core::sim::SimulatedBoard;
use tracing::info;

use crate::cli::Cli;

/// Port name used with `--simulate` when none is given
const SIMULATED_PORT: &str = "simulated";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    if cli.list_ports {
        print_ports(&list_ports());
        return Ok(());
    }

    if cli.files.is_empty() {
        bail!("no bytecode file given (see --help)");
    }

    let file_settings = FlashSettings::load_or_default(cli.config.as_deref())
        .context("failed to load settings")?;
    let mut settings = cli.apply(file_settings);
    let image = files::load_images(&cli.files)?;

    if settings.connection.port_name.is_empty() {
        settings.connection.port_name = if cli.simulate {
            SIMULATED_PORT.to_string()
        } else {
            pick_port(&list_ports())?
        };
    }

    let report = if cli.simulate {
        info!("using simulated board");
        flash(SimulatedBoard::booting_random(4, None), settings, &image).await?
    } else {
        flash(SerialTransport::new(), settings, &image).await?
    };

    print_report(&report);
    Ok(())
}

async fn flash<T: Transport>(
    transport: T,
    settings: FlashSettings,
    image: &BytecodeImage,
) -> Result<SessionReport> {
    let port = settings.connection.port_name.clone();
    let mut session = SessionController::new(transport, settings);
    let report = session
        .run(image)
        .await
        .with_context(|| format!("flashing via {} failed", port))?;
    Ok(report)
}

/// First enumerated port, used when none was configured
fn pick_port(ports: &[PortInfo]) -> Result<String> {
    match ports.first() {
        Some(port) => {
            info!(port = %port.name, "no port given, using {}", port.description());
            Ok(port.name.clone())
        }
        None => bail!("no serial port found; connect the board or pass -p <port>"),
    }
}

fn print_ports(ports: &[PortInfo]) {
    if ports.is_empty() {
        println!("No serial ports found");
        return;
    }
    for port in ports {
        println!("{}\t{}", port.name, port.description());
    }
}

fn print_report(report: &SessionReport) {
    let (tx_bytes, rx_bytes, _, _) = report.counters;
    println!(
        "{} @ {} baud: ready after {} probe(s)",
        report.port_name, report.baud_rate, report.handshake.probe_attempts
    );
    if let Some(version) = &report.handshake.version {
        println!("  firmware: {}", version);
    }
    println!(
        "  wrote {} bytes (crc32 {:08x})",
        report.upload.bytes_sent, report.upload.checksum
    );
    for (label, ack) in [
        ("write", &report.upload.write_ack),
        ("transfer", &report.upload.transfer_ack),
        ("execute", &report.upload.execute_ack),
    ] {
        println!("  {:<9} {}", label, ack.as_deref().unwrap_or("(no reply)"));
    }
    println!("  {} bytes out, {} bytes in", tx_bytes, rx_bytes);
}
