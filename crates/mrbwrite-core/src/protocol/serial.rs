//! Serial port handling
//!
//! Provides port enumeration and the [`SerialTransport`] used to talk to a
//! real board.

use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serialport::{SerialPortInfo, SerialPortType};
use tokio_serial::{SerialPort, SerialStream};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use super::{ConsoleLineCodec, ProtocolError, Response, Transport};

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Manufacturer name (if available)
    pub manufacturer: Option<String>,

    /// Product name (if available)
    pub product: Option<String>,
}

impl PortInfo {
    fn bare(name: String) -> Self {
        Self {
            name,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
        }
    }

    /// Human readable description of the device behind the port
    pub fn description(&self) -> String {
        match (&self.manufacturer, &self.product) {
            (Some(m), Some(p)) => format!("{} {}", m, p),
            (Some(m), None) => m.clone(),
            (None, Some(p)) => p.clone(),
            (None, None) => match (self.vid, self.pid) {
                (Some(vid), Some(pid)) => format!("USB {:04x}:{:04x}", vid, pid),
                _ => "serial port".to_string(),
            },
        }
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (vid, pid, manufacturer, product) = match info.port_type {
            SerialPortType::UsbPort(usb_info) => (
                Some(usb_info.vid),
                Some(usb_info.pid),
                usb_info.manufacturer,
                usb_info.product,
            ),
            _ => (None, None, None, None),
        };

        Self {
            name: info.port_name,
            vid,
            pid,
            manufacturer,
            product,
        }
    }
}

/// Helper used to sort port names so that:
///  - ttyUSB* ports come first (sorted numerically by suffix)
///  - then ttyACM* ports (sorted numerically)
///  - then other ports (sorted by name)
///
/// USB-serial bridges are the usual way mruby/c boards are attached.
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    if let Some(rest) = basename.strip_prefix("ttyUSB") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (0, num, basename.to_string());
    }
    if let Some(rest) = basename.strip_prefix("ttyACM") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (1, num, basename.to_string());
    }
    (2, 0, basename.to_string())
}

/// List all available serial ports, with /dev fallbacks and deterministic ordering
pub fn list_ports() -> Vec<PortInfo> {
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    match serialport::available_ports() {
        Ok(ports) => {
            for info in ports {
                let p = PortInfo::from(info);
                map.entry(p.name.clone()).or_insert(p);
            }
        }
        Err(e) => warn!("port enumeration failed: {}", e),
    }

    // Linux-only: Add /dev/ttyACM* and /dev/ttyUSB* entries if present but not found by API
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if fname.starts_with("ttyACM") || fname.starts_with("ttyUSB") {
                    let full = format!("/dev/{}", fname);
                    map.entry(full.clone())
                        .or_insert_with(|| PortInfo::bare(full));
                }
            }
        }
    }

    let mut v: Vec<PortInfo> = map.into_values().collect();
    v.sort_by_key(|p| port_sort_key(&p.name));
    v
}

/// [`Transport`] over a real serial port
pub struct SerialTransport {
    framed: Option<Framed<SerialStream, ConsoleLineCodec>>,
    port_name: String,
}

impl Default for SerialTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialTransport {
    /// Create a transport (not yet open)
    pub fn new() -> Self {
        Self {
            framed: None,
            port_name: String::new(),
        }
    }

    /// Whether the port is currently open
    pub fn is_open(&self) -> bool {
        self.framed.is_some()
    }
}

/// Open a serial port with the console's 8N1 settings
fn open_stream(name: &str, baud_rate: u32) -> Result<SerialStream, ProtocolError> {
    let builder = tokio_serial::new(name, baud_rate)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .flow_control(tokio_serial::FlowControl::None)
        .timeout(Duration::from_millis(100));
    let mut stream = SerialStream::open(&builder)?;

    // Keep DTR asserted; toggling it resets some USB-serial boards
    if let Err(e) = stream.write_data_terminal_ready(true) {
        debug!(port = name, "failed to set DTR high: {} (continuing)", e);
    }
    stream.clear(tokio_serial::ClearBuffer::All)?;
    Ok(stream)
}

#[async_trait]
impl Transport for SerialTransport {
    async fn open(&mut self, port: &str, baud_rate: u32) -> Result<(), ProtocolError> {
        if self.framed.is_some() {
            return Err(ProtocolError::AlreadyConnected);
        }
        let stream = open_stream(port, baud_rate)?;
        self.framed = Some(Framed::new(stream, ConsoleLineCodec::new()));
        self.port_name = port.to_string();
        info!(port, baud_rate, "serial port opened");
        Ok(())
    }

    async fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        let framed = self.framed.as_mut().ok_or(ProtocolError::NotConnected)?;
        framed.send(bytes).await?;
        Ok(())
    }

    async fn read_line(&mut self, timeout: Duration) -> Result<Response, ProtocolError> {
        let framed = self.framed.as_mut().ok_or(ProtocolError::NotConnected)?;
        // Framed keeps partially received bytes in its own buffer, so dropping
        // the pending `next()` on timeout loses nothing.
        match tokio::time::timeout(timeout, framed.next()).await {
            Ok(Some(Ok(line))) => Ok(Response::Line(line)),
            Ok(Some(Err(e))) => Err(e.into()),
            Ok(None) => Err(ProtocolError::SerialError(format!(
                "{} closed by device",
                self.port_name
            ))),
            Err(_) => Ok(Response::TimedOut),
        }
    }

    async fn close(&mut self) -> Result<(), ProtocolError> {
        if let Some(mut framed) = self.framed.take() {
            let flushed = framed.flush().await;
            drop(framed);
            info!(port = %self.port_name, "serial port closed");
            flushed?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_ports() {
        // This test just ensures the function doesn't panic
        let ports = list_ports();
        for port in &ports {
            println!("Found port: {} - {}", port.name, port.description());
        }
    }

    #[test]
    fn test_port_sorting() {
        let names = vec![
            "/dev/ttyACM1",
            "/dev/ttyUSB1",
            "/dev/ttyUSB0",
            "/dev/someport",
            "/dev/ttyACM0",
            "/dev/ttyUSB10",
        ];
        let mut ports: Vec<PortInfo> = names
            .into_iter()
            .map(|n| PortInfo::bare(n.to_string()))
            .collect();

        ports.sort_by_key(|p| port_sort_key(&p.name));
        let ordered: Vec<String> = ports.into_iter().map(|p| p.name).collect();

        assert_eq!(
            ordered,
            vec![
                "/dev/ttyUSB0",
                "/dev/ttyUSB1",
                "/dev/ttyUSB10",
                "/dev/ttyACM0",
                "/dev/ttyACM1",
                "/dev/someport",
            ]
        );
    }

    #[test]
    fn test_port_description() {
        let mut port = PortInfo::bare("/dev/ttyUSB0".to_string());
        assert_eq!(port.description(), "serial port");
        port.vid = Some(0x0403);
        port.pid = Some(0x6001);
        assert_eq!(port.description(), "USB 0403:6001");
        port.manufacturer = Some("FTDI".to_string());
        port.product = Some("FT232R".to_string());
        assert_eq!(port.description(), "FTDI FT232R");
    }

    #[tokio::test]
    async fn test_unopened_transport_rejects_io() {
        let mut transport = SerialTransport::new();
        assert!(!transport.is_open());
        let err = transport.write_bytes(b"\n").await.unwrap_err();
        assert!(matches!(err, ProtocolError::NotConnected));
        let err = transport
            .read_line(Duration::from_millis(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::NotConnected));
        // Closing twice is harmless
        transport.close().await.unwrap();
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_open_missing_port_fails() {
        let mut transport = SerialTransport::new();
        let result = transport.open("/dev/does-not-exist-mrbwrite", 19200).await;
        assert!(result.is_err());
        assert!(!transport.is_open());
    }
}
