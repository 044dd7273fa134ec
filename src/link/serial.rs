//! Serial-port implementation of the device link (`serialport` crate).

use log::{debug, info};
use serialport::SerialPort;
use std::io::{Read, Write};
use std::time::{Duration, Instant};

use super::{Connector, LineBuffer, LineTransport};
use crate::error::LinkError;

/// Opens the configured serial port with the handshake ESP32 boards expect.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    port_name: String,
    baud_rate: u32,
    settle: Duration,
}

impl SerialConnector {
    pub fn new(port_name: &str, baud_rate: u32, settle: Duration) -> Self {
        Self {
            port_name: port_name.to_string(),
            baud_rate,
            settle,
        }
    }
}

impl Connector for SerialConnector {
    type Transport = SerialLink;

    fn open(&self) -> Result<SerialLink, LinkError> {
        debug!(
            "Opening serial port {} at {} baud",
            self.port_name, self.baud_rate
        );
        let open_err = |reason: String| LinkError::Open {
            port: self.port_name.clone(),
            baud: self.baud_rate,
            reason,
        };

        let mut builder =
            serialport::new(self.port_name.as_str(), self.baud_rate).timeout(Duration::from_millis(500));
        // Some USB serial adapters need explicit settings
        #[cfg(unix)]
        {
            builder = builder
                .data_bits(serialport::DataBits::Eight)
                .stop_bits(serialport::StopBits::One)
                .parity(serialport::Parity::None);
        }
        let mut port = builder.open().map_err(|e| open_err(e.to_string()))?;

        // Toggle DTR/RTS to reset/ensure device wakes (common for ESP32 based boards)
        let _ = port.write_data_terminal_ready(true);
        let _ = port.write_request_to_send(true);
        std::thread::sleep(self.settle);

        // Clear buffered boot text so the first decoded line is current
        let mut purged = 0usize;
        let mut purge_buf = [0u8; 512];
        if let Ok(available) = port.bytes_to_read() {
            if available > 0 {
                purged = port.read(&mut purge_buf).unwrap_or(0);
            }
        }
        debug!("Serial port initialized, purged {} buffered bytes", purged);
        info!("Opened {}", self.address());

        Ok(SerialLink {
            name: self.address(),
            port: Some(port),
            lines: LineBuffer::new(),
        })
    }

    fn address(&self) -> String {
        format!("{}@{}", self.port_name, self.baud_rate)
    }
}

/// An open serial connection. Closing drops the OS handle.
pub struct SerialLink {
    name: String,
    port: Option<Box<dyn SerialPort>>,
    lines: LineBuffer,
}

impl LineTransport for SerialLink {
    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, LinkError> {
        if let Some(line) = self.lines.next_line() {
            return Ok(Some(line));
        }
        let port = self.port.as_mut().ok_or(LinkError::NotConnected)?;
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; 256];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            port.set_timeout(remaining)
                .map_err(|e| LinkError::Lost(e.into()))?;
            match port.read(&mut chunk) {
                Ok(0) => std::thread::sleep(Duration::from_millis(5)),
                Ok(n) => {
                    self.lines.push(&chunk[..n]);
                    if let Some(line) = self.lines.next_line() {
                        return Ok(Some(line));
                    }
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => return Ok(None),
                Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => {
                    debug!("Serial read interrupted (EINTR), likely shutdown in progress");
                }
                Err(e) => return Err(LinkError::Lost(e)),
            }
        }
    }

    fn write_line(&mut self, text: &str) -> Result<(), LinkError> {
        let port = self.port.as_mut().ok_or(LinkError::NotConnected)?;
        port.write_all(text.as_bytes())?;
        port.write_all(b"\n")?;
        port.flush()?;
        Ok(())
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            info!("Closed {}", self.name);
        }
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        self.close();
    }
}
