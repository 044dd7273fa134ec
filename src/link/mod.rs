//! # Device Link
//!
//! The physical connection to the field controller, reduced to two traits:
//!
//! - [`Connector`] opens a fresh connection (one OS handle at a time).
//! - [`LineTransport`] reads and writes newline-terminated UTF-8 lines on it.
//!
//! Both are synchronous: serial drivers block with a timeout, so the ingestion loop
//! runs them on tokio's blocking pool. A read that times out returns `Ok(None)`;
//! any other I/O failure is [`LinkError::Lost`] and the caller must reconnect.
//!
//! ```rust,no_run
//! # #[cfg(feature = "serial")]
//! # {
//! use agrolink::link::{Connector, LineTransport};
//! use agrolink::link::serial::SerialConnector;
//! use std::time::Duration;
//!
//! let connector = SerialConnector::new("/dev/ttyUSB0", 115200, Duration::from_secs(2));
//! let mut link = connector.open().expect("open");
//! while let Ok(Some(line)) = link.read_line(Duration::from_millis(250)) {
//!     println!("{}", line);
//! }
//! # }
//! ```

#[cfg(feature = "serial")]
pub mod serial;

use std::time::Duration;

use crate::error::LinkError;

/// An open, line-oriented connection to the device.
pub trait LineTransport: Send {
    /// Wait at most `timeout` for one complete line (without the terminator).
    /// `Ok(None)` means nothing complete arrived; that is not an error.
    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, LinkError>;

    /// Write `text` followed by `\n`.
    fn write_line(&mut self, text: &str) -> Result<(), LinkError>;

    /// Release the OS handle. Further reads/writes fail with `NotConnected`.
    fn close(&mut self) {}
}

/// Opens connections to one configured device address.
pub trait Connector: Send + Sync + 'static {
    type Transport: LineTransport + 'static;

    fn open(&self) -> Result<Self::Transport, LinkError>;

    /// Human-readable address for logs (`/dev/ttyUSB0@115200`).
    fn address(&self) -> String;
}

/// Longest line kept while waiting for a terminator. The firmware's JSON
/// document is capped at 256 bytes, so anything this long is noise.
pub const MAX_LINE_BYTES: usize = 4096;

/// Reassembles lines from arbitrary byte chunks.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(512),
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
        if self.buf.len() > MAX_LINE_BYTES && !self.buf.contains(&b'\n') {
            log::warn!(
                "Discarding {} bytes without a line terminator",
                self.buf.len()
            );
            self.buf.clear();
        }
    }

    /// Next complete line, with `\r\n` or `\n` stripped. Invalid UTF-8 is replaced.
    pub fn next_line(&mut self) -> Option<String> {
        let pos = self.buf.iter().position(|&b| b == b'\n')?;
        let mut raw: Vec<u8> = self.buf.drain(..=pos).collect();
        raw.pop();
        if raw.last() == Some(&b'\r') {
            raw.pop();
        }
        match String::from_utf8(raw) {
            Ok(s) => Some(s),
            Err(e) => {
                let bytes = e.into_bytes();
                log::trace!(
                    "Non UTF-8 line: {}",
                    crate::logutil::hex_snippet(&bytes, 32)
                );
                Some(String::from_utf8_lossy(&bytes).into_owned())
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}
