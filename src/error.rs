//! Typed error enums for the device link, weather lookups and the predictor.
//!
//! Each failure class the ingestion loop has to react to differently gets its own
//! type, so transient link loss, a failed weather call and a broken model are never
//! told apart by inspecting strings.

use thiserror::Error;

/// Errors raised by a [`LineTransport`](crate::link::LineTransport) or a
/// [`Connector`](crate::link::Connector).
#[derive(Debug, Error)]
pub enum LinkError {
    /// The serial device could not be opened.
    #[error("failed to open {port} at {baud} baud: {reason}")]
    Open {
        port: String,
        baud: u32,
        reason: String,
    },

    /// Any read/write failure on an open link. The caller must reconnect.
    #[error("link lost: {0}")]
    Lost(#[from] std::io::Error),

    /// Returned to command issuers while the ingestion loop has no open link.
    #[error("device link is not connected")]
    NotConnected,
}

impl LinkError {
    /// True for failures that mean the open handle is gone.
    pub fn is_lost(&self) -> bool {
        matches!(self, LinkError::Lost(_))
    }
}

/// Errors from the external weather lookup. None of these escape the
/// [`WeatherCache`](crate::weather::WeatherCache); they select the fallback snapshot.
#[derive(Debug, Error)]
pub enum WeatherError {
    #[error("weather request timed out after {0}s")]
    Timeout(u64),

    #[error("weather request failed: {0}")]
    Request(String),

    #[error("weather API returned status {0}")]
    Status(u16),

    #[error("failed to parse weather response: {0}")]
    Parse(String),
}

/// Errors from invoking the opaque crop predictor.
#[derive(Debug, Error)]
pub enum PredictorError {
    #[error("predictor timed out after {0}ms")]
    Timeout(u64),

    #[error("predictor invocation failed: {0}")]
    Invocation(String),

    #[error("predictor returned no label")]
    EmptyOutput,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
