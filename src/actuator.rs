//! Pump commands down the link with a bounded wait for the device's `ACK:` line.
//!
//! A missing acknowledgment is a result, not a link failure: the command may well
//! have reached the relay. Only an I/O error on the write or read is returned as
//! [`LinkError`], and that one does mean the link is gone.

use log::{info, warn};
use serde::Serialize;
use std::time::{Duration, Instant};

use crate::error::LinkError;
use crate::link::LineTransport;
use crate::logutil::escape_log;
use crate::metrics;
use crate::telemetry::decoder::is_ack;
use crate::telemetry::PumpCommand;

/// How one write ended on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    Acked(String),
    Unacknowledged,
}

/// Outcome plus every non-ack line read during the window. The caller decodes
/// those like any other input so telemetry arriving mid-window is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckReport {
    pub outcome: AckOutcome,
    pub other_lines: Vec<String>,
}

/// What a command issuer is told.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AckResult {
    Acked { ack: String },
    Unacknowledged,
    NotConnected,
    Failed { reason: String },
}

impl AckResult {
    /// Acked or unacknowledged: the line was written.
    pub fn was_sent(&self) -> bool {
        matches!(self, AckResult::Acked { .. } | AckResult::Unacknowledged)
    }

    pub fn message(&self) -> String {
        match self {
            AckResult::Acked { ack } => ack.clone(),
            AckResult::Unacknowledged => "command sent, no acknowledgment from device".to_string(),
            AckResult::NotConnected => LinkError::NotConnected.to_string(),
            AckResult::Failed { reason } => reason.clone(),
        }
    }
}

impl From<&AckOutcome> for AckResult {
    fn from(outcome: &AckOutcome) -> Self {
        match outcome {
            AckOutcome::Acked(line) => AckResult::Acked { ack: line.clone() },
            AckOutcome::Unacknowledged => AckResult::Unacknowledged,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ActuatorBridge {
    ack_window: Duration,
    poll_interval: Duration,
}

impl ActuatorBridge {
    pub fn new(ack_window: Duration) -> Self {
        Self {
            ack_window,
            poll_interval: Duration::from_millis(50),
        }
    }

    /// Write `command` and poll for an acknowledgment until the window closes.
    /// Blocks for at most the ack window plus one read timeout.
    pub fn send<T: LineTransport + ?Sized>(
        &self,
        link: &mut T,
        command: PumpCommand,
    ) -> Result<AckReport, LinkError> {
        let sent_at = Instant::now();
        if let Err(e) = link.write_line(command.as_wire()) {
            metrics::inc_command_failed();
            return Err(e);
        }
        let deadline = sent_at + self.ack_window;
        let mut other_lines = Vec::new();

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let line = match link.read_line(remaining.min(self.poll_interval)) {
                Ok(Some(line)) => line,
                Ok(None) => continue,
                Err(e) => {
                    metrics::inc_command_failed();
                    return Err(e);
                }
            };
            if is_ack(&line) {
                let ack = line.trim().to_string();
                info!("{} acknowledged: {}", command, escape_log(&ack));
                metrics::observe_command_acked(sent_at);
                return Ok(AckReport {
                    outcome: AckOutcome::Acked(ack),
                    other_lines,
                });
            }
            other_lines.push(line);
        }

        warn!(
            "{} not acknowledged within {}ms",
            command,
            self.ack_window.as_millis()
        );
        metrics::inc_command_unacked();
        Ok(AckReport {
            outcome: AckOutcome::Unacknowledged,
            other_lines,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_serializes_with_status_tag() {
        let v = serde_json::to_value(AckResult::Acked {
            ack: "ACK: Pump turned ON".into(),
        })
        .unwrap();
        assert_eq!(v["status"], "acked");
        assert_eq!(v["ack"], "ACK: Pump turned ON");
        let v = serde_json::to_value(AckResult::Unacknowledged).unwrap();
        assert_eq!(v["status"], "unacknowledged");
        assert!(AckResult::Unacknowledged.was_sent());
        assert!(!AckResult::NotConnected.was_sent());
    }
}
