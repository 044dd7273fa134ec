//! Shared pipeline state: latest reading, bounded history, link and pump status.
//!
//! [`state_store`] returns a cloneable read handle ([`StateStore`]) and exactly one
//! [`StateWriter`]. The writer is not `Clone`; the ingestion loop owns it, which makes
//! the single-writer contract a property of the types rather than a convention.
//!
//! Every update is a constant-size assignment under a `std::sync::RwLock`. Callers
//! compute records, predictions and weather before taking the lock, and readers always
//! get a consistent clone, never a partially updated record.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, PoisonError, RwLock};

use crate::telemetry::{
    ActuatorStatus, ConnectionState, PredictionResult, PumpCommand, Reading, TelemetryRecord,
};

/// Append-only ring of readings with FIFO eviction.
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    capacity: usize,
    entries: VecDeque<Reading>,
}

impl HistoryBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, reading: Reading) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(reading);
    }

    /// The most recent `limit` entries, oldest first.
    pub fn last(&self, limit: usize) -> Vec<Reading> {
        let skip = self.entries.len().saturating_sub(limit);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Who asked for a pump command. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CommandMode {
    #[default]
    Manual,
    Auto,
}

/// The last command written to the device and whether it was confirmed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandRecord {
    pub command: PumpCommand,
    pub mode: CommandMode,
    pub acknowledged: bool,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct Inner {
    current: Option<Reading>,
    history: HistoryBuffer,
    connection: ConnectionState,
    actuator: ActuatorStatus,
    last_command: Option<CommandRecord>,
    connected_since: Option<DateTime<Utc>>,
}

/// Consistent copy of the current state, shaped for the API layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateView {
    /// `None` until the first telemetry record is accepted.
    pub telemetry: Option<TelemetryRecord>,
    pub prediction: Option<PredictionResult>,
    pub connection: ConnectionState,
    pub actuator: ActuatorStatus,
    pub last_command: Option<CommandRecord>,
    pub connected_since: Option<DateTime<Utc>>,
    pub history_len: usize,
}

impl StateView {
    pub fn has_data(&self) -> bool {
        self.telemetry.is_some()
    }
}

/// Read handle. Cheap to clone and safe to share across request handlers.
#[derive(Debug, Clone)]
pub struct StateStore {
    inner: Arc<RwLock<Inner>>,
}

/// The only handle that can mutate the store.
#[derive(Debug)]
pub struct StateWriter {
    inner: Arc<RwLock<Inner>>,
}

/// Create a store with a history buffer of `history_capacity` entries.
pub fn state_store(history_capacity: usize) -> (StateStore, StateWriter) {
    let inner = Arc::new(RwLock::new(Inner {
        current: None,
        history: HistoryBuffer::new(history_capacity),
        connection: ConnectionState::Disconnected,
        actuator: ActuatorStatus::Unknown,
        last_command: None,
        connected_since: None,
    }));
    (
        StateStore {
            inner: inner.clone(),
        },
        StateWriter { inner },
    )
}

impl StateStore {
    pub fn snapshot(&self) -> StateView {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        StateView {
            telemetry: guard.current.as_ref().map(|r| r.telemetry.clone()),
            prediction: guard.current.as_ref().map(|r| r.prediction.clone()),
            connection: guard.connection,
            actuator: guard.actuator,
            last_command: guard.last_command.clone(),
            connected_since: guard.connected_since,
            history_len: guard.history.len(),
        }
    }

    /// The last `limit` readings, oldest first. `limit` is bounded by capacity.
    pub fn history(&self, limit: usize) -> Vec<Reading> {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        guard.history.last(limit.min(guard.history.capacity()))
    }

    pub fn latest(&self) -> Option<Reading> {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        guard.current.clone()
    }

    pub fn connection(&self) -> ConnectionState {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .connection
    }

    pub fn actuator(&self) -> ActuatorStatus {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .actuator
    }
}

impl StateWriter {
    /// A read handle onto the same state.
    pub fn store(&self) -> StateStore {
        StateStore {
            inner: self.inner.clone(),
        }
    }

    /// Replace the current reading and append it to history in one step.
    /// A device-reported relay state is applied in the same update.
    pub fn record(&mut self, reading: Reading) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(reported) = reading.telemetry.reported_pump {
            guard.actuator = reported.resulting_status();
        }
        guard.history.push(reading.clone());
        guard.current = Some(reading);
    }

    pub fn set_connection(&mut self, state: ConnectionState) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if guard.connection != state {
            guard.connected_since = match state {
                ConnectionState::Connected => Some(Utc::now()),
                ConnectionState::Disconnected => None,
            };
        }
        guard.connection = state;
    }

    /// Record a command that went out on the link. The actuator status only
    /// moves when the device acknowledged it.
    pub fn record_command(&mut self, record: CommandRecord) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if record.acknowledged {
            guard.actuator = record.command.resulting_status();
        }
        guard.last_command = Some(record);
    }
}
