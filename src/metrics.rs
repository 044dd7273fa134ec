//! Process-wide counters for the telemetry pipeline.
//! Relaxed atomics only; `snapshot()` is what the API and `status` output read.
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

static FRAMES_TELEMETRY: AtomicU64 = AtomicU64::new(0);
static FRAMES_DEVICE_LOG: AtomicU64 = AtomicU64::new(0);
static FRAMES_MALFORMED: AtomicU64 = AtomicU64::new(0);

static LINK_OPENS: AtomicU64 = AtomicU64::new(0);
static LINK_OPEN_FAILURES: AtomicU64 = AtomicU64::new(0);
static LINK_LOSSES: AtomicU64 = AtomicU64::new(0);

static COMMANDS_ACKED: AtomicU64 = AtomicU64::new(0);
static COMMANDS_UNACKED: AtomicU64 = AtomicU64::new(0);
static COMMANDS_FAILED: AtomicU64 = AtomicU64::new(0);
static ACK_LATENCY_SUM_MS: AtomicU64 = AtomicU64::new(0);
static ACK_LATENCY_COUNT: AtomicU64 = AtomicU64::new(0);

static WEATHER_CACHE_HITS: AtomicU64 = AtomicU64::new(0);
static WEATHER_LOOKUPS: AtomicU64 = AtomicU64::new(0);
static WEATHER_FALLBACKS: AtomicU64 = AtomicU64::new(0);

static PREDICTIONS_OK: AtomicU64 = AtomicU64::new(0);
static PREDICTIONS_FAILED: AtomicU64 = AtomicU64::new(0);
static PREDICTIONS_UNAVAILABLE: AtomicU64 = AtomicU64::new(0);

pub fn inc_frame_telemetry() {
    FRAMES_TELEMETRY.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_frame_device_log() {
    FRAMES_DEVICE_LOG.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_frame_malformed() {
    FRAMES_MALFORMED.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_link_open() {
    LINK_OPENS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_link_open_failure() {
    LINK_OPEN_FAILURES.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_link_lost() {
    LINK_LOSSES.fetch_add(1, Ordering::Relaxed);
}

/// Record an acknowledged command and its write-to-ack latency.
pub fn observe_command_acked(sent_at: Instant) {
    COMMANDS_ACKED.fetch_add(1, Ordering::Relaxed);
    let ms = sent_at.elapsed().as_millis() as u64;
    ACK_LATENCY_SUM_MS.fetch_add(ms, Ordering::Relaxed);
    ACK_LATENCY_COUNT.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_command_unacked() {
    COMMANDS_UNACKED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_command_failed() {
    COMMANDS_FAILED.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_weather_cache_hit() {
    WEATHER_CACHE_HITS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_weather_lookup() {
    WEATHER_LOOKUPS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_weather_fallback() {
    WEATHER_FALLBACKS.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_prediction_ok() {
    PREDICTIONS_OK.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_prediction_failed() {
    PREDICTIONS_FAILED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_prediction_unavailable() {
    PREDICTIONS_UNAVAILABLE.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct Snapshot {
    pub frames_telemetry: u64,
    pub frames_device_log: u64,
    pub frames_malformed: u64,
    pub link_opens: u64,
    pub link_open_failures: u64,
    pub link_losses: u64,
    pub commands_acked: u64,
    pub commands_unacked: u64,
    pub commands_failed: u64,
    pub ack_latency_avg_ms: Option<u64>,
    pub weather_cache_hits: u64,
    pub weather_lookups: u64,
    pub weather_fallbacks: u64,
    pub predictions_ok: u64,
    pub predictions_failed: u64,
    pub predictions_unavailable: u64,
}

pub fn snapshot() -> Snapshot {
    let sum = ACK_LATENCY_SUM_MS.load(Ordering::Relaxed);
    let count = ACK_LATENCY_COUNT.load(Ordering::Relaxed);
    Snapshot {
        frames_telemetry: FRAMES_TELEMETRY.load(Ordering::Relaxed),
        frames_device_log: FRAMES_DEVICE_LOG.load(Ordering::Relaxed),
        frames_malformed: FRAMES_MALFORMED.load(Ordering::Relaxed),
        link_opens: LINK_OPENS.load(Ordering::Relaxed),
        link_open_failures: LINK_OPEN_FAILURES.load(Ordering::Relaxed),
        link_losses: LINK_LOSSES.load(Ordering::Relaxed),
        commands_acked: COMMANDS_ACKED.load(Ordering::Relaxed),
        commands_unacked: COMMANDS_UNACKED.load(Ordering::Relaxed),
        commands_failed: COMMANDS_FAILED.load(Ordering::Relaxed),
        ack_latency_avg_ms: if count > 0 { Some(sum / count) } else { None },
        weather_cache_hits: WEATHER_CACHE_HITS.load(Ordering::Relaxed),
        weather_lookups: WEATHER_LOOKUPS.load(Ordering::Relaxed),
        weather_fallbacks: WEATHER_FALLBACKS.load(Ordering::Relaxed),
        predictions_ok: PREDICTIONS_OK.load(Ordering::Relaxed),
        predictions_failed: PREDICTIONS_FAILED.load(Ordering::Relaxed),
        predictions_unavailable: PREDICTIONS_UNAVAILABLE.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Counters are global and other tests in the binary bump them too,
    // so only monotonic growth is asserted.
    #[test]
    fn counters_are_monotonic() {
        let before = snapshot();
        inc_frame_malformed();
        inc_weather_fallback();
        observe_command_acked(Instant::now());
        let after = snapshot();
        assert!(after.frames_malformed >= before.frames_malformed + 1);
        assert!(after.weather_fallbacks >= before.weather_fallbacks + 1);
        assert!(after.commands_acked >= before.commands_acked + 1);
        assert!(after.ack_latency_avg_ms.is_some());
    }
}
