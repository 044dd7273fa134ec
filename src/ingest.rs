//! # Ingestion Loop
//!
//! The one long-lived task that owns the device link and is the single writer of
//! the [`StateStore`](crate::state::StateStore).
//!
//! ```text
//!   Disconnected --open ok--> Connecting --> Reading --link lost--> Disconnected
//!        |  ^                                   |
//!        +--+ open failed: sleep backoff        +-- Shutdown / channel closed --> stop
//! ```
//!
//! Request handlers never touch the link. They hold a [`LinkHandle`] and send
//! [`ControlMessage`]s; the loop services them between reads, so link writes and
//! ack reads are serialized by construction. Blocking link I/O runs on tokio's
//! blocking pool with the transport moved in and handed back.

use chrono::Utc;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot};

use crate::actuator::{AckOutcome, AckResult, ActuatorBridge};
use crate::config::DeviceConfig;
use crate::link::{Connector, LineTransport};
use crate::logutil::escape_log;
use crate::metrics;
use crate::predict::PredictionStep;
use crate::state::{CommandMode, CommandRecord, StateStore, StateWriter};
use crate::telemetry::decoder::{self, Frame};
use crate::telemetry::{ConnectionState, PumpCommand, Reading, SensorPayload};
use crate::weather::{WeatherCache, WeatherSource};

/// Open failures between repeated standing warnings.
const STANDING_WARNING_EVERY: u32 = 12;

/// Requests from other tasks to the ingestion loop.
#[derive(Debug)]
pub enum ControlMessage {
    Shutdown,
    /// Write a pump command and report the acknowledgment outcome.
    Actuate {
        command: PumpCommand,
        mode: CommandMode,
        response_tx: oneshot::Sender<AckResult>,
    },
    /// Telemetry that arrived over HTTP instead of the serial line.
    PushTelemetry {
        payload: SensorPayload,
        response_tx: oneshot::Sender<Reading>,
    },
}

/// Cloneable sender side of the loop's control channel.
#[derive(Debug, Clone)]
pub struct LinkHandle {
    control_tx: mpsc::UnboundedSender<ControlMessage>,
}

impl LinkHandle {
    pub async fn actuate(&self, command: PumpCommand, mode: CommandMode) -> AckResult {
        let (response_tx, response_rx) = oneshot::channel();
        let msg = ControlMessage::Actuate {
            command,
            mode,
            response_tx,
        };
        if self.control_tx.send(msg).is_err() {
            return AckResult::Failed {
                reason: "ingestion loop is not running".to_string(),
            };
        }
        response_rx.await.unwrap_or_else(|_| AckResult::Failed {
            reason: "ingestion loop stopped before replying".to_string(),
        })
    }

    /// Process pushed telemetry exactly like a decoded serial frame.
    /// `None` if the loop is gone.
    pub async fn push_telemetry(&self, payload: SensorPayload) -> Option<Reading> {
        let (response_tx, response_rx) = oneshot::channel();
        self.control_tx
            .send(ControlMessage::PushTelemetry {
                payload,
                response_tx,
            })
            .ok()?;
        response_rx.await.ok()
    }

    pub fn shutdown(&self) {
        let _ = self.control_tx.send(ControlMessage::Shutdown);
    }

    pub fn is_running(&self) -> bool {
        !self.control_tx.is_closed()
    }
}

/// Process stop requests: Ctrl-C, plus SIGTERM on unix so `kill <pid>` against a
/// daemonized service takes the same [`LinkHandle::shutdown`] path.
///
/// Install it before starting the loop; a SIGTERM that arrives earlier still
/// terminates the process.
pub struct ShutdownSignal {
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl ShutdownSignal {
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {
            #[cfg(unix)]
            terminate: tokio::signal::unix::signal(
                tokio::signal::unix::SignalKind::terminate(),
            )?,
        })
    }

    pub async fn recv(&mut self) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            tokio::select! {
                res = tokio::signal::ctrl_c() => res,
                _ = self.terminate.recv() => {
                    info!("SIGTERM received");
                    Ok(())
                }
            }
        }
        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await
        }
    }
}

/// Timing knobs, taken from `[device]`.
#[derive(Debug, Clone)]
pub struct LoopTuning {
    pub read_timeout: Duration,
    pub reconnect_backoff: Duration,
    pub ack_window: Duration,
    pub auto_actuate: bool,
}

impl LoopTuning {
    pub fn from_config(device: &DeviceConfig) -> Self {
        Self {
            read_timeout: device.read_timeout(),
            reconnect_backoff: device.reconnect_backoff(),
            ack_window: device.ack_window(),
            auto_actuate: device.auto_actuate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

pub struct IngestionLoop<C: Connector, S> {
    connector: Arc<C>,
    writer: StateWriter,
    store: StateStore,
    weather: Arc<WeatherCache<S>>,
    prediction: PredictionStep,
    bridge: ActuatorBridge,
    tuning: LoopTuning,
    control_rx: mpsc::UnboundedReceiver<ControlMessage>,
}

impl<C, S> IngestionLoop<C, S>
where
    C: Connector,
    S: WeatherSource + 'static,
{
    pub fn new(
        connector: C,
        writer: StateWriter,
        weather: Arc<WeatherCache<S>>,
        prediction: PredictionStep,
        tuning: LoopTuning,
    ) -> (Self, LinkHandle) {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let store = writer.store();
        let ingestion = Self {
            connector: Arc::new(connector),
            writer,
            store,
            weather,
            prediction,
            bridge: ActuatorBridge::new(tuning.ack_window),
            tuning,
            control_rx,
        };
        (ingestion, LinkHandle { control_tx })
    }

    /// Run until [`ControlMessage::Shutdown`] or until every [`LinkHandle`] is dropped.
    pub async fn run(mut self) {
        info!("Starting ingestion loop on {}", self.connector.address());
        let mut failures: u32 = 0;

        loop {
            // Disconnected
            let connector = self.connector.clone();
            let opened = match tokio::task::spawn_blocking(move || connector.open()).await {
                Ok(Ok(transport)) => Some(transport),
                Ok(Err(e)) => {
                    self.report_open_failure(&mut failures, &e.to_string());
                    None
                }
                Err(e) => {
                    self.report_open_failure(&mut failures, &e.to_string());
                    None
                }
            };
            let Some(transport) = opened else {
                if self.wait_backoff().await == Flow::Stop {
                    break;
                }
                continue;
            };

            // Connecting
            if failures > 0 {
                info!(
                    "Device link {} recovered after {} failed attempts",
                    self.connector.address(),
                    failures
                );
            }
            failures = 0;
            metrics::inc_link_open();
            self.writer.set_connection(ConnectionState::Connected);
            info!("Device link connected: {}", self.connector.address());

            // Reading
            let mut link = Some(transport);
            let flow = self.read_until_lost(&mut link).await;
            if let Some(mut transport) = link.take() {
                transport.close();
            }
            self.writer.set_connection(ConnectionState::Disconnected);
            if flow == Flow::Stop {
                break;
            }
            warn!("Device link {} disconnected, reopening", self.connector.address());
        }

        self.writer.set_connection(ConnectionState::Disconnected);
        info!("Ingestion loop stopped");
    }

    fn report_open_failure(&self, failures: &mut u32, reason: &str) {
        *failures += 1;
        metrics::inc_link_open_failure();
        if *failures == 1 {
            warn!(
                "Cannot open device link: {}; retrying every {}s",
                reason,
                self.tuning.reconnect_backoff.as_secs_f64()
            );
        } else if *failures % STANDING_WARNING_EVERY == 0 {
            warn!(
                "Device link still unavailable after {} attempts: {} (serving last known state)",
                failures, reason
            );
        } else {
            debug!("Open attempt {} failed: {}", failures, reason);
        }
    }

    /// Sleep the reconnect backoff while still answering control messages.
    async fn wait_backoff(&mut self) -> Flow {
        let sleep = tokio::time::sleep(self.tuning.reconnect_backoff);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return Flow::Continue,
                msg = self.control_rx.recv() => {
                    let Some(msg) = msg else {
                        info!("Control channel closed, stopping ingestion");
                        return Flow::Stop;
                    };
                    let mut no_link: Option<C::Transport> = None;
                    if self.handle_control(msg, &mut no_link).await == Flow::Stop {
                        return Flow::Stop;
                    }
                }
            }
        }
    }

    /// Read, decode and record until the link fails (returns `Continue`) or the
    /// loop is told to stop. `link` is `None` on return if the transport was lost.
    async fn read_until_lost(&mut self, link: &mut Option<C::Transport>) -> Flow {
        loop {
            loop {
                match self.control_rx.try_recv() {
                    Ok(msg) => {
                        if self.handle_control(msg, link).await == Flow::Stop {
                            return Flow::Stop;
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        info!("Control channel closed, stopping ingestion");
                        return Flow::Stop;
                    }
                }
            }

            let Some(mut transport) = link.take() else {
                return Flow::Continue;
            };
            let timeout = self.tuning.read_timeout;
            let joined = tokio::task::spawn_blocking(move || {
                let result = transport.read_line(timeout);
                (transport, result)
            })
            .await;
            let (mut transport, result) = match joined {
                Ok(v) => v,
                Err(e) => {
                    error!("Link reader task failed: {}", e);
                    return Flow::Continue;
                }
            };

            match result {
                Ok(None) => *link = Some(transport),
                Ok(Some(line)) => {
                    *link = Some(transport);
                    if let Some(reading) = self.ingest_line(&line).await {
                        self.auto_actuate(link, &reading).await;
                    }
                }
                Err(e) => {
                    warn!("Device link lost: {}", e);
                    metrics::inc_link_lost();
                    transport.close();
                    return Flow::Continue;
                }
            }
        }
    }

    async fn handle_control(
        &mut self,
        msg: ControlMessage,
        link: &mut Option<C::Transport>,
    ) -> Flow {
        match msg {
            ControlMessage::Shutdown => {
                info!("Ingestion loop received shutdown signal");
                Flow::Stop
            }
            ControlMessage::Actuate {
                command,
                mode,
                response_tx,
            } => {
                let result = match link.take() {
                    Some(transport) => {
                        let (kept, result) = self.send_command(transport, command, mode).await;
                        *link = kept;
                        result
                    }
                    None => {
                        debug!("{} requested while disconnected", command);
                        metrics::inc_command_failed();
                        AckResult::NotConnected
                    }
                };
                let _ = response_tx.send(result);
                Flow::Continue
            }
            ControlMessage::PushTelemetry {
                payload,
                response_tx,
            } => {
                metrics::inc_frame_telemetry();
                let reading = self.process(payload).await;
                let _ = response_tx.send(reading);
                Flow::Continue
            }
        }
    }

    /// Decode one line; telemetry is processed and recorded.
    async fn ingest_line(&mut self, line: &str) -> Option<Reading> {
        match decoder::decode(line) {
            Frame::Telemetry(payload) => {
                metrics::inc_frame_telemetry();
                Some(self.process(payload).await)
            }
            Frame::DeviceLog(text) => {
                metrics::inc_frame_device_log();
                if !text.is_empty() {
                    debug!("[device] {}", escape_log(&text));
                }
                None
            }
            Frame::Malformed(reason) => {
                metrics::inc_frame_malformed();
                warn!(
                    "Discarding malformed frame ({}): {}",
                    reason,
                    escape_log(line)
                );
                None
            }
        }
    }

    /// Stamp, enrich with weather and prediction, then swap into the store.
    async fn process(&mut self, payload: SensorPayload) -> Reading {
        let telemetry = payload.stamp(Utc::now());
        let weather = self.weather.current().await;
        let prediction = self.prediction.predict(&telemetry, &weather).await;
        info!(
            "Telemetry: temp={:.1}C humidity={:.0}% soil={:.0}% -> {} / {}",
            telemetry.temperature,
            telemetry.humidity,
            telemetry.soil_moisture,
            prediction.label,
            prediction.advisory_command
        );
        let reading = Reading {
            telemetry,
            prediction,
        };
        self.writer.record(reading.clone());
        reading
    }

    async fn auto_actuate(&mut self, link: &mut Option<C::Transport>, reading: &Reading) {
        if !self.tuning.auto_actuate {
            return;
        }
        let command = reading.prediction.advisory_command;
        if self.store.actuator().matches(command) {
            return;
        }
        let Some(transport) = link.take() else {
            return;
        };
        let (kept, _) = self
            .send_command(transport, command, CommandMode::Auto)
            .await;
        *link = kept;
    }

    /// Write one command and wait for its ack. Returns the transport unless the
    /// link failed, in which case it has been closed.
    async fn send_command(
        &mut self,
        transport: C::Transport,
        command: PumpCommand,
        mode: CommandMode,
    ) -> (Option<C::Transport>, AckResult) {
        info!("Sending {} ({:?})", command, mode);
        let bridge = self.bridge.clone();
        let joined = tokio::task::spawn_blocking(move || {
            let mut transport = transport;
            let result = bridge.send(&mut transport, command);
            (transport, result)
        })
        .await;
        let (mut transport, result) = match joined {
            Ok(v) => v,
            Err(e) => {
                error!("Actuator task failed: {}", e);
                return (
                    None,
                    AckResult::Failed {
                        reason: e.to_string(),
                    },
                );
            }
        };

        match result {
            Ok(report) => {
                self.writer.record_command(CommandRecord {
                    command,
                    mode,
                    acknowledged: matches!(report.outcome, AckOutcome::Acked(_)),
                    sent_at: Utc::now(),
                });
                let ack = AckResult::from(&report.outcome);
                for line in report.other_lines {
                    self.ingest_line(&line).await;
                }
                (Some(transport), ack)
            }
            Err(e) => {
                warn!("Device link lost while sending {}: {}", command, e);
                metrics::inc_link_lost();
                transport.close();
                (
                    None,
                    AckResult::Failed {
                        reason: e.to_string(),
                    },
                )
            }
        }
    }
}
