#![allow(dead_code)]
//! Fakes shared by the integration tests: a scripted device, a connector that
//! hands out scripted sessions, and a weather source that counts lookups.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agrolink::config::WeatherConfig;
use agrolink::error::{LinkError, WeatherError};
use agrolink::ingest::LoopTuning;
use agrolink::link::{Connector, LineTransport};
use agrolink::weather::{MockWeather, WeatherCache, WeatherReading, WeatherSource};

pub enum Step {
    Line(String),
    /// The next read fails as if the cable was pulled.
    Fail,
}

#[derive(Default)]
struct ScriptState {
    steps: VecDeque<Step>,
    writes: Vec<String>,
    ack_commands: bool,
    closed: bool,
}

/// What one simulated device session will say, and what it was told.
#[derive(Clone, Default)]
pub struct DeviceScript {
    inner: Arc<Mutex<ScriptState>>,
}

impl DeviceScript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every command with `ACK: <command>`.
    pub fn acking() -> Self {
        let script = Self::default();
        script.inner.lock().unwrap().ack_commands = true;
        script
    }

    pub fn line(self, line: &str) -> Self {
        self.push(Step::Line(line.to_string()));
        self
    }

    pub fn fail(self) -> Self {
        self.push(Step::Fail);
        self
    }

    pub fn push(&self, step: Step) {
        self.inner.lock().unwrap().steps.push_back(step);
    }

    pub fn writes(&self) -> Vec<String> {
        self.inner.lock().unwrap().writes.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }

    pub fn transport(&self) -> ScriptedTransport {
        ScriptedTransport {
            script: self.clone(),
        }
    }
}

pub struct ScriptedTransport {
    script: DeviceScript,
}

impl LineTransport for ScriptedTransport {
    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, LinkError> {
        let next = self.script.inner.lock().unwrap().steps.pop_front();
        match next {
            Some(Step::Line(line)) => Ok(Some(line)),
            Some(Step::Fail) => Err(LinkError::Lost(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "device unplugged",
            ))),
            None => {
                std::thread::sleep(timeout.min(Duration::from_millis(5)));
                Ok(None)
            }
        }
    }

    fn write_line(&mut self, text: &str) -> Result<(), LinkError> {
        let mut state = self.script.inner.lock().unwrap();
        if state.closed {
            return Err(LinkError::NotConnected);
        }
        state.writes.push(text.to_string());
        if state.ack_commands {
            state
                .steps
                .push_front(Step::Line(format!("ACK: {}", text)));
        }
        Ok(())
    }

    fn close(&mut self) {
        self.script.inner.lock().unwrap().closed = true;
    }
}

/// Hands out queued sessions in order; open fails while the queue is empty.
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    sessions: Arc<Mutex<VecDeque<DeviceScript>>>,
    opens: Arc<AtomicUsize>,
}

impl ScriptedConnector {
    pub fn new(sessions: Vec<DeviceScript>) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(sessions.into())),
            opens: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make the device reachable again with a new session.
    pub fn plug_in(&self, script: DeviceScript) {
        self.sessions.lock().unwrap().push_back(script);
    }

    pub fn open_attempts(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl Connector for ScriptedConnector {
    type Transport = ScriptedTransport;

    fn open(&self) -> Result<ScriptedTransport, LinkError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        match self.sessions.lock().unwrap().pop_front() {
            Some(script) => Ok(script.transport()),
            None => Err(LinkError::Open {
                port: "/dev/fake".to_string(),
                baud: 115200,
                reason: "No such file or directory".to_string(),
            }),
        }
    }

    fn address(&self) -> String {
        "/dev/fake@115200".to_string()
    }
}

/// Weather source that counts lookups and can be switched to fail.
#[derive(Clone, Default)]
pub struct CountingWeather {
    lookups: Arc<AtomicUsize>,
    failing: Arc<AtomicBool>,
    delay: Option<Duration>,
}

impl CountingWeather {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl WeatherSource for CountingWeather {
    async fn lookup(&self, _location: &str) -> Result<WeatherReading, WeatherError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(WeatherError::Status(503));
        }
        Ok(WeatherReading {
            condition_text: "Light rain shower".to_string(),
            temperature: 27.0,
            humidity: 80.0,
            wind_speed: 9.0,
            precip_mm: 1.2,
        })
    }
}

pub fn telemetry_line(soil_moisture: f64) -> String {
    format!(
        r#"{{"temperature":26.5,"humidity":71,"soil_moisture":{},"N":90,"P":42,"K":43}}"#,
        soil_moisture
    )
}

pub fn fast_tuning() -> LoopTuning {
    LoopTuning {
        read_timeout: Duration::from_millis(5),
        reconnect_backoff: Duration::from_millis(20),
        ack_window: Duration::from_millis(200),
        auto_actuate: false,
    }
}

pub fn mock_weather() -> Arc<WeatherCache<MockWeather>> {
    Arc::new(WeatherCache::new(MockWeather, &WeatherConfig::default()))
}

/// Poll `cond` every few milliseconds until it holds or `within` elapses.
pub async fn wait_until<F: FnMut() -> bool>(mut cond: F, within: Duration) -> bool {
    let deadline = std::time::Instant::now() + within;
    loop {
        if cond() {
            return true;
        }
        if std::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
