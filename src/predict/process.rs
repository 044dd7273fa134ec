//! Predictor backed by an external program.
//!
//! The program gets one JSON line on stdin:
//!
//! ```text
//! {"N":90.0,"P":42.0,"K":43.0,"temperature":26.0,"humidity":70.0,"rainfall":120.0}
//! ```
//!
//! and must print the label as the last non-empty line of stdout, then exit 0.
//! A program still running after the timeout is killed.

use log::debug;
use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::{FeatureVector, Predictor};
use crate::config::PredictionConfig;
use crate::error::PredictorError;

#[derive(Debug, Clone)]
pub struct ProcessPredictor {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl ProcessPredictor {
    pub fn new(program: &str, args: &[String], timeout: Duration) -> Self {
        Self {
            program: program.to_string(),
            args: args.to_vec(),
            timeout,
        }
    }

    pub fn from_config(config: &PredictionConfig) -> Option<Self> {
        let (program, args) = config.command.split_first()?;
        if program.trim().is_empty() {
            return None;
        }
        Some(Self::new(
            program,
            args,
            Duration::from_millis(config.timeout_ms),
        ))
    }
}

impl Predictor for ProcessPredictor {
    fn predict(&self, features: &FeatureVector) -> Result<String, PredictorError> {
        let input = serde_json::to_string(features)
            .map_err(|e| PredictorError::Invocation(e.to_string()))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| PredictorError::Invocation(format!("{}: {}", self.program, e)))?;

        // Both pipes drain while the program runs so a chatty child never blocks on write
        let stdout_reader = child.stdout.take().map(drain);
        let stderr_reader = child.stderr.take().map(drain);

        if let Some(mut stdin) = child.stdin.take() {
            // A program that exits without reading stdin is judged by its exit status.
            if let Err(e) = writeln!(stdin, "{}", input) {
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(e.into());
                }
            }
        }

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                // Readers are left detached; a grandchild may still hold the pipes open
                return Err(PredictorError::Timeout(self.timeout.as_millis() as u64));
            }
            std::thread::sleep(Duration::from_millis(10));
        };

        let stdout = collect(stdout_reader)?;
        if !status.success() {
            let stderr = collect(stderr_reader).unwrap_or_default();
            return Err(PredictorError::Invocation(format!(
                "{} exited with {}: {}",
                self.program,
                status,
                stderr.trim()
            )));
        }

        let label = stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .last()
            .ok_or(PredictorError::EmptyOutput)?;
        debug!("{} -> {}", self.program, label);
        Ok(label.to_string())
    }
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<std::io::Result<String>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        pipe.read_to_end(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    })
}

fn collect(reader: Option<JoinHandle<std::io::Result<String>>>) -> Result<String, PredictorError> {
    match reader {
        Some(handle) => handle
            .join()
            .map_err(|_| PredictorError::Invocation("output reader panicked".to_string()))?
            .map_err(PredictorError::from),
        None => Ok(String::new()),
    }
}
