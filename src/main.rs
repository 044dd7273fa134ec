//! Binary entrypoint for the Agrolink CLI.
//!
//! Commands:
//! - `start [--port <path>]` - run the ingestion loop and the HTTP API until Ctrl-C
//! - `init` - write a starter `config.toml`
//! - `status` - print the effective configuration as JSON
//! - `smoke-test --port <path> [-b <baud>] [--timeout <s>]` - probe the device link
//! - `weather` - one lookup through the weather cache
//!
//! See the library crate docs for module-level details: `agrolink::`.
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use std::sync::Arc;

use agrolink::config::Config;
use agrolink::predict::PredictionStep;
use agrolink::weather::{DefaultWeatherSource, WeatherCache};

#[derive(Parser)]
#[command(name = "agrolink")]
#[command(about = "Telemetry bridge and pump control for AgroSmart field controllers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the ingestion loop and API
    Start {
        /// Field controller serial port (e.g., /dev/ttyUSB0, COM5)
        #[arg(short, long)]
        port: Option<String>,

        /// Run as a background daemon (Unix only)
        #[arg(short, long)]
        daemon: bool,

        /// PID file location (for daemon mode)
        #[arg(long, default_value = "/tmp/agrolink.pid")]
        pid_file: String,
    },
    /// Write a default configuration file
    Init,
    /// Show the effective configuration
    Status,
    /// Open the device link and count decoded frames
    SmokeTest {
        /// Device serial port
        #[arg(short, long)]
        port: String,
        /// Baud rate
        #[arg(short = 'b', long, default_value_t = 115200)]
        baud: u32,
        /// Seconds to listen before giving up
        #[arg(short, long, default_value_t = 10)]
        timeout: u64,
    },
    /// Fetch the current weather snapshot
    Weather,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Daemon mode initializes logging after re-spawning
    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Config::load(&cli.config).await.ok(),
    };
    match &cli.command {
        Commands::Start { daemon, .. } if *daemon => {}
        _ => init_logging(&pre_config, cli.verbose),
    }

    match cli.command {
        Commands::Start {
            port,
            daemon,
            pid_file,
        } => {
            let config = match pre_config {
                Some(c) => c,
                None => load_config(&cli.config).await?,
            };

            #[cfg(all(unix, feature = "daemon"))]
            if daemon {
                // Parent exits inside; the child is re-run without --daemon
                daemonize_process(&config, &pid_file)?;
            }

            #[cfg(not(all(unix, feature = "daemon")))]
            if daemon {
                let _ = pid_file;
                eprintln!("Error: Daemon mode requires Unix platform and 'daemon' feature.");
                eprintln!("Compile with: cargo build --features daemon");
                std::process::exit(1);
            }

            info!("Starting Agrolink v{}", env!("CARGO_PKG_VERSION"));
            run_service(config, port).await?;
        }
        Commands::Init => {
            Config::create_default(&cli.config).await?;
            println!("Configuration file created at {}", cli.config);
        }
        Commands::Status => {
            let config = match pre_config {
                Some(c) => c,
                None => load_config(&cli.config).await?,
            };
            let source = DefaultWeatherSource::from_config(&config.weather);
            let step = PredictionStep::from_config(&config.prediction);
            let payload = serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "device": format!("{}@{}", config.device.port, config.device.baud_rate),
                "auto_actuate": config.device.auto_actuate,
                "weather_source": if source.is_mock() { "mock" } else { "weatherapi" },
                "weather_location": config.weather.default_location,
                "model_loaded": step.has_model(),
                "pump_on_below": config.prediction.pump_on_below,
                "history_capacity": config.state.history_capacity,
                "api": if config.api.enabled { Some(config.api.bind.clone()) } else { None },
            });
            println!("{}", serde_json::to_string_pretty(&payload)?);
        }
        Commands::SmokeTest {
            port,
            baud,
            timeout,
        } => smoke_test(port, baud, timeout).await?,
        Commands::Weather => {
            let config = pre_config.unwrap_or_else(Config::from_env);
            let cache = WeatherCache::new(
                DefaultWeatherSource::from_config(&config.weather),
                &config.weather,
            );
            let snapshot = cache.current().await;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
    }

    Ok(())
}

async fn load_config(path: &str) -> Result<Config> {
    Config::load(path)
        .await
        .with_context(|| format!("run `agrolink init` to create {}", path))
}

#[cfg(feature = "serial")]
async fn run_service(mut config: Config, port: Option<String>) -> Result<()> {
    use agrolink::ingest::{IngestionLoop, LoopTuning, ShutdownSignal};
    use agrolink::link::serial::SerialConnector;
    use agrolink::state::state_store;

    let mut stop_signal = ShutdownSignal::install()?;

    if let Some(p) = port {
        config.device.port = p;
    }

    let (store, writer) = state_store(config.state.history_capacity);
    let weather = Arc::new(WeatherCache::new(
        DefaultWeatherSource::from_config(&config.weather),
        &config.weather,
    ));
    let connector = SerialConnector::new(
        &config.device.port,
        config.device.baud_rate,
        config.device.settle(),
    );
    let (ingestion, link) = IngestionLoop::new(
        connector,
        writer,
        weather.clone(),
        PredictionStep::from_config(&config.prediction),
        LoopTuning::from_config(&config.device),
    );
    let ingestion_task = tokio::spawn(ingestion.run());

    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);

    #[cfg(feature = "http")]
    let api_task = if config.api.enabled {
        use agrolink::api::{http, ApiService};
        let api = ApiService::new(
            store.clone(),
            link.clone(),
            weather,
            config.state.history_default_limit,
        );
        let bind = config.api.bind.clone();
        let mut stop_rx = stop_rx;
        Some(tokio::spawn(async move {
            let shutdown = async move {
                let _ = stop_rx.changed().await;
            };
            if let Err(e) = http::serve(api, &bind, shutdown).await {
                log::error!("API server error: {}", e);
            }
        }))
    } else {
        info!("API disabled in configuration");
        None
    };
    #[cfg(not(feature = "http"))]
    {
        let _ = (stop_rx, weather);
        info!("Built without the `http` feature; serving no API");
    }

    stop_signal.recv().await?;
    info!("Shutdown requested");
    link.shutdown();
    let _ = stop_tx.send(true);

    if let Err(e) = ingestion_task.await {
        log::error!("Ingestion task failed: {}", e);
    }
    #[cfg(feature = "http")]
    if let Some(task) = api_task {
        let _ = task.await;
    }

    let view = store.snapshot();
    info!(
        "Stopped with {} readings in history, pump {:?}",
        view.history_len, view.actuator
    );
    Ok(())
}

#[cfg(not(feature = "serial"))]
async fn run_service(_config: Config, _port: Option<String>) -> Result<()> {
    log::error!("start requires the 'serial' feature");
    std::process::exit(2);
}

#[cfg(feature = "serial")]
async fn smoke_test(port: String, baud: u32, timeout: u64) -> Result<()> {
    use agrolink::link::serial::SerialConnector;
    use agrolink::link::{Connector, LineTransport};
    use agrolink::telemetry::decoder::{decode, Frame};
    use std::time::{Duration, Instant};

    info!("Starting smoke test on {} @ {} baud", port, baud);
    let counts = tokio::task::spawn_blocking(move || -> Result<(u64, u64, u64)> {
        let connector = SerialConnector::new(&port, baud, Duration::from_secs(2));
        let mut link = connector.open()?;
        let deadline = Instant::now() + Duration::from_secs(timeout);
        let (mut telemetry, mut device_log, mut malformed) = (0u64, 0u64, 0u64);
        while Instant::now() < deadline {
            if let Some(line) = link.read_line(Duration::from_millis(250))? {
                match decode(&line) {
                    Frame::Telemetry(_) => telemetry += 1,
                    Frame::DeviceLog(_) => device_log += 1,
                    Frame::Malformed(_) => malformed += 1,
                }
            }
        }
        link.close();
        Ok((telemetry, device_log, malformed))
    })
    .await??;

    let (telemetry, device_log, malformed) = counts;
    let payload = serde_json::json!({
        "status": if telemetry > 0 { "ok" } else { "no_telemetry" },
        "telemetry_frames": telemetry,
        "device_log_lines": device_log,
        "malformed_frames": malformed,
        "timeout_seconds": timeout,
    });
    println!("{}", payload);
    std::process::exit(if telemetry > 0 { 0 } else { 1 });
}

#[cfg(not(feature = "serial"))]
async fn smoke_test(_port: String, _baud: u32, _timeout: u64) -> Result<()> {
    log::error!("SmokeTest requires the 'serial' feature");
    std::process::exit(2);
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|c| c.logging.level.parse::<log::LevelFilter>().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let log_file = config
        .as_ref()
        .and_then(|c| c.logging.file.as_ref())
        .and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        });

    if let Some(f) = log_file {
        let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
        // In daemon mode stdout is redirected, so only the file gets the line
        let is_tty = atty::is(atty::Stream::Stdout);
        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());
            if let Ok(mut guard) = write_mutex.lock() {
                let _ = writeln!(guard, "{}", line);
            }
            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
        });
    }
    let _ = builder.try_init();
}

/// Re-spawn detached with stdout/stderr appended to the log file, write the
/// PID file, and exit the parent.
#[cfg(all(unix, feature = "daemon"))]
fn daemonize_process(config: &Config, pid_file: &str) -> Result<()> {
    use std::fs::OpenOptions;
    use std::process::Command;

    let log_path = config.logging.file.as_deref().unwrap_or("agrolink.log");

    let current_exe = std::env::current_exe()?;
    let args: Vec<String> = std::env::args()
        .skip(1)
        .filter(|arg| arg != "--daemon" && arg != "-d")
        .collect();

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("cannot open log file {}", log_path))?;

    let child = Command::new(&current_exe)
        .args(&args)
        .stdin(std::process::Stdio::null())
        .stdout(log_file.try_clone()?)
        .stderr(log_file)
        .spawn()?;

    std::fs::write(pid_file, format!("{}", child.id()))?;
    std::process::exit(0);
}
