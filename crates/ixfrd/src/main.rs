// # ixfrd - IXFR zone watch daemon
//
// The ixfrd daemon is responsible for:
// 1. Reading configuration from environment variables
// 2. Initializing logging and the runtime
// 3. Building the transport, state store and sink
// 4. Running the scheduler until SIGTERM/SIGINT
//
// All zone-watch logic lives in ixfr-core.
//
// ## Configuration
//
// ### Zones
// - `IXFRD_ZONES`: Comma-separated `zone@ip[:port]` entries (IPv6 with port: `zone@[ip]:port`)
// - `IXFRD_POLL_INTERVAL`: Seconds between checks of each zone (default 300)
// - `IXFRD_TRANSFER_TIMEOUT`: Seconds allowed for one transfer (default 30)
//
// ### Scheduler
// - `IXFRD_MAX_BACKOFF_SECS`: Upper bound on the retry delay (default 3600)
// - `IXFRD_EMIT_UNCHANGED`: Log cycles that found no change (true/false)
// - `IXFRD_IGNORE_TYPES`: Comma-separated record types left out of deltas (default NSEC,NSEC3,RRSIG)
//
// ### Output
// - `IXFRD_STATE_PATH`: State file; in-memory state when unset
// - `IXFRD_LOG_PATH`: JSON-lines change log; changes go to the tracing log when unset
// - `IXFRD_MQTT_URL`: Also publish each change to this broker (`mqtt://host[:port]`)
// - `IXFRD_MQTT_TOPIC`: Topic prefix, changes go to `<prefix>/<zone>` (default ixfrlog)
// - `IXFRD_LOG_LEVEL`: trace, debug, info, warn or error (default info)
//
// ## Example
//
// ```bash
// export IXFRD_ZONES=example.com@192.0.2.53,example.net@[2001:db8::53]:5353
// export IXFRD_STATE_PATH=/var/lib/ixfrd/state.json
// export IXFRD_LOG_PATH=/var/log/ixfrd/changes.jsonl
//
// ixfrd
// ```

use anyhow::{Context, Result};
use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

use ixfr_core::{
    DeltaSink, FanoutSink, FileStateStore, JsonLinesSink, MemoryStateStore, MqttConfig, MqttSink,
    NetworkTransport, Scheduler, SchedulerEvent, SinkConfig, StateStoreConfig, StaticWatchlist,
    TracingSink, WatchConfig, ZoneConfig, ZoneStateStore,
};

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum IxfrdExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<IxfrdExitCode> for ExitCode {
    fn from(code: IxfrdExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Daemon settings read from the environment
struct Config {
    watch: WatchConfig,
    log_level: Level,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        let mut watch = WatchConfig::new();

        let poll_interval = env_number("IXFRD_POLL_INTERVAL")?;
        let transfer_timeout = env_number("IXFRD_TRANSFER_TIMEOUT")?;
        for entry in list_var("IXFRD_ZONES") {
            let mut zone: ZoneConfig = entry.parse()?;
            if let Some(secs) = poll_interval {
                zone = zone.with_poll_interval_secs(secs);
            }
            if let Some(secs) = transfer_timeout {
                zone = zone.with_transfer_timeout_secs(secs);
            }
            watch.zones.push(zone);
        }

        if let Some(secs) = env_number("IXFRD_MAX_BACKOFF_SECS")? {
            watch.scheduler.max_backoff_ms = secs.saturating_mul(1000);
        }
        if let Ok(value) = env::var("IXFRD_EMIT_UNCHANGED") {
            watch.scheduler.emit_unchanged = parse_bool(&value)
                .with_context(|| format!("IXFRD_EMIT_UNCHANGED '{}' is not a boolean", value))?;
        }
        if env::var("IXFRD_IGNORE_TYPES").is_ok() {
            watch.scheduler.ignored_types = list_var("IXFRD_IGNORE_TYPES");
        }

        if let Ok(path) = env::var("IXFRD_STATE_PATH") {
            watch.state_store = StateStoreConfig::File { path };
        }
        if let Ok(path) = env::var("IXFRD_LOG_PATH") {
            watch.sink = SinkConfig::JsonLines { path };
        }
        if let Ok(url) = env::var("IXFRD_MQTT_URL") {
            let mut mqtt = MqttConfig::new(url);
            if let Ok(topic) = env::var("IXFRD_MQTT_TOPIC") {
                mqtt = mqtt.with_topic(topic);
            }
            watch.mqtt = Some(mqtt);
        }

        let level = env::var("IXFRD_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let log_level = match level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => anyhow::bail!(
                "IXFRD_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                level
            ),
        };

        Ok(Self { watch, log_level })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if self.watch.zones.is_empty() {
            anyhow::bail!(
                "IXFRD_ZONES must contain at least one zone. \
                Set it via: export IXFRD_ZONES=example.com@192.0.2.53"
            );
        }
        self.watch.validate()?;
        Ok(())
    }
}

/// Comma-separated variable, empty entries dropped
fn list_var(name: &str) -> Vec<String> {
    env::var(name)
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn env_number(name: &str) -> Result<Option<u64>> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("{} '{}' is not a number", name, value)),
        Err(_) => Ok(None),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return IxfrdExitCode::ConfigError.into();
        }
    };

    // Validate configuration
    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return IxfrdExitCode::ConfigError.into();
    }

    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.log_level)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return IxfrdExitCode::ConfigError.into();
    }

    info!("Starting ixfrd daemon");
    info!("Configuration loaded: {} zone(s)", config.watch.zones.len());

    // Enter tokio runtime
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return IxfrdExitCode::RuntimeError.into();
        }
    };

    rt.block_on(async {
        let scheduler = match build_scheduler(config.watch).await {
            Ok(scheduler) => scheduler,
            Err(e) => {
                error!("Startup error: {:#}", e);
                return IxfrdExitCode::ConfigError;
            }
        };

        if let Err(e) = run_daemon(scheduler).await {
            error!("Daemon error: {:#}", e);
            IxfrdExitCode::RuntimeError
        } else {
            IxfrdExitCode::CleanShutdown
        }
    })
    .into()
}

/// Build the scheduler and its collaborators from the configuration
async fn build_scheduler(
    config: WatchConfig,
) -> Result<(Scheduler, tokio::sync::mpsc::Receiver<SchedulerEvent>)> {
    let store: Arc<dyn ZoneStateStore> = match &config.state_store {
        StateStoreConfig::File { path } => {
            info!("Using state file {}", path);
            Arc::new(FileStateStore::new(path).await?)
        }
        StateStoreConfig::Memory => {
            info!("Using in-memory state; serials are forgotten on restart");
            Arc::new(MemoryStateStore::new())
        }
    };

    let sink: Arc<dyn DeltaSink> = match &config.sink {
        SinkConfig::JsonLines { path } => {
            info!("Logging changes to {}", path);
            Arc::new(JsonLinesSink::open(path).await?)
        }
        SinkConfig::Tracing => Arc::new(TracingSink::new()),
    };
    let sink: Arc<dyn DeltaSink> = match &config.mqtt {
        Some(mqtt) => Arc::new(FanoutSink::new(vec![sink, Arc::new(MqttSink::connect(mqtt)?)])),
        None => sink,
    };

    let transport = Arc::new(
        NetworkTransport::new().with_udp_payload_size(config.scheduler.udp_payload_size),
    );
    let watchlist = StaticWatchlist::new(config.watched_zones()?);

    for zone in &config.zones {
        info!("Watching zone: {}@{}:{}", zone.zone, zone.server, zone.port);
    }

    Ok(Scheduler::new(
        Box::new(watchlist),
        transport,
        store,
        sink,
        config.scheduler,
    )?)
}

/// Run the scheduler until a shutdown signal arrives
async fn run_daemon(
    (scheduler, mut events): (Scheduler, tokio::sync::mpsc::Receiver<SchedulerEvent>),
) -> Result<()> {
    // Nothing consumes events in the daemon; drain so they are not dropped with warnings
    let drain = tokio::spawn(async move { while events.recv().await.is_some() {} });

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let signals = tokio::spawn(async move {
        match wait_for_shutdown().await {
            Ok(signal) => info!("Received shutdown signal: {}", signal),
            Err(e) => error!("Signal handling error: {}, shutting down", e),
        }
        let _ = shutdown_tx.send(());
    });

    let result = scheduler.run_with_shutdown(Some(shutdown_rx)).await;
    signals.abort();
    drop(scheduler);
    let _ = drain.await;

    result?;
    info!("Shutting down daemon");
    Ok(())
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
///
/// # Returns
///
/// Returns the name of the signal received.
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for shutdown signals (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
