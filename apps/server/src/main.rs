//! Meterbot - electricity balance alerts for chat groups.
//!
//! Sweeps every bound account on a fixed cadence, alerts groups about low
//! balances, and answers group commands received from a OneBot implementation.

mod config;
mod events;
mod state;

use clap::Parser;
use config::AppConfig;
use rust_decimal::Decimal;
use state::{create_state, SharedState};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Meterbot CLI
#[derive(Parser, Debug)]
#[command(name = "meterbot")]
#[command(about = "Low electricity balance alerts for chat groups", long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "METERBOT_CONFIG", default_value = "config.json")]
    config: PathBuf,

    /// Directory of per-group documents
    #[arg(long, env = "METERBOT_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Feature switch file
    #[arg(long, env = "METERBOT_SWITCH_FILE")]
    switch_file: Option<PathBuf>,

    /// Billing lookup endpoint
    #[arg(long, env = "METERBOT_BILLING_ENDPOINT")]
    billing_endpoint: Option<String>,

    /// Alert when a balance is below this amount
    #[arg(short, long, env = "METERBOT_THRESHOLD")]
    threshold: Option<Decimal>,

    /// Seconds between sweeps
    #[arg(long, env = "METERBOT_SWEEP_INTERVAL")]
    sweep_interval: Option<u64>,

    /// OneBot HTTP API base URL
    #[arg(long, env = "ONEBOT_API_URL")]
    onebot_api: Option<String>,

    /// OneBot access token
    #[arg(long, env = "ONEBOT_ACCESS_TOKEN", hide_env_values = true)]
    onebot_token: Option<String>,

    /// Address for incoming OneBot events
    #[arg(long, env = "METERBOT_LISTEN")]
    listen: Option<String>,

    /// Owner user ids, comma separated
    #[arg(long, env = "METERBOT_OWNERS", value_delimiter = ',')]
    owners: Option<Vec<String>>,

    /// Log level: trace, debug, info, warn, error
    #[arg(short, long, env = "METERBOT_LOG_LEVEL")]
    log_level: Option<String>,

    /// Run a single sweep and exit
    #[arg(long, default_value_t = false)]
    once: bool,
}

impl Args {
    /// Command-line and environment values win over the config file.
    fn apply(&self, config: &mut AppConfig) {
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(path) = &self.switch_file {
            config.switch_file = path.clone();
        }
        if let Some(endpoint) = &self.billing_endpoint {
            config.billing.endpoint = endpoint.clone();
        }
        if let Some(threshold) = self.threshold {
            config.alerts.threshold = threshold;
        }
        if let Some(secs) = self.sweep_interval {
            config.alerts.sweep_interval_secs = secs;
        }
        if let Some(url) = &self.onebot_api {
            config.onebot.api_url = url.clone();
        }
        if let Some(token) = &self.onebot_token {
            config.onebot.access_token = Some(token.clone());
        }
        if let Some(addr) = &self.listen {
            config.onebot.listen_addr = addr.clone();
        }
        if let Some(owners) = &self.owners {
            config.owners = owners.clone();
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
    }
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

fn init_logging(level: &str) {
    let builder = FmtSubscriber::builder()
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact();

    let result = match EnvFilter::try_from_default_env() {
        Ok(filter) => tracing::subscriber::set_global_default(builder.with_env_filter(filter).finish()),
        Err(_) => tracing::subscriber::set_global_default(
            builder.with_max_level(parse_level(level)).finish(),
        ),
    };
    if let Err(e) = result {
        eprintln!("Failed to set tracing subscriber: {e}");
    }
}

fn log_stats(state: &SharedState, label: &str) {
    let summary = state.stats_summary();
    info!(
        "📊 {} | Uptime: {}s | Sweeps: {} | Checked: {} | Alerts: {} | Fetch failures: {} | Other failures: {}",
        label,
        summary.uptime_secs,
        summary.sweep.sweeps,
        summary.sweep.bindings_checked,
        summary.sweep.alerts_sent,
        summary.sweep.fetch_failures,
        summary.sweep.other_failures
    );
}

/// One sweep at a time; the next one starts a full interval after the last ended.
async fn run_sweep_loop(state: SharedState, interval: Duration) {
    info!(interval_secs = interval.as_secs(), "Starting sweep loop");

    while state.is_running() {
        state.run_sweep().await;
        log_stats(&state, "Stats");

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = state.stopped() => break,
        }
    }

    info!("Sweep loop stopped");
}

#[tokio::main]
async fn main() {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let mut config = match AppConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            init_logging(args.log_level.as_deref().unwrap_or("info"));
            error!("{}", e);
            std::process::exit(1);
        }
    };
    args.apply(&mut config);

    init_logging(&config.log_level);

    info!("🚀 Meterbot starting...");
    info!("  Data dir: {}", config.data_dir.display());
    info!("  Threshold: {}", config.alerts.threshold);
    info!("  Alert interval: {}s", config.alerts.interval_secs);
    info!("  Sweep interval: {}s", config.alerts.sweep_interval_secs);
    info!("  OneBot API: {}", config.onebot.api_url);
    if config.owners.is_empty() {
        warn!("No owners configured; nobody can toggle the feature");
    }

    let sweep_interval = config.alerts.sweep_interval();
    let listen_addr = config.onebot.listen_addr.clone();

    let state = match create_state(config).await {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to start: {}", e);
            std::process::exit(1);
        }
    };

    if args.once {
        state.run_sweep().await;
        log_stats(&state, "Final Stats");
        return;
    }

    let server_handle = match events::start_event_server(state.clone(), &listen_addr).await {
        Ok(handle) => handle,
        Err(e) => {
            error!("Failed to start event receiver on {}: {}", listen_addr, e);
            std::process::exit(1);
        }
    };

    let sweep_state = state.clone();
    let sweep_handle = tokio::spawn(async move {
        run_sweep_loop(sweep_state, sweep_interval).await;
    });

    info!("Press Ctrl+C to stop...");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
    }

    warn!("Shutdown signal received");
    state.stop();

    // A sweep in progress finishes its current binding or is cut off; either
    // way every alert already granted is on disk.
    if tokio::time::timeout(Duration::from_secs(5), sweep_handle)
        .await
        .is_err()
    {
        warn!("Sweep still running at shutdown, abandoning it");
    }
    server_handle.abort();

    log_stats(&state, "Final Stats");
    info!("👋 Meterbot stopped");
}
