use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};
use zino::{
    actors::{HousekeepingHandle, PersistenceHandle, PollfileHandle, SchedulerHandle, SchedulerSettings},
    config::{Config, read_config_file},
    daemon::{DaemonState, retention},
    events::JsonLinesArchive,
    monitors::StateParams,
    snmp::{DevicePoller, client::AsyncSnmpBackend},
    storage::FileBackend,
    util::{get_config_path, get_polldevs_path},
};

#[derive(Debug, Clone, Parser)]
#[command(version, about)]
struct Args {
    /// Daemon configuration file (defaults to $ZINO_CONFIG or zino.toml)
    #[arg(long, value_name = "FILE")]
    config_file: Option<PathBuf>,

    /// Pollfile, overriding the one named in the config
    #[arg(long, value_name = "FILE")]
    polldevs: Option<PathBuf>,

    /// Log at debug level
    #[arg(long)]
    debug: bool,

    /// Stop after this many seconds
    #[arg(long, value_name = "SECONDS")]
    stop_in: Option<u64>,
}

fn init(level: LevelFilter) {
    let filter = filter::Targets::new().with_targets(vec![("zino", level)]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

fn log_level(args: &Args, config: &Config) -> LevelFilter {
    if args.debug {
        return LevelFilter::DEBUG;
    }
    config.logging.level.parse().unwrap_or(LevelFilter::INFO)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let config_path = get_config_path(args.config_file.clone());
    let mut config = read_config_file(&config_path)
        .with_context(|| format!("failed to load config {}", config_path.display()))?;
    if let Some(polldevs) = get_polldevs_path(args.polldevs.clone()) {
        config.polling.file = polldevs;
    }

    init(log_level(&args, &config));
    trace!("started with args: {args:?}");
    info!("zino starting with config {}", config_path.display());

    run(config, args.stop_in).await
}

async fn run(config: Config, stop_in: Option<u64>) -> anyhow::Result<()> {
    let backend = Arc::new(FileBackend::new(&config.persistence.file));
    let state = Arc::new(
        DaemonState::load_or_cold_start(
            backend.as_ref(),
            StateParams::from(&config.state),
            retention(&config),
        )
        .await,
    );

    let poller = DevicePoller::new(Arc::new(AsyncSnmpBackend::default()));
    let scheduler = SchedulerHandle::spawn(
        state.clone(),
        poller,
        SchedulerSettings::from(&config.scheduler),
    );
    let pollfile = PollfileHandle::spawn(
        config.polling.file.clone(),
        minutes(config.polling.period),
        scheduler.clone(),
    );
    let persistence =
        PersistenceHandle::spawn(state.clone(), backend, minutes(config.persistence.period));
    let housekeeping = HousekeepingHandle::spawn(
        state.clone(),
        Arc::new(JsonLinesArchive::new(&config.archive.file)),
        minutes(config.archive.check_interval),
    );

    #[cfg(feature = "api")]
    start_api(&config, state.clone()).await?;

    match stop_in {
        Some(seconds) => {
            info!("stopping in {seconds} seconds");
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(seconds)) => info!("stop time reached"),
                _ = tokio::signal::ctrl_c() => info!("interrupted"),
            }
        }
        None => {
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for ctrl-c")?;
            info!("interrupted");
        }
    }

    info!("shutting down");
    if let Err(e) = pollfile.shutdown().await {
        warn!("{e:#}");
    }
    if let Err(e) = scheduler.shutdown().await {
        warn!("{e:#}");
    }
    if let Err(e) = housekeeping.shutdown().await {
        warn!("{e:#}");
    }
    if let Err(e) = persistence.shutdown().await {
        error!("final snapshot not written: {e:#}");
    }
    info!("zino stopped");

    Ok(())
}

#[cfg(feature = "api")]
async fn start_api(config: &Config, state: Arc<DaemonState>) -> anyhow::Result<()> {
    use zino::api::{ApiConfig, ApiState, Secrets, spawn_api_server};
    use zino::util::file_is_world_readable;

    let secrets_path = &config.api.secrets;
    match file_is_world_readable(secrets_path) {
        Ok(true) => warn!(
            "secrets file {} is world-readable, restrict its permissions",
            secrets_path.display()
        ),
        Ok(false) => {}
        Err(e) => warn!("cannot inspect secrets file {}: {e}", secrets_path.display()),
    }

    let secrets = match Secrets::load(secrets_path) {
        Ok(secrets) => secrets,
        Err(e) => {
            error!("{e}; the API will refuse every authenticated request");
            Secrets::default()
        }
    };
    info!("loaded {} API users", secrets.len());

    let api_config = ApiConfig {
        bind_addr: config.api.bind,
    };
    spawn_api_server(api_config, ApiState::new(state), secrets).await?;
    Ok(())
}

fn minutes(count: u64) -> Duration {
    Duration::from_secs(count.saturating_mul(60))
}
