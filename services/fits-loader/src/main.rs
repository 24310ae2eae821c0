//! FITS observation loader.
//!
//! Loads source metadata (`*.json`) and observation (`*.csv`) files from a
//! directory into the FITS database, by merge or by full resync per
//! site and type.

mod config;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use config::{load_loader_config, LoaderConfig, DATABASE_URL_ENV};
use ingestion::Ingester;
use storage::PgGateway;

#[derive(Parser, Debug)]
#[command(name = "fits-loader")]
#[command(about = "Load observation and source files into the FITS database")]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/fits-loader/config.yaml")]
    config: PathBuf,

    /// Directory of unit files (overrides loader.data_dir)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Site file to load before the units (overrides loader.site_file)
    #[arg(long)]
    site_file: Option<PathBuf>,

    /// Replace all stored observations for each site and type
    #[arg(long)]
    resync: bool,

    /// Validate only; write nothing
    #[arg(long)]
    dry_run: bool,

    /// Skip checking sources against reference data
    #[arg(long)]
    offline_validation: bool,

    /// Log level (overrides logging.level)
    #[arg(long)]
    log_level: Option<String>,

    /// Log to the system journal instead of stdout
    #[arg(long)]
    syslog: bool,
}

impl Args {
    fn apply(&self, config: &mut LoaderConfig) {
        let loader = &mut config.loader;
        loader.resync_mode |= self.resync;
        loader.dry_run |= self.dry_run;
        loader.offline_validation |= self.offline_validation;

        if let Some(dir) = &self.data_dir {
            loader.data_dir = Some(dir.clone());
        }
        if let Some(file) = &self.site_file {
            loader.site_file = Some(file.clone());
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        config.logging.syslog |= self.syslog;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Level and format come from the config file, so it is read first.
    let mut config = load_loader_config(&args.config)?;
    args.apply(&mut config);

    init_logging(&config)?;

    info!(config = %args.config.display(), "Starting fits-loader");

    config.loader.check_inputs()?;
    let options = config.loader.reconcile_options();

    info!(
        resync = options.resync,
        dry_run = options.dry_run,
        offline_validation = options.offline_validation,
        "Loaded configuration"
    );

    let gateway = Arc::new(connect(&config).await?);
    let ingester = Ingester::new(gateway.clone(), options);

    if let Some(site_file) = &config.loader.site_file {
        let loaded = ingester.load_sites(site_file).await;
        if loaded.is_err() {
            gateway.close().await;
        }
        loaded.with_context(|| format!("Failed to load site file {}", site_file.display()))?;
    }

    let Some(data_dir) = &config.loader.data_dir else {
        gateway.close().await;
        info!("No data directory, finished after site file");
        return Ok(());
    };

    let summary = ingester.ingest_dir(data_dir).await;
    gateway.close().await;
    let summary = summary.with_context(|| format!("Failed to read {}", data_dir.display()))?;

    for failure in &summary.failures {
        error!(
            unit = %failure.unit,
            files = ?failure.files,
            state = %failure.state,
            retryable = failure.is_retryable(),
            error = %failure.source,
            "Failed unit"
        );
    }

    info!(
        units_ok = summary.units_ok,
        units_failed = summary.units_failed(),
        records_written = summary.records_written,
        records_deleted = summary.records_deleted,
        "Finished"
    );

    anyhow::ensure!(
        summary.is_success(),
        "{} of {} units failed",
        summary.units_failed(),
        summary.units_ok + summary.units_failed()
    );

    Ok(())
}

fn init_logging(config: &LoaderConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    let journal = config.logging.syslog.then(tracing_journald::layer);

    match journal {
        Some(Ok(layer)) => tracing_subscriber::registry()
            .with(filter)
            .with(layer.with_syslog_identifier("fits-loader".to_string()))
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e)),
        Some(Err(e)) => {
            init_stdout_logging(config, filter)?;
            warn!(error = %e, "Could not connect to the system journal, logging to stdout");
            Ok(())
        }
        None => init_stdout_logging(config, filter),
    }
}

fn init_stdout_logging(config: &LoaderConfig, filter: EnvFilter) -> Result<()> {
    let builder = fmt().with_env_filter(filter).with_target(true);

    let result = match config.logging.format.as_str() {
        "json" => builder.json().try_init(),
        _ => builder.pretty().try_init(),
    };

    result.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
}

async fn connect(config: &LoaderConfig) -> Result<PgGateway> {
    let pool_options = config.database.pool_options();

    let gateway = match std::env::var(DATABASE_URL_ENV) {
        Ok(url) if !url.is_empty() => {
            info!("Connecting to database from {}", DATABASE_URL_ENV);
            PgGateway::connect(&url, &pool_options).await?
        }
        _ => {
            info!(
                host = %config.database.host,
                port = config.database.port,
                database = %config.database.database,
                user = %config.database.user,
                "Connecting to database"
            );
            PgGateway::connect_with(config.database.connect_options()?, &pool_options).await?
        }
    };

    Ok(gateway)
}
