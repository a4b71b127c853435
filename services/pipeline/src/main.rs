//! EV charging data warehouse pipeline.
//!
//! Extracts the charging-session export and the station/weather APIs
//! into raw artifacts, normalizes them into staging files, and loads
//! them into the warehouse staging schema in one transaction.

mod config;
mod orchestrator;

use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use etl_common::SourceKind;
use warehouse::{PgWarehouseSession, StagingLoader, WarehouseStage};

use config::PipelineConfig;
use orchestrator::PipelineOrchestrator;

#[derive(Parser, Debug)]
#[command(name = "pipeline")]
#[command(about = "ETL pipeline for the EV charging data warehouse")]
struct Args {
    /// Configuration file path (YAML); environment variables otherwise
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Specific dataset to run (default: all of sessions, stations, weather)
    #[arg(short, long)]
    source: Vec<String>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .json()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("starting pipeline");

    let config = match &args.config {
        Some(path) => PipelineConfig::from_yaml(path)?,
        None => PipelineConfig::from_env()?,
    };

    let sources = parse_sources(&args.source)?;
    info!(sources = ?sources.iter().map(|s| s.as_str()).collect::<Vec<_>>(), "datasets selected");

    // Run-level cancellation: first ctrl-c aborts in-flight work and
    // rolls back any open load transaction.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("cancellation requested");
                cancel.cancel();
            }
        });
    }

    let stage = Arc::new(WarehouseStage::new(&config.warehouse.stage)?);
    let session = PgWarehouseSession::connect(
        &config.warehouse.database_url,
        config.warehouse.schema.clone(),
        stage,
    )
    .await?;
    let mut loader = StagingLoader::new(session);

    let orchestrator = PipelineOrchestrator::new(config);
    let run = orchestrator.run(&mut loader, &sources, &cancel).await?;

    if !run.succeeded() {
        bail!("pipeline run {} finished with failures", run.run_id);
    }
    Ok(())
}

fn parse_sources(requested: &[String]) -> Result<Vec<SourceKind>> {
    if requested.is_empty() {
        return Ok(SourceKind::all().to_vec());
    }
    requested
        .iter()
        .map(|name| match name.to_lowercase().as_str() {
            "sessions" => Ok(SourceKind::Sessions),
            "stations" => Ok(SourceKind::Stations),
            "weather" => Ok(SourceKind::Weather),
            other => bail!("unknown dataset: {other}"),
        })
        .collect()
}
