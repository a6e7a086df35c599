//! Worker process entry point: runs a single worker role's consume loop
//! until the process is killed.
//!
//! Usage:
//!     codescan-worker --role normalizer
//!     codescan-worker --role candidate-retrieval
//!     codescan-worker --role scoring

use std::sync::Arc;

use clap::Parser;
use codescan_bus::{BusEndpoints, ZmqEventBus};
use codescan_logging::{init_logging, LogConfig};
use codescan_protocol::SystemConfig;
use codescan_store::{create_pool, ensure_schema, DbConfig, FsBlobStore, FsCache};
use codescan_worker::{run_role, WorkerContext, WorkerRole};

#[derive(Parser, Debug)]
#[command(name = "codescan-worker", about = "Code similarity scan pipeline worker")]
struct Args {
    /// Which stage of the pipeline this process runs.
    #[arg(long, value_enum, value_name = "ROLE")]
    role: WorkerRole,

    /// Emit debug-level logs to stderr regardless of CODESCAN_LOG_LEVEL.
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(LogConfig {
        app_name: "codescan-worker",
        verbose: args.verbose,
    })?;

    let config = SystemConfig::from_env();
    tracing::info!(role = %args.role, bus = %config.bus_endpoint, db = %config.db_url, "starting worker");

    let pool = create_pool(&DbConfig::new(config.db_url.clone())).await?;
    ensure_schema(&pool).await?;

    let blobs = Arc::new(FsBlobStore::new(config.blob_root.clone()));
    let cache = Arc::new(FsCache::new(config.cache_root.clone()));

    let endpoints = BusEndpoints::derive(&config.bus_endpoint)?;
    let bus = ZmqEventBus::connect(
        &endpoints,
        config.bus_connect_timeout_s,
        config.bus_connect_initial_delay_s,
        config.bus_connect_max_delay_s,
    )
    .await?;

    let ctx = WorkerContext {
        pool,
        cache,
        blobs,
        bus: Arc::new(bus),
        config: config.clone(),
    };

    let topic = args.role.input_topic(&ctx).to_string();
    let subscription = ZmqEventBus::subscribe(
        &endpoints,
        &[topic.as_str()],
        config.bus_connect_timeout_s,
        config.bus_connect_initial_delay_s,
        config.bus_connect_max_delay_s,
    )
    .await?;

    run_role(args.role, &ctx, Box::new(subscription)).await;
    Ok(())
}
