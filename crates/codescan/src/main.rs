//! `codescan`: the development-facing front door to the pipeline.
//!
//! The reference splits "submit a scan" and "read scan status/results"
//! across a FastAPI service that is explicitly out of scope for this port
//! (spec.md §1). This binary wraps the same boundary contract as plain CLI
//! subcommands plus a way to run any of the three worker roles in-process,
//! so the whole pipeline can be exercised end-to-end without standing up an
//! HTTP server or a real message broker — the CLI equivalent of the
//! reference's `send_submission.py` dev tool and `python -m ...worker`
//! entry points.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use codescan_bus::{BusEndpoints, EventBus, ZmqEventBus};
use codescan_logging::{init_logging, LogConfig};
use codescan_protocol::SystemConfig;
use codescan_store::{create_pool, ensure_schema, DbConfig, FsBlobStore, FsCache};
use codescan_worker::{run_role, WorkerContext, WorkerRole};
use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, Color, ContentArrangement, Table};

#[derive(Parser, Debug)]
#[command(name = "codescan", about = "Code similarity scan pipeline")]
struct Cli {
    /// Emit debug-level logs to stderr regardless of CODESCAN_LOG_LEVEL.
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Submit every file directly under a directory as one scan.
    Submit {
        /// Directory containing the files to scan.
        dir: PathBuf,
    },

    /// Run one worker role's consume loop until killed.
    RunWorker {
        /// Which stage of the pipeline this process runs.
        #[arg(long, value_enum, value_name = "ROLE")]
        role: WorkerRole,
    },

    /// Print a scan's status and recent log entries.
    Status {
        /// Scan id returned by `submit`.
        scan_id: String,
    },

    /// Print a scan's ranked pairwise results.
    Results {
        /// Scan id returned by `submit`.
        scan_id: String,

        /// Maximum number of pairs to print.
        #[arg(long, default_value_t = 200)]
        limit: i64,
    },

    /// List recent scans and their summary stats.
    Scans {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// List recent alerts, optionally filtered to one scan.
    Alerts {
        #[arg(long)]
        scan_id: Option<String>,

        #[arg(long, default_value_t = 50)]
        limit: i64,
    },

    /// Run the ZeroMQ broker that fans PUSHed envelopes out to SUB clients.
    ///
    /// Every other subcommand is a connecting client; exactly one broker
    /// must be running before `submit` or `run-worker` can make progress.
    RunBroker,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(LogConfig {
        app_name: "codescan",
        verbose: cli.verbose,
    })?;

    let config = SystemConfig::from_env();
    let pool = create_pool(&DbConfig::new(config.db_url.clone()))
        .await
        .context("connect to relational store")?;
    ensure_schema(&pool).await.context("ensure schema")?;

    match cli.command {
        Commands::Submit { dir } => {
            let blobs = FsBlobStore::new(config.blob_root.clone());
            let bus = connect_bus(&config).await?;
            let scan_id = codescan::submit_directory(&pool, &blobs, &*bus, &config, &dir).await?;
            println!("submitted scan {scan_id}");
            println!("run `codescan status {scan_id}` to watch progress");
        }

        Commands::RunWorker { role } => {
            tracing::info!(%role, bus = %config.bus_endpoint, db = %config.db_url, "starting worker");
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

            let topic = role.input_topic(&ctx).to_string();
            let subscription = ZmqEventBus::subscribe(
                &endpoints,
                &[topic.as_str()],
                config.bus_connect_timeout_s,
                config.bus_connect_initial_delay_s,
                config.bus_connect_max_delay_s,
            )
            .await?;

            run_role(role, &ctx, Box::new(subscription)).await;
        }

        Commands::Status { scan_id } => {
            let view = codescan::scan_status(&pool, &scan_id).await?;
            println!("scan {scan_id}: {} ({}%)", view.status, view.progress);
            if !view.logs.is_empty() {
                println!();
                for entry in &view.logs {
                    println!("  [{}] {}", entry.time, entry.message);
                }
            }
        }

        Commands::Results { scan_id, limit } => match codescan::scan_results(&pool, &scan_id, limit).await? {
            codescan::ResultsView::Processing(_) => println!("scan {scan_id} is still processing"),
            codescan::ResultsView::Ready(view) => {
                println!(
                    "{} file(s), {} pair(s), {} ms",
                    view.meta.n_files, view.meta.n_pairs, view.meta.runtime_ms
                );
                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(vec![
                        Cell::new("file a").fg(Color::Cyan),
                        Cell::new("file b").fg(Color::Cyan),
                        Cell::new("similarity").fg(Color::Cyan),
                        Cell::new("label").fg(Color::Cyan),
                    ]);
                for pair in &view.pairs {
                    table.add_row(vec![
                        pair.file_a.clone(),
                        pair.file_b.clone(),
                        format!("{:.1}", pair.similarity),
                        label_cell(pair.label),
                    ]);
                }
                println!("{table}");
            }
        },

        Commands::Scans { limit } => {
            let scans = codescan_store::repository::list_scans_summary(&pool, limit).await?;
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL_CONDENSED)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec![
                    Cell::new("scan id").fg(Color::Cyan),
                    Cell::new("status").fg(Color::Cyan),
                    Cell::new("progress").fg(Color::Cyan),
                    Cell::new("files").fg(Color::Cyan),
                    Cell::new("pairs").fg(Color::Cyan),
                    Cell::new("top sim").fg(Color::Cyan),
                    Cell::new("created").fg(Color::Cyan),
                ]);
            for scan in &scans {
                table.add_row(vec![
                    scan.scan_id.clone(),
                    scan.status.clone(),
                    format!("{}%", scan.progress),
                    scan.file_count.to_string(),
                    scan.pair_count.to_string(),
                    format!("{:.1}", scan.top_similarity),
                    scan.created_at.clone(),
                ]);
            }
            println!("{table}");
        }

        Commands::RunBroker => {
            let endpoints = BusEndpoints::derive(&config.bus_endpoint)?;
            tracing::info!(ingress = %endpoints.ingress, egress = %endpoints.egress, "starting bus broker");
            codescan_bus::run_broker(&endpoints).await?;
        }

        Commands::Alerts { scan_id, limit } => {
            let alerts = codescan_store::repository::list_alerts(&pool, scan_id.as_deref(), limit).await?;
            if alerts.is_empty() {
                println!("no alerts");
            }
            for alert in &alerts {
                println!(
                    "[{}] {} {} scan={} {}",
                    alert.created_at,
                    alert.service,
                    alert.error_code,
                    alert.scan_id.as_deref().unwrap_or("-"),
                    alert.message
                );
            }
        }
    }

    Ok(())
}

async fn connect_bus(config: &SystemConfig) -> Result<Box<dyn EventBus>> {
    let endpoints = BusEndpoints::derive(&config.bus_endpoint)?;
    let bus = ZmqEventBus::connect(
        &endpoints,
        config.bus_connect_timeout_s,
        config.bus_connect_initial_delay_s,
        config.bus_connect_max_delay_s,
    )
    .await?;
    Ok(Box::new(bus))
}

fn label_cell(label: &str) -> Cell {
    let color = match label {
        "high" => Color::Red,
        "medium" => Color::Yellow,
        _ => Color::Green,
    };
    Cell::new(label).fg(color)
}
