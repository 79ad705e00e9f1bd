//! `queue-worker`: parses CLI flags and a TOML config file, wires a Mongo-backed store and a
//! detached-process launcher, and runs the worker core's [`Worker`] daemon until a shutdown
//! signal arrives.
//!
//! Grounded on §4.10's expansion of the ambient CLI/config/logging stack.

mod config;
mod launcher;

use clap::Parser;
use mongodb::options::ClientOptions;
use mongodb::Client;
use queue_worker_core::context::{default_identity, WorkerContext};
use queue_worker_core::stats::TracingStatsSink;
use queue_worker_core::store::NeverMaintenance;
use queue_worker_core::worker::{Worker, WorkerConfig};
use queue_worker_core::execution_plan::PhaseIntervals;
use queue_worker_store_mongo::MongoStore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "queue-worker", about = "Distributed job-queue worker daemon")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "queue-worker.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = config::load(&args.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.logging.filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let identifier = config.worker.identifier.clone().unwrap_or_else(default_identity);
    let hostname = default_identity();

    let client_options = ClientOptions::parse(&config.store.mongo_uri).await?;
    let client = Client::with_options(client_options)?;
    let database = client.database(&config.store.database);
    let store = Arc::new(MongoStore::new(&database));
    store.ensure_indexes().await?;

    let launcher = Arc::new(launcher::ProcessLauncher::new(
        store.clone(),
        store.clone(),
        config.folder.home.clone(),
    ));

    let ctx = WorkerContext::new(
        identifier.clone(),
        hostname,
        store.clone(),
        store.clone(),
        store.clone(),
        Arc::new(NeverMaintenance),
        Arc::new(TracingStatsSink),
        launcher,
    );

    tracing::info!(identifier = %identifier, "starting worker");

    let mut worker = Worker::new(
        ctx,
        WorkerConfig {
            phases: PhaseIntervals {
                work_jobs: config.worker.execution_plan.work_jobs,
                remove_jobs: config.worker.execution_plan.remove_jobs,
                flag_jobs: config.worker.execution_plan.flag_jobs,
                collect_stats: config.worker.execution_plan.collect_stats,
            },
            avg_stats_secs: config.worker.avg_stats_secs,
            max_cpu: config.worker.max_cpu,
            min_free_ram: config.worker.min_free_ram,
        },
    );

    worker.run_until_halt().await?;
    Ok(())
}
