//! Poolshare stress harness.
//!
//! Hammers a registry with concurrent acquire/release churn against
//! simulated pools and reports whether every created pool was closed.

mod workload;

use anyhow::{bail, Result};
use clap::Parser;
use std::time::{Duration, Instant};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use workload::Workload;

#[derive(Parser, Debug)]
#[command(name = "poolshare-stress")]
#[command(about = "Concurrent acquire/release workload for the poolshare registry")]
struct Args {
    /// Number of concurrent workers
    #[arg(short, long, default_value = "10")]
    workers: usize,

    /// Acquire/release cycles per worker
    #[arg(short, long, default_value = "100")]
    iterations: usize,

    /// Number of distinct keys to spread workers over
    #[arg(short, long, default_value = "1")]
    keys: usize,

    /// Simulated pool creation latency in milliseconds
    #[arg(long, default_value = "0")]
    create_delay_ms: u64,

    /// Fail every n-th pool creation (0 = never)
    #[arg(long, default_value = "0")]
    fail_every: u64,

    /// Use the async registry with Tokio tasks instead of threads
    #[arg(long)]
    async_mode: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(args.debug)
        .compact()
        .init();

    if args.keys == 0 {
        bail!("--keys must be at least 1");
    }

    let workload = Workload {
        workers: args.workers,
        iterations: args.iterations,
        keys: args.keys,
        create_delay: Duration::from_millis(args.create_delay_ms),
        fail_every: args.fail_every,
    };

    info!(
        "Running {} workers x {} iterations over {} keys ({})",
        workload.workers,
        workload.iterations,
        workload.keys,
        if args.async_mode { "tasks" } else { "threads" }
    );

    let started = Instant::now();
    let report = if args.async_mode {
        workload::run_tasks(&workload).await
    } else {
        let workload = workload.clone();
        tokio::task::spawn_blocking(move || workload::run_threads(&workload)).await?
    };
    info!("Finished in {:?}", started.elapsed());

    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.is_clean() {
        bail!(
            "registry not clean: created {} closed {} leftover keys {:?}",
            report.created,
            report.closed,
            report.leftover_keys
        );
    }

    Ok(())
}
