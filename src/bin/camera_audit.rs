//! camera_audit - two-phase camera reliability check
//!
//! Probes every configured camera once, then runs five reliability trials
//! against each camera that responded, and writes a JSON report plus a
//! stable `latest_report.json` pointer.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use trafficwatch::audit::HealthAuditor;
use trafficwatch::fetch::HttpFrameSource;
use trafficwatch::{load_targets, CollectorConfig, RetryExecutor};

#[derive(Parser, Debug)]
#[command(name = "camera_audit", about = "Audit camera fleet reliability")]
struct Args {
    /// Collector config file (defaults to $TRAFFICWATCH_CONFIG).
    #[arg(long, env = "TRAFFICWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Directory for report artifacts (overrides the config).
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(err) = run(Args::parse()) {
        log::error!("health check failed: {err:#}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let cfg = CollectorConfig::load_from(args.config.as_deref())
        .context("load collector configuration")?;
    let results_dir = args.output_dir.unwrap_or_else(|| cfg.results_dir.clone());

    let targets = Arc::new(load_targets(&cfg.camera_file)?);
    let fetcher = Arc::new(HttpFrameSource::new(cfg.fetch.clone())?);

    let auditor = HealthAuditor::new(
        targets,
        fetcher,
        RetryExecutor::new(cfg.retry),
        results_dir.clone(),
    );
    let report = auditor.run()?;

    println!("Health Check Summary:");
    println!("Total Cameras: {}", report.total_cameras);
    println!("Working Cameras: {}", report.working_cameras);
    println!("Dead Cameras: {}", report.dead_cameras);
    println!("Runtime: {:.1} seconds", report.runtime_secs);
    println!(
        "Full report saved to: {}",
        results_dir.join("latest_report.json").display()
    );
    Ok(())
}
