//! collectord - continuous traffic data collection daemon
//!
//! This daemon:
//! 1. Loads the camera target snapshot and opens the SQLite store
//! 2. Builds the configured detection backend and warms it up
//! 3. Runs one collection batch immediately, then every interval
//! 4. Skips ticks that fire while a batch is in flight
//! 5. Survives failed batches with a cooldown, exits cleanly on Ctrl-C

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use std::io::IsTerminal;

use trafficwatch::alert::{send_startup_notification, AlertSink, LogAlertSink};
use trafficwatch::detect::{build_backend, DetectorBackend};
use trafficwatch::fetch::HttpFrameSource;
use trafficwatch::storage::DetectionStore;
use trafficwatch::{
    load_targets, BatchCollector, CollectorConfig, RetryExecutor, Scheduler, SqliteStore,
};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(err) = run() {
        log::error!("fatal: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cfg = CollectorConfig::load().context("load collector configuration")?;

    let targets = Arc::new(load_targets(&cfg.camera_file)?);
    let store = SqliteStore::open(&cfg.db_path)
        .with_context(|| format!("initialize database {}", cfg.db_path))?;
    let store: Arc<Mutex<dyn DetectionStore>> = Arc::new(Mutex::new(store));

    let fetcher = Arc::new(HttpFrameSource::new(cfg.fetch.clone())?);

    let mut backend = build_backend(&cfg.detector).context("build detector backend")?;
    log::info!("initializing detector backend '{}'", backend.name());
    backend.warm_up().context("warm up detector backend")?;
    let detector: Arc<Mutex<dyn DetectorBackend>> = Arc::new(Mutex::new(backend));

    let alerts: Arc<dyn AlertSink> = Arc::new(LogAlertSink);
    send_startup_notification(alerts.as_ref(), targets.len(), cfg.interval.as_secs() / 60);

    let collector = BatchCollector::new(
        targets.clone(),
        fetcher,
        detector,
        store.clone(),
        alerts,
        RetryExecutor::new(cfg.retry),
        cfg.batch,
    )
    .with_progress(std::io::stderr().is_terminal());

    {
        let mut store = store.lock().unwrap_or_else(|e| e.into_inner());
        match store.last_batch_timestamp() {
            Ok(Some(ts)) => log::info!("last completed batch: {ts}"),
            Ok(None) => log::info!("no previous completed batch"),
            Err(err) => log::warn!("could not read last batch timestamp: {err:#}"),
        }
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    ctrlc::set_handler(move || {
        log::info!("shutdown signal received, finishing current batch...");
        flag.store(true, Ordering::SeqCst);
    })
    .context("set Ctrl-C handler")?;

    log::info!(
        "starting continuous collection: {} cameras every {} minutes, {} workers",
        targets.len(),
        cfg.interval.as_secs() / 60,
        cfg.batch.max_workers
    );

    let scheduler = Scheduler::new(cfg.interval, cfg.error_cooldown(), shutdown);
    scheduler.run(|| {
        collector.run_batch();
        Ok(())
    });

    log::info!("collection stopped");
    Ok(())
}
