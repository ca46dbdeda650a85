//! Batch collection over the camera fleet.
//!
//! One batch walks the full target snapshot with a bounded worker pool,
//! fetches and scores a frame per camera, and persists the results. Every
//! per-camera failure is converted into a structured outcome at the task
//! boundary; the orchestrator only ever sees outcomes.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::alert::{send_failure_alert, AlertSink};
use crate::detect::DetectorBackend;
use crate::fetch::FrameSource;
use crate::retry::RetryExecutor;
use crate::storage::{BatchRecord, BatchStatus, DetectionRecord, DetectionStore};
use crate::targets::{CameraTarget, TargetSnapshot};
use crate::{now_s, timestamp_string};

/// Tuning for one collector instance.
#[derive(Clone, Copy, Debug)]
pub struct BatchSettings {
    /// Worker pool size. Kept low to stay polite to the shared upstream API.
    pub max_workers: usize,
    /// Batch failure rate above which (strictly) an alert fires.
    pub failure_threshold: f64,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            max_workers: 8,
            failure_threshold: 0.10,
        }
    }
}

/// Structured result of one camera task.
#[derive(Clone, Debug)]
pub struct TaskOutcome {
    pub address: String,
    pub success: bool,
    pub car_count: Option<u32>,
    pub confidence: Option<f32>,
    pub duration: Duration,
    pub error: Option<String>,
}

/// Aggregated accounting for one batch.
#[derive(Clone, Debug)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub total: usize,
    pub duration: Duration,
    pub status: BatchStatus,
    /// Outcomes keyed by address; ordering is irrelevant by design.
    pub outcomes: BTreeMap<String, TaskOutcome>,
}

pub struct BatchCollector {
    targets: Arc<TargetSnapshot>,
    fetcher: Arc<dyn FrameSource>,
    detector: Arc<Mutex<dyn DetectorBackend>>,
    store: Arc<Mutex<dyn DetectionStore>>,
    alerts: Arc<dyn AlertSink>,
    retry: RetryExecutor,
    settings: BatchSettings,
    show_progress: bool,
}

impl BatchCollector {
    pub fn new(
        targets: Arc<TargetSnapshot>,
        fetcher: Arc<dyn FrameSource>,
        detector: Arc<Mutex<dyn DetectorBackend>>,
        store: Arc<Mutex<dyn DetectionStore>>,
        alerts: Arc<dyn AlertSink>,
        retry: RetryExecutor,
        settings: BatchSettings,
    ) -> Self {
        Self {
            targets,
            fetcher,
            detector,
            store,
            alerts,
            retry,
            settings,
            show_progress: false,
        }
    }

    /// Show an indicatif progress bar on stderr while a batch runs.
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Run one full batch: every eligible camera, join barrier, aggregate,
    /// persist accounting, alert on elevated failure rate.
    pub fn run_batch(&self) -> BatchSummary {
        let batch_start = Instant::now();
        let batch_timestamp = timestamp_string();
        log::info!("starting batch at {batch_timestamp}");

        let work: Vec<(&String, &CameraTarget)> = self
            .targets
            .iter()
            .filter(|(_, target)| target.has_coordinates())
            .collect();
        let skipped = self.targets.len() - work.len();
        if skipped > 0 {
            log::debug!("skipping {skipped} cameras without coordinates");
        }

        let progress = self.progress_bar(work.len() as u64);
        let cursor = AtomicUsize::new(0);
        let outcomes: Mutex<BTreeMap<String, TaskOutcome>> = Mutex::new(BTreeMap::new());
        let workers = self.settings.max_workers.max(1).min(work.len().max(1));

        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let index = cursor.fetch_add(1, Ordering::SeqCst);
                    let Some(&(address, target)) = work.get(index) else {
                        break;
                    };
                    let outcome = self.run_task(address, target);
                    match &outcome.error {
                        None => log::debug!(
                            "SUCCESS {}: {} cars",
                            outcome.address,
                            outcome.car_count.unwrap_or(0)
                        ),
                        Some(err) => log::warn!("FAILED {}: {}", outcome.address, err),
                    }
                    let mut guard = outcomes.lock().unwrap_or_else(|e| e.into_inner());
                    guard.insert(outcome.address.clone(), outcome);
                    progress.inc(1);
                });
            }
        });
        progress.finish_and_clear();

        let outcomes = outcomes.into_inner().unwrap_or_else(|e| e.into_inner());
        // Skipped cameras stay in `total` but in neither success bucket, so
        // succeeded + failed can run below total.
        let total = self.targets.len();
        let succeeded = outcomes.values().filter(|o| o.success).count();
        let failed = work.len() - succeeded;
        let duration = batch_start.elapsed();
        let status = if failed == 0 {
            BatchStatus::Completed
        } else {
            BatchStatus::Partial
        };

        let record = BatchRecord {
            batch_timestamp,
            succeeded,
            failed,
            total,
            duration_secs: duration.as_secs_f64(),
            status,
        };
        {
            // A task that panicked mid-insert leaves the lock poisoned; the
            // batch accounting row still has to land.
            let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
            if let Err(err) = store.insert_batch_status(&record) {
                log::error!("failed to persist batch status: {err:#}");
            }
        }

        let failure_rate = if total > 0 {
            failed as f64 / total as f64
        } else {
            0.0
        };
        if failure_rate > self.settings.failure_threshold {
            let failed_addresses: Vec<String> = outcomes
                .values()
                .filter(|o| !o.success)
                .map(|o| o.address.clone())
                .collect();
            send_failure_alert(self.alerts.as_ref(), failed, total, &failed_addresses);
        }

        log::info!(
            "batch complete: {succeeded}/{total} cameras processed ({:.1}% failure rate) in {:.1}s",
            failure_rate * 100.0,
            duration.as_secs_f64()
        );

        BatchSummary {
            succeeded,
            failed,
            total,
            duration,
            status,
            outcomes,
        }
    }

    /// Task boundary: everything, including panics from a misbehaving
    /// backend, becomes a structured outcome.
    fn run_task(&self, address: &str, target: &CameraTarget) -> TaskOutcome {
        let start = Instant::now();
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
            self.process_camera(address, target)
        }));
        match result {
            Ok(outcome) => outcome,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "task panicked".to_string());
                TaskOutcome {
                    address: address.to_string(),
                    success: false,
                    car_count: None,
                    confidence: None,
                    duration: start.elapsed(),
                    error: Some(format!("internal error: {message}")),
                }
            }
        }
    }

    fn process_camera(&self, address: &str, target: &CameraTarget) -> TaskOutcome {
        let start = Instant::now();
        let fail = |error: String, duration: Duration| TaskOutcome {
            address: address.to_string(),
            success: false,
            car_count: None,
            confidence: None,
            duration,
            error: Some(error),
        };

        // Fetch with retry; the frame bytes escape through the closure.
        let mut frame_bytes: Option<Vec<u8>> = None;
        let attempt = self.retry.run(|| {
            let bytes = self.fetcher.fetch(&target.camera_id, now_s())?;
            let diagnostic = format!("{} bytes", bytes.len());
            frame_bytes = Some(bytes);
            Ok(diagnostic)
        });
        let Some(bytes) = frame_bytes.filter(|_| attempt.success) else {
            let error = attempt
                .error
                .unwrap_or_else(|| "failed to fetch image".to_string());
            return fail(error, start.elapsed());
        };

        let image = match image::load_from_memory(&bytes) {
            Ok(image) => image,
            Err(err) => return fail(format!("undecodable frame: {err}"), start.elapsed()),
        };

        // Detection failures are not retried within a batch. A sibling task
        // panicking inside the detector poisons the lock; recover the guard
        // so one bad task cannot fail the rest of the batch.
        let detection = {
            let mut detector = self.detector.lock().unwrap_or_else(|e| e.into_inner());
            match detector.detect(&image) {
                Ok(detection) => detection,
                Err(err) => return fail(format!("detection failed: {err:#}"), start.elapsed()),
            }
        };

        let duration = start.elapsed();
        let record = DetectionRecord {
            camera_address: address.to_string(),
            timestamp: timestamp_string(),
            car_count: detection.car_count,
            confidence: detection.confidence,
            processing_time_secs: duration.as_secs_f64(),
        };
        let persisted = self
            .store
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert_detection(&record);
        if let Err(err) = persisted {
            log::error!("failed to persist detection for {address}: {err:#}");
            return fail(format!("persistence failed: {err:#}"), duration);
        }

        TaskOutcome {
            address: address.to_string(),
            success: true,
            car_count: Some(detection.car_count),
            confidence: Some(detection.confidence),
            duration,
            error: None,
        }
    }

    fn progress_bar(&self, len: u64) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(len);
        bar.set_draw_target(ProgressDrawTarget::stderr());
        let style = ProgressStyle::with_template(
            "processing cameras [{bar:30}] {pos}/{len} ({eta})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        bar
    }
}
