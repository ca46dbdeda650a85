//! Two-phase camera reliability audit.
//!
//! Phase 1 probes every target once (with retries) to split the fleet into
//! working and dead. Phase 2 runs exactly five trials against each working
//! camera to estimate a success rate and average latency.
//!
//! The audit is deliberately sequential. Hammering a few hundred upstream
//! endpoints in parallel trips rate limiting and gets the collector's
//! source address flagged; the retry executor's pacing delay is the
//! safety mechanism here.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::fetch::FrameSource;
use crate::retry::{Attempt, RetryExecutor};
use crate::targets::TargetSnapshot;
use crate::validate::validate_frame;
use crate::{file_timestamp, now_s};

/// Trials per camera in the reliability phase.
pub const RELIABILITY_TRIALS: usize = 5;

const LATEST_REPORT_NAME: &str = "latest_report.json";

/// Phase-2 statistics for one camera.
#[derive(Clone, Debug, Serialize)]
pub struct ReliabilityStats {
    /// Successes over [`RELIABILITY_TRIALS`].
    pub success_rate: f64,
    /// Mean latency of successful trials; absent when none succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_latency_secs: Option<f64>,
    pub trials: Vec<Attempt>,
}

/// Immutable audit snapshot, serialized as the report artifact.
#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub timestamp: String,
    pub total_cameras: usize,
    pub working_cameras: usize,
    pub dead_cameras: usize,
    pub runtime_secs: f64,
    pub phase1: BTreeMap<String, Attempt>,
    pub phase2: BTreeMap<String, ReliabilityStats>,
}

pub struct HealthAuditor {
    targets: Arc<TargetSnapshot>,
    fetcher: Arc<dyn FrameSource>,
    retry: RetryExecutor,
    results_dir: PathBuf,
}

impl HealthAuditor {
    pub fn new(
        targets: Arc<TargetSnapshot>,
        fetcher: Arc<dyn FrameSource>,
        retry: RetryExecutor,
        results_dir: PathBuf,
    ) -> Self {
        Self {
            targets,
            fetcher,
            retry,
            results_dir,
        }
    }

    /// Run both phases and write the report artifacts.
    ///
    /// Per-camera failures are recorded, never raised; only an unwritable
    /// results directory aborts the audit.
    pub fn run(&self) -> Result<HealthReport> {
        let start = Instant::now();

        let phase1 = self.phase1_quick_check();
        let working: Vec<&String> = self
            .targets
            .keys()
            .filter(|addr| phase1.get(*addr).is_some_and(|a| a.success))
            .collect();
        log::info!(
            "phase 1 complete: {}/{} cameras working",
            working.len(),
            self.targets.len()
        );

        let phase2 = self.phase2_reliability_check(&working);

        let report = HealthReport {
            timestamp: chrono::Local::now().to_rfc3339(),
            total_cameras: self.targets.len(),
            working_cameras: working.len(),
            dead_cameras: self.targets.len() - working.len(),
            runtime_secs: start.elapsed().as_secs_f64(),
            phase1,
            phase2,
        };

        self.write_report(&report)?;
        Ok(report)
    }

    /// One retried probe against every target, in address order.
    fn phase1_quick_check(&self) -> BTreeMap<String, Attempt> {
        log::info!("starting phase 1: quick status check");
        let mut results = BTreeMap::new();
        for (address, target) in self.targets.iter() {
            log::debug!("testing camera {address}");
            let attempt = self.probe_camera(&target.camera_id);
            results.insert(address.clone(), attempt);
        }
        results
    }

    /// Exactly [`RELIABILITY_TRIALS`] probes per surviving camera.
    fn phase2_reliability_check(&self, working: &[&String]) -> BTreeMap<String, ReliabilityStats> {
        log::info!("starting phase 2: reliability check");
        let mut results = BTreeMap::new();
        for address in working {
            let Some(target) = self.targets.get(*address) else {
                continue;
            };
            log::debug!("reliability test for {address}");
            let trials: Vec<Attempt> = (0..RELIABILITY_TRIALS)
                .map(|_| self.probe_camera(&target.camera_id))
                .collect();

            let successes = trials.iter().filter(|t| t.success).count();
            let avg_latency_secs = if successes > 0 {
                let total: f64 = trials
                    .iter()
                    .filter(|t| t.success)
                    .map(|t| t.latency.as_secs_f64())
                    .sum();
                Some(total / successes as f64)
            } else {
                None
            };

            results.insert(
                (*address).clone(),
                ReliabilityStats {
                    success_rate: successes as f64 / RELIABILITY_TRIALS as f64,
                    avg_latency_secs,
                    trials,
                },
            );
        }
        results
    }

    fn probe_camera(&self, camera_id: &str) -> Attempt {
        self.retry.run(|| {
            let bytes = self.fetcher.fetch(camera_id, now_s())?;
            validate_frame(&bytes)
        })
    }

    /// Write the timestamped report plus the stable latest pointer. The
    /// latest pointer goes through write-then-rename so readers never see a
    /// half-written file under the stable name.
    fn write_report(&self, report: &HealthReport) -> Result<()> {
        std::fs::create_dir_all(&self.results_dir).with_context(|| {
            format!("failed to create results dir {}", self.results_dir.display())
        })?;
        let json = serde_json::to_string_pretty(report).context("serialize health report")?;

        let report_path = self
            .results_dir
            .join(format!("report_{}.json", file_timestamp()));
        std::fs::write(&report_path, &json)
            .with_context(|| format!("write report {}", report_path.display()))?;

        let latest_path = self.results_dir.join(LATEST_REPORT_NAME);
        replace_file(&latest_path, &json)?;

        log::info!("health check complete, report saved to {}", report_path.display());
        Ok(())
    }
}

fn replace_file(path: &Path, contents: &str) -> Result<()> {
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp report {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("replace latest report {}", path.display()))?;
    Ok(())
}
