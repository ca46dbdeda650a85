use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::collector::BatchSettings;
use crate::fetch::FetchSettings;
use crate::retry::RetryPolicy;

const DEFAULT_DB_PATH: &str = "traffic_data.db";
const DEFAULT_CAMERA_FILE: &str = "camera_id_lat_lng.json";
const DEFAULT_RESULTS_DIR: &str = "results";
const DEFAULT_INTERVAL_MINS: u64 = 15;
const DEFAULT_MAX_WORKERS: usize = 8;
const DEFAULT_FAILURE_THRESHOLD: f64 = 0.10;
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_INITIAL_DELAY_SECS: f64 = 1.0;
const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;
const DEFAULT_PACING_DELAY_SECS: f64 = 1.0;
const DEFAULT_DETECTOR_BACKEND: &str = "stub";
const DEFAULT_INPUT_WIDTH: u32 = 640;
const DEFAULT_INPUT_HEIGHT: u32 = 640;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
// Cooldown after a failed tick, added on top of the interval.
const ERROR_COOLDOWN_EXTRA_SECS: u64 = 300;

#[derive(Debug, Deserialize, Default)]
struct CollectorConfigFile {
    db_path: Option<String>,
    camera_file: Option<PathBuf>,
    results_dir: Option<PathBuf>,
    interval_mins: Option<u64>,
    batch: Option<BatchConfigFile>,
    fetch: Option<FetchConfigFile>,
    retry: Option<RetryConfigFile>,
    detector: Option<DetectorConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct BatchConfigFile {
    max_workers: Option<usize>,
    failure_threshold: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct FetchConfigFile {
    url_template: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct RetryConfigFile {
    max_attempts: Option<u32>,
    initial_delay_secs: Option<f64>,
    backoff_factor: Option<f64>,
    pacing_delay_secs: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    confidence_threshold: Option<f32>,
}

/// Detector backend selection.
#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: String,
    pub model_path: Option<PathBuf>,
    pub input_width: u32,
    pub input_height: u32,
    pub confidence_threshold: f32,
}

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub db_path: String,
    pub camera_file: PathBuf,
    pub results_dir: PathBuf,
    pub interval: Duration,
    pub batch: BatchSettings,
    pub fetch: FetchSettings,
    pub retry: RetryPolicy,
    pub detector: DetectorSettings,
}

impl CollectorConfig {
    /// Cooldown applied after a failed scheduler tick; always longer than
    /// the tick interval.
    pub fn error_cooldown(&self) -> Duration {
        self.interval + Duration::from_secs(ERROR_COOLDOWN_EXTRA_SECS)
    }

    pub fn load() -> Result<Self> {
        let config_path = std::env::var("TRAFFICWATCH_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: CollectorConfigFile) -> Self {
        let batch = file.batch.unwrap_or_default();
        let fetch = file.fetch.unwrap_or_default();
        let retry = file.retry.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();

        Self {
            db_path: file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            camera_file: file
                .camera_file
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CAMERA_FILE)),
            results_dir: file
                .results_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_RESULTS_DIR)),
            interval: Duration::from_secs(
                file.interval_mins.unwrap_or(DEFAULT_INTERVAL_MINS) * 60,
            ),
            batch: BatchSettings {
                max_workers: batch.max_workers.unwrap_or(DEFAULT_MAX_WORKERS),
                failure_threshold: batch
                    .failure_threshold
                    .unwrap_or(DEFAULT_FAILURE_THRESHOLD),
            },
            fetch: FetchSettings {
                url_template: fetch
                    .url_template
                    .unwrap_or_else(|| FetchSettings::default().url_template),
                timeout: Duration::from_secs(
                    fetch.timeout_secs.unwrap_or(DEFAULT_FETCH_TIMEOUT_SECS),
                ),
            },
            retry: RetryPolicy {
                max_attempts: retry.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
                initial_delay: Duration::from_secs_f64(
                    retry.initial_delay_secs.unwrap_or(DEFAULT_INITIAL_DELAY_SECS),
                ),
                backoff_factor: retry.backoff_factor.unwrap_or(DEFAULT_BACKOFF_FACTOR),
                pacing_delay: Duration::from_secs_f64(
                    retry.pacing_delay_secs.unwrap_or(DEFAULT_PACING_DELAY_SECS),
                ),
            },
            detector: DetectorSettings {
                backend: detector
                    .backend
                    .unwrap_or_else(|| DEFAULT_DETECTOR_BACKEND.to_string()),
                model_path: detector.model_path,
                input_width: detector.input_width.unwrap_or(DEFAULT_INPUT_WIDTH),
                input_height: detector.input_height.unwrap_or(DEFAULT_INPUT_HEIGHT),
                confidence_threshold: detector
                    .confidence_threshold
                    .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("TRAFFICWATCH_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(path) = std::env::var("TRAFFICWATCH_CAMERA_FILE") {
            if !path.trim().is_empty() {
                self.camera_file = PathBuf::from(path);
            }
        }
        if let Ok(path) = std::env::var("TRAFFICWATCH_RESULTS_DIR") {
            if !path.trim().is_empty() {
                self.results_dir = PathBuf::from(path);
            }
        }
        if let Ok(mins) = std::env::var("TRAFFICWATCH_INTERVAL_MINS") {
            if !mins.trim().is_empty() {
                let mins: u64 = mins
                    .trim()
                    .parse()
                    .context("TRAFFICWATCH_INTERVAL_MINS must be an integer")?;
                self.interval = Duration::from_secs(mins * 60);
            }
        }
        if let Ok(workers) = std::env::var("TRAFFICWATCH_MAX_WORKERS") {
            if !workers.trim().is_empty() {
                self.batch.max_workers = workers
                    .trim()
                    .parse()
                    .context("TRAFFICWATCH_MAX_WORKERS must be an integer")?;
            }
        }
        if let Ok(url) = std::env::var("TRAFFICWATCH_FETCH_URL") {
            if !url.trim().is_empty() {
                self.fetch.url_template = url;
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(anyhow!("interval_mins must be at least 1"));
        }
        if self.batch.max_workers == 0 {
            return Err(anyhow!("batch.max_workers must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.batch.failure_threshold) {
            return Err(anyhow!(
                "batch.failure_threshold must be within [0, 1], got {}",
                self.batch.failure_threshold
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(anyhow!("retry.max_attempts must be at least 1"));
        }
        if self.retry.backoff_factor < 1.0 {
            return Err(anyhow!(
                "retry.backoff_factor must be >= 1.0, got {}",
                self.retry.backoff_factor
            ));
        }
        if self.detector.backend == "tract" && self.detector.model_path.is_none() {
            return Err(anyhow!("detector.model_path is required for the tract backend"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<CollectorConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
