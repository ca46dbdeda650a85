//! Camera target source.
//!
//! Targets come from a JSON file mapping street address to camera id and
//! optional coordinates. The snapshot is loaded once at process start and
//! treated as read-only for the lifetime of the run.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

/// One remote camera endpoint.
#[derive(Clone, Debug, Deserialize)]
pub struct CameraTarget {
    pub camera_id: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

impl CameraTarget {
    /// Cameras without both coordinates are skipped by the collector.
    pub fn has_coordinates(&self) -> bool {
        self.latitude.is_some() && self.longitude.is_some()
    }
}

/// Read-only snapshot of all camera targets, keyed by address.
pub type TargetSnapshot = BTreeMap<String, CameraTarget>;

/// Load the target snapshot from a JSON file.
pub fn load_targets(path: &Path) -> Result<TargetSnapshot> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read camera target file {}", path.display()))?;
    let targets: TargetSnapshot = serde_json::from_str(&raw)
        .with_context(|| format!("invalid camera target file {}", path.display()))?;
    if targets.is_empty() {
        return Err(anyhow!("camera target file {} is empty", path.display()));
    }
    log::info!("loaded {} cameras from {}", targets.len(), path.display());
    Ok(targets)
}
