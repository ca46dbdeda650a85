use anyhow::{anyhow, Result};

use crate::config::DetectorSettings;
use crate::detect::backend::DetectorBackend;

pub mod stub;
#[cfg(feature = "backend-tract")]
pub mod tract;

pub use stub::StubBackend;
#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;

/// Build the configured detector backend.
pub fn build_backend(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    match settings.backend.as_str() {
        "stub" => Ok(Box::new(StubBackend::new())),
        #[cfg(feature = "backend-tract")]
        "tract" => {
            let model_path = settings
                .model_path
                .as_ref()
                .ok_or_else(|| anyhow!("detector backend 'tract' requires a model path"))?;
            let backend = TractBackend::new(
                model_path,
                settings.input_width,
                settings.input_height,
            )?
            .with_threshold(settings.confidence_threshold);
            Ok(Box::new(backend))
        }
        #[cfg(not(feature = "backend-tract"))]
        "tract" => Err(anyhow!(
            "detector backend 'tract' requires the backend-tract feature"
        )),
        other => Err(anyhow!("unknown detector backend '{}'", other)),
    }
}
