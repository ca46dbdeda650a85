use anyhow::Result;
use image::DynamicImage;

use crate::detect::result::Detection;

/// Detector backend trait.
///
/// Implementations score a single decoded frame and return a vehicle count
/// with a confidence. The collector shares one instance across workers
/// behind a mutex, so `detect` may assume exclusive access for the duration
/// of a call but must not retain the frame afterwards.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Count vehicles in a frame.
    fn detect(&mut self, image: &DynamicImage) -> Result<Detection>;

    /// Optional warm-up hook. Model-backed implementations load and verify
    /// their artifact here so startup fails fast on a missing model.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

impl DetectorBackend for Box<dyn DetectorBackend> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn detect(&mut self, image: &DynamicImage) -> Result<Detection> {
        (**self).detect(image)
    }

    fn warm_up(&mut self) -> Result<()> {
        (**self).warm_up()
    }
}
