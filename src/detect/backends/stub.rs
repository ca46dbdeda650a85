use anyhow::Result;
use image::DynamicImage;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;

/// Stub backend for wiring and tests. Returns a fixed detection.
pub struct StubBackend {
    detection: Detection,
}

impl StubBackend {
    pub fn new() -> Self {
        Self {
            detection: Detection::default(),
        }
    }

    /// Fix the returned count and confidence.
    pub fn with_detection(count: u32, confidence: f32) -> Self {
        Self {
            detection: Detection {
                car_count: count,
                confidence,
            },
        }
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _image: &DynamicImage) -> Result<Detection> {
        Ok(self.detection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_returns_configured_detection() {
        let mut backend = StubBackend::with_detection(4, 0.9);
        let img = DynamicImage::new_rgb8(8, 8);
        let detection = backend.detect(&img).unwrap();
        assert_eq!(detection.car_count, 4);
        assert_eq!(detection.confidence, 0.9);
    }
}
