#![cfg(feature = "backend-tract")]

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use image::DynamicImage;
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;

/// COCO class ids counted as vehicles: car, motorcycle, bus, truck.
const VEHICLE_CLASSES: [usize; 4] = [2, 3, 5, 7];
const NMS_IOU_THRESHOLD: f32 = 0.45;

/// Tract-based backend running a YOLO-family ONNX model.
///
/// Frames are letterbox-free resized to the model input and scored; the
/// output head is expected in the `[1, 4 + classes, anchors]` layout.
pub struct TractBackend {
    model: Option<TypedSimplePlan<TypedModel>>,
    model_path: PathBuf,
    width: u32,
    height: u32,
    confidence_threshold: f32,
}

impl TractBackend {
    /// Prepare a backend for the model at `model_path`. The model itself is
    /// loaded in `warm_up` so construction stays cheap and startup failures
    /// surface where the daemon can map them to a fatal exit.
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        Ok(Self {
            model: None,
            model_path: model_path.as_ref().to_path_buf(),
            width,
            height,
            confidence_threshold: 0.5,
        })
    }

    /// Override the default confidence threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    fn load_model(&self) -> Result<TypedSimplePlan<TypedModel>> {
        tract_onnx::onnx()
            .model_for_path(&self.model_path)
            .with_context(|| {
                format!("failed to load ONNX model from {}", self.model_path.display())
            })?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, self.height as usize, self.width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")
    }

    fn build_input(&self, image: &DynamicImage) -> Result<Tensor> {
        let resized = image
            .resize_exact(self.width, self.height, FilterType::Triangle)
            .to_rgb8();
        let width = self.width as usize;
        let height = self.height as usize;
        let pixels = resized.as_raw();

        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, height, width),
            |(_, channel, y, x)| {
                let idx = (y * width + x) * 3 + channel;
                pixels[idx] as f32 / 255.0
            },
        );
        Ok(input.into_tensor())
    }

    fn decode_output(&self, outputs: TVec<TValue>) -> Result<Detection> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape();
        if shape.len() != 3 || shape[0] != 1 || shape[1] < 5 {
            return Err(anyhow!("unexpected model output shape {:?}", shape));
        }
        let rows = shape[1];
        let anchors = shape[2];

        let mut candidates: Vec<(f32, [f32; 4])> = Vec::new();
        for a in 0..anchors {
            let mut best_class = 0usize;
            let mut best_score = f32::NEG_INFINITY;
            for class in 0..rows - 4 {
                let score = view[[0, 4 + class, a]];
                if score > best_score {
                    best_score = score;
                    best_class = class;
                }
            }
            if best_score > self.confidence_threshold && VEHICLE_CLASSES.contains(&best_class) {
                let cx = view[[0, 0, a]];
                let cy = view[[0, 1, a]];
                let w = view[[0, 2, a]];
                let h = view[[0, 3, a]];
                candidates.push((best_score, [cx - w / 2.0, cy - h / 2.0, w, h]));
            }
        }

        let kept = greedy_nms(candidates, NMS_IOU_THRESHOLD);
        let confidence = kept.iter().map(|(score, _)| *score).fold(0.0f32, f32::max);
        Ok(Detection {
            car_count: kept.len() as u32,
            confidence,
        })
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, image: &DynamicImage) -> Result<Detection> {
        if self.model.is_none() {
            self.model = Some(self.load_model()?);
        }
        let input = self.build_input(image)?;
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| anyhow!("model not loaded"))?;
        let outputs = model
            .run(tvec!(input.into()))
            .context("model inference failed")?;
        self.decode_output(outputs)
    }

    fn warm_up(&mut self) -> Result<()> {
        if self.model.is_none() {
            self.model = Some(self.load_model()?);
        }
        Ok(())
    }
}

/// Keep the highest-scoring boxes, dropping any with IoU above `threshold`
/// against an already kept box.
fn greedy_nms(mut candidates: Vec<(f32, [f32; 4])>, threshold: f32) -> Vec<(f32, [f32; 4])> {
    candidates.sort_by(|a, b| b.0.total_cmp(&a.0));
    let mut kept: Vec<(f32, [f32; 4])> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|k| iou(&candidate.1, &k.1) <= threshold) {
            kept.push(candidate);
        }
    }
    kept
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let ax2 = a[0] + a[2];
    let ay2 = a[1] + a[3];
    let bx2 = b[0] + b[2];
    let by2 = b[1] + b[3];
    let ix = (ax2.min(bx2) - a[0].max(b[0])).max(0.0);
    let iy = (ay2.min(by2) - a[1].max(b[1])).max(0.0);
    let inter = ix * iy;
    let union = a[2] * a[3] + b[2] * b[3] - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nms_drops_overlapping_lower_scores() {
        let boxes = vec![
            (0.9, [0.0, 0.0, 10.0, 10.0]),
            (0.8, [1.0, 1.0, 10.0, 10.0]),
            (0.7, [50.0, 50.0, 10.0, 10.0]),
        ];
        let kept = greedy_nms(boxes, 0.45);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].0, 0.9);
        assert_eq!(kept[1].0, 0.7);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        assert_eq!(iou(&[0.0, 0.0, 5.0, 5.0], &[10.0, 10.0, 5.0, 5.0]), 0.0);
    }
}
