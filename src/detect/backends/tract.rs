#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::FaceDetector;
use crate::detect::result::{DetectionBox, DetectionResult};
use crate::frame::DetectorView;

type Plan = TypedRunnableModel<TypedModel>;

/// Tract-based ONNX face detector.
///
/// Expects a model taking `1x3xHxW` RGB in `[0, 1]` and producing rows of
/// `[x1, y1, x2, y2, score]` in normalized coordinates. Loads the model from
/// a local file; no network I/O.
pub struct TractDetector {
    model_path: std::path::PathBuf,
    model: Option<Plan>,
    width: u32,
    height: u32,
    min_confidence: f32,
}

impl TractDetector {
    /// Load an ONNX model from disk and prepare it for `width` x `height` frames.
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        let model_path = model_path.as_ref().to_path_buf();
        let model = load_plan(&model_path, width, height)?;
        Ok(Self {
            model_path,
            model: Some(model),
            width,
            height,
            min_confidence: 0.5,
        })
    }

    pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    fn build_input(&self, view: &DetectorView<'_>) -> Result<Tensor> {
        if view.width() != self.width || view.height() != self.height {
            return Err(anyhow!(
                "frame size {}x{} does not match model input {}x{}",
                view.width(),
                view.height(),
                self.width,
                self.height
            ));
        }
        let pixels = view.pixels();
        let width = self.width as usize;
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, width),
            |(_, channel, y, x)| {
                let idx = (y * width + x) * 3 + channel;
                pixels[idx] as f32 / 255.0
            },
        );
        Ok(input.into_tensor())
    }

    fn extract_boxes(&self, outputs: TVec<TValue>) -> Result<Vec<DetectionBox>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let values = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let flat: Vec<f32> = values.iter().copied().collect();
        if flat.len() % 5 != 0 {
            return Err(anyhow!(
                "model output length {} is not a multiple of 5",
                flat.len()
            ));
        }

        let (fw, fh) = (self.width as f32, self.height as f32);
        let boxes = flat
            .chunks_exact(5)
            .filter(|row| row[4].is_finite() && row[4] >= self.min_confidence)
            .filter_map(|row| {
                DetectionBox::new(
                    row[0] * fw,
                    row[1] * fh,
                    (row[2] - row[0]) * fw,
                    (row[3] - row[1]) * fh,
                )
                .clamped(self.width, self.height)
            })
            .collect();
        Ok(boxes)
    }
}

fn load_plan(model_path: &Path, width: u32, height: u32) -> Result<Plan> {
    tract_onnx::onnx()
        .model_for_path(model_path)
        .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
        .with_input_fact(
            0,
            InferenceFact::dt_shape(
                f32::datum_type(),
                tvec!(1, 3, height as usize, width as usize),
            ),
        )
        .context("failed to set input fact")?
        .into_optimized()
        .context("failed to optimize ONNX model")?
        .into_runnable()
        .context("failed to build runnable ONNX model")
}

impl FaceDetector for TractDetector {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect_for_video(
        &mut self,
        view: &DetectorView<'_>,
        _timestamp_ms: u64,
    ) -> Result<DetectionResult> {
        let input = self.build_input(view)?;
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| anyhow!("model not loaded"))?;
        let outputs = model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        Ok(DetectionResult::new(self.extract_boxes(outputs)?))
    }

    fn is_healthy(&self) -> bool {
        self.model.is_some()
    }

    fn reinitialize(&mut self) -> Result<()> {
        self.model = None;
        self.model = Some(load_plan(&self.model_path, self.width, self.height)?);
        Ok(())
    }
}
