use serde::{Deserialize, Serialize};

/// One face found in a frame, in native video pixels. `origin` is the
/// top-left corner.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionBox {
    pub origin_x: f32,
    pub origin_y: f32,
    pub width: f32,
    pub height: f32,
}

impl DetectionBox {
    pub fn new(origin_x: f32, origin_y: f32, width: f32, height: f32) -> Self {
        Self {
            origin_x,
            origin_y,
            width,
            height,
        }
    }

    /// Clamp to a `width` x `height` frame. Returns `None` when nothing of
    /// the box remains inside.
    pub fn clamped(&self, frame_width: u32, frame_height: u32) -> Option<Self> {
        let (fw, fh) = (frame_width as f32, frame_height as f32);
        let x1 = self.origin_x.clamp(0.0, fw);
        let y1 = self.origin_y.clamp(0.0, fh);
        let x2 = (self.origin_x + self.width).clamp(0.0, fw);
        let y2 = (self.origin_y + self.height).clamp(0.0, fh);
        if x2 - x1 <= 0.0 || y2 - y1 <= 0.0 {
            return None;
        }
        Some(Self::new(x1, y1, x2 - x1, y2 - y1))
    }
}

/// Result of running a face detector on one frame.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub detections: Vec<DetectionBox>,
}

impl DetectionResult {
    pub fn new(detections: Vec<DetectionBox>) -> Self {
        Self { detections }
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }
}
