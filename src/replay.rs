//! Recorded session replay.
//!
//! A session is a JSON document with the video geometry, an optional
//! embeddings table and a list of timestamped frames. Each frame carries the
//! detector boxes and, when the backend answered, a new face list. Frames
//! without `faces` keep the previous list, as the live feed would.
//!
//! ```json
//! {
//!   "video": { "width": 640, "height": 480, "mirrored": true },
//!   "embeddings": [ { "name": "Alice", "embedding": [1, 0, 0] } ],
//!   "frames": [
//!     { "t": 0, "detections": [ { "originX": 100, "originY": 80, "width": 120, "height": 120 } ],
//!       "faces": [ { "name": "Alice", "employee_id": "E1", "box": [460, 140] } ] },
//!     { "t": 33, "detections": [ { "originX": 102, "originY": 80, "width": 120, "height": 120 } ] }
//!   ]
//! }
//! ```

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;

use crate::detect::DetectionBox;
use crate::embeddings::{EmbeddingCacheEntry, EmbeddingSnapshot};
use crate::feed::BackendFace;
use crate::overlay::OverlayGeometry;
use crate::tracker::{FrameOverlay, IdentityTracker, TrackerConfig};

#[derive(Clone, Debug, Deserialize)]
pub struct SessionVideo {
    pub width: u32,
    pub height: u32,
    #[serde(default = "default_mirrored")]
    pub mirrored: bool,
    #[serde(default)]
    pub mobile: bool,
    #[serde(default)]
    pub display_width: Option<f32>,
    #[serde(default)]
    pub display_height: Option<f32>,
}

fn default_mirrored() -> bool {
    true
}

impl SessionVideo {
    pub fn geometry(&self) -> OverlayGeometry {
        let geometry = OverlayGeometry::new(self.width, self.height)
            .with_mirrored(self.mirrored)
            .with_mobile(self.mobile);
        match (self.display_width, self.display_height) {
            (Some(w), Some(h)) => geometry.with_display(w, h),
            _ => geometry,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct SessionFrame {
    #[serde(rename = "t")]
    pub timestamp_ms: u64,
    #[serde(default)]
    pub detections: Vec<DetectionBox>,
    #[serde(default)]
    pub faces: Option<Vec<BackendFace>>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ReplaySession {
    pub video: SessionVideo,
    #[serde(default)]
    pub embeddings: Vec<EmbeddingCacheEntry>,
    pub frames: Vec<SessionFrame>,
}

/// One replayed frame.
#[derive(Clone, Debug)]
pub struct ReplayStep {
    pub timestamp_ms: u64,
    pub overlay: FrameOverlay,
}

impl ReplaySession {
    pub fn parse(raw: &str) -> Result<Self> {
        let session: Self =
            serde_json::from_str(raw).map_err(|e| anyhow!("invalid session: {}", e))?;
        session.validate()?;
        Ok(session)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read session {}: {}", path.display(), e))?;
        Self::parse(&raw)
    }

    fn validate(&self) -> Result<()> {
        if self.video.width == 0 || self.video.height == 0 {
            return Err(anyhow!("session video dimensions must be non-zero"));
        }
        let ordered = self
            .frames
            .windows(2)
            .all(|pair| pair[0].timestamp_ms < pair[1].timestamp_ms);
        if !ordered {
            return Err(anyhow!("session frame timestamps must be strictly increasing"));
        }
        Ok(())
    }

    /// Feed every frame through a fresh tracker on the session's own clock.
    pub fn run(&self, config: TrackerConfig) -> Vec<ReplayStep> {
        let mut tracker = IdentityTracker::new(config);
        let geometry = self.video.geometry();
        let snapshot = if self.embeddings.is_empty() {
            EmbeddingSnapshot::loading()
        } else {
            EmbeddingSnapshot::from_entries(&self.embeddings)
        };

        let mut faces: Vec<BackendFace> = Vec::new();
        self.frames
            .iter()
            .map(|frame| {
                if let Some(update) = &frame.faces {
                    faces = update.clone();
                }
                let overlay = tracker.process_detections(
                    &frame.detections,
                    &geometry,
                    &faces,
                    &snapshot,
                    frame.timestamp_ms,
                );
                ReplayStep {
                    timestamp_ms: frame.timestamp_ms,
                    overlay,
                }
            })
            .collect()
    }
}
