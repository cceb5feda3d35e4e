//! Glue from the detection loop to the identity tracker.
//!
//! `TrackingPipeline` is a `DetectionObserver`: every frame report is
//! projected into overlay space, merged with the newest backend faces and the
//! current embeddings snapshot, and the resulting overlay is handed to an
//! `OverlaySink`.

use std::sync::{Arc, Mutex};

use crate::detection_loop::{DetectionObserver, FrameReport};
use crate::embeddings::EmbeddingFeed;
use crate::feed::SharedFaces;
use crate::overlay::OverlayGeometry;
use crate::tracker::{FrameOverlay, IdentityTracker};

/// Consumer of rendered overlays, usually the UI host.
pub trait OverlaySink: Send {
    fn render(&mut self, overlay: &FrameOverlay, report: &FrameReport);

    fn detector_unavailable(&mut self, reason: &str) {
        let _ = reason;
    }

    fn source_unavailable(&mut self, reason: &str) {
        let _ = reason;
    }
}

pub struct TrackingPipeline {
    tracker: IdentityTracker,
    geometry: OverlayGeometry,
    faces: SharedFaces,
    embeddings: Arc<dyn EmbeddingFeed>,
    sink: Box<dyn OverlaySink>,
}

impl TrackingPipeline {
    pub fn new(
        tracker: IdentityTracker,
        geometry: OverlayGeometry,
        faces: SharedFaces,
        embeddings: Arc<dyn EmbeddingFeed>,
        sink: Box<dyn OverlaySink>,
    ) -> Self {
        Self {
            tracker,
            geometry,
            faces,
            embeddings,
            sink,
        }
    }

    pub fn tracker(&self) -> &IdentityTracker {
        &self.tracker
    }

    /// Track the source's negotiated size; desktop overlays follow it.
    fn sync_geometry(&mut self, report: &FrameReport) {
        let negotiated = (report.frame_width, report.frame_height);
        if negotiated == (self.geometry.video_width, self.geometry.video_height) {
            return;
        }
        log::info!(
            "overlay geometry follows source: {}x{} -> {}x{}",
            self.geometry.video_width,
            self.geometry.video_height,
            negotiated.0,
            negotiated.1
        );
        self.geometry.video_width = negotiated.0;
        self.geometry.video_height = negotiated.1;
        if !self.geometry.mobile {
            self.geometry.display_width = negotiated.0 as f32;
            self.geometry.display_height = negotiated.1 as f32;
        }
    }
}

impl DetectionObserver for TrackingPipeline {
    fn on_frame(&mut self, report: &FrameReport) {
        self.sync_geometry(report);
        let faces = self.faces.latest();
        let snapshot = self.embeddings.snapshot();
        let overlay = self.tracker.process_detections(
            &report.detections,
            &self.geometry,
            &faces,
            &snapshot,
            report.timestamp_ms,
        );
        for instant in &overlay.instant_matches {
            log::info!(
                "instant match {}: {} ({:.0}%)",
                instant.track_id,
                instant.outcome.identity,
                instant.outcome.confidence * 100.0
            );
        }
        self.sink.render(&overlay, report);
    }

    fn on_detector_unavailable(&mut self, reason: &str) {
        self.sink.detector_unavailable(reason);
    }

    fn on_source_unavailable(&mut self, reason: &str) {
        self.sink.source_unavailable(reason);
    }
}

/// Sink that keeps only the newest overlay, for hosts that poll.
#[derive(Clone, Debug, Default)]
pub struct LatestOverlay {
    inner: Arc<Mutex<Option<(FrameOverlay, FrameReport)>>>,
}

impl LatestOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<(FrameOverlay, FrameReport)> {
        self.inner.lock().ok().and_then(|guard| guard.clone())
    }
}

impl OverlaySink for LatestOverlay {
    fn render(&mut self, overlay: &FrameOverlay, report: &FrameReport) {
        if let Ok(mut guard) = self.inner.lock() {
            *guard = Some((overlay.clone(), report.clone()));
        }
    }
}
