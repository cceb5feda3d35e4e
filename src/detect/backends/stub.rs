use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::detect::backend::FaceDetector;
use crate::detect::result::{DetectionBox, DetectionResult};
use crate::frame::DetectorView;

/// One scripted detector response.
#[derive(Clone, Debug, PartialEq)]
pub enum ScriptedFrame {
    Faces(Vec<DetectionBox>),
    Fail(String),
}

/// Shared knobs and counters for a `StubDetector` that has been handed to a
/// manager.
#[derive(Clone, Debug)]
pub struct StubControls {
    healthy: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
    reinitializations: Arc<AtomicUsize>,
}

impl StubControls {
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn reinitializations(&self) -> usize {
        self.reinitializations.load(Ordering::SeqCst)
    }
}

/// Scripted detector for tests, replay and `stub://` sources.
///
/// Cycles through its script. With an empty script it reports a single face
/// in the middle of the frame.
pub struct StubDetector {
    script: Vec<ScriptedFrame>,
    cursor: usize,
    last_timestamp: Option<u64>,
    controls: StubControls,
    recover_on_reinit: bool,
}

impl StubDetector {
    pub fn new() -> Self {
        Self::scripted(Vec::new())
    }

    pub fn scripted(script: Vec<ScriptedFrame>) -> Self {
        Self {
            script,
            cursor: 0,
            last_timestamp: None,
            controls: StubControls {
                healthy: Arc::new(AtomicBool::new(true)),
                calls: Arc::new(AtomicUsize::new(0)),
                reinitializations: Arc::new(AtomicUsize::new(0)),
            },
            recover_on_reinit: true,
        }
    }

    /// Keep reporting unhealthy after `reinitialize`.
    pub fn stuck_unhealthy(mut self) -> Self {
        self.recover_on_reinit = false;
        self.controls.set_healthy(false);
        self
    }

    pub fn controls(&self) -> StubControls {
        self.controls.clone()
    }

    fn centered(view: &DetectorView<'_>) -> Vec<DetectionBox> {
        let side = view.width().min(view.height()) as f32 / 3.0;
        if side <= 0.0 {
            return Vec::new();
        }
        vec![DetectionBox::new(
            (view.width() as f32 - side) / 2.0,
            (view.height() as f32 - side) / 2.0,
            side,
            side,
        )]
    }
}

impl Default for StubDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl FaceDetector for StubDetector {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect_for_video(
        &mut self,
        view: &DetectorView<'_>,
        timestamp_ms: u64,
    ) -> Result<DetectionResult> {
        self.controls.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(last) = self.last_timestamp {
            if timestamp_ms <= last {
                return Err(anyhow!(
                    "timestamp {} not after previous {}",
                    timestamp_ms,
                    last
                ));
            }
        }
        self.last_timestamp = Some(timestamp_ms);

        if self.script.is_empty() {
            return Ok(DetectionResult::new(Self::centered(view)));
        }
        let step = self.script[self.cursor % self.script.len()].clone();
        self.cursor += 1;
        match step {
            ScriptedFrame::Faces(faces) => Ok(DetectionResult::new(faces)),
            ScriptedFrame::Fail(reason) => Err(anyhow!("scripted failure: {}", reason)),
        }
    }

    fn is_healthy(&self) -> bool {
        self.controls.healthy.load(Ordering::SeqCst)
    }

    fn reinitialize(&mut self) -> Result<()> {
        self.controls.reinitializations.fetch_add(1, Ordering::SeqCst);
        self.last_timestamp = None;
        if self.recover_on_reinit {
            self.controls.set_healthy(true);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::VideoFrame;

    fn frame() -> VideoFrame {
        VideoFrame::new(vec![0u8; 90 * 60 * 3], 90, 60, 0).unwrap()
    }

    #[test]
    fn empty_script_reports_centered_face() {
        let frame = frame();
        let mut detector = StubDetector::new();
        let result = detector.detect_for_video(&frame.detector_view(), 1).unwrap();
        assert_eq!(result.detections, vec![DetectionBox::new(35.0, 20.0, 20.0, 20.0)]);
    }

    #[test]
    fn script_cycles_and_fails_on_demand() {
        let frame = frame();
        let face = DetectionBox::new(1.0, 2.0, 3.0, 4.0);
        let mut detector = StubDetector::scripted(vec![
            ScriptedFrame::Faces(vec![face]),
            ScriptedFrame::Fail("lost context".into()),
        ]);
        let view = frame.detector_view();
        assert_eq!(detector.detect_for_video(&view, 1).unwrap().detections, vec![face]);
        assert!(detector.detect_for_video(&view, 2).is_err());
        assert_eq!(detector.detect_for_video(&view, 3).unwrap().detections, vec![face]);
        assert_eq!(detector.controls().calls(), 3);
    }

    #[test]
    fn rejects_non_increasing_timestamps() {
        let frame = frame();
        let mut detector = StubDetector::new();
        let view = frame.detector_view();
        detector.detect_for_video(&view, 5).unwrap();
        assert!(detector.detect_for_video(&view, 5).is_err());
    }
}
