use anyhow::Result;

use crate::detect::result::DetectionResult;
use crate::frame::DetectorView;

/// Face detector capability.
///
/// Implementations receive pixels only through a borrowed `DetectorView` and
/// must not retain them past the call. Calls are never concurrent: the
/// manager hands the detector out behind a mutex.
pub trait FaceDetector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Detect faces in one video frame. `timestamp_ms` is strictly increasing
    /// across calls on the same detector.
    fn detect_for_video(
        &mut self,
        view: &DetectorView<'_>,
        timestamp_ms: u64,
    ) -> Result<DetectionResult>;

    fn is_healthy(&self) -> bool {
        true
    }

    /// Rebuild internal state after a failure.
    fn reinitialize(&mut self) -> Result<()> {
        Ok(())
    }
}
