//! Threaded detection loop lifecycle, end to end through the tracker.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use facemark::detect::StubDetector;
use facemark::detection_loop::LoopConfig;
use facemark::ingest::SyntheticSource;
use facemark::pipeline::LatestOverlay;
use facemark::{
    BackendFace, DetectionLoop, DetectionObserver, DetectorManager, FrameReport, FrameSource,
    IdentityTracker, OverlayGeometry, SharedEmbeddings, SharedFaces, SourceConfig,
    TrackingPipeline,
};

#[derive(Clone, Default)]
struct Counter {
    frames: Arc<AtomicUsize>,
}

impl DetectionObserver for Counter {
    fn on_frame(&mut self, _report: &FrameReport) {
        self.frames.fetch_add(1, Ordering::SeqCst);
    }
}

fn source(width: u32, height: u32) -> Box<dyn FrameSource> {
    let mut source = SyntheticSource::new(SourceConfig {
        url: "stub://test".into(),
        width,
        height,
        target_fps: 60,
        mirrored: false,
    });
    source.connect().expect("connect synthetic source");
    Box::new(source)
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

#[test]
fn stop_ends_observer_callbacks() {
    let counter = Counter::default();
    let mut handle = DetectionLoop::spawn(
        source(32, 24),
        DetectorManager::from_detector(StubDetector::new()),
        Box::new(counter.clone()),
        LoopConfig { target_fps: 100 },
    )
    .expect("spawn loop");

    assert!(wait_until(Duration::from_secs(5), || {
        counter.frames.load(Ordering::SeqCst) >= 3
    }));
    assert!(handle.is_running());

    let still = handle.grab_still(Duration::from_secs(2)).expect("still frame");
    assert_eq!((still.width, still.height), (32, 24));
    assert_eq!(still.rgb().len(), 32 * 24 * 3);

    handle.stop();
    assert!(!handle.is_running());
    let after_stop = counter.frames.load(Ordering::SeqCst);
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(counter.frames.load(Ordering::SeqCst), after_stop);
    assert!(handle.grab_still(Duration::from_millis(100)).is_err());
}

#[test]
fn backend_name_reaches_the_overlay() {
    let faces = SharedFaces::new();
    faces
        .publish(vec![BackendFace::new("Alice", [32.0, 24.0])
            .with_employee_id("E1")
            .with_confidence(0.9)])
        .expect("publish faces");

    let latest = LatestOverlay::new();
    let pipeline = TrackingPipeline::new(
        IdentityTracker::default(),
        OverlayGeometry::new(64, 48).with_mirrored(false),
        faces,
        Arc::new(SharedEmbeddings::new()),
        Box::new(latest.clone()),
    );
    let mut handle = DetectionLoop::spawn(
        source(64, 48),
        DetectorManager::from_detector(StubDetector::new()),
        Box::new(pipeline),
        LoopConfig::default(),
    )
    .expect("spawn loop");

    let labeled = wait_until(Duration::from_secs(5), || {
        latest
            .get()
            .is_some_and(|(overlay, _)| overlay.displayed_names() == vec!["Alice"])
    });
    handle.stop();

    assert!(labeled, "overlay never showed the backend name");
    let (overlay, report) = latest.get().expect("overlay rendered");
    assert_eq!(report.detections.len(), 1);
    assert_eq!((report.frame_width, report.frame_height), (64, 48));
    assert_eq!(overlay.boxes[0].text, "Alice (90%)");
}
