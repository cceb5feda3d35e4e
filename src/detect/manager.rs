use std::sync::{Arc, Mutex, TryLockError};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use super::backend::FaceDetector;
use super::backends::StubDetector;
use crate::config::{DetectorBackendKind, DetectorSettings};

/// Detector handed out to consumers. `detect_for_video` takes `&mut self`, so
/// the mutex is what keeps calls from overlapping.
pub type SharedDetector = Arc<Mutex<dyn FaceDetector>>;

/// Builds a fresh detector instance.
pub type DetectorFactory = Arc<dyn Fn() -> Result<SharedDetector> + Send + Sync>;

/// Minimum spacing between attempts to build or repair a failed detector.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

struct ManagerState {
    detector: Option<SharedDetector>,
    last_failure: Option<String>,
    last_failure_at: Option<Instant>,
}

impl ManagerState {
    fn with_detector(detector: Option<SharedDetector>) -> Self {
        Self {
            detector,
            last_failure: None,
            last_failure_at: None,
        }
    }
}

/// Single owner of the process-wide face detector.
///
/// Builds the detector lazily on first `acquire()`, health-checks it on every
/// acquire and reinitializes an unhealthy instance at most once per call.
/// After a failure, further attempts wait out the retry interval and the
/// recorded failure is returned instead. Clones share the same detector.
#[derive(Clone)]
pub struct DetectorManager {
    factory: DetectorFactory,
    state: Arc<Mutex<ManagerState>>,
    retry_interval: Duration,
}

impl DetectorManager {
    pub fn new<D, F>(factory: F) -> Self
    where
        D: FaceDetector + 'static,
        F: Fn() -> Result<D> + Send + Sync + 'static,
    {
        let factory: DetectorFactory = Arc::new(move || -> Result<SharedDetector> {
            let detector: SharedDetector = Arc::new(Mutex::new(factory()?));
            Ok(detector)
        });
        Self {
            factory,
            state: Arc::new(Mutex::new(ManagerState::with_detector(None))),
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }

    /// Manage an already-built detector. It cannot be rebuilt from scratch,
    /// only reinitialized in place.
    pub fn from_detector<D: FaceDetector + 'static>(detector: D) -> Self {
        let name = detector.name();
        let shared: SharedDetector = Arc::new(Mutex::new(detector));
        Self {
            factory: Arc::new(move || -> Result<SharedDetector> {
                Err(anyhow!("detector '{}' cannot be rebuilt", name))
            }),
            state: Arc::new(Mutex::new(ManagerState::with_detector(Some(shared)))),
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Manager for the configured backend. `width` x `height` is the frame
    /// size the detector will see.
    pub fn from_settings(settings: &DetectorSettings, width: u32, height: u32) -> Result<Self> {
        match settings.backend {
            DetectorBackendKind::Stub => Ok(Self::new(|| Ok(StubDetector::new()))),
            #[cfg(feature = "backend-tract")]
            DetectorBackendKind::Tract => {
                let model_path = settings
                    .model_path
                    .clone()
                    .ok_or_else(|| anyhow!("tract detector requires a model path"))?;
                let min_confidence = settings.min_confidence;
                Ok(Self::new(move || {
                    Ok(super::backends::TractDetector::new(&model_path, width, height)?
                        .with_min_confidence(min_confidence))
                }))
            }
            #[cfg(not(feature = "backend-tract"))]
            DetectorBackendKind::Tract => {
                let _ = (width, height);
                Err(anyhow!("tract detector requires the backend-tract feature"))
            }
        }
    }

    /// Healthy detector, building or reinitializing it if needed.
    ///
    /// On failure the reason is kept for `last_failure()` and returned.
    pub fn acquire(&self) -> Result<SharedDetector> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow!("detector manager lock poisoned"))?;

        if let (Some(at), Some(reason)) = (state.last_failure_at, state.last_failure.as_deref()) {
            if at.elapsed() < self.retry_interval {
                return Err(anyhow!("{}", reason));
            }
        }

        let outcome = match state.detector.clone() {
            Some(detector) => Self::ensure_healthy(&detector).map(|_| detector),
            None => (self.factory)().map_err(|e| anyhow!("detector init failed: {}", e)),
        };

        match outcome {
            Ok(detector) => {
                if state.detector.is_none() {
                    log::info!("face detector initialized");
                }
                if state.last_failure.take().is_some() {
                    log::info!("face detector recovered");
                }
                state.last_failure_at = None;
                state.detector = Some(detector.clone());
                Ok(detector)
            }
            Err(err) => {
                let reason = err.to_string();
                if state.last_failure.as_deref() != Some(reason.as_str()) {
                    log::warn!("face detector unavailable: {}", reason);
                }
                state.last_failure = Some(reason);
                state.last_failure_at = Some(Instant::now());
                Err(err)
            }
        }
    }

    /// A detector that is busy serving another consumer counts as healthy.
    fn ensure_healthy(detector: &SharedDetector) -> Result<()> {
        let mut guard = match detector.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return Ok(()),
            Err(TryLockError::Poisoned(_)) => return Err(anyhow!("detector lock poisoned")),
        };
        if guard.is_healthy() {
            return Ok(());
        }
        log::warn!("detector '{}' unhealthy; reinitializing", guard.name());
        guard
            .reinitialize()
            .map_err(|e| anyhow!("detector reinit failed: {}", e))?;
        if guard.is_healthy() {
            Ok(())
        } else {
            Err(anyhow!("detector '{}' still unhealthy after reinit", guard.name()))
        }
    }

    /// Reason the most recent `acquire()` failed, cleared on success.
    pub fn last_failure(&self) -> Option<String> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.last_failure.clone())
    }

    pub fn is_initialized(&self) -> bool {
        self.state
            .lock()
            .map(|state| state.detector.is_some())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::StubDetector;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn builds_lazily_and_shares_instance() {
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = builds.clone();
        let manager = DetectorManager::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(StubDetector::new())
        });
        assert!(!manager.is_initialized());

        let a = manager.acquire().unwrap();
        let b = manager.clone().acquire().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn init_failure_is_recorded_and_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let manager = DetectorManager::new(move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(anyhow!("model missing"))
            } else {
                Ok(StubDetector::new())
            }
        })
        .with_retry_interval(Duration::ZERO);

        assert!(manager.acquire().is_err());
        assert!(manager.last_failure().unwrap().contains("model missing"));

        assert!(manager.acquire().is_ok());
        assert!(manager.last_failure().is_none());
    }

    #[test]
    fn unhealthy_detector_is_reinitialized_once() {
        let detector = StubDetector::new();
        let controls = detector.controls();
        let manager = DetectorManager::from_detector(detector);

        controls.set_healthy(false);
        assert!(manager.acquire().is_ok());
        assert_eq!(controls.reinitializations(), 1);

        let stuck = StubDetector::new().stuck_unhealthy();
        let controls = stuck.controls();
        let manager = DetectorManager::from_detector(stuck);
        assert!(manager.acquire().is_err());
        assert_eq!(controls.reinitializations(), 1);
        assert!(manager.last_failure().unwrap().contains("still unhealthy"));
    }

    #[test]
    fn failed_build_waits_for_retry_interval() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let manager = DetectorManager::new(move || -> Result<StubDetector> {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(anyhow!("model missing"))
        })
        .with_retry_interval(Duration::from_secs(3600));

        for _ in 0..60 {
            let err = manager.acquire().err().expect("acquire should fail");
            assert!(err.to_string().contains("model missing"));
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(manager.last_failure().is_some());
        assert!(!manager.is_initialized());
    }

    #[test]
    fn failed_reinit_waits_for_retry_interval() {
        let stuck = StubDetector::new().stuck_unhealthy();
        let controls = stuck.controls();
        let manager =
            DetectorManager::from_detector(stuck).with_retry_interval(Duration::from_secs(3600));

        for _ in 0..10 {
            assert!(manager.acquire().is_err());
        }
        assert_eq!(controls.reinitializations(), 1);
    }
}
