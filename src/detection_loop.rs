//! Per-frame detection loop.
//!
//! `DetectionLoop::tick` is one scheduling step: pull a frame, run the shared
//! detector on it, report the boxes. `DetectionLoop::spawn` drives ticks on a
//! dedicated thread until the returned `LoopHandle` is stopped or dropped.
//!
//! The loop never fails. Missing frames, a busy or unavailable detector and
//! detector errors are logged and the next tick simply tries again.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, TryLockError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::detect::{DetectionBox, DetectorManager};
use crate::frame::{StillFrame, VideoFrame};
use crate::ingest::FrameSource;

/// Raw detections for one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameReport {
    pub detections: Vec<DetectionBox>,
    /// Instantaneous rate, `1000 / delta_ms` since the previous report.
    /// Zero for the first report.
    pub fps: f32,
    pub timestamp_ms: u64,
    pub frame_width: u32,
    pub frame_height: u32,
}

/// Receives loop output. Called on the loop thread.
pub trait DetectionObserver: Send {
    fn on_frame(&mut self, report: &FrameReport);

    /// The detector could not be acquired. Reported once per outage.
    fn on_detector_unavailable(&mut self, reason: &str) {
        let _ = reason;
    }

    /// The frame source failed or went stale. Reported once per outage.
    fn on_source_unavailable(&mut self, reason: &str) {
        let _ = reason;
    }
}

/// What a single tick did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    Detected(usize),
    /// Source not ready or reporting zero dimensions.
    SourceNotReady,
    SourceError,
    /// Another consumer holds the detector.
    DetectorBusy,
    DetectorUnavailable,
    DetectorError,
}

#[derive(Clone, Debug)]
pub struct LoopConfig {
    /// Tick rate ceiling; the detector's own latency may lower it.
    pub target_fps: u32,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self { target_fps: 60 }
    }
}

pub struct DetectionLoop {
    source: Box<dyn FrameSource>,
    manager: DetectorManager,
    observer: Box<dyn DetectionObserver>,
    last_timestamp: Option<u64>,
    latest: Option<VideoFrame>,
    unavailable_reported: bool,
    source_outage: bool,
    frames_reported: u64,
}

impl DetectionLoop {
    pub fn new(
        source: Box<dyn FrameSource>,
        manager: DetectorManager,
        observer: Box<dyn DetectionObserver>,
    ) -> Self {
        Self {
            source,
            manager,
            observer,
            last_timestamp: None,
            latest: None,
            unavailable_reported: false,
            source_outage: false,
            frames_reported: 0,
        }
    }

    /// Run one detection step at wall time `now_ms`.
    pub fn tick(&mut self, now_ms: u64) -> TickOutcome {
        let (width, height) = self.source.dimensions();
        if !self.source.is_ready() || width == 0 || height == 0 {
            return TickOutcome::SourceNotReady;
        }

        let detector = match self.manager.acquire() {
            Ok(detector) => {
                self.unavailable_reported = false;
                detector
            }
            Err(err) => {
                if !self.unavailable_reported {
                    self.unavailable_reported = true;
                    self.observer.on_detector_unavailable(&err.to_string());
                }
                return TickOutcome::DetectorUnavailable;
            }
        };

        let mut guard = match detector.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return TickOutcome::DetectorBusy,
            Err(TryLockError::Poisoned(_)) => {
                log::warn!("detector lock poisoned; skipping frame");
                return TickOutcome::DetectorError;
            }
        };

        let frame = match self.source.next_frame() {
            Ok(frame) => frame,
            Err(err) => {
                self.note_source_outage(&err.to_string());
                return TickOutcome::SourceError;
            }
        };
        if self.source.is_healthy() {
            if self.source_outage {
                self.source_outage = false;
                log::info!("frame source recovered");
            }
        } else {
            self.note_source_outage("frame source reports unhealthy");
        }

        let timestamp_ms = match self.last_timestamp {
            Some(last) if now_ms <= last => last + 1,
            _ => now_ms,
        };
        let result = guard.detect_for_video(&frame.detector_view(), timestamp_ms);
        drop(guard);

        let fps = self
            .last_timestamp
            .map(|last| 1000.0 / (timestamp_ms - last) as f32)
            .unwrap_or(0.0);
        self.last_timestamp = Some(timestamp_ms);
        let (frame_width, frame_height) = frame.dimensions();
        self.latest = Some(frame);

        match result {
            Ok(result) => {
                let count = result.detections.len();
                let report = FrameReport {
                    detections: result.detections,
                    fps,
                    timestamp_ms,
                    frame_width,
                    frame_height,
                };
                self.observer.on_frame(&report);
                self.frames_reported += 1;
                TickOutcome::Detected(count)
            }
            Err(err) => {
                log::warn!("face detection failed: {}", err);
                TickOutcome::DetectorError
            }
        }
    }

    fn note_source_outage(&mut self, reason: &str) {
        if self.source_outage {
            log::debug!("frame source still unavailable: {}", reason);
            return;
        }
        self.source_outage = true;
        log::warn!("frame source unavailable: {}", reason);
        self.observer.on_source_unavailable(reason);
    }

    /// Copy of the most recent frame handed to the detector.
    pub fn grab_still(&self) -> Option<StillFrame> {
        self.latest.as_ref().map(VideoFrame::grab_still)
    }

    pub fn frames_reported(&self) -> u64 {
        self.frames_reported
    }

    /// Run `tick` on a dedicated thread.
    pub fn spawn(
        source: Box<dyn FrameSource>,
        manager: DetectorManager,
        observer: Box<dyn DetectionObserver>,
        config: LoopConfig,
    ) -> Result<LoopHandle> {
        let stop = Arc::new(AtomicBool::new(false));
        let (still_tx, still_rx) = mpsc::channel::<Sender<Option<StillFrame>>>();
        let flag = stop.clone();
        let mut detection_loop = Self::new(source, manager, observer);
        let interval = Duration::from_millis(1000 / u64::from(config.target_fps.max(1)));

        let handle = std::thread::Builder::new()
            .name("facemark-detect".into())
            .spawn(move || detection_loop.run(&flag, &still_rx, interval))
            .map_err(|e| anyhow!("failed to spawn detection loop: {}", e))?;

        Ok(LoopHandle {
            stop,
            stills: still_tx,
            handle: Some(handle),
        })
    }

    fn run(
        &mut self,
        stop: &AtomicBool,
        stills: &Receiver<Sender<Option<StillFrame>>>,
        interval: Duration,
    ) {
        let started = Instant::now();
        log::info!("detection loop started");
        while !stop.load(Ordering::Acquire) {
            let tick_started = Instant::now();
            self.tick(started.elapsed().as_millis() as u64);

            while let Ok(reply) = stills.try_recv() {
                let _ = reply.send(self.grab_still());
            }

            let spent = tick_started.elapsed();
            if spent < interval {
                std::thread::sleep(interval - spent);
            }
        }
        self.latest = None;
        let stats = self.source.stats();
        self.source.release();
        log::info!(
            "detection loop stopped after {} frames ({} captured from {})",
            self.frames_reported,
            stats.frames_captured,
            stats.source
        );
    }
}

/// Owner of a running detection loop. Stopping is synchronous: once `stop()`
/// returns (or the handle is dropped) no further observer callbacks happen.
pub struct LoopHandle {
    stop: Arc<AtomicBool>,
    stills: Sender<Sender<Option<StillFrame>>>,
    handle: Option<JoinHandle<()>>,
}

impl LoopHandle {
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Latest frame, fetched from the loop thread.
    pub fn grab_still(&self, timeout: Duration) -> Result<StillFrame> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.stills
            .send(reply_tx)
            .map_err(|_| anyhow!("detection loop is not running"))?;
        reply_rx
            .recv_timeout(timeout)
            .map_err(|_| anyhow!("timed out waiting for a still frame"))?
            .ok_or_else(|| anyhow!("no frame captured yet"))
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("detection loop panicked");
            }
        }
    }
}

impl Drop for LoopHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
