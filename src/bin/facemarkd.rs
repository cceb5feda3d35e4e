//! facemarkd - live face tracking daemon
//!
//! This daemon:
//! 1. Opens the configured frame source and face detector
//! 2. Runs the detection loop on its own thread
//! 3. Tracks faces against the backend face feed and the embeddings cache
//! 4. Shows a live status line until Ctrl-C or `--seconds` elapses
//! 5. Optionally writes the last still frame on exit

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use facemark::detection_loop::LoopConfig;
use facemark::embeddings::load_embeddings_file;
use facemark::feed::FilePoller;
use facemark::pipeline::LatestOverlay;
use facemark::ui::Ui;
use facemark::{
    open_source, DetectionLoop, DetectorManager, FacemarkConfig, IdentityTracker, LoopHandle,
    SharedEmbeddings, SharedFaces, TrackingPipeline,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (JSON or TOML). Defaults to $FACEMARK_CONFIG.
    #[arg(long, env = "FACEMARK_CONFIG")]
    config: Option<PathBuf>,
    /// Stop after this many seconds instead of waiting for Ctrl-C.
    #[arg(long)]
    seconds: Option<u64>,
    /// Write the last still frame here on exit.
    #[arg(long)]
    snapshot: Option<PathBuf>,
    /// Output mode: auto, plain or pretty.
    #[arg(long)]
    ui: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = Ui::from_env(args.ui.as_deref());

    let cfg = {
        let _stage = ui.stage("load config");
        FacemarkConfig::load_from(args.config.as_deref())?
    };

    let embeddings = SharedEmbeddings::new();
    let mut last_embeddings_load = None;
    if let Some(path) = &cfg.embeddings_path {
        let _stage = ui.stage("load embeddings cache");
        reload_embeddings(path, &embeddings);
        last_embeddings_load = Some(Instant::now());
    } else {
        log::warn!("no embeddings_path configured; local matching stays disabled");
    }

    let faces = SharedFaces::new();
    let mut poller = cfg
        .faces_path
        .clone()
        .map(|path| FilePoller::spawn(path, cfg.faces_poll, faces.clone()));
    if poller.is_none() {
        log::warn!("no faces_path configured; boxes will stay unlabeled");
    }

    let (mut handle, latest) = {
        let _stage = ui.stage("start detection loop");
        start_loop(&cfg, faces.clone(), embeddings.clone())?
    };

    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();
    ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst))
        .map_err(|e| anyhow!("failed to set Ctrl-C handler: {}", e))?;

    let deadline = args.seconds.map(|s| Instant::now() + Duration::from_secs(s));
    let mut status = ui.status_line(Duration::from_secs(5));
    log::info!(
        "facemarkd running on {} (detector: {:?})",
        cfg.source.url,
        cfg.detector.backend
    );

    while running.load(Ordering::SeqCst) && deadline.map_or(true, |d| Instant::now() < d) {
        std::thread::sleep(Duration::from_millis(100));
        if !handle.is_running() {
            log::warn!("detection loop exited unexpectedly");
            break;
        }
        if let (Some(path), Some(loaded)) = (&cfg.embeddings_path, last_embeddings_load) {
            if loaded.elapsed() >= cfg.embeddings_refresh {
                log::info!("refreshing embeddings cache");
                reload_embeddings(path, &embeddings);
                last_embeddings_load = Some(Instant::now());
            }
        }
        if let Some((overlay, report)) = latest.get() {
            let labels: Vec<&str> = overlay.boxes.iter().map(|b| b.text.as_str()).collect();
            status.update(&format!(
                "{:>5.1} fps | {} faces | {}",
                report.fps,
                report.detections.len(),
                labels.join(", ")
            ));
        }
    }

    if let Some(path) = &args.snapshot {
        if let Err(err) = write_snapshot(&handle, path) {
            log::warn!("snapshot not written: {}", err);
        }
    }

    handle.stop();
    if let Some(poller) = poller.as_mut() {
        poller.stop();
    }
    status.finish("facemarkd stopped");
    Ok(())
}

fn start_loop(
    cfg: &FacemarkConfig,
    faces: SharedFaces,
    embeddings: SharedEmbeddings,
) -> Result<(LoopHandle, LatestOverlay)> {
    let mut source = open_source(&cfg.source)?;
    source.connect()?;
    let (width, height) = source.dimensions();
    let manager = DetectorManager::from_settings(&cfg.detector, width, height)?;
    if let Err(err) = manager.acquire() {
        log::warn!("detector not ready yet: {}", err);
    }

    let latest = LatestOverlay::new();
    let pipeline = TrackingPipeline::new(
        IdentityTracker::new(cfg.tracker.clone()),
        cfg.overlay_geometry(),
        faces,
        Arc::new(embeddings),
        Box::new(latest.clone()),
    );
    let handle = DetectionLoop::spawn(
        source,
        manager,
        Box::new(pipeline),
        LoopConfig {
            target_fps: cfg.source.target_fps,
        },
    )?;
    Ok((handle, latest))
}

fn reload_embeddings(path: &Path, embeddings: &SharedEmbeddings) {
    let result = load_embeddings_file(path).and_then(|entries| embeddings.publish(&entries));
    if let Err(err) = result {
        // keep serving the previous table
        log::warn!("embeddings cache not refreshed: {}", err);
    }
}

#[cfg(feature = "still-jpeg")]
fn write_snapshot(handle: &LoopHandle, path: &Path) -> Result<()> {
    let still = handle.grab_still(Duration::from_secs(1))?;
    let jpeg = still.to_jpeg(90)?;
    std::fs::write(path, jpeg)
        .map_err(|e| anyhow!("failed to write {}: {}", path.display(), e))?;
    log::info!(
        "snapshot {}x{} written to {}",
        still.width,
        still.height,
        path.display()
    );
    Ok(())
}

#[cfg(not(feature = "still-jpeg"))]
fn write_snapshot(handle: &LoopHandle, path: &Path) -> Result<()> {
    let still = handle.grab_still(Duration::from_secs(1))?;
    std::fs::write(path, still.rgb())
        .map_err(|e| anyhow!("failed to write {}: {}", path.display(), e))?;
    log::info!(
        "raw RGB snapshot {}x{} written to {}",
        still.width,
        still.height,
        path.display()
    );
    Ok(())
}
