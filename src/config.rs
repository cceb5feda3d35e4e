use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ingest::SourceConfig;
use crate::overlay::OverlayGeometry;
use crate::tracker::TrackerConfig;

const DEFAULT_MIN_CONFIDENCE: f32 = 0.5;
const DEFAULT_FACES_POLL_MS: u64 = 2_000;
const DEFAULT_EMBEDDINGS_REFRESH_SECS: u64 = 15 * 60;

#[derive(Debug, Deserialize, Default)]
struct FacemarkConfigFile {
    source: Option<SourceConfigFile>,
    detector: Option<DetectorConfigFile>,
    tracker: Option<TrackerConfigFile>,
    matcher: Option<MatcherConfigFile>,
    overlay: Option<OverlayConfigFile>,
    faces_path: Option<PathBuf>,
    faces_poll_ms: Option<u64>,
    embeddings_path: Option<PathBuf>,
    embeddings_refresh_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
    mirrored: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    min_confidence: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct TrackerConfigFile {
    memory_ms: Option<u64>,
    drift_px: Option<f32>,
    gate_px: Option<f32>,
    iou_threshold: Option<f32>,
    box_alpha: Option<f32>,
    confidence_alpha: Option<f32>,
    reverify_delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct MatcherConfigFile {
    threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct OverlayConfigFile {
    mobile: Option<bool>,
    display_width: Option<f32>,
    display_height: Option<f32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectorBackendKind {
    Stub,
    Tract,
}

impl DetectorBackendKind {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stub" => Ok(Self::Stub),
            "tract" => Ok(Self::Tract),
            other => Err(anyhow!("unknown detector backend '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: DetectorBackendKind,
    pub model_path: Option<PathBuf>,
    pub min_confidence: f32,
}

#[derive(Debug, Clone, Default)]
pub struct OverlaySettings {
    pub mobile: bool,
    pub display_width: Option<f32>,
    pub display_height: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct FacemarkConfig {
    pub source: SourceConfig,
    pub detector: DetectorSettings,
    /// Also carries the matcher threshold.
    pub tracker: TrackerConfig,
    pub overlay: OverlaySettings,
    /// Recorded backend face results, polled as the face feed.
    pub faces_path: Option<PathBuf>,
    pub faces_poll: Duration,
    /// Embeddings cache file.
    pub embeddings_path: Option<PathBuf>,
    pub embeddings_refresh: Duration,
}

impl FacemarkConfig {
    /// Config file named by `FACEMARK_CONFIG`, then env overrides.
    pub fn load() -> Result<Self> {
        let config_path = non_empty_env("FACEMARK_CONFIG").map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Like `load`, with an explicit config file.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: FacemarkConfigFile) -> Result<Self> {
        let source_defaults = SourceConfig::default();
        let source_file = file.source.unwrap_or_default();
        let source = SourceConfig {
            url: source_file.url.unwrap_or(source_defaults.url),
            width: source_file.width.unwrap_or(source_defaults.width),
            height: source_file.height.unwrap_or(source_defaults.height),
            target_fps: source_file.target_fps.unwrap_or(source_defaults.target_fps),
            mirrored: source_file.mirrored.unwrap_or(source_defaults.mirrored),
        };

        let detector_file = file.detector.unwrap_or_default();
        let detector = DetectorSettings {
            backend: match detector_file.backend.as_deref() {
                Some(name) => DetectorBackendKind::parse(name)?,
                None => DetectorBackendKind::Stub,
            },
            model_path: detector_file.model_path,
            min_confidence: detector_file
                .min_confidence
                .unwrap_or(DEFAULT_MIN_CONFIDENCE),
        };

        let defaults = TrackerConfig::default();
        let tracker_file = file.tracker.unwrap_or_default();
        let tracker = TrackerConfig {
            memory_ms: tracker_file.memory_ms.unwrap_or(defaults.memory_ms),
            drift_px: tracker_file.drift_px.unwrap_or(defaults.drift_px),
            gate_px: tracker_file.gate_px.unwrap_or(defaults.gate_px),
            iou_threshold: tracker_file.iou_threshold.unwrap_or(defaults.iou_threshold),
            box_alpha: tracker_file.box_alpha.unwrap_or(defaults.box_alpha),
            confidence_alpha: tracker_file
                .confidence_alpha
                .unwrap_or(defaults.confidence_alpha),
            reverify_delay_ms: tracker_file
                .reverify_delay_ms
                .unwrap_or(defaults.reverify_delay_ms),
            match_threshold: file
                .matcher
                .and_then(|matcher| matcher.threshold)
                .unwrap_or(defaults.match_threshold),
            ..defaults
        };

        let overlay = file
            .overlay
            .map(|overlay| OverlaySettings {
                mobile: overlay.mobile.unwrap_or(false),
                display_width: overlay.display_width,
                display_height: overlay.display_height,
            })
            .unwrap_or_default();

        Ok(Self {
            source,
            detector,
            tracker,
            overlay,
            faces_path: file.faces_path,
            faces_poll: Duration::from_millis(file.faces_poll_ms.unwrap_or(DEFAULT_FACES_POLL_MS)),
            embeddings_path: file.embeddings_path,
            embeddings_refresh: Duration::from_secs(
                file.embeddings_refresh_secs
                    .unwrap_or(DEFAULT_EMBEDDINGS_REFRESH_SECS),
            ),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(url) = non_empty_env("FACEMARK_SOURCE_URL") {
            self.source.url = url;
        }
        if let Some(backend) = non_empty_env("FACEMARK_DETECTOR_BACKEND") {
            self.detector.backend = DetectorBackendKind::parse(&backend)?;
        }
        if let Some(path) = non_empty_env("FACEMARK_MODEL_PATH") {
            self.detector.model_path = Some(PathBuf::from(path));
        }
        if let Some(threshold) = non_empty_env("FACEMARK_MATCH_THRESHOLD") {
            self.tracker.match_threshold = threshold
                .parse()
                .map_err(|_| anyhow!("FACEMARK_MATCH_THRESHOLD must be a number"))?;
        }
        if let Some(memory) = non_empty_env("FACEMARK_MEMORY_MS") {
            self.tracker.memory_ms = memory.parse().map_err(|_| {
                anyhow!("FACEMARK_MEMORY_MS must be an integer number of milliseconds")
            })?;
        }
        if let Some(path) = non_empty_env("FACEMARK_FACES_PATH") {
            self.faces_path = Some(PathBuf::from(path));
        }
        if let Some(path) = non_empty_env("FACEMARK_EMBEDDINGS_PATH") {
            self.embeddings_path = Some(PathBuf::from(path));
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("source dimensions must be non-zero"));
        }
        if self.source.target_fps == 0 {
            return Err(anyhow!("source target_fps must be greater than zero"));
        }
        let threshold = self.tracker.match_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(anyhow!("match threshold must be in (0, 1], got {}", threshold));
        }
        for (name, alpha) in [
            ("box_alpha", self.tracker.box_alpha),
            ("confidence_alpha", self.tracker.confidence_alpha),
        ] {
            if !(alpha > 0.0 && alpha <= 1.0) {
                return Err(anyhow!("{} must be in (0, 1], got {}", name, alpha));
            }
        }
        if self.tracker.memory_ms == 0 {
            return Err(anyhow!("tracker memory_ms must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&self.detector.min_confidence) {
            return Err(anyhow!("detector min_confidence must be in [0, 1]"));
        }
        if self.detector.backend == DetectorBackendKind::Tract && self.detector.model_path.is_none()
        {
            return Err(anyhow!("tract detector requires detector.model_path"));
        }
        Ok(())
    }

    /// Overlay geometry for the configured source and display.
    pub fn overlay_geometry(&self) -> OverlayGeometry {
        let mut geometry = OverlayGeometry::new(self.source.width, self.source.height)
            .with_mobile(self.overlay.mobile)
            .with_mirrored(self.source.mirrored);
        if let (Some(w), Some(h)) = (self.overlay.display_width, self.overlay.display_height) {
            geometry = geometry.with_display(w, h);
        }
        geometry
    }
}

impl Default for FacemarkConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            detector: DetectorSettings {
                backend: DetectorBackendKind::Stub,
                model_path: None,
                min_confidence: DEFAULT_MIN_CONFIDENCE,
            },
            tracker: TrackerConfig::default(),
            overlay: OverlaySettings::default(),
            faces_path: None,
            faces_poll: Duration::from_millis(DEFAULT_FACES_POLL_MS),
            embeddings_path: None,
            embeddings_refresh: Duration::from_secs(DEFAULT_EMBEDDINGS_REFRESH_SECS),
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

/// JSON, or TOML when the file name ends in `.toml`.
fn read_config_file(path: &Path) -> Result<FacemarkConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
