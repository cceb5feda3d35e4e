//! Backend face-result feed.
//!
//! The authoritative backend attributes identities to faces on its own polling
//! interval. The tracker reads whatever snapshot is newest and tolerates
//! staleness; it never owns or mutates the feed.

use anyhow::{anyhow, Result};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::identity::Identity;

/// A face result attributed by the backend.
///
/// `confidence` is canonically a fraction in `[0, 1]`. Values outside that
/// range are rejected at deserialization time (treated as absent) instead of
/// guessing whether they were sent as percentages.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackendFace {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub employee_id: Option<String>,
    /// Anchor point `[x, y]` in overlay pixel space. Longer arrays
    /// (`[x, y, w, h]`) are accepted and truncated.
    #[serde(rename = "box", deserialize_with = "deserialize_anchor")]
    pub anchor: [f32; 2],
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    #[serde(default, deserialize_with = "deserialize_unit_confidence")]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub age: Option<f32>,
    #[serde(skip, default = "fallback_token")]
    fallback_id: String,
}

impl BackendFace {
    pub fn new(name: &str, anchor: [f32; 2]) -> Self {
        Self {
            name: name.to_string(),
            employee_id: None,
            anchor,
            embedding: None,
            confidence: None,
            gender: None,
            age: None,
            fallback_id: fallback_token(),
        }
    }

    pub fn with_employee_id(mut self, id: &str) -> Self {
        self.employee_id = Some(id.to_string());
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = unit_confidence(confidence);
        self
    }

    pub fn identity(&self) -> Identity {
        Identity::from_name(&self.name)
    }

    /// Exclusive-claim key: employee id, else known name, else a per-object token.
    pub fn unique_id(&self) -> &str {
        if let Some(id) = self.employee_id.as_deref().filter(|id| !id.is_empty()) {
            return id;
        }
        match self.identity() {
            Identity::Known(_) => self.name.trim(),
            Identity::Unknown => &self.fallback_id,
        }
    }

    /// Embedding usable for local matching, if any.
    pub fn usable_embedding(&self) -> Option<&[f32]> {
        self.embedding.as_deref().filter(|e| !e.is_empty())
    }
}

fn fallback_token() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect();
    format!("anon-{suffix}")
}

fn unit_confidence(value: f32) -> Option<f32> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Some(value)
    } else {
        log::debug!("backend confidence {} outside [0, 1]; ignored", value);
        None
    }
}

fn deserialize_unit_confidence<'de, D>(deserializer: D) -> std::result::Result<Option<f32>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<f32> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(unit_confidence))
}

fn deserialize_anchor<'de, D>(deserializer: D) -> std::result::Result<[f32; 2], D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Vec<f32> = Vec::deserialize(deserializer)?;
    match raw.as_slice() {
        [x, y, ..] => Ok([*x, *y]),
        _ => Err(serde::de::Error::custom("box must have at least two coordinates")),
    }
}

/// Shared reference to the newest backend face list.
#[derive(Clone, Debug, Default)]
pub struct SharedFaces {
    inner: Arc<RwLock<Arc<[BackendFace]>>>,
}

impl SharedFaces {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, faces: Vec<BackendFace>) -> Result<()> {
        let mut guard = self
            .inner
            .write()
            .map_err(|_| anyhow!("face feed lock poisoned"))?;
        *guard = faces.into();
        Ok(())
    }

    /// Newest snapshot; empty if the writer poisoned the lock.
    pub fn latest(&self) -> Arc<[BackendFace]> {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(_) => Arc::from(Vec::new()),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FacesFile {
    Wrapped { results: Vec<BackendFace> },
    Bare(Vec<BackendFace>),
}

/// Parse a preview response (`{"results": [...]}` or a bare array).
pub fn parse_faces(raw: &str) -> Result<Vec<BackendFace>> {
    let parsed: FacesFile =
        serde_json::from_str(raw).map_err(|e| anyhow!("invalid face results: {}", e))?;
    Ok(match parsed {
        FacesFile::Wrapped { results } => results,
        FacesFile::Bare(results) => results,
    })
}

/// Background poller that republishes a JSON face-results file.
///
/// Stands in for the backend preview poll when running against recorded
/// results. Stops and joins on `stop()` or drop.
pub struct FilePoller {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl FilePoller {
    pub fn spawn(path: PathBuf, interval: Duration, faces: SharedFaces) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let handle = std::thread::spawn(move || {
            while !flag.load(Ordering::Acquire) {
                if let Err(err) = poll_once(&path, &faces) {
                    log::warn!("face feed poll failed: {}", err);
                }
                sleep_unless_stopped(interval, &flag);
            }
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("face feed poller panicked");
            }
        }
    }
}

impl Drop for FilePoller {
    fn drop(&mut self) {
        self.stop();
    }
}

fn poll_once(path: &Path, faces: &SharedFaces) -> Result<()> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read {}: {}", path.display(), e))?;
    let parsed = parse_faces(&raw)?;
    log::debug!("face feed: {} results from {}", parsed.len(), path.display());
    faces.publish(parsed)
}

fn sleep_unless_stopped(total: Duration, stop: &AtomicBool) {
    let step = Duration::from_millis(20);
    let mut waited = Duration::ZERO;
    while waited < total && !stop.load(Ordering::Acquire) {
        std::thread::sleep(step);
        waited += step;
    }
}
