use std::collections::BTreeMap;
use std::fmt;
use zeroize::Zeroize;

use crate::geometry::Rect;
use crate::identity::Identity;
use crate::overlay::LabelStyle;

/// Arena key of a tracked face. Never reused within one tracker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TrackId(u64);

impl TrackId {
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "track#{}", self.0)
    }
}

/// Identity produced by a completed reverify for the backend face bound to
/// the track at scheduling time.
#[derive(Clone, Debug, PartialEq)]
pub struct VerifiedIdentity {
    pub uid: String,
    pub identity: Identity,
    pub confidence: f32,
}

/// Last label shown for a track, reused while no fresh identity arrives.
#[derive(Clone, Debug, PartialEq)]
pub struct CachedLabel {
    pub text: String,
    pub style: LabelStyle,
    pub identity: Option<String>,
    pub confidence_pct: Option<u8>,
    pub labeled_ms: u64,
}

/// The tracker's memory of one face across frames.
#[derive(Debug)]
pub struct TrackedFace {
    id: TrackId,
    pub(crate) rect: Rect,
    pub(crate) last_seen_ms: u64,
    pub(crate) streak: u8,
    pub(crate) last_seen_name: Identity,
    pub(crate) smoothed_confidence: Option<f32>,
    pub(crate) last_embedding: Option<Vec<f32>>,
    pub(crate) uid: Option<String>,
    pub(crate) verified: Option<VerifiedIdentity>,
    pub(crate) cached_label: Option<CachedLabel>,
}

impl TrackedFace {
    fn new(id: TrackId, rect: Rect, now_ms: u64) -> Self {
        Self {
            id,
            rect,
            last_seen_ms: now_ms,
            streak: 0,
            last_seen_name: Identity::Unknown,
            smoothed_confidence: None,
            last_embedding: None,
            uid: None,
            verified: None,
            cached_label: None,
        }
    }

    pub fn id(&self) -> TrackId {
        self.id
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub fn last_seen_ms(&self) -> u64 {
        self.last_seen_ms
    }

    pub fn streak(&self) -> u8 {
        self.streak
    }

    pub fn last_seen_name(&self) -> &Identity {
        &self.last_seen_name
    }

    /// Smoothed confidence as a fraction in `[0, 1]`.
    pub fn smoothed_confidence(&self) -> Option<f32> {
        self.smoothed_confidence
    }

    pub fn last_embedding(&self) -> Option<&[f32]> {
        self.last_embedding.as_deref()
    }

    pub fn bound_uid(&self) -> Option<&str> {
        self.uid.as_deref()
    }

    pub fn verified(&self) -> Option<&VerifiedIdentity> {
        self.verified.as_ref()
    }

    /// Replace the stored embedding, scrubbing the old one.
    pub(crate) fn store_embedding(&mut self, embedding: &[f32]) {
        if let Some(old) = self.last_embedding.as_mut() {
            old.zeroize();
        }
        self.last_embedding = Some(embedding.to_vec());
    }

    /// Bind the track to a backend identity; a different identity drops the
    /// verification made for the previous one.
    pub(crate) fn bind(&mut self, uid: &str) {
        if self.uid.as_deref() != Some(uid) {
            self.uid = Some(uid.to_string());
            self.verified = None;
        }
    }
}

impl Drop for TrackedFace {
    fn drop(&mut self) {
        if let Some(embedding) = self.last_embedding.as_mut() {
            embedding.zeroize();
        }
    }
}

/// Process-local table of tracks addressed by monotonically increasing ids.
#[derive(Debug, Default)]
pub struct TrackArena {
    next_id: u64,
    tracks: BTreeMap<TrackId, TrackedFace>,
}

impl TrackArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, rect: Rect, now_ms: u64) -> TrackId {
        self.next_id += 1;
        let id = TrackId(self.next_id);
        self.tracks.insert(id, TrackedFace::new(id, rect, now_ms));
        id
    }

    pub fn get(&self, id: TrackId) -> Option<&TrackedFace> {
        self.tracks.get(&id)
    }

    pub fn get_mut(&mut self, id: TrackId) -> Option<&mut TrackedFace> {
        self.tracks.get_mut(&id)
    }

    pub fn remove(&mut self, id: TrackId) -> bool {
        self.tracks.remove(&id).is_some()
    }

    pub fn contains(&self, id: TrackId) -> bool {
        self.tracks.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackedFace> {
        self.tracks.values()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Track overlapping `rect` the most, above `min_iou`, skipping `exclude`.
    pub fn best_overlap(
        &self,
        rect: &Rect,
        min_iou: f32,
        exclude: impl Fn(TrackId) -> bool,
    ) -> Option<TrackId> {
        self.tracks
            .values()
            .filter(|track| !exclude(track.id))
            .map(|track| (track.id, track.rect.iou(rect)))
            .filter(|(_, iou)| *iou > min_iou)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(id, _)| id)
    }

    /// Remove tracks unseen for longer than `memory_ms`.
    pub fn evict_stale(&mut self, now_ms: u64, memory_ms: u64) -> Vec<TrackId> {
        let stale: Vec<TrackId> = self
            .tracks
            .values()
            .filter(|track| now_ms.saturating_sub(track.last_seen_ms) > memory_ms)
            .map(|track| track.id)
            .collect();
        for id in &stale {
            self.tracks.remove(id);
        }
        stale
    }
}
