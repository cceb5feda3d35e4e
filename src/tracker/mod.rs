//! Identity tracker.
//!
//! Turns anonymous per-frame detection boxes plus the (much slower) backend
//! face results into a stable, named, positionally smoothed set of labeled
//! boxes. One call to [`IdentityTracker::process_frame`] is one frame:
//!
//! 1. resolve reverify jobs that came due since the previous frame
//! 2. per box: claim the nearest unclaimed backend face, associate or create a
//!    track, resolve the identity to display
//! 3. evict drifted and stale tracks
//! 4. settle labels so no identity is displayed twice
//!
//! Assignment and eviction never interleave, so a frame never observes a
//! half-updated track.

mod reverify;
mod track;

use std::collections::HashSet;

use crate::detect::DetectionBox;
use crate::embeddings::EmbeddingSnapshot;
use crate::feed::BackendFace;
use crate::geometry::{distance, Rect};
use crate::identity::Identity;
use crate::matcher::{strict_match, MatchOptions, MatchOutcome, DEFAULT_THRESHOLD};
use crate::overlay::{confirmed_label, percent, LabelStyle, OverlayGeometry, SCANNING_LABEL};

pub use reverify::{ReverifyJob, ReverifyQueue};
pub use track::{CachedLabel, TrackArena, TrackId, TrackedFace, VerifiedIdentity};

#[derive(Clone, Debug, PartialEq)]
pub struct TrackerConfig {
    /// Tracks unseen for longer than this are forgotten.
    pub memory_ms: u64,
    /// A track whose box jumps further than this on either axis is dropped.
    pub drift_px: f32,
    /// Maximum center-to-anchor distance for a backend face to be claimed.
    pub gate_px: f32,
    /// Minimum IoU for a box to continue an existing track.
    pub iou_threshold: f32,
    /// Weight of the current box in position smoothing.
    pub box_alpha: f32,
    /// Weight of the previous value in confidence smoothing.
    pub confidence_alpha: f32,
    pub reverify_delay_ms: u64,
    pub match_threshold: f32,
    /// Streak above which an "Unknown" frame keeps the previous name.
    pub grace_streak: u8,
    pub max_streak: u8,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            memory_ms: 800,
            drift_px: 150.0,
            gate_px: 80.0,
            iou_threshold: 0.25,
            box_alpha: 0.7,
            confidence_alpha: 0.85,
            reverify_delay_ms: 120,
            match_threshold: DEFAULT_THRESHOLD,
            grace_streak: 2,
            max_streak: 10,
        }
    }
}

/// One box ready to draw.
#[derive(Clone, Debug, PartialEq)]
pub struct LabeledBox {
    pub track_id: TrackId,
    pub rect: Rect,
    pub text: String,
    pub style: LabelStyle,
    /// Displayed identity, if any.
    pub identity: Option<String>,
    pub confidence_pct: Option<u8>,
}

/// Informational first-pass match, reported before the reverify settles.
#[derive(Clone, Debug, PartialEq)]
pub struct InstantMatch {
    pub track_id: TrackId,
    pub outcome: MatchOutcome,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameOverlay {
    pub boxes: Vec<LabeledBox>,
    pub instant_matches: Vec<InstantMatch>,
    pub evicted: Vec<TrackId>,
}

impl FrameOverlay {
    /// Names currently displayed, in box order.
    pub fn displayed_names(&self) -> Vec<&str> {
        self.boxes
            .iter()
            .filter_map(|b| b.identity.as_deref())
            .collect()
    }
}

/// What a box wants to show before the frame-wide exclusivity pass.
#[derive(Clone, Debug)]
enum Resolution {
    Confirmed { name: String, confidence: f32 },
    Grace { name: String, confidence: f32 },
    Unknown,
    Cached(CachedLabel),
    Scanning,
}

struct Pending {
    track_id: TrackId,
    rect: Rect,
    resolution: Resolution,
}

pub struct IdentityTracker {
    config: TrackerConfig,
    tracks: TrackArena,
    reverify: ReverifyQueue,
}

impl IdentityTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            tracks: TrackArena::new(),
            reverify: ReverifyQueue::new(),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn tracks(&self) -> &TrackArena {
        &self.tracks
    }

    pub fn track(&self, id: TrackId) -> Option<&TrackedFace> {
        self.tracks.get(id)
    }

    pub fn pending_reverifications(&self) -> usize {
        self.reverify.len()
    }

    /// Project raw detections through `geometry`, then process the frame.
    pub fn process_detections(
        &mut self,
        detections: &[DetectionBox],
        geometry: &OverlayGeometry,
        faces: &[BackendFace],
        embeddings: &EmbeddingSnapshot,
        now_ms: u64,
    ) -> FrameOverlay {
        let rects = geometry.project_all(detections);
        self.process_frame(&rects, faces, embeddings, now_ms)
    }

    /// Process one frame of boxes already in overlay space.
    pub fn process_frame(
        &mut self,
        boxes: &[Rect],
        faces: &[BackendFace],
        embeddings: &EmbeddingSnapshot,
        now_ms: u64,
    ) -> FrameOverlay {
        self.resolve_due(now_ms, embeddings);

        let mut overlay = FrameOverlay::default();
        let mut claimed: HashSet<&str> = HashSet::new();
        let mut touched: HashSet<TrackId> = HashSet::new();
        let mut drifted: Vec<TrackId> = Vec::new();
        let mut pending = Vec::with_capacity(boxes.len());

        for rect in boxes {
            let face = self.claim_face(rect, faces, &mut claimed);
            let track_id = self.associate(rect, now_ms, &mut touched, &mut drifted);
            if let Some(face) = face {
                self.flag_moved_sightings(face.unique_id(), rect, &mut touched, &mut drifted);
            }
            let resolution = self.resolve_identity(track_id, face, embeddings, now_ms, &mut overlay);
            let rect = self.tracks.get(track_id).map(|t| t.rect).unwrap_or(*rect);
            pending.push(Pending {
                track_id,
                rect,
                resolution,
            });
        }

        for id in drifted {
            if self.tracks.remove(id) {
                log::debug!("{} dropped: box drifted", id);
                overlay.evicted.push(id);
            }
        }
        for id in self.tracks.evict_stale(now_ms, self.config.memory_ms) {
            log::debug!("{} dropped: unseen for {}ms", id, self.config.memory_ms);
            overlay.evicted.push(id);
        }

        overlay.boxes = self.settle_labels(pending, now_ms);
        overlay
    }

    /// Apply reverify jobs that are due. Jobs whose track was evicted, or
    /// whose track has since been bound to a different face, are discarded.
    pub fn resolve_due(&mut self, now_ms: u64, embeddings: &EmbeddingSnapshot) {
        for job in self.reverify.take_due(now_ms) {
            let Some(track) = self.tracks.get_mut(job.track_id) else {
                log::debug!("reverify for evicted {} discarded", job.track_id);
                continue;
            };
            if track.uid.as_deref() != Some(job.uid.as_str()) {
                log::debug!("reverify for rebound {} discarded", job.track_id);
                continue;
            }
            if !embeddings.is_ready() {
                continue;
            }
            let options = MatchOptions {
                threshold: self.config.match_threshold,
                previous: job.previous.as_deref(),
            };
            let outcome = strict_match(&job.embedding, embeddings.entries(), &options);
            log::debug!(
                "reverify {}: {} ({:.3})",
                job.track_id,
                outcome.identity,
                outcome.confidence
            );
            track.verified = Some(VerifiedIdentity {
                uid: job.uid.clone(),
                identity: outcome.identity,
                confidence: outcome.confidence,
            });
        }
    }

    /// Nearest unclaimed backend face within the gate.
    fn claim_face<'f>(
        &self,
        rect: &Rect,
        faces: &'f [BackendFace],
        claimed: &mut HashSet<&'f str>,
    ) -> Option<&'f BackendFace> {
        let center = rect.center();
        let best = faces
            .iter()
            .filter(|face| !claimed.contains(face.unique_id()))
            .map(|face| (face, distance(center, (face.anchor[0], face.anchor[1]))))
            .filter(|(_, d)| *d < self.config.gate_px)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(face, _)| face)?;
        claimed.insert(best.unique_id());
        Some(best)
    }

    /// Tracks still bound to `uid` whose box lies beyond the drift limit of
    /// where `uid` was just sighted. The face left them, so they must not
    /// keep serving its name. Flagged tracks are also excluded from
    /// association for the rest of the frame.
    fn flag_moved_sightings(
        &self,
        uid: &str,
        rect: &Rect,
        touched: &mut HashSet<TrackId>,
        drifted: &mut Vec<TrackId>,
    ) {
        let limit = self.config.drift_px;
        let left_behind: Vec<TrackId> = self
            .tracks
            .iter()
            .filter(|track| !touched.contains(&track.id()))
            .filter(|track| track.uid.as_deref() == Some(uid))
            .filter(|track| track.rect.drifted_from(rect, limit))
            .map(|track| track.id())
            .collect();
        for id in left_behind {
            log::debug!("{} left behind by {}", id, uid);
            touched.insert(id);
            drifted.push(id);
        }
    }

    /// Continue the best-overlapping track, or start a new one. A match that
    /// jumped beyond the drift limit is scheduled for eviction and replaced.
    fn associate(
        &mut self,
        rect: &Rect,
        now_ms: u64,
        touched: &mut HashSet<TrackId>,
        drifted: &mut Vec<TrackId>,
    ) -> TrackId {
        let candidate = self
            .tracks
            .best_overlap(rect, self.config.iou_threshold, |id| touched.contains(&id));

        let id = match candidate {
            Some(id) => {
                let drift_px = self.config.drift_px;
                let box_alpha = self.config.box_alpha;
                let drifted_away = self
                    .tracks
                    .get(id)
                    .map_or(false, |track| track.rect.drifted_from(rect, drift_px));
                if drifted_away {
                    drifted.push(id);
                    touched.insert(id);
                    self.tracks.insert(*rect, now_ms)
                } else if let Some(track) = self.tracks.get_mut(id) {
                    track.rect = rect.smoothed(&track.rect, box_alpha);
                    track.last_seen_ms = now_ms;
                    id
                } else {
                    self.tracks.insert(*rect, now_ms)
                }
            }
            None => self.tracks.insert(*rect, now_ms),
        };
        touched.insert(id);
        id
    }

    fn resolve_identity(
        &mut self,
        track_id: TrackId,
        face: Option<&BackendFace>,
        embeddings: &EmbeddingSnapshot,
        now_ms: u64,
        overlay: &mut FrameOverlay,
    ) -> Resolution {
        let config = self.config.clone();
        let Some(track) = self.tracks.get_mut(track_id) else {
            return Resolution::Scanning;
        };

        let Some(face) = face else {
            return match &track.cached_label {
                Some(cached) if now_ms.saturating_sub(cached.labeled_ms) < config.memory_ms => {
                    Resolution::Cached(cached.clone())
                }
                _ => Resolution::Scanning,
            };
        };

        let uid = face.unique_id();
        track.bind(uid);

        if let Some(embedding) = face.usable_embedding() {
            if embeddings.is_ready() {
                let instant = strict_match(
                    embedding,
                    embeddings.entries(),
                    &MatchOptions::with_threshold(config.match_threshold),
                );
                log::debug!(
                    "instant match {}: {} ({:.3})",
                    track_id,
                    instant.identity,
                    instant.confidence
                );
                overlay.instant_matches.push(InstantMatch {
                    track_id,
                    outcome: instant,
                });
                self.reverify.schedule(ReverifyJob {
                    track_id,
                    uid: uid.to_string(),
                    due_ms: now_ms + config.reverify_delay_ms,
                    embedding: embedding.to_vec(),
                    previous: track.last_embedding.clone(),
                });
            }
            track.store_embedding(embedding);
        }

        let (identity, raw_confidence) = match &track.verified {
            Some(verified) => (verified.identity.clone(), verified.confidence),
            None => (face.identity(), face.confidence.unwrap_or(0.0)),
        };

        match identity {
            Identity::Known(name) => {
                let smoothed = match track.smoothed_confidence {
                    Some(previous) => {
                        config.confidence_alpha * previous
                            + (1.0 - config.confidence_alpha) * raw_confidence
                    }
                    None => raw_confidence,
                };
                track.smoothed_confidence = Some(smoothed);
                track.streak = track.streak.saturating_add(1).min(config.max_streak);
                track.last_seen_name = Identity::Known(name.clone());
                Resolution::Confirmed {
                    name,
                    confidence: smoothed,
                }
            }
            Identity::Unknown => {
                let grace = track.streak > config.grace_streak;
                track.streak = track.streak.saturating_sub(1);
                match (&track.last_seen_name, grace) {
                    (Identity::Known(name), true) => Resolution::Grace {
                        name: name.clone(),
                        confidence: track.smoothed_confidence.unwrap_or(0.0),
                    },
                    _ => Resolution::Unknown,
                }
            }
        }
    }

    /// Render labels, granting each displayed name to at most one box.
    /// Fresh confirmations win over grace labels, which win over cached ones.
    fn settle_labels(&mut self, pending: Vec<Pending>, now_ms: u64) -> Vec<LabeledBox> {
        let mut order: Vec<usize> = (0..pending.len()).collect();
        order.sort_by(|&a, &b| {
            let (ra, ca) = priority(&pending[a].resolution);
            let (rb, cb) = priority(&pending[b].resolution);
            ra.cmp(&rb).then(cb.total_cmp(&ca))
        });

        let mut shown: HashSet<String> = HashSet::new();
        let mut labeled: Vec<Option<LabeledBox>> = vec![None; pending.len()];

        for index in order {
            let item = &pending[index];
            let (label, cacheable) = match &item.resolution {
                Resolution::Confirmed { name, confidence }
                | Resolution::Grace { name, confidence } => {
                    if shown.insert(name.clone()) {
                        (
                            LabeledBox {
                                track_id: item.track_id,
                                rect: item.rect,
                                text: confirmed_label(name, *confidence),
                                style: LabelStyle::Confirmed,
                                identity: Some(name.clone()),
                                confidence_pct: Some(percent(*confidence)),
                            },
                            true,
                        )
                    } else {
                        (scanning(item), false)
                    }
                }
                Resolution::Unknown => (
                    LabeledBox {
                        track_id: item.track_id,
                        rect: item.rect,
                        text: Identity::Unknown.to_string(),
                        style: LabelStyle::Unknown,
                        identity: None,
                        confidence_pct: None,
                    },
                    true,
                ),
                Resolution::Cached(cached) => {
                    let free = cached
                        .identity
                        .as_ref()
                        .map_or(true, |name| shown.insert(name.clone()));
                    if free {
                        (
                            LabeledBox {
                                track_id: item.track_id,
                                rect: item.rect,
                                text: cached.text.clone(),
                                style: cached.style,
                                identity: cached.identity.clone(),
                                confidence_pct: cached.confidence_pct,
                            },
                            false,
                        )
                    } else {
                        (scanning(item), false)
                    }
                }
                Resolution::Scanning => (scanning(item), false),
            };

            if cacheable {
                if let Some(track) = self.tracks.get_mut(item.track_id) {
                    track.cached_label = Some(CachedLabel {
                        text: label.text.clone(),
                        style: label.style,
                        identity: label.identity.clone(),
                        confidence_pct: label.confidence_pct,
                        labeled_ms: now_ms,
                    });
                }
            }
            labeled[index] = Some(label);
        }

        labeled.into_iter().flatten().collect()
    }
}

impl Default for IdentityTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

fn priority(resolution: &Resolution) -> (u8, f32) {
    match resolution {
        Resolution::Confirmed { confidence, .. } => (0, *confidence),
        Resolution::Grace { confidence, .. } => (1, *confidence),
        Resolution::Cached(_) => (2, 0.0),
        Resolution::Unknown | Resolution::Scanning => (3, 0.0),
    }
}

fn scanning(item: &Pending) -> LabeledBox {
    LabeledBox {
        track_id: item.track_id,
        rect: item.rect,
        text: SCANNING_LABEL.to_string(),
        style: LabelStyle::Scanning,
        identity: None,
        confidence_pct: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::EmbeddingCacheEntry;

    fn rect_at(cx: f32, cy: f32) -> Rect {
        Rect::new(cx - 50.0, cy - 50.0, 100.0, 100.0)
    }

    fn snapshot(entries: &[(&str, Vec<f32>)]) -> EmbeddingSnapshot {
        let entries: Vec<EmbeddingCacheEntry> = entries
            .iter()
            .map(|(name, embedding)| EmbeddingCacheEntry {
                name: name.to_string(),
                embedding: embedding.clone(),
            })
            .collect();
        EmbeddingSnapshot::from_entries(&entries)
    }

    #[test]
    fn unassigned_box_is_scanning() {
        let mut tracker = IdentityTracker::default();
        let overlay = tracker.process_frame(&[rect_at(100.0, 100.0)], &[], &snapshot(&[]), 0);
        assert_eq!(overlay.boxes.len(), 1);
        assert_eq!(overlay.boxes[0].text, SCANNING_LABEL);
        assert_eq!(overlay.boxes[0].style, LabelStyle::Scanning);
    }

    #[test]
    fn face_outside_gate_is_not_claimed() {
        let mut tracker = IdentityTracker::default();
        let faces = vec![BackendFace::new("Alice", [100.0, 185.0]).with_confidence(0.9)];
        let overlay = tracker.process_frame(&[rect_at(100.0, 100.0)], &faces, &snapshot(&[]), 0);
        assert_eq!(overlay.boxes[0].style, LabelStyle::Scanning);
    }

    #[test]
    fn nearest_face_wins_the_box() {
        let mut tracker = IdentityTracker::default();
        let faces = vec![
            BackendFace::new("Far", [150.0, 100.0]).with_confidence(0.9),
            BackendFace::new("Near", [105.0, 100.0]).with_confidence(0.9),
        ];
        let overlay = tracker.process_frame(&[rect_at(100.0, 100.0)], &faces, &snapshot(&[]), 0);
        assert_eq!(overlay.boxes[0].identity.as_deref(), Some("Near"));
        assert_eq!(overlay.boxes[0].text, "Near (90%)");
    }

    #[test]
    fn cached_label_is_reused_within_memory() {
        let mut tracker = IdentityTracker::default();
        let faces = vec![BackendFace::new("Alice", [100.0, 100.0]).with_confidence(0.8)];
        tracker.process_frame(&[rect_at(100.0, 100.0)], &faces, &snapshot(&[]), 0);

        let overlay = tracker.process_frame(&[rect_at(102.0, 100.0)], &[], &snapshot(&[]), 300);
        assert_eq!(overlay.boxes[0].identity.as_deref(), Some("Alice"));

        let overlay = tracker.process_frame(&[rect_at(104.0, 100.0)], &[], &snapshot(&[]), 900);
        assert_eq!(overlay.boxes[0].style, LabelStyle::Scanning);
    }

    #[test]
    fn reverify_result_overrides_backend_name() {
        let mut tracker = IdentityTracker::default();
        let table = snapshot(&[("Alice", vec![1.0, 0.0, 0.0]), ("Bob", vec![0.0, 1.0, 0.0])]);
        let faces = vec![BackendFace::new("Bob", [100.0, 100.0])
            .with_employee_id("E7")
            .with_confidence(0.7)
            .with_embedding(vec![1.0, 0.0, 0.0])];

        let first = tracker.process_frame(&[rect_at(100.0, 100.0)], &faces, &table, 0);
        assert_eq!(first.instant_matches.len(), 1);
        assert_eq!(
            first.instant_matches[0].outcome.identity,
            Identity::Known("Alice".into())
        );
        // backend label stands until the reverify lands
        assert_eq!(first.boxes[0].identity.as_deref(), Some("Bob"));
        assert_eq!(tracker.pending_reverifications(), 1);

        let later = tracker.process_frame(&[rect_at(100.0, 100.0)], &faces, &table, 130);
        assert_eq!(later.boxes[0].identity.as_deref(), Some("Alice"));
    }

    #[test]
    fn loading_cache_skips_local_matching() {
        let mut tracker = IdentityTracker::default();
        let faces = vec![BackendFace::new("Bob", [100.0, 100.0])
            .with_confidence(0.7)
            .with_embedding(vec![1.0, 0.0])];
        let overlay =
            tracker.process_frame(&[rect_at(100.0, 100.0)], &faces, &EmbeddingSnapshot::loading(), 0);
        assert!(overlay.instant_matches.is_empty());
        assert_eq!(tracker.pending_reverifications(), 0);
        assert_eq!(overlay.boxes[0].identity.as_deref(), Some("Bob"));
        // embedding is still remembered for the next corroboration
        let track = tracker.tracks().iter().next().unwrap();
        assert_eq!(track.last_embedding(), Some(&[1.0, 0.0][..]));
    }

    #[test]
    fn reverify_for_evicted_track_is_discarded() {
        let mut tracker = IdentityTracker::new(TrackerConfig {
            reverify_delay_ms: 2_000,
            ..TrackerConfig::default()
        });
        let table = snapshot(&[("Alice", vec![1.0, 0.0])]);
        let faces = vec![BackendFace::new("Alice", [100.0, 100.0])
            .with_confidence(0.9)
            .with_embedding(vec![1.0, 0.0])];
        tracker.process_frame(&[rect_at(100.0, 100.0)], &faces, &table, 0);
        assert_eq!(tracker.pending_reverifications(), 1);

        let overlay = tracker.process_frame(&[], &[], &table, 1_000);
        assert_eq!(overlay.evicted.len(), 1);
        assert!(tracker.tracks().is_empty());

        // the job comes due after its track is gone and must not resurrect it
        let overlay = tracker.process_frame(&[], &[], &table, 2_100);
        assert_eq!(tracker.pending_reverifications(), 0);
        assert!(tracker.tracks().is_empty());
        assert!(overlay.boxes.is_empty());
    }

    #[test]
    fn sighting_within_drift_limit_keeps_old_track() {
        let mut tracker = IdentityTracker::default();
        let at = |x: f32| vec![BackendFace::new("Alice", [x, 100.0])
            .with_employee_id("E1")
            .with_confidence(0.9)];
        let first = tracker.process_frame(&[rect_at(100.0, 100.0)], &at(100.0), &snapshot(&[]), 0);
        let original = first.boxes[0].track_id;

        // no overlap, but only 120px away: not a drift
        let second = tracker.process_frame(&[rect_at(220.0, 100.0)], &at(220.0), &snapshot(&[]), 33);
        assert!(second.evicted.is_empty());
        assert!(tracker.track(original).is_some());

        // 200px from the original track
        let third = tracker.process_frame(&[rect_at(300.0, 100.0)], &at(300.0), &snapshot(&[]), 66);
        assert!(third.evicted.contains(&original));
        assert!(tracker.track(original).is_none());
    }
}
