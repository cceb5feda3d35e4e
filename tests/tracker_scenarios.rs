//! Multi-frame tracker behaviour: exclusivity, eviction, drift, debouncing
//! and stale reverification.

use facemark::embeddings::{EmbeddingCacheEntry, EmbeddingSnapshot};
use facemark::overlay::SCANNING_LABEL;
use facemark::{BackendFace, FrameOverlay, IdentityTracker, LabelStyle, Rect, TrackerConfig};

fn rect_at(cx: f32, cy: f32) -> Rect {
    Rect::new(cx - 50.0, cy - 50.0, 100.0, 100.0)
}

fn no_embeddings() -> EmbeddingSnapshot {
    EmbeddingSnapshot::from_entries(&[])
}

fn known(entries: &[(&str, Vec<f32>)]) -> EmbeddingSnapshot {
    let entries: Vec<EmbeddingCacheEntry> = entries
        .iter()
        .map(|(name, embedding)| EmbeddingCacheEntry {
            name: name.to_string(),
            embedding: embedding.clone(),
        })
        .collect();
    EmbeddingSnapshot::from_entries(&entries)
}

fn label_for(overlay: &FrameOverlay, index: usize) -> &str {
    overlay.boxes[index].text.as_str()
}

#[test]
fn a_name_is_never_shown_on_two_boxes() {
    let mut tracker = IdentityTracker::default();
    let faces = vec![
        BackendFace::new("Alice", [100.0, 100.0])
            .with_employee_id("E1")
            .with_confidence(0.7),
        BackendFace::new("Alice", [400.0, 100.0])
            .with_employee_id("E2")
            .with_confidence(0.9),
    ];
    let boxes = [rect_at(100.0, 100.0), rect_at(400.0, 100.0)];

    let overlay = tracker.process_frame(&boxes, &faces, &no_embeddings(), 0);

    assert_eq!(overlay.boxes.len(), 2);
    assert_eq!(overlay.displayed_names(), vec!["Alice"]);
    // the more confident box keeps the name, the other one scans
    assert_eq!(label_for(&overlay, 0), SCANNING_LABEL);
    assert_eq!(label_for(&overlay, 1), "Alice (90%)");
}

#[test]
fn unseen_tracks_are_forgotten_after_memory_window() {
    let mut tracker = IdentityTracker::default();
    let first = tracker.process_frame(&[rect_at(100.0, 100.0)], &[], &no_embeddings(), 0);
    let id = first.boxes[0].track_id;

    let at_limit = tracker.process_frame(&[], &[], &no_embeddings(), 800);
    assert!(at_limit.evicted.is_empty());
    assert!(tracker.track(id).is_some());

    let past_limit = tracker.process_frame(&[], &[], &no_embeddings(), 801);
    assert_eq!(past_limit.evicted, vec![id]);
    assert!(tracker.tracks().is_empty());
}

#[test]
fn drifted_box_starts_a_new_track() {
    let mut tracker = IdentityTracker::default();
    let faces = vec![BackendFace::new("Alice", [200.0, 200.0]).with_confidence(0.9)];
    let first = tracker.process_frame(
        &[Rect::new(0.0, 0.0, 400.0, 400.0)],
        &faces,
        &no_embeddings(),
        0,
    );
    let original = first.boxes[0].track_id;

    // still overlaps (IoU ~0.43) but the center jumped 160px
    let second = tracker.process_frame(
        &[Rect::new(160.0, 0.0, 400.0, 400.0)],
        &[],
        &no_embeddings(),
        33,
    );

    assert_eq!(second.evicted, vec![original]);
    assert_ne!(second.boxes[0].track_id, original);
    assert_eq!(second.boxes[0].style, LabelStyle::Scanning);
    assert!(second.displayed_names().is_empty());
    assert_eq!(tracker.tracks().len(), 1);
}

#[test]
fn overlap_decides_track_continuity() {
    let mut tracker = IdentityTracker::default();
    let first = tracker.process_frame(
        &[Rect::new(100.0, 100.0, 100.0, 100.0)],
        &[],
        &no_embeddings(),
        0,
    );
    let id = first.boxes[0].track_id;

    // IoU ~0.30: same track, position smoothed toward the new box
    let continued = tracker.process_frame(
        &[Rect::new(154.0, 100.0, 100.0, 100.0)],
        &[],
        &no_embeddings(),
        33,
    );
    assert_eq!(continued.boxes[0].track_id, id);
    let smoothed = tracker.track(id).unwrap().rect();
    assert!((smoothed.x - (0.7 * 154.0 + 0.3 * 100.0)).abs() < 1e-3);

    // IoU ~0.10 against the smoothed box: a new face
    let fresh = tracker.process_frame(
        &[Rect::new(smoothed.x + 82.0, 100.0, 100.0, 100.0)],
        &[],
        &no_embeddings(),
        66,
    );
    assert_ne!(fresh.boxes[0].track_id, id);
    assert_eq!(tracker.tracks().len(), 2);
}

#[test]
fn brief_unknown_keeps_an_established_name() {
    let mut tracker = IdentityTracker::default();
    let alice = vec![BackendFace::new("Alice", [100.0, 100.0])
        .with_employee_id("E1")
        .with_confidence(0.9)];
    let unknown = vec![BackendFace::new("Unknown", [100.0, 100.0])];
    let boxes = [rect_at(100.0, 100.0)];

    for t in [0, 33, 66] {
        tracker.process_frame(&boxes, &alice, &no_embeddings(), t);
    }
    let id = tracker.tracks().iter().next().unwrap().id();
    assert_eq!(tracker.track(id).unwrap().streak(), 3);

    let flicker = tracker.process_frame(&boxes, &unknown, &no_embeddings(), 99);
    assert_eq!(label_for(&flicker, 0), "Alice (90%)");
    assert_eq!(flicker.boxes[0].style, LabelStyle::Confirmed);

    let settled = tracker.process_frame(&boxes, &unknown, &no_embeddings(), 132);
    assert_eq!(label_for(&settled, 0), "Unknown");
    assert_eq!(settled.boxes[0].style, LabelStyle::Unknown);
}

#[test]
fn short_streak_shows_unknown_immediately() {
    let mut tracker = IdentityTracker::default();
    let boxes = [rect_at(100.0, 100.0)];
    let alice = vec![BackendFace::new("Alice", [100.0, 100.0]).with_confidence(0.9)];
    let unknown = vec![BackendFace::new("", [100.0, 100.0])];

    tracker.process_frame(&boxes, &alice, &no_embeddings(), 0);
    let overlay = tracker.process_frame(&boxes, &unknown, &no_embeddings(), 33);
    assert_eq!(label_for(&overlay, 0), "Unknown");
}

#[test]
fn confidence_is_smoothed_across_frames() {
    let mut tracker = IdentityTracker::default();
    let boxes = [rect_at(100.0, 100.0)];
    let high = vec![BackendFace::new("Alice", [100.0, 100.0]).with_confidence(0.9)];
    let low = vec![BackendFace::new("Alice", [100.0, 100.0]).with_confidence(0.5)];

    let first = tracker.process_frame(&boxes, &high, &no_embeddings(), 0);
    assert_eq!(label_for(&first, 0), "Alice (90%)");

    // 0.85 * 0.9 + 0.15 * 0.5
    let second = tracker.process_frame(&boxes, &low, &no_embeddings(), 33);
    assert_eq!(label_for(&second, 0), "Alice (84%)");
    assert_eq!(second.boxes[0].confidence_pct, Some(84));
}

#[test]
fn label_survives_a_missing_backend_result() {
    let mut tracker = IdentityTracker::default();
    let faces = vec![BackendFace::new("Alice", [100.0, 100.0]).with_confidence(0.8)];
    tracker.process_frame(&[rect_at(100.0, 100.0)], &faces, &no_embeddings(), 0);

    let cached = tracker.process_frame(&[rect_at(104.0, 100.0)], &[], &no_embeddings(), 500);
    assert_eq!(label_for(&cached, 0), "Alice (80%)");

    // the cached label is not refreshed by reuse
    let expired = tracker.process_frame(&[rect_at(106.0, 100.0)], &[], &no_embeddings(), 800);
    assert_eq!(label_for(&expired, 0), SCANNING_LABEL);
}

#[test]
fn reverify_for_a_rebound_track_is_discarded() {
    let mut tracker = IdentityTracker::default();
    let embeddings = known(&[("Alice", vec![1.0, 0.0, 0.0])]);
    let boxes = [rect_at(100.0, 100.0)];

    let bob = vec![BackendFace::new("Bob", [100.0, 100.0])
        .with_employee_id("E1")
        .with_embedding(vec![1.0, 0.0, 0.0])
        .with_confidence(0.6)];
    let first = tracker.process_frame(&boxes, &bob, &embeddings, 0);
    assert_eq!(first.instant_matches.len(), 1);
    assert_eq!(first.instant_matches[0].outcome.identity.name(), Some("Alice"));
    assert_eq!(tracker.pending_reverifications(), 1);

    // a different backend face takes the box before the job is due
    let carol = vec![BackendFace::new("Carol", [100.0, 100.0])
        .with_employee_id("E2")
        .with_confidence(0.7)];
    tracker.process_frame(&boxes, &carol, &embeddings, 50);

    let after = tracker.process_frame(&boxes, &carol, &embeddings, 150);
    let id = after.boxes[0].track_id;
    assert_eq!(tracker.pending_reverifications(), 0);
    assert!(tracker.track(id).unwrap().verified().is_none());
    assert_eq!(after.displayed_names(), vec!["Carol"]);
}

#[test]
fn completed_reverify_names_the_track() {
    let mut tracker = IdentityTracker::new(TrackerConfig {
        reverify_delay_ms: 100,
        ..TrackerConfig::default()
    });
    let embeddings = known(&[("Alice", vec![1.0, 0.0, 0.0]), ("Bob", vec![0.0, 1.0, 0.0])]);
    let boxes = [rect_at(100.0, 100.0)];
    let faces = vec![BackendFace::new("Unknown", [100.0, 100.0])
        .with_employee_id("E1")
        .with_embedding(vec![0.0, 1.0, 0.0])];

    let first = tracker.process_frame(&boxes, &faces, &embeddings, 0);
    assert_eq!(label_for(&first, 0), "Unknown");

    let verified = tracker.process_frame(&boxes, &faces, &embeddings, 100);
    assert_eq!(verified.displayed_names(), vec!["Bob"]);
    let id = verified.boxes[0].track_id;
    let identity = tracker.track(id).unwrap().verified().unwrap();
    assert_eq!(identity.uid, "E1");
    assert!((identity.confidence - 1.0).abs() < 1e-6);
}

#[test]
fn smoothed_box_converges_on_a_steady_face() {
    let mut tracker = IdentityTracker::default();
    tracker.process_frame(&[rect_at(100.0, 100.0)], &[], &no_embeddings(), 0);
    let target = rect_at(120.0, 110.0);

    let mut id = None;
    for frame in 1..=12u64 {
        let overlay = tracker.process_frame(&[target], &[], &no_embeddings(), frame * 33);
        id = Some(overlay.boxes[0].track_id);
    }
    let rect = tracker.track(id.unwrap()).unwrap().rect();
    // residual shrinks by 0.3 per frame: 20 * 0.3^12 is far below a pixel
    assert!((rect.x - target.x).abs() < 1e-3);
    assert!((rect.y - target.y).abs() < 1e-3);
    assert_eq!(tracker.tracks().len(), 1);
}

#[test]
fn one_outlier_moves_confidence_by_at_most_fifteen_percent_of_the_gap() {
    let mut tracker = IdentityTracker::default();
    let boxes = [rect_at(100.0, 100.0)];
    let steady = vec![BackendFace::new("Alice", [100.0, 100.0]).with_confidence(0.9)];
    let outlier = vec![BackendFace::new("Alice", [100.0, 100.0]).with_confidence(0.1)];

    for t in [0, 33, 66] {
        tracker.process_frame(&boxes, &steady, &no_embeddings(), t);
    }
    let overlay = tracker.process_frame(&boxes, &outlier, &no_embeddings(), 99);
    let id = overlay.boxes[0].track_id;
    let smoothed = tracker.track(id).unwrap().smoothed_confidence().unwrap();

    let gap = 0.9 - 0.1;
    assert!(0.9 - smoothed <= 0.15 * gap + 1e-6);
    assert_eq!(label_for(&overlay, 0), "Alice (78%)");
}

#[test]
fn identity_jumping_away_drops_its_old_track() {
    let mut tracker = IdentityTracker::default();
    let alice_at = |x: f32| {
        vec![BackendFace::new("Alice", [x, 100.0])
            .with_employee_id("E1")
            .with_confidence(0.9)]
    };

    let first = tracker.process_frame(&[rect_at(100.0, 100.0)], &alice_at(100.0), &no_embeddings(), 0);
    let original = first.boxes[0].track_id;

    // same person, 200px to the right with an ordinary 100px box
    let moved = tracker.process_frame(&[rect_at(300.0, 100.0)], &alice_at(300.0), &no_embeddings(), 33);
    assert_eq!(moved.evicted, vec![original]);
    assert_eq!(moved.displayed_names(), vec!["Alice"]);
    assert!(tracker.track(original).is_none());
    assert_eq!(tracker.tracks().len(), 1);

    // a stranger stepping into the old spot must not inherit the name
    let stranger = tracker.process_frame(&[rect_at(100.0, 100.0)], &[], &no_embeddings(), 100);
    assert_eq!(label_for(&stranger, 0), SCANNING_LABEL);
    assert!(stranger.displayed_names().is_empty());
}

#[test]
fn empty_backend_embedding_falls_back_to_backend_name() {
    let mut tracker = IdentityTracker::default();
    let embeddings = known(&[("Alice", vec![1.0, 0.0, 0.0])]);
    assert!(embeddings.is_ready());
    let faces = vec![BackendFace::new("Bob", [100.0, 100.0])
        .with_employee_id("E9")
        .with_embedding(vec![])
        .with_confidence(0.75)];

    let overlay = tracker.process_frame(&[rect_at(100.0, 100.0)], &faces, &embeddings, 0);

    assert!(overlay.instant_matches.is_empty());
    assert_eq!(tracker.pending_reverifications(), 0);
    assert_eq!(label_for(&overlay, 0), "Bob (75%)");
    let id = overlay.boxes[0].track_id;
    assert!(tracker.track(id).unwrap().last_embedding().is_none());

    // still no local match on later frames
    let later = tracker.process_frame(&[rect_at(100.0, 100.0)], &faces, &embeddings, 200);
    assert!(later.instant_matches.is_empty());
    assert_eq!(later.displayed_names(), vec!["Bob"]);
}
