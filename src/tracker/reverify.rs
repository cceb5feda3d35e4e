use zeroize::Zeroize;

use super::track::TrackId;

/// Delayed second match for one track, corroborated by the track's previous
/// embedding.
///
/// Jobs never touch a track directly. The tracker resolves them on a later
/// pass and applies the outcome only if the track still exists and is still
/// bound to `uid`.
#[derive(Debug)]
pub struct ReverifyJob {
    pub track_id: TrackId,
    pub uid: String,
    pub due_ms: u64,
    pub embedding: Vec<f32>,
    pub previous: Option<Vec<f32>>,
}

impl Drop for ReverifyJob {
    fn drop(&mut self) {
        self.embedding.zeroize();
        if let Some(previous) = self.previous.as_mut() {
            previous.zeroize();
        }
    }
}

#[derive(Debug, Default)]
pub struct ReverifyQueue {
    jobs: Vec<ReverifyJob>,
}

impl ReverifyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `job` unless one is already pending for the same track, which
    /// paces reverification to one match per delay window per face.
    pub fn schedule(&mut self, job: ReverifyJob) -> bool {
        if self.is_pending(job.track_id) {
            return false;
        }
        self.jobs.push(job);
        true
    }

    pub fn is_pending(&self, track_id: TrackId) -> bool {
        self.jobs.iter().any(|job| job.track_id == track_id)
    }

    /// Remove and return jobs due at `now_ms`, oldest first.
    pub fn take_due(&mut self, now_ms: u64) -> Vec<ReverifyJob> {
        let (mut due, pending): (Vec<_>, Vec<_>) =
            self.jobs.drain(..).partition(|job| job.due_ms <= now_ms);
        self.jobs = pending;
        due.sort_by_key(|job| job.due_ms);
        due
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
