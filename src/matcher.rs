//! Strict cosine matcher.
//!
//! Compares one live embedding against the known-user table and prefers
//! "Unknown" over a wrong name. Pure functions only: callers may invoke this
//! for every tracked face on every reverify tick.

use rand::Rng;

use crate::embeddings::KnownEmbedding;
use crate::identity::Identity;

/// Default acceptance threshold for the best similarity.
pub const DEFAULT_THRESHOLD: f32 = 0.46;
/// Absolute floor; no caller threshold can accept below this.
pub const SIMILARITY_FLOOR: f32 = 0.40;
/// At or above this similarity the top-1/top-2 margin rule is waived.
pub const AUTO_ACCEPT: f32 = 0.65;
/// Required gap between the best and second-best candidate.
pub const MARGIN: f32 = 0.08;
/// How far below `threshold` the previous frame may score and still corroborate.
pub const CORROBORATION_SLACK: f32 = 0.06;
/// Maximum similarity swing between previous and live frame for the same candidate.
pub const STABILITY_DELTA: f32 = 0.05;

/// Tolerance for float rounding when comparing against thresholds.
const EPSILON: f32 = 1e-6;

#[derive(Clone, Copy, Debug)]
pub struct MatchOptions<'a> {
    /// Minimum accepted similarity. The comparison is inclusive and tolerates
    /// 1e-6 of float rounding, so a best score of exactly `threshold` (or a
    /// hair below it) is accepted. `SIMILARITY_FLOOR` still applies.
    pub threshold: f32,
    /// Embedding seen for the same track on the previous frame.
    pub previous: Option<&'a [f32]>,
}

impl Default for MatchOptions<'_> {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            previous: None,
        }
    }
}

impl<'a> MatchOptions<'a> {
    pub fn with_threshold(threshold: f32) -> Self {
        Self {
            threshold,
            previous: None,
        }
    }

    pub fn corroborated_by(mut self, previous: &'a [f32]) -> Self {
        self.previous = Some(previous);
        self
    }
}

/// Result of a strict match. `confidence` is a similarity in `[0, 1]`, and is
/// zero whenever `identity` is unknown.
#[derive(Clone, Debug, PartialEq)]
pub struct MatchOutcome {
    pub identity: Identity,
    pub confidence: f32,
}

impl MatchOutcome {
    pub fn unknown() -> Self {
        Self {
            identity: Identity::Unknown,
            confidence: 0.0,
        }
    }
}

/// L2-normalize. Empty or non-finite input yields an empty vector; an all-zero
/// vector stays all-zero.
pub fn normalize(vector: &[f32]) -> Vec<f32> {
    if vector.is_empty() || vector.iter().any(|v| !v.is_finite()) {
        return Vec::new();
    }
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm <= f32::EPSILON {
        return vec![0.0; vector.len()];
    }
    vector.iter().map(|v| v / norm).collect()
}

/// Dot product of two pre-normalized vectors; 0 on dimension mismatch.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

struct Ranking {
    best_index: usize,
    best: f32,
    second: f32,
}

fn rank(query: &[f32], known: &[KnownEmbedding]) -> Option<Ranking> {
    let mut best_index = None;
    let mut best = f32::NEG_INFINITY;
    let mut second = f32::NEG_INFINITY;
    for (index, candidate) in known.iter().enumerate() {
        let similarity = cosine(query, candidate.embedding());
        if best_index.is_none() || similarity > best {
            second = best;
            best = similarity;
            best_index = Some(index);
        } else if similarity > second {
            second = similarity;
        }
    }
    best_index.map(|best_index| Ranking {
        best_index,
        best,
        second,
    })
}

/// Decide whether `live` belongs to a known user.
pub fn strict_match(live: &[f32], known: &[KnownEmbedding], options: &MatchOptions<'_>) -> MatchOutcome {
    let query = normalize(live);
    if query.is_empty() || known.is_empty() {
        return MatchOutcome::unknown();
    }
    let Some(ranking) = rank(&query, known) else {
        return MatchOutcome::unknown();
    };

    let best = ranking.best;
    let strong_enough =
        best + EPSILON >= options.threshold && best + EPSILON >= SIMILARITY_FLOOR;
    let margin_ok = best >= AUTO_ACCEPT || best - ranking.second.max(0.0) + EPSILON >= MARGIN;
    if !strong_enough || !margin_ok {
        return MatchOutcome::unknown();
    }

    if let Some(previous) = options.previous {
        let previous = normalize(previous);
        if !previous.is_empty()
            && !corroborates(&previous, known, ranking.best_index, best, options.threshold)
        {
            log::debug!(
                "strict match: previous frame disagrees with candidate (sim {:.3})",
                best
            );
            return MatchOutcome::unknown();
        }
    }

    MatchOutcome {
        identity: Identity::Known(known[ranking.best_index].name().to_string()),
        confidence: best.clamp(0.0, 1.0),
    }
}

/// The previous embedding must pick the same candidate, clear a relaxed
/// threshold on its own, and stay within `STABILITY_DELTA` of the live score.
fn corroborates(
    previous: &[f32],
    known: &[KnownEmbedding],
    candidate: usize,
    live_similarity: f32,
    threshold: f32,
) -> bool {
    let Some(prev_ranking) = rank(previous, known) else {
        return false;
    };
    if prev_ranking.best_index != candidate {
        return false;
    }
    let relaxed = (threshold - CORROBORATION_SLACK).max(SIMILARITY_FLOOR);
    let previous_similarity = prev_ranking.best;
    previous_similarity + EPSILON >= relaxed
        && (live_similarity - previous_similarity).abs() <= STABILITY_DELTA + EPSILON
}

// ----------------------------------------------------------------------------
// Synthetic accuracy simulation
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SimulationReport {
    pub true_positives: usize,
    pub false_negatives: usize,
    pub false_positives: usize,
    pub true_negatives: usize,
}

impl SimulationReport {
    pub fn total(&self) -> usize {
        self.true_positives + self.false_negatives + self.false_positives + self.true_negatives
    }

    pub fn precision(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_positives)
    }

    pub fn recall(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_negatives)
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.true_positives + self.true_negatives, self.total())
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    numerator as f64 / denominator.max(1) as f64
}

pub fn random_unit_vector<R: Rng>(rng: &mut R, dim: usize) -> Vec<f32> {
    let raw: Vec<f32> = (0..dim).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
    normalize(&raw)
}

/// Register `known` random users, then query with each of them plus
/// `strangers` fresh random vectors.
pub fn simulate_accuracy<R: Rng>(
    rng: &mut R,
    dim: usize,
    known: usize,
    strangers: usize,
    threshold: f32,
) -> SimulationReport {
    let registered: Vec<KnownEmbedding> = (0..known)
        .filter_map(|i| KnownEmbedding::new(format!("user-{i}"), &random_unit_vector(rng, dim)))
        .collect();
    let options = MatchOptions::with_threshold(threshold);
    let mut report = SimulationReport::default();

    for user in &registered {
        let outcome = strict_match(user.embedding(), &registered, &options);
        if outcome.identity.name() == Some(user.name()) {
            report.true_positives += 1;
        } else {
            report.false_negatives += 1;
        }
    }
    for _ in 0..strangers {
        let query = random_unit_vector(rng, dim);
        if strict_match(&query, &registered, &options).identity.is_known() {
            report.false_positives += 1;
        } else {
            report.true_negatives += 1;
        }
    }
    report
}
