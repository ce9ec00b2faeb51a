//! Similarity scoring between a live scan and enrolled templates
//!
//! Scoring is pure: no I/O, no shared state, no allocation. Work per call is
//! bounded by `FEATURE_DIM`, so a matcher can run inside the login path
//! without risking the prompt timeout.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scan::Scan;
use crate::template::Template;
use crate::types::{Finger, TemplateId};

/// Normalized similarity in [0.0, 1.0], higher is more similar
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Score(f64);

impl Score {
    pub const MIN: Score = Score(0.0);
    pub const MAX: Score = Score(1.0);

    /// Create a score, clamping into range. NaN becomes 0.0.
    pub fn new(value: f64) -> Self {
        if value.is_nan() {
            return Self::MIN;
        }
        Self(value.clamp(0.0, 1.0))
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

impl PartialEq for Score {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}", self.0)
    }
}

/// Scores a scan against one template
///
/// Implementations must be deterministic and side-effect free.
pub trait Matcher: Send + Sync {
    fn score(&self, scan: &Scan, template: &Template) -> Score;
}

/// Cosine similarity over the feature vectors
///
/// Negative similarity and zero-norm vectors score 0.0.
#[derive(Debug, Clone, Copy, Default)]
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn score(&self, scan: &Scan, template: &Template) -> Score {
        let a = scan.features().as_slice();
        let b = template.features().as_slice();

        let mut dot = 0.0f64;
        let mut norm_a = 0.0f64;
        let mut norm_b = 0.0f64;
        for (&x, &y) in a.iter().zip(b.iter()) {
            let (x, y) = (f64::from(x), f64::from(y));
            dot += x * y;
            norm_a += x * x;
            norm_b += y * y;
        }

        if norm_a == 0.0 || norm_b == 0.0 {
            return Score::MIN;
        }

        Score::new(dot / (norm_a.sqrt() * norm_b.sqrt()))
    }
}

/// The best-scoring template of an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub template_id: TemplateId,
    pub finger: Finger,
    pub enrolled_at: DateTime<Utc>,
    pub score: Score,
}

impl Candidate {
    fn from_scored(template: &Template, score: Score) -> Self {
        Self {
            template_id: template.id(),
            finger: template.finger(),
            enrolled_at: template.enrolled_at(),
            score,
        }
    }

    /// Rank order: score, then most recent enrollment, then lowest ID
    fn rank(&self, other: &Self) -> Ordering {
        self.score
            .cmp(&other.score)
            .then(self.enrolled_at.cmp(&other.enrolled_at))
            .then(other.template_id.cmp(&self.template_id))
    }
}

/// Pick the best candidate from scored templates
///
/// Ties on score prefer the most recently enrolled template, then the
/// lowest template ID, so the same inputs always select the same template.
pub fn select_best<'a, I>(scored: I) -> Option<Candidate>
where
    I: IntoIterator<Item = (&'a Template, Score)>,
{
    scored
        .into_iter()
        .map(|(template, score)| Candidate::from_scored(template, score))
        .max_by(|a, b| a.rank(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::FeatureVector;
    use crate::types::UserId;
    use crate::FEATURE_DIM;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn unit(index: usize) -> Vec<f32> {
        let mut v = vec![0.0; FEATURE_DIM];
        v[index] = 1.0;
        v
    }

    fn template_with(id: u128, values: Vec<f32>, enrolled_secs: i64) -> Template {
        Template::from_parts(
            TemplateId::from_uuid(Uuid::from_u128(id)),
            UserId::new("alice").unwrap(),
            Finger::RightIndexFinger,
            FeatureVector::new(values).unwrap(),
            Utc.timestamp_opt(enrolled_secs, 0).unwrap(),
        )
    }

    fn scan_with(values: Vec<f32>) -> Scan {
        Scan::new(FeatureVector::new(values).unwrap(), Utc::now())
    }

    #[test]
    fn test_score_clamps() {
        assert_eq!(Score::new(1.5), Score::MAX);
        assert_eq!(Score::new(-0.2), Score::MIN);
        assert_eq!(Score::new(f64::NAN), Score::MIN);
        assert_eq!(Score::new(0.42).value(), 0.42);
    }

    #[test]
    fn test_identical_vectors_score_one() {
        let template = template_with(1, unit(3), 0);
        let score = CosineMatcher.score(&scan_with(unit(3)), &template);
        assert!((score.value() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_orthogonal_and_opposite_score_zero() {
        let template = template_with(1, unit(0), 0);
        assert_eq!(CosineMatcher.score(&scan_with(unit(1)), &template), Score::MIN);

        let mut opposite = unit(0);
        opposite[0] = -1.0;
        assert_eq!(CosineMatcher.score(&scan_with(opposite), &template), Score::MIN);
    }

    #[test]
    fn test_zero_vector_scores_zero() {
        let template = template_with(1, unit(0), 0);
        let score = CosineMatcher.score(&scan_with(vec![0.0; FEATURE_DIM]), &template);
        assert_eq!(score, Score::MIN);
    }

    #[test]
    fn test_select_best_prefers_highest_score() {
        let low = template_with(1, unit(0), 100);
        let high = template_with(2, unit(1), 0);
        let best = select_best([(&low, Score::new(0.4)), (&high, Score::new(0.9))]).unwrap();
        assert_eq!(best.template_id, high.id());
    }

    #[test]
    fn test_select_best_tie_prefers_recent_enrollment() {
        let older = template_with(1, unit(0), 100);
        let newer = template_with(2, unit(1), 200);
        let best = select_best([(&newer, Score::new(0.9)), (&older, Score::new(0.9))]).unwrap();
        assert_eq!(best.template_id, newer.id());

        // Order of input does not matter
        let best = select_best([(&older, Score::new(0.9)), (&newer, Score::new(0.9))]).unwrap();
        assert_eq!(best.template_id, newer.id());
    }

    #[test]
    fn test_select_best_full_tie_prefers_lowest_id() {
        let a = template_with(7, unit(0), 100);
        let b = template_with(3, unit(1), 100);
        let best = select_best([(&a, Score::new(0.5)), (&b, Score::new(0.5))]).unwrap();
        assert_eq!(best.template_id, b.id());
    }

    #[test]
    fn test_select_best_empty() {
        assert!(select_best(std::iter::empty()).is_none());
    }
}
