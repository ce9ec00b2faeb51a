//! Match threshold policy

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::matcher::{Candidate, Score};
use crate::outcome::Outcome;
use crate::{DEFAULT_INCONCLUSIVE_MARGIN, DEFAULT_MATCH_THRESHOLD};

/// Decides an outcome from the best candidate score
///
/// ```text
///   0.0 ........ threshold - margin ........ threshold ........ 1.0
///   |   NoMatch    |      Inconclusive        |     Matched      |
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchPolicy {
    pub threshold: f64,
    pub inconclusive_margin: f64,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_MATCH_THRESHOLD,
            inconclusive_margin: DEFAULT_INCONCLUSIVE_MARGIN,
        }
    }
}

impl MatchPolicy {
    /// Create a validated policy
    pub fn new(threshold: f64, inconclusive_margin: f64) -> Result<Self> {
        let policy = Self {
            threshold,
            inconclusive_margin,
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.threshold.is_finite() || self.threshold <= 0.0 || self.threshold > 1.0 {
            return Err(Error::InvalidPolicy(format!(
                "threshold must be in (0, 1], got {}",
                self.threshold
            )));
        }
        if !self.inconclusive_margin.is_finite()
            || self.inconclusive_margin < 0.0
            || self.inconclusive_margin >= self.threshold
        {
            return Err(Error::InvalidPolicy(format!(
                "margin must be in [0, threshold), got {}",
                self.inconclusive_margin
            )));
        }
        Ok(())
    }

    /// Lower edge of the inconclusive band
    pub fn inconclusive_floor(&self) -> f64 {
        self.threshold - self.inconclusive_margin
    }

    pub fn decide(&self, best: &Candidate) -> Outcome {
        let score: Score = best.score;
        if score.value() >= self.threshold {
            Outcome::Matched {
                template_id: best.template_id,
                score,
            }
        } else if self.inconclusive_margin > 0.0 && score.value() >= self.inconclusive_floor() {
            Outcome::Inconclusive { score }
        } else {
            Outcome::NoMatch { best: score }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Finger, TemplateId};
    use chrono::Utc;
    use uuid::Uuid;

    fn candidate(score: f64) -> Candidate {
        Candidate {
            template_id: TemplateId::from_uuid(Uuid::from_u128(42)),
            finger: Finger::RightIndexFinger,
            enrolled_at: Utc::now(),
            score: Score::new(score),
        }
    }

    #[test]
    fn test_default_policy_valid() {
        assert!(MatchPolicy::default().validate().is_ok());
    }

    #[test]
    fn test_policy_validation() {
        assert!(MatchPolicy::new(0.0, 0.0).is_err());
        assert!(MatchPolicy::new(1.2, 0.0).is_err());
        assert!(MatchPolicy::new(f64::NAN, 0.0).is_err());
        assert!(MatchPolicy::new(0.8, -0.1).is_err());
        assert!(MatchPolicy::new(0.8, 0.8).is_err());
        assert!(MatchPolicy::new(1.0, 0.0).is_ok());
    }

    #[test]
    fn test_decide_bands() {
        let policy = MatchPolicy::new(0.8, 0.05).unwrap();

        assert!(matches!(policy.decide(&candidate(0.95)), Outcome::Matched { .. }));
        assert!(matches!(policy.decide(&candidate(0.8)), Outcome::Matched { .. }));
        assert!(matches!(policy.decide(&candidate(0.77)), Outcome::Inconclusive { .. }));
        assert!(matches!(policy.decide(&candidate(0.3)), Outcome::NoMatch { .. }));
    }

    #[test]
    fn test_zero_margin_has_no_band() {
        let policy = MatchPolicy::new(0.8, 0.0).unwrap();
        assert!(matches!(policy.decide(&candidate(0.7999)), Outcome::NoMatch { .. }));
    }

    #[test]
    fn test_matched_carries_template() {
        let policy = MatchPolicy::default();
        match policy.decide(&candidate(0.9)) {
            Outcome::Matched { template_id, score } => {
                assert_eq!(template_id, TemplateId::from_uuid(Uuid::from_u128(42)));
                assert_eq!(score, Score::new(0.9));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}
