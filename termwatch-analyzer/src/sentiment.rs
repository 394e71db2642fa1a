//! Tone-shift estimation between document versions.

use async_trait::async_trait;

use crate::models::SentimentShift;

/// Estimates the tone shift between two versions of a document.
///
/// The shipped implementation reports a constant neutral signal; a
/// model-backed estimator can be substituted without changing the
/// aggregation contract.
#[async_trait]
pub trait ToneEstimator: Send + Sync {
    async fn estimate(&self, previous: &str, current: &str) -> SentimentShift;
}

/// Reports no tone change for any input pair.
pub struct NeutralToneEstimator;

#[async_trait]
impl ToneEstimator for NeutralToneEstimator {
    async fn estimate(&self, _previous: &str, _current: &str) -> SentimentShift {
        SentimentShift::no_change()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_neutral_estimator_is_constant() {
        let estimator = NeutralToneEstimator;

        let shift = estimator.estimate("strict rules apply", "rules are relaxed").await;

        assert_eq!(shift.previous_tone, "neutral");
        assert_eq!(shift.current_tone, "neutral");
        assert_eq!(shift.shift, "no_change");
        assert_eq!(shift.confidence, 0.5);
    }

    #[tokio::test]
    async fn test_neutral_estimator_ignores_empty_inputs() {
        let estimator = NeutralToneEstimator;

        let shift = estimator.estimate("", "").await;

        assert_eq!(shift.shift, "no_change");
    }
}
