//! Credibility aggregation.

use crate::config::ScoreWeights;
use crate::models::{ScoreField, SubScores};

/// Weighted mean of the available sub-scores, rounded and clamped to 0..=100.
///
/// Missing sub-scores are excluded and the remaining weights renormalized,
/// so a tip is not penalized for omitting optional evidence. With no
/// usable sub-score at all the result is 0.
pub fn aggregate(scores: &SubScores, weights: &ScoreWeights) -> u8 {
    let mut weighted = 0.0;
    let mut total_weight = 0.0;
    for field in ScoreField::ALL {
        if let Some(score) = scores.get(field) {
            let weight = weights.weight(field);
            weighted += weight * f64::from(score);
            total_weight += weight;
        }
    }
    if total_weight <= f64::EPSILON {
        return 0;
    }
    (weighted / total_weight).round().clamp(0.0, 100.0) as u8
}
