//! # Engine Configuration
//!
//! Every weight, threshold and SLA used by the engine lives here. The binary
//! layers file and environment overrides on top of these defaults.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::ScoreField;

const WEIGHT_SUM_TOLERANCE: f64 = 0.001;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub weights: ScoreWeights,
    pub duplicate: DuplicateConfig,
    pub classifier: ClassifierConfig,
    pub reputation: ReputationConfig,
    pub text: TextConfig,
    pub photos: PhotoConfig,
    pub location: LocationConfig,
    pub monitor: MonitorConfig,
    pub leads: LeadConfig,
    pub intake: IntakeConfig,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        self.weights.validate()?;
        self.classifier.validate()?;
        self.reputation.validate()?;
        if !(0.0..=1.0).contains(&self.duplicate.text_similarity) {
            return Err(AppError::Validation(
                "duplicate.text_similarity must be within [0, 1]".into(),
            ));
        }
        if self.leads.max_attempts == 0 {
            return Err(AppError::Validation("leads.max_attempts must be at least 1".into()));
        }
        Ok(())
    }
}

/// Per-subscore weights for the credibility aggregate. Must sum to 1.0.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub photo: f64,
    pub location: f64,
    pub time_plausibility: f64,
    pub text_analysis: f64,
    pub cross_reference: f64,
    pub tipster_reliability: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        let equal = 1.0 / 6.0;
        Self {
            photo: equal,
            location: equal,
            time_plausibility: equal,
            text_analysis: equal,
            cross_reference: equal,
            tipster_reliability: equal,
        }
    }
}

impl ScoreWeights {
    pub fn weight(&self, field: ScoreField) -> f64 {
        match field {
            ScoreField::Photo => self.photo,
            ScoreField::Location => self.location,
            ScoreField::TimePlausibility => self.time_plausibility,
            ScoreField::TextAnalysis => self.text_analysis,
            ScoreField::CrossReference => self.cross_reference,
            ScoreField::TipsterReliability => self.tipster_reliability,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let mut sum = 0.0;
        for field in ScoreField::ALL {
            let w = self.weight(field);
            if !(0.0..=1.0).contains(&w) {
                return Err(AppError::Validation(format!(
                    "weight for {field:?} must be within [0, 1], got {w}"
                )));
            }
            sum += w;
        }
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(AppError::Validation(format!("weights must sum to 1.0, got {sum:.4}")));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DuplicateConfig {
    /// Minimum token-set Jaccard similarity
    pub text_similarity: f64,
    pub max_distance_m: f64,
    pub time_window_minutes: i64,
    /// How many recent tips per case are compared against
    pub lookback: usize,
}

impl Default for DuplicateConfig {
    fn default() -> Self {
        Self {
            text_similarity: 0.8,
            max_distance_m: 100.0,
            time_window_minutes: 30,
            lookback: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub critical_threshold: u8,
    pub high_threshold: u8,
    pub standard_threshold: u8,
    pub critical_sla_minutes: i64,
    pub high_sla_minutes: i64,
    pub standard_sla_minutes: i64,
    pub low_sla_minutes: i64,
    /// Subtracted from non-critical SLAs for short-window cases
    pub urgency_discount_minutes: i64,
    pub sla_floor_minutes: i64,
    /// A response window at or below this makes the case high risk
    pub critical_window_minutes: i64,
    /// A response window at or below this earns the urgency discount
    pub short_window_minutes: i64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            critical_threshold: 80,
            high_threshold: 60,
            standard_threshold: 30,
            critical_sla_minutes: 60,
            high_sla_minutes: 6 * 60,
            standard_sla_minutes: 24 * 60,
            low_sla_minutes: 72 * 60,
            urgency_discount_minutes: 60,
            sla_floor_minutes: 15,
            critical_window_minutes: 24 * 60,
            short_window_minutes: 6 * 60,
        }
    }
}

impl ClassifierConfig {
    fn validate(&self) -> Result<()> {
        let ordered = self.critical_threshold <= 100
            && self.high_threshold <= self.critical_threshold
            && self.standard_threshold <= self.high_threshold;
        if !ordered {
            return Err(AppError::Validation(
                "classifier thresholds must satisfy standard <= high <= critical <= 100".into(),
            ));
        }
        let slas = [
            self.critical_sla_minutes,
            self.high_sla_minutes,
            self.standard_sla_minutes,
            self.low_sla_minutes,
        ];
        if slas.iter().any(|m| *m < self.sla_floor_minutes) || self.sla_floor_minutes <= 0 {
            return Err(AppError::Validation(
                "every SLA must be positive and at least the SLA floor".into(),
            ));
        }
        if self.urgency_discount_minutes < 0 {
            return Err(AppError::Validation("urgency discount cannot be negative".into()));
        }
        Ok(())
    }

    pub fn sla_floor(&self) -> Duration {
        Duration::minutes(self.sla_floor_minutes)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReputationConfig {
    pub initial_score: f64,
    pub verified_increment: f64,
    pub rejected_penalty: f64,
    /// Share of the increment applied for a partial verification
    pub partial_factor: f64,
    pub resolution_bonus: f64,
    /// Increment multiplier when the case was high risk
    pub severity_multiplier: f64,
    /// Hard cap on a single score movement
    pub max_step: f64,
    pub moderate_threshold: f64,
    pub high_threshold: f64,
    pub verified_source_threshold: f64,
    /// How far below a tier's lower boundary the score must fall before demotion
    pub hysteresis: f64,
    pub min_reviewed_tips: u32,
    /// Number of most recent tips that must be free of unresolved hoax flags
    pub verified_source_window: usize,
    pub verified_source_min_verified: u32,
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            initial_score: 50.0,
            verified_increment: 8.0,
            rejected_penalty: 10.0,
            partial_factor: 0.5,
            resolution_bonus: 5.0,
            severity_multiplier: 1.5,
            max_step: 15.0,
            moderate_threshold: 40.0,
            high_threshold: 70.0,
            verified_source_threshold: 90.0,
            hysteresis: 5.0,
            min_reviewed_tips: 3,
            verified_source_window: 10,
            verified_source_min_verified: 5,
        }
    }
}

impl ReputationConfig {
    fn validate(&self) -> Result<()> {
        let ordered = 0.0 <= self.moderate_threshold
            && self.moderate_threshold < self.high_threshold
            && self.high_threshold < self.verified_source_threshold
            && self.verified_source_threshold <= 100.0;
        if !ordered {
            return Err(AppError::Validation(
                "tier thresholds must be strictly increasing within [0, 100]".into(),
            ));
        }
        if self.hysteresis < 0.0 || self.max_step <= 0.0 {
            return Err(AppError::Validation(
                "hysteresis must be non-negative and max_step positive".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TextConfig {
    /// Below this many words a tip is considered vague
    pub min_detail_words: usize,
    pub scam_phrases: Vec<String>,
    pub spam_markers: Vec<String>,
    pub ai_phrases: Vec<String>,
    /// Words that indicate a concrete physical description
    pub descriptive_terms: Vec<String>,
    pub max_tips_per_hour: usize,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            min_detail_words: 12,
            scam_phrases: strings(&[
                "wire the reward",
                "send money",
                "gift card",
                "bitcoin",
                "western union",
                "pay me first",
                "reward upfront",
                "ransom",
            ]),
            spam_markers: strings(&["http://", "https://", "www.", "click here", "buy now", "free followers"]),
            ai_phrases: strings(&[
                "as an ai language model",
                "i cannot browse",
                "as a large language model",
                "i hope this helps",
            ]),
            descriptive_terms: strings(&[
                "wearing", "shirt", "jacket", "hoodie", "jeans", "shoes", "backpack", "hair",
                "hat", "glasses", "tall", "short", "car", "truck", "van", "plate", "license",
                "red", "blue", "green", "black", "white", "grey", "gray", "yellow",
            ]),
            max_tips_per_hour: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhotoConfig {
    /// Hex SHA-256 digests of known stock or previously debunked images
    pub stock_hashes: Vec<String>,
    /// Substrings of image software tags that indicate generated content
    pub generator_markers: Vec<String>,
}

impl Default for PhotoConfig {
    fn default() -> Self {
        Self {
            stock_hashes: Vec::new(),
            generator_markers: strings(&["midjourney", "stable diffusion", "dall-e", "dall·e", "firefly"]),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    /// Faster implied travel than this is physically implausible
    pub max_travel_kmh: f64,
    pub near_km: f64,
    pub far_km: f64,
    /// Photo GPS this far from the stated location is a conflict
    pub conflict_km: f64,
    pub corroboration_radius_km: f64,
    pub corroboration_window_minutes: i64,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            max_travel_kmh: 150.0,
            near_km: 5.0,
            far_km: 500.0,
            conflict_km: 50.0,
            corroboration_radius_km: 2.0,
            corroboration_window_minutes: 6 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub sweep_interval_secs: u64,
    pub claim_timeout_minutes: i64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 30,
            claim_timeout_minutes: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LeadConfig {
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
}

impl Default for LeadConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_backoff_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeConfig {
    pub max_content_chars: usize,
    pub max_photos: usize,
    pub max_notes_chars: usize,
    /// Tolerated clock skew between sighting and submission
    pub clock_skew_minutes: i64,
    pub case_lookup_timeout_ms: u64,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            max_content_chars: 10_000,
            max_photos: 20,
            max_notes_chars: 5_000,
            clock_skew_minutes: 5,
            case_lookup_timeout_ms: 2_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        EngineConfig::default().validate().expect("defaults must validate");
    }

    #[test]
    fn rejects_weights_not_summing_to_one() {
        let mut config = EngineConfig::default();
        config.weights.photo = 0.9;
        assert!(matches!(config.validate(), Err(AppError::Validation(_))));
    }

    #[test]
    fn rejects_out_of_range_weight() {
        let mut config = EngineConfig::default();
        config.weights.photo = -0.1;
        config.weights.location += 0.1 + 1.0 / 6.0;
        assert!(matches!(config.weights.validate(), Err(AppError::Validation(_))));
    }

    #[test]
    fn rejects_inverted_thresholds() {
        let mut config = EngineConfig::default();
        config.classifier.high_threshold = 90;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.reputation.high_threshold = 95.0;
        assert!(config.validate().is_err());
    }
}
