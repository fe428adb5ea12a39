//! # Priority Classifier
//!
//! Pure, deterministic mapping from score, indicators and case risk to a
//! queue and SLA deadline. Re-running it on the same inputs always yields
//! the same result, which is what makes reprocessing after an override safe.
//!
//! Rules, first match wins:
//! 1. blocked tipster: `low_priority`
//! 2. score >= critical threshold, no hoax indicator, high-risk case: `critical`
//! 3. score >= high threshold: `high_priority`
//! 4. score >= standard threshold: `standard`
//! 5. otherwise: `low_priority`

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};

use crate::config::ClassifierConfig;
use crate::models::{CaseRiskProfile, HoaxIndicator, PriorityBucket, QueueType};

#[derive(Debug, Clone, Copy)]
pub struct ClassificationInput<'a> {
    pub credibility_score: u8,
    pub indicators: &'a BTreeSet<HoaxIndicator>,
    pub case: &'a CaseRiskProfile,
    pub tipster_blocked: bool,
    /// Queue item creation time; the SLA clock starts here
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub queue_type: QueueType,
    pub bucket: PriorityBucket,
    pub sla: Duration,
    pub sla_deadline: DateTime<Utc>,
}

pub fn is_high_risk(case: &CaseRiskProfile, config: &ClassifierConfig) -> bool {
    case.degraded
        || case.is_minor
        || case.suspected_abduction
        || case
            .response_window_minutes
            .is_some_and(|w| w <= config.critical_window_minutes)
}

fn has_short_window(case: &CaseRiskProfile, config: &ClassifierConfig) -> bool {
    !case.degraded
        && case
            .response_window_minutes
            .is_some_and(|w| w <= config.short_window_minutes)
}

fn base_sla(queue: QueueType, config: &ClassifierConfig) -> Duration {
    let minutes = match queue {
        QueueType::Critical => config.critical_sla_minutes,
        QueueType::HighPriority => config.high_sla_minutes,
        QueueType::Standard => config.standard_sla_minutes,
        QueueType::LowPriority => config.low_sla_minutes,
    };
    Duration::minutes(minutes)
}

pub fn classify(input: &ClassificationInput<'_>, config: &ClassifierConfig) -> Classification {
    let score = input.credibility_score;

    let queue_type = if input.tipster_blocked {
        QueueType::LowPriority
    } else if score >= config.critical_threshold
        && input.indicators.is_empty()
        && is_high_risk(input.case, config)
    {
        QueueType::Critical
    } else if score >= config.high_threshold {
        QueueType::HighPriority
    } else if score >= config.standard_threshold {
        QueueType::Standard
    } else {
        QueueType::LowPriority
    };

    let mut sla = base_sla(queue_type, config);
    if queue_type != QueueType::Critical && has_short_window(input.case, config) {
        sla = (sla - Duration::minutes(config.urgency_discount_minutes)).max(config.sla_floor());
    }

    Classification {
        queue_type,
        bucket: bucket_for(queue_type, input),
        sla,
        sla_deadline: input.created_at + sla,
    }
}

fn bucket_for(queue: QueueType, input: &ClassificationInput<'_>) -> PriorityBucket {
    let spammy = input.indicators.contains(&HoaxIndicator::SpamSignature)
        || input.indicators.contains(&HoaxIndicator::KnownScamPattern);
    if input.tipster_blocked || (spammy && queue == QueueType::LowPriority) {
        return PriorityBucket::Spam;
    }
    match queue {
        QueueType::Critical => PriorityBucket::Critical,
        QueueType::HighPriority => PriorityBucket::High,
        QueueType::Standard => PriorityBucket::Medium,
        QueueType::LowPriority => PriorityBucket::Low,
    }
}
