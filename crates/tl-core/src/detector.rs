//! # Duplicate & Hoax Detector
//!
//! Runs after aggregation. Duplicates are annotated, never dropped: a
//! near-identical tip from another source is weak corroboration.
//! Hoax rules are independent; each may add one indicator.

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Duration, Utc};

use crate::config::EngineConfig;
use crate::models::{HoaxIndicator, Tip, TipId, TipsterProfile};

fn token_set(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Jaccard similarity of the two texts' lowercase token sets.
pub fn text_similarity(a: &str, b: &str) -> f64 {
    let (a, b) = (token_set(a), token_set(b));
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let shared = a.intersection(&b).count();
    let union = a.len() + b.len() - shared;
    shared as f64 / union as f64
}

/// Returns the earliest prior tip for the same case that `tip` duplicates.
///
/// Only tips submitted before `tip` count as prior, ordered by submission
/// time and then id, so two matching tips never point at each other.
pub fn find_duplicate(tip: &Tip, priors: &[Tip], config: &EngineConfig) -> Option<TipId> {
    let rules = &config.duplicate;
    let window = Duration::minutes(rules.time_window_minutes);

    priors
        .iter()
        .filter(|prior| prior.case_id == tip.case_id)
        .filter(|prior| (prior.submitted_at, prior.id) < (tip.submitted_at, tip.id))
        .filter(|prior| tip.submitted_at - prior.submitted_at <= window)
        .filter(|prior| match (tip.point(), prior.point()) {
            (Some(a), Some(b)) => a.distance_m(&b) <= rules.max_distance_m,
            _ => true,
        })
        .filter(|prior| text_similarity(&tip.content, &prior.content) >= rules.text_similarity)
        .min_by_key(|prior| (prior.submitted_at, prior.id))
        .map(|prior| prior.id)
}

/// Merges extractor indicators with the profile-level hoax rules.
///
/// `profile` is the tipster's state before this tip is recorded.
pub fn hoax_indicators(
    extracted: &BTreeSet<HoaxIndicator>,
    profile: &TipsterProfile,
    config: &EngineConfig,
    now: DateTime<Utc>,
) -> BTreeSet<HoaxIndicator> {
    let mut indicators = extracted.clone();

    // Repeated false reports: at least three, and the majority of reviewed tips.
    if profile.false_tips >= 3 && profile.false_tips * 2 > profile.reviewed_tips {
        indicators.insert(HoaxIndicator::RepeatedFalseReports);
    }

    let hour_ago = now - Duration::hours(1);
    let last_hour = profile
        .recent_tips
        .iter()
        .filter(|recent| recent.submitted_at > hour_ago)
        .count();
    if last_hour + 1 > config.text.max_tips_per_hour {
        indicators.insert(HoaxIndicator::SpamSignature);
    }

    indicators
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        ContactKind, GeoPoint, RecentTip, TipLocation, TipsterContact, TipsterId,
    };
    use uuid::Uuid;

    fn tip_at(case_id: Uuid, content: &str, at: DateTime<Utc>, point: GeoPoint) -> Tip {
        Tip {
            id: Uuid::now_v7(),
            case_id,
            content: content.into(),
            location: Some(TipLocation {
                point: Some(point),
                description: None,
            }),
            sighted_at: None,
            photos: Vec::new(),
            is_anonymous: true,
            tipster: TipsterContact {
                kind: ContactKind::Anonymous,
                value: "anon-1".into(),
            },
            submitted_at: at,
        }
    }

    #[test]
    fn similarity_is_symmetric_and_bounded() {
        let a = "Girl in a red coat near the station";
        let b = "near the station, a girl in a red coat";
        assert_eq!(text_similarity(a, b), 1.0);
        let c = "Blue car heading north on highway";
        let s = text_similarity(a, c);
        assert!((0.0..0.2).contains(&s));
        assert_eq!(s, text_similarity(c, a));
    }

    #[test]
    fn identical_tip_within_window_and_radius_is_duplicate() {
        let config = EngineConfig::default();
        let case = Uuid::now_v7();
        let t0 = Utc::now();
        let first = tip_at(case, "Saw him at the park", t0, GeoPoint::new(48.8566, 2.3522));
        // ~50m north, 10 minutes later
        let second = tip_at(
            case,
            "Saw him at the park",
            t0 + Duration::minutes(10),
            GeoPoint::new(48.85705, 2.3522),
        );
        assert_eq!(find_duplicate(&second, &[first.clone()], &config), Some(first.id));
    }

    #[test]
    fn references_the_earliest_match() {
        let config = EngineConfig::default();
        let case = Uuid::now_v7();
        let t0 = Utc::now();
        let p = GeoPoint::new(48.8566, 2.3522);
        let a = tip_at(case, "same text here", t0, p);
        let b = tip_at(case, "same text here", t0 + Duration::minutes(2), p);
        let c = tip_at(case, "same text here", t0 + Duration::minutes(4), p);
        assert_eq!(find_duplicate(&c, &[b, a.clone()], &config), Some(a.id));
    }

    #[test]
    fn later_submissions_are_never_prior() {
        let config = EngineConfig::default();
        let case = Uuid::now_v7();
        let t0 = Utc::now();
        let p = GeoPoint::new(48.8566, 2.3522);
        let early = tip_at(case, "same text here", t0, p);
        let late = tip_at(case, "same text here", t0 + Duration::minutes(3), p);
        // Arrived out of order: the earlier submission sees only a later one.
        assert_eq!(find_duplicate(&early, &[late.clone()], &config), None);
        assert_eq!(find_duplicate(&late, &[early.clone()], &config), Some(early.id));

        // Same instant: the lower id is the original.
        let x = tip_at(case, "same text here", t0, p);
        let y = tip_at(case, "same text here", t0, p);
        let (a, b) = if x.id < y.id { (x, y) } else { (y, x) };
        assert_eq!(find_duplicate(&b, &[a.clone()], &config), Some(a.id));
        assert_eq!(find_duplicate(&a, &[b], &config), None);
    }

    #[test]
    fn far_apart_or_other_case_is_not_duplicate() {
        let config = EngineConfig::default();
        let case = Uuid::now_v7();
        let t0 = Utc::now();
        let first = tip_at(case, "Saw him at the park", t0, GeoPoint::new(48.8566, 2.3522));
        let far = tip_at(case, "Saw him at the park", t0, GeoPoint::new(48.8666, 2.3522));
        assert_eq!(find_duplicate(&far, &[first.clone()], &config), None);

        let other_case = tip_at(Uuid::now_v7(), "Saw him at the park", t0, GeoPoint::new(48.8566, 2.3522));
        assert_eq!(find_duplicate(&other_case, &[first.clone()], &config), None);

        let late = tip_at(case, "Saw him at the park", t0 + Duration::hours(2), GeoPoint::new(48.8566, 2.3522));
        assert_eq!(find_duplicate(&late, &[first], &config), None);
    }

    #[test]
    fn profile_rules_add_indicators() {
        let config = EngineConfig::default();
        let now = Utc::now();
        let mut profile = TipsterProfile::new(TipsterId("x".into()), 50.0, now);
        profile.reviewed_tips = 5;
        profile.false_tips = 4;
        for _ in 0..config.text.max_tips_per_hour {
            profile.recent_tips.push_back(RecentTip {
                tip_id: Uuid::now_v7(),
                submitted_at: now - Duration::minutes(5),
                hoax_flagged: false,
            });
        }
        let out = hoax_indicators(&BTreeSet::new(), &profile, &config, now);
        assert!(out.contains(&HoaxIndicator::RepeatedFalseReports));
        assert!(out.contains(&HoaxIndicator::SpamSignature));

        let clean = TipsterProfile::new(TipsterId("y".into()), 50.0, now);
        assert!(hoax_indicators(&BTreeSet::new(), &clean, &config, now).is_empty());
    }
}
