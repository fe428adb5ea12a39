//! # Signal Extractors
//!
//! Six independent scorers. Each one is a pure function of the tip and a
//! read-only [`SignalContext`]; none observes another's output. A scorer
//! returns `None` when its evidence is absent so the aggregator can drop it
//! instead of counting it as zero.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};

use crate::config::EngineConfig;
use crate::models::{
    CaseRiskProfile, GeoPoint, HoaxIndicator, ScoreField, Sighting, SubScores, Tip, TipsterProfile,
};

/// Read-only inputs shared by every extractor for one tip.
#[derive(Debug, Clone, Copy)]
pub struct SignalContext<'a> {
    pub config: &'a EngineConfig,
    pub case: &'a CaseRiskProfile,
    pub profile: &'a TipsterProfile,
    /// Earlier tips for the same case, oldest first
    pub case_tips: &'a [Tip],
    pub verified_sightings: &'a [Sighting],
}

/// A single extractor result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignalOutput {
    pub score: Option<u8>,
    pub indicators: Vec<HoaxIndicator>,
}

impl SignalOutput {
    fn absent() -> Self {
        Self::default()
    }

    fn scored(score: f64) -> Self {
        Self {
            score: Some(clamp_score(score)),
            indicators: Vec::new(),
        }
    }

    fn flag(mut self, indicator: HoaxIndicator) -> Self {
        if !self.indicators.contains(&indicator) {
            self.indicators.push(indicator);
        }
        self
    }
}

/// Fan-in of all six extractors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub scores: SubScores,
    pub indicators: BTreeSet<HoaxIndicator>,
}

fn clamp_score(raw: f64) -> u8 {
    raw.round().clamp(0.0, 100.0) as u8
}

fn hours_between(a: DateTime<Utc>, b: DateTime<Utc>) -> f64 {
    (b - a).num_seconds() as f64 / 3600.0
}

/// Implied travel speed in km/h between two observations, if it can be computed.
fn implied_speed_kmh(from: (GeoPoint, DateTime<Utc>), to: (GeoPoint, DateTime<Utc>)) -> Option<f64> {
    let km = from.0.distance_m(&to.0) / 1000.0;
    let hours = hours_between(from.1, to.1).abs();
    if hours <= f64::EPSILON {
        // Same instant: only co-located observations are possible.
        return Some(if km < 0.5 { 0.0 } else { f64::INFINITY });
    }
    Some(km / hours)
}

/// Runs every extractor and merges their outputs.
///
/// The extractors are CPU-light and never await, so `join!` interleaves
/// them on the calling task rather than running them in parallel.
pub async fn extract(tip: &Tip, ctx: &SignalContext<'_>) -> Extraction {
    let (photo, location, time, text, cross, tipster) = tokio::join!(
        async { photo_authenticity(tip, ctx) },
        async { location_plausibility(tip, ctx) },
        async { time_plausibility(tip, ctx) },
        async { text_analysis(tip, ctx) },
        async { cross_reference(tip, ctx) },
        async { tipster_reliability(tip, ctx) },
    );

    let mut extraction = Extraction::default();
    let results = [
        (ScoreField::Photo, photo),
        (ScoreField::Location, location),
        (ScoreField::TimePlausibility, time),
        (ScoreField::TextAnalysis, text),
        (ScoreField::CrossReference, cross),
        (ScoreField::TipsterReliability, tipster),
    ];
    for (field, output) in results {
        extraction.scores.set(field, output.score);
        extraction.indicators.extend(output.indicators);
    }
    extraction
}

pub fn photo_authenticity(tip: &Tip, ctx: &SignalContext<'_>) -> SignalOutput {
    if tip.photos.is_empty() {
        return SignalOutput::absent();
    }
    let config = &ctx.config.photos;
    let skew = Duration::minutes(ctx.config.intake.clock_skew_minutes);
    let mut indicators = Vec::new();
    let mut total = 0.0;

    for photo in &tip.photos {
        let known_stock = photo
            .sha256
            .as_deref()
            .is_some_and(|h| config.stock_hashes.iter().any(|s| s.eq_ignore_ascii_case(h)));
        if known_stock {
            indicators.push(HoaxIndicator::StockPhotoDetected);
            total += 5.0;
            continue;
        }

        let Some(meta) = &photo.metadata else {
            // Stripped metadata is common for messaging apps, mildly suspicious at most.
            total += 45.0;
            continue;
        };

        let generated = meta.software.as_deref().is_some_and(|sw| {
            let sw = sw.to_lowercase();
            config.generator_markers.iter().any(|m| sw.contains(m.as_str()))
        });
        if generated {
            indicators.push(HoaxIndicator::AiGeneratedContent);
            total += 10.0;
            continue;
        }

        let mut score: f64 = 55.0;
        if let Some(captured) = meta.captured_at {
            if captured > tip.submitted_at + skew {
                indicators.push(HoaxIndicator::SuspiciousMetadata);
                score -= 30.0;
            } else if tip
                .sighted_at
                .is_some_and(|seen| hours_between(captured, seen).abs() <= 2.0)
            {
                score += 25.0;
            } else {
                score += 10.0;
            }
        }
        if let Some(photo_point) = meta.point {
            score += 15.0;
            if let Some(stated) = tip.point() {
                if photo_point.distance_m(&stated) / 1000.0 > ctx.config.location.conflict_km {
                    indicators.push(HoaxIndicator::ConflictingLocation);
                    score -= 40.0;
                }
            }
        }
        total += score.clamp(0.0, 100.0);
    }

    let mut output = SignalOutput::scored(total / tip.photos.len() as f64);
    for indicator in indicators {
        output = output.flag(indicator);
    }
    output
}

pub fn location_plausibility(tip: &Tip, ctx: &SignalContext<'_>) -> SignalOutput {
    let Some(location) = &tip.location else {
        return SignalOutput::absent();
    };
    let Some(point) = location.point else {
        return match &location.description {
            Some(text) if !text.trim().is_empty() => SignalOutput::scored(40.0),
            _ => SignalOutput::absent(),
        };
    };

    let anchor = ctx.case.last_seen.and_then(|seen| seen.point);
    let Some(anchor) = anchor else {
        return SignalOutput::scored(60.0);
    };

    let config = &ctx.config.location;
    let km = point.distance_m(&anchor) / 1000.0;
    let score = if km <= config.near_km {
        100.0
    } else if km >= config.far_km {
        20.0
    } else {
        let span = config.far_km - config.near_km;
        100.0 - 80.0 * (km - config.near_km) / span
    };
    SignalOutput::scored(score)
}

pub fn time_plausibility(tip: &Tip, ctx: &SignalContext<'_>) -> SignalOutput {
    let Some(sighted) = tip.sighted_at else {
        return SignalOutput::absent();
    };

    if let Some(seen) = ctx.case.last_seen {
        if sighted < seen.at {
            // Before the disappearance: true perhaps, but not actionable.
            return SignalOutput::scored(20.0);
        }
        if let (Some(from), Some(to)) = (seen.point, tip.point()) {
            let speed = implied_speed_kmh((from, seen.at), (to, sighted));
            if speed.is_some_and(|kmh| kmh > ctx.config.location.max_travel_kmh) {
                return SignalOutput::scored(5.0).flag(HoaxIndicator::ImpossibleTimeline);
            }
        }
    }

    let age_hours = hours_between(sighted, tip.submitted_at).max(0.0);
    let score = match age_hours {
        h if h <= 24.0 => 100.0,
        h if h <= 72.0 => 80.0,
        h if h <= 7.0 * 24.0 => 60.0,
        h if h <= 30.0 * 24.0 => 40.0,
        _ => 20.0,
    };
    SignalOutput::scored(score)
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

fn looks_like_spam(content: &str, lowered: &str, markers: &[String]) -> bool {
    if markers.iter().any(|m| lowered.contains(m.as_str())) {
        return true;
    }
    let letters: Vec<char> = content.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.len() >= 20 {
        let upper = letters.iter().filter(|c| c.is_uppercase()).count();
        if upper * 10 > letters.len() * 6 {
            return true;
        }
    }
    let mut run = 1;
    let mut prev = None;
    for c in content.chars() {
        if Some(c) == prev && !c.is_whitespace() {
            run += 1;
            if run >= 6 {
                return true;
            }
        } else {
            run = 1;
        }
        prev = Some(c);
    }
    false
}

pub fn text_analysis(tip: &Tip, ctx: &SignalContext<'_>) -> SignalOutput {
    let config = &ctx.config.text;
    let lowered = tip.content.to_lowercase();
    let words: Vec<String> = tokens(&tip.content).collect();

    let mut score = 40.0;
    score += (words.len().min(60) as f64 / 60.0) * 30.0;
    if words.len() < config.min_detail_words {
        score -= 15.0;
    }
    if tip.content.chars().any(|c| c.is_ascii_digit()) {
        score += 10.0;
    }
    let descriptive = config
        .descriptive_terms
        .iter()
        .filter(|term| words.iter().any(|w| w == *term))
        .count();
    score += (descriptive as f64 * 3.0).min(20.0);

    let mut indicators = Vec::new();
    if config.scam_phrases.iter().any(|p| lowered.contains(p.as_str())) {
        indicators.push(HoaxIndicator::KnownScamPattern);
        score -= 40.0;
    }
    if looks_like_spam(&tip.content, &lowered, &config.spam_markers) {
        indicators.push(HoaxIndicator::SpamSignature);
        score -= 30.0;
    }
    if config.ai_phrases.iter().any(|p| lowered.contains(p.as_str())) {
        indicators.push(HoaxIndicator::AiGeneratedContent);
        score -= 25.0;
    }

    let mut output = SignalOutput::scored(score);
    for indicator in indicators {
        output = output.flag(indicator);
    }
    output
}

pub fn cross_reference(tip: &Tip, ctx: &SignalContext<'_>) -> SignalOutput {
    let config = &ctx.config.location;
    let others: Vec<&Tip> = ctx
        .case_tips
        .iter()
        .filter(|other| other.id != tip.id && other.tipster != tip.tipster)
        .collect();
    if others.is_empty() && ctx.verified_sightings.is_empty() {
        return SignalOutput::absent();
    }

    let observed = tip.observed_at();
    let point = tip.point();
    let window = config.corroboration_window_minutes as f64 / 60.0;

    // A confirmed sighting that this tip could not physically agree with.
    if let Some(here) = point {
        for sighting in ctx.verified_sightings {
            let Some(there) = sighting.point else { continue };
            let speed = implied_speed_kmh((there, sighting.at), (here, observed));
            if speed.is_some_and(|kmh| kmh > config.max_travel_kmh) {
                return SignalOutput::scored(10.0).flag(HoaxIndicator::ConflictingLocation);
            }
        }
    }

    let near = |other: Option<GeoPoint>| match (point, other) {
        (Some(a), Some(b)) => a.distance_m(&b) / 1000.0 <= config.corroboration_radius_km,
        _ => true,
    };

    let corroborating = others
        .iter()
        .filter(|other| hours_between(other.observed_at(), observed).abs() <= window)
        .filter(|other| near(other.point()))
        .count();
    let confirmed = ctx
        .verified_sightings
        .iter()
        .any(|s| hours_between(s.at, observed).abs() <= window * 2.0 && near(s.point));

    let mut score = 40.0 + 15.0 * corroborating.min(4) as f64;
    if confirmed {
        score += 20.0;
    }
    SignalOutput::scored(score)
}

pub fn tipster_reliability(_tip: &Tip, ctx: &SignalContext<'_>) -> SignalOutput {
    SignalOutput::scored(ctx.profile.reliability_score)
}
