// Content-strategy draws for the personality posting loop.
//
// Pure value computations over an explicit random source, so tests seed an
// StdRng and get reproducible picks.

use rand::Rng;

use magpie_common::{Trend, TrendKind};

/// Tuning knobs for the posting persona.
#[derive(Debug, Clone, Copy)]
pub struct StrategyWeights {
    /// Probability of riffing on a researched trend instead of free-forming.
    pub trend_focus: f64,
    /// Probability of a savage tone over a merely witty one.
    pub sass_level: f64,
}

impl Default for StrategyWeights {
    fn default() -> Self {
        Self {
            trend_focus: 0.7,
            sass_level: 0.8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentStrategy {
    TrendFocus,
    FreeForm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyTone {
    Savage,
    Witty,
}

impl ReplyTone {
    pub fn as_str(self) -> &'static str {
        match self {
            ReplyTone::Savage => "savage",
            ReplyTone::Witty => "witty",
        }
    }
}

pub fn pick_strategy<R: Rng + ?Sized>(weights: &StrategyWeights, rng: &mut R) -> ContentStrategy {
    if rng.random_range(0.0..1.0) < weights.trend_focus {
        ContentStrategy::TrendFocus
    } else {
        ContentStrategy::FreeForm
    }
}

pub fn pick_tone<R: Rng + ?Sized>(weights: &StrategyWeights, rng: &mut R) -> ReplyTone {
    if rng.random_range(0.0..1.0) < weights.sass_level {
        ReplyTone::Savage
    } else {
        ReplyTone::Witty
    }
}

/// Weighted trend selection: weight = count, boosted ×1.2 for hashtags and
/// ×1.5 for topic phrases, then a cumulative-distribution draw.
pub fn pick_weighted_trend<'a, R: Rng + ?Sized>(
    trends: &'a [Trend],
    rng: &mut R,
) -> Option<&'a Trend> {
    if trends.is_empty() {
        return None;
    }

    let weights: Vec<f64> = trends.iter().map(trend_weight).collect();
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return trends.first();
    }

    let draw = rng.random_range(0.0..total);
    let mut cumulative = 0.0;
    for (trend, weight) in trends.iter().zip(&weights) {
        cumulative += weight;
        if cumulative > draw {
            return Some(trend);
        }
    }
    trends.first()
}

fn trend_weight(trend: &Trend) -> f64 {
    let base = trend.count as f64;
    match trend.kind {
        TrendKind::Hashtag => base * 1.2,
        TrendKind::Topic => base * 1.5,
        TrendKind::Keyword => base,
    }
}
