use serde::{Deserialize, Serialize};

use crate::{
    pillar::{clamp_score, round_to, Pillar, PillarSet, SubScores},
    weights::{ScoringWeights, WeightsError},
};

/// Sentinel driver emitted when no pillar qualifies.
pub const NORMAL_CONDITIONS: &str = "Normal conditions across all risk factors";

/// Scores at or below this floor contribute no drivers (policy excepted).
pub const DRIVER_FLOOR: f64 = 30.0;

/// Maximum number of drivers on a composite result.
pub const MAX_DRIVERS: usize = 3;

const HIGH_MAX_AGE_MIN: f64 = 360.0;
const MEDIUM_MAX_AGE_MIN: f64 = 1440.0;
const HIGH_MIN_SOURCES: usize = 2;

/// Confidence in a composite result, derived from data freshness.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Confidence {
    /// At least two fresh sources, none older than six hours.
    High,
    /// Every known source is under a day old.
    Medium,
    /// Stale or unknown freshness.
    Low,
}

impl Confidence {
    /// Grades a set of known source ages in minutes.
    ///
    /// A single fresh source caps out at `Medium`.
    #[must_use]
    pub fn from_ages_minutes(ages: &[f64]) -> Self {
        let Some(max_age) = ages.iter().copied().reduce(f64::max) else {
            return Self::Low;
        };
        if max_age <= HIGH_MAX_AGE_MIN && ages.len() >= HIGH_MIN_SOURCES {
            Self::High
        } else if max_age <= MEDIUM_MAX_AGE_MIN {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// Composite index with its explanation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeResult {
    /// Weighted composite, one decimal.
    pub fsri: f64,
    /// Clamped pillar scores, one decimal each.
    #[serde(rename = "subScores")]
    pub sub_scores: SubScores,
    /// Up to three drivers ordered by contribution.
    pub drivers: Vec<String>,
    /// Freshness-based confidence.
    pub confidence: Confidence,
}

/// Combines four pillar results into one [`CompositeResult`].
///
/// Pure: no I/O, no shared state.
#[derive(Debug, Clone, Default)]
pub struct FusionEngine {
    weights: ScoringWeights,
}

impl FusionEngine {
    /// Creates an engine after checking the weight invariant.
    pub fn new(weights: ScoringWeights) -> Result<Self, WeightsError> {
        weights.validate()?;
        Ok(Self { weights })
    }

    /// Active weights.
    #[must_use]
    pub const fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    /// Fuses one evaluation.
    #[must_use]
    pub fn fuse(&self, pillars: &PillarSet) -> CompositeResult {
        let scores = SubScores::from_fn(|pillar| clamp_score(pillars.get(pillar).score));
        let fsri = Pillar::ALL
            .into_iter()
            .map(|pillar| self.weights.get(pillar) * scores.get(pillar))
            .sum::<f64>();

        let drivers = self.rank_drivers(pillars, &scores);
        let ages = pillars
            .iter()
            .filter_map(|(_, result)| result.data_age_hours)
            .map(|hours| hours * 60.0)
            .collect::<Vec<_>>();
        let confidence = Confidence::from_ages_minutes(&ages);

        CompositeResult {
            fsri: round_to(clamp_score(fsri), 1),
            sub_scores: SubScores::from_fn(|pillar| round_to(scores.get(pillar), 1)),
            drivers,
            confidence,
        }
    }

    fn rank_drivers(&self, pillars: &PillarSet, scores: &SubScores) -> Vec<String> {
        let mut candidates = Vec::new();
        for (pillar, result) in pillars.iter() {
            let score = scores.get(pillar);
            if !admits_drivers(pillar, score) {
                continue;
            }
            let weight = self.weights.get(pillar) * score;
            candidates.extend(result.drivers.iter().map(|driver| (weight, driver)));
        }
        // Stable: equal contributions keep pillar order.
        candidates.sort_by(|left, right| right.0.total_cmp(&left.0));

        let mut drivers = candidates
            .into_iter()
            .take(MAX_DRIVERS)
            .map(|(_, driver)| driver.clone())
            .collect::<Vec<_>>();
        if drivers.is_empty() {
            drivers.push(NORMAL_CONDITIONS.to_string());
        }
        drivers
    }
}

/// Policy is a manual flag, so any activation counts.
fn admits_drivers(pillar: Pillar, score: f64) -> bool {
    match pillar {
        Pillar::Policy => score > 0.0,
        Pillar::Production | Pillar::Movement | Pillar::Biosecurity => score > DRIVER_FLOOR,
    }
}
