use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One of the four independently scored risk dimensions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Pillar {
    /// Crop condition and weather stress.
    Production,
    /// River and logistics disruption.
    Movement,
    /// Export restrictions and other manual policy flags.
    Policy,
    /// Disease outbreak pressure.
    Biosecurity,
}

impl Pillar {
    /// Every pillar in canonical order.
    pub const ALL: [Self; 4] = [
        Self::Production,
        Self::Movement,
        Self::Policy,
        Self::Biosecurity,
    ];

    /// Lower-case identifier used in rule sources and payloads.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Production => "production",
            Self::Movement => "movement",
            Self::Policy => "policy",
            Self::Biosecurity => "biosecurity",
        }
    }
}

impl fmt::Display for Pillar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name that is not one of the four pillars.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown pillar '{0}', expected one of production, movement, policy, biosecurity")]
pub struct UnknownPillar(pub String);

impl FromStr for Pillar {
    type Err = UnknownPillar;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|pillar| pillar.as_str() == value)
            .ok_or_else(|| UnknownPillar(value.to_string()))
    }
}

/// Output of one pillar scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PillarResult {
    /// Score in `[0, 100]`.
    pub score: f64,
    /// Human-readable explanations, most important first.
    #[serde(default)]
    pub drivers: Vec<String>,
    /// Age of the underlying data, when the scorer knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_age_hours: Option<f64>,
}

impl PillarResult {
    /// Result with no drivers and unknown data age.
    #[must_use]
    pub const fn new(score: f64) -> Self {
        Self {
            score,
            drivers: Vec::new(),
            data_age_hours: None,
        }
    }

    /// Adds a driver.
    #[must_use]
    pub fn with_driver(mut self, driver: impl Into<String>) -> Self {
        self.drivers.push(driver.into());
        self
    }

    /// Sets the data age.
    #[must_use]
    pub const fn with_age_hours(mut self, hours: f64) -> Self {
        self.data_age_hours = Some(hours);
        self
    }
}

/// The four pillar results of one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PillarSet {
    /// Production pillar.
    pub production: PillarResult,
    /// Movement pillar.
    pub movement: PillarResult,
    /// Policy pillar.
    pub policy: PillarResult,
    /// Biosecurity pillar.
    pub biosecurity: PillarResult,
}

impl PillarSet {
    /// Result for `pillar`.
    #[must_use]
    pub const fn get(&self, pillar: Pillar) -> &PillarResult {
        match pillar {
            Pillar::Production => &self.production,
            Pillar::Movement => &self.movement,
            Pillar::Policy => &self.policy,
            Pillar::Biosecurity => &self.biosecurity,
        }
    }

    /// Results in canonical pillar order.
    pub fn iter(&self) -> impl Iterator<Item = (Pillar, &PillarResult)> + '_ {
        Pillar::ALL.into_iter().map(move |pillar| (pillar, self.get(pillar)))
    }
}

/// Per-pillar scores as carried on a composite result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SubScores {
    /// Production score.
    pub production: f64,
    /// Movement score.
    pub movement: f64,
    /// Policy score.
    pub policy: f64,
    /// Biosecurity score.
    pub biosecurity: f64,
}

impl SubScores {
    /// Score for `pillar`.
    #[must_use]
    pub const fn get(&self, pillar: Pillar) -> f64 {
        match pillar {
            Pillar::Production => self.production,
            Pillar::Movement => self.movement,
            Pillar::Policy => self.policy,
            Pillar::Biosecurity => self.biosecurity,
        }
    }

    /// Builds sub-scores from a closure evaluated per pillar.
    pub fn from_fn(mut score: impl FnMut(Pillar) -> f64) -> Self {
        Self {
            production: score(Pillar::Production),
            movement: score(Pillar::Movement),
            policy: score(Pillar::Policy),
            biosecurity: score(Pillar::Biosecurity),
        }
    }
}

/// Clamps a score into `[0, 100]`; non-finite input maps to 0.
#[must_use]
pub fn clamp_score(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

/// Rounds half away from zero to `decimals` places.
#[must_use]
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10_f64.powi(decimals);
    (value * factor).round_ties_even() / factor
}
