use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pillar::Pillar;

/// Allowed deviation of the weight sum from 1.0.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Weight violations detected at configuration load.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum WeightsError {
    /// A weight is negative or not finite.
    #[error("weight for {pillar} must be a finite non-negative number, got {value}")]
    Invalid {
        /// Offending pillar.
        pillar: Pillar,
        /// Configured value.
        value: f64,
    },
    /// The weights do not add up to one.
    #[error("pillar weights must sum to 1.0, got {sum}")]
    Sum {
        /// Actual sum.
        sum: f64,
    },
}

/// Contribution of each pillar to the composite score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    /// Production weight.
    pub production: f64,
    /// Movement weight.
    pub movement: f64,
    /// Policy weight.
    pub policy: f64,
    /// Biosecurity weight.
    pub biosecurity: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            production: 0.40,
            movement: 0.35,
            policy: 0.05,
            biosecurity: 0.20,
        }
    }
}

impl ScoringWeights {
    /// Weight for `pillar`.
    #[must_use]
    pub const fn get(&self, pillar: Pillar) -> f64 {
        match pillar {
            Pillar::Production => self.production,
            Pillar::Movement => self.movement,
            Pillar::Policy => self.policy,
            Pillar::Biosecurity => self.biosecurity,
        }
    }

    /// Sum of all four weights.
    #[must_use]
    pub fn sum(&self) -> f64 {
        Pillar::ALL.into_iter().map(|pillar| self.get(pillar)).sum()
    }

    /// Checks every weight is non-negative and that they sum to one.
    pub fn validate(&self) -> Result<(), WeightsError> {
        for pillar in Pillar::ALL {
            let value = self.get(pillar);
            if !value.is_finite() || value < 0.0 {
                return Err(WeightsError::Invalid { pillar, value });
            }
        }
        let sum = self.sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(WeightsError::Sum { sum });
        }
        Ok(())
    }
}
