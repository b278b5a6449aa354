use serde::{Deserialize, Serialize};

use crate::calibrator::CalibrationParams;

/// Metric thresholds an artifact must meet before it may serve traffic.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentGate {
    /// Highest acceptable Brier score.
    pub max_brier: f64,
    /// Highest acceptable 10-bin ECE.
    pub max_ece: f64,
    /// Smallest acceptable training window.
    pub min_samples: usize,
}

impl Default for DeploymentGate {
    fn default() -> Self {
        Self {
            max_brier: 0.25,
            max_ece: 0.10,
            min_samples: 30,
        }
    }
}

/// Outcome of [`DeploymentGate::evaluate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateDecision {
    /// Whether every check passed.
    pub passed: bool,
    /// One entry per failed check.
    pub reasons: Vec<String>,
}

impl DeploymentGate {
    /// Checks an artifact's recorded metrics.
    #[must_use]
    pub fn evaluate(&self, params: &CalibrationParams) -> GateDecision {
        let mut reasons = Vec::new();
        match &params.metrics {
            None => reasons.push("artifact carries no metrics".to_string()),
            Some(metrics) => {
                if metrics.brier.is_nan() || metrics.brier > self.max_brier {
                    reasons.push(format!("brier {:.4} > {:.4}", metrics.brier, self.max_brier));
                }
                if metrics.ece_10.is_nan() || metrics.ece_10 > self.max_ece {
                    reasons.push(format!("ece_10 {:.4} > {:.4}", metrics.ece_10, self.max_ece));
                }
                if metrics.n < self.min_samples {
                    reasons.push(format!("n {} < {}", metrics.n, self.min_samples));
                }
                if let Some(note) = &metrics.note {
                    reasons.push(format!("trainer fell back: {note}"));
                }
            }
        }
        GateDecision {
            passed: reasons.is_empty(),
            reasons,
        }
    }
}
