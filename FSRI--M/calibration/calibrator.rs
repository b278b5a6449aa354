use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Slope used when no artifact is available.
pub const DEFAULT_A: f64 = 0.08;
/// Bias used when no artifact is available.
pub const DEFAULT_B: f64 = 0.0;
/// Movement score at which `x = b`.
pub const SCORE_CENTER: f64 = 50.0;

/// Quality metrics recorded alongside trained coefficients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationMetrics {
    /// Mean squared probability error.
    pub brier: f64,
    /// 10-bin expected calibration error.
    pub ece_10: f64,
    /// Number of training samples.
    pub n: usize,
    /// Set when the trainer fell back to defaults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Coefficients of `p = σ(a·(score − 50) + b)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationParams {
    /// Slope.
    pub a: f64,
    /// Bias.
    pub b: f64,
    /// Present on trained artifacts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<CalibrationMetrics>,
}

impl Default for CalibrationParams {
    fn default() -> Self {
        Self {
            a: DEFAULT_A,
            b: DEFAULT_B,
            metrics: None,
        }
    }
}

impl CalibrationParams {
    /// Reads an artifact; missing `a` or `b` keys fall back individually.
    pub fn read(path: impl AsRef<Path>) -> Result<Self, CalibrationError> {
        #[derive(Deserialize)]
        struct Artifact {
            a: Option<f64>,
            b: Option<f64>,
            #[serde(default)]
            metrics: Option<CalibrationMetrics>,
        }

        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| CalibrationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let artifact: Artifact =
            serde_json::from_str(&raw).map_err(|source| CalibrationError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        let params = Self {
            a: artifact.a.unwrap_or(DEFAULT_A),
            b: artifact.b.unwrap_or(DEFAULT_B),
            metrics: artifact.metrics,
        };
        if !params.a.is_finite() || !params.b.is_finite() {
            return Err(CalibrationError::NonFinite {
                path: path.to_path_buf(),
            });
        }
        Ok(params)
    }

    /// Writes the artifact as pretty JSON, creating parent directories.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), CalibrationError> {
        let path = path.as_ref();
        let io_err = |source| CalibrationError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let body = serde_json::to_string_pretty(self).map_err(|source| CalibrationError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, body).map_err(io_err)
    }

    /// Uncalibrated log-odds for a movement score.
    #[must_use]
    pub fn logit(&self, movement_score: f64) -> f64 {
        self.a.mul_add(movement_score - SCORE_CENTER, self.b)
    }
}

/// Failures reading or writing a calibration artifact.
#[derive(Debug, Error)]
pub enum CalibrationError {
    /// Filesystem failure.
    #[error("calibration artifact {path:?}: {source}")]
    Io {
        /// Artifact path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// Malformed JSON or wrong field types.
    #[error("calibration artifact {path:?} is not valid: {source}")]
    Parse {
        /// Artifact path.
        path: PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },
    /// Coefficients that would produce NaN probabilities.
    #[error("calibration artifact {path:?} has non-finite coefficients")]
    NonFinite {
        /// Artifact path.
        path: PathBuf,
    },
}

/// Where the serving coefficients came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "path", rename_all = "lowercase")]
pub enum ParamSource {
    /// Hard-coded defaults.
    Default,
    /// A trained artifact on disk.
    Artifact(PathBuf),
}

/// Likelihood band attached to a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventBand {
    /// `p ≥ 0.75`.
    Likely,
    /// `p ≥ 0.50`.
    Elevated,
    /// `p ≥ 0.25`.
    Some,
    /// Below 0.25.
    Minimal,
}

impl EventBand {
    /// Band for a probability.
    #[must_use]
    pub fn from_probability(probability: f64) -> Self {
        if probability >= 0.75 {
            Self::Likely
        } else if probability >= 0.5 {
            Self::Elevated
        } else if probability >= 0.25 {
            Self::Some
        } else {
            Self::Minimal
        }
    }

    /// Operator-facing explanation.
    #[must_use]
    pub const fn reason(self) -> &'static str {
        match self {
            Self::Likely => "Disruption likely given current MR calibration",
            Self::Elevated => "Elevated disruption chance from MR calibration",
            Self::Some => "Some disruption potential",
            Self::Minimal => "Minimal disruption expected",
        }
    }
}

/// 7-day movement disruption estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPrediction {
    /// Probability in `[0, 1]`, two decimals.
    pub probability: f64,
    /// Banded explanation.
    pub reason: String,
}

/// Immutable serving-time calibrator.
#[derive(Debug, Clone, PartialEq)]
pub struct MovementCalibrator {
    params: CalibrationParams,
    source: ParamSource,
}

impl Default for MovementCalibrator {
    fn default() -> Self {
        Self {
            params: CalibrationParams::default(),
            source: ParamSource::Default,
        }
    }
}

impl MovementCalibrator {
    /// Wraps explicit parameters.
    #[must_use]
    pub const fn from_params(params: CalibrationParams, source: ParamSource) -> Self {
        Self { params, source }
    }

    /// Loads an artifact, silently falling back to the defaults.
    #[must_use]
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        CalibrationParams::read(path).map_or_else(
            |_| Self::default(),
            |params| Self::from_params(params, ParamSource::Artifact(path.to_path_buf())),
        )
    }

    /// Active coefficients.
    #[must_use]
    pub const fn params(&self) -> &CalibrationParams {
        &self.params
    }

    /// Origin of the active coefficients.
    #[must_use]
    pub const fn source(&self) -> &ParamSource {
        &self.source
    }

    /// Unrounded probability for a movement score.
    #[must_use]
    pub fn probability(&self, movement_score: f64) -> f64 {
        1.0 / (1.0 + (-self.params.logit(movement_score)).exp())
    }

    /// Rounded probability and banded reason.
    #[must_use]
    pub fn predict(&self, movement_score: f64) -> EventPrediction {
        let probability = self.probability(movement_score);
        EventPrediction {
            probability: (probability * 100.0).round_ties_even() / 100.0,
            reason: EventBand::from_probability(probability).reason().to_string(),
        }
    }
}
