use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_event_bus::topics;
use shared_logging::{LogLevel, Telemetry};
use thiserror::Error;

use crate::{
    calibrator::{
        CalibrationMetrics, CalibrationParams, MovementCalibrator, ParamSource, SCORE_CENTER,
    },
    metrics::{brier_score, expected_calibration_error},
};

/// Note recorded when the label window holds a single class.
pub const SINGLE_CLASS_NOTE: &str = "single-class labels; default a,b used";

const ECE_BINS: usize = 10;

/// One training example.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LabeledScore {
    /// Movement pillar score.
    pub score: f64,
    /// Whether a disruption occurred within the following 7 days.
    pub event: bool,
}

/// Training failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TrainingError {
    /// Nothing to learn from.
    #[error("no labeled samples to train on")]
    EmptyLabels,
}

/// Fits `a`, `b` by class-balanced, L2-regularised logistic regression.
#[derive(Debug, Clone)]
pub struct CalibrationTrainer {
    inverse_regularization: f64,
    max_iterations: usize,
    tolerance: f64,
    telemetry: Option<Telemetry>,
}

impl Default for CalibrationTrainer {
    fn default() -> Self {
        Self {
            inverse_regularization: 1.0,
            max_iterations: 100,
            tolerance: 1e-12,
            telemetry: None,
        }
    }
}

impl CalibrationTrainer {
    /// Attaches telemetry.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Sets the inverse L2 strength (`C`); the intercept is never penalised.
    #[must_use]
    pub const fn with_inverse_regularization(mut self, c: f64) -> Self {
        self.inverse_regularization = c;
        self
    }

    /// Trains on `samples`.
    ///
    /// A single-class window cannot place a boundary, so the defaults are
    /// returned with a note and metrics computed against them.
    pub fn train(&self, samples: &[LabeledScore]) -> Result<CalibrationParams, TrainingError> {
        if samples.is_empty() {
            self.log(LogLevel::Error, "calibration.train_failed", json!({ "reason": "empty" }));
            return Err(TrainingError::EmptyLabels);
        }
        let positives = samples.iter().filter(|sample| sample.event).count();
        let single_class = positives == 0 || positives == samples.len();

        // Metrics describe the model that produced the coefficients: the
        // fitted curve, or the default mapping when no fit was possible.
        let (params, probabilities) = if single_class {
            let params = CalibrationParams::default();
            let calibrator = MovementCalibrator::from_params(params.clone(), ParamSource::Default);
            let probabilities = samples
                .iter()
                .map(|sample| calibrator.probability(sample.score))
                .collect::<Vec<_>>();
            (params, probabilities)
        } else {
            let (coef, intercept) = self.fit(samples, positives);
            let probabilities = samples
                .iter()
                .map(|sample| sigmoid(coef.mul_add(sample.score, intercept)))
                .collect::<Vec<_>>();
            let params = CalibrationParams {
                a: coef,
                b: coef.mul_add(-SCORE_CENTER, intercept),
                metrics: None,
            };
            (params, probabilities)
        };
        let outcomes = samples.iter().map(|sample| sample.event).collect::<Vec<_>>();
        let params = CalibrationParams {
            metrics: Some(CalibrationMetrics {
                brier: brier_score(&probabilities, &outcomes),
                ece_10: expected_calibration_error(&probabilities, &outcomes, ECE_BINS),
                n: samples.len(),
                note: single_class.then(|| SINGLE_CLASS_NOTE.to_string()),
            }),
            ..params
        };

        let payload = json!({
            "a": params.a,
            "b": params.b,
            "n": samples.len(),
            "positives": positives,
            "single_class": single_class,
            "metrics": params.metrics,
        });
        self.log(LogLevel::Info, "calibration.trained", payload.clone());
        if let Some(telemetry) = &self.telemetry {
            let _ = telemetry.event(topics::CALIBRATION_TRAINED, payload);
        }
        Ok(params)
    }

    /// Newton iterations with step halving; returns `(coef, intercept)`.
    #[allow(clippy::cast_precision_loss)]
    fn fit(&self, samples: &[LabeledScore], positives: usize) -> (f64, f64) {
        let n = samples.len() as f64;
        let pos_weight = n / (2.0 * positives as f64);
        let neg_weight = n / (2.0 * (samples.len() - positives) as f64);
        let weighted = samples
            .iter()
            .map(|sample| {
                let weight = if sample.event { pos_weight } else { neg_weight };
                (sample.score, f64::from(u8::from(sample.event)), weight)
            })
            .collect::<Vec<_>>();

        let c = self.inverse_regularization;
        let objective = |coef: f64, intercept: f64| {
            let loss = weighted
                .iter()
                .map(|&(x, y, w)| {
                    let z = coef.mul_add(x, intercept);
                    // log(1 + e^z) - y·z, stable for large |z|
                    w * (softplus(z) - y * z)
                })
                .sum::<f64>();
            0.5 * coef * coef + c * loss
        };

        let (mut coef, mut intercept) = (0.0_f64, 0.0_f64);
        let mut current = objective(coef, intercept);
        for _ in 0..self.max_iterations {
            let (mut g_coef, mut g_int) = (coef, 0.0);
            let (mut h_cc, mut h_ci, mut h_ii) = (1.0, 0.0, 0.0);
            for &(x, y, w) in &weighted {
                let p = sigmoid(coef.mul_add(x, intercept));
                let residual = c * w * (p - y);
                g_coef += residual * x;
                g_int += residual;
                let curvature = c * w * p * (1.0 - p);
                h_cc += curvature * x * x;
                h_ci += curvature * x;
                h_ii += curvature;
            }
            let det = h_cc.mul_add(h_ii, -(h_ci * h_ci));
            if det.abs() < f64::EPSILON {
                break;
            }
            let step_coef = h_ii.mul_add(g_coef, -(h_ci * g_int)) / det;
            let step_int = h_cc.mul_add(g_int, -(h_ci * g_coef)) / det;
            if step_coef.abs() <= self.tolerance * (1.0 + coef.abs())
                && step_int.abs() <= self.tolerance * (1.0 + intercept.abs())
            {
                coef -= step_coef;
                intercept -= step_int;
                break;
            }

            let mut scale = 1.0_f64;
            let mut accepted = false;
            for _ in 0..40 {
                let next_coef = scale.mul_add(-step_coef, coef);
                let next_int = scale.mul_add(-step_int, intercept);
                let candidate = objective(next_coef, next_int);
                if candidate <= current {
                    (coef, intercept, current) = (next_coef, next_int, candidate);
                    accepted = true;
                    break;
                }
                scale *= 0.5;
            }
            if !accepted {
                break;
            }
        }
        (coef, intercept)
    }

    fn log(&self, level: LogLevel, message: &str, metadata: serde_json::Value) {
        if let Some(telemetry) = &self.telemetry {
            let _ = telemetry.log(level, message, metadata);
        }
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

fn softplus(z: f64) -> f64 {
    if z > 0.0 {
        z + (-z).exp().ln_1p()
    } else {
        z.exp().ln_1p()
    }
}

#[cfg(test)]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
mod tests {
    use super::*;
    use crate::calibrator::DEFAULT_A;

    fn sample(score: f64, event: bool) -> LabeledScore {
        LabeledScore { score, event }
    }

    /// Events become more frequent as the score rises, with overlap in the middle.
    fn overlapping_history() -> Vec<LabeledScore> {
        let mut samples = Vec::new();
        for step in 0..100 {
            let score = f64::from(step);
            let event = match step {
                0..=39 => step % 10 == 0,
                40..=69 => step % 2 == 0,
                _ => step % 10 != 0,
            };
            samples.push(sample(score, event));
        }
        samples
    }

    #[test]
    fn empty_labels_fail() {
        assert_eq!(
            CalibrationTrainer::default().train(&[]),
            Err(TrainingError::EmptyLabels)
        );
    }

    #[test]
    fn single_class_falls_back_to_defaults() {
        let samples = [sample(20.0, false), sample(70.0, false), sample(90.0, false)];
        let params = CalibrationTrainer::default().train(&samples).unwrap();
        assert!((params.a - DEFAULT_A).abs() < f64::EPSILON);
        assert!(params.b.abs() < f64::EPSILON);
        let metrics = params.metrics.unwrap();
        assert_eq!(metrics.n, 3);
        assert_eq!(metrics.note.as_deref(), Some(SINGLE_CLASS_NOTE));
        assert!(metrics.brier > 0.0);
    }

    #[test]
    fn fits_increasing_risk() {
        let samples = overlapping_history();
        let params = CalibrationTrainer::default().train(&samples).unwrap();
        assert!(params.a > 0.0);

        let metrics = params.metrics.unwrap();
        assert!(metrics.note.is_none());
        assert_eq!(metrics.n, 100);
        assert!(metrics.brier < 0.25, "brier {}", metrics.brier);
        assert!((0.0..=1.0).contains(&metrics.ece_10));
    }

    #[test]
    fn bias_is_intercept_minus_fifty_slopes() {
        let samples = overlapping_history();
        let trainer = CalibrationTrainer::default();
        let params = trainer.train(&samples).unwrap();
        let positives = samples.iter().filter(|s| s.event).count();
        let (coef, intercept) = trainer.fit(&samples, positives);
        assert!((params.a - coef).abs() < 1e-12);
        assert!((params.b - (intercept - coef * 50.0)).abs() < 1e-9);
    }

    #[test]
    fn fit_reaches_a_stationary_point() {
        let samples = overlapping_history();
        let trainer = CalibrationTrainer::default();
        let positives = samples.iter().filter(|s| s.event).count();
        let (coef, intercept) = trainer.fit(&samples, positives);

        let n = samples.len() as f64;
        let pos_w = n / (2.0 * positives as f64);
        let neg_w = n / (2.0 * (samples.len() - positives) as f64);
        let (mut g_coef, mut g_int) = (coef, 0.0);
        for s in &samples {
            let w = if s.event { pos_w } else { neg_w };
            let r = w * (sigmoid(coef * s.score + intercept) - f64::from(u8::from(s.event)));
            g_coef += r * s.score;
            g_int += r;
        }
        assert!(g_coef.abs() < 1e-4, "coef gradient {g_coef}");
        assert!(g_int.abs() < 1e-4, "intercept gradient {g_int}");
    }

    #[test]
    fn separable_history_stays_finite() {
        let samples = (0..40)
            .map(|idx| sample(f64::from(idx) * 2.5, idx >= 24))
            .collect::<Vec<_>>();
        let params = CalibrationTrainer::default().train(&samples).unwrap();
        assert!(params.a.is_finite() && params.b.is_finite());
        assert!(params.a > 0.0);
    }
}
