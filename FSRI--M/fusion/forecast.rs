use ndarray::{arr1, arr2, Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::pillar::{clamp_score, round_to};

/// Projected composite scores at the three nominal checkpoints.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Horizons {
    /// First predict step.
    pub d5: f64,
    /// Second predict step.
    pub d15: f64,
    /// Third predict step.
    pub d30: f64,
}

/// Constant-velocity filter parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterParams {
    /// Diagonal of the initial covariance.
    pub initial_variance: f64,
    /// Process noise on the value component.
    pub value_noise: f64,
    /// Process noise on the trend component.
    pub trend_noise: f64,
    /// Measurement noise. Never applied: no observation exists at forecast time.
    pub observation_noise: f64,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            initial_variance: 10.0,
            value_noise: 0.1,
            trend_noise: 0.01,
            observation_noise: 1.0,
        }
    }
}

/// Prior after one predict step, before clamping or rounding.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastStep {
    /// Projected value component.
    pub value: f64,
    /// Prior variance of the value component.
    pub variance: f64,
}

/// Stateless horizon projection over a `[value, trend]` state.
///
/// Each horizon is one unit predict step; the `d5`/`d15`/`d30` labels are
/// names, not day counts.
#[derive(Debug, Clone, Default)]
pub struct HorizonForecaster {
    params: FilterParams,
}

impl HorizonForecaster {
    /// Creates a forecaster with custom parameters.
    #[must_use]
    pub const fn new(params: FilterParams) -> Self {
        Self { params }
    }

    /// Projects `current` to the three horizons.
    #[must_use]
    pub fn project(&self, current: f64) -> Horizons {
        let steps = self.trajectory(current, 3);
        let at = |idx: usize| round_to(clamp_score(steps[idx].value), 1);
        Horizons {
            d5: at(0),
            d15: at(1),
            d30: at(2),
        }
    }

    /// Runs `steps` predict-only iterations from `[current, 0]`.
    #[must_use]
    pub fn trajectory(&self, current: f64, steps: usize) -> Vec<ForecastStep> {
        let transition: Array2<f64> = arr2(&[[1.0, 1.0], [0.0, 1.0]]);
        let observation: Array1<f64> = arr1(&[1.0, 0.0]);
        let process_noise = Array2::from_diag(&arr1(&[self.params.value_noise, self.params.trend_noise]));

        let mut state = arr1(&[current, 0.0]);
        let mut covariance = Array2::<f64>::eye(2) * self.params.initial_variance;
        let mut out = Vec::with_capacity(steps);
        for _ in 0..steps {
            state = transition.dot(&state);
            covariance = transition.dot(&covariance).dot(&transition.t()) + &process_noise;
            out.push(ForecastStep {
                value: observation.dot(&state),
                variance: observation.dot(&covariance.dot(&observation)),
            });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Closed form of the predict recursion for `P0 = v·I`, zero initial trend.
    fn closed_form_variance(v: f64, q_value: f64, q_trend: f64, step: usize) -> f64 {
        let (mut p00, mut p01, mut p11) = (v, 0.0, v);
        for _ in 0..step {
            let next00 = p00 + 2.0 * p01 + p11 + q_value;
            let next01 = p01 + p11;
            let next11 = p11 + q_trend;
            (p00, p01, p11) = (next00, next01, next11);
        }
        p00
    }

    #[test]
    fn flat_start_holds_value_across_horizons() {
        let horizons = HorizonForecaster::default().project(50.0);
        assert_eq!(
            horizons,
            Horizons {
                d5: 50.0,
                d15: 50.0,
                d30: 50.0
            }
        );
    }

    #[test]
    fn trajectory_matches_closed_form() {
        let steps = HorizonForecaster::default().trajectory(50.0, 3);
        let expected = [20.1, 50.21, 100.35];
        for (idx, step) in steps.iter().enumerate() {
            assert!((step.value - 50.0).abs() < 1e-12);
            assert!((step.variance - expected[idx]).abs() < 1e-9);
            assert!((step.variance - closed_form_variance(10.0, 0.1, 0.01, idx + 1)).abs() < 1e-9);
        }
    }

    #[test]
    fn projections_are_clamped_and_rounded() {
        let forecaster = HorizonForecaster::default();
        assert!((forecaster.project(130.0).d30 - 100.0).abs() < f64::EPSILON);
        assert!(forecaster.project(-4.0).d5.abs() < f64::EPSILON);
        assert!((forecaster.project(42.46).d15 - 42.5).abs() < 1e-9);
    }

    /// Documented approximation: the three horizons are consecutive single
    /// predict steps, not 5, 15 and 30 day-scaled transitions. A forecaster
    /// scaled by day count would show a 30-step variance here.
    #[test]
    fn horizons_are_single_steps_not_day_scaled() {
        let forecaster = HorizonForecaster::default();
        let steps = forecaster.trajectory(50.0, 30);
        let third = forecaster.trajectory(50.0, 3)[2];
        assert!((third.variance - steps[2].variance).abs() < 1e-12);
        assert!(steps[29].variance > third.variance);
    }
}
