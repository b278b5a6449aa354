#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Movement-event calibration: the serving-time logistic transform, the
//! offline trainer that produces its coefficients, and the feature and label
//! builders feeding that trainer.

/// Serving-time calibrator and artifact format.
#[path = "../calibrator.rs"]
pub mod calibrator;

/// Probability-forecast quality metrics.
#[path = "../metrics.rs"]
pub mod metrics;

/// Offline logistic trainer.
#[path = "../trainer.rs"]
pub mod trainer;

/// Deployment gate applied to trained artifacts.
#[path = "../gate.rs"]
pub mod gate;

/// CSV readers and writers for offline datasets.
#[path = "../dataset.rs"]
pub mod dataset;

/// Rolling gauge/weather features and SPI-30.
#[path = "../features.rs"]
pub mod features;

/// Movement score series and forward disruption labels.
#[path = "../labels.rs"]
pub mod labels;

pub use calibrator::{
    CalibrationError, CalibrationMetrics, CalibrationParams, EventBand, EventPrediction,
    MovementCalibrator, ParamSource,
};
pub use dataset::{DailyObservation, DatasetError, LabelRow};
pub use features::{FeatureBuilder, FeatureRow};
pub use gate::{DeploymentGate, GateDecision};
pub use labels::{GaugeSite, LabelBuilder};
pub use metrics::{brier_score, expected_calibration_error};
pub use trainer::{CalibrationTrainer, LabeledScore, TrainingError};
