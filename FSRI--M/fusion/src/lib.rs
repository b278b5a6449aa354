#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! FSRI fusion: pillar results in, composite score, ranked drivers,
//! freshness confidence and horizon projections out.

/// Pillar identifiers, per-pillar results and score helpers.
#[path = "../pillar.rs"]
pub mod pillar;

/// Pillar weights and their load-time invariant.
#[path = "../weights.rs"]
pub mod weights;

/// Weighted aggregation, driver ranking and confidence.
#[path = "../engine.rs"]
pub mod engine;

/// Predict-only state-space horizon projection.
#[path = "../forecast.rs"]
pub mod forecast;

pub use engine::{CompositeResult, Confidence, FusionEngine, NORMAL_CONDITIONS};
pub use forecast::{FilterParams, ForecastStep, HorizonForecaster, Horizons};
pub use pillar::{clamp_score, round_to, Pillar, PillarResult, PillarSet, SubScores, UnknownPillar};
pub use weights::{ScoringWeights, WeightsError};
