#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! FSRI signal runtime: loads configuration and composes fusion, horizon
//! projection, movement calibration and action rules into one evaluation.

/// TOML runtime configuration.
#[path = "../config.rs"]
pub mod config;

/// End-to-end evaluation and hot-swappable configuration.
#[path = "../runtime.rs"]
pub mod runtime;

pub use config::{FsriConfig, PathsConfig, ACTIONS_FILE_ENV};
pub use runtime::{
    DeployError, FsriReport, SignalReport, SignalRequest, SignalRuntime, SignalRuntimeBuilder,
};
