use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use fsri_calibration::{DeploymentGate, GaugeSite};
use fsri_fusion::{FilterParams, ScoringWeights};
use serde::Deserialize;

/// Environment variable that overrides `[paths].actions_file`.
pub const ACTIONS_FILE_ENV: &str = "ACTIONS_FILE";

/// Runtime configuration loaded from TOML.
#[derive(Debug, Clone, PartialEq)]
pub struct FsriConfig {
    /// Pillar weights, validated at load.
    pub weights: ScoringWeights,
    /// Forecaster parameters.
    pub forecast: FilterParams,
    /// File locations, already resolved.
    pub paths: PathsConfig,
    /// Calibration deployment thresholds.
    pub gate: DeploymentGate,
    /// Gauge catalogue for label building.
    pub gauges: Vec<GaugeSite>,
    source_dir: PathBuf,
}

/// File locations used by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PathsConfig {
    /// Action rule document.
    #[serde(default = "default_actions_file")]
    pub actions_file: PathBuf,
    /// Trained calibration artifact.
    #[serde(default = "default_calibration_file")]
    pub calibration_file: PathBuf,
    /// JSON-lines log sink.
    #[serde(default)]
    pub log_path: Option<PathBuf>,
    /// JSON-lines event sink.
    #[serde(default)]
    pub event_log: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            actions_file: default_actions_file(),
            calibration_file: default_calibration_file(),
            log_path: None,
            event_log: None,
        }
    }
}

impl Default for FsriConfig {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            forecast: FilterParams::default(),
            paths: PathsConfig::default(),
            gate: DeploymentGate::default(),
            gauges: GaugeSite::defaults(),
            source_dir: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FsriConfigSerde {
    #[serde(default)]
    weights: ScoringWeights,
    #[serde(default)]
    forecast: Option<FilterParams>,
    #[serde(default)]
    paths: PathsConfig,
    #[serde(default)]
    gate: DeploymentGate,
    #[serde(default)]
    gauges: Vec<GaugeSite>,
}

impl FsriConfig {
    /// Loads configuration from a TOML file, then applies [`ACTIONS_FILE_ENV`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading FSRI config {}", path.display()))?;
        let source_dir = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        let config = Self::from_toml_str(&raw, source_dir)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(config.with_actions_override(std::env::var_os(ACTIONS_FILE_ENV).map(PathBuf::from)))
    }

    /// Parses TOML; relative paths resolve against `source_dir`.
    pub fn from_toml_str(raw: &str, source_dir: impl Into<PathBuf>) -> Result<Self> {
        let document: FsriConfigSerde = toml::from_str(raw)?;
        document
            .weights
            .validate()
            .context("invalid [weights] section")?;
        let source_dir = source_dir.into();
        let mut paths = document.paths;
        paths.actions_file = resolve(&source_dir, &paths.actions_file);
        paths.calibration_file = resolve(&source_dir, &paths.calibration_file);
        paths.log_path = paths.log_path.map(|p| resolve(&source_dir, &p));
        paths.event_log = paths.event_log.map(|p| resolve(&source_dir, &p));
        let gauges = if document.gauges.is_empty() {
            GaugeSite::defaults()
        } else {
            document.gauges
        };
        for site in &gauges {
            anyhow::ensure!(
                site.low_threshold < site.high_threshold,
                "gauge {} has low threshold {} not below high threshold {}",
                site.site_id,
                site.low_threshold,
                site.high_threshold
            );
        }
        Ok(Self {
            weights: document.weights,
            forecast: document.forecast.unwrap_or_default(),
            paths,
            gate: document.gate,
            gauges,
            source_dir,
        })
    }

    /// Replaces the rule document path when `actions_file` is set.
    #[must_use]
    pub fn with_actions_override(mut self, actions_file: Option<PathBuf>) -> Self {
        if let Some(path) = actions_file.filter(|path| !path.as_os_str().is_empty()) {
            self.paths.actions_file = path;
        }
        self
    }

    /// Resolves a path relative to the configuration file.
    #[must_use]
    pub fn resolve_path(&self, candidate: impl AsRef<Path>) -> PathBuf {
        resolve(&self.source_dir, candidate.as_ref())
    }
}

fn resolve(source_dir: &Path, candidate: &Path) -> PathBuf {
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        source_dir.join(candidate)
    }
}

fn default_actions_file() -> PathBuf {
    PathBuf::from("actions.yaml")
}

fn default_calibration_file() -> PathBuf {
    PathBuf::from("models/movement_calibration.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn loads_and_resolves_relative_paths() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fsri.toml");
        fs::write(
            &path,
            r#"
[weights]
production = 0.5
movement = 0.3
policy = 0.0
biosecurity = 0.2

[paths]
actions_file = "rules/actions.yaml"
log_path = "/var/log/fsri.log"

[gate]
max_brier = 0.2

[[gauges]]
site_id = "07374000"
low_threshold = 4.5
high_threshold = 11.0
"#,
        )
        .unwrap();
        let config = FsriConfig::from_toml_str(&fs::read_to_string(&path).unwrap(), dir.path())
            .unwrap();
        assert!((config.weights.production - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.paths.actions_file, dir.path().join("rules/actions.yaml"));
        assert_eq!(
            config.paths.calibration_file,
            dir.path().join("models/movement_calibration.json")
        );
        assert_eq!(config.paths.log_path, Some(PathBuf::from("/var/log/fsri.log")));
        assert!((config.gate.max_brier - 0.2).abs() < f64::EPSILON);
        assert_eq!(config.gate.min_samples, 30);
        assert_eq!(config.gauges.len(), 1);
        assert_eq!(config.forecast, FilterParams::default());
    }

    #[test]
    fn weights_must_sum_to_one() {
        let err = FsriConfig::from_toml_str("[weights]\nproduction = 0.9\n", ".").unwrap_err();
        assert!(format!("{err:#}").contains("sum to 1.0"));
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config = FsriConfig::from_toml_str("", "/etc/fsri").unwrap();
        assert_eq!(config.weights, ScoringWeights::default());
        assert_eq!(config.gauges, GaugeSite::defaults());
        assert_eq!(config.paths.actions_file, PathBuf::from("/etc/fsri/actions.yaml"));
    }

    #[test]
    fn partial_forecast_table_keeps_other_defaults() {
        let config = FsriConfig::from_toml_str("[forecast]\nvalue_noise = 0.2\n", ".").unwrap();
        assert!((config.forecast.value_noise - 0.2).abs() < f64::EPSILON);
        assert!((config.forecast.initial_variance - 10.0).abs() < f64::EPSILON);
        assert!((config.forecast.trend_noise - 0.01).abs() < f64::EPSILON);
    }

    #[test]
    fn actions_override_wins() {
        let config = FsriConfig::default()
            .with_actions_override(Some(PathBuf::from("/srv/actions.yaml")));
        assert_eq!(config.paths.actions_file, PathBuf::from("/srv/actions.yaml"));
        let unchanged = FsriConfig::default().with_actions_override(None);
        assert_eq!(unchanged.paths.actions_file, PathBuf::from("actions.yaml"));
    }

    #[test]
    fn inverted_gauge_thresholds_are_rejected() {
        let raw = "[[gauges]]\nsite_id = \"x\"\nlow_threshold = 9.0\nhigh_threshold = 3.0\n";
        assert!(FsriConfig::from_toml_str(raw, ".").is_err());
    }
}
