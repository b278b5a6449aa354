use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fsri_actions::{
    ActionSuggestion, Extras, FileRuleSource, MatchRequest, ReloadError, RuleSource, RuleStore,
    StaticRuleSource,
};
use fsri_calibration::{
    CalibrationError, CalibrationParams, DeploymentGate, EventPrediction, MovementCalibrator,
    ParamSource,
};
use fsri_fusion::{
    clamp_score, CompositeResult, FilterParams, FusionEngine, HorizonForecaster, Horizons,
    Pillar, PillarSet, ScoringWeights, WeightsError,
};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_event_bus::{topics, FileEventPublisher};
use shared_logging::{LogLevel, Telemetry};
use thiserror::Error;

use crate::config::FsriConfig;

/// Result of one composite evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FsriReport {
    /// Composite score, sub-scores, drivers and confidence.
    #[serde(flatten)]
    pub composite: CompositeResult,
    /// Evaluation time.
    pub timestamp: DateTime<Utc>,
    /// Forward projections of the composite score.
    pub horizons: Horizons,
    /// 7-day movement disruption estimate.
    #[serde(rename = "movement_event_7d")]
    pub movement_event: EventPrediction,
    /// Data age in hours for pillars that reported one.
    pub freshness: IndexMap<Pillar, f64>,
}

/// Inputs to [`SignalRuntime::signals`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRequest {
    /// Crop, any case.
    pub crop: String,
    /// Region, any case.
    pub region: String,
    /// The four pillar results.
    pub pillars: PillarSet,
    /// Case-insensitive persona filter.
    #[serde(default)]
    pub persona: Option<String>,
    /// Explicit flags; derived from drivers when absent.
    #[serde(default)]
    pub extras: Option<Extras>,
}

/// Composite evaluation plus ranked actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalReport {
    /// Composite evaluation.
    #[serde(flatten)]
    pub report: FsriReport,
    /// Triggered actions, highest triggering score first.
    pub actions: Vec<ActionSuggestion>,
    /// Flags the rules were matched with.
    pub extras: Extras,
    /// Version of the rule table that produced `actions`.
    pub rules_version: u64,
}

/// Why a calibration artifact was not deployed.
#[derive(Debug, Error)]
pub enum DeployError {
    /// The artifact could not be read.
    #[error(transparent)]
    Load(#[from] CalibrationError),
    /// The artifact's metrics failed the deployment gate.
    #[error("calibration artifact {path:?} rejected: {}", .reasons.join("; "))]
    Rejected {
        /// Artifact path.
        path: PathBuf,
        /// Failed checks.
        reasons: Vec<String>,
    },
}

/// Composes fusion, forecasting, calibration and rule matching for one
/// evaluation, and owns the swappable calibrator and rule table.
#[derive(Debug)]
pub struct SignalRuntime {
    engine: FusionEngine,
    forecaster: HorizonForecaster,
    calibrator: RwLock<Arc<MovementCalibrator>>,
    rules: RuleStore,
    gate: DeploymentGate,
    telemetry: Option<Telemetry>,
}

impl SignalRuntime {
    /// Returns a builder.
    #[must_use]
    pub fn builder() -> SignalRuntimeBuilder {
        SignalRuntimeBuilder::default()
    }

    /// Builds a runtime from configuration, loading rules and calibration.
    ///
    /// Telemetry sinks are opened when `[paths]` names them.
    pub fn from_config(config: &FsriConfig) -> Result<Self> {
        let mut builder = Self::builder()
            .weights(config.weights)
            .forecast(config.forecast)
            .gate(config.gate)
            .rule_source(Arc::new(FileRuleSource::new(&config.paths.actions_file)))
            .calibration_file(&config.paths.calibration_file);
        if config.paths.log_path.is_some() || config.paths.event_log.is_some() {
            let mut telemetry = Telemetry::builder("signals");
            if let Some(path) = &config.paths.log_path {
                telemetry = telemetry.log_path(path);
            }
            if let Some(path) = &config.paths.event_log {
                let publisher = FileEventPublisher::new(path)
                    .with_context(|| format!("opening event log {}", path.display()))?;
                telemetry = telemetry.event_publisher(Arc::new(publisher));
            }
            builder = builder.telemetry(telemetry.build().context("building telemetry")?);
        }
        Ok(builder.build()?)
    }

    /// Fuses, projects and calibrates one set of pillar results.
    #[must_use]
    pub fn evaluate(&self, pillars: &PillarSet) -> FsriReport {
        let composite = self.engine.fuse(pillars);
        let horizons = self.forecaster.project(composite.fsri);
        let movement_event = self
            .calibrator()
            .predict(clamp_score(pillars.movement.score));
        let freshness = pillars
            .iter()
            .filter_map(|(pillar, result)| result.data_age_hours.map(|hours| (pillar, hours)))
            .collect();
        FsriReport {
            composite,
            timestamp: Utc::now(),
            horizons,
            movement_event,
            freshness,
        }
    }

    /// Evaluates and matches persona-scoped actions.
    #[must_use]
    pub fn signals(&self, request: &SignalRequest) -> SignalReport {
        let report = self.evaluate(&request.pillars);
        let snapshot = self.rules.snapshot();
        let query = MatchRequest {
            crop: &request.crop,
            region: &request.region,
            sub_scores: &report.composite.sub_scores,
            drivers: &report.composite.drivers,
            extras: request.extras,
            persona: request.persona.as_deref(),
        };
        let extras = query.effective_extras();
        let actions = snapshot.table.suggest(&query);

        let payload = json!({
            "crop": request.crop,
            "region": request.region,
            "fsri": report.composite.fsri,
            "confidence": report.composite.confidence,
            "known_ages": report.freshness.len(),
            "drivers": report.composite.drivers.len(),
            "actions": actions.len(),
            "rules_version": snapshot.version,
        });
        self.log(LogLevel::Info, "signals.evaluated", payload.clone());
        if let Some(telemetry) = &self.telemetry {
            let _ = telemetry.event(topics::SIGNALS_EVALUATED, payload);
        }
        SignalReport {
            report,
            actions,
            extras,
            rules_version: snapshot.version,
        }
    }

    /// Re-reads the rule source; see [`RuleStore::reload`].
    pub fn reload_actions(&self) -> Result<usize, ReloadError> {
        self.rules.reload()
    }

    /// Loads an artifact, applies the deployment gate and swaps it in.
    ///
    /// On any failure the serving calibrator is unchanged.
    pub fn redeploy_calibration(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<CalibrationParams, DeployError> {
        let path = path.as_ref();
        let params = CalibrationParams::read(path).map_err(|err| {
            self.log(
                LogLevel::Warn,
                "calibration.redeploy_failed",
                json!({ "path": path, "error": err.to_string() }),
            );
            err
        })?;
        let decision = self.gate.evaluate(&params);
        if !decision.passed {
            self.log(
                LogLevel::Warn,
                "calibration.redeploy_rejected",
                json!({ "path": path, "reasons": decision.reasons }),
            );
            return Err(DeployError::Rejected {
                path: path.to_path_buf(),
                reasons: decision.reasons,
            });
        }

        let calibrator =
            MovementCalibrator::from_params(params.clone(), ParamSource::Artifact(path.into()));
        *self.calibrator.write() = Arc::new(calibrator);
        let payload = json!({ "path": path, "a": params.a, "b": params.b, "metrics": params.metrics });
        self.log(LogLevel::Info, "calibration.redeployed", payload.clone());
        if let Some(telemetry) = &self.telemetry {
            let _ = telemetry.event(topics::CALIBRATION_REDEPLOYED, payload);
        }
        Ok(params)
    }

    /// Serving calibrator snapshot.
    #[must_use]
    pub fn calibrator(&self) -> Arc<MovementCalibrator> {
        Arc::clone(&self.calibrator.read())
    }

    /// Rule store.
    #[must_use]
    pub const fn rules(&self) -> &RuleStore {
        &self.rules
    }

    /// Fusion engine.
    #[must_use]
    pub const fn engine(&self) -> &FusionEngine {
        &self.engine
    }

    /// Deployment gate applied on redeploy.
    #[must_use]
    pub const fn gate(&self) -> &DeploymentGate {
        &self.gate
    }

    fn log(&self, level: LogLevel, message: &str, metadata: serde_json::Value) {
        if let Some(telemetry) = &self.telemetry {
            let _ = telemetry.log(level, message, metadata);
        }
    }
}

/// Builder for [`SignalRuntime`].
#[derive(Debug, Default)]
pub struct SignalRuntimeBuilder {
    weights: ScoringWeights,
    forecast: FilterParams,
    gate: DeploymentGate,
    rule_source: Option<Arc<dyn RuleSource>>,
    calibrator: Option<MovementCalibrator>,
    calibration_file: Option<PathBuf>,
    telemetry: Option<Telemetry>,
}

impl SignalRuntimeBuilder {
    /// Pillar weights; checked in [`Self::build`].
    #[must_use]
    pub const fn weights(mut self, weights: ScoringWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Forecaster parameters.
    #[must_use]
    pub const fn forecast(mut self, params: FilterParams) -> Self {
        self.forecast = params;
        self
    }

    /// Deployment gate.
    #[must_use]
    pub const fn gate(mut self, gate: DeploymentGate) -> Self {
        self.gate = gate;
        self
    }

    /// Rule document source; without one the table stays empty.
    #[must_use]
    pub fn rule_source(mut self, source: Arc<dyn RuleSource>) -> Self {
        self.rule_source = Some(source);
        self
    }

    /// Initial calibrator; takes precedence over [`Self::calibration_file`].
    #[must_use]
    pub fn calibrator(mut self, calibrator: MovementCalibrator) -> Self {
        self.calibrator = Some(calibrator);
        self
    }

    /// Artifact loaded at build time, falling back to defaults.
    #[must_use]
    pub fn calibration_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.calibration_file = Some(path.into());
        self
    }

    /// Telemetry shared by every component.
    #[must_use]
    pub fn telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Builds the runtime and performs the first rule load.
    ///
    /// A failing first rule load leaves the table empty; see
    /// [`RuleStore::startup_error`].
    pub fn build(self) -> Result<SignalRuntime, WeightsError> {
        let engine = FusionEngine::new(self.weights)?;
        let calibrator = self.calibrator.unwrap_or_else(|| {
            self.calibration_file
                .as_deref()
                .map_or_else(MovementCalibrator::default, MovementCalibrator::load_or_default)
        });
        let source: Arc<dyn RuleSource> = match self.rule_source {
            Some(source) => source,
            None => Arc::new(StaticRuleSource::default()),
        };
        let mut rules = RuleStore::new(source);
        if let Some(telemetry) = &self.telemetry {
            rules = rules.with_telemetry(telemetry.scoped("actions"));
        }
        if let Some(telemetry) = &self.telemetry {
            let _ = telemetry.log(
                LogLevel::Info,
                "calibration.loaded",
                json!({ "source": calibrator.source(), "a": calibrator.params().a, "b": calibrator.params().b }),
            );
        }
        Ok(SignalRuntime {
            engine,
            forecaster: HorizonForecaster::new(self.forecast),
            calibrator: RwLock::new(Arc::new(calibrator)),
            rules: rules.bootstrap(),
            gate: self.gate,
            telemetry: self.telemetry,
        })
    }
}
