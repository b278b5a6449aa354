use std::{
    fmt, fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::{Mutex, RwLock};
use serde_json::json;
use shared_event_bus::topics;
use shared_logging::{LogLevel, Telemetry};
use thiserror::Error;

use crate::{
    matcher::{ActionSuggestion, MatchRequest},
    rules::{RuleError, RuleIssue, RuleTable},
};

/// Where rule documents are read from.
pub trait RuleSource: Send + Sync + fmt::Debug {
    /// Human-readable origin, used in logs and errors.
    fn describe(&self) -> String;

    /// Reads the current document text.
    fn read(&self) -> std::io::Result<String>;
}

/// Rules read from a file on every reload.
#[derive(Debug, Clone)]
pub struct FileRuleSource {
    path: PathBuf,
}

impl FileRuleSource {
    /// Creates a source for `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Rule file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RuleSource for FileRuleSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn read(&self) -> std::io::Result<String> {
        fs::read_to_string(&self.path)
    }
}

/// Rules held in memory, replaceable for tests and embedding.
#[derive(Debug, Default)]
pub struct StaticRuleSource {
    document: Mutex<String>,
}

impl StaticRuleSource {
    /// Creates a source holding `document`.
    pub fn new(document: impl Into<String>) -> Self {
        Self {
            document: Mutex::new(document.into()),
        }
    }

    /// Replaces the document seen by the next reload.
    pub fn replace(&self, document: impl Into<String>) {
        *self.document.lock() = document.into();
    }
}

impl RuleSource for StaticRuleSource {
    fn describe(&self) -> String {
        "<static>".to_string()
    }

    fn read(&self) -> std::io::Result<String> {
        Ok(self.document.lock().clone())
    }
}

/// Why a reload left the active table untouched.
#[derive(Debug, Error)]
pub enum ReloadError {
    /// The source could not be read.
    #[error("reading rule source {source_name}: {error}")]
    Read {
        /// [`RuleSource::describe`] of the source.
        source_name: String,
        /// Underlying error.
        error: std::io::Error,
    },
    /// The document was rejected.
    #[error("rule source {source_name}: {error}")]
    Rules {
        /// [`RuleSource::describe`] of the source.
        source_name: String,
        /// Syntax or schema failure.
        error: RuleError,
    },
}

impl ReloadError {
    /// Schema issues, empty for read and syntax failures.
    #[must_use]
    pub fn issues(&self) -> &[RuleIssue] {
        match self {
            Self::Read { .. } => &[],
            Self::Rules { error, .. } => error.issues(),
        }
    }
}

/// An immutable, versioned rule table.
#[derive(Debug, Default, PartialEq)]
pub struct RuleSnapshot {
    /// Increments on every successful reload; 0 is the empty startup table.
    pub version: u64,
    /// Validated rules.
    pub table: RuleTable,
}

/// Process-wide rule table with validate-then-swap reloads.
pub struct RuleStore {
    source: Arc<dyn RuleSource>,
    active: RwLock<Arc<RuleSnapshot>>,
    startup_error: Mutex<Option<String>>,
    telemetry: Option<Telemetry>,
}

impl fmt::Debug for RuleStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("RuleStore")
            .field("source", &self.source.describe())
            .field("version", &snapshot.version)
            .field("rules", &snapshot.table.rule_count())
            .finish_non_exhaustive()
    }
}

impl RuleStore {
    /// Store with an empty table; nothing is read until [`Self::reload`].
    pub fn new(source: Arc<dyn RuleSource>) -> Self {
        Self {
            source,
            active: RwLock::new(Arc::new(RuleSnapshot::default())),
            startup_error: Mutex::new(None),
            telemetry: None,
        }
    }

    /// Store reading `path`, loaded immediately.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(FileRuleSource::new(path))).bootstrap()
    }

    /// Attaches telemetry.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Attempts the first load.
    ///
    /// A failure leaves the empty table active and is kept for
    /// [`Self::startup_error`]; the next explicit reload reports it again.
    #[must_use]
    pub fn bootstrap(self) -> Self {
        if let Err(err) = self.reload() {
            *self.startup_error.lock() = Some(err.to_string());
        }
        self
    }

    /// Re-reads and re-validates the source, swapping on success.
    ///
    /// Returns the validated rule count. On failure the active table is
    /// untouched.
    pub fn reload(&self) -> Result<usize, ReloadError> {
        match self.load() {
            Ok(table) => {
                let count = table.rule_count();
                let buckets = table.keys().count();
                let version = {
                    let mut active = self.active.write();
                    let version = active.version + 1;
                    *active = Arc::new(RuleSnapshot { version, table });
                    version
                };
                self.startup_error.lock().take();
                let payload = json!({
                    "source": self.source.describe(),
                    "rules": count,
                    "buckets": buckets,
                    "version": version,
                });
                self.log(LogLevel::Info, "actions.reloaded", &payload);
                self.emit(topics::RULES_RELOADED, payload);
                Ok(count)
            }
            Err(err) => {
                let payload = json!({
                    "source": self.source.describe(),
                    "error": err.to_string(),
                    "issues": err.issues(),
                    "version": self.version(),
                });
                self.log(LogLevel::Warn, "actions.reload_failed", &payload);
                self.emit(topics::RULES_RELOAD_FAILED, payload);
                Err(err)
            }
        }
    }

    /// Current table; unaffected by later reloads.
    #[must_use]
    pub fn snapshot(&self) -> Arc<RuleSnapshot> {
        Arc::clone(&self.active.read())
    }

    /// Version of the active table.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.active.read().version
    }

    /// Failure of the startup load, cleared by the first successful reload.
    #[must_use]
    pub fn startup_error(&self) -> Option<String> {
        self.startup_error.lock().clone()
    }

    /// Origin of the rule documents.
    #[must_use]
    pub fn source(&self) -> &dyn RuleSource {
        &*self.source
    }

    /// Matches against the active table.
    #[must_use]
    pub fn suggest(&self, request: &MatchRequest<'_>) -> Vec<ActionSuggestion> {
        self.snapshot().table.suggest(request)
    }

    fn load(&self) -> Result<RuleTable, ReloadError> {
        let text = self.source.read().map_err(|error| ReloadError::Read {
            source_name: self.source.describe(),
            error,
        })?;
        RuleTable::parse(&text).map_err(|error| ReloadError::Rules {
            source_name: self.source.describe(),
            error,
        })
    }

    fn log(&self, level: LogLevel, message: &str, payload: &serde_json::Value) {
        if let Some(telemetry) = &self.telemetry {
            let _ = telemetry.log(level, message, payload.clone());
        }
    }

    fn emit(&self, topic: &str, payload: serde_json::Value) {
        if let Some(telemetry) = &self.telemetry {
            let _ = telemetry.event(topic, payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fsri_fusion::SubScores;
    use shared_event_bus::MemoryEventBus;
    use tempfile::tempdir;

    const VALID: &str = r"
corn.us:
  - persona: farmer
    when: { pillar: production, threshold: 60 }
    do: [Scout fields]
  - persona: buyer
    when: { pillar: movement, threshold: 50 }
    do: [Book rail capacity]
";

    const INVALID: &str = r"
corn.us:
  - persona: farmer
    when: { pillar: production, threshold: 60 }
    do: [Scout fields]
soy.br:
  - persona: trader
    when: { pillar: policy, threshold: lots }
    do: [Watch export quotas]
";

    #[test]
    fn invalid_reload_keeps_previous_table() {
        let source = Arc::new(StaticRuleSource::new(VALID));
        let store = RuleStore::new(source.clone());
        assert_eq!(store.reload().unwrap(), 2);
        let before = store.snapshot();

        source.replace(INVALID);
        let err = store.reload().unwrap_err();
        let issue = &err.issues()[0];
        assert_eq!(issue.bucket, "soy.br");
        assert_eq!(issue.index, Some(0));
        assert_eq!(issue.field.as_deref(), Some("when.threshold"));
        assert!(Arc::ptr_eq(&before, &store.snapshot()));
        assert_eq!(store.version(), 1);
    }

    #[test]
    fn reload_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("actions.yaml");
        fs::write(&path, VALID).unwrap();
        let store = RuleStore::open(&path);
        let first = store.snapshot();
        assert_eq!(store.reload().unwrap(), 2);
        let second = store.snapshot();
        assert_eq!(first.table, second.table);
        assert_eq!(second.version, first.version + 1);
    }

    #[test]
    fn failed_startup_load_is_inert_and_recoverable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("actions.yaml");
        let store = RuleStore::open(&path);
        assert!(store.snapshot().table.is_empty());
        assert_eq!(store.version(), 0);
        assert!(store.startup_error().is_some());

        let sub_scores = SubScores {
            production: 90.0,
            ..SubScores::default()
        };
        let request = MatchRequest {
            crop: "corn",
            region: "us",
            sub_scores: &sub_scores,
            drivers: &[],
            extras: None,
            persona: None,
        };
        assert!(store.suggest(&request).is_empty());
        assert!(matches!(store.reload(), Err(ReloadError::Read { .. })));

        fs::write(&path, VALID).unwrap();
        assert_eq!(store.reload().unwrap(), 2);
        assert!(store.startup_error().is_none());
        assert_eq!(store.suggest(&request).len(), 1);
    }

    #[test]
    fn reloads_are_logged_and_published() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("actions.log");
        let bus = Arc::new(MemoryEventBus::new(8));
        let telemetry = Telemetry::builder("actions")
            .log_path(&log_path)
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        let source = Arc::new(StaticRuleSource::new(VALID));
        let store = RuleStore::new(source.clone()).with_telemetry(telemetry);
        store.reload().unwrap();
        source.replace("corn.us: {}");
        store.reload().unwrap_err();

        assert_eq!(bus.snapshot_of(topics::RULES_RELOADED).len(), 1);
        let failed = bus.snapshot_of(topics::RULES_RELOAD_FAILED);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].payload["issues"][0]["bucket"], "corn.us");
        let log = fs::read_to_string(&log_path).unwrap();
        assert!(log.contains("actions.reloaded"));
        assert!(log.contains("actions.reload_failed"));
    }
}
