use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use serde_json::Value;
use shared_event_bus::{EventPublisher, EventRecord};
use tokio::runtime::{Builder, Handle, Runtime};

use crate::{JsonLogger, LogLevel, LogRecord};

/// Builder for [`Telemetry`] handles.
pub struct TelemetryBuilder {
    module: String,
    log_path: Option<PathBuf>,
    min_level: LogLevel,
    event_publisher: Option<Arc<dyn EventPublisher>>,
}

impl TelemetryBuilder {
    /// Creates the builder for the named component.
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            log_path: None,
            min_level: LogLevel::Debug,
            event_publisher: None,
        }
    }

    /// Writes JSON-lines logs to `path`.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Drops log records below `level`.
    #[must_use]
    pub const fn min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    /// Publishes events through `publisher`.
    #[must_use]
    pub fn event_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.event_publisher = Some(publisher);
        self
    }

    /// Builds the handle, opening the log file if one was configured.
    pub fn build(self) -> Result<Telemetry> {
        let logger = match self.log_path {
            Some(path) => Some(JsonLogger::with_min_level(path, self.min_level)?),
            None => None,
        };
        let events = match self.event_publisher {
            Some(publisher) => Some(EventHandle::new(publisher)?),
            None => None,
        };
        Ok(Telemetry {
            module: Arc::from(self.module),
            sinks: Arc::new(Sinks { logger, events }),
        })
    }
}

/// Cloneable telemetry handle; scoped copies share the same sinks.
#[derive(Clone)]
pub struct Telemetry {
    module: Arc<str>,
    sinks: Arc<Sinks>,
}

impl fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Telemetry")
            .field("module", &self.module)
            .field("logs", &self.sinks.logger.is_some())
            .field("events", &self.sinks.events.is_some())
            .finish()
    }
}

struct Sinks {
    logger: Option<JsonLogger>,
    events: Option<EventHandle>,
}

struct EventHandle {
    /// Only driven outside async contexts; taken on drop.
    runtime: Option<Runtime>,
    publisher: Arc<dyn EventPublisher>,
}

impl EventHandle {
    fn new(publisher: Arc<dyn EventPublisher>) -> Result<Self> {
        Ok(Self {
            runtime: Some(Builder::new_current_thread().build()?),
            publisher,
        })
    }

    fn publish(&self, record: EventRecord) -> Result<()> {
        if let Ok(handle) = Handle::try_current() {
            let publisher = Arc::clone(&self.publisher);
            handle.spawn(async move {
                if let Err(err) = publisher.publish(record).await {
                    eprintln!("telemetry event publish failed: {err:?}");
                }
            });
            Ok(())
        } else if let Some(runtime) = &self.runtime {
            runtime.block_on(self.publisher.publish(record))
        } else {
            Ok(())
        }
    }
}

impl Drop for EventHandle {
    fn drop(&mut self) {
        // Blocking shutdown panics on async worker threads.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl Telemetry {
    /// Returns a builder.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> TelemetryBuilder {
        TelemetryBuilder::new(module)
    }

    /// A handle with no sinks; every call is a no-op.
    #[must_use]
    pub fn disabled(module: impl Into<String>) -> Self {
        let module: String = module.into();
        Self {
            module: Arc::from(module),
            sinks: Arc::new(Sinks {
                logger: None,
                events: None,
            }),
        }
    }

    /// Same sinks, different component name.
    #[must_use]
    pub fn scoped(&self, module: impl Into<String>) -> Self {
        let module: String = module.into();
        Self {
            module: Arc::from(module),
            sinks: Arc::clone(&self.sinks),
        }
    }

    /// Component name stamped on records and events.
    #[must_use]
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Logs structured metadata.
    pub fn log(&self, level: LogLevel, message: &str, metadata: Value) -> Result<()> {
        if let Some(logger) = &self.sinks.logger {
            let record = LogRecord::new(&*self.module, level, message).with_metadata(metadata);
            logger.log(&record)?;
        }
        Ok(())
    }

    /// Emits an event.
    pub fn event(&self, event_type: &str, payload: Value) -> Result<()> {
        if let Some(handle) = &self.sinks.events {
            handle.publish(EventRecord::new(&*self.module, event_type, payload))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared_event_bus::{topics, MemoryEventBus};
    use tempfile::tempdir;

    #[test]
    fn telemetry_writes_log_and_event() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("fsri.log");
        let bus = Arc::new(MemoryEventBus::new(16));
        let telemetry = Telemetry::builder("signals")
            .log_path(&path)
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        let actions = telemetry.scoped("actions");
        actions
            .log(LogLevel::Info, "actions.reloaded", json!({ "rules": 4 }))
            .unwrap();
        actions
            .event(topics::RULES_RELOADED, json!({ "rules": 4 }))
            .unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"module\":\"actions\""));
        let events = bus.snapshot();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].source, "actions");
    }

    #[test]
    fn disabled_handle_is_silent() {
        let telemetry = Telemetry::disabled("fusion");
        telemetry
            .log(LogLevel::Error, "fusion.evaluated", json!({}))
            .unwrap();
        telemetry.event(topics::SIGNALS_EVALUATED, json!({})).unwrap();
        assert_eq!(telemetry.module(), "fusion");
    }

    #[tokio::test]
    async fn handle_can_be_dropped_inside_async_context() {
        let bus = Arc::new(MemoryEventBus::new(16));
        let telemetry = Telemetry::builder("actions")
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        let scoped = telemetry.scoped("signals");
        scoped
            .event(topics::RULES_RELOADED, json!({ "rules": 1 }))
            .unwrap();
        drop(telemetry);
        drop(scoped);
        for _ in 0..10 {
            if !bus.snapshot().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(bus.snapshot_of(topics::RULES_RELOADED).len(), 1);
    }
}
