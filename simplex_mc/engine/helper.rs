use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use rand::Rng;
use serde_json::Value;
use shared_logging::{JsonLogger, LogLevel, LogRecord};

/// Telemetry builder for the study engine.
pub struct EngineTelemetryBuilder {
    module: String,
    log_path: Option<PathBuf>,
    console: bool,
    threshold: LogLevel,
}

impl EngineTelemetryBuilder {
    /// Creates a new builder scoped to a module label.
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            log_path: None,
            console: false,
            threshold: LogLevel::Info,
        }
    }

    /// Writes JSON lines to this file.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Writes JSON lines to stderr when no log file is set.
    #[must_use]
    pub const fn console(mut self, enabled: bool) -> Self {
        self.console = enabled;
        self
    }

    /// Minimum level written.
    #[must_use]
    pub const fn threshold(mut self, level: LogLevel) -> Self {
        self.threshold = level;
        self
    }

    /// Builds telemetry.
    pub fn build(self) -> Result<EngineTelemetry> {
        let logger = match (self.log_path, self.console) {
            (Some(path), _) => Some(JsonLogger::new(path)?.with_threshold(self.threshold)),
            (None, true) => Some(JsonLogger::stderr().with_threshold(self.threshold)),
            (None, false) => None,
        };
        Ok(EngineTelemetry {
            inner: Arc::new(TelemetryInner {
                module: self.module,
                logger,
            }),
        })
    }
}

/// Cloneable telemetry handle shared by the scheduler, workers, and sinks.
#[derive(Clone)]
pub struct EngineTelemetry {
    inner: Arc<TelemetryInner>,
}

impl fmt::Debug for EngineTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineTelemetry")
            .field("module", &self.inner.module)
            .finish()
    }
}

struct TelemetryInner {
    module: String,
    logger: Option<JsonLogger>,
}

impl EngineTelemetry {
    /// Returns a builder.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> EngineTelemetryBuilder {
        EngineTelemetryBuilder::new(module)
    }

    /// Logs an event with JSON object metadata.
    pub fn log(&self, level: LogLevel, message: &str, metadata: Value) -> Result<()> {
        if let Some(logger) = &self.inner.logger {
            if !logger.enabled(level) {
                return Ok(());
            }
            let record = LogRecord::new(&self.inner.module, level, message).with_metadata(&metadata);
            logger.log(&record)?;
        }
        Ok(())
    }

    /// Module label attached to every record.
    #[must_use]
    pub fn module(&self) -> &str {
        &self.inner.module
    }
}

/// Logs through an optional telemetry handle, ignoring logging failures.
pub(crate) fn emit(telemetry: Option<&EngineTelemetry>, level: LogLevel, message: &str, metadata: Value) {
    if let Some(tel) = telemetry {
        let _ = tel.log(level, message, metadata);
    }
}

/// Generates a random base seed for studies that do not pin one.
#[must_use]
pub fn random_seed() -> u64 {
    rand::thread_rng().gen()
}
