use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use shared_logging::LogLevel;

use super::Sink;
use crate::{
    epoch::ResultRecord,
    error::SinkError,
    helper::{emit, EngineTelemetry},
};

/// Cloneable handle to one sink; every access holds a single lock.
#[derive(Clone, Debug)]
pub struct SharedRecorder {
    sink: Arc<Mutex<Sink>>,
    telemetry: Option<EngineTelemetry>,
}

impl SharedRecorder {
    /// Wraps a sink.
    #[must_use]
    pub fn new(sink: impl Into<Sink>) -> Self {
        Self {
            sink: Arc::new(Mutex::new(sink.into())),
            telemetry: None,
        }
    }

    /// Attaches telemetry used around persistence.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: Option<EngineTelemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Forwards one record to the sink under the lock.
    pub fn record(&self, record: ResultRecord) -> Result<(), SinkError> {
        self.sink.lock().accept(record)
    }

    /// Persists the sink.
    pub fn persist(&self) -> Result<(), SinkError> {
        let sink = self.sink.lock();
        let target = sink.target();
        emit(
            self.telemetry.as_ref(),
            LogLevel::Info,
            "sink.persist.start",
            json!({ "target": target, "records": sink.len() }),
        );
        sink.persist()?;
        emit(
            self.telemetry.as_ref(),
            LogLevel::Info,
            "sink.persist.finished",
            json!({ "target": target }),
        );
        Ok(())
    }

    /// Runs `inspect` against the sink while holding the lock.
    pub fn with_sink<R>(&self, inspect: impl FnOnce(&Sink) -> R) -> R {
        inspect(&self.sink.lock())
    }

    /// Whether both handles point at the same sink.
    #[must_use]
    pub fn same_sink(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.sink, &other.sink)
    }
}
