//! In-memory log sink that records everything written to it.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use pilot_orchestrator::error::{OrchestratorError, Result};
use pilot_orchestrator::sink::{LogRecord, LogSink};

#[derive(Debug, Default)]
pub struct RecordingSink {
    records: Mutex<Vec<LogRecord>>,
    failing: AtomicBool,
    attempts: Mutex<usize>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink that rejects every write.
    pub fn failing() -> Self {
        let sink = Self::default();
        sink.failing.store(true, Ordering::SeqCst);
        sink
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.records.lock().iter().map(LogRecord::kind).collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.records
            .lock()
            .iter()
            .filter(|r| r.kind() == kind)
            .count()
    }

    pub fn attempts(&self) -> usize {
        *self.attempts.lock()
    }
}

#[async_trait]
impl LogSink for RecordingSink {
    async fn record(&self, record: &LogRecord) -> Result<()> {
        *self.attempts.lock() += 1;
        if self.failing.load(Ordering::SeqCst) {
            return Err(OrchestratorError::Sink("recording sink offline".into()));
        }
        self.records.lock().push(record.clone());
        Ok(())
    }
}
