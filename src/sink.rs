//! Optional durable log sink for estimates, rule violations and quality results.
//!
//! The core never depends on a sink being present or healthy: every write
//! goes through [`log_best_effort`], which downgrades failures to a warning.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::{OrchestratorError, Result};
use crate::planning::ComplexityEstimate;
use crate::quality::{QualityResult, RuleViolation};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogRecord {
    ComplexityEstimate {
        estimate: ComplexityEstimate,
    },
    RuleViolation {
        project_id: String,
        task_id: Option<String>,
        violation: RuleViolation,
        recorded_at: DateTime<Utc>,
    },
    QualityResult {
        project_id: String,
        task_id: Option<String>,
        result: QualityResult,
    },
}

impl LogRecord {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ComplexityEstimate { .. } => "complexity_estimate",
            Self::RuleViolation { .. } => "rule_violation",
            Self::QualityResult { .. } => "quality_result",
        }
    }
}

#[async_trait]
pub trait LogSink: Send + Sync {
    async fn record(&self, record: &LogRecord) -> Result<()>;
}

/// Write a record, logging instead of propagating any sink failure.
pub async fn log_best_effort(sink: Option<&dyn LogSink>, record: LogRecord) {
    let Some(sink) = sink else {
        return;
    };
    if let Err(e) = sink.record(&record).await {
        warn!(error = %e, kind = record.kind(), "Log sink write failed, keeping in-memory record only");
    }
}

/// Appends one JSON document per line to a file.
pub struct JsonlLogSink {
    path: PathBuf,
}

impl JsonlLogSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl LogSink for JsonlLogSink {
    async fn record(&self, record: &LogRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| OrchestratorError::Sink(format!("{}: {e}", self.path.display())))?;
        file.write_all(line.as_bytes()).await?;

        debug!(kind = record.kind(), path = %self.path.display(), "Recorded log entry");
        Ok(())
    }
}
