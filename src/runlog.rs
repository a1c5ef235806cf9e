//! Run-scoped log sink.
//!
//! Every skip, fallback and failure is recorded here with the entity kind
//! and source id it concerns. Each workspace execution owns its own
//! `RunLog`; the records are merged and written out once the run ends.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{EntityKind, SourceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Warning,
    Failure,
    Status,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub workspace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<EntityKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<SourceId>,
    pub level: LogLevel,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct RunLog {
    workspace: String,
    records: Vec<LogRecord>,
}

impl RunLog {
    pub fn new(workspace: impl Into<String>) -> Self {
        Self {
            workspace: workspace.into(),
            records: Vec::new(),
        }
    }

    pub fn warn(&mut self, kind: EntityKind, source_id: Option<SourceId>, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(workspace = %self.workspace, %kind, source_id, "{message}");
        self.push(Some(kind), source_id, LogLevel::Warning, message);
    }

    pub fn fail(&mut self, kind: EntityKind, source_id: Option<SourceId>, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(workspace = %self.workspace, %kind, source_id, "{message}");
        self.push(Some(kind), source_id, LogLevel::Failure, message);
    }

    /// Terminal status line for the workspace.
    pub fn status(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(workspace = %self.workspace, "{message}");
        self.push(None, None, LogLevel::Status, message);
    }

    fn push(
        &mut self,
        kind: Option<EntityKind>,
        source_id: Option<SourceId>,
        level: LogLevel,
        message: String,
    ) {
        self.records.push(LogRecord {
            timestamp: Utc::now(),
            workspace: self.workspace.clone(),
            kind,
            source_id,
            level,
            message,
        });
    }

    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }

    pub fn count(&self, kind: EntityKind, level: LogLevel) -> usize {
        self.records
            .iter()
            .filter(|r| r.kind == Some(kind) && r.level == level)
            .count()
    }

    pub fn into_records(self) -> Vec<LogRecord> {
        self.records
    }
}

/// Write records as JSON lines, replacing whatever the file held before.
pub fn write_jsonl(path: &Path, records: &[LogRecord]) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for record in records {
        serde_json::to_writer(&mut out, record)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

/// Empty the log file so nothing from an earlier run survives this one.
pub fn truncate(path: &Path) -> Result<()> {
    File::create(path)?;
    Ok(())
}
