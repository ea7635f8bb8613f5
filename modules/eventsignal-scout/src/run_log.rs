//! Run log: persisted JSON timeline of every source visited during a run.
//!
//! Each run produces a single `{DATA_DIR}/runs/{run_id}.json` file holding the
//! run summary followed by an ordered list of timestamped entries.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use eventsignal_common::{DropReason, ErrorKind, MethodKind};

use crate::stats::{RunSummary, SourceDiagnostics, StopReason};

// --- RunLog ---

#[derive(Debug, Clone)]
pub struct RunLog {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    entries: Vec<RunEntry>,
    seq: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunEntry {
    pub seq: u32,
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    ConfigIssue {
        site: String,
        message: String,
    },
    SourceDisabled {
        source: String,
    },
    SourceStarted {
        source: String,
        method: MethodKind,
    },
    SourceFinished {
        source: String,
        method: Option<MethodKind>,
        succeeded: bool,
        attempts: u32,
        raw_count: usize,
        normalized_count: usize,
        dropped_count: usize,
        error_kind: Option<ErrorKind>,
        error: Option<String>,
    },
    RecordDropped {
        source: String,
        reason: DropReason,
        title: Option<String>,
        detail: Option<String>,
    },
    Deduplicated {
        unique: usize,
        duplicates_removed: usize,
    },
    RunStopped {
        reason: StopReason,
        sources_not_reached: Vec<String>,
    },
}

impl EventKind {
    pub fn source_finished(diag: &SourceDiagnostics) -> Self {
        EventKind::SourceFinished {
            source: diag.source.clone(),
            method: diag.method,
            succeeded: diag.succeeded,
            attempts: diag.attempts,
            raw_count: diag.raw_count,
            normalized_count: diag.normalized_count,
            dropped_count: diag.dropped_count,
            error_kind: diag.error_kind,
            error: diag.error.clone(),
        }
    }
}

impl RunLog {
    pub fn new(run_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: run_id.into(),
            started_at,
            entries: Vec::new(),
            seq: 0,
        }
    }

    pub fn log(&mut self, kind: EventKind) {
        self.entries.push(RunEntry {
            seq: self.seq,
            ts: Utc::now(),
            kind,
        });
        self.seq += 1;
    }

    pub fn entries(&self) -> &[RunEntry] {
        &self.entries
    }

    /// Serialize the run log to JSON under `{data_dir}/runs/`.
    /// Returns the file path on success.
    pub fn save(&self, summary: &RunSummary, data_dir: &Path) -> Result<PathBuf> {
        let dir = data_dir.join("runs");
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        let path = dir.join(format!("{}.json", self.run_id));

        let output = SerializedRunLog {
            run_id: &self.run_id,
            started_at: self.started_at,
            finished_at: Utc::now(),
            summary,
            entries: &self.entries,
        };

        std::fs::write(&path, serde_json::to_string_pretty(&output)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!(path = %path.display(), entries = self.entries.len(), "Run log saved");

        Ok(path)
    }
}

// --- Serialization wrapper ---

#[derive(Serialize)]
struct SerializedRunLog<'a> {
    run_id: &'a str,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    summary: &'a RunSummary,
    entries: &'a [RunEntry],
}
