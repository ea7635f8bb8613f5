use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use eventsignal_common::CanonicalEvent;

use crate::stats::RunSummary;

/// Receives the final event set of a run.
pub trait EventExporter: Send + Sync {
    /// Returns where the events ended up.
    fn export(&self, events: &[CanonicalEvent], summary: &RunSummary) -> Result<PathBuf>;
}

/// Writes `{data_dir}/events/{run_id}.json`.
pub struct JsonFileExporter {
    data_dir: PathBuf,
}

impl JsonFileExporter {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

#[derive(Serialize)]
struct EventsFile<'a> {
    run_id: &'a str,
    exported_at: DateTime<Utc>,
    event_count: usize,
    summary: &'a RunSummary,
    events: &'a [CanonicalEvent],
}

impl EventExporter for JsonFileExporter {
    fn export(&self, events: &[CanonicalEvent], summary: &RunSummary) -> Result<PathBuf> {
        let dir = self.data_dir.join("events");
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let path = dir.join(format!("{}.json", summary.run_id));

        let file = EventsFile {
            run_id: &summary.run_id,
            exported_at: Utc::now(),
            event_count: events.len(),
            summary,
            events,
        };
        std::fs::write(&path, serde_json::to_string_pretty(&file)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        info!(path = %path.display(), events = events.len(), "Events exported");
        Ok(path)
    }
}
