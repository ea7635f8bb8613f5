use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use eventsignal_common::{ConfigIssue, ErrorKind, MethodKind, SourceConfig};

use crate::retry::RetryOutcome;

/// Per-source outcome of one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceDiagnostics {
    pub source: String,
    /// Absent when the site entry couldn't be decoded.
    pub method: Option<MethodKind>,
    pub attempted: bool,
    pub succeeded: bool,
    pub attempts: u32,
    pub raw_count: usize,
    pub normalized_count: usize,
    pub dropped_count: usize,
    pub error_kind: Option<ErrorKind>,
    pub error: Option<String>,
}

impl SourceDiagnostics {
    pub fn from_outcome(
        source: &SourceConfig,
        outcome: &RetryOutcome,
        normalized_count: usize,
        dropped_count: usize,
    ) -> Self {
        Self {
            source: source.name.clone(),
            method: Some(source.method_kind()),
            attempted: true,
            succeeded: outcome.succeeded(),
            attempts: outcome.attempts,
            raw_count: outcome.records.len(),
            normalized_count,
            dropped_count,
            error_kind: outcome.error.as_ref().map(|e| e.kind()),
            error: outcome.error.as_ref().map(|e| e.to_string()),
        }
    }

    /// A site entry rejected while loading the sites file. Never attempted.
    pub fn from_config_issue(issue: &ConfigIssue) -> Self {
        Self {
            source: issue
                .site
                .clone()
                .unwrap_or_else(|| format!("sites[{}]", issue.index)),
            method: None,
            attempted: false,
            succeeded: false,
            attempts: 0,
            raw_count: 0,
            normalized_count: 0,
            dropped_count: 0,
            error_kind: Some(ErrorKind::ConfigError),
            error: Some(issue.message.clone()),
        }
    }

    /// A source the run stopped before reaching.
    pub fn skipped(source: &SourceConfig) -> Self {
        Self {
            source: source.name.clone(),
            method: Some(source.method_kind()),
            attempted: false,
            succeeded: false,
            attempts: 0,
            raw_count: 0,
            normalized_count: 0,
            dropped_count: 0,
            error_kind: None,
            error: None,
        }
    }

    pub fn is_config_issue(&self) -> bool {
        !self.attempted && self.error_kind == Some(ErrorKind::ConfigError)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MethodTally {
    pub succeeded: u32,
    pub failed: u32,
}

/// Why a run stopped before its last source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Cancelled,
    RunTimeout,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::Cancelled => write!(f, "cancelled"),
            StopReason::RunTimeout => write!(f, "run timeout"),
        }
    }
}

/// Counts handed to the export and report collaborators.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub total_raw: usize,
    pub total_normalized: usize,
    pub total_dropped: usize,
    pub unique_events: usize,
    pub duplicates_removed: usize,
    pub successful_sources: u32,
    pub failed_sources: u32,
    pub config_issues: u32,
    /// Normalized events per source, largest first.
    pub events_per_source: Vec<(String, usize)>,
    pub by_method: BTreeMap<MethodKind, MethodTally>,
    pub stopped: Option<StopReason>,
    pub skipped_sources: Vec<String>,
}

impl RunSummary {
    pub fn build(
        run_id: &str,
        started_at: DateTime<Utc>,
        duration: Duration,
        diagnostics: &[SourceDiagnostics],
        unique_events: usize,
        duplicates_removed: usize,
        stopped: Option<StopReason>,
    ) -> Self {
        let mut summary = Self {
            run_id: run_id.to_string(),
            started_at,
            duration_secs: duration.as_secs_f64(),
            total_raw: 0,
            total_normalized: 0,
            total_dropped: 0,
            unique_events,
            duplicates_removed,
            successful_sources: 0,
            failed_sources: 0,
            config_issues: 0,
            events_per_source: Vec::new(),
            by_method: BTreeMap::new(),
            stopped,
            skipped_sources: Vec::new(),
        };

        let mut per_source: HashMap<&str, usize> = HashMap::new();
        for diag in diagnostics {
            if diag.is_config_issue() {
                summary.config_issues += 1;
                continue;
            }
            if !diag.attempted {
                summary.skipped_sources.push(diag.source.clone());
                continue;
            }

            summary.total_raw += diag.raw_count;
            summary.total_normalized += diag.normalized_count;
            summary.total_dropped += diag.dropped_count;
            *per_source.entry(diag.source.as_str()).or_default() += diag.normalized_count;

            let tally = diag
                .method
                .map(|method| summary.by_method.entry(method).or_default());
            if diag.succeeded {
                summary.successful_sources += 1;
                if let Some(tally) = tally {
                    tally.succeeded += 1;
                }
            } else {
                summary.failed_sources += 1;
                if let Some(tally) = tally {
                    tally.failed += 1;
                }
            }
        }

        let mut events_per_source: Vec<(String, usize)> = per_source
            .into_iter()
            .map(|(name, count)| (name.to_string(), count))
            .collect();
        events_per_source.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        summary.events_per_source = events_per_source;

        summary
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Event Scrape Complete ===")?;
        writeln!(f, "Run:                {}", self.run_id)?;
        writeln!(f, "Duration:           {:.1}s", self.duration_secs)?;
        writeln!(f, "Sites succeeded:    {}", self.successful_sources)?;
        writeln!(f, "Sites failed:       {}", self.failed_sources)?;
        if self.config_issues > 0 {
            writeln!(f, "Config issues:      {}", self.config_issues)?;
        }
        writeln!(f, "Raw events:         {}", self.total_raw)?;
        writeln!(f, "Dropped records:    {}", self.total_dropped)?;
        writeln!(f, "Duplicates removed: {}", self.duplicates_removed)?;
        writeln!(f, "Unique events:      {}", self.unique_events)?;

        if !self.by_method.is_empty() {
            writeln!(f, "\nBy method:")?;
            for (method, tally) in &self.by_method {
                writeln!(
                    f,
                    "  {:<14} {} ok, {} failed",
                    method.to_string(),
                    tally.succeeded,
                    tally.failed
                )?;
            }
        }

        if !self.events_per_source.is_empty() {
            writeln!(f, "\nEvents per source:")?;
            for (source, count) in &self.events_per_source {
                writeln!(f, "  {count:>4}  {source}")?;
            }
        }

        if let Some(reason) = self.stopped {
            writeln!(
                f,
                "\nStopped early ({reason}); {} source(s) not reached",
                self.skipped_sources.len()
            )?;
        }
        Ok(())
    }
}
