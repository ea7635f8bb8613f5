use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use eventsignal_common::{CanonicalEvent, DropDecision, LoadedSites, PipelineSettings};

use crate::dedup::Deduplicator;
use crate::extractors::Extractor;
use crate::normalizer::RecordNormalizer;
use crate::ratelimit::RateLimiter;
use crate::retry::{run_with_retry_until, within, RetryPolicy};
use crate::run_log::{EventKind, RunLog};
use crate::stats::{RunSummary, SourceDiagnostics, StopReason};

/// Everything a run produced. Events are final (normalized and deduplicated).
#[derive(Debug, Clone)]
pub struct RunReport {
    pub events: Vec<CanonicalEvent>,
    pub summary: RunSummary,
    pub diagnostics: Vec<SourceDiagnostics>,
    pub drops: Vec<DropDecision>,
    pub log: RunLog,
}

/// Sequential pass over the configured sources: extract with retry,
/// normalize, then deduplicate across sources.
pub struct Pipeline {
    extractor: Arc<dyn Extractor>,
    limiter: Arc<RateLimiter>,
    settings: PipelineSettings,
    cancelled: Arc<AtomicBool>,
    reference_date: Option<NaiveDate>,
}

impl Pipeline {
    pub fn new(
        extractor: Arc<dyn Extractor>,
        limiter: Arc<RateLimiter>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            extractor,
            limiter,
            settings,
            cancelled: Arc::new(AtomicBool::new(false)),
            reference_date: None,
        }
    }

    /// Share a cancellation flag with the caller (ctrl-c handler, supervisor).
    pub fn with_cancel_flag(mut self, cancelled: Arc<AtomicBool>) -> Self {
        self.cancelled = cancelled;
        self
    }

    /// Pin "today" for relative and yearless dates instead of the run's start.
    pub fn with_reference_date(mut self, reference: NaiveDate) -> Self {
        self.reference_date = Some(reference);
        self
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    pub async fn run(&self, sites: &LoadedSites) -> RunReport {
        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let clock = Instant::now();
        let deadline = self.settings.run_timeout().map(|limit| clock + limit);

        let mut normalizer =
            RecordNormalizer::new(started_at, self.settings.description_max_chars);
        if let Some(reference) = self.reference_date {
            normalizer = normalizer.with_reference_date(reference);
        }
        let policy = RetryPolicy::from_settings(&self.settings);

        info!(
            run_id = run_id.as_str(),
            sources = sites.sources.len(),
            disabled = sites.disabled.len(),
            config_issues = sites.issues.len(),
            reference_date = %normalizer.reference_date(),
            "Starting event scrape"
        );

        let mut log = RunLog::new(run_id.clone(), started_at);
        let mut diagnostics = Vec::with_capacity(sites.sources.len() + sites.issues.len());
        for issue in &sites.issues {
            let diag = SourceDiagnostics::from_config_issue(issue);
            log.log(EventKind::ConfigIssue {
                site: diag.source.clone(),
                message: issue.message.clone(),
            });
            diagnostics.push(diag);
        }
        for name in &sites.disabled {
            log.log(EventKind::SourceDisabled {
                source: name.clone(),
            });
        }

        let mut collected = Vec::new();
        let mut drops = Vec::new();
        let mut stopped = None;

        for (index, source) in sites.sources.iter().enumerate() {
            let mut reason = self.stop_reason(deadline);
            if reason.is_none() && within(deadline, self.limiter.wait_turn()).await.is_none() {
                reason = Some(StopReason::RunTimeout);
            }
            // The delay may have outlived a cancel request.
            if let Some(reason) = reason.or_else(|| self.stop_reason(deadline)) {
                stopped = Some((reason, index));
                break;
            }

            log.log(EventKind::SourceStarted {
                source: source.name.clone(),
                method: source.method_kind(),
            });

            let outcome = run_with_retry_until(
                self.extractor.as_ref(),
                source,
                &policy,
                &self.limiter,
                deadline,
            )
            .await;

            let (events, dropped) = normalizer.normalize_all(&outcome.records, source);
            let diag = SourceDiagnostics::from_outcome(source, &outcome, events.len(), dropped.len());
            for decision in &dropped {
                log.log(EventKind::RecordDropped {
                    source: decision.source.clone(),
                    reason: decision.reason,
                    title: decision.title.clone(),
                    detail: decision.detail.clone(),
                });
            }
            log.log(EventKind::source_finished(&diag));
            info!(
                source = source.name.as_str(),
                method = %source.method_kind(),
                succeeded = diag.succeeded,
                raw = diag.raw_count,
                normalized = diag.normalized_count,
                dropped = diag.dropped_count,
                "Source done"
            );

            diagnostics.push(diag);
            collected.extend(events);
            drops.extend(dropped);
        }

        let stop_reason = stopped.map(|(reason, from)| {
            let remaining = &sites.sources[from..];
            warn!(
                reason = %reason,
                remaining = remaining.len(),
                "Run stopped early, keeping events collected so far"
            );
            diagnostics.extend(remaining.iter().map(SourceDiagnostics::skipped));
            log.log(EventKind::RunStopped {
                reason,
                sources_not_reached: remaining.iter().map(|s| s.name.clone()).collect(),
            });
            reason
        });

        let dedup = Deduplicator::with_title_similarity(self.settings.title_similarity)
            .deduplicate(collected);
        log.log(EventKind::Deduplicated {
            unique: dedup.events.len(),
            duplicates_removed: dedup.duplicates_removed,
        });

        let summary = RunSummary::build(
            &run_id,
            started_at,
            clock.elapsed(),
            &diagnostics,
            dedup.events.len(),
            dedup.duplicates_removed,
            stop_reason,
        );

        RunReport {
            events: dedup.events,
            summary,
            diagnostics,
            drops,
            log,
        }
    }

    fn stop_reason(&self, deadline: Option<Instant>) -> Option<StopReason> {
        if self.cancelled.load(Ordering::Relaxed) {
            info!("Event scrape cancelled");
            return Some(StopReason::Cancelled);
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Some(StopReason::RunTimeout);
        }
        None
    }
}
