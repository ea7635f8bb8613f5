use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use eventsignal_common::{
    ExtractionError, ExtractionMethod, PipelineSettings, RawRecord, SourceConfig,
};

use crate::extractors::Extractor;
use crate::ratelimit::RateLimiter;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub backoff: Duration,
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &PipelineSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            backoff: settings.backoff(),
            attempt_timeout: settings.request_timeout(),
        }
    }

    /// Wall-clock cap on one attempt against `source`, or `None` when the
    /// attempt is left to bound itself.
    ///
    /// Vision sources walk several documents, each with its own timeout, so a
    /// single per-request cap would throw away documents already read. Rendered
    /// pages poll for their wait selector for up to `timeout` before the final
    /// capture.
    pub fn attempt_timeout_for(&self, source: &SourceConfig) -> Option<Duration> {
        match &source.method {
            ExtractionMethod::Vision(_) => None,
            ExtractionMethod::RenderedPage(params) => Some(
                self.attempt_timeout
                    .saturating_add(params.timeout.saturating_mul(3))
                    .saturating_add(params.additional_wait),
            ),
            _ => Some(self.attempt_timeout),
        }
    }
}

/// What one source produced after retries. `error` is set when the source
/// ended up failing; `records` is then empty.
#[derive(Debug, Clone)]
pub struct RetryOutcome {
    pub records: Vec<RawRecord>,
    pub attempts: u32,
    pub error: Option<ExtractionError>,
}

impl RetryOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Run an extractor with bounded attempts. Transient failures back off and
/// retry; deterministic ones (parse, configuration) stop immediately. Never
/// returns an error: exhaustion yields an empty outcome carrying the failure.
///
/// Every attempt after the first also takes a turn on `limiter`, so retries
/// respect the same minimum spacing as separate sources.
pub async fn run_with_retry(
    extractor: &dyn Extractor,
    source: &SourceConfig,
    policy: &RetryPolicy,
    limiter: &RateLimiter,
) -> RetryOutcome {
    run_with_retry_until(extractor, source, policy, limiter, None).await
}

/// [`run_with_retry`] that also gives up at `deadline`. An attempt cut short
/// by the deadline fails as `Timeout`; a deadline reached while backing off
/// keeps the last attempt's error. `attempts` counts the attempts actually
/// started either way.
pub async fn run_with_retry_until(
    extractor: &dyn Extractor,
    source: &SourceConfig,
    policy: &RetryPolicy,
    limiter: &RateLimiter,
    deadline: Option<Instant>,
) -> RetryOutcome {
    let max_attempts = policy.max_attempts.max(1);
    let cap = policy.attempt_timeout_for(source);
    let mut attempt = 0;

    loop {
        attempt += 1;

        let attempt_deadline = earliest(cap.and_then(|c| Instant::now().checked_add(c)), deadline);
        let result = match within(attempt_deadline, extractor.extract(source)).await {
            Some(result) => result,
            None if passed(deadline) => {
                warn!(source = source.name.as_str(), attempt, "Run deadline reached mid-source");
                return RetryOutcome {
                    records: Vec::new(),
                    attempts: attempt,
                    error: Some(ExtractionError::Timeout(format!(
                        "{}: run deadline reached",
                        source.name
                    ))),
                };
            }
            None => Err(ExtractionError::Timeout(format!(
                "{}: attempt exceeded {}s",
                source.name,
                cap.unwrap_or_default().as_secs()
            ))),
        };

        match result {
            Ok(records) => {
                info!(
                    source = source.name.as_str(),
                    attempt,
                    records = records.len(),
                    "Source extracted"
                );
                return RetryOutcome {
                    records,
                    attempts: attempt,
                    error: None,
                };
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                warn!(
                    source = source.name.as_str(),
                    attempt,
                    max_attempts,
                    backoff_secs = policy.backoff.as_secs_f64(),
                    error = %e,
                    "Extraction failed, retrying after backoff"
                );
                let pause = async {
                    tokio::time::sleep(policy.backoff).await;
                    limiter.wait_turn().await;
                };
                if within(deadline, pause).await.is_none() {
                    warn!(
                        source = source.name.as_str(),
                        attempt,
                        "Run deadline reached during backoff"
                    );
                    return RetryOutcome {
                        records: Vec::new(),
                        attempts: attempt,
                        error: Some(e),
                    };
                }
            }
            Err(e) => {
                warn!(
                    source = source.name.as_str(),
                    attempt,
                    kind = %e.kind(),
                    error = %e,
                    "Source failed"
                );
                return RetryOutcome {
                    records: Vec::new(),
                    attempts: attempt,
                    error: Some(e),
                };
            }
        }
    }
}

/// Drive `fut` to completion, or give up at `deadline`.
pub(crate) async fn within<F: Future>(deadline: Option<Instant>, fut: F) -> Option<F::Output> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, fut).await.ok(),
        None => Some(fut.await),
    }
}

fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn passed(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use eventsignal_common::{
        ErrorKind, ExtractionResult, MarkupParams, RawField, RenderParams, SelectorSet,
        VisionParams,
    };

    struct Scripted {
        calls: AtomicU32,
        fail_first: u32,
        error: ExtractionError,
    }

    impl Scripted {
        fn new(fail_first: u32, error: ExtractionError) -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail_first,
                error,
            }
        }
    }

    #[async_trait]
    impl Extractor for Scripted {
        async fn extract(&self, _source: &SourceConfig) -> ExtractionResult<Vec<RawRecord>> {
            let n = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
            if n <= self.fail_first {
                Err(self.error.clone())
            } else {
                Ok(vec![RawRecord::default().with(RawField::Title, "Story Time")])
            }
        }
    }

    struct Hangs;

    #[async_trait]
    impl Extractor for Hangs {
        async fn extract(&self, _source: &SourceConfig) -> ExtractionResult<Vec<RawRecord>> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Vec::new())
        }
    }

    fn source() -> SourceConfig {
        SourceConfig {
            name: "Library".into(),
            url: "https://library.example.org".into(),
            enabled: true,
            status: None,
            method: ExtractionMethod::StaticMarkup(MarkupParams {
                selectors: SelectorSet::default(),
            }),
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff: Duration::from_secs(30),
            attempt_timeout: Duration::from_secs(60),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn always_unreachable_is_attempted_max_times_with_backoff() {
        let extractor = Scripted::new(u32::MAX, ExtractionError::Unreachable("dns".into()));
        let start = Instant::now();

        let outcome =
            run_with_retry(&extractor, &source(), &policy(3), &RateLimiter::disabled()).await;

        assert_eq!(extractor.calls.load(Ordering::Relaxed), 3);
        assert_eq!(outcome.attempts, 3);
        assert!(outcome.records.is_empty());
        assert_eq!(outcome.error.map(|e| e.kind()), Some(ErrorKind::Unreachable));
        assert_eq!(start.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_then_success_keeps_records() {
        let extractor = Scripted::new(1, ExtractionError::Timeout("slow".into()));
        let outcome =
            run_with_retry(&extractor, &source(), &policy(2), &RateLimiter::disabled()).await;
        assert!(outcome.succeeded());
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.records.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn config_error_is_not_retried() {
        let extractor = Scripted::new(u32::MAX, ExtractionError::Config("bad selector".into()));
        let start = Instant::now();
        let outcome =
            run_with_retry(&extractor, &source(), &policy(3), &RateLimiter::disabled()).await;
        assert_eq!(extractor.calls.load(Ordering::Relaxed), 1);
        assert_eq!(outcome.error.map(|e| e.kind()), Some(ErrorKind::ConfigError));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn parse_error_is_not_retried() {
        let extractor = Scripted::new(u32::MAX, ExtractionError::Parse("bad ics".into()));
        let outcome =
            run_with_retry(&extractor, &source(), &policy(3), &RateLimiter::disabled()).await;
        assert_eq!(extractor.calls.load(Ordering::Relaxed), 1);
        assert!(!outcome.succeeded());
    }

    #[tokio::test(start_paused = true)]
    async fn hung_attempt_is_cut_off_as_timeout() {
        let outcome =
            run_with_retry(&Hangs, &source(), &policy(1), &RateLimiter::disabled()).await;
        assert_eq!(outcome.error.map(|e| e.kind()), Some(ErrorKind::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_during_backoff_reports_attempts_made() {
        let extractor = Scripted::new(u32::MAX, ExtractionError::Unreachable("dns".into()));
        let start = Instant::now();
        let deadline = start + Duration::from_secs(45);

        let outcome = run_with_retry_until(
            &extractor,
            &source(),
            &policy(3),
            &RateLimiter::disabled(),
            Some(deadline),
        )
        .await;

        assert_eq!(extractor.calls.load(Ordering::Relaxed), 2);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.error.map(|e| e.kind()), Some(ErrorKind::Unreachable));
        assert_eq!(start.elapsed(), Duration::from_secs(45));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_mid_attempt_is_a_timeout_on_that_attempt() {
        let deadline = Instant::now() + Duration::from_secs(10);
        let outcome = run_with_retry_until(
            &Hangs,
            &source(),
            &policy(3),
            &RateLimiter::disabled(),
            Some(deadline),
        )
        .await;
        assert_eq!(outcome.attempts, 1);
        let err = outcome.error.unwrap();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.to_string().contains("run deadline reached"));
    }

    #[test]
    fn vision_attempts_are_not_capped_and_rendered_attempts_cover_polling() {
        let policy = policy(1);
        let vision = SourceConfig {
            method: ExtractionMethod::Vision(VisionParams {
                image_selector: "img".into(),
                image_urls: Vec::new(),
            }),
            ..source()
        };
        assert_eq!(policy.attempt_timeout_for(&vision), None);

        let rendered = SourceConfig {
            method: ExtractionMethod::RenderedPage(RenderParams {
                selectors: SelectorSet::default(),
                wait_selector: Some(".event-card".into()),
                timeout: Duration::from_secs(30),
                additional_wait: Duration::from_secs(2),
                allow_partial: false,
            }),
            ..source()
        };
        assert_eq!(
            policy.attempt_timeout_for(&rendered),
            Some(Duration::from_secs(60 + 90 + 2))
        );
        assert_eq!(policy.attempt_timeout_for(&source()), Some(Duration::from_secs(60)));
    }
}
