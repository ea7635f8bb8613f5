//! End-to-end pipeline runs against mocked fetcher, renderer and vision service.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::time::Instant;

use eventsignal_common::{
    parse_sites, ErrorKind, ExtractionError, ExtractionResult, LoadedSites, PipelineSettings,
    RawRecord, SourceConfig,
};
use eventsignal_scout::extractors::{Extractor, MethodExtractor};
use eventsignal_scout::ratelimit::RateLimiter;
use eventsignal_scout::stats::StopReason;
use eventsignal_scout::testing::{
    feed_source, markup_source, raw_event, rendered_source, vision_source, MockFetcher,
    MockRenderer, MockVision, ScriptedExtractor,
};
use eventsignal_scout::Pipeline;

const LIBRARY_ICS: &str = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
PRODID:-//Central Library//Events//EN\r\n\
BEGIN:VEVENT\r\n\
UID:story-time-0305@library.example.org\r\n\
DTSTAMP:20250101T000000Z\r\n\
SUMMARY:Story Time\r\n\
DTSTART:20250305T100000\r\n\
LOCATION:Main Library\r\n\
URL:https://library.example.org/events/story-time\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
UID:chess-0306@library.example.org\r\n\
DTSTAMP:20250101T000000Z\r\n\
SUMMARY:Teen Chess Club\r\n\
DTSTART:20250306T160000\r\n\
LOCATION:Main Library\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

const LIBRARY_PAGE: &str = r#"
<html><body>
  <div class="event">
    <h3 class="title">Story  Time!</h3>
    <p class="description">Songs, rhymes &amp; picture books.</p>
    <span class="date">March 5, 2025</span>
    <span class="time">10:00 AM</span>
    <span class="location">Main Library</span>
    <span class="age">Ages 3-5</span>
    <a class="event-link" href="/kids/story-time">Details</a>
    <img src="/img/story.png">
  </div>
  <div class="event">
    <h3 class="title">Pottery for Adults</h3>
    <span class="date">March 7, 2025</span>
    <span class="time">6pm</span>
  </div>
  <div class="event">
    <h3 class="title">Garden Walk</h3>
    <span class="date">Sat, Mar 8</span>
  </div>
</body></html>
"#;

fn reference() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 15).unwrap()
}

fn sites(sources: Vec<SourceConfig>, settings: PipelineSettings) -> LoadedSites {
    LoadedSites {
        settings,
        sources,
        disabled: Vec::new(),
        issues: Vec::new(),
    }
}

fn method_pipeline(
    fetcher: Arc<MockFetcher>,
    renderer: MockRenderer,
    vision: Option<MockVision>,
    settings: PipelineSettings,
) -> Pipeline {
    let limiter = Arc::new(RateLimiter::disabled());
    let vision = vision.map(|v| Arc::new(v) as Arc<dyn eventsignal_scout::vision::VisionService>);
    let extractor = MethodExtractor::new(fetcher, Arc::new(renderer), vision, limiter.clone());
    Pipeline::new(Arc::new(extractor), limiter, settings).with_reference_date(reference())
}

#[tokio::test]
async fn feed_and_markup_sources_merge_into_distinct_events() {
    let fetcher = Arc::new(
        MockFetcher::new()
            .on_bytes("https://library.example.org/events.ics", "text/calendar", LIBRARY_ICS.as_bytes())
            .on_text("https://library.example.org/events", LIBRARY_PAGE),
    );
    let sources = vec![
        feed_source(
            "Library Calendar",
            "https://library.example.org",
            "https://library.example.org/events.ics",
        ),
        markup_source("Library Website", "https://library.example.org/events"),
    ];

    let report = method_pipeline(fetcher, MockRenderer::new(), None, PipelineSettings::default())
        .run(&sites(sources, PipelineSettings::default()))
        .await;

    let titles: Vec<_> = report.events.iter().map(|e| e.title.as_str()).collect();
    assert_eq!(titles, ["Story Time!", "Teen Chess Club", "Pottery for Adults", "Garden Walk"]);
    assert_eq!(report.summary.total_raw, 5);
    assert_eq!(report.summary.duplicates_removed, 1);
    assert_eq!(report.summary.unique_events, 4);

    let story = &report.events[0];
    assert_eq!(story.when_date.to_string(), "2025-03-05");
    assert_eq!(story.when_time.map(|t| t.to_string()).as_deref(), Some("10:00 AM"));
    assert_eq!(story.description.as_deref(), Some("Songs, rhymes & picture books."));
    assert_eq!(story.target_age.as_deref(), Some("Ages 3-5"));
    assert_eq!(
        story.image_url.as_deref(),
        Some("https://library.example.org/img/story.png")
    );
    assert_eq!(
        story.event_url.as_deref(),
        Some("https://library.example.org/kids/story-time")
    );
    assert_eq!(story.source_organization.names(), ["Library Calendar", "Library Website"]);

    let garden = &report.events[3];
    assert_eq!(garden.when_date.to_string(), "2025-03-08");
    assert_eq!(garden.when_time, None);
}

#[tokio::test(start_paused = true)]
async fn unreachable_source_is_retried_then_isolated() {
    let fetcher = Arc::new(
        MockFetcher::new()
            .on_error(
                "https://down.example.org",
                ExtractionError::Unreachable("connection refused".into()),
            )
            .on_text("https://library.example.org/events", LIBRARY_PAGE),
    );
    let settings = PipelineSettings {
        max_attempts: 3,
        backoff_secs: 30.0,
        ..PipelineSettings::default()
    };
    let sources = vec![
        markup_source("Down Site", "https://down.example.org"),
        markup_source("Library Website", "https://library.example.org/events"),
    ];

    let start = Instant::now();
    let report = method_pipeline(fetcher.clone(), MockRenderer::new(), None, settings.clone())
        .run(&sites(sources, settings))
        .await;

    let down_requests = fetcher
        .requests()
        .iter()
        .filter(|url| url.as_str() == "https://down.example.org")
        .count();
    assert_eq!(down_requests, 3);
    assert!(start.elapsed() >= Duration::from_secs(60));

    let down = &report.diagnostics[0];
    assert!(down.attempted && !down.succeeded);
    assert_eq!(down.attempts, 3);
    assert_eq!(down.error_kind, Some(ErrorKind::Unreachable));
    assert_eq!(down.raw_count, 0);

    assert_eq!(report.events.len(), 3);
    assert_eq!(report.summary.failed_sources, 1);
    assert_eq!(report.summary.successful_sources, 1);
}

#[tokio::test]
async fn malformed_site_entry_is_reported_and_the_rest_still_run() {
    let loaded = parse_sites(
        r#"
        [settings]
        min_delay_secs = 0.0
        max_delay_secs = 0.0

        [[sites]]
        name = "Mystery"
        url = "https://mystery.example.org"
        method = "carrier-pigeon"

        [[sites]]
        name = "Library Website"
        url = "https://library.example.org/events"
        method = "html"
        "#,
    )
    .unwrap();
    assert_eq!(loaded.issues.len(), 1);

    let fetcher =
        Arc::new(MockFetcher::new().on_text("https://library.example.org/events", LIBRARY_PAGE));
    let report = method_pipeline(fetcher, MockRenderer::new(), None, loaded.settings.clone())
        .run(&loaded)
        .await;

    assert_eq!(report.events.len(), 3);
    assert_eq!(report.summary.config_issues, 1);
    let issue = &report.diagnostics[0];
    assert_eq!(issue.source, "Mystery");
    assert!(!issue.attempted);
    assert_eq!(issue.error_kind, Some(ErrorKind::ConfigError));
}

#[tokio::test]
async fn vision_source_keeps_going_past_a_failed_document() {
    let fetcher = Arc::new(
        MockFetcher::new()
            .on_bytes("https://seniors.example.org/flyers/march.png", "image/png", b"\x89PNG march")
            .on_bytes("https://seniors.example.org/flyers/april.pdf", "application/pdf", b"%PDF-1.4 april"),
    );
    let vision = MockVision::new()
        .failing(ExtractionError::Service("overloaded".into()))
        .answering(
            r#"```json
[{"title": "Senior Bingo", "when_date": "2025-04-11", "when_time": "1:00 PM", "location": "Senior Center", "target_age": "55+"}]
```"#,
        );
    let sources = vec![vision_source(
        "Senior Center",
        "https://seniors.example.org/flyers",
        &[
            "https://seniors.example.org/flyers/march.png",
            "https://seniors.example.org/flyers/april.pdf",
        ],
    )];

    let report = method_pipeline(fetcher, MockRenderer::new(), Some(vision), PipelineSettings::default())
        .run(&sites(sources, PipelineSettings::default()))
        .await;

    assert!(report.diagnostics[0].succeeded);
    assert_eq!(report.events.len(), 1);
    let bingo = &report.events[0];
    assert_eq!(bingo.title, "Senior Bingo");
    assert_eq!(bingo.when_time.map(|t| t.to_string()).as_deref(), Some("01:00 PM"));
}

#[tokio::test(start_paused = true)]
async fn slow_vision_documents_are_all_kept_past_the_request_timeout() {
    let flyers = [
        "https://seniors.example.org/flyers/march.png",
        "https://seniors.example.org/flyers/april.png",
        "https://seniors.example.org/flyers/may.png",
    ];
    let fetcher = flyers.iter().fold(MockFetcher::new(), |fetcher, url| {
        fetcher.on_bytes(url, "image/png", b"\x89PNG flyer")
    });
    let vision = MockVision::new()
        .answering_after(
            Duration::from_secs(25),
            r#"[{"title": "Senior Bingo", "when_date": "2025-03-11"}]"#,
        )
        .answering_after(
            Duration::from_secs(25),
            r#"[{"title": "Chair Yoga", "when_date": "2025-04-08"}]"#,
        )
        .answering_after(
            Duration::from_secs(25),
            r#"[{"title": "Memoir Writing Circle", "when_date": "2025-05-20"}]"#,
        );
    let settings = PipelineSettings::default();
    let sources = vec![vision_source(
        "Senior Center",
        "https://seniors.example.org/flyers",
        &flyers,
    )];

    let report = method_pipeline(Arc::new(fetcher), MockRenderer::new(), Some(vision), settings.clone())
        .run(&sites(sources, settings))
        .await;

    let diag = &report.diagnostics[0];
    assert!(diag.succeeded);
    assert_eq!(diag.attempts, 1);
    assert_eq!(report.events.len(), 3);
}

#[tokio::test]
async fn vision_source_without_service_is_a_config_failure() {
    let sources = vec![vision_source(
        "Senior Center",
        "https://seniors.example.org/flyers",
        &["https://seniors.example.org/flyers/march.png"],
    )];
    let report = method_pipeline(
        Arc::new(MockFetcher::new()),
        MockRenderer::new(),
        None,
        PipelineSettings::default(),
    )
    .run(&sites(sources, PipelineSettings::default()))
    .await;

    let diag = &report.diagnostics[0];
    assert_eq!(diag.attempts, 1);
    assert_eq!(diag.error_kind, Some(ErrorKind::ConfigError));
}

#[tokio::test]
async fn rendered_page_missing_wait_selector_times_out() {
    let renderer = MockRenderer::new()
        .on_page("https://youth.example.org", LIBRARY_PAGE)
        .on_page("https://teens.example.org", LIBRARY_PAGE);
    let settings = PipelineSettings {
        max_attempts: 1,
        ..PipelineSettings::default()
    };
    let sources = vec![
        rendered_source("Youth Club", "https://youth.example.org", Some(".event-card")),
        rendered_source("Teen Center", "https://teens.example.org", Some("div.event")),
    ];

    let report = method_pipeline(Arc::new(MockFetcher::new()), renderer, None, settings.clone())
        .run(&sites(sources, settings))
        .await;

    assert_eq!(report.diagnostics[0].error_kind, Some(ErrorKind::Timeout));
    assert!(report.diagnostics[1].succeeded);
    assert_eq!(report.events.len(), 3);
}

/// Raises the cancel flag once the first source has been extracted.
struct CancelAfterFirst {
    inner: ScriptedExtractor,
    cancelled: Arc<AtomicBool>,
}

#[async_trait]
impl Extractor for CancelAfterFirst {
    async fn extract(&self, source: &SourceConfig) -> ExtractionResult<Vec<RawRecord>> {
        let records = self.inner.extract(source).await;
        self.cancelled.store(true, Ordering::Relaxed);
        records
    }
}

#[tokio::test]
async fn cancellation_keeps_events_already_collected() {
    let cancelled = Arc::new(AtomicBool::new(false));
    let extractor = CancelAfterFirst {
        inner: ScriptedExtractor::new()
            .on_source("Library", vec![raw_event("Story Time", "2025-03-05")])
            .on_source("Parks", vec![raw_event("Yoga", "2025-03-06")]),
        cancelled: cancelled.clone(),
    };
    let pipeline = Pipeline::new(
        Arc::new(extractor),
        Arc::new(RateLimiter::disabled()),
        PipelineSettings::default(),
    )
    .with_cancel_flag(cancelled)
    .with_reference_date(reference());

    let report = pipeline
        .run(&sites(
            vec![
                markup_source("Library", "https://library.example.org"),
                markup_source("Parks", "https://parks.example.org"),
                markup_source("Museum", "https://museum.example.org"),
            ],
            PipelineSettings::default(),
        ))
        .await;

    assert_eq!(report.events.len(), 1);
    assert_eq!(report.events[0].title, "Story Time");
    assert_eq!(report.summary.stopped, Some(StopReason::Cancelled));
    assert_eq!(report.summary.skipped_sources, ["Parks", "Museum"]);
    assert_eq!(report.summary.successful_sources, 1);
}

#[tokio::test]
async fn output_never_contains_blank_titles() {
    let extractor = ScriptedExtractor::new().on_source(
        "Library",
        vec![
            raw_event("   ", "2025-03-05"),
            raw_event("<p></p>", "2025-03-05"),
            raw_event("Book Club", "2025-03-05"),
        ],
    );
    let report = Pipeline::new(
        Arc::new(extractor),
        Arc::new(RateLimiter::disabled()),
        PipelineSettings::default(),
    )
    .with_reference_date(reference())
    .run(&sites(
        vec![markup_source("Library", "https://library.example.org")],
        PipelineSettings::default(),
    ))
    .await;

    assert_eq!(report.events.len(), 1);
    assert!(report.events.iter().all(|e| !e.title.trim().is_empty()));
    assert_eq!(report.drops.len(), 2);
}
