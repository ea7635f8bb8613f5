// Test mocks for the event pipeline.
//
// One mock per trait boundary:
// - MockFetcher (HttpFetcher): HashMap-based URL→document
// - MockRenderer (PageRenderer): HashMap-based URL→rendered HTML
// - MockVision (VisionService): queued answers, one per call, optionally delayed
// - ScriptedExtractor (Extractor): per-source canned results, counts calls
//
// Plus builders for SourceConfig and RawRecord.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use ai_client::DocumentKind;
use async_trait::async_trait;

use eventsignal_common::{
    ExtractionError, ExtractionMethod, ExtractionResult, FeedParams, MarkupParams, RawField,
    RawRecord, RenderParams, SelectorSet, SourceConfig, VisionParams,
};

use crate::extractors::Extractor;
use crate::fetch::{FetchedDocument, HttpFetcher};
use crate::renderer::PageRenderer;
use crate::vision::VisionService;

// --- MockFetcher ---

/// Returns `Unreachable` for unregistered URLs.
/// Builder pattern: `.on_text()`, `.on_bytes()`, `.on_error()`.
#[derive(Default)]
pub struct MockFetcher {
    responses: HashMap<String, ExtractionResult<FetchedDocument>>,
    requests: Mutex<Vec<String>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_text(self, url: &str, body: &str) -> Self {
        self.on_bytes(url, "text/html; charset=utf-8", body.as_bytes())
    }

    pub fn on_bytes(mut self, url: &str, content_type: &str, bytes: &[u8]) -> Self {
        self.responses.insert(
            url.to_string(),
            Ok(FetchedDocument {
                url: url.to_string(),
                content_type: Some(content_type.to_string()),
                bytes: bytes.to_vec(),
            }),
        );
        self
    }

    pub fn on_error(mut self, url: &str, error: ExtractionError) -> Self {
        self.responses.insert(url.to_string(), Err(error));
        self
    }

    /// URLs requested so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl HttpFetcher for MockFetcher {
    async fn get(
        &self,
        url: &str,
        _headers: &BTreeMap<String, String>,
    ) -> ExtractionResult<FetchedDocument> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(url.to_string());
        }
        self.responses
            .get(url)
            .cloned()
            .unwrap_or_else(|| Err(ExtractionError::Unreachable(format!("{url}: not mocked"))))
    }
}

// --- MockRenderer ---

#[derive(Default)]
pub struct MockRenderer {
    pages: HashMap<String, String>,
}

impl MockRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_page(mut self, url: &str, html: &str) -> Self {
        self.pages.insert(url.to_string(), html.to_string());
        self
    }
}

#[async_trait]
impl PageRenderer for MockRenderer {
    async fn render(&self, url: &str, params: &RenderParams) -> ExtractionResult<String> {
        let html = self
            .pages
            .get(url)
            .cloned()
            .ok_or_else(|| ExtractionError::Unreachable(format!("{url}: not mocked")))?;
        crate::renderer::check_wait_selector(url, &html, params)?;
        Ok(html)
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// --- MockVision ---

/// Hands out queued answers in order, each after its delay; fails with
/// `Service` once drained.
#[derive(Default)]
pub struct MockVision {
    answers: Mutex<VecDeque<(Duration, ExtractionResult<String>)>>,
    calls: Mutex<Vec<DocumentKind>>,
}

impl MockVision {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answering(self, answer: &str) -> Self {
        self.answering_after(Duration::ZERO, answer)
    }

    /// Answer only after `delay` has passed, like a slow model call.
    pub fn answering_after(self, delay: Duration, answer: &str) -> Self {
        self.queue(delay, Ok(answer.to_string()))
    }

    pub fn failing(self, error: ExtractionError) -> Self {
        self.queue(Duration::ZERO, Err(error))
    }

    fn queue(self, delay: Duration, answer: ExtractionResult<String>) -> Self {
        if let Ok(mut answers) = self.answers.lock() {
            answers.push_back((delay, answer));
        }
        self
    }

    /// Document kinds submitted so far.
    pub fn calls(&self) -> Vec<DocumentKind> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl VisionService for MockVision {
    async fn describe(
        &self,
        _bytes: &[u8],
        kind: &DocumentKind,
        _instruction: &str,
    ) -> ExtractionResult<String> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(kind.clone());
        }
        let next = self
            .answers
            .lock()
            .ok()
            .and_then(|mut answers| answers.pop_front());
        match next {
            Some((delay, answer)) => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                answer
            }
            None => Err(ExtractionError::Service("no answer queued".into())),
        }
    }
}

// --- ScriptedExtractor ---

enum Script {
    Records(Vec<RawRecord>),
    Fail(ExtractionError),
    Hang,
}

/// Canned outcome per source name. Unscripted sources yield no records.
#[derive(Default)]
pub struct ScriptedExtractor {
    scripts: HashMap<String, Script>,
    calls: Mutex<HashMap<String, u32>>,
}

impl ScriptedExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_source(mut self, name: &str, records: Vec<RawRecord>) -> Self {
        self.scripts.insert(name.to_string(), Script::Records(records));
        self
    }

    /// Every attempt against `name` fails with `error`.
    pub fn failing_source(mut self, name: &str, error: ExtractionError) -> Self {
        self.scripts.insert(name.to_string(), Script::Fail(error));
        self
    }

    /// Attempts against `name` never finish.
    pub fn hanging_source(mut self, name: &str) -> Self {
        self.scripts.insert(name.to_string(), Script::Hang);
        self
    }

    pub fn calls(&self, name: &str) -> u32 {
        self.calls
            .lock()
            .ok()
            .and_then(|calls| calls.get(name).copied())
            .unwrap_or(0)
    }
}

#[async_trait]
impl Extractor for ScriptedExtractor {
    async fn extract(&self, source: &SourceConfig) -> ExtractionResult<Vec<RawRecord>> {
        if let Ok(mut calls) = self.calls.lock() {
            *calls.entry(source.name.clone()).or_default() += 1;
        }
        match self.scripts.get(&source.name) {
            Some(Script::Records(records)) => Ok(records.clone()),
            Some(Script::Fail(error)) => Err(error.clone()),
            Some(Script::Hang) => {
                tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
                Ok(Vec::new())
            }
            None => Ok(Vec::new()),
        }
    }
}

// --- Builders ---

pub fn markup_source(name: &str, url: &str) -> SourceConfig {
    source(
        name,
        url,
        ExtractionMethod::StaticMarkup(MarkupParams {
            selectors: SelectorSet::default(),
        }),
    )
}

pub fn feed_source(name: &str, url: &str, feed_url: &str) -> SourceConfig {
    source(
        name,
        url,
        ExtractionMethod::Feed(FeedParams {
            feed_url: feed_url.to_string(),
        }),
    )
}

pub fn rendered_source(name: &str, url: &str, wait_selector: Option<&str>) -> SourceConfig {
    source(
        name,
        url,
        ExtractionMethod::RenderedPage(RenderParams {
            selectors: SelectorSet::default(),
            wait_selector: wait_selector.map(str::to_string),
            timeout: Duration::from_secs(30),
            additional_wait: Duration::from_secs(2),
            allow_partial: false,
        }),
    )
}

pub fn vision_source(name: &str, url: &str, image_urls: &[&str]) -> SourceConfig {
    source(
        name,
        url,
        ExtractionMethod::Vision(VisionParams {
            image_selector: "img".to_string(),
            image_urls: image_urls.iter().map(|u| u.to_string()).collect(),
        }),
    )
}

pub fn source(name: &str, url: &str, method: ExtractionMethod) -> SourceConfig {
    SourceConfig {
        name: name.to_string(),
        url: url.to_string(),
        enabled: true,
        status: None,
        method,
    }
}

pub fn raw_event(title: &str, date: &str) -> RawRecord {
    RawRecord::default()
        .with(RawField::Title, title)
        .with(RawField::Date, date)
}
