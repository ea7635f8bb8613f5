pub mod api;
pub mod feed;
pub mod markup;
pub mod rendered;
pub mod vision;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use eventsignal_common::{ExtractionMethod, ExtractionResult, RawRecord, SourceConfig};

use crate::fetch::HttpFetcher;
use crate::ratelimit::RateLimiter;
use crate::renderer::PageRenderer;
use crate::vision::VisionService;

/// One pass over a source: configuration in, raw records out.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, source: &SourceConfig) -> ExtractionResult<Vec<RawRecord>>;
}

/// Per-document bound for vision sources when none is configured.
pub const DEFAULT_DOCUMENT_TIMEOUT: Duration = Duration::from_secs(120);

/// Dispatches on [`ExtractionMethod`] to the five access strategies.
pub struct MethodExtractor {
    fetcher: Arc<dyn HttpFetcher>,
    renderer: Arc<dyn PageRenderer>,
    vision: Option<Arc<dyn VisionService>>,
    limiter: Arc<RateLimiter>,
    document_timeout: Duration,
}

impl MethodExtractor {
    pub fn new(
        fetcher: Arc<dyn HttpFetcher>,
        renderer: Arc<dyn PageRenderer>,
        vision: Option<Arc<dyn VisionService>>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            fetcher,
            renderer,
            vision,
            limiter,
            document_timeout: DEFAULT_DOCUMENT_TIMEOUT,
        }
    }

    /// Bound on fetching and describing one vision document.
    pub fn with_document_timeout(mut self, timeout: Duration) -> Self {
        self.document_timeout = timeout;
        self
    }
}

#[async_trait]
impl Extractor for MethodExtractor {
    async fn extract(&self, source: &SourceConfig) -> ExtractionResult<Vec<RawRecord>> {
        info!(source = source.name.as_str(), method = %source.method_kind(), "Extracting");

        match &source.method {
            ExtractionMethod::Feed(params) => feed::extract(self.fetcher.as_ref(), params).await,
            ExtractionMethod::Api(params) => api::extract(self.fetcher.as_ref(), params).await,
            ExtractionMethod::StaticMarkup(params) => {
                let html = self.fetcher.get_text(&source.url).await?;
                markup::extract(&html, &params.selectors)
            }
            ExtractionMethod::RenderedPage(params) => {
                rendered::extract(self.renderer.as_ref(), &source.url, params).await
            }
            ExtractionMethod::Vision(params) => {
                vision::extract(
                    self.fetcher.as_ref(),
                    self.vision.as_deref(),
                    &self.limiter,
                    &source.url,
                    params,
                    self.document_timeout,
                )
                .await
            }
        }
    }
}
