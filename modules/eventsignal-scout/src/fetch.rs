use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, USER_AGENT};
use tracing::{debug, info};

use eventsignal_common::{ExtractionError, ExtractionResult};

/// Desktop browser strings rotated across outbound requests.
pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15",
];

pub fn random_user_agent() -> &'static str {
    USER_AGENTS[rand::rng().random_range(0..USER_AGENTS.len())]
}

/// A downloaded response body with its declared media type.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub url: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl FetchedDocument {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

// --- HttpFetcher trait ---

#[async_trait]
pub trait HttpFetcher: Send + Sync {
    async fn get(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
    ) -> ExtractionResult<FetchedDocument>;

    async fn get_text(&self, url: &str) -> ExtractionResult<String> {
        Ok(self.get(url, &BTreeMap::new()).await?.text())
    }
}

// --- reqwest implementation ---

pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        info!(timeout_secs = timeout.as_secs(), "Using ReqwestFetcher");
        Ok(Self { client })
    }

    fn build_headers(extra: &BTreeMap<String, String>) -> ExtractionResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(random_user_agent()));
        for (name, value) in extra {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| ExtractionError::Config(format!("invalid header name {name:?}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| ExtractionError::Config(format!("invalid value for header {name}")))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }
}

/// Classify a transport failure into the extraction taxonomy.
pub fn map_reqwest_error(url: &str, err: reqwest::Error) -> ExtractionError {
    if err.is_timeout() {
        ExtractionError::Timeout(format!("{url}: {err}"))
    } else if err.is_builder() {
        ExtractionError::Config(format!("{url}: {err}"))
    } else if err.is_decode() || err.is_body() {
        ExtractionError::Parse(format!("{url}: {err}"))
    } else {
        ExtractionError::Unreachable(format!("{url}: {err}"))
    }
}

#[async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn get(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
    ) -> ExtractionResult<FetchedDocument> {
        let parsed = url::Url::parse(url)
            .map_err(|e| ExtractionError::Config(format!("invalid URL {url:?}: {e}")))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(ExtractionError::Config(format!(
                "only http/https URLs are allowed, got: {}",
                parsed.scheme()
            )));
        }

        let response = self
            .client
            .get(parsed)
            .headers(Self::build_headers(headers)?)
            .send()
            .await
            .map_err(|e| map_reqwest_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExtractionError::Unreachable(format!("{url}: HTTP {status}")));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let final_url = response.url().to_string();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| map_reqwest_error(url, e))?
            .to_vec();

        debug!(url, bytes = bytes.len(), content_type = ?content_type, "Fetched");

        Ok(FetchedDocument {
            url: final_url,
            content_type,
            bytes,
        })
    }
}
