pub mod error;

pub use error::{BrowserlessError, Result};

use std::time::Duration;

use serde::Serialize;
use tracing::debug;

/// Extra time on top of the render budget before the HTTP request gives up.
const REQUEST_SLACK: Duration = Duration::from_secs(10);

/// How long Browserless should wait before snapshotting the DOM.
#[derive(Debug, Clone, Default)]
pub struct ContentOptions {
    pub wait_for_selector: Option<String>,
    /// Budget for navigation and `wait_for_selector`.
    pub timeout: Option<Duration>,
    /// Fixed pause after the page settled, for late-loading widgets.
    pub additional_wait: Option<Duration>,
    /// Return whatever rendered instead of failing when a wait expires.
    pub best_attempt: bool,
    pub user_agent: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ContentRequest<'a> {
    url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    wait_for_selector: Option<WaitForSelector<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    wait_for_timeout: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    goto_options: Option<GotoOptions>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    best_attempt: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_agent: Option<&'a str>,
}

#[derive(Serialize)]
struct WaitForSelector<'a> {
    selector: &'a str,
    timeout: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GotoOptions {
    wait_until: &'static str,
    timeout: u64,
}

impl<'a> ContentRequest<'a> {
    fn new(url: &'a str, options: &'a ContentOptions) -> Self {
        let timeout_ms = options.timeout.map(|t| t.as_millis() as u64);
        Self {
            url,
            wait_for_selector: options
                .wait_for_selector
                .as_deref()
                .map(|selector| WaitForSelector {
                    selector,
                    timeout: timeout_ms.unwrap_or(30_000),
                }),
            wait_for_timeout: options
                .additional_wait
                .filter(|w| !w.is_zero())
                .map(|w| w.as_millis() as u64),
            goto_options: timeout_ms.map(|timeout| GotoOptions {
                wait_until: "networkidle2",
                timeout,
            }),
            best_attempt: options.best_attempt,
            user_agent: options.user_agent.as_deref(),
        }
    }
}

pub struct BrowserlessClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl BrowserlessClient {
    pub fn new(base_url: &str, token: Option<&str>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| BrowserlessError::Network(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
        })
    }

    /// Fetch fully-rendered HTML for a URL via the Browserless /content
    /// endpoint, with wait conditions applied before the DOM is captured.
    pub async fn content_with(&self, url: &str, options: &ContentOptions) -> Result<String> {
        let mut endpoint = format!("{}/content", self.base_url);
        if let Some(ref token) = self.token {
            endpoint.push_str(&format!("?token={token}"));
        }

        let budget = options.timeout.unwrap_or(Duration::from_secs(30))
            + options.additional_wait.unwrap_or_default()
            + REQUEST_SLACK;

        debug!(url, wait_for_selector = ?options.wait_for_selector, "Browserless content request");

        let resp = self
            .client
            .post(&endpoint)
            .timeout(budget)
            .header("Content-Type", "application/json")
            .json(&ContentRequest::new(url, options))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(BrowserlessError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(resp.text().await?)
    }
}
