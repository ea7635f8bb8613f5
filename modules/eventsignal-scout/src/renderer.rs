use std::time::Duration;

use async_trait::async_trait;
use browserless_client::{BrowserlessClient, BrowserlessError, ContentOptions};
use scraper::{Html, Selector};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use eventsignal_common::{ExtractionError, ExtractionResult, RenderParams};

use crate::fetch::random_user_agent;

// --- PageRenderer trait ---

/// Loads a page in a headless browser and returns the rendered DOM.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Honors `params.wait_selector`: when the selector is still absent after
    /// `params.timeout`, fails with `Timeout` unless `params.allow_partial`.
    async fn render(&self, url: &str, params: &RenderParams) -> ExtractionResult<String>;
    fn name(&self) -> &str;
}

/// Check that `wait_selector` matched something in the rendered DOM.
pub fn check_wait_selector(
    url: &str,
    html: &str,
    params: &RenderParams,
) -> ExtractionResult<()> {
    let Some(raw) = params.wait_selector.as_deref() else {
        return Ok(());
    };
    if selector_present(html, &parse_wait_selector(raw)?) {
        Ok(())
    } else {
        missing_selector(url, raw, params)
    }
}

fn parse_wait_selector(raw: &str) -> ExtractionResult<Selector> {
    Selector::parse(raw)
        .map_err(|e| ExtractionError::Config(format!("invalid wait_selector {raw:?}: {e}")))
}

fn selector_present(html: &str, selector: &Selector) -> bool {
    Html::parse_document(html).select(selector).next().is_some()
}

fn missing_selector(url: &str, raw: &str, params: &RenderParams) -> ExtractionResult<()> {
    if params.allow_partial {
        warn!(url, wait_selector = raw, "Wait selector never appeared, keeping partial DOM");
        Ok(())
    } else {
        Err(ExtractionError::Timeout(format!(
            "{url}: {raw:?} not present after {}ms",
            params.timeout.as_millis()
        )))
    }
}

// --- Selector polling ---

/// One headless load of a page, captured after `virtual_budget` of page time
/// (timers, XHR callbacks) has run.
#[async_trait]
pub trait DomSnapshot: Send + Sync {
    async fn snapshot(&self, url: &str, virtual_budget: Duration) -> ExtractionResult<String>;
}

/// Shortest page time granted to any snapshot.
const MIN_BUDGET: Duration = Duration::from_millis(500);
const FIRST_POLL: Duration = Duration::from_secs(1);

/// Capture `url`, waiting for `params.wait_selector` when one is set.
///
/// Snapshots are retaken with a doubling page-time budget (1s, 2s, 4s, ...)
/// capped at `params.timeout`. Once the selector shows up, a final capture
/// grants `params.additional_wait` on top. If it never shows up the last
/// capture is returned when `allow_partial` is set, otherwise `Timeout`.
pub async fn render_until_selector(
    dom: &dyn DomSnapshot,
    url: &str,
    params: &RenderParams,
) -> ExtractionResult<String> {
    let Some(raw) = params.wait_selector.as_deref() else {
        return dom.snapshot(url, params.additional_wait.max(MIN_BUDGET)).await;
    };
    let selector = parse_wait_selector(raw)?;

    let limit = params.timeout.max(MIN_BUDGET);
    let mut budget = FIRST_POLL.min(limit);
    loop {
        let html = dom.snapshot(url, budget).await?;
        if selector_present(&html, &selector) {
            debug!(
                url,
                wait_selector = raw,
                budget_ms = budget.as_millis() as u64,
                "Wait selector present"
            );
            if params.additional_wait.is_zero() {
                return Ok(html);
            }
            return dom.snapshot(url, budget.saturating_add(params.additional_wait)).await;
        }
        if budget >= limit {
            missing_selector(url, raw, params)?;
            return Ok(html);
        }
        budget = budget.saturating_mul(2).min(limit);
    }
}

// --- Chrome renderer ---

/// Max concurrent Chromium processes. Each instance is heavy (~100MB+ RSS,
/// multiple child processes).
const MAX_CONCURRENT_CHROME: usize = 2;

/// Real time allowed on top of the page-time budget for browser startup,
/// navigation and DOM serialization.
const CHROME_SLACK: Duration = Duration::from_secs(15);

/// Renders with local headless Chromium `--dump-dom`. Page time is granted as
/// a virtual time budget so timers and late XHR callbacks get to run, and the
/// wait selector is polled by re-capturing with a larger budget.
pub struct ChromeRenderer {
    chrome_bin: String,
    semaphore: Semaphore,
}

impl ChromeRenderer {
    pub fn new(chrome_bin: impl Into<String>) -> Self {
        info!("Using ChromeRenderer (dump-dom, max_concurrent={MAX_CONCURRENT_CHROME})");
        Self {
            chrome_bin: chrome_bin.into(),
            semaphore: Semaphore::new(MAX_CONCURRENT_CHROME),
        }
    }

    async fn run_chrome(&self, url: &str, virtual_budget: Duration) -> ExtractionResult<Vec<u8>> {
        let parsed = url::Url::parse(url)
            .map_err(|e| ExtractionError::Config(format!("invalid URL {url:?}: {e}")))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(ExtractionError::Config(format!(
                "only http/https URLs are allowed, got: {}",
                parsed.scheme()
            )));
        }

        // Dropped (and deleted) on every return path below.
        let tmp_dir = tempfile::tempdir()
            .map_err(|e| ExtractionError::Service(format!("failed to create temp profile dir: {e}")))?;

        let hard_limit = virtual_budget.saturating_add(CHROME_SLACK);

        let mut command = tokio::process::Command::new(&self.chrome_bin);
        command
            .args([
                "--headless",
                "--no-sandbox",
                "--disable-gpu",
                "--disable-dev-shm-usage",
                &format!("--user-data-dir={}", tmp_dir.path().display()),
                &format!("--user-agent={}", random_user_agent()),
                &format!("--virtual-time-budget={}", virtual_budget.as_millis()),
                "--dump-dom",
                url,
            ])
            .kill_on_drop(true);

        let output = match tokio::time::timeout(hard_limit, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ExtractionError::Service(format!(
                    "failed to run {} for {url}: {e}",
                    self.chrome_bin
                )))
            }
            Err(_) => {
                return Err(ExtractionError::Timeout(format!(
                    "Chrome timed out after {}ms for {url}",
                    hard_limit.as_millis()
                )))
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(url, renderer = "chrome", stderr = %stderr, "Chrome exited with error");
            return Err(ExtractionError::Unreachable(format!(
                "Chrome exited with {} for {url}",
                output.status
            )));
        }

        Ok(output.stdout)
    }
}

#[async_trait]
impl DomSnapshot for ChromeRenderer {
    async fn snapshot(&self, url: &str, virtual_budget: Duration) -> ExtractionResult<String> {
        let dom = self.run_chrome(url, virtual_budget).await?;
        if dom.is_empty() {
            return Err(ExtractionError::Unreachable(format!("{url}: empty DOM output")));
        }
        Ok(String::from_utf8_lossy(&dom).into_owned())
    }
}

#[async_trait]
impl PageRenderer for ChromeRenderer {
    async fn render(&self, url: &str, params: &RenderParams) -> ExtractionResult<String> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| ExtractionError::Service("Chrome semaphore closed".into()))?;

        info!(url, renderer = "chrome", "Rendering page");

        let html = render_until_selector(self, url, params).await?;

        info!(url, renderer = "chrome", bytes = html.len(), "Rendered");
        Ok(html)
    }

    fn name(&self) -> &str {
        "chrome"
    }
}

// --- Browserless renderer ---

pub struct BrowserlessRenderer {
    client: BrowserlessClient,
}

impl BrowserlessRenderer {
    pub fn new(base_url: &str, token: Option<&str>) -> anyhow::Result<Self> {
        info!(base_url, "Using BrowserlessRenderer");
        Ok(Self {
            client: BrowserlessClient::new(base_url, token)?,
        })
    }
}

fn map_browserless_error(url: &str, err: BrowserlessError) -> ExtractionError {
    if err.is_timeout() {
        return ExtractionError::Timeout(format!("{url}: {err}"));
    }
    match err {
        BrowserlessError::Network(_) => ExtractionError::Unreachable(format!("{url}: {err}")),
        _ => ExtractionError::Service(format!("{url}: {err}")),
    }
}

#[async_trait]
impl PageRenderer for BrowserlessRenderer {
    async fn render(&self, url: &str, params: &RenderParams) -> ExtractionResult<String> {
        info!(url, renderer = "browserless", "Rendering page");

        let options = ContentOptions {
            wait_for_selector: params.wait_selector.clone(),
            timeout: Some(params.timeout),
            additional_wait: Some(params.additional_wait),
            best_attempt: params.allow_partial,
            user_agent: Some(random_user_agent().to_string()),
        };

        let html = self
            .client
            .content_with(url, &options)
            .await
            .map_err(|e| map_browserless_error(url, e))?;

        if html.is_empty() {
            return Err(ExtractionError::Unreachable(format!("{url}: empty HTML response")));
        }
        check_wait_selector(url, &html, params)?;

        info!(url, renderer = "browserless", bytes = html.len(), "Rendered");
        Ok(html)
    }

    fn name(&self) -> &str {
        "browserless"
    }
}
