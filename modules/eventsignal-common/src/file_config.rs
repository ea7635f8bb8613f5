use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::types::{
    ApiParams, ExtractionMethod, FeedParams, FieldMap, MarkupParams, MethodKind, RawField,
    RenderParams, SelectorSet, SourceConfig, VisionParams,
};

const DEFAULT_RENDER_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_ADDITIONAL_WAIT_MS: u64 = 2_000;

/// Run-wide knobs from the `[settings]` table of the sites file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineSettings {
    /// Randomized pause between source invocations, lower bound.
    pub min_delay_secs: f64,
    pub max_delay_secs: f64,
    /// Total attempts per source, including the first.
    pub max_attempts: u32,
    pub backoff_secs: f64,
    /// Bound on a single extraction attempt.
    pub request_timeout_secs: u64,
    /// Bound on the whole run; remaining sources are skipped once it elapses.
    pub run_timeout_secs: Option<u64>,
    /// 1.0 = titles must match exactly after normalization.
    pub title_similarity: f64,
    pub description_max_chars: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            min_delay_secs: 2.0,
            max_delay_secs: 3.0,
            max_attempts: 2,
            backoff_secs: 30.0,
            request_timeout_secs: 60,
            run_timeout_secs: None,
            title_similarity: 1.0,
            description_max_chars: 1000,
        }
    }
}

impl PipelineSettings {
    pub fn validate(&self) -> Result<()> {
        check_secs("min_delay_secs", self.min_delay_secs)?;
        check_secs("max_delay_secs", self.max_delay_secs)?;
        check_secs("backoff_secs", self.backoff_secs)?;
        if self.min_delay_secs > self.max_delay_secs {
            bail!(
                "min_delay_secs ({}) must be <= max_delay_secs ({})",
                self.min_delay_secs,
                self.max_delay_secs
            );
        }
        if self.max_attempts == 0 {
            bail!("max_attempts must be at least 1");
        }
        if !(1..=MAX_SETTING_SECS).contains(&self.request_timeout_secs) {
            bail!(
                "request_timeout_secs must be between 1 and {MAX_SETTING_SECS}, got {}",
                self.request_timeout_secs
            );
        }
        if let Some(run_timeout) = self.run_timeout_secs {
            if !(1..=MAX_SETTING_SECS).contains(&run_timeout) {
                bail!("run_timeout_secs must be between 1 and {MAX_SETTING_SECS}, got {run_timeout}");
            }
        }
        if !(self.title_similarity > 0.0 && self.title_similarity <= 1.0) {
            bail!("title_similarity must be in (0, 1], got {}", self.title_similarity);
        }
        Ok(())
    }

    pub fn delay_range(&self) -> (Duration, Duration) {
        (secs(self.min_delay_secs), secs(self.max_delay_secs))
    }

    pub fn backoff(&self) -> Duration {
        secs(self.backoff_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.min(MAX_SETTING_SECS))
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs
            .map(|t| Duration::from_secs(t.min(MAX_SETTING_SECS)))
    }
}

/// Ceiling for every delay, backoff and timeout setting (one day).
const MAX_SETTING_SECS: u64 = 86_400;

fn check_secs(name: &str, value: f64) -> Result<()> {
    if !(value.is_finite() && value >= 0.0 && value <= MAX_SETTING_SECS as f64) {
        bail!("{name} must be between 0 and {MAX_SETTING_SECS} seconds, got {value}");
    }
    Ok(())
}

/// Non-panicking seconds to `Duration`; out-of-range values are clamped.
fn secs(value: f64) -> Duration {
    let ceiling = Duration::from_secs(MAX_SETTING_SECS);
    match Duration::try_from_secs_f64(value) {
        Ok(d) => d.min(ceiling),
        Err(_) if value > 0.0 => ceiling,
        Err(_) => Duration::ZERO,
    }
}

/// A site entry that could not be turned into a [`SourceConfig`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigIssue {
    /// Position in the `[[sites]]` array.
    pub index: usize,
    pub site: Option<String>,
    pub message: String,
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.site {
            Some(site) => write!(f, "site #{} ({}): {}", self.index, site, self.message),
            None => write!(f, "site #{}: {}", self.index, self.message),
        }
    }
}

/// Result of loading a sites file. Broken entries never abort the load; they
/// end up in `issues` and the remaining sites still run.
#[derive(Debug, Clone)]
pub struct LoadedSites {
    pub settings: PipelineSettings,
    pub sources: Vec<SourceConfig>,
    pub disabled: Vec<String>,
    pub issues: Vec<ConfigIssue>,
}

#[derive(Deserialize)]
struct SitesDocument {
    #[serde(default)]
    settings: PipelineSettings,
    #[serde(default)]
    sites: Vec<toml::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SiteEntry {
    name: Option<String>,
    url: Option<String>,
    method: Option<String>,
    #[serde(default = "enabled_by_default")]
    enabled: bool,
    status: Option<String>,

    // feed
    ical_url: Option<String>,

    // api
    api_url: Option<String>,
    events_path: Option<String>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    field_map: BTreeMap<String, String>,

    // markup / rendered
    selectors: Option<SelectorEntry>,
    wait_selector: Option<String>,
    timeout_ms: Option<u64>,
    additional_wait_ms: Option<u64>,
    #[serde(default)]
    allow_partial: bool,

    // vision
    image_selector: Option<String>,
    #[serde(default)]
    image_urls: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SelectorEntry {
    container: Option<String>,
    title: Option<String>,
    description: Option<String>,
    date: Option<String>,
    time: Option<String>,
    location: Option<String>,
    url: Option<String>,
    registration_url: Option<String>,
    image: Option<String>,
    age: Option<String>,
}

fn enabled_by_default() -> bool {
    true
}

impl SelectorEntry {
    fn into_selector_set(self) -> SelectorSet {
        let defaults = SelectorSet::default();
        SelectorSet {
            container: self.container.unwrap_or(defaults.container),
            title: self.title.unwrap_or(defaults.title),
            description: self.description.unwrap_or(defaults.description),
            date: self.date.unwrap_or(defaults.date),
            time: self.time.unwrap_or(defaults.time),
            location: self.location.unwrap_or(defaults.location),
            url: self.url.unwrap_or(defaults.url),
            registration_url: self.registration_url.unwrap_or(defaults.registration_url),
            image: self.image.unwrap_or(defaults.image),
            age: self.age.unwrap_or(defaults.age),
        }
    }
}

impl SiteEntry {
    fn into_source_config(self) -> std::result::Result<SourceConfig, String> {
        let name = self
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .ok_or("missing `name`")?;
        let url = self
            .url
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .ok_or("missing `url`")?;
        if !is_http_url(&url) {
            return Err(format!("`url` must be an absolute http(s) URL, got {url:?}"));
        }
        let tag = self.method.ok_or("missing `method`")?;
        let kind = MethodKind::from_config_tag(&tag)
            .ok_or_else(|| format!("unknown method {tag:?}"))?;

        let method = match kind {
            MethodKind::Feed => ExtractionMethod::Feed(FeedParams {
                feed_url: checked_url("ical_url", self.ical_url, &url)?,
            }),
            MethodKind::Api => {
                let mut field_map = FieldMap::new();
                for (key, path) in self.field_map {
                    let field = RawField::from_key(&key)
                        .ok_or_else(|| format!("unknown field_map key {key:?}"))?;
                    if path.trim().is_empty() {
                        return Err(format!("field_map.{key} has an empty path"));
                    }
                    field_map = field_map.with(field, path.trim());
                }
                ExtractionMethod::Api(ApiParams {
                    api_url: checked_url("api_url", self.api_url, &url)?,
                    events_path: self.events_path.filter(|p| !p.trim().is_empty()),
                    headers: self.headers,
                    field_map,
                })
            }
            MethodKind::StaticMarkup => ExtractionMethod::StaticMarkup(MarkupParams {
                selectors: self.selectors.unwrap_or_default().into_selector_set(),
            }),
            MethodKind::RenderedPage => ExtractionMethod::RenderedPage(RenderParams {
                selectors: self.selectors.unwrap_or_default().into_selector_set(),
                wait_selector: self.wait_selector.filter(|s| !s.trim().is_empty()),
                timeout: Duration::from_millis(
                    self.timeout_ms.unwrap_or(DEFAULT_RENDER_TIMEOUT_MS),
                ),
                additional_wait: Duration::from_millis(
                    self.additional_wait_ms.unwrap_or(DEFAULT_ADDITIONAL_WAIT_MS),
                ),
                allow_partial: self.allow_partial,
            }),
            MethodKind::Vision => {
                for image_url in &self.image_urls {
                    if !is_http_url(image_url) {
                        return Err(format!("image_urls entry {image_url:?} is not an http(s) URL"));
                    }
                }
                ExtractionMethod::Vision(VisionParams {
                    image_selector: self.image_selector.unwrap_or_else(|| "img".to_string()),
                    image_urls: self.image_urls,
                })
            }
        };

        Ok(SourceConfig {
            name,
            url,
            enabled: self.enabled,
            status: self.status,
            method,
        })
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

fn checked_url(
    key: &str,
    value: Option<String>,
    fallback: &str,
) -> std::result::Result<String, String> {
    match value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        Some(v) if is_http_url(&v) => Ok(v),
        Some(v) => Err(format!("`{key}` must be an absolute http(s) URL, got {v:?}")),
        None => Ok(fallback.to_string()),
    }
}

/// Parse a sites document. Only an unreadable document or invalid
/// `[settings]` is an error; individual site problems become [`ConfigIssue`]s.
pub fn parse_sites(content: &str) -> Result<LoadedSites> {
    let doc: SitesDocument = toml::from_str(content).context("Failed to parse sites file")?;
    doc.settings.validate().context("Invalid [settings]")?;

    let mut sources = Vec::new();
    let mut disabled = Vec::new();
    let mut issues = Vec::new();

    for (index, value) in doc.sites.into_iter().enumerate() {
        let site_name = value
            .get("name")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        let entry: SiteEntry = match value.try_into() {
            Ok(entry) => entry,
            Err(e) => {
                let issue = ConfigIssue {
                    index,
                    site: site_name,
                    message: e.to_string(),
                };
                warn!(%issue, "Skipping malformed site entry");
                issues.push(issue);
                continue;
            }
        };

        match entry.into_source_config() {
            Ok(source) if !source.enabled => disabled.push(source.name),
            Ok(source) => sources.push(source),
            Err(message) => {
                let issue = ConfigIssue {
                    index,
                    site: site_name,
                    message,
                };
                warn!(%issue, "Skipping invalid site entry");
                issues.push(issue);
            }
        }
    }

    info!(
        enabled = sources.len(),
        disabled = disabled.len(),
        invalid = issues.len(),
        "Loaded site configuration"
    );

    Ok(LoadedSites {
        settings: doc.settings,
        sources,
        disabled,
        issues,
    })
}

/// Load and parse a sites file from disk.
pub fn load_sites(path: &Path) -> Result<LoadedSites> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read sites file: {}", path.display()))?;
    parse_sites(&content).with_context(|| format!("In sites file: {}", path.display()))
}
