use std::sync::LazyLock;

use chrono::{DateTime, Local, NaiveDate, Utc};
use regex::Regex;
use tracing::debug;
use url::Url;

use eventsignal_common::{
    CanonicalEvent, DropDecision, DropReason, RawRecord, SourceConfig, SourceOrganizations,
};

use crate::datetime;

static RE_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));
static RE_SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Turns raw records into canonical events for one run. The reference date
/// and `scraped_at` stamp are fixed at construction so every record in a run
/// resolves "Tomorrow" the same way.
#[derive(Debug, Clone)]
pub struct RecordNormalizer {
    reference: NaiveDate,
    scraped_at: DateTime<Utc>,
    description_max_chars: usize,
}

impl RecordNormalizer {
    pub fn new(scraped_at: DateTime<Utc>, description_max_chars: usize) -> Self {
        Self {
            reference: scraped_at.with_timezone(&Local).date_naive(),
            scraped_at,
            description_max_chars,
        }
    }

    /// Pin the date used for relative and yearless dates.
    pub fn with_reference_date(mut self, reference: NaiveDate) -> Self {
        self.reference = reference;
        self
    }

    pub fn reference_date(&self) -> NaiveDate {
        self.reference
    }

    /// Normalize one record. Data-quality problems come back as a
    /// [`DropDecision`], never as an error.
    pub fn normalize(
        &self,
        raw: &RawRecord,
        source: &SourceConfig,
    ) -> Result<CanonicalEvent, DropDecision> {
        let title = clean_text(raw.title.as_deref());
        let reject = |reason: DropReason, detail: Option<String>| DropDecision {
            source: source.name.clone(),
            reason,
            title: title.clone(),
            detail,
        };

        if source.name.trim().is_empty() {
            return Err(reject(DropReason::MissingSource, None));
        }
        let Some(event_title) = title.clone() else {
            return Err(reject(DropReason::MissingTitle, None));
        };

        let date_text = clean_text(raw.date_text.as_deref());
        let time_text = clean_text(raw.time_text.as_deref());
        let Some(date_text) = date_text else {
            return Err(reject(DropReason::UnparseableDate, Some("no date".into())));
        };
        let Some(when) = datetime::normalize(&date_text, time_text.as_deref(), self.reference)
        else {
            return Err(reject(DropReason::UnparseableDate, Some(date_text)));
        };

        let event_url = resolve_url(raw.event_url.as_deref(), &source.url);
        let registration_url =
            resolve_url(raw.registration_url.as_deref(), &source.url).or_else(|| event_url.clone());

        Ok(CanonicalEvent {
            title: event_title,
            description: clean_text(raw.description.as_deref())
                .map(|d| truncate(&d, self.description_max_chars)),
            when_date: when.date,
            when_time: when.time,
            location: clean_text(raw.location.as_deref()),
            registration_url,
            image_url: resolve_url(raw.image_url.as_deref(), &source.url),
            event_url,
            target_age: clean_text(raw.target_age.as_deref()),
            source_organization: SourceOrganizations::single(source.name.trim()),
            scraped_at: self.scraped_at,
        })
    }

    /// Normalize a source's records in emission order.
    pub fn normalize_all(
        &self,
        raws: &[RawRecord],
        source: &SourceConfig,
    ) -> (Vec<CanonicalEvent>, Vec<DropDecision>) {
        let mut events = Vec::with_capacity(raws.len());
        let mut dropped = Vec::new();
        for raw in raws {
            match self.normalize(raw, source) {
                Ok(event) => events.push(event),
                Err(decision) => {
                    debug!(
                        source = decision.source.as_str(),
                        reason = %decision.reason,
                        title = ?decision.title,
                        detail = ?decision.detail,
                        "Dropped record"
                    );
                    dropped.push(decision);
                }
            }
        }
        (events, dropped)
    }
}

/// Strip tags, decode entities and collapse whitespace. Blank becomes `None`.
pub fn clean_text(text: Option<&str>) -> Option<String> {
    let text = text?;
    let without_tags = RE_TAG.replace_all(text, " ");
    let decoded = html_escape::decode_html_entities(&without_tags);
    let collapsed = RE_SPACES.replace_all(decoded.trim(), " ");
    let collapsed = collapsed.trim();
    (!collapsed.is_empty()).then(|| collapsed.to_string())
}

/// Resolve a link against the source's base URL. Anything that doesn't end up
/// as an absolute http(s) URL (`mailto:`, `javascript:`, garbage) is dropped.
pub fn resolve_url(raw: Option<&str>, base: &str) -> Option<String> {
    let raw = html_escape::decode_html_entities(raw?.trim()).into_owned();
    if raw.is_empty() || raw.starts_with('#') {
        return None;
    }
    let resolved = match Url::parse(&raw) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(base).ok()?.join(&raw).ok()?,
        Err(_) => return None,
    };
    matches!(resolved.scheme(), "http" | "https").then(|| resolved.to_string())
}

/// Cap at `max_chars` characters, ending in "..." when cut.
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(3);
    let mut cut: String = text.chars().take(keep).collect();
    cut.truncate(cut.trim_end().len());
    cut.push_str("...");
    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventsignal_common::{ExtractionMethod, MarkupParams, RawField, SelectorSet};

    fn source(name: &str) -> SourceConfig {
        SourceConfig {
            name: name.into(),
            url: "https://arts.example.org/calendar/".into(),
            enabled: true,
            status: None,
            method: ExtractionMethod::StaticMarkup(MarkupParams {
                selectors: SelectorSet::default(),
            }),
        }
    }

    fn normalizer() -> RecordNormalizer {
        RecordNormalizer::new(Utc::now(), 1000)
            .with_reference_date(NaiveDate::from_ymd_opt(2025, 1, 15).unwrap())
    }

    #[test]
    fn cleans_text_and_resolves_urls() {
        let raw = RawRecord::default()
            .with(RawField::Title, "  Open   Mic &amp; <b>Poetry</b>\n Night ")
            .with(RawField::Date, "March 5, 2025")
            .with(RawField::Time, "7pm")
            .with(RawField::EventUrl, "../events/open-mic?a=1&amp;b=2")
            .with(RawField::ImageUrl, "//cdn.example.org/mic.png");

        let event = normalizer().normalize(&raw, &source("Arts Center")).unwrap();
        assert_eq!(event.title, "Open Mic & Poetry Night");
        assert_eq!(event.when_date.to_string(), "2025-03-05");
        assert_eq!(event.when_time.unwrap().to_string(), "07:00 PM");
        assert_eq!(
            event.event_url.as_deref(),
            Some("https://arts.example.org/events/open-mic?a=1&b=2")
        );
        assert_eq!(event.registration_url, event.event_url);
        assert_eq!(event.image_url.as_deref(), Some("https://cdn.example.org/mic.png"));
        assert_eq!(event.source_organization.names(), ["Arts Center"]);
    }

    #[test]
    fn missing_title_is_dropped() {
        let raw = RawRecord::default()
            .with(RawField::Title, "<span> </span>")
            .with(RawField::Date, "2025-03-05");
        let decision = normalizer().normalize(&raw, &source("Arts Center")).unwrap_err();
        assert_eq!(decision.reason, DropReason::MissingTitle);
    }

    #[test]
    fn unparseable_or_missing_date_is_dropped() {
        let raw = RawRecord::default()
            .with(RawField::Title, "Pottery")
            .with(RawField::Date, "Coming soon");
        let decision = normalizer().normalize(&raw, &source("Arts Center")).unwrap_err();
        assert_eq!(decision.reason, DropReason::UnparseableDate);
        assert_eq!(decision.detail.as_deref(), Some("Coming soon"));

        let raw = RawRecord::default().with(RawField::Title, "Pottery");
        let decision = normalizer().normalize(&raw, &source("Arts Center")).unwrap_err();
        assert_eq!(decision.reason, DropReason::UnparseableDate);
    }

    #[test]
    fn blank_source_name_is_dropped() {
        let raw = RawRecord::default()
            .with(RawField::Title, "Pottery")
            .with(RawField::Date, "2025-03-05");
        let decision = normalizer().normalize(&raw, &source("  ")).unwrap_err();
        assert_eq!(decision.reason, DropReason::MissingSource);
    }

    #[test]
    fn non_web_links_are_discarded() {
        assert_eq!(resolve_url(Some("mailto:info@example.org"), "https://x.org"), None);
        assert_eq!(resolve_url(Some("javascript:void(0)"), "https://x.org"), None);
        assert_eq!(resolve_url(Some("#top"), "https://x.org"), None);
        assert_eq!(resolve_url(Some("   "), "https://x.org"), None);
    }

    #[test]
    fn long_descriptions_are_truncated_with_ellipsis() {
        let normalizer = RecordNormalizer::new(Utc::now(), 10);
        let raw = RawRecord::default()
            .with(RawField::Title, "Pottery")
            .with(RawField::Date, "2025-03-05")
            .with(RawField::Description, "Wheel throwing for beginners");
        let event = normalizer.normalize(&raw, &source("Arts Center")).unwrap();
        assert_eq!(event.description.as_deref(), Some("Wheel t..."));
    }

    #[test]
    fn normalize_all_preserves_order_and_collects_drops() {
        let raws = vec![
            RawRecord::default()
                .with(RawField::Title, "First")
                .with(RawField::Date, "2025-03-05"),
            RawRecord::default().with(RawField::Date, "2025-03-06"),
            RawRecord::default()
                .with(RawField::Title, "Third")
                .with(RawField::Date, "2025-03-07"),
        ];
        let (events, dropped) = normalizer().normalize_all(&raws, &source("Arts Center"));
        let titles: Vec<_> = events.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, ["First", "Third"]);
        assert_eq!(dropped.len(), 1);
    }
}
