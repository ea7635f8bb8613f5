use std::collections::BTreeMap;
use std::time::Duration;

use ai_client::{strip_code_blocks, DocumentKind};
use scraper::{Html, Selector};
use serde_json::Value;
use tracing::{info, warn};
use url::Url;

use eventsignal_common::{
    ExtractionError, ExtractionResult, RawField, RawRecord, VisionParams,
};

use super::api::stringify;
use crate::fetch::HttpFetcher;
use crate::ratelimit::RateLimiter;
use crate::vision::VisionService;

pub const EXTRACTION_PROMPT: &str = r#"Analyze this document and extract every event it announces.

For each event, return these fields:
- title: event title or name
- description: event description or details
- when_date: event date in YYYY-MM-DD format
- when_time: start time, e.g. "2:00 PM"
- location: venue or address
- registration_url: registration or event URL, if printed
- target_age: intended age group, if stated

Respond with a JSON array only, for example:
[{"title": "Summer Reading Kickoff", "description": "Prizes and games.", "when_date": "2025-07-15", "when_time": "10:00 AM", "location": "Main Library", "registration_url": "", "target_age": "Ages 6-12"}]

Use an empty string for anything you cannot read. If the document lists no events, respond with []."#;

pub async fn extract(
    fetcher: &dyn HttpFetcher,
    vision: Option<&dyn VisionService>,
    limiter: &RateLimiter,
    page_url: &str,
    params: &VisionParams,
    document_timeout: Duration,
) -> ExtractionResult<Vec<RawRecord>> {
    let vision = vision.ok_or_else(|| {
        ExtractionError::Config(
            "no image-understanding service configured (ANTHROPIC_API_KEY not set)".into(),
        )
    })?;

    let documents = if params.image_urls.is_empty() {
        let html = fetcher.get_text(page_url).await?;
        discover_documents(&html, page_url, &params.image_selector)?
    } else {
        params.image_urls.clone()
    };

    info!(page_url, documents = documents.len(), "Processing documents");

    let mut records = Vec::new();
    let mut succeeded = 0usize;
    let mut first_failure = None;

    for (i, document_url) in documents.iter().enumerate() {
        if i > 0 {
            limiter.wait_turn().await;
        }
        let processed = tokio::time::timeout(
            document_timeout,
            process_document(fetcher, vision, document_url),
        )
        .await
        .unwrap_or_else(|_| {
            Err(ExtractionError::Timeout(format!(
                "{document_url}: document exceeded {}s",
                document_timeout.as_secs()
            )))
        });
        match processed {
            Ok(found) => {
                info!(document_url, events = found.len(), "Document processed");
                succeeded += 1;
                records.extend(found);
            }
            Err(e) => {
                warn!(document_url, error = %e, "Document failed, continuing with next");
                first_failure.get_or_insert(e);
            }
        }
    }

    // Only a source where every document failed counts as a failed source.
    match first_failure {
        Some(e) if succeeded == 0 => Err(e),
        _ => Ok(records),
    }
}

async fn process_document(
    fetcher: &dyn HttpFetcher,
    vision: &dyn VisionService,
    document_url: &str,
) -> ExtractionResult<Vec<RawRecord>> {
    let document = fetcher.get(document_url, &BTreeMap::new()).await?;
    let kind = DocumentKind::detect(document.content_type.as_deref(), document_url);
    let answer = vision.describe(&document.bytes, &kind, EXTRACTION_PROMPT).await?;

    let mut records = parse_vision_response(&answer)?;
    if matches!(kind, DocumentKind::Image(_)) {
        for raw in &mut records {
            if raw.image_url.is_none() {
                raw.image_url = Some(document_url.to_string());
            }
        }
    }
    Ok(records)
}

/// Collect absolute document URLs (`src`, `data-src` or `href`) from the
/// elements matching `image_selector`, deduplicated in page order.
pub fn discover_documents(
    html: &str,
    page_url: &str,
    image_selector: &str,
) -> ExtractionResult<Vec<String>> {
    let selector = Selector::parse(image_selector).map_err(|e| {
        ExtractionError::Config(format!("invalid image_selector {image_selector:?}: {e}"))
    })?;
    let base = Url::parse(page_url)
        .map_err(|e| ExtractionError::Config(format!("invalid URL {page_url:?}: {e}")))?;

    let document = Html::parse_document(html);
    let mut urls: Vec<String> = Vec::new();
    for el in document.select(&selector) {
        let Some(raw) = ["src", "data-src", "href"]
            .iter()
            .find_map(|attr| el.value().attr(attr))
        else {
            continue;
        };
        let Ok(resolved) = base.join(raw.trim()) else {
            continue;
        };
        if !matches!(resolved.scheme(), "http" | "https") {
            continue;
        }
        let resolved = resolved.to_string();
        if !urls.contains(&resolved) {
            urls.push(resolved);
        }
    }
    Ok(urls)
}

/// Pull the JSON array of events out of a model answer, fenced or bare.
pub fn parse_vision_response(answer: &str) -> ExtractionResult<Vec<RawRecord>> {
    let stripped = strip_code_blocks(answer);
    let json = match (stripped.find('['), stripped.rfind(']')) {
        (Some(start), Some(end)) if start < end => &stripped[start..=end],
        _ => {
            return Err(ExtractionError::Parse(
                "no JSON array in vision response".into(),
            ))
        }
    };

    let items: Vec<Value> = serde_json::from_str(json)
        .map_err(|e| ExtractionError::Parse(format!("invalid JSON in vision response: {e}")))?;

    Ok(items
        .iter()
        .filter(|item| item.is_object())
        .map(|item| {
            let mut raw = RawRecord::default();
            for field in RawField::ALL {
                raw.set(field, item.get(field.key()).and_then(stringify));
            }
            if raw.event_url.is_none() {
                raw.event_url = raw.registration_url.clone();
            }
            raw
        })
        .collect())
}
