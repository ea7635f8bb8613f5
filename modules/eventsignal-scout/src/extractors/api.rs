use serde_json::Value;
use tracing::info;

use eventsignal_common::{
    ApiParams, ExtractionError, ExtractionResult, FieldMap, RawField, RawRecord,
};

use crate::fetch::HttpFetcher;

pub async fn extract(
    fetcher: &dyn HttpFetcher,
    params: &ApiParams,
) -> ExtractionResult<Vec<RawRecord>> {
    let document = fetcher.get(&params.api_url, &params.headers).await?;
    // Non-JSON bodies (HTML error pages behind a 200) count as unreachable.
    let body: Value = serde_json::from_slice(&document.bytes).map_err(|e| {
        ExtractionError::Unreachable(format!("{}: invalid JSON: {e}", params.api_url))
    })?;

    let records = map_events(&body, params.events_path.as_deref(), &params.field_map)?;
    info!(api_url = params.api_url.as_str(), items = records.len(), "Mapped API events");
    Ok(records)
}

/// Locate the events array and project every item through the field map.
/// A non-array at `events_path` is treated as a single event.
pub fn map_events(
    body: &Value,
    events_path: Option<&str>,
    field_map: &FieldMap,
) -> ExtractionResult<Vec<RawRecord>> {
    let events = match events_path {
        Some(path) => lookup(body, path).ok_or_else(|| {
            ExtractionError::Config(format!("events_path {path:?} not found in response"))
        })?,
        None => body,
    };

    let items: Vec<&Value> = match events {
        Value::Array(items) => items.iter().collect(),
        Value::Null => Vec::new(),
        other => vec![other],
    };

    Ok(items
        .into_iter()
        .map(|item| {
            let mut raw = RawRecord::default();
            for field in RawField::ALL {
                raw.set(field, lookup(item, field_map.path_for(field)).and_then(stringify));
            }
            raw
        })
        .collect())
}

/// Follow a dot path (`data.events`, `venue.name`, `images.0.url`).
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(value, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

pub(crate) fn stringify(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .filter(|v| !v.is_array() && !v.is_object())
                .filter_map(stringify)
                .collect();
            (!parts.is_empty()).then(|| parts.join(", "))
        }
        Value::Null | Value::Object(_) => None,
    }
}
