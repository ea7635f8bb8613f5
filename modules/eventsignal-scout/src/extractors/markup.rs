use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use eventsignal_common::{
    ExtractionError, ExtractionResult, RawField, RawRecord, SelectorSet,
};

struct CompiledSelectors {
    container: Selector,
    fields: Vec<(RawField, Selector)>,
}

fn compile(raw: &str, name: &str) -> ExtractionResult<Selector> {
    Selector::parse(raw)
        .map_err(|e| ExtractionError::Config(format!("invalid {name} selector {raw:?}: {e}")))
}

impl CompiledSelectors {
    fn new(set: &SelectorSet) -> ExtractionResult<Self> {
        let fields = [
            (RawField::Title, &set.title, "title"),
            (RawField::Description, &set.description, "description"),
            (RawField::Date, &set.date, "date"),
            (RawField::Time, &set.time, "time"),
            (RawField::Location, &set.location, "location"),
            (RawField::EventUrl, &set.url, "url"),
            (RawField::RegistrationUrl, &set.registration_url, "registration_url"),
            (RawField::ImageUrl, &set.image, "image"),
            (RawField::TargetAge, &set.age, "age"),
        ]
        .into_iter()
        .map(|(field, raw, name)| compile(raw, name).map(|s| (field, s)))
        .collect::<ExtractionResult<Vec<_>>>()?;

        Ok(Self {
            container: compile(&set.container, "container")?,
            fields,
        })
    }
}

/// Apply a selector set to an HTML document. Every container match becomes
/// one record; a page with no containers yields no records.
pub fn extract(html: &str, selectors: &SelectorSet) -> ExtractionResult<Vec<RawRecord>> {
    let compiled = CompiledSelectors::new(selectors)?;
    let document = Html::parse_document(html);

    let records: Vec<RawRecord> = document
        .select(&compiled.container)
        .map(|container| {
            let mut raw = RawRecord::default();
            for (field, selector) in &compiled.fields {
                let value = container
                    .select(selector)
                    .next()
                    .and_then(|el| field_value(*field, el));
                raw.set(*field, value);
            }
            if raw.registration_url.is_none() {
                raw.registration_url = raw.event_url.clone();
            }
            raw
        })
        .collect();

    debug!(containers = records.len(), "Applied selectors");
    Ok(records)
}

/// Link fields read `href`, image fields read `src`; text elsewhere.
fn field_value(field: RawField, el: ElementRef<'_>) -> Option<String> {
    match field {
        RawField::EventUrl | RawField::RegistrationUrl => el
            .value()
            .attr("href")
            .or_else(|| el.value().attr("data-href"))
            .map(str::to_string),
        RawField::ImageUrl => el
            .value()
            .attr("src")
            .or_else(|| el.value().attr("data-src"))
            .map(str::to_string),
        _ => Some(element_text(el)),
    }
}

/// Text content with block boundaries kept as spaces.
pub fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<Vec<_>>().join(" ")
}
