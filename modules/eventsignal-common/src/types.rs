use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// --- Source configuration ---

/// One organization's site, as declared in the sites file.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceConfig {
    pub name: String,
    pub url: String,
    pub enabled: bool,
    /// Free-text maintenance note ("selectors broke 2025-02", etc).
    pub status: Option<String>,
    pub method: ExtractionMethod,
}

impl SourceConfig {
    pub fn method_kind(&self) -> MethodKind {
        self.method.kind()
    }
}

/// Access method plus its method-specific parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionMethod {
    Feed(FeedParams),
    Api(ApiParams),
    StaticMarkup(MarkupParams),
    RenderedPage(RenderParams),
    Vision(VisionParams),
}

impl ExtractionMethod {
    pub fn kind(&self) -> MethodKind {
        match self {
            ExtractionMethod::Feed(_) => MethodKind::Feed,
            ExtractionMethod::Api(_) => MethodKind::Api,
            ExtractionMethod::StaticMarkup(_) => MethodKind::StaticMarkup,
            ExtractionMethod::RenderedPage(_) => MethodKind::RenderedPage,
            ExtractionMethod::Vision(_) => MethodKind::Vision,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodKind {
    Feed,
    Api,
    StaticMarkup,
    RenderedPage,
    Vision,
}

impl MethodKind {
    /// Tag used for this method in the sites file.
    pub fn config_tag(&self) -> &'static str {
        match self {
            MethodKind::Feed => "ical",
            MethodKind::Api => "json",
            MethodKind::StaticMarkup => "html",
            MethodKind::RenderedPage => "playwright",
            MethodKind::Vision => "vision",
        }
    }

    pub fn from_config_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "ical" | "ics" | "feed" | "rss" => Some(MethodKind::Feed),
            "json" | "api" => Some(MethodKind::Api),
            "html" | "static" => Some(MethodKind::StaticMarkup),
            "playwright" | "rendered" | "browser" => Some(MethodKind::RenderedPage),
            "vision" | "image" | "pdf" => Some(MethodKind::Vision),
            _ => None,
        }
    }
}

impl std::fmt::Display for MethodKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MethodKind::Feed => write!(f, "feed"),
            MethodKind::Api => write!(f, "api"),
            MethodKind::StaticMarkup => write!(f, "static_markup"),
            MethodKind::RenderedPage => write!(f, "rendered_page"),
            MethodKind::Vision => write!(f, "vision"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedParams {
    pub feed_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiParams {
    pub api_url: String,
    /// Dot path to the events array inside the response (`data.events`).
    pub events_path: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub field_map: FieldMap,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarkupParams {
    pub selectors: SelectorSet,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderParams {
    pub selectors: SelectorSet,
    pub wait_selector: Option<String>,
    pub timeout: Duration,
    pub additional_wait: Duration,
    /// Keep whatever rendered when `wait_selector` never shows up.
    pub allow_partial: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VisionParams {
    pub image_selector: String,
    /// Explicit document URLs; when non-empty, page discovery is skipped.
    pub image_urls: Vec<String>,
}

// --- Raw record fields ---

/// Field names shared by raw records, API field maps and vision responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RawField {
    Title,
    Description,
    Date,
    Time,
    Location,
    EventUrl,
    RegistrationUrl,
    ImageUrl,
    TargetAge,
}

impl RawField {
    pub const ALL: [RawField; 9] = [
        RawField::Title,
        RawField::Description,
        RawField::Date,
        RawField::Time,
        RawField::Location,
        RawField::EventUrl,
        RawField::RegistrationUrl,
        RawField::ImageUrl,
        RawField::TargetAge,
    ];

    /// Canonical key, as used on the left-hand side of a `field_map`.
    pub fn key(&self) -> &'static str {
        match self {
            RawField::Title => "title",
            RawField::Description => "description",
            RawField::Date => "when_date",
            RawField::Time => "when_time",
            RawField::Location => "location",
            RawField::EventUrl => "event_url",
            RawField::RegistrationUrl => "registration_url",
            RawField::ImageUrl => "image_url",
            RawField::TargetAge => "target_age",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.key() == key)
    }

    /// JSON path assumed when a site declares no mapping for this field.
    pub fn default_json_path(&self) -> &'static str {
        match self {
            RawField::Title => "title",
            RawField::Description => "description",
            RawField::Date => "date",
            RawField::Time => "time",
            RawField::Location => "location",
            RawField::EventUrl => "url",
            RawField::RegistrationUrl => "registration_url",
            RawField::ImageUrl => "image",
            RawField::TargetAge => "age",
        }
    }
}

/// Projection from canonical field to a dot-separated JSON path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldMap {
    paths: BTreeMap<RawField, String>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: RawField, path: impl Into<String>) -> Self {
        self.paths.insert(field, path.into());
        self
    }

    pub fn path_for(&self, field: RawField) -> &str {
        self.paths
            .get(&field)
            .map(String::as_str)
            .unwrap_or_else(|| field.default_json_path())
    }
}

/// CSS selectors for markup-based extraction. URL-ish fields read attributes
/// (`href` for links, `src` for images) instead of text.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectorSet {
    pub container: String,
    pub title: String,
    pub description: String,
    pub date: String,
    pub time: String,
    pub location: String,
    pub url: String,
    pub registration_url: String,
    pub image: String,
    pub age: String,
}

impl Default for SelectorSet {
    fn default() -> Self {
        Self {
            container: "div.event".to_string(),
            title: ".title".to_string(),
            description: ".description".to_string(),
            date: ".date".to_string(),
            time: ".time".to_string(),
            location: ".location".to_string(),
            url: "a.event-link".to_string(),
            registration_url: "a.register".to_string(),
            image: "img".to_string(),
            age: ".age".to_string(),
        }
    }
}

// --- Raw record ---

/// An event as one extractor saw it. Every field is raw text; nothing here has
/// been cleaned or validated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub title: Option<String>,
    pub description: Option<String>,
    pub date_text: Option<String>,
    pub time_text: Option<String>,
    pub location: Option<String>,
    pub event_url: Option<String>,
    pub registration_url: Option<String>,
    pub image_url: Option<String>,
    pub target_age: Option<String>,
}

impl RawRecord {
    pub fn get(&self, field: RawField) -> Option<&str> {
        let value = match field {
            RawField::Title => &self.title,
            RawField::Description => &self.description,
            RawField::Date => &self.date_text,
            RawField::Time => &self.time_text,
            RawField::Location => &self.location,
            RawField::EventUrl => &self.event_url,
            RawField::RegistrationUrl => &self.registration_url,
            RawField::ImageUrl => &self.image_url,
            RawField::TargetAge => &self.target_age,
        };
        value.as_deref()
    }

    /// Set a field; empty or whitespace-only values are stored as absent.
    pub fn set(&mut self, field: RawField, value: Option<String>) {
        let value = value.filter(|v| !v.trim().is_empty());
        let slot = match field {
            RawField::Title => &mut self.title,
            RawField::Description => &mut self.description,
            RawField::Date => &mut self.date_text,
            RawField::Time => &mut self.time_text,
            RawField::Location => &mut self.location,
            RawField::EventUrl => &mut self.event_url,
            RawField::RegistrationUrl => &mut self.registration_url,
            RawField::ImageUrl => &mut self.image_url,
            RawField::TargetAge => &mut self.target_age,
        };
        *slot = value;
    }

    pub fn with(mut self, field: RawField, value: impl Into<String>) -> Self {
        self.set(field, Some(value.into()));
        self
    }
}

// --- Canonical event ---

/// Time of day rendered on a 12-hour clock, e.g. `07:00 PM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventTime(NaiveTime);

impl EventTime {
    pub const FORMAT: &'static str = "%I:%M %p";

    pub fn new(time: NaiveTime) -> Self {
        Self(time)
    }

    pub fn from_hm(hour: u32, minute: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0).map(Self)
    }

    pub fn time(&self) -> NaiveTime {
        self.0
    }
}

impl std::fmt::Display for EventTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format(Self::FORMAT))
    }
}

impl Serialize for EventTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EventTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&s, Self::FORMAT)
            .map(Self)
            .map_err(serde::de::Error::custom)
    }
}

/// Organizations that reported an event, in first-seen order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceOrganizations(Vec<String>);

impl SourceOrganizations {
    pub fn single(name: impl Into<String>) -> Self {
        Self(vec![name.into()])
    }

    pub fn names(&self) -> &[String] {
        &self.0
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|n| n == name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|n| n.trim().is_empty())
    }

    /// Append names not already present, keeping order.
    pub fn absorb(&mut self, other: &SourceOrganizations) {
        for name in &other.0 {
            if !self.contains(name) {
                self.0.push(name.clone());
            }
        }
    }
}

impl std::fmt::Display for SourceOrganizations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join(", "))
    }
}

/// The unified event schema every source is reduced to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    pub title: String,
    pub description: Option<String>,
    pub when_date: NaiveDate,
    pub when_time: Option<EventTime>,
    pub location: Option<String>,
    pub registration_url: Option<String>,
    pub image_url: Option<String>,
    pub event_url: Option<String>,
    pub target_age: Option<String>,
    pub source_organization: SourceOrganizations,
    pub scraped_at: DateTime<Utc>,
}

impl CanonicalEvent {
    /// Number of optional fields carrying a value. Used to pick the richer
    /// record when two sources report the same event.
    pub fn completeness(&self) -> usize {
        [
            self.description.is_some(),
            self.when_time.is_some(),
            self.location.is_some(),
            self.registration_url.is_some(),
            self.image_url.is_some(),
            self.event_url.is_some(),
            self.target_age.is_some(),
        ]
        .iter()
        .filter(|present| **present)
        .count()
    }
}

// --- Drop decisions ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    MissingTitle,
    UnparseableDate,
    MissingSource,
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DropReason::MissingTitle => write!(f, "missing_title"),
            DropReason::UnparseableDate => write!(f, "unparseable_date"),
            DropReason::MissingSource => write!(f, "missing_source"),
        }
    }
}

/// A raw record the normalizer refused, with enough context to find it again.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DropDecision {
    pub source: String,
    pub reason: DropReason,
    pub title: Option<String>,
    pub detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_time_renders_twelve_hour_clock() {
        assert_eq!(EventTime::from_hm(19, 0).unwrap().to_string(), "07:00 PM");
        assert_eq!(EventTime::from_hm(0, 15).unwrap().to_string(), "12:15 AM");
        assert_eq!(EventTime::from_hm(12, 30).unwrap().to_string(), "12:30 PM");
    }

    #[test]
    fn event_time_serializes_as_string() {
        let json = serde_json::to_string(&EventTime::from_hm(9, 5).unwrap()).unwrap();
        assert_eq!(json, "\"09:05 AM\"");
        let back: EventTime = serde_json::from_str(&json).unwrap();
        assert_eq!(back, EventTime::from_hm(9, 5).unwrap());
    }

    #[test]
    fn raw_record_set_ignores_blank_values() {
        let mut raw = RawRecord::default();
        raw.set(RawField::Title, Some("   ".to_string()));
        assert_eq!(raw.title, None);
        raw.set(RawField::Title, Some("Story Time".to_string()));
        assert_eq!(raw.get(RawField::Title), Some("Story Time"));
    }

    #[test]
    fn field_map_falls_back_to_default_paths() {
        let map = FieldMap::new().with(RawField::Title, "name.text");
        assert_eq!(map.path_for(RawField::Title), "name.text");
        assert_eq!(map.path_for(RawField::Date), "date");
        assert_eq!(map.path_for(RawField::ImageUrl), "image");
    }

    #[test]
    fn source_organizations_absorb_keeps_order_without_duplicates() {
        let mut orgs = SourceOrganizations::single("Library");
        orgs.absorb(&SourceOrganizations(vec![
            "Parks".to_string(),
            "Library".to_string(),
        ]));
        assert_eq!(orgs.names(), ["Library", "Parks"]);
        assert_eq!(orgs.to_string(), "Library, Parks");
    }

    #[test]
    fn method_tags_round_trip() {
        for kind in [
            MethodKind::Feed,
            MethodKind::Api,
            MethodKind::StaticMarkup,
            MethodKind::RenderedPage,
            MethodKind::Vision,
        ] {
            assert_eq!(MethodKind::from_config_tag(kind.config_tag()), Some(kind));
        }
        assert_eq!(MethodKind::from_config_tag("carrier-pigeon"), None);
    }
}
