use std::collections::BTreeMap;

use chrono::{DateTime, Local, NaiveDateTime, Utc};
use icalendar::{
    Calendar, CalendarComponent, CalendarDateTime, Component, DatePerhapsTime, EventLike,
};
use tracing::{debug, info};

use eventsignal_common::{
    EventTime, ExtractionError, ExtractionResult, FeedParams, RawField, RawRecord,
};

use crate::fetch::HttpFetcher;

pub async fn extract(
    fetcher: &dyn HttpFetcher,
    params: &FeedParams,
) -> ExtractionResult<Vec<RawRecord>> {
    let document = fetcher.get(&params.feed_url, &BTreeMap::new()).await?;
    let records = parse_feed(&document.text())?;
    info!(feed_url = params.feed_url.as_str(), items = records.len(), "Parsed feed");
    Ok(records)
}

/// Parse an iCalendar document, or an RSS/Atom document when it isn't one.
pub fn parse_feed(content: &str) -> ExtractionResult<Vec<RawRecord>> {
    if content.trim_start().starts_with("BEGIN:VCALENDAR") || content.contains("BEGIN:VEVENT") {
        parse_ical(content)
    } else {
        parse_syndication(content)
    }
}

// --- iCalendar ---

pub fn parse_ical(content: &str) -> ExtractionResult<Vec<RawRecord>> {
    let calendar: Calendar = content
        .parse()
        .map_err(|e| ExtractionError::Parse(format!("invalid iCalendar: {e}")))?;

    let records = calendar
        .components
        .iter()
        .filter_map(|component| match component {
            CalendarComponent::Event(event) => Some(event),
            _ => None,
        })
        .map(|event| {
            let url = event.property_value("URL").map(str::to_string);
            let (date_text, time_text) = match event.get_start() {
                Some(start) => split_start(start),
                None => (None, None),
            };

            let mut raw = RawRecord::default();
            raw.set(RawField::Title, event.property_value("SUMMARY").map(unescape_text));
            raw.set(
                RawField::Description,
                event.property_value("DESCRIPTION").map(unescape_text),
            );
            raw.set(RawField::Location, event.property_value("LOCATION").map(unescape_text));
            raw.set(RawField::Date, date_text);
            raw.set(RawField::Time, time_text);
            raw.set(RawField::EventUrl, url.clone());
            raw.set(RawField::RegistrationUrl, url);
            raw
        })
        .collect();

    Ok(records)
}

/// All-day entries carry a date and no time.
fn split_start(start: DatePerhapsTime) -> (Option<String>, Option<String>) {
    let local = match start {
        DatePerhapsTime::Date(date) => return (Some(date.format("%Y-%m-%d").to_string()), None),
        DatePerhapsTime::DateTime(CalendarDateTime::Utc(utc)) => to_local(utc),
        DatePerhapsTime::DateTime(CalendarDateTime::Floating(naive)) => naive,
        // The run is pinned to one locale; zoned times are taken at face value.
        DatePerhapsTime::DateTime(CalendarDateTime::WithTimezone { date_time, tzid }) => {
            debug!(tzid = tzid.as_str(), "Treating zoned DTSTART as local");
            date_time
        }
    };
    stamp(local)
}

fn to_local(utc: DateTime<Utc>) -> NaiveDateTime {
    utc.with_timezone(&Local).naive_local()
}

fn stamp(local: NaiveDateTime) -> (Option<String>, Option<String>) {
    (
        Some(local.date().format("%Y-%m-%d").to_string()),
        Some(EventTime::new(local.time()).to_string()),
    )
}

/// Undo RFC 5545 TEXT escaping.
fn unescape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

// --- RSS / Atom ---

fn parse_syndication(content: &str) -> ExtractionResult<Vec<RawRecord>> {
    let feed = feed_rs::parser::parse(content.as_bytes())
        .map_err(|e| ExtractionError::Parse(format!("not iCalendar, RSS or Atom: {e}")))?;

    let records = feed
        .entries
        .into_iter()
        .map(|entry| {
            let url = entry
                .links
                .first()
                .map(|l| l.href.clone())
                .or_else(|| entry.id.starts_with("http").then(|| entry.id.clone()));
            let description = entry
                .summary
                .map(|s| s.content)
                .or_else(|| entry.content.and_then(|c| c.body));
            let image = entry
                .media
                .iter()
                .flat_map(|m| m.thumbnails.iter())
                .map(|t| t.image.uri.clone())
                .next();

            // Publication and update stamps date the post, not the event, so
            // syndication entries carry no date and time of their own.
            let mut raw = RawRecord::default();
            raw.set(RawField::Title, entry.title.map(|t| t.content));
            raw.set(RawField::Description, description);
            raw.set(RawField::ImageUrl, image);
            raw.set(RawField::EventUrl, url.clone());
            raw.set(RawField::RegistrationUrl, url);
            raw
        })
        .collect();

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventsignal_common::ErrorKind;

    const ICS: &str = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
PRODID:-//Library//Events//EN\r\n\
BEGIN:VEVENT\r\n\
UID:1@library\r\n\
DTSTAMP:20250101T000000Z\r\n\
SUMMARY:Toddler Story Time\r\n\
DESCRIPTION:Songs\\, rhymes and stories.\r\n\
LOCATION:Main Library\\, Room B\r\n\
URL:https://library.example.org/events/1\r\n\
DTSTART:20250305T100000\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
UID:2@library\r\n\
DTSTAMP:20250101T000000Z\r\n\
SUMMARY:Used Book Sale\r\n\
DTSTART;VALUE=DATE:20250308\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

    #[test]
    fn ical_events_become_raw_records() {
        let records = parse_feed(ICS).unwrap();
        assert_eq!(records.len(), 2);

        let story = &records[0];
        assert_eq!(story.title.as_deref(), Some("Toddler Story Time"));
        assert_eq!(story.description.as_deref(), Some("Songs, rhymes and stories."));
        assert_eq!(story.location.as_deref(), Some("Main Library, Room B"));
        assert_eq!(story.date_text.as_deref(), Some("2025-03-05"));
        assert_eq!(story.time_text.as_deref(), Some("10:00 AM"));
        assert_eq!(story.event_url, story.registration_url);
    }

    #[test]
    fn all_day_events_have_no_time() {
        let records = parse_feed(ICS).unwrap();
        assert_eq!(records[1].date_text.as_deref(), Some("2025-03-08"));
        assert_eq!(records[1].time_text, None);
        assert_eq!(records[1].event_url, None);
    }

    #[test]
    fn rss_items_are_accepted() {
        let rss = r#"<?xml version="1.0"?>
            <rss version="2.0"><channel>
              <title>Parks</title>
              <link>https://parks.example.org</link>
              <description>Events</description>
              <item>
                <title>Bird Walk</title>
                <link>https://parks.example.org/bird-walk</link>
                <description>Bring binoculars.</description>
              </item>
            </channel></rss>"#;
        let records = parse_feed(rss).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title.as_deref(), Some("Bird Walk"));
        assert_eq!(
            records[0].event_url.as_deref(),
            Some("https://parks.example.org/bird-walk")
        );
        assert_eq!(records[0].date_text, None);
    }

    #[test]
    fn publication_date_is_not_taken_as_event_date() {
        let rss = r#"<?xml version="1.0"?>
            <rss version="2.0"><channel>
              <title>Parks News</title>
              <link>https://parks.example.org</link>
              <description>News</description>
              <item>
                <title>Trail Closure Update</title>
                <link>https://parks.example.org/news/trail-closure</link>
                <pubDate>Mon, 03 Mar 2025 09:30:00 GMT</pubDate>
              </item>
            </channel></rss>"#;
        let records = parse_feed(rss).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].date_text, None);
        assert_eq!(records[0].time_text, None);
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let err = parse_feed("<html><body>not a feed</body></html>").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ParseError);
    }

    #[test]
    fn unescape_handles_rfc5545_sequences() {
        assert_eq!(unescape_text(r"a\, b\; c\nd\\e"), "a, b; c\nd\\e");
    }
}
