//! Date and time normalization for scraped event text.
//!
//! Sites print dates every way imaginable ("Friday, March 7th", "3/7/25",
//! "2025-03-07T18:30:00", "Tonight"). Everything here reduces them to a
//! calendar date plus an optional [`EventTime`], relative to a reference date
//! (the day of the run). Unparseable input yields `None`, never an error.

use std::sync::LazyLock;

use chrono::{Datelike, Days, NaiveDate, Weekday};
use regex::{Captures, Regex};

use eventsignal_common::EventTime;

const MONTH: &str = r"(?P<month>jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sept(?:ember)?|sep|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)";
const MONTH_NC: &str = r"(?:jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sept(?:ember)?|sep|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)";
const RANGE_SEP: &str = r"(?:-|–|—|to|through|thru|until)";

// --- date patterns ---

static RE_ORDINAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,2})(?:st|nd|rd|th)\b").expect("valid regex"));
static RE_DATE_TIME_SEP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d)t(\d)").expect("valid regex"));
static RE_SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

static RE_ISO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?P<year>\d{4})[-/.](?P<month>\d{1,2})[-/.](?P<day>\d{1,2})(?:\D|$)")
        .expect("valid regex")
});
static RE_MONTH_DAY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"\b{MONTH}\b\.?\s*(?P<day>\d{{1,2}})\b(?:\s*{RANGE_SEP}\s*(?:{MONTH_NC}\b\.?\s*)?\d{{1,2}}\b)?(?:\s+(?P<year>\d{{4}})\b)?"
    ))
    .expect("valid regex")
});
static RE_DAY_MONTH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"\b(?P<day>\d{{1,2}})\s+(?:of\s+)?{MONTH}\b\.?(?:\s+(?P<year>\d{{4}})\b)?"
    ))
    .expect("valid regex")
});
static RE_SLASHED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?P<month>\d{1,2})/(?P<day>\d{1,2})(?:/(?P<year>\d{4}|\d{2}))?\b")
        .expect("valid regex")
});
static RE_DASHED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?P<month>\d{1,2})[-.](?P<day>\d{1,2})[-.](?P<year>\d{4}|\d{2})\b")
        .expect("valid regex")
});
static RE_RELATIVE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(today|tonight|tomorrow)\b").expect("valid regex"));
static RE_WEEKDAY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(monday|mon|tuesday|tues|tue|wednesday|wed|thursday|thurs|thur|thu|friday|fri|saturday|sat|sunday|sun)\b")
        .expect("valid regex")
});

// --- time patterns ---

static RE_MERIDIEM_DOTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([ap])\.\s?m\b\.?").expect("valid regex"));
static RE_NOON: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bnoon\b").expect("valid regex"));
static RE_MIDNIGHT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bmidnight\b").expect("valid regex"));
static RE_ALL_DAY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\ball[\s-]?day\b").expect("valid regex"));
static RE_TIME_RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"\b(?P<h1>\d{{1,2}})(?::(?P<m1>\d{{2}}))?\s*(?P<ap1>am|pm)?\s*{RANGE_SEP}\s*(?P<h2>\d{{1,2}})(?::(?P<m2>\d{{2}}))?\s*(?P<ap2>am|pm)\b"
    ))
    .expect("valid regex")
});
static RE_TIME_MERIDIEM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?P<h>\d{1,2})(?::(?P<m>\d{2}))?\s*(?P<ap>am|pm)\b").expect("valid regex")
});
static RE_TIME_24H: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?P<h>\d{1,2}):(?P<m>\d{2})\b").expect("valid regex"));

/// A resolved event date with its optional start time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizedWhen {
    pub date: NaiveDate,
    pub time: Option<EventTime>,
}

/// Resolve date and time text against `reference`. Returns `None` when the
/// date can't be understood; an unparseable time only drops the time.
///
/// When `time_text` is absent, a time embedded in `date_text`
/// (`2025-03-05T19:00`, `March 5, 2025 7pm`) is used instead.
pub fn normalize(
    date_text: &str,
    time_text: Option<&str>,
    reference: NaiveDate,
) -> Option<NormalizedWhen> {
    let date = parse_date(date_text, reference)?;
    let time = match time_text.map(str::trim).filter(|t| !t.is_empty()) {
        Some(time_text) => parse_time(time_text),
        None => parse_time(date_text),
    };
    Some(NormalizedWhen { date, time })
}

fn clean(text: &str) -> String {
    let lower = text.to_lowercase().replace(',', " ");
    let lower = RE_ORDINAL.replace_all(&lower, "$1");
    let lower = RE_DATE_TIME_SEP.replace_all(&lower, "$1 $2");
    RE_SPACES.replace_all(lower.trim(), " ").into_owned()
}

// --- dates ---

pub fn parse_date(text: &str, reference: NaiveDate) -> Option<NaiveDate> {
    let text = clean(text);
    if text.is_empty() {
        return None;
    }

    if let Some(date) = RE_ISO.captures(&text).and_then(|c| numeric_date(&c, reference)) {
        return Some(date);
    }
    for re in [&*RE_MONTH_DAY, &*RE_DAY_MONTH] {
        if let Some(date) = re.captures(&text).and_then(|c| named_month_date(&c, reference)) {
            return Some(date);
        }
    }
    for re in [&*RE_SLASHED, &*RE_DASHED] {
        if let Some(date) = re.captures(&text).and_then(|c| numeric_date(&c, reference)) {
            return Some(date);
        }
    }

    if let Some(c) = RE_RELATIVE.captures(&text) {
        return match &c[1] {
            "tomorrow" => reference.checked_add_days(Days::new(1)),
            _ => Some(reference),
        };
    }
    if let Some(c) = RE_WEEKDAY.captures(&text) {
        let weekday = weekday_from_name(&c[1])?;
        let ahead = (7 + weekday.num_days_from_monday() - reference.weekday().num_days_from_monday()) % 7;
        return reference.checked_add_days(Days::new(ahead as u64));
    }

    None
}

fn numeric_date(c: &Captures<'_>, reference: NaiveDate) -> Option<NaiveDate> {
    let month: u32 = c.name("month")?.as_str().parse().ok()?;
    let day: u32 = c.name("day")?.as_str().parse().ok()?;
    resolve(c.name("year").map(|y| y.as_str()), month, day, reference)
}

fn named_month_date(c: &Captures<'_>, reference: NaiveDate) -> Option<NaiveDate> {
    let month = month_from_name(c.name("month")?.as_str())?;
    let day: u32 = c.name("day")?.as_str().parse().ok()?;
    resolve(c.name("year").map(|y| y.as_str()), month, day, reference)
}

/// Build the date; without a year, take the nearest occurrence on or after
/// `reference`.
fn resolve(year: Option<&str>, month: u32, day: u32, reference: NaiveDate) -> Option<NaiveDate> {
    match year {
        Some(year) => {
            let year: i32 = year.parse().ok()?;
            let year = if year < 100 { 2000 + year } else { year };
            NaiveDate::from_ymd_opt(year, month, day)
        }
        // Eight years always covers the next 29 February.
        None => (0..8)
            .filter_map(|offset| NaiveDate::from_ymd_opt(reference.year() + offset, month, day))
            .find(|candidate| *candidate >= reference),
    }
}

fn month_from_name(name: &str) -> Option<u32> {
    let month = match name.get(..3)? {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}

fn weekday_from_name(name: &str) -> Option<Weekday> {
    let weekday = match name.get(..3)? {
        "mon" => Weekday::Mon,
        "tue" => Weekday::Tue,
        "wed" => Weekday::Wed,
        "thu" => Weekday::Thu,
        "fri" => Weekday::Fri,
        "sat" => Weekday::Sat,
        "sun" => Weekday::Sun,
        _ => return None,
    };
    Some(weekday)
}

// --- times ---

/// Parse the start time out of free text. Ranges keep the start, borrowing
/// the end's AM/PM when the start has none (`7-9pm` is 7 PM). "All day" and
/// bare hours without AM/PM are treated as no time.
pub fn parse_time(text: &str) -> Option<EventTime> {
    let text = clean(text);
    if text.is_empty() || RE_ALL_DAY.is_match(&text) {
        return None;
    }
    let text = RE_MERIDIEM_DOTS.replace_all(&text, "${1}m");
    let text = RE_NOON.replace_all(&text, "12:00 pm");
    let text = RE_MIDNIGHT.replace_all(&text, "12:00 am");

    if let Some(c) = RE_TIME_RANGE.captures(&text) {
        if let Some(time) = range_start(&c) {
            return Some(time);
        }
    }
    if let Some(c) = RE_TIME_MERIDIEM.captures(&text) {
        let hour: u32 = c["h"].parse().ok()?;
        let minute = minute_of(c.name("m").map(|m| m.as_str()))?;
        return twelve_hour(hour, minute, &c["ap"]);
    }
    if let Some(c) = RE_TIME_24H.captures(&text) {
        let hour: u32 = c["h"].parse().ok()?;
        let minute = minute_of(Some(&c["m"]))?;
        return EventTime::from_hm(hour, minute);
    }
    None
}

fn range_start(c: &Captures<'_>) -> Option<EventTime> {
    let start_hour: u32 = c["h1"].parse().ok()?;
    let start_minute = minute_of(c.name("m1").map(|m| m.as_str()))?;
    let end_hour: u32 = c["h2"].parse().ok()?;
    let end_meridiem = &c["ap2"];

    let meridiem = match c.name("ap1") {
        Some(ap) => ap.as_str(),
        // "11-1pm" starts in the morning.
        None if start_hour > end_hour && start_hour != 12 && end_meridiem == "pm" => "am",
        None => end_meridiem,
    };
    twelve_hour(start_hour, start_minute, meridiem)
}

fn minute_of(text: Option<&str>) -> Option<u32> {
    match text {
        Some(m) => m.parse().ok().filter(|m| *m < 60),
        None => Some(0),
    }
}

fn twelve_hour(hour: u32, minute: u32, meridiem: &str) -> Option<EventTime> {
    if !(1..=12).contains(&hour) {
        return None;
    }
    let hour = match (hour, meridiem) {
        (12, "am") => 0,
        (12, _) => 12,
        (h, "pm") => h + 12,
        (h, _) => h,
    };
    EventTime::from_hm(hour, minute)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    /// A Wednesday.
    fn reference() -> NaiveDate {
        ymd(2025, 1, 15)
    }

    fn time(s: &str) -> Option<String> {
        parse_time(s).map(|t| t.to_string())
    }

    #[test]
    fn textual_variants_of_one_day_agree() {
        for text in [
            "3/5/2025",
            "March 5, 2025",
            "Mar 5 2025",
            "2025-03-05",
            "Wednesday, March 5th, 2025",
            "5 March 2025",
            "03-05-2025",
            "3/5/25",
            "Mar. 5, 2025",
        ] {
            assert_eq!(parse_date(text, reference()), Some(ymd(2025, 3, 5)), "{text}");
        }
    }

    #[test]
    fn yearless_dates_never_resolve_to_the_past() {
        assert_eq!(parse_date("Mon, Mar 5", reference()), Some(ymd(2025, 3, 5)));
        assert_eq!(parse_date("Jan 10", reference()), Some(ymd(2026, 1, 10)));
        assert_eq!(parse_date("Jan 15", reference()), Some(ymd(2025, 1, 15)));
        assert_eq!(parse_date("12/31", reference()), Some(ymd(2025, 12, 31)));
    }

    #[test]
    fn leap_day_without_year_finds_next_leap_year() {
        assert_eq!(parse_date("February 29", reference()), Some(ymd(2028, 2, 29)));
    }

    #[test]
    fn relative_words_resolve_against_reference() {
        assert_eq!(parse_date("Today", reference()), Some(ymd(2025, 1, 15)));
        assert_eq!(parse_date("Tonight!", reference()), Some(ymd(2025, 1, 15)));
        assert_eq!(parse_date("Tomorrow", reference()), Some(ymd(2025, 1, 16)));
        assert_eq!(parse_date("Saturday", reference()), Some(ymd(2025, 1, 18)));
        assert_eq!(parse_date("Every Wednesday", reference()), Some(ymd(2025, 1, 15)));
        assert_eq!(parse_date("Mon", reference()), Some(ymd(2025, 1, 20)));
    }

    #[test]
    fn date_ranges_keep_the_first_day() {
        assert_eq!(parse_date("March 5 - 7, 2025", reference()), Some(ymd(2025, 3, 5)));
        assert_eq!(
            parse_date("March 30 to April 2, 2025", reference()),
            Some(ymd(2025, 3, 30))
        );
    }

    #[test]
    fn garbage_dates_are_rejected() {
        assert_eq!(parse_date("", reference()), None);
        assert_eq!(parse_date("Date TBA", reference()), None);
        assert_eq!(parse_date("13/45/2025", reference()), None);
        assert_eq!(parse_date("Marathon training", reference()), None);
    }

    #[test]
    fn times_render_on_twelve_hour_clock() {
        assert_eq!(time("7:00 PM").as_deref(), Some("07:00 PM"));
        assert_eq!(time("7pm").as_deref(), Some("07:00 PM"));
        assert_eq!(time("7 p.m.").as_deref(), Some("07:00 PM"));
        assert_eq!(time("10:30am").as_deref(), Some("10:30 AM"));
        assert_eq!(time("19:00").as_deref(), Some("07:00 PM"));
        assert_eq!(time("Noon").as_deref(), Some("12:00 PM"));
        assert_eq!(time("midnight").as_deref(), Some("12:00 AM"));
        assert_eq!(time("12:15 am").as_deref(), Some("12:15 AM"));
    }

    #[test]
    fn time_ranges_keep_the_start() {
        assert_eq!(time("6:30 - 8:00 PM").as_deref(), Some("06:30 PM"));
        assert_eq!(time("7-9pm").as_deref(), Some("07:00 PM"));
        assert_eq!(time("11 - 1pm").as_deref(), Some("11:00 AM"));
        assert_eq!(time("10am to 2pm").as_deref(), Some("10:00 AM"));
        assert_eq!(time("noon - 2pm").as_deref(), Some("12:00 PM"));
    }

    #[test]
    fn unparseable_times_are_absent() {
        assert_eq!(time("All Day"), None);
        assert_eq!(time("all-day"), None);
        assert_eq!(time("TBD"), None);
        assert_eq!(time("7"), None);
        assert_eq!(time("25:00"), None);
    }

    #[test]
    fn combined_datetime_supplies_missing_time() {
        let when = normalize("2025-03-05T19:00:00", None, reference()).unwrap();
        assert_eq!(when.date, ymd(2025, 3, 5));
        assert_eq!(when.time.map(|t| t.to_string()).as_deref(), Some("07:00 PM"));

        let when = normalize("March 5, 2025 7pm", Some(""), reference()).unwrap();
        assert_eq!(when.time.map(|t| t.to_string()).as_deref(), Some("07:00 PM"));
    }

    #[test]
    fn explicit_time_text_wins_over_embedded_time() {
        let when = normalize("2025-03-05T00:00:00", Some("6:30 PM"), reference()).unwrap();
        assert_eq!(when.time.map(|t| t.to_string()).as_deref(), Some("06:30 PM"));
    }

    #[test]
    fn plain_date_has_no_time() {
        let when = normalize("3/5/2025", None, reference()).unwrap();
        assert_eq!(when.time, None);
        assert_eq!(normalize("someday", Some("7pm"), reference()), None);
    }
}
