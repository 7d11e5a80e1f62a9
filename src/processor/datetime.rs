//! Best-effort datetime resolution from free text.
//!
//! Rules are tried in order and the first one that resolves wins:
//!   1. `weekday_time` — "Friday 5pm", always the *next* such weekday (1-7 days out)
//!   2. `fuzzy` — ISO dates, month-name dates, bare weekday names ("on Friday"),
//!      "tomorrow at 3pm", bare clock times
//!
//! Rules work on naive local time; the winner is localized to the
//! configured timezone before it is returned.

use std::sync::OnceLock;

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, LocalResult, NaiveDate, NaiveDateTime, NaiveTime,
    TimeZone, Weekday,
};
use chrono_tz::Tz;
use regex::{Captures, Regex};

/// A named datetime rule over scrubbed text and the local "now".
pub type DatetimeRule = fn(&str, NaiveDateTime) -> Option<NaiveDateTime>;

/// Resolution rules in precedence order.
pub const RULES: &[(&str, DatetimeRule)] = &[("weekday_time", weekday_time), ("fuzzy", fuzzy)];

const WEEKDAYS: &str = r"monday|tuesday|wednesday|thursday|friday|saturday|sunday|mon|tues|tue|wed|thurs|thur|thu|fri|sat|sun";
const MONTHS: &str = r"january|jan|february|feb|march|mar|april|apr|may|june|jun|july|jul|august|aug|september|sept|sep|october|oct|november|nov|december|dec";

fn re_weekday_time() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"(?i)\b({WEEKDAYS})\b,?\s+(?:at\s+|@\s*)?(\d{{1,2}})(?::(\d{{2}}))?(?:\s*([ap])\.?\s?m\b\.?|\b)"
        ))
        .unwrap()
    })
}

fn re_clock_time() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:(\d{1,2}):(\d{2})(?:\s*([ap])\.?\s?m\b\.?)?|(\d{1,2})\s*([ap])\.?\s?m\b\.?|(noon|midday|midnight)\b)",
        )
        .unwrap()
    })
}

fn re_iso_date() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})(?:[T ](\d{2}):(\d{2}))?").unwrap()
    })
}

fn re_month_day() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"(?i)\b({MONTHS})\b\.?\s+(\d{{1,2}})(?:st|nd|rd|th)?\b(?:,?\s+(\d{{4}})\b)?"
        ))
        .unwrap()
    })
}

fn re_day_month() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"(?i)\b(\d{{1,2}})(?:st|nd|rd|th)?\s+(?:of\s+)?({MONTHS})\b\.?(?:,?\s+(\d{{4}})\b)?"
        ))
        .unwrap()
    })
}

/// Full weekday names only; "sun" and "sat" are too common as words.
fn re_weekday_name() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(monday|tuesday|wednesday|thursday|friday|saturday|sunday)\b").unwrap()
    })
}

fn re_relative_day() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(today|tonight|tomorrow)\b").unwrap())
}

fn re_noise() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)https?://\S+|[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap()
    })
}

/// Resolve the first datetime expression in `text` relative to `now`.
///
/// Returns `None` when no rule matches; callers keep the raw text for
/// default-filling.
pub fn resolve_datetime(text: &str, now: DateTime<Tz>) -> Option<DateTime<FixedOffset>> {
    let scrubbed = re_noise().replace_all(text, " ");
    let local_now = now.naive_local();
    for (name, rule) in RULES {
        if let Some(naive) = rule(&scrubbed, local_now) {
            log::debug!("datetime rule '{}' resolved {}", name, naive);
            return Some(localize(naive, now.timezone()));
        }
    }
    None
}

/// Attach `tz` to a naive local time. Ambiguous times take the earlier
/// instant; times inside a DST gap are read as UTC wall time.
pub fn localize(naive: NaiveDateTime, tz: Tz) -> DateTime<FixedOffset> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt.fixed_offset(),
        LocalResult::Ambiguous(earliest, _) => earliest.fixed_offset(),
        LocalResult::None => tz.from_utc_datetime(&naive).fixed_offset(),
    }
}

/// Tomorrow at 10:00 local time, used when a meeting request names no time.
pub fn default_meeting_start(now: DateTime<Tz>) -> DateTime<FixedOffset> {
    let date = now.date_naive() + Duration::days(1);
    let ten = NaiveTime::from_hms_opt(10, 0, 0).unwrap_or_default();
    localize(date.and_time(ten), now.timezone())
}

/// "Friday 5pm" → the next Friday strictly after today, at 17:00.
pub fn weekday_time(text: &str, now: NaiveDateTime) -> Option<NaiveDateTime> {
    let caps = re_weekday_time().captures(text)?;
    let weekday = parse_weekday(&caps[1])?;
    let hour: u32 = caps[2].parse().ok()?;
    let minute: u32 = caps.get(3).map_or(Some(0), |m| m.as_str().parse().ok())?;
    let meridiem = caps.get(4).map(|m| m.as_str());
    let time = to_time(hour, minute, meridiem)?;

    Some(next_weekday(now.date(), weekday).and_time(time))
}

/// Date of the next `target` weekday after `today`. Never returns `today`.
pub fn next_weekday(today: NaiveDate, target: Weekday) -> NaiveDate {
    let current = today.weekday().num_days_from_monday() as i64;
    let wanted = target.num_days_from_monday() as i64;
    let mut days_ahead = (wanted - current).rem_euclid(7);
    if days_ahead == 0 {
        days_ahead = 7;
    }
    today + Duration::days(days_ahead)
}

/// Fallback scan for dates and clock times anywhere in the text.
pub fn fuzzy(text: &str, now: NaiveDateTime) -> Option<NaiveDateTime> {
    let clock = re_clock_time().captures(text).and_then(|c| clock_from_caps(&c));

    if let Some(caps) = re_iso_date().captures(text) {
        let year: i32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        let day: u32 = caps[3].parse().ok()?;
        let date = NaiveDate::from_ymd_opt(year, month, day)?;
        let time = match (caps.get(4), caps.get(5)) {
            (Some(h), Some(m)) => to_time(h.as_str().parse().ok()?, m.as_str().parse().ok()?, None)?,
            _ => clock.unwrap_or(NaiveTime::default()),
        };
        return Some(date.and_time(time));
    }

    if let Some(date) = month_name_date(text, now.date()) {
        return Some(date.and_time(clock.unwrap_or(NaiveTime::default())));
    }

    if let Some(weekday) = re_weekday_name()
        .captures(text)
        .and_then(|caps| parse_weekday(&caps[1]))
    {
        let date = next_weekday(now.date(), weekday);
        return Some(date.and_time(clock.unwrap_or(NaiveTime::default())));
    }

    let time = clock?;
    let date = match re_relative_day().captures(text) {
        Some(caps) if caps[1].eq_ignore_ascii_case("tomorrow") => now.date() + Duration::days(1),
        _ => now.date(),
    };
    Some(date.and_time(time))
}

fn month_name_date(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    let (month, day, year) = if let Some(caps) = re_month_day().captures(text) {
        (parse_month(&caps[1])?, caps[2].parse::<u32>().ok()?, caps.get(3))
    } else {
        let caps = re_day_month().captures(text)?;
        (parse_month(&caps[2])?, caps[1].parse::<u32>().ok()?, caps.get(3))
    };

    match year.and_then(|y| y.as_str().parse::<i32>().ok()) {
        Some(year) => NaiveDate::from_ymd_opt(year, month, day),
        None => {
            // No year given: the next occurrence on or after today.
            let this_year = NaiveDate::from_ymd_opt(today.year(), month, day)?;
            if this_year < today {
                NaiveDate::from_ymd_opt(today.year() + 1, month, day)
            } else {
                Some(this_year)
            }
        }
    }
}

fn clock_from_caps(caps: &Captures<'_>) -> Option<NaiveTime> {
    if let (Some(h), Some(m)) = (caps.get(1), caps.get(2)) {
        let meridiem = caps.get(3).map(|x| x.as_str());
        return to_time(h.as_str().parse().ok()?, m.as_str().parse().ok()?, meridiem);
    }
    if let (Some(h), Some(mer)) = (caps.get(4), caps.get(5)) {
        return to_time(h.as_str().parse().ok()?, 0, Some(mer.as_str()));
    }
    match caps.get(6)?.as_str().to_lowercase().as_str() {
        "midnight" => Some(NaiveTime::default()),
        _ => NaiveTime::from_hms_opt(12, 0, 0),
    }
}

/// Build a time of day, converting 12-hour markers:
/// `pm` with hour < 12 adds 12, `am` with hour == 12 becomes 0.
pub fn to_time(hour: u32, minute: u32, meridiem: Option<&str>) -> Option<NaiveTime> {
    let hour = match meridiem.map(|m| m.to_ascii_lowercase()) {
        Some(m) if m.starts_with('p') && hour < 12 => hour + 12,
        Some(m) if m.starts_with('a') && hour == 12 => 0,
        _ => hour,
    };
    NaiveTime::from_hms_opt(hour, minute, 0)
}

fn parse_weekday(s: &str) -> Option<Weekday> {
    let lower = s.to_lowercase();
    let day = match &lower[..lower.len().min(3)] {
        "mon" => Weekday::Mon,
        "tue" => Weekday::Tue,
        "wed" => Weekday::Wed,
        "thu" => Weekday::Thu,
        "fri" => Weekday::Fri,
        "sat" => Weekday::Sat,
        "sun" => Weekday::Sun,
        _ => return None,
    };
    Some(day)
}

fn parse_month(s: &str) -> Option<u32> {
    let lower = s.to_lowercase();
    let month = match &lower[..lower.len().min(3)] {
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
