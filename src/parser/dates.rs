use std::sync::LazyLock;

use chrono::{Datelike, NaiveDate, NaiveDateTime, TimeDelta};
use regex::Regex;
use thiserror::Error;

static TODAY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"today|\b0 days? ago\b").unwrap());
static YESTERDAY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"yesterday|\b1 day ago\b").unwrap());
static HOURS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d+)\s*h(?:ours?)?\s*ago").unwrap());
static DAYS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d+)\s*d(?:ays?)?\s*ago").unwrap());
static MONTHS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d+)\s*mo(?:nths?)?\s*ago").unwrap());
static ON_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^on\s+([a-z]{3,})\s+(\d+)(?:st|nd|rd|th)?").unwrap());

const MONTHS: [&str; 12] = [
    "january", "february", "march", "april", "may", "june",
    "july", "august", "september", "october", "november", "december",
];

/// Months are approximated as fixed 30-day spans.
const DAYS_PER_MONTH: i64 = 30;

/// The posting date text could not be resolved to a calendar date.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unparseable posting date: {raw:?}")]
pub struct Unparseable {
    pub raw: String,
}

/// Resolve a relative or absolute posting-date string against `now`.
///
/// Rules are tried in order and the first match wins: today, yesterday,
/// `N h ago`, `N d ago`, `N mo ago`, `on Month Day` (rolled back a year when
/// it would land in the future), and finally an absolute `Mon D, YYYY`.
pub fn normalize(raw: &str, now: NaiveDateTime) -> Result<NaiveDate, Unparseable> {
    let unparseable = || Unparseable { raw: raw.to_string() };
    let text = strip_posted(&raw.to_lowercase());
    let today = now.date();

    if text.is_empty() {
        return Err(unparseable());
    }

    if TODAY_RE.is_match(&text) {
        return Ok(today);
    }
    if YESTERDAY_RE.is_match(&text) {
        return today.pred_opt().ok_or_else(unparseable);
    }

    if let Some(n) = capture_count(&HOURS_RE, &text) {
        return TimeDelta::try_hours(n)
            .and_then(|d| now.checked_sub_signed(d))
            .map(|dt| dt.date())
            .ok_or_else(unparseable);
    }
    if let Some(n) = capture_count(&DAYS_RE, &text) {
        return days_before(today, n).ok_or_else(unparseable);
    }
    if let Some(n) = capture_count(&MONTHS_RE, &text) {
        return n
            .checked_mul(DAYS_PER_MONTH)
            .and_then(|days| days_before(today, days))
            .ok_or_else(unparseable);
    }

    if let Some(caps) = ON_DATE_RE.captures(&text) {
        // A recognised "on Month Day" that names an invalid date does not fall through.
        return month_day(&caps[1], &caps[2], today).ok_or_else(unparseable);
    }

    NaiveDate::parse_from_str(raw.trim(), "%b %d, %Y").map_err(|_| unparseable())
}

fn strip_posted(text: &str) -> String {
    let text = text.trim();
    let text = text.strip_prefix("posted").unwrap_or(text).trim_start();
    let text = text.strip_suffix("posted").unwrap_or(text);
    text.trim().to_string()
}

fn capture_count(re: &Regex, text: &str) -> Option<i64> {
    re.captures(text)?.get(1)?.as_str().parse().ok()
}

fn days_before(date: NaiveDate, days: i64) -> Option<NaiveDate> {
    date.checked_sub_signed(TimeDelta::try_days(days)?)
}

fn month_day(month: &str, day: &str, today: NaiveDate) -> Option<NaiveDate> {
    let month = month_number(month)?;
    let day: u32 = day.parse().ok()?;

    let date = NaiveDate::from_ymd_opt(today.year(), month, day)?;
    if date > today {
        NaiveDate::from_ymd_opt(today.year() - 1, month, day)
    } else {
        Some(date)
    }
}

/// Three letters are an abbreviation, anything longer must be the full name.
fn month_number(name: &str) -> Option<u32> {
    let idx = if name.len() == 3 {
        MONTHS.iter().position(|m| m.starts_with(name))?
    } else {
        MONTHS.iter().position(|m| *m == name)?
    };
    Some(idx as u32 + 1)
}
