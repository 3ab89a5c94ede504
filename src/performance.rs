//! Performance text to a comparable number: seconds, meters or points.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::classify::EventRule;
use crate::error::{RowError, RowErrorKind};
use crate::models::EventKind;

static DURATION_SECONDS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{1,2}(?:\.\d+)?)$").unwrap());

static DURATION_MINUTES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,2}):(\d{2}(?:\.\d+)?)$").unwrap());

static DURATION_HOURS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+):(\d{2}):(\d{2}(?:\.\d+)?)$").unwrap());

static BARE_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+(\.\d+)?$").unwrap());

/// Tokens meaning the athlete has no valid mark: not started, not finished,
/// disqualified, no mark, no height, retired, did not compete.
const INVALID_SENTINELS: &[&str] = &["", "-", "DNS", "DNF", "DQ", "DSQ", "NM", "NH", "RET", "DNC"];

const COLUMN: &str = "result_text";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Performance {
    Valid(f64),
    /// An expected outcome (sentinel or illegal wind), not an error
    Invalid,
}

impl Performance {
    pub fn value(self) -> Option<f64> {
        match self {
            Performance::Valid(v) => Some(v),
            Performance::Invalid => None,
        }
    }
}

pub struct PerformanceParser {
    wind_limit: f64,
}

impl PerformanceParser {
    pub fn new(wind_limit: f64) -> Self {
        Self { wind_limit }
    }

    pub fn parse(&self, text: &str, wind: &str, rule: EventRule) -> Result<Performance, RowError> {
        let trimmed = text.trim();
        if is_invalid_sentinel(trimmed) {
            return Ok(Performance::Invalid);
        }

        let (mark, wind_assisted) = strip_markers(trimmed);

        let value = match rule.kind {
            EventKind::TimeAscending => parse_duration(mark).map_err(|msg| error(text, msg))?,
            EventKind::DistanceDescending | EventKind::PointsDescending => {
                parse_number(mark).map_err(|msg| error(text, msg))?
            }
        };

        if rule.wind_relevant && (wind_assisted || self.is_illegal_wind(wind)) {
            return Ok(Performance::Invalid);
        }

        Ok(Performance::Valid(value))
    }

    fn is_illegal_wind(&self, wind: &str) -> bool {
        parse_wind(wind).is_some_and(|w| w > self.wind_limit)
    }
}

impl Default for PerformanceParser {
    fn default() -> Self {
        Self::new(crate::config::WIND_LIMIT)
    }
}

fn error(text: &str, message: String) -> RowError {
    RowError::new(RowErrorKind::PerformanceParse, COLUMN, text, message)
}

pub fn is_invalid_sentinel(text: &str) -> bool {
    let upper = text.trim().to_ascii_uppercase();
    INVALID_SENTINELS.contains(&upper.as_str())
}

/// Returns the bare mark and whether a wind-assisted `w` marker was present.
fn strip_markers(text: &str) -> (&str, bool) {
    let mut mark = text.trim_start_matches(['=', '*']).trim();
    let mut wind_assisted = false;
    loop {
        let stripped = mark.trim_end_matches(['A', 'h', 'H', 'i', '*', '#']).trim_end();
        let stripped = match stripped.strip_suffix('w') {
            Some(rest) => {
                wind_assisted = true;
                rest.trim_end()
            }
            None => stripped,
        };
        if stripped.len() == mark.len() {
            break;
        }
        mark = stripped;
    }
    (mark, wind_assisted)
}

/// Parses `SS.ss`, `M:SS.ss` or `H:MM:SS.ss` into seconds.
pub fn parse_duration(text: &str) -> Result<f64, String> {
    let text = text.trim();

    if let Some(caps) = DURATION_SECONDS.captures(text) {
        return seconds(&caps[1]);
    }

    if let Some(caps) = DURATION_MINUTES.captures(text) {
        let mins = whole(&caps[1]);
        check_range("minutes", mins)?;
        return Ok(mins * 60.0 + seconds(&caps[2])?);
    }

    if let Some(caps) = DURATION_HOURS.captures(text) {
        let hours = whole(&caps[1]);
        let mins = whole(&caps[2]);
        check_range("minutes", mins)?;
        return Ok(hours * 3600.0 + mins * 60.0 + seconds(&caps[3])?);
    }

    Err(format!("'{}' is not a SS.ss, M:SS.ss or H:MM:SS.ss duration", text))
}

/// Parses a bare decimal or integer; a decimal comma is accepted.
pub fn parse_number(text: &str) -> Result<f64, String> {
    let normalized = text.trim().replace(',', ".");
    if !BARE_NUMBER.is_match(&normalized) {
        return Err(format!("'{}' is not a numeric mark", text));
    }
    normalized
        .parse::<f64>()
        .map_err(|e| format!("'{}' is not a numeric mark: {}", text, e))
}

fn parse_wind(wind: &str) -> Option<f64> {
    let normalized = wind.trim().replace(',', ".");
    if normalized.is_empty() {
        return None;
    }
    normalized.parse::<f64>().ok()
}

// Captures are digit-only, so these parses cannot fail.
fn whole(digits: &str) -> f64 {
    digits.parse::<u64>().unwrap_or(0) as f64
}

fn seconds(text: &str) -> Result<f64, String> {
    let secs = text.parse::<f64>().unwrap_or(0.0);
    check_range("seconds", secs)?;
    Ok(secs)
}

fn check_range(name: &str, value: f64) -> Result<(), String> {
    if value >= 60.0 {
        return Err(format!("{} component {} is out of range", name, value));
    }
    Ok(())
}

/// Display rule for durations, at hundredth precision.
///
/// Under a minute `S.cc`, under an hour `M:SS.cc`, otherwise `H:MM:SS` with
/// `.cc` appended only when the hundredths are non-zero.
pub fn format_duration(seconds: f64) -> String {
    let total = (seconds * 100.0).round() as u64;
    let cc = total % 100;
    let whole = total / 100;
    let (h, m, s) = (whole / 3600, (whole % 3600) / 60, whole % 60);

    if whole < 60 {
        format!("{}.{:02}", s, cc)
    } else if whole < 3600 {
        format!("{}:{:02}.{:02}", m, s, cc)
    } else if cc == 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}:{:02}.{:02}", h, m, s, cc)
    }
}
