//! Due-date fragments like "Due 3/5".

use std::sync::OnceLock;

use chrono::{Datelike, Months, NaiveDate};
use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DueDateError {
    #[error("no \"Due M/D\" in {0:?}")]
    Format(String),

    #[error("invalid date: {month}/{day}")]
    InvalidDate { month: u32, day: u32 },
}

fn due_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"Due (\d{1,2})/(\d{1,2})").expect("static regex"))
}

/// Parse the first "Due M/D" in `text` into a date that is not before `today`.
///
/// The month and day are placed in `today`'s year; if that lands strictly
/// before `today` the date is moved to next year (a January bill read in
/// December). Feb 29 moving into a non-leap year clamps to Feb 28.
pub fn parse_due_date(text: &str, today: NaiveDate) -> Result<NaiveDate, DueDateError> {
    let captures = due_pattern()
        .captures(text)
        .ok_or_else(|| DueDateError::Format(text.to_string()))?;

    // Both groups are 1-2 ASCII digits, so these parses cannot fail.
    let month: u32 = captures[1].parse().unwrap_or(0);
    let day: u32 = captures[2].parse().unwrap_or(0);

    let candidate = NaiveDate::from_ymd_opt(today.year(), month, day)
        .ok_or(DueDateError::InvalidDate { month, day })?;

    if candidate < today {
        return candidate
            .checked_add_months(Months::new(12))
            .ok_or(DueDateError::InvalidDate { month, day });
    }

    Ok(candidate)
}
