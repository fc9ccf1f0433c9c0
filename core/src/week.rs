//! Week-key arithmetic.
//!
//! A menu week runs Monday to Friday. Saturday still belongs to the week that
//! just ended, while Sunday already belongs to the upcoming one: the source
//! publishes next week's menu on Sunday.

use anyhow::{Context, Result};
use chrono::{Datelike, Days, NaiveDate, Weekday};

use crate::models::{DayToDateMap, WeekRange};

/// Location used when none is given.
pub const DEFAULT_LOCATION: &str = "london";

const DATE_FORMAT: &str = "%Y-%m-%d";

#[must_use]
pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
        .with_context(|| format!("Invalid date '{s}'. Use YYYY-MM-DD"))
}

/// The Monday a date's menu week starts on.
#[must_use]
pub fn week_monday(date: NaiveDate) -> NaiveDate {
    if date.weekday() == Weekday::Sun {
        return date + Days::new(1);
    }
    date - Days::new(u64::from(date.weekday().num_days_from_monday()))
}

#[must_use]
pub fn week_key(location: &str, start_date: &str, end_date: &str) -> String {
    format!("{location}-{start_date}-{end_date}")
}

#[must_use]
pub fn week_range(date: NaiveDate, location: &str) -> WeekRange {
    let monday = week_monday(date);
    let friday = monday + Days::new(4);
    let start_date = format_date(monday);
    let end_date = format_date(friday);
    let week_key = week_key(location, &start_date, &end_date);
    WeekRange {
        start_date,
        end_date,
        week_key,
    }
}

#[must_use]
pub fn day_to_date_map(monday: NaiveDate) -> DayToDateMap {
    let at = |offset: u64| format_date(monday + Days::new(offset));
    DayToDateMap {
        monday: at(0),
        tuesday: at(1),
        wednesday: at(2),
        thursday: at(3),
        friday: at(4),
    }
}

#[must_use]
pub fn day_name(date: NaiveDate) -> &'static str {
    match date.weekday() {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

/// Inclusive membership check on zero-padded date strings.
#[must_use]
pub fn is_date_in_week(date: &str, range: &WeekRange) -> bool {
    date >= range.start_date.as_str() && date <= range.end_date.as_str()
}

#[must_use]
pub fn current_week_range(today: NaiveDate, location: &str) -> WeekRange {
    week_range(today, location)
}

/// The week starting on the first Monday strictly after `today`.
#[must_use]
pub fn next_week_range(today: NaiveDate, location: &str) -> WeekRange {
    let days_until_monday = 7 - u64::from(today.weekday().num_days_from_monday());
    week_range(today + Days::new(days_until_monday), location)
}

/// The week an ingestion run on `today` should store its menu under.
///
/// Scheduled runs fire on the weekend before the week begins. Sunday already
/// resolves forward through [`week_monday`]; Saturday has to be pushed
/// explicitly.
#[must_use]
pub fn menu_week_range(today: NaiveDate, location: &str) -> WeekRange {
    if today.weekday() == Weekday::Sat {
        return week_range(today + Days::new(2), location);
    }
    week_range(today, location)
}
