// ⏰ Period - The month a sheet covers
//
// Sheet titles look like "March 2022" (anything after the year is ignored).
// The period runs from the first to the last day of that month; its end is
// the timestamp stamped on every node and edge of the run.

use crate::error::{CircleError, Result};
use chrono::{Datelike, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    /// Title the period was parsed from
    pub label: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Period {
    /// Parse "<Month> <YYYY>" (full or abbreviated English month name)
    pub fn parse(label: &str) -> Result<Self> {
        let unparsable = || CircleError::UnparsablePeriod(label.to_string());

        let mut parts = label.split_whitespace();
        let month = parts.next().ok_or_else(unparsable)?;
        let year = parts.next().ok_or_else(unparsable)?;

        // Year must open with four digits; "2022," or "2022-final" still count
        let digits: String = year.chars().take_while(|c| c.is_ascii_digit()).collect();
        if digits.len() != 4 {
            return Err(unparsable());
        }

        // "Sept", "Sep." and "September" all name the same month: parse the
        // first three letters, then require the word to spell out that month
        let month = month.trim_end_matches('.').to_lowercase();
        let abbreviation: String = month.chars().take(3).collect();
        let start = NaiveDate::parse_from_str(&format!("01 {} {}", abbreviation, digits), "%d %b %Y")
            .map_err(|_| unparsable())?;
        if !start.format("%B").to_string().to_lowercase().starts_with(&month) {
            return Err(unparsable());
        }

        let end = start
            .checked_add_months(Months::new(1))
            .and_then(|next| next.pred_opt())
            .ok_or_else(unparsable)?;

        Ok(Period {
            label: label.trim().to_string(),
            start,
            end,
        })
    }

    /// Short namespace used in node/edge addresses, e.g. "2022-03"
    pub fn key(&self) -> String {
        format!("{:04}-{:02}", self.start.year(), self.start.month())
    }

    /// Milliseconds since the epoch at the start (UTC) of the last day
    pub fn end_timestamp_ms(&self) -> i64 {
        self.end
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp_millis())
            .unwrap_or_default()
    }
}

impl fmt::Display for Period {
    /// "2022/3/1–31"
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}–{}",
            self.start.year(),
            self.start.month(),
            self.start.day(),
            self.end.day()
        )
    }
}
