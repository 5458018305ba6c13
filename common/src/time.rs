//! Time utilities for bankcore.

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};

use crate::error::BankError;

/// A timestamp with timezone (always UTC for bankcore).
pub type Timestamp = DateTime<Utc>;

/// Get the current timestamp.
pub fn now() -> Timestamp {
    Utc::now()
}

/// Which end of an inclusive range a date bound is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundSide {
    Start,
    End,
}

/// Parse a caller-supplied date bound.
///
/// Accepts RFC 3339 timestamps or plain `YYYY-MM-DD` dates. A plain date
/// expands to the first instant of the day for a start bound and the last
/// instant of the day for an end bound, so both bounds stay inclusive.
pub fn parse_date_bound(raw: &str, side: BoundSide) -> Result<Timestamp, BankError> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }

    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| BankError::InvalidRequest {
        message: format!("Invalid date: {}", raw),
        field: Some(match side {
            BoundSide::Start => "start_date".to_string(),
            BoundSide::End => "end_date".to_string(),
        }),
    })?;

    let time = match side {
        BoundSide::Start => NaiveTime::MIN,
        BoundSide::End => NaiveTime::from_hms_nano_opt(23, 59, 59, 999_999_999)
            .unwrap_or(NaiveTime::MIN),
    };
    Ok(Utc.from_utc_datetime(&date.and_time(time)))
}

/// Inclusive timestamp range; either end may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<Timestamp>,
    pub end: Option<Timestamp>,
}

impl DateRange {
    pub fn new(start: Option<Timestamp>, end: Option<Timestamp>) -> Result<Self, BankError> {
        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                return Err(BankError::InvalidRequest {
                    message: "start_date must not be after end_date".to_string(),
                    field: Some("start_date".to_string()),
                });
            }
        }
        Ok(Self { start, end })
    }

    /// Check if a timestamp falls inside the range (bounds inclusive).
    pub fn contains(&self, ts: Timestamp) -> bool {
        self.start.map_or(true, |s| ts >= s) && self.end.map_or(true, |e| ts <= e)
    }
}
