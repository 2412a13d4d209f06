//! Typing of raw field strings.
//!
//! Numbers become [`ParsedValue::Number`], unit codes stay text and the time
//! field becomes epoch seconds when document timestamps are in use. A value
//! that fails to parse becomes `None` for its field only.

use crate::constants::{TIME_FIELD, TIMEZONE_FIELD, UNITS_SUFFIX};
use crate::models::{ParsedRecord, ParsedValue, RawRecord, SupportedZone, TimestampMode};
use chrono::{Local, NaiveDate, NaiveDateTime, TimeZone};
use tracing::debug;

/// Parse a raw record; the `timezone` key is consumed and not copied out
pub fn parse(raw: &RawRecord, mode: TimestampMode, date_time_format: &str) -> ParsedRecord {
    let zone = raw.get(TIMEZONE_FIELD).cloned().flatten();

    raw.iter()
        .filter(|(field, _)| field.as_str() != TIMEZONE_FIELD)
        .map(|(field, value)| {
            let parsed = value.as_deref().and_then(|value| {
                if field.ends_with(UNITS_SUFFIX) {
                    Some(ParsedValue::Text(value.trim().to_string()))
                } else if field == TIME_FIELD && mode == TimestampMode::Document {
                    parse_time(value, date_time_format, zone.as_deref()).map(ParsedValue::Timestamp)
                } else {
                    parse_number(value).map(ParsedValue::Number)
                }
            });
            if parsed.is_none() && value.is_some() {
                debug!("could not parse {} value {:?}", field, value);
            }
            (field.clone(), parsed)
        })
        .collect()
}

/// Parse a decimal number, ignoring surrounding whitespace
pub fn parse_number(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok()
}

/// Parse a document timestamp into epoch seconds.
///
/// GMT and UTC (in any case) interpret the time as UTC; any other zone,
/// including none at all, interprets it as local time. A local time that
/// falls into a DST gap does not exist and yields `None`.
pub fn parse_time(value: &str, format: &str, zone: Option<&str>) -> Option<i64> {
    let value = value.trim();
    let naive = NaiveDateTime::parse_from_str(value, format)
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(value, format)
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })?;

    match zone.and_then(SupportedZone::from_code) {
        Some(_) => Some(naive.and_utc().timestamp()),
        None => Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|local| local.timestamp()),
    }
}
