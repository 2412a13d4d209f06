//! Extraction of raw field strings from the document.

use crate::constants::{TIME_FIELD, TIMEZONE_FIELD, units_field};
use crate::document::DocumentSource;
use crate::models::{RawRecord, SensorMap, TimestampMode, TimezoneSpec, UnitSource};

/// Resolve every mapped field against `document`.
///
/// The record holds one key per mapped field, one `<field>_units` key per
/// field whose units come from the document, and a `timezone` key when
/// document timestamps are in use. A location that does not resolve yields
/// `None` for its key; nothing here fails.
pub fn extract<D>(
    document: &D,
    sensor_map: &SensorMap,
    mode: TimestampMode,
    time_zone: &TimezoneSpec,
) -> RawRecord
where
    D: DocumentSource + ?Sized,
{
    let mut record = RawRecord::new();

    for mapping in sensor_map.iter() {
        record.insert(mapping.field.clone(), document.resolve(&mapping.value));
        if let Some(UnitSource::Selector(selector)) = &mapping.units {
            record.insert(units_field(&mapping.field), document.resolve(selector));
        }
    }

    if mode == TimestampMode::Document && sensor_map.contains(TIME_FIELD) {
        let zone = match time_zone {
            TimezoneSpec::Local => None,
            TimezoneSpec::Fixed(zone) => Some(zone.code().to_string()),
            TimezoneSpec::Selector(selector) => document.resolve(selector),
        };
        record.insert(TIMEZONE_FIELD.to_string(), zone);
    }

    record
}
