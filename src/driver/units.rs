//! Unit code to METRICWX conversions.
//!
//! Every numeric value whose source unit code is known gets normalised to
//! METRICWX (degree C, m/s, mbar, mm). Fields without a code, or with a code
//! the table does not know, pass through unchanged.

use crate::constants::units_field;
use crate::models::{ParsedRecord, ParsedValue, SensorMap};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const KNOT_TO_METER_PER_SECOND: f64 = 1852.0 / 3600.0;
const MILE_PER_HOUR_TO_METER_PER_SECOND: f64 = 0.44704;
const INCH_HG_TO_MILLIBAR: f64 = 33.863_886_666_7;
const INCH_TO_MILLIMETER: f64 = 25.4;

/// A conversion into the METRICWX unit of the same quantity
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitConversion {
    FahrenheitToCelsius,
    KmPerHourToMeterPerSecond,
    MilePerHourToMeterPerSecond,
    KnotToMeterPerSecond,
    HectopascalToMillibar,
    InchHgToMillibar,
    InchToMillimeter,
    /// `value * scale + offset`
    Linear {
        scale: f64,
        #[serde(default)]
        offset: f64,
    },
}

impl UnitConversion {
    pub fn apply(self, value: f64) -> f64 {
        match self {
            UnitConversion::FahrenheitToCelsius => (value - 32.0) * 5.0 / 9.0,
            UnitConversion::KmPerHourToMeterPerSecond => value / 3.6,
            UnitConversion::MilePerHourToMeterPerSecond => {
                value * MILE_PER_HOUR_TO_METER_PER_SECOND
            }
            UnitConversion::KnotToMeterPerSecond => value * KNOT_TO_METER_PER_SECOND,
            UnitConversion::HectopascalToMillibar => value,
            UnitConversion::InchHgToMillibar => value * INCH_HG_TO_MILLIBAR,
            UnitConversion::InchToMillimeter => value * INCH_TO_MILLIMETER,
            UnitConversion::Linear { scale, offset } => value * scale + offset,
        }
    }
}

/// Unit code -> conversion lookup
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionTable {
    entries: BTreeMap<String, UnitConversion>,
}

impl Default for ConversionTable {
    fn default() -> Self {
        Self::metricwx()
    }
}

impl ConversionTable {
    /// A table with no entries
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// The built-in unit codes
    pub fn metricwx() -> Self {
        use UnitConversion::*;

        let builtin = [
            ("Degrees F", FahrenheitToCelsius),
            ("degree_F", FahrenheitToCelsius),
            ("km/h", KmPerHourToMeterPerSecond),
            ("km_per_hour", KmPerHourToMeterPerSecond),
            ("mile_per_hour", MilePerHourToMeterPerSecond),
            ("mph", MilePerHourToMeterPerSecond),
            ("knot", KnotToMeterPerSecond),
            ("hPa", HectopascalToMillibar),
            ("inHg", InchHgToMillibar),
            ("inch", InchToMillimeter),
        ];
        Self {
            entries: builtin
                .into_iter()
                .map(|(code, conversion)| (code.to_string(), conversion))
                .collect(),
        }
    }

    /// Add entries, replacing any existing conversion for the same code
    pub fn with_overrides(mut self, overrides: impl IntoIterator<Item = (String, UnitConversion)>) -> Self {
        self.entries.extend(overrides);
        self
    }

    /// Conversion for an exact unit code; surrounding whitespace is ignored
    pub fn get(&self, code: &str) -> Option<UnitConversion> {
        self.entries
            .get(code)
            .or_else(|| self.entries.get(code.trim()))
            .copied()
    }

    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Normalise every numeric field whose unit code is known.
    ///
    /// The code comes from the sensor map when fixed, otherwise from the
    /// field's `<field>_units` entry in `record`. Unit fields themselves and
    /// other non-numeric values are copied as they are.
    pub fn convert(&self, record: &ParsedRecord, sensor_map: &SensorMap) -> ParsedRecord {
        record
            .iter()
            .map(|(field, value)| {
                let converted = match value {
                    Some(ParsedValue::Number(number)) => {
                        let conversion = sensor_map
                            .fixed_units(field)
                            .or_else(|| document_units(record, field))
                            .and_then(|code| self.get(code));
                        Some(ParsedValue::Number(match conversion {
                            Some(conversion) => conversion.apply(*number),
                            None => *number,
                        }))
                    }
                    other => other.clone(),
                };
                (field.clone(), converted)
            })
            .collect()
    }
}

fn document_units<'a>(record: &'a ParsedRecord, field: &str) -> Option<&'a str> {
    record
        .get(&units_field(field))?
        .as_ref()?
        .as_text()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(actual: f64, expected: f64, tolerance: f64) -> bool {
        (actual - expected).abs() < tolerance
    }

    #[test]
    fn test_builtin_conversions() {
        let table = ConversionTable::default();
        let apply = |code: &str, value: f64| table.get(code).unwrap().apply(value);

        assert!(close(apply("Degrees F", 68.0), 20.0, 1e-9));
        assert!(close(apply("degree_F", 32.0), 0.0, 1e-9));
        assert!(close(apply("km/h", 10.0), 2.7778, 1e-4));
        assert!(close(apply("km_per_hour", 36.0), 10.0, 1e-9));
        assert_eq!(apply("hPa", 1013.0), 1013.0);
        assert!(close(apply("mph", 10.0), 4.4704, 1e-9));
        assert!(close(apply("knot", 10.0), 5.1444, 1e-4));
        assert!(close(apply("inHg", 29.92), 1013.21, 1e-2));
        assert!(close(apply("inch", 1.0), 25.4, 1e-9));
    }

    #[test]
    fn test_lookup_is_exact_but_trims() {
        let table = ConversionTable::default();
        assert!(table.get(" km/h ").is_some());
        assert!(table.get("KM/H").is_none());
        assert!(table.get("furlongs").is_none());
    }

    #[test]
    fn test_overrides_replace_builtin_codes() {
        let table = ConversionTable::default().with_overrides([
            ("hPa".to_string(), UnitConversion::Linear { scale: 2.0, offset: 1.0 }),
            ("deg K".to_string(), UnitConversion::Linear { scale: 1.0, offset: -273.15 }),
        ]);
        assert_eq!(table.get("hPa").unwrap().apply(10.0), 21.0);
        assert!(close(table.get("deg K").unwrap().apply(293.15), 20.0, 1e-9));
        assert!(table.codes().any(|code| code == "deg K"));
    }

    #[test]
    fn test_linear_deserialises_with_default_offset() {
        #[derive(Deserialize)]
        struct Wrapper {
            conversion: UnitConversion,
        }
        let wrapper: Wrapper = toml::from_str("conversion = { linear = { scale = 3.0 } }").unwrap();
        assert_eq!(
            wrapper.conversion,
            UnitConversion::Linear { scale: 3.0, offset: 0.0 }
        );
        let named: Wrapper = toml::from_str("conversion = \"inch_hg_to_millibar\"").unwrap();
        assert_eq!(named.conversion, UnitConversion::InchHgToMillibar);
    }

    #[test]
    fn test_empty_table_passes_everything_through() {
        let table = ConversionTable::empty();
        let mut record = ParsedRecord::new();
        record.insert("outTemp".into(), Some(ParsedValue::Number(68.0)));
        record.insert("outTemp_units".into(), Some(ParsedValue::Text("Degrees F".into())));

        let converted = table.convert(&record, &SensorMap::new());
        assert_eq!(converted, record);
    }
}
