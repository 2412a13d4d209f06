//! Core data structures for the mapping and conversion pipeline.
//!
//! Defines the declarative sensor map, the time zone and timestamp mode
//! variants decided at configuration time, the per-cycle record shapes and
//! the loop packet handed to the consumer.

use crate::constants::{TIME_FIELD, unit_systems};
use crate::document::XmlSelector;
use crate::error::DriverError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Where packet timestamps come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampMode {
    /// "master": the driver's wall clock at the start of each cycle
    #[default]
    WallClock,
    /// "slave": the time field read from the document
    Document,
}

impl FromStr for TimestampMode {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "master" => Ok(TimestampMode::WallClock),
            "slave" => Ok(TimestampMode::Document),
            other => Err(DriverError::configuration(format!(
                "invalid timestamp_mode '{other}', expected 'master' or 'slave'"
            ))),
        }
    }
}

impl fmt::Display for TimestampMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimestampMode::WallClock => f.write_str("master"),
            TimestampMode::Document => f.write_str("slave"),
        }
    }
}

/// Time zone codes that document timestamps may be interpreted in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupportedZone {
    Gmt,
    Utc,
}

impl SupportedZone {
    /// Match a zone code, ignoring case and surrounding whitespace
    pub fn from_code(code: &str) -> Option<Self> {
        let code = code.trim();
        [SupportedZone::Gmt, SupportedZone::Utc]
            .into_iter()
            .find(|zone| zone.code().eq_ignore_ascii_case(code))
    }

    pub fn code(&self) -> &'static str {
        match self {
            SupportedZone::Gmt => "GMT",
            SupportedZone::Utc => "UTC",
        }
    }
}

/// Time zone applied to document timestamps
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TimezoneSpec {
    /// Local time
    #[default]
    Local,
    Fixed(SupportedZone),
    /// Zone code read from the document each cycle
    Selector(XmlSelector),
}

impl fmt::Display for TimezoneSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimezoneSpec::Local => f.write_str("local"),
            TimezoneSpec::Fixed(zone) => f.write_str(zone.code()),
            TimezoneSpec::Selector(selector) => write!(f, "({selector})"),
        }
    }
}

/// Where a field's source unit code comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitSource {
    /// A unit code fixed in configuration
    Fixed(String),
    /// A unit code read from the document each cycle
    Selector(XmlSelector),
}

/// Mapping of one output field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMapping {
    pub field: String,
    pub value: XmlSelector,
    pub units: Option<UnitSource>,
}

/// Declarative mapping of output fields to document locations
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SensorMap {
    mappings: BTreeMap<String, FieldMapping>,
}

impl SensorMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the mapping for `mapping.field`
    pub fn insert(&mut self, mapping: FieldMapping) {
        self.mappings.insert(mapping.field.clone(), mapping);
    }

    pub fn get(&self, field: &str) -> Option<&FieldMapping> {
        self.mappings.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.mappings.contains_key(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldMapping> {
        self.mappings.values()
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Fixed unit code configured for `field`, if any
    pub fn fixed_units(&self, field: &str) -> Option<&str> {
        match self.get(field)?.units.as_ref()? {
            UnitSource::Fixed(code) => Some(code),
            UnitSource::Selector(_) => None,
        }
    }
}

impl fmt::Display for SensorMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        f.write_str("{")?;
        for mapping in self.iter() {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            write!(f, "{}: ({})", mapping.field, mapping.value)?;
            match &mapping.units {
                Some(UnitSource::Fixed(code)) => write!(f, " [{code}]")?,
                Some(UnitSource::Selector(selector)) => write!(f, " [({selector})]")?,
                None => {}
            }
        }
        f.write_str("}")
    }
}

/// Raw strings pulled from the document, keyed by field name
pub type RawRecord = BTreeMap<String, Option<String>>;

/// A parsed field value
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedValue {
    Number(f64),
    /// Epoch seconds
    Timestamp(i64),
    /// Unit codes and time zone codes
    Text(String),
}

impl ParsedValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParsedValue::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<i64> {
        match self {
            ParsedValue::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ParsedValue::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// Typed values for one cycle; `None` marks a missing or unparseable field
pub type ParsedRecord = BTreeMap<String, Option<ParsedValue>>;

/// Observation packet emitted once per accepted cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopPacket {
    /// Epoch seconds
    #[serde(rename = "dateTime")]
    pub date_time: i64,

    /// Unit system of every observation (always METRICWX)
    #[serde(rename = "usUnits")]
    pub us_units: i32,

    /// Observations by field name; `None` is a missing reading
    #[serde(flatten)]
    pub observations: BTreeMap<String, Option<f64>>,
}

impl LoopPacket {
    pub fn new(date_time: i64, observations: BTreeMap<String, Option<f64>>) -> Self {
        Self {
            date_time,
            us_units: unit_systems::METRICWX,
            observations,
        }
    }

    /// Observation value, flattening missing readings and unknown fields
    pub fn get(&self, field: &str) -> Option<f64> {
        if field == TIME_FIELD {
            return Some(self.date_time as f64);
        }
        self.observations.get(field).copied().flatten()
    }
}

/// Result of one polling cycle
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Emitted(LoopPacket),
    /// The candidate timestamp was missing or not later than the watermark
    Suppressed {
        candidate: Option<i64>,
        watermark: i64,
    },
}

impl CycleOutcome {
    pub fn packet(&self) -> Option<&LoopPacket> {
        match self {
            CycleOutcome::Emitted(packet) => Some(packet),
            CycleOutcome::Suppressed { .. } => None,
        }
    }

    pub fn into_packet(self) -> Option<LoopPacket> {
        match self {
            CycleOutcome::Emitted(packet) => Some(packet),
            CycleOutcome::Suppressed { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_mode_parsing() {
        assert_eq!("master".parse::<TimestampMode>().unwrap(), TimestampMode::WallClock);
        assert_eq!(" SLAVE ".parse::<TimestampMode>().unwrap(), TimestampMode::Document);
        assert!("leader".parse::<TimestampMode>().is_err());
        assert_eq!(TimestampMode::Document.to_string(), "slave");
    }

    #[test]
    fn test_supported_zone_codes() {
        assert_eq!(SupportedZone::from_code("utc"), Some(SupportedZone::Utc));
        assert_eq!(SupportedZone::from_code(" GMT"), Some(SupportedZone::Gmt));
        assert_eq!(SupportedZone::from_code("CET"), None);
    }

    #[test]
    fn test_loop_packet_serialises_flat() {
        let mut observations = BTreeMap::new();
        observations.insert("outTemp".to_string(), Some(20.0));
        observations.insert("rain".to_string(), None);
        let packet = LoopPacket::new(1538568000, observations);

        let json = serde_json::to_value(&packet).unwrap();
        assert_eq!(json["dateTime"], 1538568000);
        assert_eq!(json["usUnits"], 17);
        assert_eq!(json["outTemp"], 20.0);
        assert!(json["rain"].is_null());
        assert_eq!(packet.get("rain"), None);
        assert_eq!(packet.get("outTemp"), Some(20.0));
    }
}
