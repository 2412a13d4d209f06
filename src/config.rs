//! Configuration management and validation.
//!
//! [`DriverConfig`] mirrors the TOML driver stanza as written by the
//! operator. [`DriverConfig::validate`] turns it into immutable
//! [`DriverSettings`], deciding every shape question (fixed code or path
//! query, master or slave) once so the polling loop never has to.

use crate::constants::{
    DEFAULT_COUNTER_FIELD, DEFAULT_DATE_TIME_FORMAT, DEFAULT_PATH, SUPPORTED_TIMEZONES, TIME_FIELD,
};
use crate::document::XmlSelector;
use crate::driver::counter::CounterResetPolicy;
use crate::driver::units::{ConversionTable, UnitConversion};
use crate::error::{DriverError, Result};
use crate::models::{FieldMapping, SensorMap, SupportedZone, TimestampMode, TimezoneSpec, UnitSource};
use chrono::format::{Item, StrftimeItems};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// A selector as written in the config file.
///
/// `"xpath"`, `["xpath"]`, `["xpath", "attribute"]` or
/// `{ path = "xpath", attribute = "attribute" }`. In the `units` table a bare
/// string is a fixed unit code rather than a path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SelectorConfig {
    Text(String),
    List(Vec<String>),
    Table {
        path: String,
        #[serde(default)]
        attribute: Option<String>,
    },
}

impl SelectorConfig {
    /// A path query without attribute
    pub fn path(path: impl Into<String>) -> Self {
        Self::List(vec![path.into()])
    }

    /// A path query reading the given attribute
    pub fn attribute(path: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self::List(vec![path.into(), attribute.into()])
    }

    /// A fixed code (unit code or time zone code)
    pub fn code(code: impl Into<String>) -> Self {
        Self::Text(code.into())
    }

    fn to_selector(&self, field: &str) -> Result<XmlSelector> {
        match self {
            SelectorConfig::Text(path) => XmlSelector::new(path, None),
            SelectorConfig::List(parts) => match parts.as_slice() {
                [path] => XmlSelector::new(path, None),
                [path, attribute] => XmlSelector::new(path, Some(attribute)),
                _ => Err(DriverError::configuration(format!(
                    "mapping for '{field}' must be [path] or [path, attribute], found {} entries",
                    parts.len()
                ))),
            },
            SelectorConfig::Table { path, attribute } => {
                XmlSelector::new(path, attribute.as_deref())
            }
        }
    }
}

/// Sensor map tables of the config file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SensorMapConfig {
    /// Output field -> value selector
    pub obs: BTreeMap<String, SelectorConfig>,

    /// Output field -> unit code or unit selector
    pub units: BTreeMap<String, SelectorConfig>,
}

/// Driver configuration as read from disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DriverConfig {
    /// Seconds between polls of the XML file (required)
    pub poll_interval: Option<f64>,

    /// Location of the XML source file
    pub path: PathBuf,

    /// "master" (wall clock) or "slave" (document timestamps)
    pub timestamp_mode: String,

    /// chrono strftime pattern of document timestamps
    pub date_time_format: String,

    /// Zone code or selector for document timestamps; local time if absent
    pub time_zone: Option<SelectorConfig>,

    /// Field holding a cumulative counter
    pub counter_field: String,

    /// Report the counter as a per-cycle delta
    pub counter_to_delta: bool,

    /// What a decreasing counter reports
    pub counter_reset_policy: CounterResetPolicy,

    pub sensor_map: SensorMapConfig,

    /// Additional or overriding unit code conversions
    pub conversions: BTreeMap<String, UnitConversion>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            poll_interval: None,
            path: PathBuf::from(DEFAULT_PATH),
            timestamp_mode: TimestampMode::WallClock.to_string(),
            date_time_format: DEFAULT_DATE_TIME_FORMAT.to_string(),
            time_zone: None,
            counter_field: DEFAULT_COUNTER_FIELD.to_string(),
            counter_to_delta: true,
            counter_reset_policy: CounterResetPolicy::default(),
            sensor_map: SensorMapConfig::default(),
            conversions: BTreeMap::new(),
        }
    }
}

impl DriverConfig {
    /// Read a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            DriverError::configuration(format!("cannot read config file {}: {e}", path.display()))
        })?;
        toml::from_str(&contents).map_err(|source| DriverError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Read and validate a TOML config file
    pub fn load(path: &Path) -> Result<DriverSettings> {
        Self::from_file(path)?.validate()
    }

    pub fn with_poll_interval(mut self, seconds: f64) -> Self {
        self.poll_interval = Some(seconds);
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_timestamp_mode(mut self, mode: impl Into<String>) -> Self {
        self.timestamp_mode = mode.into();
        self
    }

    pub fn with_date_time_format(mut self, format: impl Into<String>) -> Self {
        self.date_time_format = format.into();
        self
    }

    pub fn with_time_zone(mut self, time_zone: SelectorConfig) -> Self {
        self.time_zone = Some(time_zone);
        self
    }

    /// Map an output field to a document location
    pub fn with_obs(mut self, field: impl Into<String>, selector: SelectorConfig) -> Self {
        self.sensor_map.obs.insert(field.into(), selector);
        self
    }

    /// Declare the source units of an output field
    pub fn with_units(mut self, field: impl Into<String>, units: SelectorConfig) -> Self {
        self.sensor_map.units.insert(field.into(), units);
        self
    }

    pub fn with_counter_field(mut self, field: impl Into<String>) -> Self {
        self.counter_field = field.into();
        self
    }

    pub fn with_counter_to_delta(mut self, to_delta: bool) -> Self {
        self.counter_to_delta = to_delta;
        self
    }

    pub fn with_counter_reset_policy(mut self, policy: CounterResetPolicy) -> Self {
        self.counter_reset_policy = policy;
        self
    }

    pub fn with_conversion(mut self, code: impl Into<String>, conversion: UnitConversion) -> Self {
        self.conversions.insert(code.into(), conversion);
        self
    }

    /// Check every option and build the settings used by the driver
    pub fn validate(&self) -> Result<DriverSettings> {
        let poll_interval = self
            .poll_interval
            .filter(|seconds| seconds.is_finite() && *seconds > 0.0)
            .and_then(|seconds| Duration::try_from_secs_f64(seconds).ok())
            .ok_or_else(|| DriverError::missing_option("poll_interval"))?;

        let timestamp_mode: TimestampMode = self.timestamp_mode.parse()?;
        validate_date_time_format(&self.date_time_format)?;

        if self.sensor_map.obs.is_empty() {
            return Err(DriverError::configuration("sensor_map.obs has no entries"));
        }
        if timestamp_mode == TimestampMode::Document && !self.sensor_map.obs.contains_key(TIME_FIELD)
        {
            return Err(DriverError::configuration(format!(
                "timestamp_mode 'slave' requires a sensor_map.obs entry for '{TIME_FIELD}'"
            )));
        }
        if let Some(field) = self
            .sensor_map
            .units
            .keys()
            .find(|field| !self.sensor_map.obs.contains_key(*field))
        {
            return Err(DriverError::configuration(format!(
                "sensor_map.units entry '{field}' has no matching sensor_map.obs entry"
            )));
        }

        let conversions = ConversionTable::default().with_overrides(
            self.conversions
                .iter()
                .map(|(code, conversion)| (code.clone(), *conversion)),
        );

        let mut sensor_map = SensorMap::new();
        for (field, selector) in &self.sensor_map.obs {
            if field.trim().is_empty() {
                return Err(DriverError::configuration("sensor_map.obs has an empty field name"));
            }
            let units = match self.sensor_map.units.get(field) {
                Some(units) => Some(unit_source(field, units)?),
                None => None,
            };
            if let Some(UnitSource::Fixed(code)) = &units
                && conversions.get(code).is_none()
            {
                warn!(
                    "no conversion for unit code '{}' of field '{}', values will pass through unchanged",
                    code, field
                );
            }
            sensor_map.insert(FieldMapping {
                field: field.clone(),
                value: selector.to_selector(field)?,
                units,
            });
        }

        let time_zone = match &self.time_zone {
            None => TimezoneSpec::Local,
            Some(SelectorConfig::Text(text)) => match SupportedZone::from_code(text) {
                Some(zone) => TimezoneSpec::Fixed(zone),
                None => {
                    debug!(
                        "time_zone '{}' is not one of {:?}, reading it from the document",
                        text, SUPPORTED_TIMEZONES
                    );
                    TimezoneSpec::Selector(XmlSelector::new(text, None)?)
                }
            },
            Some(other) => TimezoneSpec::Selector(other.to_selector("time_zone")?),
        };

        let counter_field = self.counter_field.trim();
        if counter_field.is_empty() {
            return Err(DriverError::missing_option("counter_field"));
        }

        debug!("Validated config with {} mapped fields", sensor_map.len());

        Ok(DriverSettings {
            path: self.path.clone(),
            poll_interval,
            timestamp_mode,
            date_time_format: self.date_time_format.clone(),
            time_zone,
            sensor_map,
            counter: CounterSettings {
                field: counter_field.to_string(),
                to_delta: self.counter_to_delta,
                reset_policy: self.counter_reset_policy,
            },
            conversions,
        })
    }
}

fn unit_source(field: &str, units: &SelectorConfig) -> Result<UnitSource> {
    match units {
        SelectorConfig::Text(code) => {
            let code = code.trim();
            if code.is_empty() {
                return Err(DriverError::configuration(format!(
                    "empty unit code for field '{field}'"
                )));
            }
            Ok(UnitSource::Fixed(code.to_string()))
        }
        other => Ok(UnitSource::Selector(other.to_selector(field)?)),
    }
}

fn validate_date_time_format(format: &str) -> Result<()> {
    if format.trim().is_empty() {
        return Err(DriverError::missing_option("date_time_format"));
    }
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err(DriverError::configuration(format!(
            "invalid date_time_format '{format}'"
        )));
    }
    Ok(())
}

/// Cumulative counter handling
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterSettings {
    pub field: String,
    pub to_delta: bool,
    pub reset_policy: CounterResetPolicy,
}

/// Validated, immutable driver settings
#[derive(Debug, Clone)]
pub struct DriverSettings {
    pub path: PathBuf,
    pub poll_interval: Duration,
    pub timestamp_mode: TimestampMode,
    pub date_time_format: String,
    pub time_zone: TimezoneSpec,
    pub sensor_map: SensorMap,
    pub counter: CounterSettings,
    pub conversions: ConversionTable,
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECORD: &str = "devices/device[name='Weatherstation']/records/record";

    fn base_config() -> DriverConfig {
        DriverConfig::default()
            .with_poll_interval(10.0)
            .with_obs("outTemp", SelectorConfig::attribute(format!("{RECORD}/point[@name='Temperature']"), "value"))
    }

    #[test]
    fn test_parse_full_toml_stanza() {
        let toml = r#"
poll_interval = 2.5
path = "/tmp/sensor.xml"
timestamp_mode = "Slave"
date_time_format = "%d/%m/%Y %H:%M"
time_zone = ["record/time", "zone"]
counter_reset_policy = "zero"

[sensor_map.obs]
dateTime = "record/time"
outTemp = ["record/point[@name='Temperature']", "value"]
windSpeed = { path = "record/point[@name='Wind']", attribute = "value" }

[sensor_map.units]
outTemp = ["record/point[@name='Temperature']", "units"]
windSpeed = "km/h"

[conversions]
"deg F" = "fahrenheit_to_celsius"
"mph" = { linear = { scale = 0.44704 } }
"#;
        let config: DriverConfig = toml::from_str(toml).unwrap();
        let settings = config.validate().unwrap();

        assert_eq!(settings.poll_interval, Duration::from_millis(2500));
        assert_eq!(settings.timestamp_mode, TimestampMode::Document);
        assert_eq!(settings.path, PathBuf::from("/tmp/sensor.xml"));
        assert_eq!(settings.sensor_map.len(), 3);
        assert_eq!(settings.sensor_map.fixed_units("windSpeed"), Some("km/h"));
        assert!(matches!(
            settings.sensor_map.get("outTemp").unwrap().units,
            Some(UnitSource::Selector(_))
        ));
        assert!(matches!(settings.time_zone, TimezoneSpec::Selector(ref s) if s.attribute.as_deref() == Some("zone")));
        assert_eq!(settings.counter.reset_policy, CounterResetPolicy::Zero);
        assert!(settings.counter.to_delta);
        assert_eq!(
            settings.conversions.get("mph"),
            Some(UnitConversion::Linear {
                scale: 0.44704,
                offset: 0.0
            })
        );
        assert_eq!(
            settings.conversions.get("deg F"),
            Some(UnitConversion::FahrenheitToCelsius)
        );
    }

    #[test]
    fn test_time_zone_shape_decided_at_load() {
        let fixed = base_config()
            .with_time_zone(SelectorConfig::code("gmt"))
            .validate()
            .unwrap();
        assert_eq!(fixed.time_zone, TimezoneSpec::Fixed(SupportedZone::Gmt));

        let path = base_config()
            .with_time_zone(SelectorConfig::code("record/time/zone"))
            .validate()
            .unwrap();
        assert!(matches!(path.time_zone, TimezoneSpec::Selector(ref s) if s.attribute.is_none()));

        let local = base_config().validate().unwrap();
        assert_eq!(local.time_zone, TimezoneSpec::Local);
    }

    #[test]
    fn test_poll_interval_is_required_and_positive() {
        for interval in [None, Some(0.0), Some(-3.0), Some(f64::NAN), Some(f64::INFINITY)] {
            let mut config = base_config();
            config.poll_interval = interval;
            let err = config.validate().unwrap_err();
            assert!(
                matches!(err, DriverError::MissingOption { ref option } if option == "poll_interval"),
                "interval {interval:?} gave {err}"
            );
        }
    }

    #[test]
    fn test_slave_mode_requires_time_field() {
        let err = base_config()
            .with_timestamp_mode("slave")
            .validate()
            .unwrap_err();
        assert!(err.is_configuration());

        let ok = base_config()
            .with_timestamp_mode("slave")
            .with_obs(TIME_FIELD, SelectorConfig::path(format!("{RECORD}/time")))
            .validate();
        assert!(ok.is_ok());
    }

    #[test]
    fn test_master_mode_does_not_require_time_field() {
        let settings = base_config().validate().unwrap();
        assert_eq!(settings.timestamp_mode, TimestampMode::WallClock);
        assert!(!settings.sensor_map.contains(TIME_FIELD));
    }

    #[test]
    fn test_malformed_mappings_are_fatal() {
        let bad_path = base_config().with_obs("rain", SelectorConfig::path("/absolute/rain"));
        assert!(matches!(
            bad_path.validate(),
            Err(DriverError::InvalidPathQuery { .. })
        ));

        let too_long = base_config().with_obs(
            "rain",
            SelectorConfig::List(vec!["a".into(), "b".into(), "c".into()]),
        );
        assert!(too_long.validate().unwrap_err().is_configuration());

        let orphan_units = base_config().with_units("windSpeed", SelectorConfig::code("km/h"));
        assert!(orphan_units.validate().unwrap_err().is_configuration());

        let empty = DriverConfig::default().with_poll_interval(5.0);
        assert!(empty.validate().unwrap_err().is_configuration());

        assert!(base_config().with_timestamp_mode("leader").validate().is_err());
        assert!(base_config().with_date_time_format("%Y-%Q").validate().is_err());
    }

    #[test]
    fn test_unknown_fixed_unit_code_is_accepted() {
        let settings = base_config()
            .with_units("outTemp", SelectorConfig::code("furlongs"))
            .validate()
            .unwrap();
        assert_eq!(settings.sensor_map.fixed_units("outTemp"), Some("furlongs"));
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let result: std::result::Result<DriverConfig, _> =
            toml::from_str("poll_interval = 10\npoll_intervall = 5\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_from_file_reports_parse_errors() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("xmlparse.toml");
        fs::write(&path, "poll_interval = [").unwrap();
        assert!(matches!(
            DriverConfig::from_file(&path),
            Err(DriverError::ConfigParse { .. })
        ));
        assert!(DriverConfig::from_file(&temp_dir.path().join("missing.toml")).is_err());
    }
}
