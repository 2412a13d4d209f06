//! Application constants for the XML parse driver
//!
//! Reserved field names, defaults and the fixed output unit system.

// =============================================================================
// Driver Identity
// =============================================================================

pub const DRIVER_NAME: &str = "XmlParse";
pub const DRIVER_VERSION: &str = env!("CARGO_PKG_VERSION");

// =============================================================================
// Reserved Record Fields
// =============================================================================

/// Output field carrying the packet timestamp (epoch seconds)
pub const TIME_FIELD: &str = "dateTime";

/// Reserved raw record key holding the resolved time zone code
pub const TIMEZONE_FIELD: &str = "timezone";

/// Suffix of the helper fields that carry a field's source unit code
pub const UNITS_SUFFIX: &str = "_units";

/// Build the helper field name holding the unit code for `field`
pub fn units_field(field: &str) -> String {
    format!("{field}{UNITS_SUFFIX}")
}

// =============================================================================
// Configuration Defaults
// =============================================================================

/// Default location of the XML source file
pub const DEFAULT_PATH: &str = "/var/tmp/sensor.xml";

/// Default date-time format (chrono strftime syntax)
pub const DEFAULT_DATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Default cumulative counter field
pub const DEFAULT_COUNTER_FIELD: &str = "rain";

/// Default config file consulted by the command line harness
pub const DEFAULT_CONFIG_PATH: &str = "/etc/xmlparse/xmlparse.toml";

/// Time zone codes that may be applied to document timestamps.
/// Anything else means local time.
pub const SUPPORTED_TIMEZONES: &[&str] = &["GMT", "UTC"];

// =============================================================================
// Unit Systems
// =============================================================================

/// Unit system tags carried in the `usUnits` field of every packet
pub mod unit_systems {
    /// degree_C, meter_per_second, mbar, mm
    pub const METRICWX: i32 = 17;
}
