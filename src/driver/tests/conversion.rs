//! Unit conversion through full cycles

use super::*;
use crate::driver::UnitConversion;
use crate::models::{CycleOutcome, ParsedRecord, ParsedValue, SensorMap};

#[test]
fn test_cycle_converts_to_metricwx() {
    let (mut driver, _clock) = scripted_driver(
        master_config(),
        [station_xml("2018-10-03 12:00:00", "68.0", "5")],
    );

    let packet = driver.run_cycle().into_packet().unwrap();

    assert!(close(packet.get("outTemp"), 20.0, 1e-9));
    assert!(close(packet.get("windSpeed"), 2.7778, 1e-4));
    assert_eq!(packet.get("pressure"), Some(1013.0));
    assert_eq!(packet.us_units, 17);
    assert!(!packet.observations.keys().any(|field| field.ends_with("_units")));
    assert!(!packet.observations.contains_key("dateTime"));
}

#[test]
fn test_unknown_or_missing_units_pass_through() {
    let xml = station_xml("2018-10-03 12:00:00", "68.0", "5")
        .replace("units=\"Degrees F\" ", "units=\"Rankine\" ")
        .replace("units=\"hPa\" ", "");
    let (mut driver, _clock) = scripted_driver(master_config(), [xml]);

    let packet = driver.run_cycle().into_packet().unwrap();

    assert_eq!(packet.get("outTemp"), Some(68.0));
    assert_eq!(packet.get("pressure"), Some(1013.0));
}

#[test]
fn test_configured_conversion_applies() {
    let config = master_config()
        .with_units("rain", SelectorConfig::code("cm"))
        .with_counter_to_delta(false)
        .with_conversion("cm", UnitConversion::Linear { scale: 10.0, offset: 0.0 });
    let (mut driver, _clock) = scripted_driver(
        config,
        [station_xml("2018-10-03 12:00:00", "68.0", "1.5")],
    );

    let outcome = driver.run_cycle();
    assert!(matches!(outcome, CycleOutcome::Emitted(_)));
    assert_eq!(outcome.packet().unwrap().get("rain"), Some(15.0));
}

#[test]
fn test_fixed_units_take_precedence_over_document_units() {
    let settings = settings(master_config());
    let mut record = ParsedRecord::new();
    record.insert("windSpeed".into(), Some(ParsedValue::Number(36.0)));
    record.insert("windSpeed_units".into(), Some(ParsedValue::Text("knot".into())));

    let converted = settings.conversions.convert(&record, &settings.sensor_map);
    assert_eq!(converted["windSpeed"], Some(ParsedValue::Number(10.0)));

    let unmapped = settings.conversions.convert(&record, &SensorMap::new());
    let knots = unmapped["windSpeed"].as_ref().and_then(ParsedValue::as_f64);
    assert!(close(knots, 18.52, 1e-9));
}

#[test]
fn test_missing_values_stay_missing() {
    let settings = settings(master_config());
    let mut record = ParsedRecord::new();
    record.insert("outTemp".into(), None);
    record.insert("outTemp_units".into(), Some(ParsedValue::Text("Degrees F".into())));

    let converted = settings.conversions.convert(&record, &settings.sensor_map);
    assert_eq!(converted["outTemp"], None);
}
