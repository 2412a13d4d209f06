//! Pipeline tests for the polling loop
//!
//! Runs whole cycles against scripted documents and a manual clock.

pub mod conversion;

use crate::config::{DriverConfig, DriverSettings, SelectorConfig};
use crate::document::{DocumentSource, XmlSelector, XmlTree};
use crate::driver::{LoopDriver, ManualClock};
use std::collections::VecDeque;

pub const START: i64 = 1_538_568_000;
pub const RECORD: &str = "device[name='Weatherstation']/records/record";

/// Station document with the given time, temperature (deg F) and rain counter
pub fn station_xml(time: &str, temperature: &str, rain: &str) -> String {
    format!(
        r#"<?xml version="1.0"?>
<devices>
  <device>
    <name>Weatherstation</name>
    <records>
      <record>
        <time zone="UTC">{time}</time>
        <point name="Temperature" units="Degrees F" value="{temperature}"/>
        <point name="Wind Speed" units="km/h" value="10"/>
        <point name="Pressure" units="hPa" value="1013"/>
        <point name="Rain" units="mm" value="{rain}"/>
      </record>
    </records>
  </device>
</devices>"#
    )
}

fn point(name: &str) -> String {
    format!("{RECORD}/point[@name='{name}']")
}

/// Wall clock mode config covering document units, fixed units and a counter
pub fn master_config() -> DriverConfig {
    DriverConfig::default()
        .with_poll_interval(10.0)
        .with_obs("outTemp", SelectorConfig::attribute(point("Temperature"), "value"))
        .with_units("outTemp", SelectorConfig::attribute(point("Temperature"), "units"))
        .with_obs("windSpeed", SelectorConfig::attribute(point("Wind Speed"), "value"))
        .with_units("windSpeed", SelectorConfig::code("km/h"))
        .with_obs("pressure", SelectorConfig::attribute(point("Pressure"), "value"))
        .with_units("pressure", SelectorConfig::attribute(point("Pressure"), "units"))
        .with_obs("rain", SelectorConfig::attribute(point("Rain"), "value"))
}

/// Document timestamp mode config reading the zone from the time element
pub fn slave_config() -> DriverConfig {
    master_config()
        .with_timestamp_mode("slave")
        .with_obs("dateTime", SelectorConfig::path(format!("{RECORD}/time")))
        .with_time_zone(SelectorConfig::attribute(format!("{RECORD}/time"), "zone"))
}

pub fn settings(config: DriverConfig) -> DriverSettings {
    config.validate().unwrap()
}

/// Document source that yields one scripted XML source per refresh.
///
/// Once the script runs out the last tree stays in place, and sources that
/// fail to parse keep the previous tree, as a file on disk would.
pub struct ScriptedDocument {
    pending: VecDeque<String>,
    tree: Option<XmlTree>,
    pub refreshes: usize,
}

impl ScriptedDocument {
    pub fn new<I, S>(sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            pending: sources.into_iter().map(Into::into).collect(),
            tree: None,
            refreshes: 0,
        }
    }
}

impl DocumentSource for ScriptedDocument {
    fn refresh(&mut self) {
        self.refreshes += 1;
        if let Some(source) = self.pending.pop_front()
            && let Ok(tree) = XmlTree::parse(&source)
        {
            self.tree = Some(tree);
        }
    }

    fn resolve(&self, selector: &XmlSelector) -> Option<String> {
        let tree = self.tree.as_ref()?;
        selector
            .query
            .find(tree)
            .and_then(|element| element.value(selector.attribute.as_deref()))
            .map(str::to_string)
    }
}

pub fn scripted_driver<I, S>(
    config: DriverConfig,
    sources: I,
) -> (LoopDriver<ScriptedDocument, ManualClock>, ManualClock)
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let clock = ManualClock::at_timestamp(START);
    let driver = LoopDriver::with_parts(
        settings(config),
        ScriptedDocument::new(sources),
        clock.clone(),
    );
    (driver, clock)
}

pub fn close(actual: Option<f64>, expected: f64, tolerance: f64) -> bool {
    actual.is_some_and(|value| (value - expected).abs() < tolerance)
}
