//! XML Parse Driver Library
//!
//! Polls a periodically rewritten XML file and turns it into weather
//! observation packets. A declarative sensor map names where each field
//! lives in the document; values are parsed, normalised to the METRICWX unit
//! system and emitted with strictly increasing timestamps.
//!
//! This library provides tools for:
//! - Parsing XML documents and resolving path queries against them
//! - Loading and validating the driver configuration from TOML
//! - Converting unit codes to METRICWX
//! - Reporting cumulative counters as per-cycle deltas
//! - Running the polling loop as an async stream of packets

pub mod cli;
pub mod config;
pub mod constants;
pub mod document;
pub mod driver;
pub mod error;
pub mod models;

// Re-export commonly used types
pub use config::{DriverConfig, DriverSettings};
pub use document::{DocumentSource, XmlDocument, XmlSelector};
pub use driver::LoopDriver;
pub use error::{DriverError, Result};
pub use models::{CycleOutcome, LoopPacket, SensorMap, TimestampMode};
