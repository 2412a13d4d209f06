//! Error handling for driver configuration and document access.
//!
//! Only configuration problems are ever surfaced to the operator. Problems
//! met while polling (unreadable file, missing elements, bad numbers) are
//! absorbed by the loop and show up as absent values instead.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read XML document {path}: {source}")]
    DocumentRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("XML attribute error: {0}")]
    XmlAttribute(#[from] quick_xml::events::attributes::AttrError),

    #[error("Malformed XML document: {reason}")]
    MalformedDocument { reason: String },

    #[error("Invalid path query '{query}': {reason}")]
    InvalidPathQuery { query: String, reason: String },

    #[error("Missing or invalid '{option}' config option")]
    MissingOption { option: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Failed to parse config file {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl DriverError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a missing option error
    pub fn missing_option(option: impl Into<String>) -> Self {
        Self::MissingOption {
            option: option.into(),
        }
    }

    /// Create an invalid path query error
    pub fn invalid_path(query: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPathQuery {
            query: query.into(),
            reason: reason.into(),
        }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedDocument {
            reason: reason.into(),
        }
    }

    /// True for errors that must stop the driver before the polling loop starts
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::MissingOption { .. }
                | Self::Configuration { .. }
                | Self::ConfigParse { .. }
                | Self::InvalidPathQuery { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, DriverError>;
