//! Access to the polled XML document.
//!
//! [`XmlDocument`] re-reads its file from scratch on every refresh and keeps
//! the last tree that parsed successfully. Lookups go through compiled
//! [`PathQuery`] values and never fail: a miss is simply `None`.

pub mod path;
pub mod tree;

pub use self::path::PathQuery;
pub use self::tree::{Element, XmlTree};

use crate::error::{DriverError, Result};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

/// A path query plus the optional attribute to read from the matched element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlSelector {
    pub query: PathQuery,
    pub attribute: Option<String>,
}

impl XmlSelector {
    /// Compile a selector; an empty attribute name is rejected
    pub fn new(query: &str, attribute: Option<&str>) -> Result<Self> {
        let attribute = match attribute.map(str::trim) {
            Some("") => {
                return Err(DriverError::configuration(format!(
                    "empty attribute name for path '{query}'"
                )));
            }
            other => other.map(str::to_string),
        };
        Ok(Self {
            query: PathQuery::compile(query)?,
            attribute,
        })
    }
}

impl fmt::Display for XmlSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.attribute {
            Some(attribute) => write!(f, "{}, {}", self.query, attribute),
            None => write!(f, "{}", self.query),
        }
    }
}

/// Source of the tree-structured document polled by the driver
pub trait DocumentSource {
    /// Re-read the document; failures are logged and the previous tree kept
    fn refresh(&mut self);

    /// Resolve a selector to a single scalar value
    fn resolve(&self, selector: &XmlSelector) -> Option<String>;
}

/// XML file on disk
#[derive(Debug)]
pub struct XmlDocument {
    path: PathBuf,
    tree: Option<XmlTree>,
}

impl XmlDocument {
    /// Create a document for `path`; nothing is read until the first refresh
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            tree: None,
        }
    }

    /// Read and parse the file immediately, failing on any error
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let mut document = Self::new(path);
        document.try_refresh()?;
        Ok(document)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The last successfully parsed tree, if any
    pub fn tree(&self) -> Option<&XmlTree> {
        self.tree.as_ref()
    }

    /// Re-read the file, replacing the tree only on success
    pub fn try_refresh(&mut self) -> Result<()> {
        let contents = fs::read(&self.path).map_err(|source| DriverError::DocumentRead {
            path: self.path.clone(),
            source,
        })?;
        let tree = XmlTree::parse_bytes(&contents)?;
        debug!(
            "Parsed {} ({} elements)",
            self.path.display(),
            tree.len()
        );
        self.tree = Some(tree);
        Ok(())
    }

    /// Compact XML rendering of the current tree
    pub fn to_xml_string(&self) -> Result<String> {
        self.render(None)
    }

    /// Indented XML rendering of the current tree
    pub fn to_pretty_string(&self) -> Result<String> {
        self.render(Some(3))
    }

    fn render(&self, indent: Option<usize>) -> Result<String> {
        let tree = self.tree.as_ref().ok_or_else(|| {
            DriverError::malformed(format!("{} has not been parsed", self.path.display()))
        })?;
        tree.to_xml_string(indent)
    }
}

impl DocumentSource for XmlDocument {
    fn refresh(&mut self) {
        if let Err(e) = self.try_refresh() {
            error!("xml parse failed: {}", e);
        }
    }

    fn resolve(&self, selector: &XmlSelector) -> Option<String> {
        let tree = self.tree.as_ref()?;
        let element = selector.query.find(tree)?;
        element
            .value(selector.attribute.as_deref())
            .map(str::to_string)
    }
}
