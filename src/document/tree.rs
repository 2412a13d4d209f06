//! In-memory XML element tree.
//!
//! Elements live in a flat arena indexed in document order (pre-order), so
//! sorting node ids gives document order for free.

use crate::error::{DriverError, Result};
use encoding_rs::{Encoding, UTF_8};
use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use std::borrow::Cow;

/// Index of an element inside an [`XmlTree`]
pub type NodeId = usize;

#[derive(Debug, Clone, PartialEq)]
struct Node {
    name: String,
    attributes: Vec<(String, String)>,
    /// Text between the start tag and the first child
    text: Option<String>,
    /// Text between the end tag and the next sibling
    tail: Option<String>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl Node {
    fn new(name: String, attributes: Vec<(String, String)>, parent: Option<NodeId>) -> Self {
        Self {
            name,
            attributes,
            text: None,
            tail: None,
            parent,
            children: Vec::new(),
        }
    }
}

/// Parsed XML document with a single root element
#[derive(Debug, Clone, PartialEq)]
pub struct XmlTree {
    nodes: Vec<Node>,
}

impl XmlTree {
    /// Parse a complete XML document
    pub fn parse(source: &str) -> Result<Self> {
        let mut reader = Reader::from_str(source);
        reader.config_mut().trim_text(false);

        let mut nodes: Vec<Node> = Vec::new();
        let mut stack: Vec<NodeId> = Vec::new();

        loop {
            match reader.read_event()? {
                Event::Start(start) => {
                    let id = open_element(&mut nodes, &stack, &start)?;
                    stack.push(id);
                }
                Event::Empty(start) => {
                    open_element(&mut nodes, &stack, &start)?;
                }
                Event::End(_) => {
                    if stack.pop().is_none() {
                        return Err(DriverError::malformed("unexpected closing tag"));
                    }
                }
                Event::Text(text) => {
                    let text = text
                        .unescape()
                        .map_err(|e| DriverError::malformed(e.to_string()))?;
                    append_text(&mut nodes, &stack, &text)?;
                }
                Event::CData(data) => {
                    let data = data.into_inner();
                    append_text(&mut nodes, &stack, &String::from_utf8_lossy(&data))?;
                }
                Event::Eof => break,
                // declarations, comments, processing instructions, doctype
                _ => {}
            }
        }

        if let Some(&open) = stack.last() {
            return Err(DriverError::malformed(format!(
                "element <{}> is never closed",
                nodes[open].name
            )));
        }
        if nodes.is_empty() {
            return Err(DriverError::malformed("no root element"));
        }

        Ok(Self { nodes })
    }

    /// Parse raw file contents.
    ///
    /// A byte order mark wins over the encoding named in the XML
    /// declaration; without either the document must be UTF-8.
    pub fn parse_bytes(bytes: &[u8]) -> Result<Self> {
        Self::parse(&decode(bytes)?)
    }

    /// The document root element
    pub fn root(&self) -> Element<'_> {
        Element { tree: self, id: 0 }
    }

    /// Look up an element by id
    pub fn element(&self, id: NodeId) -> Element<'_> {
        Element { tree: self, id }
    }

    /// Total number of elements in the document
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Serialise the tree back to XML, optionally indented
    pub fn to_xml_string(&self, indent: Option<usize>) -> Result<String> {
        let mut writer = match indent {
            Some(width) => Writer::new_with_indent(Vec::new(), b' ', width),
            None => Writer::new(Vec::new()),
        };
        self.write_element(&mut writer, 0, indent.is_some())?;
        Ok(String::from_utf8_lossy(&writer.into_inner()).into_owned())
    }

    fn write_element(&self, writer: &mut Writer<Vec<u8>>, id: NodeId, pretty: bool) -> Result<()> {
        let node = &self.nodes[id];
        let mut start = BytesStart::new(node.name.as_str());
        for (key, value) in &node.attributes {
            start.push_attribute((key.as_str(), value.as_str()));
        }

        // whitespace-only text is layout; the indenting writer re-creates it
        let text = node
            .text
            .as_deref()
            .filter(|text| !(pretty && text.trim().is_empty()));

        if node.children.is_empty() && text.is_none() {
            writer.write_event(Event::Empty(start))?;
        } else {
            writer.write_event(Event::Start(start))?;
            if let Some(text) = text {
                let text = if pretty { text.trim() } else { text };
                writer.write_event(Event::Text(BytesText::new(text)))?;
            }
            for &child in &node.children {
                self.write_element(writer, child, pretty)?;
            }
            writer.write_event(Event::End(BytesEnd::new(node.name.as_str())))?;
        }

        if let Some(tail) = node.tail.as_deref()
            && !(pretty && tail.trim().is_empty())
        {
            let tail = if pretty { tail.trim() } else { tail };
            writer.write_event(Event::Text(BytesText::new(tail)))?;
        }
        Ok(())
    }
}

fn decode(bytes: &[u8]) -> Result<Cow<'_, str>> {
    let encoding = match Encoding::for_bom(bytes) {
        Some((encoding, _)) => encoding,
        None => declared_encoding(bytes)?.unwrap_or(UTF_8),
    };
    let (text, encoding, had_errors) = encoding.decode(bytes);
    if had_errors {
        return Err(DriverError::malformed(format!(
            "document is not valid {}",
            encoding.name()
        )));
    }
    Ok(text)
}

/// Encoding named in the XML declaration, if the document starts with one
fn declared_encoding(bytes: &[u8]) -> Result<Option<&'static Encoding>> {
    let mut reader = Reader::from_reader(bytes);
    let Ok(Event::Decl(declaration)) = reader.read_event() else {
        return Ok(None);
    };
    match declaration.encoding() {
        None => Ok(None),
        Some(Err(e)) => Err(DriverError::malformed(e.to_string())),
        Some(Ok(label)) => Encoding::for_label(&label).map(Some).ok_or_else(|| {
            DriverError::malformed(format!(
                "unsupported encoding '{}'",
                String::from_utf8_lossy(&label)
            ))
        }),
    }
}

fn open_element(nodes: &mut Vec<Node>, stack: &[NodeId], start: &BytesStart<'_>) -> Result<NodeId> {
    let parent = stack.last().copied();
    if parent.is_none() && !nodes.is_empty() {
        return Err(DriverError::malformed("more than one root element"));
    }

    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut attributes = Vec::new();
    for attribute in start.attributes() {
        let attribute = attribute?;
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        let value = attribute
            .unescape_value()
            .map_err(|e| DriverError::malformed(e.to_string()))?
            .into_owned();
        attributes.push((key, value));
    }

    let id = nodes.len();
    nodes.push(Node::new(name, attributes, parent));
    if let Some(parent) = parent {
        nodes[parent].children.push(id);
    }
    Ok(id)
}

fn append_text(nodes: &mut [Node], stack: &[NodeId], text: &str) -> Result<()> {
    let Some(&current) = stack.last() else {
        // text outside the root element is only legal as whitespace
        if text.trim().is_empty() {
            return Ok(());
        }
        return Err(DriverError::malformed("text outside of the root element"));
    };

    let last_child = nodes[current].children.last().copied();
    let slot = match last_child {
        Some(last_child) => &mut nodes[last_child].tail,
        None => &mut nodes[current].text,
    };
    slot.get_or_insert_with(String::new).push_str(text);
    Ok(())
}

/// Borrowed handle to one element of an [`XmlTree`]
#[derive(Debug, Clone, Copy)]
pub struct Element<'a> {
    tree: &'a XmlTree,
    id: NodeId,
}

impl<'a> Element<'a> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &'a str {
        &self.node().name
    }

    /// Value of the named attribute, if present
    pub fn attribute(&self, name: &str) -> Option<&'a str> {
        self.node()
            .attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Text before the first child element
    pub fn text(&self) -> Option<&'a str> {
        self.node().text.as_deref()
    }

    pub fn parent(&self) -> Option<Element<'a>> {
        self.node().parent.map(|id| self.tree.element(id))
    }

    pub fn children(&self) -> impl Iterator<Item = Element<'a>> + 'a {
        let tree = self.tree;
        self.node().children.iter().map(move |&id| tree.element(id))
    }

    /// All elements below this one, in document order
    pub fn descendants(&self) -> Vec<Element<'a>> {
        let mut found = Vec::new();
        let mut pending: Vec<NodeId> = self.node().children.iter().rev().copied().collect();
        while let Some(id) = pending.pop() {
            found.push(self.tree.element(id));
            pending.extend(self.tree.nodes[id].children.iter().rev());
        }
        found
    }

    /// Concatenated text of this element and everything below it
    pub fn text_content(&self) -> String {
        let mut content = String::new();
        self.collect_text(&mut content);
        content
    }

    fn collect_text(&self, content: &mut String) {
        if let Some(text) = self.text() {
            content.push_str(text);
        }
        for child in self.children() {
            child.collect_text(content);
            if let Some(tail) = child.node().tail.as_deref() {
                content.push_str(tail);
            }
        }
    }

    /// Attribute value or element text, depending on `attribute`
    pub fn value(&self, attribute: Option<&str>) -> Option<&'a str> {
        match attribute {
            Some(name) => self.attribute(name),
            None => self.text(),
        }
    }

    fn node(&self) -> &'a Node {
        &self.tree.nodes[self.id]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<devices>
    <!-- single station -->
    <device id="1">
        <name>Weatherstation</name>
        <point name="Temperature" units="Degrees F" value="68.0"/>
        <note>wind &amp; rain<![CDATA[ <raw> ]]></note>
    </device>
</devices>
"#;

    #[test]
    fn test_parse_builds_document_order() {
        let tree = XmlTree::parse(STATION).unwrap();
        let names: Vec<_> = (0..tree.len()).map(|id| tree.element(id).name()).collect();
        assert_eq!(names, vec!["devices", "device", "name", "point", "note"]);
        assert_eq!(tree.root().name(), "devices");
    }

    #[test]
    fn test_text_and_attributes() {
        let tree = XmlTree::parse(STATION).unwrap();
        let point = tree.element(3);
        assert_eq!(point.attribute("units"), Some("Degrees F"));
        assert_eq!(point.attribute("missing"), None);
        assert_eq!(point.text(), None);

        assert_eq!(tree.element(2).text(), Some("Weatherstation"));
        assert_eq!(tree.element(4).text(), Some("wind & rain <raw> "));
    }

    #[test]
    fn test_text_content_includes_descendants() {
        let tree = XmlTree::parse("<a>x<b>y</b>z<c/></a>").unwrap();
        assert_eq!(tree.root().text(), Some("x"));
        assert_eq!(tree.root().text_content(), "xyz");
    }

    #[test]
    fn test_unclosed_element_is_rejected() {
        let err = XmlTree::parse("<a><b></b>").unwrap_err();
        assert!(matches!(err, DriverError::MalformedDocument { .. }));
    }

    #[test]
    fn test_mismatched_end_tag_is_rejected() {
        assert!(XmlTree::parse("<a><b></c></a>").is_err());
    }

    #[test]
    fn test_empty_document_is_rejected() {
        let err = XmlTree::parse("  <!-- nothing -->  ").unwrap_err();
        assert!(matches!(err, DriverError::MalformedDocument { .. }));
    }

    #[test]
    fn test_declared_latin1_is_decoded() {
        let bytes = b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?>\n<r><p units=\"\xB0F\">68 \xB0</p></r>";
        let tree = XmlTree::parse_bytes(bytes).unwrap();
        assert_eq!(tree.element(1).attribute("units"), Some("\u{b0}F"));
        assert_eq!(tree.element(1).text(), Some("68 \u{b0}"));
    }

    #[test]
    fn test_bom_and_undeclared_utf8() {
        let tree = XmlTree::parse_bytes("\u{feff}<r><p>5\u{b0}</p></r>".as_bytes()).unwrap();
        assert_eq!(tree.element(1).text(), Some("5\u{b0}"));

        let tree = XmlTree::parse_bytes("<r><p>5</p></r>".as_bytes()).unwrap();
        assert_eq!(tree.root().name(), "r");
    }

    #[test]
    fn test_undecodable_bytes_are_rejected() {
        let err = XmlTree::parse_bytes(b"<r><p>\xB0</p></r>").unwrap_err();
        assert!(matches!(err, DriverError::MalformedDocument { .. }));

        let err = XmlTree::parse_bytes(b"<?xml version=\"1.0\" encoding=\"x-klingon\"?><r/>").unwrap_err();
        assert!(matches!(err, DriverError::MalformedDocument { .. }));
    }

    #[test]
    fn test_pretty_print_round_trips() {
        let tree = XmlTree::parse(STATION).unwrap();
        let pretty = tree.to_xml_string(Some(3)).unwrap();
        assert!(pretty.contains("\n   <device id=\"1\">"));
        assert_eq!(XmlTree::parse(&pretty).unwrap().len(), tree.len());
    }
}
