//! XML tree parsing and writing.
//!
//! Documents are read with quick-xml's namespace-aware reader into a small
//! owned tree. Every element remembers the byte span it was parsed from so
//! that elements nobody recognises can be re-emitted verbatim.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;

use quick_xml::NsReader;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{PrefixDeclaration, ResolveResult};

use crate::error::{Error, ParseErrorKind, Result};

/// Well-known namespace URIs.
pub mod ns {
    /// Atom syndication format.
    pub const ATOM: &str = "http://www.w3.org/2005/Atom";
    /// GData extensions (`gd:` prefix).
    pub const GD: &str = "http://schemas.google.com/g/2005";
    /// OpenSearch paging elements.
    pub const OPENSEARCH: &str = "http://a9.com/-/spec/opensearch/1.1/";
    /// Batch processing elements.
    pub const BATCH: &str = "http://schemas.google.com/gdata/batch";
    /// Atom Publishing Protocol.
    pub const APP: &str = "http://www.w3.org/2007/app";
    /// The reserved `xml:` namespace.
    pub const XML: &str = "http://www.w3.org/XML/1998/namespace";
}

/// An attribute on a parsed element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlAttribute {
    /// The prefix as written in the source, if any.
    pub prefix: Option<String>,
    /// The local name.
    pub name: String,
    /// The resolved namespace URI, if the attribute was prefixed.
    pub namespace: Option<String>,
    /// The unescaped value.
    pub value: String,
}

impl XmlAttribute {
    /// Returns `prefix:name`, or just `name` when unprefixed.
    pub fn qualified_name(&self) -> String {
        qualify(self.prefix.as_deref(), &self.name)
    }
}

/// A node in the parsed tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    /// A child element.
    Element(XmlElement),
    /// Unescaped character data.
    Text(String),
}

/// A parsed element and its subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
    /// The prefix as written in the source, if any.
    pub prefix: Option<String>,
    /// The local name.
    pub name: String,
    /// The resolved namespace URI.
    pub namespace: Option<String>,
    /// Attributes other than namespace declarations, in source order.
    pub attributes: Vec<XmlAttribute>,
    /// Child elements and text, in source order.
    pub children: Vec<XmlNode>,
    /// Byte offset of the start tag in the source document.
    pub offset: u64,
    declares_default: bool,
    source: Arc<str>,
    span: Range<usize>,
    content_start: usize,
}

impl XmlElement {
    /// Returns `prefix:name`, or just `name` when unprefixed.
    pub fn qualified_name(&self) -> String {
        qualify(self.prefix.as_deref(), &self.name)
    }

    /// Returns true if this element has the given namespace and local name.
    pub fn is(&self, namespace: &str, name: &str) -> bool {
        self.name == name && self.namespace.as_deref() == Some(namespace)
    }

    /// Looks up an unprefixed attribute by name.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|attr| attr.namespace.is_none() && attr.name == name)
            .map(|attr| attr.value.as_str())
    }

    /// Looks up a namespaced attribute.
    pub fn attribute_ns(&self, namespace: &str, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|attr| attr.namespace.as_deref() == Some(namespace) && attr.name == name)
            .map(|attr| attr.value.as_str())
    }

    /// Returns the concatenated text of the direct text children.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|node| match node {
                XmlNode::Text(text) => Some(text.as_str()),
                XmlNode::Element(_) => None,
            })
            .collect()
    }

    /// Iterates over the child elements, skipping text.
    pub fn child_elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|node| match node {
            XmlNode::Element(element) => Some(element),
            XmlNode::Text(_) => None,
        })
    }

    /// Returns the exact source text this element was parsed from.
    pub fn raw(&self) -> &str {
        self.source.get(self.span.clone()).unwrap_or_default()
    }

    /// Returns the source text between the start and end tags.
    pub fn inner_raw(&self) -> &str {
        if self.content_start >= self.span.end {
            return "";
        }
        let inner = self
            .source
            .get(self.content_start..self.span.end)
            .unwrap_or_default();
        match inner.rfind("</") {
            Some(end) => &inner[..end],
            None => inner,
        }
    }

    /// Records every prefix binding used by this subtree.
    ///
    /// Bindings for the reserved `xml:` prefix are skipped.
    pub fn used_namespaces(&self, out: &mut BTreeMap<String, String>) {
        if let (Some(prefix), Some(uri)) = (&self.prefix, &self.namespace) {
            out.entry(prefix.clone()).or_insert_with(|| uri.clone());
        }
        for attr in &self.attributes {
            if let (Some(prefix), Some(uri)) = (&attr.prefix, &attr.namespace) {
                if prefix != "xml" {
                    out.entry(prefix.clone()).or_insert_with(|| uri.clone());
                }
            }
        }
        for child in self.child_elements() {
            child.used_namespaces(out);
        }
    }

    /// The default namespace this subtree takes from its surroundings.
    ///
    /// Returns `None` when every unprefixed element is covered by an
    /// `xmlns` declaration inside the subtree. An empty string stands for
    /// "no namespace".
    pub fn inherited_default_namespace(&self) -> Option<&str> {
        if self.declares_default {
            return None;
        }
        if self.prefix.is_none() {
            return Some(self.namespace.as_deref().unwrap_or(""));
        }
        self.child_elements()
            .find_map(|child| child.inherited_default_namespace())
    }
}

fn qualify(prefix: Option<&str>, name: &str) -> String {
    match prefix {
        Some(prefix) => format!("{prefix}:{name}"),
        None => name.to_string(),
    }
}

fn malformed(position: u64, element: &str, detail: impl std::fmt::Display) -> Error {
    Error::parse(
        ParseErrorKind::MalformedXml,
        element,
        Some(position),
        format!("Error parsing XML: {detail}"),
    )
}

fn resolved(result: ResolveResult<'_>, name: &str, position: u64) -> Result<Option<String>> {
    match result {
        ResolveResult::Bound(namespace) => Ok(Some(
            String::from_utf8_lossy(namespace.as_ref()).into_owned(),
        )),
        ResolveResult::Unbound => Ok(None),
        ResolveResult::Unknown(prefix) => Err(malformed(
            position,
            name,
            format!(
                "undeclared namespace prefix \"{}\"",
                String::from_utf8_lossy(&prefix)
            ),
        )),
    }
}

fn build_element(
    reader: &NsReader<&[u8]>,
    start: &BytesStart<'_>,
    source: &Arc<str>,
    offset: u64,
) -> Result<XmlElement> {
    let qname = start.name();
    let (resolution, local) = reader.resolve_element(qname);
    let name = String::from_utf8_lossy(local.as_ref()).into_owned();
    let prefix = qname
        .prefix()
        .map(|prefix| String::from_utf8_lossy(prefix.as_ref()).into_owned());
    let qualified = qualify(prefix.as_deref(), &name);
    let namespace = resolved(resolution, &qualified, offset)?;

    let mut attributes = Vec::new();
    let mut declares_default = false;
    for attr in start.attributes() {
        let attr = attr.map_err(|e| malformed(offset, &qualified, e))?;
        if let Some(binding) = attr.key.as_namespace_binding() {
            declares_default |= matches!(binding, PrefixDeclaration::Default);
            continue;
        }
        let (resolution, local) = reader.resolve_attribute(attr.key);
        let attr_name = String::from_utf8_lossy(local.as_ref()).into_owned();
        let attr_prefix = attr
            .key
            .prefix()
            .map(|prefix| String::from_utf8_lossy(prefix.as_ref()).into_owned());
        let attr_namespace = if attr_prefix.as_deref() == Some("xml") {
            Some(ns::XML.to_string())
        } else {
            resolved(resolution, &qualified, offset)?
        };
        let value = attr
            .unescape_value()
            .map_err(|e| malformed(offset, &qualified, e))?
            .into_owned();
        attributes.push(XmlAttribute {
            prefix: attr_prefix,
            name: attr_name,
            namespace: attr_namespace,
            value,
        });
    }

    let start_index = offset as usize;
    Ok(XmlElement {
        prefix,
        name,
        namespace,
        attributes,
        children: Vec::new(),
        offset,
        declares_default,
        source: Arc::clone(source),
        span: start_index..start_index,
        content_start: start_index,
    })
}

/// Parses a complete document and returns its root element.
pub fn parse_document(document: &str) -> Result<XmlElement> {
    let source: Arc<str> = Arc::from(document);
    let mut reader = NsReader::from_str(document);
    reader.config_mut().trim_text(false);

    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        let offset = reader.buffer_position() as u64;
        let event = reader
            .read_event()
            .map_err(|e| malformed(reader.buffer_position() as u64, "", e))?;
        match event {
            Event::Start(start) => {
                if root.is_some() {
                    return Err(malformed(offset, "", "content after the root element"));
                }
                let mut element = build_element(&reader, &start, &source, offset)?;
                element.content_start = reader.buffer_position() as usize;
                stack.push(element);
            }
            Event::Empty(start) => {
                if root.is_some() && stack.is_empty() {
                    return Err(malformed(offset, "", "content after the root element"));
                }
                let mut element = build_element(&reader, &start, &source, offset)?;
                element.span.end = reader.buffer_position() as usize;
                element.content_start = element.span.end;
                attach(&mut stack, &mut root, element);
            }
            Event::End(_) => {
                let Some(mut element) = stack.pop() else {
                    return Err(malformed(offset, "", "unexpected closing tag"));
                };
                element.span.end = reader.buffer_position() as usize;
                attach(&mut stack, &mut root, element);
            }
            Event::Text(text) => {
                if let Some(parent) = stack.last_mut() {
                    let text = text
                        .unescape()
                        .map_err(|e| malformed(offset, &parent.qualified_name(), e))?;
                    push_text(parent, &text);
                }
            }
            Event::CData(data) => {
                if let Some(parent) = stack.last_mut() {
                    let text = String::from_utf8_lossy(&data.into_inner()).into_owned();
                    push_text(parent, &text);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(malformed(
            reader.buffer_position() as u64,
            &open.qualified_name(),
            "unexpected end of document",
        ));
    }
    root.ok_or_else(|| malformed(0, "", "document is empty"))
}

fn attach(stack: &mut [XmlElement], root: &mut Option<XmlElement>, element: XmlElement) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(XmlNode::Element(element)),
        None => *root = Some(element),
    }
}

fn push_text(parent: &mut XmlElement, text: &str) {
    if let Some(XmlNode::Text(existing)) = parent.children.last_mut() {
        existing.push_str(text);
    } else {
        parent.children.push(XmlNode::Text(text.to_string()));
    }
}

/// Builds an XML string, escaping text and attribute values.
///
/// Start tags stay open until content or [`end_element`](Self::end_element)
/// arrives, so elements without content are written as `<name/>`.
#[derive(Debug, Default)]
pub struct XmlWriter {
    buf: String,
    stack: Vec<String>,
    // Default namespace in scope for each open element; "" when unbound.
    defaults: Vec<String>,
    tag_open: bool,
}

impl XmlWriter {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    fn close_tag(&mut self) {
        if self.tag_open {
            self.buf.push('>');
            self.tag_open = false;
        }
    }

    /// Opens `<name`; attributes may follow.
    pub fn start_element(&mut self, name: &str) {
        self.close_tag();
        self.buf.push('<');
        self.buf.push_str(name);
        self.stack.push(name.to_string());
        self.defaults.push(self.default_namespace().to_string());
        self.tag_open = true;
    }

    /// The default namespace in scope at the current position.
    pub fn default_namespace(&self) -> &str {
        self.defaults.last().map(String::as_str).unwrap_or("")
    }

    /// Adds an attribute to the element just opened.
    pub fn attribute(&mut self, name: &str, value: &str) {
        debug_assert!(self.tag_open, "attribute written outside a start tag");
        self.buf.push(' ');
        self.buf.push_str(name);
        self.buf.push_str("=\"");
        self.buf.push_str(&escape(value));
        self.buf.push('"');
        if name == "xmlns" {
            if let Some(current) = self.defaults.last_mut() {
                *current = value.to_string();
            }
        }
    }

    /// Adds an attribute when a value is present.
    pub fn optional_attribute(&mut self, name: &str, value: Option<&str>) {
        if let Some(value) = value {
            self.attribute(name, value);
        }
    }

    /// Writes escaped character data.
    pub fn text(&mut self, text: &str) {
        self.close_tag();
        self.buf.push_str(&escape(text));
    }

    /// Writes pre-serialized XML without escaping.
    pub fn raw(&mut self, xml: &str) {
        self.close_tag();
        self.buf.push_str(xml);
    }

    /// Writes a verbatim element, rebinding the default namespace it was
    /// parsed under when that differs from the one in scope here.
    pub fn raw_element(&mut self, xml: &str, inherited_default: Option<&str>) {
        let Some(required) = inherited_default else {
            self.raw(xml);
            return;
        };
        if required == self.default_namespace() {
            self.raw(xml);
            return;
        }
        let name_end = xml
            .char_indices()
            .skip(1)
            .find(|&(_, c)| c.is_whitespace() || c == '/' || c == '>')
            .map_or(xml.len(), |(index, _)| index);
        self.close_tag();
        self.buf.push_str(&xml[..name_end]);
        self.buf.push_str(" xmlns=\"");
        self.buf.push_str(&escape(required));
        self.buf.push('"');
        self.buf.push_str(&xml[name_end..]);
    }

    /// Closes the innermost open element.
    pub fn end_element(&mut self) {
        let Some(name) = self.stack.pop() else {
            return;
        };
        self.defaults.pop();
        if self.tag_open {
            self.buf.push_str("/>");
            self.tag_open = false;
        } else {
            self.buf.push_str("</");
            self.buf.push_str(&name);
            self.buf.push('>');
        }
    }

    /// Writes `<name>text</name>`.
    pub fn text_element(&mut self, name: &str, text: &str) {
        self.start_element(name);
        self.text(text);
        self.end_element();
    }

    /// Writes `<name>text</name>` when a value is present.
    pub fn optional_text_element(&mut self, name: &str, text: Option<&str>) {
        if let Some(text) = text {
            self.text_element(name, text);
        }
    }

    /// Finishes writing and returns the document.
    pub fn into_string(mut self) -> String {
        while !self.stack.is_empty() {
            self.end_element();
        }
        self.buf
    }
}
