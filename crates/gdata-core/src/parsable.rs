//! The parse, validate, and emit framework for XML elements.
//!
//! A type implementing [`Parsable`] declares the element it claims and
//! handles the children and attributes it recognises. Everything it does not
//! recognise is buffered in its [`Extensions`] and written back out verbatim,
//! so a document survives a parse/emit cycle even when it carries elements
//! this crate knows nothing about.
//!
//! # Example
//!
//! ```
//! use gdata_core::{Entry, Parsable};
//!
//! let entry = Entry::from_xml(
//!     "<entry xmlns='http://www.w3.org/2005/Atom'><title>Hello</title></entry>",
//! )?;
//! assert_eq!(entry.title(), Some("Hello"));
//! assert!(entry.to_xml().contains("<title type=\"text\">Hello</title>"));
//! # Ok::<(), gdata_core::Error>(())
//! ```

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

use crate::error::{Error, ParseErrorKind, Result};
use crate::xml::{XmlAttribute, XmlElement, XmlWriter, ns, parse_document};

/// What a [`Parsable`] did with a child element or attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    /// The value was recognised and stored.
    Consumed,
    /// The value is not recognised; the framework buffers it verbatim.
    NotMine,
}

/// XML a [`Parsable`] did not recognise, kept for round-trip emission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extensions {
    attributes: Vec<XmlAttribute>,
    children: Vec<String>,
    // Default namespace each child relied on where it was parsed.
    child_defaults: Vec<Option<String>>,
    namespaces: BTreeMap<String, String>,
}

impl Extensions {
    /// Unknown attributes of the element, in source order.
    pub fn attributes(&self) -> &[XmlAttribute] {
        &self.attributes
    }

    /// Unknown children as verbatim XML fragments, in source order.
    pub fn children(&self) -> &[String] {
        &self.children
    }

    /// Prefix bindings the buffered XML relies on.
    pub fn namespaces(&self) -> &BTreeMap<String, String> {
        &self.namespaces
    }

    /// Returns true when nothing has been buffered.
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty() && self.children.is_empty()
    }

    /// Buffers an unrecognised child element.
    pub fn push_child(&mut self, child: &XmlElement) {
        child.used_namespaces(&mut self.namespaces);
        self.children.push(child.raw().to_string());
        self.child_defaults
            .push(child.inherited_default_namespace().map(str::to_string));
    }

    /// Buffers an unrecognised attribute.
    pub fn push_attribute(&mut self, attr: &XmlAttribute) {
        if let (Some(prefix), Some(uri)) = (&attr.prefix, &attr.namespace) {
            if prefix != "xml" {
                self.namespaces
                    .entry(prefix.clone())
                    .or_insert_with(|| uri.clone());
            }
        }
        self.attributes.push(attr.clone());
    }

    fn write_attributes(&self, writer: &mut XmlWriter) {
        for attr in &self.attributes {
            writer.attribute(&attr.qualified_name(), &attr.value);
        }
    }

    fn write_children(&self, writer: &mut XmlWriter) {
        for (child, default) in self.children.iter().zip(&self.child_defaults) {
            writer.raw_element(child, default.as_deref());
        }
    }
}

/// An XML element that can be parsed from and emitted to XML.
pub trait Parsable: Default + Sized {
    /// The local name of the element this type claims.
    const ELEMENT_NAME: &'static str;
    /// The namespace of the element this type claims.
    const NAMESPACE: &'static str = ns::ATOM;
    /// The prefix used when emitting the element, `None` for the default namespace.
    const PREFIX: Option<&'static str> = None;

    /// Handles one attribute of the element.
    fn parse_attribute(&mut self, _attr: &XmlAttribute, _element: &XmlElement) -> Result<Handled> {
        Ok(Handled::NotMine)
    }

    /// Handles one child element.
    fn parse_child(&mut self, _child: &XmlElement) -> Result<Handled> {
        Ok(Handled::NotMine)
    }

    /// Validates the element once every child has been dispatched.
    fn post_parse(&mut self, _element: &XmlElement) -> Result<()> {
        Ok(())
    }

    /// Writes the recognised attributes.
    fn write_attributes(&self, _writer: &mut XmlWriter) {}

    /// Writes the recognised children, in a stable order.
    fn write_children(&self, _writer: &mut XmlWriter) {}

    /// Adds the prefix bindings the recognised content needs.
    fn collect_namespaces(&self, _namespaces: &mut BTreeMap<String, String>) {}

    /// The buffer of unrecognised XML.
    fn extensions(&self) -> &Extensions;

    /// Mutable access to the buffer of unrecognised XML.
    fn extensions_mut(&mut self) -> &mut Extensions;

    /// Parses a complete XML document whose root is this element.
    fn from_xml(xml: &str) -> Result<Self> {
        let root = parse_document(xml)?;
        Self::from_element(&root)
    }

    /// Parses an element that has already been read into a tree.
    fn from_element(element: &XmlElement) -> Result<Self> {
        if element.name != Self::ELEMENT_NAME
            || element.namespace.as_deref() != Some(Self::NAMESPACE)
        {
            return Err(Error::parse(
                ParseErrorKind::WrongNamespace,
                element.qualified_name(),
                Some(element.offset),
                format!(
                    "Expected a <{}> element in namespace {} but found <{}>.",
                    Self::ELEMENT_NAME,
                    Self::NAMESPACE,
                    element.qualified_name()
                ),
            ));
        }

        let mut parsable = Self::default();
        for attr in &element.attributes {
            if parsable.parse_attribute(attr, element)? == Handled::NotMine {
                parsable.extensions_mut().push_attribute(attr);
            }
        }
        for child in element.child_elements() {
            if parsable.parse_child(child)? == Handled::NotMine {
                parsable.extensions_mut().push_child(child);
            }
        }
        parsable.post_parse(element)?;
        Ok(parsable)
    }

    /// Returns every prefix binding this element and its buffered XML need.
    fn namespaces(&self) -> BTreeMap<String, String> {
        let mut namespaces = BTreeMap::new();
        if let Some(prefix) = Self::PREFIX {
            namespaces.insert(prefix.to_string(), Self::NAMESPACE.to_string());
        }
        self.collect_namespaces(&mut namespaces);
        for (prefix, uri) in self.extensions().namespaces() {
            namespaces
                .entry(prefix.clone())
                .or_insert_with(|| uri.clone());
        }
        namespaces
    }

    /// Writes this element as a child of another, without namespace declarations.
    fn write_element(&self, writer: &mut XmlWriter) {
        write_parsable(self, writer, false);
    }

    /// Serializes this element as a standalone document.
    fn to_xml(&self) -> String {
        let mut writer = XmlWriter::new();
        write_parsable(self, &mut writer, true);
        writer.into_string()
    }
}

fn element_name<P: Parsable>() -> String {
    match P::PREFIX {
        Some(prefix) => format!("{prefix}:{}", P::ELEMENT_NAME),
        None => P::ELEMENT_NAME.to_string(),
    }
}

fn write_parsable<P: Parsable>(parsable: &P, writer: &mut XmlWriter, declare: bool) {
    writer.start_element(&element_name::<P>());
    if declare {
        if P::PREFIX.is_none() {
            writer.attribute("xmlns", P::NAMESPACE);
        }
        for (prefix, uri) in parsable.namespaces() {
            writer.attribute(&format!("xmlns:{prefix}"), &uri);
        }
    }
    parsable.write_attributes(writer);
    parsable.extensions().write_attributes(writer);
    parsable.write_children(writer);
    parsable.extensions().write_children(writer);
    writer.end_element();
}

/// Merges the namespaces of nested parsables into `into`.
pub fn merge_namespaces<'a, P, I>(into: &mut BTreeMap<String, String>, children: I)
where
    P: Parsable + 'a,
    I: IntoIterator<Item = &'a P>,
{
    for child in children {
        for (prefix, uri) in child.namespaces() {
            into.entry(prefix).or_insert(uri);
        }
    }
}

/// Stores the text of a singleton child, rejecting duplicates.
///
/// With `required` set, empty text is a `required-content-missing` fault.
pub fn parse_string_singleton(
    child: &XmlElement,
    slot: &mut Option<String>,
    parent: &str,
    required: bool,
) -> Result<()> {
    if slot.is_some() {
        return Err(Error::duplicate_element(
            &child.qualified_name(),
            parent,
            Some(child.offset),
        ));
    }
    let text = child.text();
    if required && text.is_empty() {
        return Err(Error::required_content_missing(
            &child.qualified_name(),
            "text content",
            Some(child.offset),
        ));
    }
    *slot = Some(text);
    Ok(())
}

/// Stores the timestamp of a singleton child, rejecting duplicates.
pub fn parse_timestamp_singleton(
    child: &XmlElement,
    slot: &mut Option<DateTime<Utc>>,
    parent: &str,
) -> Result<()> {
    if slot.is_some() {
        return Err(Error::duplicate_element(
            &child.qualified_name(),
            parent,
            Some(child.offset),
        ));
    }
    let text = child.text();
    let value = parse_timestamp(text.trim()).ok_or_else(|| {
        Error::invalid_value(&child.qualified_name(), "content", &text, Some(child.offset))
    })?;
    *slot = Some(value);
    Ok(())
}

/// Stores the integer content of a singleton child, rejecting duplicates.
pub fn parse_int_singleton<T: FromStr>(
    child: &XmlElement,
    slot: &mut Option<T>,
    parent: &str,
) -> Result<()> {
    if slot.is_some() {
        return Err(Error::duplicate_element(
            &child.qualified_name(),
            parent,
            Some(child.offset),
        ));
    }
    let text = child.text();
    *slot = Some(parse_int(child, text.trim(), "content")?);
    Ok(())
}

/// Parses a timestamp in RFC 3339 form, falling back to a zone-less
/// ISO 8601 form interpreted as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Formats a timestamp as ISO 8601, keeping sub-second digits only when present.
pub fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Parses an integer using ASCII digits only.
pub fn parse_int<T: FromStr>(element: &XmlElement, value: &str, what: &str) -> Result<T> {
    let digits = value.strip_prefix('-').unwrap_or(value);
    let valid = !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit());
    valid
        .then(|| value.parse::<T>().ok())
        .flatten()
        .ok_or_else(|| {
            Error::invalid_value(&element.qualified_name(), what, value, Some(element.offset))
        })
}

/// Parses `true`/`false`/`1`/`0`.
pub fn parse_bool(element: &XmlElement, value: &str, what: &str) -> Result<bool> {
    match value {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(Error::invalid_value(
            &element.qualified_name(),
            what,
            value,
            Some(element.offset),
        )),
    }
}

/// Fails with `required-content-missing` if an attribute value is empty.
pub fn non_empty_attribute(element: &XmlElement, attr: &XmlAttribute) -> Result<String> {
    if attr.value.is_empty() {
        return Err(Error::required_content_missing(
            &element.qualified_name(),
            &format!("@{}", attr.name),
            Some(element.offset),
        ));
    }
    Ok(attr.value.clone())
}
