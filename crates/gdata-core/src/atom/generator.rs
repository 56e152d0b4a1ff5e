use std::cmp::Ordering;

use crate::comparable::Comparable;
use crate::error::Result;
use crate::parsable::{Extensions, Handled, Parsable, non_empty_attribute};
use crate::xml::{XmlAttribute, XmlElement, XmlWriter};

/// An `atom:generator` element naming the software that produced a feed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Generator {
    name: Option<String>,
    uri: Option<String>,
    version: Option<String>,
    extensions: Extensions,
}

impl Generator {
    pub fn new(name: Option<String>, uri: Option<String>, version: Option<String>) -> Self {
        Self {
            name,
            uri,
            version,
            extensions: Extensions::default(),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }
}

impl Comparable for Generator {
    fn compare_with(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name)
    }
}

impl Parsable for Generator {
    const ELEMENT_NAME: &'static str = "generator";

    fn parse_attribute(&mut self, attr: &XmlAttribute, element: &XmlElement) -> Result<Handled> {
        if attr.namespace.is_some() {
            return Ok(Handled::NotMine);
        }
        match attr.name.as_str() {
            "uri" => self.uri = Some(non_empty_attribute(element, attr)?),
            "version" => self.version = Some(attr.value.clone()),
            _ => return Ok(Handled::NotMine),
        }
        Ok(Handled::Consumed)
    }

    fn post_parse(&mut self, element: &XmlElement) -> Result<()> {
        let text = element.text();
        self.name = (!text.is_empty()).then_some(text);
        Ok(())
    }

    fn write_attributes(&self, writer: &mut XmlWriter) {
        writer.optional_attribute("uri", self.uri.as_deref());
        writer.optional_attribute("version", self.version.as_deref());
    }

    fn write_children(&self, writer: &mut XmlWriter) {
        if let Some(ref name) = self.name {
            writer.text(name);
        }
    }

    fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }
}
