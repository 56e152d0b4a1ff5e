use std::cmp::Ordering;

use crate::comparable::Comparable;
use crate::error::{Error, Result};
use crate::parsable::{Extensions, Handled, Parsable, non_empty_attribute};
use crate::xml::{XmlAttribute, XmlElement, XmlWriter};

/// An `atom:category` element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Category {
    term: String,
    scheme: Option<String>,
    label: Option<String>,
    extensions: Extensions,
}

impl Category {
    /// Creates a category. The term must not be empty.
    pub fn new(term: impl Into<String>, scheme: Option<String>, label: Option<String>) -> Self {
        Self {
            term: term.into(),
            scheme,
            label,
            extensions: Extensions::default(),
        }
    }

    /// The category's identifying term.
    pub fn term(&self) -> &str {
        &self.term
    }

    /// The IRI of the categorization scheme.
    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }

    /// A human-readable label.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn set_term(&mut self, term: impl Into<String>) {
        self.term = term.into();
    }

    pub fn set_scheme(&mut self, scheme: Option<String>) {
        self.scheme = scheme;
    }

    pub fn set_label(&mut self, label: Option<String>) {
        self.label = label;
    }
}

impl Comparable for Category {
    fn compare_with(&self, other: &Self) -> Ordering {
        self.term.cmp(&other.term)
    }
}

impl Parsable for Category {
    const ELEMENT_NAME: &'static str = "category";

    fn parse_attribute(&mut self, attr: &XmlAttribute, element: &XmlElement) -> Result<Handled> {
        if attr.namespace.is_some() {
            return Ok(Handled::NotMine);
        }
        match attr.name.as_str() {
            "term" => self.term = non_empty_attribute(element, attr)?,
            "scheme" => self.scheme = Some(non_empty_attribute(element, attr)?),
            "label" => self.label = Some(attr.value.clone()),
            _ => return Ok(Handled::NotMine),
        }
        Ok(Handled::Consumed)
    }

    fn post_parse(&mut self, element: &XmlElement) -> Result<()> {
        if self.term.is_empty() {
            return Err(Error::required_content_missing(
                &element.qualified_name(),
                "@term",
                Some(element.offset),
            ));
        }
        Ok(())
    }

    fn write_attributes(&self, writer: &mut XmlWriter) {
        writer.attribute("term", &self.term);
        writer.optional_attribute("scheme", self.scheme.as_deref());
        writer.optional_attribute("label", self.label.as_deref());
    }

    fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }
}
