use std::cmp::Ordering;

use crate::comparable::Comparable;
use crate::error::{Error, Result};
use crate::parsable::{Extensions, Handled, Parsable, parse_string_singleton};
use crate::xml::{XmlElement, XmlWriter, ns};

/// An `atom:author` element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Author {
    name: String,
    uri: Option<String>,
    email: Option<String>,
    extensions: Extensions,
}

impl Author {
    /// Creates an author. The name must not be empty.
    pub fn new(name: impl Into<String>, uri: Option<String>, email: Option<String>) -> Self {
        Self {
            name: name.into(),
            uri,
            email,
            extensions: Extensions::default(),
        }
    }

    /// The author's human-readable name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// A URI associated with the author, such as a home page.
    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    /// The author's e-mail address.
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn set_uri(&mut self, uri: Option<String>) {
        self.uri = uri;
    }

    pub fn set_email(&mut self, email: Option<String>) {
        self.email = email;
    }
}

impl Comparable for Author {
    fn compare_with(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name)
    }
}

impl Parsable for Author {
    const ELEMENT_NAME: &'static str = "author";

    fn parse_child(&mut self, child: &XmlElement) -> Result<Handled> {
        if child.namespace.as_deref() != Some(ns::ATOM) {
            return Ok(Handled::NotMine);
        }
        match child.name.as_str() {
            "name" => {
                let mut name = (!self.name.is_empty()).then(|| self.name.clone());
                parse_string_singleton(child, &mut name, "author", true)?;
                self.name = name.unwrap_or_default();
            }
            "uri" => parse_string_singleton(child, &mut self.uri, "author", false)?,
            "email" => parse_string_singleton(child, &mut self.email, "author", false)?,
            _ => return Ok(Handled::NotMine),
        }
        Ok(Handled::Consumed)
    }

    fn post_parse(&mut self, _element: &XmlElement) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::required_element_missing("name", "author"));
        }
        Ok(())
    }

    fn write_children(&self, writer: &mut XmlWriter) {
        writer.text_element("name", &self.name);
        writer.optional_text_element("uri", self.uri.as_deref());
        writer.optional_text_element("email", self.email.as_deref());
    }

    fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }
}
