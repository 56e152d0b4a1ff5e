use std::cmp::Ordering;

use crate::comparable::Comparable;
use crate::error::{Error, Result};
use crate::parsable::{Extensions, Handled, Parsable, non_empty_attribute, parse_int};
use crate::xml::{XmlAttribute, XmlElement, XmlWriter};

/// Well-known link relation types.
pub mod rel {
    pub const ALTERNATE: &str = "alternate";
    pub const SELF: &str = "self";
    pub const EDIT: &str = "edit";
    pub const EDIT_MEDIA: &str = "edit-media";
    pub const NEXT: &str = "next";
    pub const PREVIOUS: &str = "previous";
    pub const RELATED: &str = "related";
    pub const FEED: &str = "http://schemas.google.com/g/2005#feed";
    pub const POST: &str = "http://schemas.google.com/g/2005#post";
    pub const BATCH: &str = "http://schemas.google.com/g/2005#batch";
    pub const RESUMABLE_CREATE_MEDIA: &str =
        "http://schemas.google.com/g/2005#resumable-create-media";
    pub const RESUMABLE_EDIT_MEDIA: &str = "http://schemas.google.com/g/2005#resumable-edit-media";
}

/// An `atom:link` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    uri: String,
    relation_type: String,
    content_type: Option<String>,
    language: Option<String>,
    title: Option<String>,
    length: Option<u64>,
    extensions: Extensions,
}

impl Default for Link {
    fn default() -> Self {
        Self {
            uri: String::new(),
            relation_type: rel::ALTERNATE.to_string(),
            content_type: None,
            language: None,
            title: None,
            length: None,
            extensions: Extensions::default(),
        }
    }
}

impl Link {
    /// Creates a link; a missing relation type means `alternate`.
    pub fn new(uri: impl Into<String>, relation_type: Option<&str>) -> Self {
        Self {
            uri: uri.into(),
            relation_type: relation_type.unwrap_or(rel::ALTERNATE).to_string(),
            ..Self::default()
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn relation_type(&self) -> &str {
        &self.relation_type
    }

    /// The advertised media type of the linked resource.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// The language of the linked resource (`hreflang`).
    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    /// The advertised length of the linked resource, in bytes.
    pub fn length(&self) -> Option<u64> {
        self.length
    }

    pub fn set_uri(&mut self, uri: impl Into<String>) {
        self.uri = uri.into();
    }

    pub fn set_relation_type(&mut self, relation_type: Option<&str>) {
        self.relation_type = relation_type.unwrap_or(rel::ALTERNATE).to_string();
    }

    pub fn set_content_type(&mut self, content_type: Option<String>) {
        self.content_type = content_type;
    }

    pub fn set_language(&mut self, language: Option<String>) {
        self.language = language;
    }

    pub fn set_title(&mut self, title: Option<String>) {
        self.title = title;
    }

    pub fn set_length(&mut self, length: Option<u64>) {
        self.length = length;
    }
}

impl Comparable for Link {
    fn compare_with(&self, other: &Self) -> Ordering {
        self.uri
            .cmp(&other.uri)
            .then_with(|| self.relation_type.cmp(&other.relation_type))
    }
}

impl Parsable for Link {
    const ELEMENT_NAME: &'static str = "link";

    fn parse_attribute(&mut self, attr: &XmlAttribute, element: &XmlElement) -> Result<Handled> {
        if attr.namespace.is_some() {
            return Ok(Handled::NotMine);
        }
        match attr.name.as_str() {
            "href" => self.uri = attr.value.clone(),
            "rel" => self.relation_type = non_empty_attribute(element, attr)?,
            "type" => self.content_type = Some(non_empty_attribute(element, attr)?),
            "hreflang" => self.language = Some(non_empty_attribute(element, attr)?),
            "title" => self.title = Some(attr.value.clone()),
            "length" => self.length = Some(parse_int(element, &attr.value, "@length")?),
            _ => return Ok(Handled::NotMine),
        }
        Ok(Handled::Consumed)
    }

    fn post_parse(&mut self, element: &XmlElement) -> Result<()> {
        if element.attribute("href").is_none() {
            return Err(Error::required_content_missing(
                &element.qualified_name(),
                "@href",
                Some(element.offset),
            ));
        }
        Ok(())
    }

    fn write_attributes(&self, writer: &mut XmlWriter) {
        writer.attribute("href", &self.uri);
        writer.attribute("rel", &self.relation_type);
        writer.optional_attribute("type", self.content_type.as_deref());
        writer.optional_attribute("hreflang", self.language.as_deref());
        writer.optional_attribute("title", self.title.as_deref());
        if let Some(length) = self.length {
            writer.attribute("length", &length.to_string());
        }
    }

    fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }
}
