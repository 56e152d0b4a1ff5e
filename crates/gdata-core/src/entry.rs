//! Atom entries, the unit of insert, update, and delete.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};

use crate::atom::{Author, Category, Link, rel};
use crate::comparable::push_unique;
use crate::error::{Error, Result};
use crate::parsable::{
    Extensions, Handled, Parsable, format_timestamp, merge_namespaces, parse_int,
    parse_string_singleton, parse_timestamp_singleton,
};
use crate::xml::{XmlAttribute, XmlElement, XmlWriter, ns};

/// The operation a batch entry asks the server to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchOperationType {
    Query,
    Insertion,
    Update,
    Deletion,
}

impl BatchOperationType {
    /// The value of the `type` attribute of `batch:operation`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Insertion => "insert",
            Self::Update => "update",
            Self::Deletion => "delete",
        }
    }

    fn from_wire(value: &str) -> Option<Self> {
        match value {
            "query" => Some(Self::Query),
            "insert" => Some(Self::Insertion),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Deletion),
            _ => None,
        }
    }
}

impl fmt::Display for BatchOperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The outcome reported by a `batch:status` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchStatus {
    /// The HTTP status code of the individual operation.
    pub code: u16,
    /// The reason phrase, if given.
    pub reason: Option<String>,
    /// The verbatim content of the status element (usually an error document).
    pub content: String,
}

impl BatchStatus {
    /// Returns true for 2xx codes.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }
}

/// An entry's content: inline text, or a reference to out-of-line media.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Text(String),
    Source {
        uri: String,
        content_type: Option<String>,
    },
}

/// An `atom:entry` element.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Entry {
    title: Option<String>,
    id: Option<String>,
    summary: Option<String>,
    rights: Option<String>,
    updated: Option<DateTime<Utc>>,
    published: Option<DateTime<Utc>>,
    content: Option<Content>,
    categories: Vec<Category>,
    links: Vec<Link>,
    authors: Vec<Author>,
    etag: Option<String>,
    batch_id: Option<u32>,
    batch_operation: Option<BatchOperationType>,
    batch_status: Option<BatchStatus>,
    extensions: Extensions,
}

/// An entry type a service can query for.
///
/// Service-specific entries embed an [`Entry`] and delegate the Atom
/// children to it before handling their own.
pub trait EntryType: Parsable + Clone + Send + Sync + 'static {
    /// The embedded Atom entry.
    fn entry(&self) -> &Entry;

    /// Mutable access to the embedded Atom entry.
    fn entry_mut(&mut self) -> &mut Entry;

    /// Builds the URI an entry with the given id can be fetched from.
    fn entry_uri(id: &str) -> String {
        id.to_string()
    }
}

impl Entry {
    /// Creates an empty, locally-constructed entry.
    pub fn new(id: Option<String>) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn set_title(&mut self, title: Option<String>) {
        self.title = title;
    }

    /// The entry's permanent, server-assigned id.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Sets the id. Only entries that have not been inserted should change it.
    pub fn set_id(&mut self, id: Option<String>) {
        self.id = id;
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    pub fn set_summary(&mut self, summary: Option<String>) {
        self.summary = summary;
    }

    pub fn rights(&self) -> Option<&str> {
        self.rights.as_deref()
    }

    pub fn set_rights(&mut self, rights: Option<String>) {
        self.rights = rights;
    }

    pub fn updated(&self) -> Option<DateTime<Utc>> {
        self.updated
    }

    pub fn set_updated(&mut self, updated: Option<DateTime<Utc>>) {
        self.updated = updated;
    }

    pub fn published(&self) -> Option<DateTime<Utc>> {
        self.published
    }

    pub fn set_published(&mut self, published: Option<DateTime<Utc>>) {
        self.published = published;
    }

    pub fn content(&self) -> Option<&Content> {
        self.content.as_ref()
    }

    pub fn set_content(&mut self, content: Option<Content>) {
        self.content = content;
    }

    /// The opaque version tag issued by the server.
    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    pub fn set_etag(&mut self, etag: Option<String>) {
        self.etag = etag;
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    /// Adds a category unless one with the same term is present.
    pub fn add_category(&mut self, category: Category) -> bool {
        push_unique(&mut self.categories, category)
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// Adds a link unless one with the same URI and relation is present.
    pub fn add_link(&mut self, link: Link) -> bool {
        push_unique(&mut self.links, link)
    }

    /// Removes links equal to `link` by URI and relation.
    pub fn remove_link(&mut self, link: &Link) -> bool {
        let before = self.links.len();
        self.links
            .retain(|existing| !(existing.uri() == link.uri() && existing.relation_type() == link.relation_type()));
        self.links.len() != before
    }

    /// Returns the first link with the given relation type.
    pub fn look_up_link(&self, relation_type: &str) -> Option<&Link> {
        self.links
            .iter()
            .find(|link| link.relation_type() == relation_type)
    }

    /// Returns every link with the given relation type.
    pub fn look_up_links<'a>(&'a self, relation_type: &'a str) -> impl Iterator<Item = &'a Link> {
        self.links
            .iter()
            .filter(move |link| link.relation_type() == relation_type)
    }

    pub fn authors(&self) -> &[Author] {
        &self.authors
    }

    /// Adds an author unless one with the same name is present.
    pub fn add_author(&mut self, author: Author) -> bool {
        push_unique(&mut self.authors, author)
    }

    /// Returns true once the server has assigned an id.
    pub fn is_inserted(&self) -> bool {
        self.id.is_some()
    }

    /// The id assigned to this entry within a batch request.
    pub fn batch_id(&self) -> Option<u32> {
        self.batch_id
    }

    /// The operation this entry represents within a batch request.
    pub fn batch_operation(&self) -> Option<BatchOperationType> {
        self.batch_operation
    }

    /// Marks this entry as part of a batch request.
    pub fn set_batch_data(&mut self, id: u32, operation: BatchOperationType) {
        self.batch_id = Some(id);
        self.batch_operation = Some(operation);
    }

    /// Removes batch markers so the entry can be used outside the batch.
    pub fn clear_batch_data(&mut self) {
        self.batch_id = None;
        self.batch_operation = None;
        self.batch_status = None;
    }

    /// The status the server reported for this entry in a batch response.
    pub fn batch_status(&self) -> Option<&BatchStatus> {
        self.batch_status.as_ref()
    }

    fn parse_atom_child(&mut self, child: &XmlElement) -> Result<Handled> {
        match child.name.as_str() {
            "title" => parse_string_singleton(child, &mut self.title, "entry", false)?,
            "id" => parse_string_singleton(child, &mut self.id, "entry", true)?,
            "summary" => parse_string_singleton(child, &mut self.summary, "entry", false)?,
            "rights" => parse_string_singleton(child, &mut self.rights, "entry", false)?,
            "updated" => parse_timestamp_singleton(child, &mut self.updated, "entry")?,
            "published" => parse_timestamp_singleton(child, &mut self.published, "entry")?,
            "content" => {
                if self.content.is_some() {
                    return Err(Error::duplicate_element(
                        &child.qualified_name(),
                        "entry",
                        Some(child.offset),
                    ));
                }
                self.content = Some(match child.attribute("src") {
                    Some(src) => Content::Source {
                        uri: src.to_string(),
                        content_type: child.attribute("type").map(str::to_string),
                    },
                    None => Content::Text(child.text()),
                });
            }
            "category" => {
                self.categories.push(Category::from_element(child)?);
            }
            "link" => {
                self.links.push(Link::from_element(child)?);
            }
            "author" => {
                self.authors.push(Author::from_element(child)?);
            }
            _ => return Ok(Handled::NotMine),
        }
        Ok(Handled::Consumed)
    }

    fn parse_batch_child(&mut self, child: &XmlElement) -> Result<Handled> {
        match child.name.as_str() {
            "id" => {
                if self.batch_id.is_some() {
                    return Err(Error::duplicate_element(
                        &child.qualified_name(),
                        "entry",
                        Some(child.offset),
                    ));
                }
                let text = child.text();
                self.batch_id = Some(parse_int(child, text.trim(), "content")?);
            }
            "operation" => {
                let value = child.attribute("type").unwrap_or_default();
                let operation = BatchOperationType::from_wire(value).ok_or_else(|| {
                    Error::invalid_value(&child.qualified_name(), "@type", value, Some(child.offset))
                })?;
                self.batch_operation = Some(operation);
            }
            "status" => {
                let code = child.attribute("code").ok_or_else(|| {
                    Error::required_content_missing(
                        &child.qualified_name(),
                        "@code",
                        Some(child.offset),
                    )
                })?;
                self.batch_status = Some(BatchStatus {
                    code: parse_int(child, code, "@code")?,
                    reason: child.attribute("reason").map(str::to_string),
                    content: child.inner_raw().to_string(),
                });
            }
            _ => return Ok(Handled::NotMine),
        }
        Ok(Handled::Consumed)
    }
}

impl Parsable for Entry {
    const ELEMENT_NAME: &'static str = "entry";

    fn parse_attribute(&mut self, attr: &XmlAttribute, _element: &XmlElement) -> Result<Handled> {
        if attr.namespace.as_deref() == Some(ns::GD) && attr.name == "etag" {
            self.etag = Some(attr.value.clone());
            return Ok(Handled::Consumed);
        }
        Ok(Handled::NotMine)
    }

    fn parse_child(&mut self, child: &XmlElement) -> Result<Handled> {
        match child.namespace.as_deref() {
            Some(ns::ATOM) => self.parse_atom_child(child),
            Some(ns::BATCH) => self.parse_batch_child(child),
            _ => Ok(Handled::NotMine),
        }
    }

    fn write_attributes(&self, writer: &mut XmlWriter) {
        writer.optional_attribute("gd:etag", self.etag.as_deref());
    }

    fn write_children(&self, writer: &mut XmlWriter) {
        if let Some(ref title) = self.title {
            writer.start_element("title");
            writer.attribute("type", "text");
            writer.text(title);
            writer.end_element();
        }
        writer.optional_text_element("id", self.id.as_deref());
        if let Some(ref updated) = self.updated {
            writer.text_element("updated", &format_timestamp(updated));
        }
        if let Some(ref published) = self.published {
            writer.text_element("published", &format_timestamp(published));
        }
        if let Some(ref summary) = self.summary {
            writer.start_element("summary");
            writer.attribute("type", "text");
            writer.text(summary);
            writer.end_element();
        }
        writer.optional_text_element("rights", self.rights.as_deref());
        match self.content {
            Some(Content::Text(ref text)) => {
                writer.start_element("content");
                writer.attribute("type", "text");
                writer.text(text);
                writer.end_element();
            }
            Some(Content::Source {
                ref uri,
                ref content_type,
            }) => {
                writer.start_element("content");
                writer.optional_attribute("type", content_type.as_deref());
                writer.attribute("src", uri);
                writer.end_element();
            }
            None => {}
        }
        for category in &self.categories {
            category.write_element(writer);
        }
        for link in &self.links {
            link.write_element(writer);
        }
        for author in &self.authors {
            author.write_element(writer);
        }
        if let Some(id) = self.batch_id {
            writer.text_element("batch:id", &id.to_string());
        }
        if let Some(operation) = self.batch_operation {
            writer.start_element("batch:operation");
            writer.attribute("type", operation.as_str());
            writer.end_element();
        }
    }

    fn collect_namespaces(&self, namespaces: &mut BTreeMap<String, String>) {
        namespaces.insert("gd".to_string(), ns::GD.to_string());
        if self.batch_id.is_some() || self.batch_operation.is_some() {
            namespaces.insert("batch".to_string(), ns::BATCH.to_string());
        }
        merge_namespaces(namespaces, &self.categories);
        merge_namespaces(namespaces, &self.links);
        merge_namespaces(namespaces, &self.authors);
    }

    fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }
}

impl EntryType for Entry {
    fn entry(&self) -> &Entry {
        self
    }

    fn entry_mut(&mut self) -> &mut Entry {
        self
    }
}
