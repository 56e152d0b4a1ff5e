//! Atom feeds: an ordered list of entries plus paging metadata.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::atom::{Author, Category, Generator, Link, rel};
use crate::entry::{Entry, EntryType};
use crate::error::{Error, Result};
use crate::parsable::{
    Extensions, Handled, Parsable, format_timestamp, merge_namespaces, parse_int_singleton,
    parse_string_singleton, parse_timestamp_singleton,
};
use crate::xml::{XmlAttribute, XmlElement, XmlWriter, ns};

/// An `atom:feed` element whose entries are of type `E`.
#[derive(Debug, Clone, PartialEq)]
pub struct Feed<E: EntryType = Entry> {
    title: Option<String>,
    subtitle: Option<String>,
    id: Option<String>,
    updated: Option<DateTime<Utc>>,
    logo: Option<String>,
    icon: Option<String>,
    rights: Option<String>,
    etag: Option<String>,
    generator: Option<Generator>,
    categories: Vec<Category>,
    links: Vec<Link>,
    authors: Vec<Author>,
    entries: Vec<E>,
    total_results: Option<u32>,
    start_index: Option<u32>,
    items_per_page: Option<u32>,
    next_page_token: Option<String>,
    extensions: Extensions,
}

impl<E: EntryType> Default for Feed<E> {
    fn default() -> Self {
        Self {
            title: None,
            subtitle: None,
            id: None,
            updated: None,
            logo: None,
            icon: None,
            rights: None,
            etag: None,
            generator: None,
            categories: Vec::new(),
            links: Vec::new(),
            authors: Vec::new(),
            entries: Vec::new(),
            total_results: None,
            start_index: None,
            items_per_page: None,
            next_page_token: None,
            extensions: Extensions::default(),
        }
    }
}

impl<E: EntryType> Feed<E> {
    /// Creates a feed for building batch requests and tests.
    pub fn new(id: impl Into<String>, title: Option<String>, updated: DateTime<Utc>) -> Self {
        Self {
            id: Some(id.into()),
            title,
            updated: Some(updated),
            ..Self::default()
        }
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn subtitle(&self) -> Option<&str> {
        self.subtitle.as_deref()
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn updated(&self) -> Option<DateTime<Utc>> {
        self.updated
    }

    pub fn logo(&self) -> Option<&str> {
        self.logo.as_deref()
    }

    pub fn icon(&self) -> Option<&str> {
        self.icon.as_deref()
    }

    pub fn rights(&self) -> Option<&str> {
        self.rights.as_deref()
    }

    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    pub fn set_etag(&mut self, etag: Option<String>) {
        self.etag = etag;
    }

    pub fn generator(&self) -> Option<&Generator> {
        self.generator.as_ref()
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn authors(&self) -> &[Author] {
        &self.authors
    }

    pub fn entries(&self) -> &[E] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<E> {
        self.entries
    }

    /// Appends an entry; used when composing batch feeds.
    pub fn push_entry(&mut self, entry: E) {
        self.entries.push(entry);
    }

    /// Finds the entry with the given id.
    pub fn look_up_entry(&self, id: &str) -> Option<&E> {
        self.entries
            .iter()
            .find(|entry| entry.entry().id() == Some(id))
    }

    /// The total number of results the query matched, if the server said.
    pub fn total_results(&self) -> Option<u32> {
        self.total_results
    }

    /// The 1-based index of the first entry in this page.
    pub fn start_index(&self) -> Option<u32> {
        self.start_index
    }

    /// The number of entries per page.
    pub fn items_per_page(&self) -> Option<u32> {
        self.items_per_page
    }

    /// The token for the next page, for services paging by token.
    pub fn next_page_token(&self) -> Option<&str> {
        self.next_page_token.as_deref()
    }

    pub fn set_next_page_token(&mut self, token: Option<String>) {
        self.next_page_token = token;
    }

    /// Returns the first link with the given relation type.
    pub fn look_up_link(&self, relation_type: &str) -> Option<&Link> {
        self.links
            .iter()
            .find(|link| link.relation_type() == relation_type)
    }

    /// The URI of the next page of results, present iff more results remain.
    pub fn next_link(&self) -> Option<&str> {
        self.look_up_link(rel::NEXT).map(Link::uri)
    }

    /// The URI of the previous page of results.
    pub fn previous_link(&self) -> Option<&str> {
        self.look_up_link(rel::PREVIOUS).map(Link::uri)
    }

    /// The URI batch requests against this feed are posted to.
    pub fn batch_link(&self) -> Option<&str> {
        self.look_up_link(rel::BATCH).map(Link::uri)
    }

    pub fn add_link(&mut self, link: Link) -> bool {
        crate::comparable::push_unique(&mut self.links, link)
    }

    fn parse_atom_child(&mut self, child: &XmlElement) -> Result<Handled> {
        match child.name.as_str() {
            "entry" => {
                if E::NAMESPACE != ns::ATOM || E::ELEMENT_NAME != "entry" {
                    return Ok(Handled::NotMine);
                }
                self.entries.push(E::from_element(child)?);
            }
            "title" => parse_string_singleton(child, &mut self.title, "feed", false)?,
            "subtitle" => parse_string_singleton(child, &mut self.subtitle, "feed", false)?,
            "id" => parse_string_singleton(child, &mut self.id, "feed", true)?,
            "logo" => parse_string_singleton(child, &mut self.logo, "feed", false)?,
            "icon" => parse_string_singleton(child, &mut self.icon, "feed", false)?,
            "rights" => parse_string_singleton(child, &mut self.rights, "feed", false)?,
            "updated" => parse_timestamp_singleton(child, &mut self.updated, "feed")?,
            "category" => self.categories.push(Category::from_element(child)?),
            "link" => self.links.push(Link::from_element(child)?),
            "author" => self.authors.push(Author::from_element(child)?),
            "generator" => {
                if self.generator.is_some() {
                    return Err(Error::duplicate_element(
                        &child.qualified_name(),
                        "feed",
                        Some(child.offset),
                    ));
                }
                self.generator = Some(Generator::from_element(child)?);
            }
            _ => return Ok(Handled::NotMine),
        }
        Ok(Handled::Consumed)
    }

    fn parse_opensearch_child(&mut self, child: &XmlElement) -> Result<Handled> {
        match child.name.as_str() {
            "totalResults" => parse_int_singleton(child, &mut self.total_results, "feed")?,
            "startIndex" => parse_int_singleton(child, &mut self.start_index, "feed")?,
            "itemsPerPage" => parse_int_singleton(child, &mut self.items_per_page, "feed")?,
            _ => return Ok(Handled::NotMine),
        }
        Ok(Handled::Consumed)
    }
}

impl<E: EntryType> Parsable for Feed<E> {
    const ELEMENT_NAME: &'static str = "feed";

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
            Some(ns::OPENSEARCH) => self.parse_opensearch_child(child),
            Some(ns::GD) if child.name == "nextPageToken" => {
                parse_string_singleton(child, &mut self.next_page_token, "feed", true)?;
                Ok(Handled::Consumed)
            }
            Some(namespace) if namespace == E::NAMESPACE && child.name == E::ELEMENT_NAME => {
                self.entries.push(E::from_element(child)?);
                Ok(Handled::Consumed)
            }
            _ => Ok(Handled::NotMine),
        }
    }

    fn post_parse(&mut self, _element: &XmlElement) -> Result<()> {
        if self.id.is_none() {
            return Err(Error::required_element_missing("id", "feed"));
        }
        if self.updated.is_none() {
            return Err(Error::required_element_missing("updated", "feed"));
        }
        Ok(())
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
        if let Some(ref subtitle) = self.subtitle {
            writer.start_element("subtitle");
            writer.attribute("type", "text");
            writer.text(subtitle);
            writer.end_element();
        }
        writer.optional_text_element("id", self.id.as_deref());
        if let Some(ref updated) = self.updated {
            writer.text_element("updated", &format_timestamp(updated));
        }
        writer.optional_text_element("logo", self.logo.as_deref());
        writer.optional_text_element("icon", self.icon.as_deref());
        writer.optional_text_element("rights", self.rights.as_deref());
        if let Some(ref generator) = self.generator {
            generator.write_element(writer);
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
        if let Some(total) = self.total_results {
            writer.text_element("openSearch:totalResults", &total.to_string());
        }
        if let Some(start) = self.start_index {
            writer.text_element("openSearch:startIndex", &start.to_string());
        }
        if let Some(per_page) = self.items_per_page {
            writer.text_element("openSearch:itemsPerPage", &per_page.to_string());
        }
        writer.optional_text_element("gd:nextPageToken", self.next_page_token.as_deref());
        for entry in &self.entries {
            entry.write_element(writer);
        }
    }

    fn collect_namespaces(&self, namespaces: &mut BTreeMap<String, String>) {
        if self.etag.is_some() || self.next_page_token.is_some() {
            namespaces.insert("gd".to_string(), ns::GD.to_string());
        }
        if self.total_results.is_some() || self.start_index.is_some() || self.items_per_page.is_some() {
            namespaces.insert("openSearch".to_string(), ns::OPENSEARCH.to_string());
        }
        merge_namespaces(namespaces, self.generator.iter());
        merge_namespaces(namespaces, &self.categories);
        merge_namespaces(namespaces, &self.links);
        merge_namespaces(namespaces, &self.authors);
        merge_namespaces(namespaces, &self.entries);
    }

    fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParseErrorKind;
    use chrono::TimeZone;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:openSearch="http://a9.com/-/spec/opensearch/1.1/" xmlns:gd="http://schemas.google.com/g/2005" xmlns:ex="http://example.com/ext" gd:etag="W/&quot;D08FQn8-eil7ImA9WxZbFEw.&quot;">
  <title>Test feed</title>
  <subtitle>Test subtitle</subtitle>
  <id>http://example.com/feed</id>
  <updated>2009-02-03T14:58:13Z</updated>
  <generator uri="http://example.com/generator" version="1.0">Generator</generator>
  <link href="http://example.com/feed" rel="self"/>
  <link href="http://example.com/feed?start-index=3" rel="next"/>
  <author><name>Joe Smith</name></author>
  <openSearch:totalResults>5</openSearch:totalResults>
  <openSearch:startIndex>1</openSearch:startIndex>
  <openSearch:itemsPerPage>2</openSearch:itemsPerPage>
  <ex:paging mode="fast"/>
  <entry gd:etag="W/&quot;1&quot;"><id>http://example.com/1</id><title>One</title><ex:rating value="4"/></entry>
  <entry><id>http://example.com/2</id><title>Two</title></entry>
</feed>"#;

    #[test]
    fn parses_metadata_and_entries() {
        let feed: Feed = Feed::from_xml(FEED).unwrap();
        assert_eq!(feed.title(), Some("Test feed"));
        assert_eq!(feed.subtitle(), Some("Test subtitle"));
        assert_eq!(feed.id(), Some("http://example.com/feed"));
        assert_eq!(feed.etag(), Some("W/\"D08FQn8-eil7ImA9WxZbFEw.\""));
        assert_eq!(feed.generator().and_then(Generator::name), Some("Generator"));
        assert_eq!(feed.total_results(), Some(5));
        assert_eq!(feed.start_index(), Some(1));
        assert_eq!(feed.items_per_page(), Some(2));
        assert_eq!(feed.next_link(), Some("http://example.com/feed?start-index=3"));
        assert_eq!(feed.previous_link(), None);
        assert_eq!(feed.entries().len(), 2);
        assert_eq!(feed.entries()[0].etag(), Some("W/\"1\""));
        assert_eq!(
            feed.look_up_entry("http://example.com/2").and_then(Entry::title),
            Some("Two")
        );
    }

    #[test]
    fn round_trip_keeps_entry_extensions() {
        let feed: Feed = Feed::from_xml(FEED).unwrap();
        let xml = feed.to_xml();
        assert!(xml.contains(r#"xmlns:ex="http://example.com/ext""#));
        assert!(xml.contains(r#"<ex:rating value="4"/>"#));
        assert!(xml.contains(r#"<ex:paging mode="fast"/>"#));
        let reparsed: Feed = Feed::from_xml(&xml).unwrap();
        assert_eq!(reparsed, feed);
    }

    #[test]
    fn id_and_updated_are_required() {
        let err = Feed::<Entry>::from_xml(
            "<feed xmlns='http://www.w3.org/2005/Atom'><updated>2009-02-03T14:58:13Z</updated></feed>",
        )
        .unwrap_err();
        assert_eq!(
            err.parse_fault().map(|f| f.kind),
            Some(ParseErrorKind::RequiredChildMissing)
        );
        let err = Feed::<Entry>::from_xml(
            "<feed xmlns='http://www.w3.org/2005/Atom'><id>http://example.com/</id></feed>",
        )
        .unwrap_err();
        assert_eq!(err.parse_fault().unwrap().element, "updated");
    }

    #[test]
    fn duplicate_paging_elements_are_rejected() {
        let err = Feed::<Entry>::from_xml(
            "<feed xmlns='http://www.w3.org/2005/Atom' xmlns:openSearch='http://a9.com/-/spec/opensearch/1.1/'><openSearch:totalResults>1</openSearch:totalResults><openSearch:totalResults>2</openSearch:totalResults></feed>",
        )
        .unwrap_err();
        assert_eq!(
            err.parse_fault().map(|f| f.kind),
            Some(ParseErrorKind::DuplicateSingleton)
        );
    }

    #[test]
    fn escapes_on_emit() {
        let mut feed: Feed = Feed::new(
            "http://foo.com?foo&bar",
            Some("Test feed & stuff.".to_string()),
            Utc.with_ymd_and_hms(2010, 12, 10, 17, 49, 15).unwrap(),
        );
        feed.set_etag(None);
        insta::assert_snapshot!(
            feed.to_xml(),
            @r#"<feed xmlns="http://www.w3.org/2005/Atom"><title type="text">Test feed &amp; stuff.</title><id>http://foo.com?foo&amp;bar</id><updated>2010-12-10T17:49:15Z</updated></feed>"#
        );
    }
}
