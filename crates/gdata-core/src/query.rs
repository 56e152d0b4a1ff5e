//! Query parameter builders producing canonical feed URIs.
//!
//! [`Query`] carries the parameters every GData feed understands. Services
//! with extra parameters wrap a `Query` and implement [`QueryParameters`] to
//! append their own after the standard ones.
//!
//! Every setter clears the query's ETag: once a parameter changes, a cached
//! response for the old parameters can no longer be revalidated.

use chrono::{DateTime, Utc};

use crate::entry::EntryType;
use crate::feed::Feed;

/// How a query moves between pages of results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PaginationType {
    /// `start-index` is advanced by `max-results`.
    #[default]
    Indexed,
    /// The feed's `next`/`previous` links are followed.
    Uris,
    /// The feed's next-page token is sent as `pageToken`.
    Tokens,
}

/// Appends percent-encoded parameters to a feed URI.
#[derive(Debug, Clone)]
pub struct QueryUriBuilder {
    uri: String,
    params_started: bool,
}

impl QueryUriBuilder {
    /// Starts from `feed_uri`; parameters continue with `&` if it already has a `?`.
    pub fn new(feed_uri: &str) -> Self {
        Self {
            uri: feed_uri.to_string(),
            params_started: feed_uri.contains('?'),
        }
    }

    /// Appends a `/-/` category path, keeping `/` literal.
    ///
    /// Must be called before any parameter is appended.
    pub fn append_categories(&mut self, categories: &str) {
        let mut path = String::from("/-/");
        path.push_str(&escape_keeping_slashes(categories));
        match self.uri.find('?') {
            Some(index) => self.uri.insert_str(index, &path),
            None => self.uri.push_str(&path),
        }
    }

    fn separator(&mut self) {
        self.uri.push(if self.params_started { '&' } else { '?' });
        self.params_started = true;
    }

    /// Appends `name=value`, percent-encoding the value.
    pub fn append_param(&mut self, name: &str, value: &str) {
        self.separator();
        self.uri.push_str(name);
        self.uri.push('=');
        self.uri.push_str(&escape(value));
    }

    /// Appends `name=value` where the value is already encoded.
    pub fn append_raw_param(&mut self, name: &str, value: &str) {
        self.separator();
        self.uri.push_str(name);
        self.uri.push('=');
        self.uri.push_str(value);
    }

    /// Appends a timestamp parameter in `YYYY-MM-DDTHH:MM:SSZ` form.
    pub fn append_timestamp_param(&mut self, name: &str, value: &DateTime<Utc>) {
        self.append_raw_param(name, &value.format("%Y-%m-%dT%H:%M:%SZ").to_string());
    }

    pub fn into_string(self) -> String {
        self.uri
    }
}

/// Percent-encodes every byte outside the unreserved set, using upper-case hex.
pub fn escape(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

fn escape_keeping_slashes(value: &str) -> String {
    value.split('/').map(escape).collect::<Vec<_>>().join("/")
}

/// The parameters every GData feed accepts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    q: Option<String>,
    categories: Option<String>,
    author: Option<String>,
    updated_min: Option<DateTime<Utc>>,
    updated_max: Option<DateTime<Utc>>,
    published_min: Option<DateTime<Utc>>,
    published_max: Option<DateTime<Utc>>,
    start_index: u32,
    max_results: u32,
    is_strict: bool,
    etag: Option<String>,
    pagination_type: PaginationType,
    next_uri: Option<String>,
    previous_uri: Option<String>,
    next_page_token: Option<String>,
    use_next_page: bool,
    use_previous_page: bool,
}

impl Query {
    /// Creates a query with full-text search term `q`.
    pub fn new(q: Option<&str>) -> Self {
        Self {
            q: q.map(str::to_string),
            ..Self::default()
        }
    }

    /// Creates a query with a search term and paging limits.
    pub fn with_limits(q: Option<&str>, start_index: u32, max_results: u32) -> Self {
        Self {
            q: q.map(str::to_string),
            start_index,
            max_results,
            ..Self::default()
        }
    }

    pub fn q(&self) -> Option<&str> {
        self.q.as_deref()
    }

    /// Sets the full-text search term.
    pub fn set_q(&mut self, q: Option<&str>) {
        self.q = q.map(str::to_string);
        self.etag = None;
    }

    /// The category expression: `A/B` for AND, `A|B` for OR, `-C` for NOT,
    /// `{scheme}term` to qualify a term.
    pub fn categories(&self) -> Option<&str> {
        self.categories.as_deref()
    }

    pub fn set_categories(&mut self, categories: Option<&str>) {
        self.categories = categories.map(str::to_string);
        self.etag = None;
    }

    pub fn author(&self) -> Option<&str> {
        self.author.as_deref()
    }

    pub fn set_author(&mut self, author: Option<&str>) {
        self.author = author.map(str::to_string);
        self.etag = None;
    }

    pub fn updated_min(&self) -> Option<DateTime<Utc>> {
        self.updated_min
    }

    pub fn set_updated_min(&mut self, value: Option<DateTime<Utc>>) {
        self.updated_min = value;
        self.etag = None;
    }

    pub fn updated_max(&self) -> Option<DateTime<Utc>> {
        self.updated_max
    }

    pub fn set_updated_max(&mut self, value: Option<DateTime<Utc>>) {
        self.updated_max = value;
        self.etag = None;
    }

    pub fn published_min(&self) -> Option<DateTime<Utc>> {
        self.published_min
    }

    pub fn set_published_min(&mut self, value: Option<DateTime<Utc>>) {
        self.published_min = value;
        self.etag = None;
    }

    pub fn published_max(&self) -> Option<DateTime<Utc>> {
        self.published_max
    }

    pub fn set_published_max(&mut self, value: Option<DateTime<Utc>>) {
        self.published_max = value;
        self.etag = None;
    }

    /// The 1-based index of the first result; 0 leaves it unset.
    pub fn start_index(&self) -> u32 {
        self.start_index
    }

    pub fn set_start_index(&mut self, start_index: u32) {
        self.start_index = start_index;
        self.etag = None;
    }

    /// The page size; 0 leaves it to the server.
    pub fn max_results(&self) -> u32 {
        self.max_results
    }

    pub fn set_max_results(&mut self, max_results: u32) {
        self.max_results = max_results;
        self.etag = None;
    }

    /// Whether the server should reject unknown parameters.
    pub fn is_strict(&self) -> bool {
        self.is_strict
    }

    pub fn set_is_strict(&mut self, is_strict: bool) {
        self.is_strict = is_strict;
        self.etag = None;
    }

    /// The ETag of the last response, sent as `If-None-Match`.
    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    pub fn set_etag(&mut self, etag: Option<&str>) {
        self.etag = etag.map(str::to_string);
    }

    pub fn pagination_type(&self) -> PaginationType {
        self.pagination_type
    }

    /// Switches the paging mode, forgetting any stored page links or tokens.
    pub fn set_pagination_type(&mut self, pagination_type: PaginationType) {
        self.clear_pagination();
        self.pagination_type = pagination_type;
        self.etag = None;
    }

    fn clear_pagination(&mut self) {
        match self.pagination_type {
            PaginationType::Indexed => {}
            PaginationType::Uris => {
                self.next_uri = None;
                self.previous_uri = None;
            }
            PaginationType::Tokens => self.next_page_token = None,
        }
        self.use_next_page = false;
        self.use_previous_page = false;
    }

    /// Records the paging links and token of a feed returned for this query.
    pub fn update_pagination<E: EntryType>(&mut self, feed: &Feed<E>) {
        match self.pagination_type {
            PaginationType::Indexed => {}
            PaginationType::Uris => {
                self.next_uri = feed.next_link().map(str::to_string);
                self.previous_uri = feed.previous_link().map(str::to_string);
            }
            PaginationType::Tokens => {
                self.next_page_token = feed.next_page_token().map(str::to_string);
            }
        }
    }

    /// Moves to the next page of results.
    pub fn next_page(&mut self) {
        match self.pagination_type {
            PaginationType::Indexed => {
                if self.start_index == 0 {
                    self.start_index += 1;
                }
                self.start_index += self.max_results;
            }
            PaginationType::Uris | PaginationType::Tokens => {
                self.use_next_page = true;
                self.use_previous_page = false;
            }
        }
        self.etag = None;
    }

    /// Moves to the previous page of results.
    ///
    /// Returns false, leaving the query unchanged, if there is no previous page.
    pub fn previous_page(&mut self) -> bool {
        let moved = match self.pagination_type {
            PaginationType::Indexed => {
                if self.start_index <= self.max_results {
                    false
                } else {
                    self.start_index -= self.max_results;
                    if self.start_index == 1 {
                        self.start_index = 0;
                    }
                    true
                }
            }
            PaginationType::Uris => {
                if self.previous_uri.is_some() {
                    self.use_next_page = false;
                    self.use_previous_page = true;
                    true
                } else {
                    false
                }
            }
            PaginationType::Tokens => false,
        };
        if moved {
            self.etag = None;
        }
        moved
    }

    /// Returns true once the last page has been passed.
    pub fn is_finished(&self) -> bool {
        match self.pagination_type {
            PaginationType::Indexed => false,
            PaginationType::Uris => self.use_next_page && self.next_uri.is_none(),
            PaginationType::Tokens => self.use_next_page && self.next_page_token.is_none(),
        }
    }

    fn page_uri(&self) -> Option<&str> {
        if self.pagination_type != PaginationType::Uris {
            return None;
        }
        if self.use_next_page {
            return self.next_uri.as_deref();
        }
        if self.use_previous_page {
            return self.previous_uri.as_deref();
        }
        None
    }

    fn append_standard_parameters(&self, builder: &mut QueryUriBuilder) {
        if let Some(ref categories) = self.categories {
            builder.append_categories(categories);
        }
        if let Some(ref q) = self.q {
            builder.append_param("q", q);
        }
        if let Some(ref author) = self.author {
            builder.append_param("author", author);
        }
        let timestamps = [
            ("updated-min", &self.updated_min),
            ("updated-max", &self.updated_max),
            ("published-min", &self.published_min),
            ("published-max", &self.published_max),
        ];
        for (name, value) in timestamps {
            if let Some(value) = value {
                builder.append_timestamp_param(name, value);
            }
        }
        if self.start_index > 0 {
            builder.append_raw_param("start-index", &self.start_index.to_string());
        }
        if self.is_strict {
            builder.append_raw_param("strict", "true");
        }
        if self.max_results > 0 {
            builder.append_raw_param("max-results", &self.max_results.to_string());
        }
        if self.pagination_type == PaginationType::Tokens && self.use_next_page {
            if let Some(token) = self.next_page_token.as_deref().filter(|t| !t.is_empty()) {
                builder.append_param("pageToken", token);
            }
        }
    }
}

/// A query that can be turned into a feed URI.
///
/// Service-specific queries embed a [`Query`], expose it through
/// [`query`](Self::query), and append their own parameters in
/// [`append_parameters`](Self::append_parameters). Their setters should call
/// [`Query::set_etag`] with `None` to keep the ETag-clearing rule.
pub trait QueryParameters: Send {
    /// The standard parameters.
    fn query(&self) -> &Query;

    /// Mutable access to the standard parameters.
    fn query_mut(&mut self) -> &mut Query;

    /// Appends service-specific parameters after the standard ones.
    fn append_parameters(&self, _builder: &mut QueryUriBuilder) {}

    /// Builds the URI to fetch for `feed_uri`.
    fn query_uri(&self, feed_uri: &str) -> String {
        let query = self.query();
        if let Some(uri) = query.page_uri() {
            return uri.to_string();
        }
        let mut builder = QueryUriBuilder::new(feed_uri);
        query.append_standard_parameters(&mut builder);
        self.append_parameters(&mut builder);
        builder.into_string()
    }
}

impl QueryParameters for Query {
    fn query(&self) -> &Query {
        self
    }

    fn query_mut(&mut self) -> &mut Query {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Entry;
    use crate::parsable::Parsable;
    use chrono::TimeZone;

    #[test]
    fn categories_go_in_the_path() {
        let mut query = Query::new(Some("foobar"));
        query.set_categories(Some("Fritz/Laurie"));
        insta::assert_snapshot!(query.query_uri("http://example.com"), @"http://example.com/-/Fritz/Laurie?q=foobar");

        query.set_categories(Some("Fritz|Laurie"));
        insta::assert_snapshot!(query.query_uri("http://example.com"), @"http://example.com/-/Fritz%7CLaurie?q=foobar");

        query.set_categories(Some("A|-{urn:google.com}B/-C"));
        insta::assert_snapshot!(
            query.query_uri("http://example.com/gdata_test"),
            @"http://example.com/gdata_test/-/A%7C-%7Burn%3Agoogle.com%7DB/-C?q=foobar"
        );
    }

    #[test]
    fn unicode_is_encoded_once_per_byte() {
        let mut query = Query::new(Some("fööbar‽"));
        insta::assert_snapshot!(query.query_uri("http://example.com"), @"http://example.com?q=f%C3%B6%C3%B6bar%E2%80%BD");

        query.set_categories(Some("Ümlauts|¿Questions‽"));
        insta::assert_snapshot!(
            query.query_uri("http://example.com"),
            @"http://example.com/-/%C3%9Cmlauts%7C%C2%BFQuestions%E2%80%BD?q=f%C3%B6%C3%B6bar%E2%80%BD"
        );

        query.set_author(Some("Lørd Brïan Bleßêd"));
        insta::assert_snapshot!(
            query.query_uri("http://example.com"),
            @"http://example.com/-/%C3%9Cmlauts%7C%C2%BFQuestions%E2%80%BD?q=f%C3%B6%C3%B6bar%E2%80%BD&author=L%C3%B8rd%20Br%C3%AFan%20Ble%C3%9F%C3%AAd"
        );
    }

    #[test]
    fn parameters_in_order() {
        let mut query = Query::with_limits(Some("baz"), 5, 10);
        query.set_updated_min(Some(Utc.with_ymd_and_hms(2013, 7, 8, 10, 41, 54).unwrap()));
        query.set_published_max(Some(Utc.with_ymd_and_hms(2014, 1, 2, 3, 4, 5).unwrap()));
        query.set_is_strict(true);
        insta::assert_snapshot!(
            query.query_uri("http://example.com"),
            @"http://example.com?q=baz&updated-min=2013-07-08T10:41:54Z&published-max=2014-01-02T03:04:05Z&start-index=5&strict=true&max-results=10"
        );
    }

    #[test]
    fn existing_parameters_continue_with_ampersand() {
        let mut query = Query::new(Some("bar"));
        query.set_categories(Some("cat"));
        assert_eq!(
            query.query_uri("http://example.com/feed?alt=atom"),
            "http://example.com/feed/-/cat?alt=atom&q=bar"
        );
    }

    #[test]
    fn every_setter_clears_the_etag() {
        let now = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let setters: Vec<Box<dyn Fn(&mut Query)>> = vec![
            Box::new(|q: &mut Query| q.set_q(Some("q"))),
            Box::new(|q: &mut Query| q.set_categories(Some("c"))),
            Box::new(|q: &mut Query| q.set_author(Some("a"))),
            Box::new(move |q: &mut Query| q.set_updated_min(Some(now))),
            Box::new(move |q: &mut Query| q.set_updated_max(Some(now))),
            Box::new(move |q: &mut Query| q.set_published_min(Some(now))),
            Box::new(move |q: &mut Query| q.set_published_max(Some(now))),
            Box::new(|q: &mut Query| q.set_start_index(3)),
            Box::new(|q: &mut Query| q.set_max_results(7)),
            Box::new(|q: &mut Query| q.set_is_strict(true)),
            Box::new(|q: &mut Query| q.next_page()),
            Box::new(|q: &mut Query| q.set_pagination_type(PaginationType::Tokens)),
        ];
        for setter in setters {
            let mut query = Query::new(None);
            query.set_etag(Some("W/\"etag\""));
            setter(&mut query);
            assert_eq!(query.etag(), None);
        }

        let mut query = Query::with_limits(None, 11, 10);
        query.set_etag(Some("W/\"etag\""));
        assert!(query.previous_page());
        assert_eq!(query.etag(), None);
    }

    #[test]
    fn indexed_paging() {
        let mut query = Query::with_limits(None, 0, 10);
        query.next_page();
        assert_eq!(query.start_index(), 11);
        query.next_page();
        assert_eq!(query.start_index(), 21);
        assert!(query.previous_page());
        assert_eq!(query.start_index(), 11);
        assert!(query.previous_page());
        assert_eq!(query.start_index(), 0);
        assert!(!query.previous_page());
        assert!(!query.is_finished());
    }

    #[test]
    fn uri_paging_follows_feed_links() {
        let feed: Feed<Entry> = Feed::from_xml(
            "<feed xmlns='http://www.w3.org/2005/Atom'><id>f</id><updated>2009-02-03T14:58:13Z</updated><link rel='next' href='http://example.com/page2'/><link rel='previous' href='http://example.com/page0'/></feed>",
        )
        .unwrap();
        let mut query = Query::new(Some("x"));
        query.set_pagination_type(PaginationType::Uris);
        query.update_pagination(&feed);
        assert_eq!(query.query_uri("http://example.com/feed"), "http://example.com/feed?q=x");
        query.next_page();
        assert_eq!(query.query_uri("http://example.com/feed"), "http://example.com/page2");
        assert!(query.previous_page());
        assert_eq!(query.query_uri("http://example.com/feed"), "http://example.com/page0");

        let last: Feed<Entry> = Feed::from_xml(
            "<feed xmlns='http://www.w3.org/2005/Atom'><id>f</id><updated>2009-02-03T14:58:13Z</updated></feed>",
        )
        .unwrap();
        query.next_page();
        query.update_pagination(&last);
        assert!(query.is_finished());
    }

    #[test]
    fn token_paging_sends_page_token() {
        let mut feed: Feed<Entry> = Feed::new("f", None, Utc::now());
        feed.set_next_page_token(Some("tok/1".into()));
        let mut query = Query::new(None);
        query.set_pagination_type(PaginationType::Tokens);
        query.update_pagination(&feed);
        assert_eq!(query.query_uri("https://example.com/feed"), "https://example.com/feed");
        query.next_page();
        assert_eq!(
            query.query_uri("https://example.com/feed"),
            "https://example.com/feed?pageToken=tok%2F1"
        );
        assert!(!query.previous_page());
    }

    struct LocationQuery {
        base: Query,
        location: Option<String>,
    }

    impl QueryParameters for LocationQuery {
        fn query(&self) -> &Query {
            &self.base
        }

        fn query_mut(&mut self) -> &mut Query {
            &mut self.base
        }

        fn append_parameters(&self, builder: &mut QueryUriBuilder) {
            if let Some(ref location) = self.location {
                builder.append_param("location", location);
            }
        }
    }

    #[test]
    fn subclass_parameters_follow_standard_ones() {
        let query = LocationQuery {
            base: Query::with_limits(Some("cats"), 0, 5),
            location: Some("Paris, France".into()),
        };
        assert_eq!(
            query.query_uri("https://example.com/feed"),
            "https://example.com/feed?q=cats&max-results=5&location=Paris%2C%20France"
        );
    }
}
