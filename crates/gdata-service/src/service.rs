//! Dispatch of queries and entry operations to a GData service.
//!
//! A [`Service`] adds the protocol headers to every request, signs it with
//! its authorizer, and turns responses into feeds, entries, or errors. A
//! request answered with 401 is retried once after the authorizer refreshes
//! its credentials.
//!
//! Every operation blocks the calling thread. The `*_async` variants run the
//! same call on tokio's blocking pool and require a tokio runtime.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use gdata_core::{
    BoxFuture, Cancellable, EntryType, Error, Feed, Parsable, Query, QueryParameters, Result,
    atom::rel,
};
use gdata_transport::http::{
    ATOM_CONTENT_TYPE, HeaderName, HeaderValue, Method, header, headers,
};
use gdata_transport::{
    AuthorizationDomain, Authorizer, DownloadStream, ErrorResponseParser, HttpRequest,
    HttpResponse, OperationType, ReqwestTransport, StreamContext, Transport, TransportConfig,
    UploadStream, UploadTarget,
};
use tracing::{debug, info, warn};
use url::Url;

use crate::errors::GDataErrorParser;

/// The protocol version sent as `GData-Version`.
pub const DEFAULT_API_VERSION: &str = "2";

/// Runs a blocking call on tokio's blocking pool.
pub(crate) fn run_blocking<T, F>(call: F) -> BoxFuture<'static, Result<T>>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    Box::pin(async move {
        match tokio::task::spawn_blocking(call).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(Error::cancelled()),
        }
    })
}

/// One request of a service call, kept so it can be rebuilt for the retry
/// after a refresh.
struct Call<'a> {
    method: Method,
    uri: &'a str,
    precondition: Option<(HeaderName, &'a str)>,
    body: Option<String>,
}

impl<'a> Call<'a> {
    fn new(method: Method, uri: &'a str) -> Self {
        Self {
            method,
            uri,
            precondition: None,
            body: None,
        }
    }

    fn precondition(mut self, name: HeaderName, etag: Option<&'a str>) -> Self {
        self.precondition = etag.map(|etag| (name, etag));
        self
    }

    fn body(mut self, xml: String) -> Self {
        self.body = Some(xml);
        self
    }

    fn request(&self) -> Result<HttpRequest> {
        let mut request = HttpRequest::parse(self.method.clone(), self.uri)?;
        if let Some((ref name, etag)) = self.precondition {
            request.set_header(name.clone(), etag)?;
        }
        if let Some(ref body) = self.body {
            request.set_body(ATOM_CONTENT_TYPE, body.clone())?;
        }
        Ok(request)
    }
}

/// A connection to one GData service.
///
/// Cloning is cheap; clones share the transport and the authorizer.
#[derive(Clone)]
pub struct Service {
    context: StreamContext,
    authorizer: Option<Arc<dyn Authorizer>>,
    error_parser: Arc<dyn ErrorResponseParser>,
    locale: Option<String>,
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("context", &self.context)
            .field("locale", &self.locale)
            .finish_non_exhaustive()
    }
}

impl Service {
    pub fn builder() -> ServiceBuilder {
        ServiceBuilder::default()
    }

    pub fn authorizer(&self) -> Option<&Arc<dyn Authorizer>> {
        self.authorizer.as_ref()
    }

    pub fn locale(&self) -> Option<&str> {
        self.locale.as_deref()
    }

    pub fn error_parser(&self) -> &Arc<dyn ErrorResponseParser> {
        &self.error_parser
    }

    /// Returns true if the authorizer can sign requests for `domain`.
    pub fn is_authorized(&self, domain: &AuthorizationDomain) -> bool {
        self.authorizer
            .as_ref()
            .is_some_and(|authorizer| authorizer.is_authorized_for_domain(domain))
    }

    /// The context streams use to make requests on behalf of this service.
    pub fn stream_context(&self, domain: Option<&AuthorizationDomain>) -> StreamContext {
        self.context.clone().with_domain(domain.cloned())
    }

    /// Turns a failed response into an error with this service's parser.
    pub(crate) fn error(&self, operation: OperationType, response: HttpResponse) -> Error {
        self.context.error(operation, response)
    }

    /// Sends `call`, refreshing and retrying once if the server answers 401.
    ///
    /// If the retry is refused again the first response is returned.
    fn execute(
        &self,
        domain: Option<&AuthorizationDomain>,
        call: &Call<'_>,
        cancellable: &Cancellable,
    ) -> Result<HttpResponse> {
        cancellable.check()?;
        let context = self.stream_context(domain);
        let response = context.send(call.request()?, cancellable)?;
        debug!(method = %call.method, uri = call.uri, status = response.status, "Service request");
        if response.status != 401 {
            return Ok(response);
        }
        let Some(ref authorizer) = self.authorizer else {
            return Ok(response);
        };

        info!(uri = call.uri, "Authentication required; refreshing authorization");
        match authorizer.refresh_authorization(cancellable) {
            Ok(true) => {}
            Ok(false) => return Ok(response),
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                warn!("Refreshing authorization failed: {}", e);
                return Ok(response);
            }
        }
        let retried = context.send(call.request()?, cancellable)?;
        debug!(uri = call.uri, status = retried.status, "Retried after refresh");
        if retried.status == 401 {
            return Ok(response);
        }
        Ok(retried)
    }

    /// Fetches a feed.
    ///
    /// With a query, its parameters are applied to `feed_uri` and its ETag is
    /// sent as `If-None-Match`; `Ok(None)` means the feed has not changed
    /// since that ETag. The query's paging state and ETag are updated from
    /// the returned feed. A query that has run past its last page returns an
    /// empty feed without a request.
    ///
    /// # Errors
    ///
    /// Returns the classified error for any status other than 200 or 304,
    /// a protocol error if the feed cannot be parsed, or `cancelled`.
    pub fn query<E: EntryType>(
        &self,
        domain: Option<&AuthorizationDomain>,
        feed_uri: &str,
        mut query: Option<&mut dyn QueryParameters>,
        cancellable: &Cancellable,
    ) -> Result<Option<Feed<E>>> {
        if query.as_deref().is_some_and(|q| q.query().is_finished()) {
            debug!(feed_uri, "Query has no more pages");
            return Ok(Some(Feed::new(
                "feed1",
                Some("Empty feed".to_string()),
                Utc::now(),
            )));
        }

        let uri = match query.as_deref() {
            Some(q) => q.query_uri(feed_uri),
            None => feed_uri.to_string(),
        };
        let etag = query
            .as_deref()
            .and_then(|q| q.query().etag())
            .map(str::to_string);
        let call =
            Call::new(Method::GET, &uri).precondition(header::IF_NONE_MATCH, etag.as_deref());
        let mut response = self.execute(domain, &call, cancellable)?;

        if response.status == 304 {
            debug!(uri = %uri, "Feed not modified");
            return Ok(None);
        }
        if response.status != 200 {
            return Err(self.error(OperationType::Query, response));
        }

        let header_etag = response.header(&header::ETAG).map(str::to_string);
        let mut feed = Feed::<E>::from_xml(&response.read_text()?)?;
        if feed.etag().is_none() {
            feed.set_etag(header_etag);
        }
        if let Some(q) = query.as_deref_mut() {
            let q = q.query_mut();
            q.update_pagination(&feed);
            if let Some(etag) = feed.etag() {
                q.set_etag(Some(etag));
            }
        }
        debug!(uri = %uri, entries = feed.entries().len(), "Parsed feed");
        Ok(Some(feed))
    }

    /// Fetches the entry with the given id from the URI its type builds.
    ///
    /// # Errors
    ///
    /// As for [`query`](Self::query); there is no not-modified outcome.
    pub fn query_single<E: EntryType>(
        &self,
        domain: Option<&AuthorizationDomain>,
        id: &str,
        cancellable: &Cancellable,
    ) -> Result<E> {
        let uri = E::entry_uri(id);
        let mut response = self.execute(domain, &Call::new(Method::GET, &uri), cancellable)?;
        if response.status != 200 {
            return Err(self.error(OperationType::Query, response));
        }
        parse_entry(&mut response)
    }

    /// Inserts `entry` into the feed at `upload_uri` and returns the
    /// server's copy, with its id, links and ETag.
    ///
    /// # Errors
    ///
    /// Returns entry-already-inserted if `entry` has an id, or the
    /// classified error for any status other than 201 or 200.
    pub fn insert<E: EntryType>(
        &self,
        domain: Option<&AuthorizationDomain>,
        upload_uri: &str,
        entry: &E,
        cancellable: &Cancellable,
    ) -> Result<E> {
        if entry.entry().is_inserted() {
            return Err(Error::entry_already_inserted());
        }
        let call = Call::new(Method::POST, upload_uri).body(entry.to_xml());
        let mut response = self.execute(domain, &call, cancellable)?;
        if response.status != 201 && response.status != 200 {
            return Err(self.error(OperationType::Insertion, response));
        }
        parse_entry(&mut response)
    }

    /// Replaces the server's copy of `entry` and returns the updated copy.
    ///
    /// The entry's ETag, if any, is sent as `If-Match`, so a stale entry
    /// fails with `conflict`.
    ///
    /// # Errors
    ///
    /// Returns invalid-argument if `entry` has no edit link, or the
    /// classified error for any status other than 200.
    pub fn update<E: EntryType>(
        &self,
        domain: Option<&AuthorizationDomain>,
        entry: &E,
        cancellable: &Cancellable,
    ) -> Result<E> {
        let uri = edit_uri(entry)?;
        let call = Call::new(Method::PUT, &uri)
            .precondition(header::IF_MATCH, entry.entry().etag())
            .body(entry.to_xml());
        let mut response = self.execute(domain, &call, cancellable)?;
        if response.status != 200 {
            return Err(self.error(OperationType::Update, response));
        }
        parse_entry(&mut response)
    }

    /// Deletes `entry` on the server, sending its ETag as `If-Match`.
    ///
    /// The edit link is always contacted over HTTPS.
    ///
    /// # Errors
    ///
    /// Returns invalid-argument if `entry` has no edit link, or the
    /// classified error for any status other than 200 or 204.
    pub fn delete<E: EntryType>(
        &self,
        domain: Option<&AuthorizationDomain>,
        entry: &E,
        cancellable: &Cancellable,
    ) -> Result<()> {
        let uri = force_https(&edit_uri(entry)?)?;
        let call = Call::new(Method::DELETE, &uri)
            .precondition(header::IF_MATCH, entry.entry().etag());
        let response = self.execute(domain, &call, cancellable)?;
        if response.status != 200 && response.status != 204 {
            return Err(self.error(OperationType::Deletion, response));
        }
        Ok(())
    }

    /// Opens a seekable stream over the resource at `uri`.
    ///
    /// # Errors
    ///
    /// Returns invalid-argument if `uri` is not an absolute URI.
    pub fn download_stream(
        &self,
        domain: Option<&AuthorizationDomain>,
        uri: &str,
        cancellable: Cancellable,
    ) -> Result<DownloadStream> {
        DownloadStream::new(self.stream_context(domain), uri, cancellable)
    }

    /// Starts a single-request upload, optionally with metadata.
    ///
    /// # Errors
    ///
    /// See [`UploadStream::new`].
    pub fn upload_stream<E: EntryType>(
        &self,
        domain: Option<&AuthorizationDomain>,
        target: UploadTarget,
        entry: Option<&E>,
        cancellable: &Cancellable,
    ) -> Result<UploadStream<E>> {
        UploadStream::new(self.stream_context(domain), target, entry, cancellable)
    }

    /// Starts a resumable upload of exactly `content_length` bytes.
    ///
    /// # Errors
    ///
    /// See [`UploadStream::resumable`].
    pub fn resumable_upload_stream<E: EntryType>(
        &self,
        domain: Option<&AuthorizationDomain>,
        target: UploadTarget,
        entry: Option<&E>,
        content_length: u64,
        cancellable: &Cancellable,
    ) -> Result<UploadStream<E>> {
        UploadStream::resumable(
            self.stream_context(domain),
            target,
            entry,
            content_length,
            cancellable,
        )
    }

    /// Runs [`query`](Self::query) on the blocking pool.
    ///
    /// The query is moved in and handed back with its paging state updated.
    pub fn query_async<E, Q>(
        &self,
        domain: Option<AuthorizationDomain>,
        feed_uri: impl Into<String>,
        mut query: Q,
        cancellable: Cancellable,
    ) -> BoxFuture<'static, Result<(Option<Feed<E>>, Q)>>
    where
        E: EntryType,
        Q: QueryParameters + 'static,
    {
        let service = self.clone();
        let feed_uri = feed_uri.into();
        run_blocking(move || {
            let feed = service.query(domain.as_ref(), &feed_uri, Some(&mut query), &cancellable)?;
            Ok((feed, query))
        })
    }

    /// Runs [`query`](Self::query) without parameters on the blocking pool.
    pub fn query_all_async<E: EntryType>(
        &self,
        domain: Option<AuthorizationDomain>,
        feed_uri: impl Into<String>,
        cancellable: Cancellable,
    ) -> BoxFuture<'static, Result<Option<Feed<E>>>> {
        let future: BoxFuture<'static, Result<(Option<Feed<E>>, Query)>> =
            self.query_async(domain, feed_uri, Query::default(), cancellable);
        Box::pin(async move { future.await.map(|(feed, _)| feed) })
    }

    pub fn query_single_async<E: EntryType>(
        &self,
        domain: Option<AuthorizationDomain>,
        id: impl Into<String>,
        cancellable: Cancellable,
    ) -> BoxFuture<'static, Result<E>> {
        let service = self.clone();
        let id = id.into();
        run_blocking(move || service.query_single(domain.as_ref(), &id, &cancellable))
    }

    pub fn insert_async<E: EntryType>(
        &self,
        domain: Option<AuthorizationDomain>,
        upload_uri: impl Into<String>,
        entry: E,
        cancellable: Cancellable,
    ) -> BoxFuture<'static, Result<E>> {
        let service = self.clone();
        let upload_uri = upload_uri.into();
        run_blocking(move || service.insert(domain.as_ref(), &upload_uri, &entry, &cancellable))
    }

    pub fn update_async<E: EntryType>(
        &self,
        domain: Option<AuthorizationDomain>,
        entry: E,
        cancellable: Cancellable,
    ) -> BoxFuture<'static, Result<E>> {
        let service = self.clone();
        run_blocking(move || service.update(domain.as_ref(), &entry, &cancellable))
    }

    pub fn delete_async<E: EntryType>(
        &self,
        domain: Option<AuthorizationDomain>,
        entry: E,
        cancellable: Cancellable,
    ) -> BoxFuture<'static, Result<()>> {
        let service = self.clone();
        run_blocking(move || service.delete(domain.as_ref(), &entry, &cancellable))
    }
}

/// Parses a response body as an entry, taking the ETag from the headers
/// when the body has none.
fn parse_entry<E: EntryType>(response: &mut HttpResponse) -> Result<E> {
    let header_etag = response.header(&header::ETAG).map(str::to_string);
    let mut entry = E::from_xml(&response.read_text()?)?;
    if entry.entry().etag().is_none() && header_etag.is_some() {
        entry.entry_mut().set_etag(header_etag);
    }
    Ok(entry)
}

fn edit_uri<E: EntryType>(entry: &E) -> Result<String> {
    entry
        .entry()
        .look_up_link(rel::EDIT)
        .map(|link| link.uri().to_string())
        .ok_or_else(|| Error::invalid_argument("The entry has no edit link"))
}

fn force_https(uri: &str) -> Result<String> {
    let mut parsed = Url::parse(uri).map_err(|e| {
        Error::invalid_argument(format!("Invalid edit URI \u{201c}{uri}\u{201d}: {e}")).with_source(e)
    })?;
    if parsed.scheme() == "http" && parsed.set_scheme("https").is_err() {
        return Err(Error::invalid_argument(format!(
            "Cannot use HTTPS for edit URI \u{201c}{uri}\u{201d}"
        )));
    }
    Ok(parsed.into())
}

/// Builds a [`Service`].
pub struct ServiceBuilder {
    transport: Option<Arc<dyn Transport>>,
    authorizer: Option<Arc<dyn Authorizer>>,
    config: TransportConfig,
    locale: Option<String>,
    api_version: String,
    error_parser: Arc<dyn ErrorResponseParser>,
}

impl Default for ServiceBuilder {
    fn default() -> Self {
        Self {
            transport: None,
            authorizer: None,
            config: TransportConfig::from_env(),
            locale: None,
            api_version: DEFAULT_API_VERSION.to_string(),
            error_parser: Arc::new(GDataErrorParser),
        }
    }
}

impl fmt::Debug for ServiceBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceBuilder")
            .field("authorized", &self.authorizer.is_some())
            .field("config", &self.config)
            .field("locale", &self.locale)
            .field("api_version", &self.api_version)
            .finish_non_exhaustive()
    }
}

impl ServiceBuilder {
    /// Sends requests through `transport` instead of a new client.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    #[must_use]
    pub fn authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = Some(authorizer);
        self
    }

    /// Configuration of the client created when no transport is given.
    #[must_use]
    pub fn config(mut self, config: TransportConfig) -> Self {
        self.config = config;
        self
    }

    /// Sent verbatim as `Accept-Language`, such as `en_GB`.
    #[must_use]
    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    #[must_use]
    pub fn api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    #[must_use]
    pub fn error_parser(mut self, parser: Arc<dyn ErrorResponseParser>) -> Self {
        self.error_parser = parser;
        self
    }

    /// # Errors
    ///
    /// Returns invalid-argument if the locale or API version is not a valid
    /// header value, or a network error if the HTTP client cannot be created.
    pub fn build(self) -> Result<Service> {
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::with_config(self.config)?),
        };
        let mut context = StreamContext::new(transport)
            .with_authorizer(self.authorizer.clone())
            .with_error_parser(self.error_parser.clone())
            .with_header(headers::GDATA_VERSION, header_value(&self.api_version)?);
        if let Some(ref locale) = self.locale {
            context = context.with_header(header::ACCEPT_LANGUAGE, header_value(locale)?);
        }
        Ok(Service {
            context,
            authorizer: self.authorizer,
            error_parser: self.error_parser,
            locale: self.locale,
        })
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| {
        Error::invalid_argument(format!("Invalid header value \u{201c}{value}\u{201d}")).with_source(e)
    })
}
