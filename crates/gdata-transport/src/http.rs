//! The HTTP contract between services, authorizers and the network.
//!
//! Requests and responses are plain data; a [`Transport`] moves them over
//! the wire. Response bodies are readers so that downloads can stream.

use std::fmt;
use std::io::Read;

use gdata_core::{Cancellable, Error, Result};
use reqwest::StatusCode;
use url::Url;

pub use reqwest::Method;
pub use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};

/// Header names the GData protocol adds on top of the standard set.
pub mod headers {
    use reqwest::header::HeaderName;

    pub const GDATA_VERSION: HeaderName = HeaderName::from_static("gdata-version");
    pub const SLUG: HeaderName = HeaderName::from_static("slug");
    pub const X_UPLOAD_CONTENT_TYPE: HeaderName = HeaderName::from_static("x-upload-content-type");
    pub const X_UPLOAD_CONTENT_LENGTH: HeaderName =
        HeaderName::from_static("x-upload-content-length");
}

/// Content type of Atom documents sent by the library.
pub const ATOM_CONTENT_TYPE: &str = "application/atom+xml";

/// Content type of Atom documents with an explicit charset.
pub const ATOM_CONTENT_TYPE_UTF8: &str = "application/atom+xml; charset=UTF-8";

/// The body of an outgoing request.
pub enum RequestBody {
    Empty,
    Bytes(Vec<u8>),
    /// A body produced while the request is in flight, with its length if known.
    Stream {
        reader: Box<dyn Read + Send>,
        length: Option<u64>,
    },
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            Self::Stream { length, .. } => write!(f, "Stream(length: {length:?})"),
        }
    }
}

/// An outgoing HTTP request.
#[derive(Debug)]
pub struct HttpRequest {
    pub method: Method,
    pub uri: Url,
    pub headers: HeaderMap,
    pub body: RequestBody,
}

impl HttpRequest {
    /// Creates a request with no headers and no body.
    pub fn new(method: Method, uri: Url) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
        }
    }

    /// Creates a request from a URI string.
    ///
    /// # Errors
    ///
    /// Returns `invalid-argument` if `uri` is not an absolute URI.
    pub fn parse(method: Method, uri: &str) -> Result<Self> {
        let parsed = Url::parse(uri).map_err(|e| {
            Error::invalid_argument(format!("Invalid URI \u{201c}{uri}\u{201d}: {e}"))
                .with_source(e)
        })?;
        Ok(Self::new(method, parsed))
    }

    /// Sets a header, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns `invalid-argument` if `value` is not a valid header value.
    pub fn set_header(&mut self, name: HeaderName, value: &str) -> Result<()> {
        let value = HeaderValue::from_str(value).map_err(|e| {
            Error::invalid_argument(format!("Invalid value for header {name}")).with_source(e)
        })?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// Returns a header value, if present and valid UTF-8.
    pub fn header(&self, name: &HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Sets an in-memory body along with its content type.
    ///
    /// # Errors
    ///
    /// Returns `invalid-argument` if `content_type` is not a valid header value.
    pub fn set_body(&mut self, content_type: &str, body: impl Into<Vec<u8>>) -> Result<()> {
        self.set_header(header::CONTENT_TYPE, content_type)?;
        self.body = RequestBody::Bytes(body.into());
        Ok(())
    }

    /// Returns the in-memory body, if the request has one.
    pub fn body_bytes(&self) -> Option<&[u8]> {
        match &self.body {
            RequestBody::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn is_https(&self) -> bool {
        self.uri.scheme() == "https"
    }
}

/// A received HTTP response whose body has not been read yet.
pub struct HttpResponse {
    pub status: u16,
    pub reason: String,
    pub headers: HeaderMap,
    body: Box<dyn Read + Send>,
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("reason", &self.reason)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl HttpResponse {
    /// Creates a response with the canonical reason phrase for `status`.
    pub fn new(status: u16, headers: HeaderMap, body: impl Read + Send + 'static) -> Self {
        let reason = StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or_default()
            .to_string();
        Self {
            status,
            reason,
            headers,
            body: Box::new(body),
        }
    }

    /// Replaces the reason phrase.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Returns a header value, if present and valid UTF-8.
    pub fn header(&self, name: &HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The `Content-Length` header, if present and numeric.
    pub fn content_length(&self) -> Option<u64> {
        self.header(&header::CONTENT_LENGTH)
            .and_then(|v| v.trim().parse().ok())
    }

    /// The `Content-Type` header.
    pub fn content_type(&self) -> Option<&str> {
        self.header(&header::CONTENT_TYPE)
    }

    /// Reads the whole body as text, replacing invalid UTF-8.
    ///
    /// # Errors
    ///
    /// Returns the error that interrupted the body, typically `network-error`
    /// or `cancelled`.
    pub fn read_text(&mut self) -> Result<String> {
        let mut bytes = Vec::new();
        self.body.read_to_end(&mut bytes)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Takes the body reader.
    pub fn into_body(self) -> Box<dyn Read + Send> {
        self.body
    }
}

/// Sends requests over the network.
///
/// Implementations must be usable from several threads at once; a single
/// transport is shared by every service and authorizer of an application.
pub trait Transport: Send + Sync {
    /// Sends `request` and returns once the response headers have arrived.
    ///
    /// Any status is returned as a response; only failures to obtain one
    /// (connection errors, timeouts, cancellation) are errors.
    fn send(&self, request: HttpRequest, cancellable: &Cancellable) -> Result<HttpResponse>;
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn send(&self, request: HttpRequest, cancellable: &Cancellable) -> Result<HttpResponse> {
        (**self).send(request, cancellable)
    }
}

/// The kind of operation a failed response belonged to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationType {
    Authentication,
    Query,
    Insertion,
    Update,
    Deletion,
    Download,
    Upload,
    Batch,
}

impl OperationType {
    fn description(&self) -> &'static str {
        match self {
            Self::Authentication => "authenticating",
            Self::Query => "querying",
            Self::Insertion => "inserting an entry",
            Self::Update => "updating an entry",
            Self::Deletion => "deleting an entry",
            Self::Download => "downloading",
            Self::Upload => "uploading",
            Self::Batch => "running a batch operation",
        }
    }
}

/// Turns an error response into an [`Error`].
///
/// Services with structured error bodies supply their own parser and fall
/// back to [`classify_status`] for anything they do not recognise.
pub trait ErrorResponseParser: Send + Sync {
    fn parse_error_response(
        &self,
        operation: OperationType,
        status: u16,
        reason: &str,
        body: &str,
    ) -> Error;
}

/// The default parser: classification by status code alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusErrorParser;

impl ErrorResponseParser for StatusErrorParser {
    fn parse_error_response(
        &self,
        operation: OperationType,
        status: u16,
        reason: &str,
        body: &str,
    ) -> Error {
        classify_status(operation, status, reason, body)
    }
}

/// Maps an HTTP status to an error kind.
///
/// The server's body is preferred in the message; the reason phrase is used
/// when the body is empty.
pub fn classify_status(operation: OperationType, status: u16, reason: &str, body: &str) -> Error {
    let detail = if body.trim().is_empty() { reason } else { body };
    let err = match status {
        400 => Error::bad_query(format!(
            "Invalid request URI or header, or unsupported nonstandard parameter: {detail}"
        )),
        401 => Error::authentication_required(format!("Authentication required: {detail}")),
        403 => Error::forbidden(format!("Access forbidden: {detail}")),
        404 => Error::not_found(format!("The requested resource was not found: {detail}")),
        409 | 412 => Error::conflict(format!(
            "The entry has been modified since it was downloaded: {detail}"
        )),
        _ => Error::protocol(format!(
            "Error code {status} when {}: {detail}",
            operation.description()
        )),
    };
    err.with_status(status)
}

/// Reads the body of a failed response and classifies it.
pub fn error_from_response(
    parser: &dyn ErrorResponseParser,
    operation: OperationType,
    mut response: HttpResponse,
) -> Error {
    let body = match response.read_text() {
        Ok(body) => body,
        Err(err) if err.is_cancelled() => return err,
        Err(_) => String::new(),
    };
    parser.parse_error_response(operation, response.status, &response.reason, &body)
}
