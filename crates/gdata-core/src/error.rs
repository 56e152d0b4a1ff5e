//! Error types shared by every GData crate.
//!
//! Errors are classified by [`ErrorKind`]; the free-form message carries the
//! server's explanation where one is available. XML faults additionally carry
//! a [`ParseFault`] naming the offending element and its byte offset.

use std::fmt;
use thiserror::Error;

/// The category of a GData error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// TCP/TLS failure, DNS resolution, or timeout.
    NetworkError,
    /// Malformed XML/JSON, missing required fields, or an unexpected status.
    ProtocolError,
    /// The server answered 401 on an authorized endpoint.
    AuthenticationRequired,
    /// The server answered 403, or the OAuth grant was refused.
    Forbidden,
    /// The server answered 404.
    NotFound,
    /// The entry was modified since it was downloaded (409 or 412).
    Conflict,
    /// The server rejected the query parameters (400).
    BadQuery,
    /// The caller cancelled the operation.
    Cancelled,
    /// The entry already carries a server id and cannot be inserted again.
    EntryAlreadyInserted,
    /// The caller passed an argument the operation cannot act on.
    InvalidArgument,
}

impl ErrorKind {
    /// Returns true if this error is transient and the operation may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NetworkError)
    }

    /// Returns the kebab-case name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NetworkError => "network-error",
            Self::ProtocolError => "protocol-error",
            Self::AuthenticationRequired => "authentication-required",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not-found",
            Self::Conflict => "conflict",
            Self::BadQuery => "bad-query",
            Self::Cancelled => "cancelled",
            Self::EntryAlreadyInserted => "entry-already-inserted",
            Self::InvalidArgument => "invalid-argument",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The kind of fault found while parsing XML.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParseErrorKind {
    /// The document is not well-formed.
    MalformedXml,
    /// An element was found where a different element or namespace was expected.
    WrongNamespace,
    /// A child that may appear at most once appeared again.
    DuplicateSingleton,
    /// A required child element is absent.
    RequiredChildMissing,
    /// A required attribute or text content is absent or empty.
    RequiredContentMissing,
    /// An attribute or text value could not be interpreted.
    InvalidAttributeValue,
}

impl ParseErrorKind {
    /// Returns the kebab-case name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MalformedXml => "malformed-xml",
            Self::WrongNamespace => "wrong-namespace",
            Self::DuplicateSingleton => "duplicate-singleton",
            Self::RequiredChildMissing => "required-child-missing",
            Self::RequiredContentMissing => "required-content-missing",
            Self::InvalidAttributeValue => "invalid-attribute-value",
        }
    }
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where and how an XML document failed to parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseFault {
    /// The kind of parse fault.
    pub kind: ParseErrorKind,
    /// The qualified name of the offending element, e.g. `atom:title`.
    pub element: String,
    /// Byte offset of the offending element in the source document.
    pub offset: Option<u64>,
}

/// An error raised by a GData operation.
#[derive(Debug, Error)]
pub struct Error {
    kind: ErrorKind,
    message: String,
    parse: Option<ParseFault>,
    status: Option<u16>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Creates a new error with the given kind and message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            parse: None,
            status: None,
            source: None,
        }
    }

    /// Creates a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NetworkError, message)
    }

    /// Creates a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProtocolError, message)
    }

    /// Creates an authentication-required error.
    pub fn authentication_required(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthenticationRequired, message)
    }

    /// Creates a forbidden error.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    /// Creates a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Creates a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    /// Creates a bad-query error.
    pub fn bad_query(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadQuery, message)
    }

    /// Creates a cancellation error.
    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "Operation was cancelled")
    }

    /// Creates an entry-already-inserted error.
    pub fn entry_already_inserted() -> Self {
        Self::new(
            ErrorKind::EntryAlreadyInserted,
            "The entry has already been inserted.",
        )
    }

    /// Creates an invalid-argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    /// Creates a protocol error describing an XML fault.
    pub fn parse(
        kind: ParseErrorKind,
        element: impl Into<String>,
        offset: Option<u64>,
        message: impl Into<String>,
    ) -> Self {
        let mut err = Self::protocol(message);
        err.parse = Some(ParseFault {
            kind,
            element: element.into(),
            offset,
        });
        err
    }

    /// Error for a child element that appeared more than once.
    pub fn duplicate_element(element: &str, parent: &str, offset: Option<u64>) -> Self {
        Self::parse(
            ParseErrorKind::DuplicateSingleton,
            element,
            offset,
            format!("A singleton element {element} was duplicated in a {parent} element."),
        )
    }

    /// Error for a required child element that is absent.
    pub fn required_element_missing(element: &str, parent: &str) -> Self {
        Self::parse(
            ParseErrorKind::RequiredChildMissing,
            element,
            None,
            format!("A required element {element} was not present in a {parent} element."),
        )
    }

    /// Error for an element whose required attribute or content is absent or empty.
    pub fn required_content_missing(element: &str, what: &str, offset: Option<u64>) -> Self {
        Self::parse(
            ParseErrorKind::RequiredContentMissing,
            element,
            offset,
            format!("A {element} element was missing required content ({what})."),
        )
    }

    /// Error for an attribute or text value that cannot be interpreted.
    pub fn invalid_value(element: &str, what: &str, value: &str, offset: Option<u64>) -> Self {
        Self::parse(
            ParseErrorKind::InvalidAttributeValue,
            element,
            offset,
            format!("The value of the {what} of a {element} element (\"{value}\") was invalid."),
        )
    }

    /// Attaches the HTTP status that caused this error.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Sets the source error for this error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Returns the error kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the parse fault details, if this is an XML error.
    pub fn parse_fault(&self) -> Option<&ParseFault> {
        self.parse.as_ref()
    }

    /// Returns the HTTP status that produced this error, if any.
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// Returns true if the caller cancelled the operation.
    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }

    /// Returns true if this error is transient and may be retried.
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(ref fault) = self.parse {
            write!(f, " ({} in <{}>", fault.kind, fault.element)?;
            if let Some(offset) = fault.offset {
                write!(f, " at byte {offset}")?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

/// I/O errors that wrap an [`Error`] (raised by the `Read`/`Write`
/// implementations of the transport streams) are unwrapped; anything else is
/// a network error.
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        if err.get_ref().is_some_and(|inner| inner.is::<Error>()) {
            return match err.into_inner().map(|inner| inner.downcast::<Error>()) {
                Some(Ok(inner)) => *inner,
                _ => Error::network("I/O error"),
            };
        }
        Error::network(err.to_string()).with_source(err)
    }
}

/// Converts an error into an [`std::io::Error`] for the `Read`/`Write`
/// implementations of the transport streams.
///
/// Cancellation maps to `Other` rather than `Interrupted`, which `std::io`
/// helpers would silently retry.
impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        let kind = match err.kind {
            ErrorKind::InvalidArgument => std::io::ErrorKind::InvalidInput,
            ErrorKind::NotFound => std::io::ErrorKind::NotFound,
            ErrorKind::Forbidden | ErrorKind::AuthenticationRequired => {
                std::io::ErrorKind::PermissionDenied
            }
            _ => std::io::ErrorKind::Other,
        };
        std::io::Error::new(kind, err)
    }
}

/// A specialized Result type for GData operations.
pub type Result<T> = std::result::Result<T, Error>;
