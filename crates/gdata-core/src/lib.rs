//! Core types: errors, cancellation, Atom parsing, feeds, entries, queries

pub mod atom;
pub mod cancel;
pub mod color;
pub mod comparable;
pub mod entry;
pub mod error;
pub mod feed;
pub mod parsable;
pub mod query;
pub mod tracing;
pub mod xml;

pub use atom::{Author, Category, Generator, Link};
pub use cancel::{Cancellable, HandlerId};
pub use color::Color;
pub use comparable::Comparable;
pub use entry::{BatchOperationType, BatchStatus, Content, Entry, EntryType};
pub use error::{Error, ErrorKind, ParseErrorKind, ParseFault, Result};
pub use feed::Feed;
pub use parsable::{Extensions, Handled, Parsable};
pub use query::{PaginationType, Query, QueryParameters, QueryUriBuilder};
pub use self::tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing};

/// A boxed future returned by the async mirrors of blocking operations.
pub type BoxFuture<'a, T> =
    std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;
