//! Service dispatch, ETag handling, and batch operations for GData feeds

pub mod batch;
pub mod errors;
pub mod service;

pub use batch::{BatchCallback, BatchOperation, BatchOutcome};
pub use errors::{ErrorDetail, GDataErrorParser, parse_error_document};
pub use service::{DEFAULT_API_VERSION, Service, ServiceBuilder};
