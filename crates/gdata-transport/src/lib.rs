//! HTTP contract, authorizers, and seekable/resumable transport streams

pub mod authorizer;
pub mod client;
pub mod config;
pub mod context;
pub mod domain;
pub mod download;
pub mod http;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
mod pipe;
pub mod upload;

pub use authorizer::{Authorizer, DummyAuthorizer};
pub use client::ReqwestTransport;
pub use config::{TransportConfig, TransportLogLevel, timeout_from_secs};
pub use context::StreamContext;
pub use domain::AuthorizationDomain;
pub use download::DownloadStream;
pub use http::{
    ErrorResponseParser, HttpRequest, HttpResponse, OperationType, RequestBody,
    StatusErrorParser, Transport, classify_status, error_from_response,
};
#[cfg(any(test, feature = "mock"))]
pub use mock::{MockResponse, MockTransport, RecordedRequest};
pub use upload::{UploadStream, UploadTarget};
