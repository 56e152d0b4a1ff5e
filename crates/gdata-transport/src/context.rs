//! What a transport stream needs to talk to a service on its own.

use std::fmt;
use std::sync::Arc;

use gdata_core::cancel::HandlerId;
use gdata_core::{Cancellable, Error, Result};

use crate::authorizer::Authorizer;
use crate::domain::AuthorizationDomain;
use crate::http::{
    ErrorResponseParser, HeaderMap, HeaderName, HeaderValue, HttpRequest, HttpResponse,
    OperationType, StatusErrorParser, Transport, error_from_response,
};

/// Transport, credentials and error parsing for requests made outside a
/// service call, such as the requests of download and upload streams.
#[derive(Clone)]
pub struct StreamContext {
    transport: Arc<dyn Transport>,
    authorizer: Option<Arc<dyn Authorizer>>,
    domain: Option<AuthorizationDomain>,
    error_parser: Arc<dyn ErrorResponseParser>,
    headers: HeaderMap,
}

impl fmt::Debug for StreamContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamContext")
            .field("authorized", &self.authorizer.is_some())
            .field("domain", &self.domain)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl StreamContext {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            authorizer: None,
            domain: None,
            error_parser: Arc::new(StatusErrorParser),
            headers: HeaderMap::new(),
        }
    }

    #[must_use]
    pub fn with_authorizer(mut self, authorizer: Option<Arc<dyn Authorizer>>) -> Self {
        self.authorizer = authorizer;
        self
    }

    #[must_use]
    pub fn with_domain(mut self, domain: Option<AuthorizationDomain>) -> Self {
        self.domain = domain;
        self
    }

    #[must_use]
    pub fn with_error_parser(mut self, parser: Arc<dyn ErrorResponseParser>) -> Self {
        self.error_parser = parser;
        self
    }

    /// Adds a header sent with every request.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn domain(&self) -> Option<&AuthorizationDomain> {
        self.domain.as_ref()
    }

    /// Adds the common headers and signs `request`.
    pub fn prepare(&self, request: &mut HttpRequest) {
        for (name, value) in &self.headers {
            request.headers.insert(name.clone(), value.clone());
        }
        if let Some(ref authorizer) = self.authorizer {
            authorizer.process_request(self.domain.as_ref(), request);
        }
    }

    /// Prepares and sends `request`.
    pub fn send(&self, mut request: HttpRequest, cancellable: &Cancellable) -> Result<HttpResponse> {
        self.prepare(&mut request);
        self.transport.send(request, cancellable)
    }

    /// Turns a failed response into an error.
    pub fn error(&self, operation: OperationType, response: HttpResponse) -> Error {
        error_from_response(self.error_parser.as_ref(), operation, response)
    }
}

/// A token cancelled by its parent, and by dropping it.
///
/// Lets a stream abort its own in-flight request without cancelling the
/// caller's token.
pub(crate) struct ChildCancellable {
    parent: Cancellable,
    child: Cancellable,
    id: HandlerId,
}

impl ChildCancellable {
    pub(crate) fn new(parent: &Cancellable) -> Self {
        let child = Cancellable::new();
        let forward = child.clone();
        let id = parent.connect(move || forward.cancel());
        Self {
            parent: parent.clone(),
            child,
            id,
        }
    }

    pub(crate) fn token(&self) -> &Cancellable {
        &self.child
    }
}

impl Drop for ChildCancellable {
    fn drop(&mut self) {
        self.parent.disconnect(self.id);
        self.child.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authorizer::DummyAuthorizer;
    use crate::http::{Method, headers};
    use crate::mock::{MockResponse, MockTransport};

    #[test]
    fn prepare_adds_common_headers() {
        let transport = Arc::new(MockTransport::new(|_| MockResponse::new(204)));
        let context = StreamContext::new(transport.clone())
            .with_authorizer(Some(Arc::new(DummyAuthorizer)))
            .with_header(headers::GDATA_VERSION, HeaderValue::from_static("2"));
        let request = HttpRequest::parse(Method::GET, "https://example.com/").unwrap();
        let response = context.send(request, &Cancellable::new()).unwrap();
        assert_eq!(response.status, 204);
        assert_eq!(transport.requests()[0].header("GData-Version"), Some("2"));
    }

    #[test]
    fn child_follows_parent() {
        let parent = Cancellable::new();
        let child = ChildCancellable::new(&parent);
        let token = child.token().clone();
        assert!(!token.is_cancelled());
        parent.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn dropping_child_cancels_only_the_child() {
        let parent = Cancellable::new();
        let child = ChildCancellable::new(&parent);
        let token = child.token().clone();
        drop(child);
        assert!(token.is_cancelled());
        assert!(!parent.is_cancelled());
    }
}
