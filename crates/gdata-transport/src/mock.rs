//! In-process scripted server for tests.
//!
//! A [`MockTransport`] hands every request to a closure and returns whatever
//! it answers, recording each request (with its body read in full) so tests
//! can assert on what went over the wire.

use std::io::{Cursor, Read};
use std::sync::{Arc, Mutex, MutexGuard};

use gdata_core::{Cancellable, Result};
use url::Url;

use crate::client::CancellableBody;
use crate::http::{
    HeaderMap, HeaderName, HeaderValue, HttpRequest, HttpResponse, Method, RequestBody, Transport,
    header,
};

/// A request as the mock server saw it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub uri: Url,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    /// Returns a header value, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The body as text.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// A scripted response.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub reason: Option<String>,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl MockResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            reason: None,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    /// Adds a header. Invalid names or values are skipped.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// An Atom document response.
    pub fn atom(status: u16, xml: impl Into<String>) -> Self {
        Self::new(status)
            .with_header("Content-Type", "application/atom+xml; charset=UTF-8")
            .with_body(xml.into())
    }

    /// Serves `payload`, honouring a `Range: bytes=N-` request header.
    ///
    /// With `content_length` false the response carries no length header,
    /// as a chunked server response would.
    pub fn ranged(request: &RecordedRequest, payload: &[u8], content_length: bool) -> Self {
        let start = request
            .header("Range")
            .and_then(|range| range.strip_prefix("bytes="))
            .and_then(|range| range.strip_suffix('-'))
            .and_then(|start| start.parse::<usize>().ok());
        let total = payload.len();
        let (mut response, body) = match start {
            Some(start) if start >= total && total > 0 => {
                return Self::new(416).with_header("Content-Range", &format!("bytes */{total}"));
            }
            Some(start) => (
                Self::new(206).with_header(
                    "Content-Range",
                    &format!("bytes {start}-{}/{total}", total.saturating_sub(1)),
                ),
                &payload[start.min(total)..],
            ),
            None => (Self::new(200), payload),
        };
        if content_length {
            response = response.with_header("Content-Length", &body.len().to_string());
        }
        response
            .with_header("Content-Type", "text/plain")
            .with_body(body.to_vec())
    }
}

type Handler = dyn Fn(&RecordedRequest) -> MockResponse + Send + Sync;

/// A [`Transport`] answered by a closure.
#[derive(Clone)]
pub struct MockTransport {
    handler: Arc<Handler>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("requests", &self.lock().len())
            .finish_non_exhaustive()
    }
}

impl MockTransport {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&RecordedRequest) -> MockResponse + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<RecordedRequest>> {
        match self.requests.lock() {
            Ok(requests) => requests,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.lock().len()
    }
}

impl Transport for MockTransport {
    fn send(&self, request: HttpRequest, cancellable: &Cancellable) -> Result<HttpResponse> {
        cancellable.check()?;
        let body = match request.body {
            RequestBody::Empty => Vec::new(),
            RequestBody::Bytes(bytes) => bytes,
            RequestBody::Stream { mut reader, .. } => {
                let mut body = Vec::new();
                reader.read_to_end(&mut body)?;
                body
            }
        };
        let mut headers = request.headers;
        if !body.is_empty() && !headers.contains_key(header::CONTENT_LENGTH) {
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
        }
        let recorded = RecordedRequest {
            method: request.method,
            uri: request.uri,
            headers,
            body,
        };
        self.lock().push(recorded.clone());
        cancellable.check()?;

        let scripted = (self.handler)(&recorded);
        let body = CancellableBody {
            inner: Cursor::new(scripted.body),
            cancellable: cancellable.clone(),
        };
        let mut response = HttpResponse::new(scripted.status, scripted.headers, body);
        if let Some(reason) = scripted.reason {
            response = response.with_reason(reason);
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_requests_and_serves_responses() {
        let transport = MockTransport::new(|request| {
            MockResponse::new(200).with_body(format!("echo {}", request.body_text()))
        });
        let mut request = HttpRequest::parse(Method::POST, "https://example.com/feed").unwrap();
        request.set_body("text/plain", "ping").unwrap();
        let mut response = transport.send(request, &Cancellable::new()).unwrap();
        assert_eq!(response.read_text().unwrap(), "echo ping");

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, Method::POST);
        assert_eq!(requests[0].header("content-type"), Some("text/plain"));
    }

    #[test]
    fn ranged_responses() {
        let payload = b"0123456789";
        let transport = MockTransport::new(move |request| MockResponse::ranged(request, payload, true));
        let mut request = HttpRequest::parse(Method::GET, "https://example.com/file").unwrap();
        request.set_header(header::RANGE, "bytes=4-").unwrap();
        let mut response = transport.send(request, &Cancellable::new()).unwrap();
        assert_eq!(response.status, 206);
        assert_eq!(response.header(&header::CONTENT_RANGE), Some("bytes 4-9/10"));
        assert_eq!(response.content_length(), Some(6));
        assert_eq!(response.read_text().unwrap(), "456789");
    }

    #[test]
    fn cancelled_requests_are_not_recorded() {
        let transport = MockTransport::new(|_| MockResponse::new(200));
        let cancellable = Cancellable::new();
        cancellable.cancel();
        let request = HttpRequest::parse(Method::GET, "https://example.com/").unwrap();
        assert!(transport.send(request, &cancellable).unwrap_err().is_cancelled());
        assert_eq!(transport.request_count(), 0);
    }
}
