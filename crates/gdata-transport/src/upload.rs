//! Upload stream, single-request or resumable.
//!
//! Bytes written to the stream go through a bounded pipe to a network
//! thread. A single-request upload streams the pipe as the request body. A
//! resumable upload first POSTs the metadata to obtain a session URI, then
//! PUTs the content in chunks of at most [`MAX_CHUNK_SIZE`] bytes.

use std::io::{self, Cursor, Read, Write};
use std::marker::PhantomData;
use std::thread::{self, JoinHandle};

use gdata_core::{Cancellable, EntryType, Error, ErrorKind, Parsable, Result};
use tracing::{debug, warn};
use url::Url;

use crate::context::{ChildCancellable, StreamContext};
use crate::http::{
    ATOM_CONTENT_TYPE_UTF8, HttpRequest, HttpResponse, Method, OperationType, RequestBody,
    header, headers,
};
use crate::pipe::{DEFAULT_CAPACITY, PipeReader, PipeWriter, pipe};

/// Boundary of the multipart body of a single-request upload with metadata.
pub const BOUNDARY: &str = "0003Z5W789deadbeefRTE456KlemsnoZV";

/// Largest chunk sent in one resumable-upload request.
pub const MAX_CHUNK_SIZE: usize = 512 * 1024;

/// Attempts per chunk; chunks are retried on 5xx only with `retry-chunks`.
#[cfg(feature = "retry-chunks")]
const CHUNK_ATTEMPTS: usize = 3;
#[cfg(not(feature = "retry-chunks"))]
const CHUNK_ATTEMPTS: usize = 1;

/// Where and how to upload.
#[derive(Debug, Clone)]
pub struct UploadTarget {
    /// `POST` to create, `PUT` to replace.
    pub method: Method,
    pub uri: String,
    /// Suggested file name, sent as `Slug`.
    pub slug: String,
    /// Type of the uploaded content.
    pub content_type: String,
}

impl UploadTarget {
    pub fn new(
        method: Method,
        uri: impl Into<String>,
        slug: impl Into<String>,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            method,
            uri: uri.into(),
            slug: slug.into(),
            content_type: content_type.into(),
        }
    }
}

/// The final response of an upload.
struct Completion {
    status: u16,
    body: String,
}

/// A [`Write`] stream whose [`close`](Self::close) returns the server's
/// entry for the uploaded content.
pub struct UploadStream<E: EntryType = gdata_core::Entry> {
    writer: Option<PipeWriter>,
    worker: Option<JoinHandle<Result<Completion>>>,
    /// Set when the worker has been joined.
    outcome: Option<Result<Completion>>,
    stop: ChildCancellable,
    declared_length: Option<u64>,
    written: u64,
    status: Option<u16>,
    closed: bool,
    _entry: PhantomData<fn() -> E>,
}

impl<E: EntryType> std::fmt::Debug for UploadStream<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadStream")
            .field("declared_length", &self.declared_length)
            .field("written", &self.written)
            .field("status", &self.status)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

fn parse_upload_uri(uri: &str) -> Result<Url> {
    let parsed = Url::parse(uri).map_err(|e| {
        Error::invalid_argument(format!("Invalid upload URI: {e}")).with_source(e)
    })?;
    if parsed.scheme() != "https" {
        return Err(Error::invalid_argument(format!(
            "Uploads must use HTTPS: {uri}"
        )));
    }
    Ok(parsed)
}

fn base_request<E: EntryType>(
    target: &UploadTarget,
    uri: Url,
    entry: Option<&E>,
) -> Result<HttpRequest> {
    let mut request = HttpRequest::new(target.method.clone(), uri);
    if !target.slug.is_empty() {
        request.set_header(headers::SLUG, &target.slug)?;
    }
    if let Some(etag) = entry.and_then(|e| e.entry().etag()) {
        request.set_header(header::IF_MATCH, etag)?;
    }
    Ok(request)
}

fn finish(context: &StreamContext, mut response: HttpResponse) -> Result<Completion> {
    if !response.is_success() {
        return Err(context.error(OperationType::Upload, response));
    }
    let body = response.read_text()?;
    Ok(Completion {
        status: response.status,
        body,
    })
}

impl<E: EntryType> UploadStream<E> {
    /// Starts a single-request upload.
    ///
    /// With an entry the body is `multipart/related`: the entry's XML, then
    /// the written content.
    ///
    /// # Errors
    ///
    /// Returns invalid-argument if the URI is not HTTPS or a header value is
    /// invalid, or a network error if the upload thread cannot start.
    pub fn new(
        context: StreamContext,
        target: UploadTarget,
        entry: Option<&E>,
        cancellable: &Cancellable,
    ) -> Result<Self> {
        let uri = parse_upload_uri(&target.uri)?;
        let mut request = base_request(&target, uri, entry)?;
        let stop = ChildCancellable::new(cancellable);
        let (writer, reader) = pipe(DEFAULT_CAPACITY, stop.token());

        let body: Box<dyn Read + Send> = match entry {
            Some(entry) => {
                request.set_header(
                    header::CONTENT_TYPE,
                    &format!("multipart/related; boundary={BOUNDARY}"),
                )?;
                let head = format!(
                    "--{BOUNDARY}\nContent-Type: {ATOM_CONTENT_TYPE_UTF8}\n\n{}\n--{BOUNDARY}\nContent-Type: {}\nContent-Transfer-Encoding: binary\n\n",
                    entry.to_xml(),
                    target.content_type
                );
                let tail = format!("\n--{BOUNDARY}--");
                Box::new(Cursor::new(head).chain(reader).chain(Cursor::new(tail)))
            }
            None => {
                request.set_header(header::CONTENT_TYPE, &target.content_type)?;
                Box::new(reader)
            }
        };
        request.body = RequestBody::Stream {
            reader: body,
            length: None,
        };

        let token = stop.token().clone();
        let worker = thread::Builder::new()
            .name("gdata-upload".to_string())
            .spawn(move || {
                debug!(uri = %request.uri, "Starting upload");
                let response = context.send(request, &token)?;
                finish(&context, response)
            })
            .map_err(|e| {
                Error::network(format!("Failed to start upload thread: {e}")).with_source(e)
            })?;

        Ok(Self::from_parts(writer, worker, stop, None))
    }

    /// Starts a resumable upload of exactly `content_length` bytes.
    ///
    /// A `content_length` of 0 uploads the entry's metadata only.
    ///
    /// # Errors
    ///
    /// Returns invalid-argument if the URI is not HTTPS or a header value is
    /// invalid, or a network error if the upload thread cannot start.
    pub fn resumable(
        context: StreamContext,
        target: UploadTarget,
        entry: Option<&E>,
        content_length: u64,
        cancellable: &Cancellable,
    ) -> Result<Self> {
        let uri = parse_upload_uri(&target.uri)?;
        let mut request = base_request(&target, uri, entry)?;
        request.set_header(headers::X_UPLOAD_CONTENT_TYPE, &target.content_type)?;
        request.set_header(headers::X_UPLOAD_CONTENT_LENGTH, &content_length.to_string())?;
        match entry {
            Some(entry) => request.set_body(ATOM_CONTENT_TYPE_UTF8, entry.to_xml())?,
            None => request.set_header(header::CONTENT_LENGTH, "0")?,
        }

        let stop = ChildCancellable::new(cancellable);
        let (writer, reader) = pipe(DEFAULT_CAPACITY, stop.token());
        let token = stop.token().clone();
        let session = ResumableSession {
            context,
            content_type: target.content_type,
            total: content_length,
        };
        let worker = thread::Builder::new()
            .name("gdata-upload".to_string())
            .spawn(move || session.run(request, reader, &token))
            .map_err(|e| {
                Error::network(format!("Failed to start upload thread: {e}")).with_source(e)
            })?;

        Ok(Self::from_parts(writer, worker, stop, Some(content_length)))
    }

    fn from_parts(
        writer: PipeWriter,
        worker: JoinHandle<Result<Completion>>,
        stop: ChildCancellable,
        declared_length: Option<u64>,
    ) -> Self {
        Self {
            writer: Some(writer),
            worker: Some(worker),
            outcome: None,
            stop,
            declared_length,
            written: 0,
            status: None,
            closed: false,
            _entry: PhantomData,
        }
    }

    /// Bytes accepted by [`write`](Write::write) so far.
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Status of the final response, once the stream is closed.
    pub fn response_status(&self) -> Option<u16> {
        self.status
    }

    fn join(&mut self) -> Result<Completion> {
        if let Some(outcome) = self.outcome.take() {
            return outcome;
        }
        match self.worker.take() {
            Some(worker) => match worker.join() {
                Ok(outcome) => outcome,
                Err(panic) => std::panic::resume_unwind(panic),
            },
            None => Err(Error::invalid_argument("Stream is already closed")),
        }
    }

    /// Finishes the upload and parses the server's entry.
    ///
    /// Returns `None` when the server answered with an empty body. Closing
    /// twice returns `None` the second time.
    ///
    /// # Errors
    ///
    /// Returns the error that ended the upload: a classified error response,
    /// `cancelled`, a network error, or invalid-argument if fewer bytes were
    /// written than declared for a resumable upload.
    pub fn close(&mut self) -> Result<Option<E>> {
        if self.closed {
            return Ok(None);
        }
        self.closed = true;
        if let Some(writer) = self.writer.take() {
            if let Some(declared) = self.declared_length {
                if self.written < declared {
                    writer.fail(Error::invalid_argument(format!(
                        "The upload ended after {} of {declared} declared bytes.",
                        self.written
                    )));
                }
            }
        }
        let completion = self.join()?;
        self.status = Some(completion.status);
        if completion.body.trim().is_empty() {
            return Ok(None);
        }
        E::from_xml(&completion.body).map(Some)
    }
}

impl<E: EntryType> Write for UploadStream<E> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(Error::invalid_argument("Stream is already closed").into());
        }
        if let Some(declared) = self.declared_length {
            if self.written + buf.len() as u64 > declared {
                return Err(Error::invalid_argument(
                    "Attempted to write more data than the declared content length.",
                )
                .into());
            }
        }
        let Some(writer) = self.writer.as_mut() else {
            return Err(Error::invalid_argument("Stream is already closed").into());
        };
        match writer.write(buf) {
            Ok(n) => {
                self.written += n as u64;
                Ok(n)
            }
            Err(e) => {
                // The network side has stopped. A bare broken pipe says
                // nothing, so fall back to the worker's own error.
                self.writer = None;
                let err = Error::from(e);
                let outcome = self.join();
                let err = match outcome {
                    Err(ref cause) if err.kind() == ErrorKind::NetworkError => detached(cause),
                    _ => err,
                };
                self.outcome = Some(outcome);
                Err(err.into())
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<E: EntryType> Drop for UploadStream<E> {
    fn drop(&mut self) {
        if !self.closed && self.worker.is_some() {
            // Abandoned: abort rather than let the server see a short body.
            self.stop.token().cancel();
        }
    }
}

struct ResumableSession {
    context: StreamContext,
    content_type: String,
    total: u64,
}

impl ResumableSession {
    /// Runs the upload, handing any failure to the writing side as well.
    fn run(
        self,
        initiation: HttpRequest,
        mut reader: PipeReader,
        cancellable: &Cancellable,
    ) -> Result<Completion> {
        let outcome = self.upload(initiation, &mut reader, cancellable);
        if let Err(ref err) = outcome {
            reader.fail(detached(err));
        }
        outcome
    }

    fn upload(
        &self,
        initiation: HttpRequest,
        reader: &mut PipeReader,
        cancellable: &Cancellable,
    ) -> Result<Completion> {
        debug!(uri = %initiation.uri, total = self.total, "Starting resumable upload");
        let response = self.context.send(initiation, cancellable)?;
        if !response.is_success() {
            return Err(self.context.error(OperationType::Upload, response));
        }
        if self.total == 0 {
            return finish(&self.context, response);
        }
        let mut session = response
            .header(&header::LOCATION)
            .ok_or_else(|| Error::protocol("The server did not return an upload session URI."))
            .and_then(|location| {
                Url::parse(location).map_err(|e| {
                    Error::protocol(format!("Invalid upload session URI: {e}")).with_source(e)
                })
            })?;
        debug!(session = %session, "Upload session created");

        let mut sent: u64 = 0;
        loop {
            let length = (self.total - sent).min(MAX_CHUNK_SIZE as u64);
            let chunk = read_chunk(reader, length)?;
            let end = sent + length - 1;
            let response = self.send_chunk(&session, chunk, sent, end, cancellable)?;
            sent += length;
            match response.status {
                308 => {
                    if sent >= self.total {
                        return Err(Error::protocol(
                            "The server expected more data than was declared.",
                        ));
                    }
                    if let Some(location) = response.header(&header::LOCATION) {
                        session = Url::parse(location).map_err(|e| {
                            Error::protocol(format!("Invalid upload session URI: {e}"))
                                .with_source(e)
                        })?;
                    }
                }
                200 | 201 => {
                    if sent != self.total {
                        return Err(Error::protocol(
                            "The server finished the upload before all data was sent.",
                        ));
                    }
                    return finish(&self.context, response);
                }
                _ => return Err(self.context.error(OperationType::Upload, response)),
            }
        }
    }

    fn send_chunk(
        &self,
        session: &Url,
        chunk: Vec<u8>,
        start: u64,
        end: u64,
        cancellable: &Cancellable,
    ) -> Result<HttpResponse> {
        let range = format!("bytes {start}-{end}/{}", self.total);
        let mut attempt = 1;
        loop {
            debug!(range = %range, attempt, "Uploading chunk");
            let mut request = HttpRequest::new(Method::PUT, session.clone());
            request.set_header(header::CONTENT_RANGE, &range)?;
            request.set_body(self.content_type.as_str(), chunk.clone())?;
            let response = self.context.send(request, cancellable)?;
            if (500..600).contains(&response.status) && attempt < CHUNK_ATTEMPTS {
                warn!(status = response.status, attempt, "Retrying chunk");
                attempt += 1;
                continue;
            }
            return Ok(response);
        }
    }
}

/// Copies the parts of `err` another thread needs to report it.
fn detached(err: &Error) -> Error {
    let copy = Error::new(err.kind(), err.message());
    match err.status() {
        Some(status) => copy.with_status(status),
        None => copy,
    }
}

/// Reads exactly `length` bytes, failing if the writer closes early.
fn read_chunk(reader: &mut PipeReader, length: u64) -> Result<Vec<u8>> {
    let mut chunk = Vec::with_capacity(length as usize);
    reader.by_ref().take(length).read_to_end(&mut chunk)?;
    if (chunk.len() as u64) < length {
        return Err(Error::invalid_argument(
            "The upload ended before the declared content length was reached.",
        ));
    }
    Ok(chunk)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockResponse, MockTransport};
    use gdata_core::{Entry, ErrorKind};
    use std::sync::Arc;

    const RETURNED: &str = "<entry xmlns='http://www.w3.org/2005/Atom' xmlns:gd='http://schemas.google.com/g/2005' gd:etag='\"abc\"'><title>Uploaded</title><id>https://example.com/entry/1</id></entry>";

    fn entry() -> Entry {
        let mut entry = Entry::new(None);
        entry.set_title(Some("Test title!".to_string()));
        entry
    }

    fn target(uri: &str) -> UploadTarget {
        UploadTarget::new(Method::POST, uri, "file.txt", "text/plain")
    }

    #[test]
    fn single_request_with_metadata_is_multipart() {
        let transport = Arc::new(MockTransport::new(|_| MockResponse::atom(201, RETURNED)));
        let mut upload = UploadStream::new(
            StreamContext::new(transport.clone()),
            target("https://example.com/upload"),
            Some(&entry()),
            &Cancellable::new(),
        )
        .unwrap();
        upload.write_all(b"hello world").unwrap();
        let returned: Entry = upload.close().unwrap().unwrap();
        assert_eq!(returned.title(), Some("Uploaded"));
        assert_eq!(upload.response_status(), Some(201));

        let request = &transport.requests()[0];
        assert_eq!(
            request.header("Content-Type"),
            Some("multipart/related; boundary=0003Z5W789deadbeefRTE456KlemsnoZV")
        );
        assert_eq!(request.header("Slug"), Some("file.txt"));
        let body = request.body_text();
        assert!(body.starts_with(
            "--0003Z5W789deadbeefRTE456KlemsnoZV\nContent-Type: application/atom+xml; charset=UTF-8\n\n<entry"
        ));
        assert!(body.ends_with(
            "Content-Type: text/plain\nContent-Transfer-Encoding: binary\n\nhello world\n--0003Z5W789deadbeefRTE456KlemsnoZV--"
        ));
    }

    #[test]
    fn single_request_without_metadata_uses_content_type() {
        let transport = Arc::new(MockTransport::new(|_| MockResponse::new(200)));
        let mut upload = UploadStream::<Entry>::new(
            StreamContext::new(transport.clone()),
            target("https://example.com/upload"),
            None,
            &Cancellable::new(),
        )
        .unwrap();
        upload.write_all(b"raw").unwrap();
        assert!(upload.close().unwrap().is_none());
        let request = &transport.requests()[0];
        assert_eq!(request.header("Content-Type"), Some("text/plain"));
        assert_eq!(request.body, b"raw");
    }

    #[test]
    fn plain_http_is_rejected() {
        let transport = Arc::new(MockTransport::new(|_| MockResponse::new(200)));
        let err = UploadStream::<Entry>::new(
            StreamContext::new(transport),
            target("http://example.com/upload"),
            None,
            &Cancellable::new(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn etag_is_sent_as_if_match() {
        let transport = Arc::new(MockTransport::new(|_| MockResponse::new(200)));
        let mut existing = entry();
        existing.set_etag(Some("\"xyz\"".to_string()));
        let mut upload = UploadStream::resumable(
            StreamContext::new(transport.clone()),
            target("https://example.com/upload"),
            Some(&existing),
            0,
            &Cancellable::new(),
        )
        .unwrap();
        assert!(upload.close().unwrap().is_none());
        let request = &transport.requests()[0];
        assert_eq!(request.header("If-Match"), Some("\"xyz\""));
        assert_eq!(request.header("X-Upload-Content-Length"), Some("0"));
        assert_eq!(transport.request_count(), 1);
    }

    #[test]
    fn resumable_without_entry_sends_empty_initiation() {
        let transport = Arc::new(MockTransport::new(|request| {
            if request.method == Method::POST {
                MockResponse::new(200).with_header("Location", "https://example.com/session/1")
            } else {
                MockResponse::atom(201, RETURNED)
            }
        }));
        let mut upload = UploadStream::<Entry>::resumable(
            StreamContext::new(transport.clone()),
            target("https://example.com/upload"),
            None,
            4,
            &Cancellable::new(),
        )
        .unwrap();
        upload.write_all(b"data").unwrap();
        assert!(upload.close().unwrap().is_some());

        let requests = transport.requests();
        assert_eq!(requests[0].header("Content-Length"), Some("0"));
        assert!(requests[0].body.is_empty());
        assert_eq!(requests[1].header("Content-Range"), Some("bytes 0-3/4"));
    }

    #[test]
    fn writing_past_declared_length_fails() {
        let transport = Arc::new(MockTransport::new(|_| {
            MockResponse::new(200).with_header("Location", "https://example.com/session/1")
        }));
        let mut upload = UploadStream::<Entry>::resumable(
            StreamContext::new(transport),
            target("https://example.com/upload"),
            None,
            2,
            &Cancellable::new(),
        )
        .unwrap();
        let err = upload.write(b"abc").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn short_resumable_upload_fails_on_close() {
        let transport = Arc::new(MockTransport::new(|_| {
            MockResponse::new(200).with_header("Location", "https://example.com/session/1")
        }));
        let mut upload = UploadStream::<Entry>::resumable(
            StreamContext::new(transport.clone()),
            target("https://example.com/upload"),
            None,
            10,
            &Cancellable::new(),
        )
        .unwrap();
        upload.write_all(b"abc").unwrap();
        let err = upload.close().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(transport.request_count(), 1);
    }

    #[test]
    fn initiation_error_is_classified() {
        let transport = Arc::new(MockTransport::new(|_| {
            MockResponse::new(403).with_body("No uploads for you")
        }));
        let mut upload = UploadStream::<Entry>::resumable(
            StreamContext::new(transport),
            target("https://example.com/upload"),
            None,
            3,
            &Cancellable::new(),
        )
        .unwrap();
        let err = upload.close().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
    }

    #[test]
    fn writer_sees_the_session_error() {
        let transport = Arc::new(MockTransport::new(|_| {
            MockResponse::new(403).with_body("No uploads for you")
        }));
        let content = vec![7u8; 4 * DEFAULT_CAPACITY];
        let mut upload = UploadStream::<Entry>::resumable(
            StreamContext::new(transport),
            target("https://example.com/upload"),
            None,
            content.len() as u64,
            &Cancellable::new(),
        )
        .unwrap();
        let err = Error::from(upload.write_all(&content).unwrap_err());
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        assert_eq!(err.status(), Some(403));
        assert!(err.message().contains("No uploads for you"));

        let err = upload.close().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
    }
}
