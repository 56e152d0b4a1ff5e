//! Seekable download stream.
//!
//! The GET is issued lazily on the first read. Once the headers are in, a
//! network thread copies the body into a bounded pipe that [`Read::read`]
//! drains. Seeking forward pops bytes off the pipe; seeking backward drops
//! the request and reissues it with a `Range` header on the next read.

use std::io::{self, Read, Seek, SeekFrom};
use std::thread;

use gdata_core::{Cancellable, Error, Result};
use tracing::{debug, warn};
use url::Url;

use crate::context::{ChildCancellable, StreamContext};
use crate::http::{HttpRequest, Method, OperationType, header};
use crate::pipe::{DEFAULT_CAPACITY, PipeReader, pipe};

struct Active {
    reader: PipeReader,
    /// Cancels the network thread when the request is dropped.
    _stop: ChildCancellable,
}

/// A [`Read`] + [`Seek`] stream over one HTTP resource.
pub struct DownloadStream {
    context: StreamContext,
    uri: Url,
    cancellable: Cancellable,
    /// Offset of the next byte handed to the caller.
    offset: u64,
    active: Option<Active>,
    content_length: Option<u64>,
    content_type: Option<String>,
    closed: bool,
}

impl std::fmt::Debug for DownloadStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadStream")
            .field("uri", &self.uri.as_str())
            .field("offset", &self.offset)
            .field("started", &self.active.is_some())
            .field("content_length", &self.content_length)
            .field("closed", &self.closed)
            .finish()
    }
}

fn invalid_seek() -> io::Error {
    Error::invalid_argument("Invalid seek request").into()
}

/// Total length from a `Content-Range: bytes a-b/total` header.
fn content_range_total(value: &str) -> Option<u64> {
    value.rsplit_once('/')?.1.trim().parse().ok()
}

impl DownloadStream {
    /// Creates a stream for `uri`. Nothing is sent until the first read.
    ///
    /// # Errors
    ///
    /// Returns invalid-argument if `uri` is not an absolute URI.
    pub fn new(context: StreamContext, uri: &str, cancellable: Cancellable) -> Result<Self> {
        let uri = Url::parse(uri).map_err(|e| {
            Error::invalid_argument(format!("Invalid download URI: {e}")).with_source(e)
        })?;
        Ok(Self {
            context,
            uri,
            cancellable,
            offset: 0,
            active: None,
            content_length: None,
            content_type: None,
            closed: false,
        })
    }

    pub fn uri(&self) -> &str {
        self.uri.as_str()
    }

    /// Offset of the next byte [`read`](Read::read) will return.
    pub fn tell(&self) -> u64 {
        self.offset
    }

    /// Length of the whole resource, known once the response headers arrive.
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// Content type of the resource, known once the response headers arrive.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn cancellable(&self) -> &Cancellable {
        &self.cancellable
    }

    /// Stops the download. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        self.active = None;
        self.closed = true;
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        let stop = ChildCancellable::new(&self.cancellable);
        let mut request = HttpRequest::new(Method::GET, self.uri.clone());
        if self.offset > 0 {
            request.set_header(header::RANGE, &format!("bytes={}-", self.offset))?;
        }
        debug!(uri = %self.uri, offset = self.offset, "Starting download");

        let response = self.context.send(request, stop.token())?;
        let (skip, total) = match response.status {
            200 => {
                if self.offset > 0 {
                    debug!(offset = self.offset, "Server ignored the Range header");
                }
                (self.offset, response.content_length())
            }
            206 => {
                let total = response
                    .header(&header::CONTENT_RANGE)
                    .and_then(content_range_total)
                    .or_else(|| response.content_length().map(|len| len + self.offset));
                (0, total)
            }
            416 => {
                // Nothing left at this offset: behave as end of stream.
                let total = response
                    .header(&header::CONTENT_RANGE)
                    .and_then(content_range_total);
                if self.content_length.is_none() {
                    self.content_length = total;
                }
                let (writer, reader) = pipe(1, stop.token());
                drop(writer);
                self.active = Some(Active {
                    reader,
                    _stop: stop,
                });
                return Ok(());
            }
            _ => return Err(self.context.error(OperationType::Download, response)),
        };
        if self.content_length.is_none() {
            self.content_length = total;
        }
        if self.content_type.is_none() {
            self.content_type = response.content_type().map(str::to_string);
        }

        let (mut writer, reader) = pipe(DEFAULT_CAPACITY, stop.token());
        let mut body = response.into_body();
        thread::Builder::new()
            .name("gdata-download".to_string())
            .spawn(move || {
                if skip > 0 {
                    if let Err(e) = io::copy(&mut body.by_ref().take(skip), &mut io::sink()) {
                        writer.fail(e.into());
                        return;
                    }
                }
                if let Err(e) = io::copy(&mut body, &mut writer) {
                    if !writer.is_reader_closed() {
                        warn!("Download interrupted: {}", e);
                        writer.fail(e.into());
                    }
                }
            })
            .map_err(|e| {
                Error::network(format!("Failed to start download thread: {e}")).with_source(e)
            })?;

        self.active = Some(Active {
            reader,
            _stop: stop,
        });
        Ok(())
    }

    fn ensure_open(&self) -> io::Result<()> {
        if self.closed {
            return Err(Error::invalid_argument("Stream is already closed").into());
        }
        Ok(())
    }
}

impl Read for DownloadStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.ensure_open()?;
        self.cancellable.check()?;
        if self.active.is_none() {
            self.start()?;
        }
        let Some(active) = self.active.as_mut() else {
            return Ok(0);
        };
        let n = active.reader.read(buf)?;
        self.offset += n as u64;
        Ok(n)
    }
}

impl Seek for DownloadStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.ensure_open()?;
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::Current(delta) => self.offset.checked_add_signed(delta),
            SeekFrom::End(delta) => {
                let Some(length) = self.content_length else {
                    return Err(io::Error::new(
                        io::ErrorKind::Unsupported,
                        "Seeking from the end needs the content length",
                    ));
                };
                length.checked_add_signed(delta)
            }
        };
        let target = target.ok_or_else(invalid_seek)?;
        if self.content_length.is_some_and(|length| target > length) {
            return Err(invalid_seek());
        }

        if let Some(active) = self.active.as_mut() {
            if target >= self.offset {
                let wanted = target - self.offset;
                let skipped = io::copy(&mut active.reader.by_ref().take(wanted), &mut io::sink())?;
                self.offset += skipped;
                if skipped < wanted {
                    return Err(invalid_seek());
                }
                return Ok(self.offset);
            }
            debug!(from = self.offset, to = target, "Restarting download for backward seek");
            self.active = None;
        }
        self.offset = target;
        Ok(self.offset)
    }

    fn stream_position(&mut self) -> io::Result<u64> {
        Ok(self.offset)
    }
}
