//! reqwest-backed transport.
//!
//! Uses the blocking client; each exchange runs on a helper thread so that
//! the calling thread can return as soon as the operation is cancelled.

use std::io::{self, Read};
use std::sync::mpsc;
use std::thread;

use gdata_core::{Cancellable, Error, Result};
use reqwest::blocking::{Body, Client};
use tracing::{debug, trace};

use crate::config::{TransportConfig, TransportLogLevel};
use crate::http::{
    HeaderMap, HeaderName, HeaderValue, HttpRequest, HttpResponse, RequestBody, Transport,
};

/// A [`Transport`] over a shared reqwest blocking client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    config: TransportConfig,
}

enum Outcome {
    Response(reqwest::Result<reqwest::blocking::Response>),
    Cancelled,
}

impl ReqwestTransport {
    /// Creates a transport configured from the environment.
    ///
    /// # Errors
    ///
    /// Returns a network error if the HTTP client cannot be built.
    pub fn new() -> Result<Self> {
        Self::with_config(TransportConfig::from_env())
    }

    /// Creates a transport with explicit settings.
    ///
    /// # Errors
    ///
    /// Returns a network error if the HTTP client cannot be built, or
    /// invalid-argument if the proxy URI is unusable.
    pub fn with_config(config: TransportConfig) -> Result<Self> {
        // Redirects reach the caller: 308 is how resumable uploads report progress.
        let mut builder = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::none());
        if let Some(ref proxy) = config.proxy {
            let proxy = reqwest::Proxy::all(proxy.as_str()).map_err(|e| {
                Error::invalid_argument(format!("Invalid proxy URI: {e}")).with_source(e)
            })?;
            builder = builder.proxy(proxy);
        }
        let client = builder.build().map_err(|e| {
            Error::network(format!("Failed to create HTTP client: {e}")).with_source(e)
        })?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    fn log_request(&self, request: &HttpRequest) {
        if self.config.log_level < TransportLogLevel::Headers {
            return;
        }
        debug!(method = %request.method, uri = %request.uri, "> request");
        log_headers(">", &request.headers);
        if self.config.log_level == TransportLogLevel::Full {
            if let Some(body) = request.body_bytes() {
                trace!("> {}", String::from_utf8_lossy(body));
            }
        }
    }

    fn log_response(&self, response: &reqwest::blocking::Response) {
        if self.config.log_level < TransportLogLevel::Headers {
            return;
        }
        debug!(status = response.status().as_u16(), "< response");
        log_headers("<", response.headers());
    }
}

fn log_headers(direction: &str, headers: &HeaderMap) {
    for (name, value) in headers {
        debug!("{}", header_line(direction, name, value));
    }
}

fn header_line(direction: &str, name: &HeaderName, value: &HeaderValue) -> String {
    let value = if *name == reqwest::header::AUTHORIZATION {
        "<redacted>"
    } else {
        value.to_str().unwrap_or("<binary>")
    };
    format!("{direction} {name}: {value}")
}

fn map_reqwest_error(err: reqwest::Error) -> Error {
    let message = if err.is_timeout() {
        "A timeout was reached while talking to the server.".to_string()
    } else if err.is_connect() {
        "Cannot connect to the service\u{2019}s server.".to_string()
    } else {
        format!("HTTP request failed: {err}")
    };
    Error::network(message).with_source(err)
}

impl Transport for ReqwestTransport {
    fn send(&self, mut request: HttpRequest, cancellable: &Cancellable) -> Result<HttpResponse> {
        cancellable.check()?;
        self.config.rewrite_uri(&mut request.uri);
        self.log_request(&request);

        let mut builder = self
            .client
            .request(request.method, request.uri)
            .headers(request.headers);
        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Bytes(bytes) => builder.body(bytes),
            RequestBody::Stream {
                reader,
                length: Some(length),
            } => builder.body(Body::sized(reader, length)),
            RequestBody::Stream { reader, length: None } => builder.body(Body::new(reader)),
        };

        let (tx, rx) = mpsc::channel();
        let cancel_tx = tx.clone();
        let handler = cancellable.connect(move || {
            let _ = cancel_tx.send(Outcome::Cancelled);
        });
        let spawned = thread::Builder::new()
            .name("gdata-http".to_string())
            .spawn(move || {
                let _ = tx.send(Outcome::Response(builder.send()));
            });
        if let Err(e) = spawned {
            cancellable.disconnect(handler);
            return Err(Error::network(format!("Failed to start request: {e}")).with_source(e));
        }

        let outcome = rx.recv();
        cancellable.disconnect(handler);
        let response = match outcome {
            Ok(Outcome::Response(result)) => result.map_err(map_reqwest_error)?,
            Ok(Outcome::Cancelled) => return Err(Error::cancelled()),
            Err(_) => return Err(Error::network("The HTTP worker exited unexpectedly")),
        };
        self.log_response(&response);

        let status = response.status().as_u16();
        let reason = response
            .status()
            .canonical_reason()
            .unwrap_or_default()
            .to_string();
        let headers = response.headers().clone();
        let body = CancellableBody {
            inner: response,
            cancellable: cancellable.clone(),
        };
        Ok(HttpResponse::new(status, headers, body).with_reason(reason))
    }
}

/// Fails reads once the operation has been cancelled.
pub(crate) struct CancellableBody<R> {
    pub(crate) inner: R,
    pub(crate) cancellable: Cancellable,
}

impl<R: Read> Read for CancellableBody<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.cancellable.check()?;
        self.inner.read(buf)
    }
}
