//! Transport configuration.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;
use url::Url;

/// Overrides the port of every outgoing HTTPS request (test harnesses).
pub const HTTPS_PORT_ENV: &str = "GDATA_HTTPS_PORT";

/// Selects wire-level logging: `none`, `headers` or `full` (also `0`/`1`/`2`).
pub const TRANSPORT_LOG_ENV: &str = "GDATA_TRANSPORT_LOG";

/// How much of each HTTP exchange is logged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum TransportLogLevel {
    #[default]
    None,
    /// Request and status lines plus headers.
    Headers,
    /// Headers plus bodies.
    Full,
}

impl FromStr for TransportLogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "0" | "none" => Ok(Self::None),
            "1" | "headers" => Ok(Self::Headers),
            "2" | "full" => Ok(Self::Full),
            other => Err(format!("unknown transport log level: {other}")),
        }
    }
}

impl fmt::Display for TransportLogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Headers => "headers",
            Self::Full => "full",
        })
    }
}

/// Settings shared by every request a transport sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Bound on each HTTP round trip; `None` waits forever.
    pub timeout: Option<Duration>,
    /// Replaces the port of HTTPS request URIs.
    pub https_port: Option<u16>,
    pub log_level: TransportLogLevel,
    pub user_agent: String,
    pub proxy: Option<Url>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            https_port: None,
            log_level: TransportLogLevel::None,
            user_agent: format!("gdata-rs/{}", env!("CARGO_PKG_VERSION")),
            proxy: None,
        }
    }
}

impl TransportConfig {
    /// Reads the port override and log level from the environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env) with an explicit variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(value) = lookup(HTTPS_PORT_ENV) {
            match value.trim().parse::<u16>() {
                Ok(port) if port > 0 => config.https_port = Some(port),
                _ => warn!(variable = HTTPS_PORT_ENV, value = %value, "Ignoring invalid port"),
            }
        }
        if let Some(value) = lookup(TRANSPORT_LOG_ENV) {
            match value.parse() {
                Ok(level) => config.log_level = level,
                Err(e) => warn!(variable = TRANSPORT_LOG_ENV, "Ignoring invalid value: {}", e),
            }
        }
        config
    }

    /// Sets the timeout in seconds; 0 means no timeout.
    #[must_use]
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout = timeout_from_secs(secs);
        self
    }

    #[must_use]
    pub fn with_https_port(mut self, port: Option<u16>) -> Self {
        self.https_port = port;
        self
    }

    #[must_use]
    pub fn with_log_level(mut self, level: TransportLogLevel) -> Self {
        self.log_level = level;
        self
    }

    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    #[must_use]
    pub fn with_proxy(mut self, proxy: Option<Url>) -> Self {
        self.proxy = proxy;
        self
    }

    /// Applies the HTTPS port override to `uri`.
    pub fn rewrite_uri(&self, uri: &mut Url) {
        if let Some(port) = self.https_port {
            if uri.scheme() == "https" && uri.set_port(Some(port)).is_err() {
                warn!(uri = %uri, "Cannot override the port of this URI");
            }
        }
    }
}

/// Converts a timeout in seconds, where 0 means unbounded.
pub fn timeout_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}
