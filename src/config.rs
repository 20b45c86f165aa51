//! Configuration for sessions and the transport adapters.
//!
//! Everything is constructor-injected. Only the HTTP server reads the
//! process environment, through [`HttpServerConfig::from_env`].

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::dispatch::ErrorSink;
use crate::error::ProtocolError;
use crate::intercept::Interceptor;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_PATH: &str = "/api";
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;

/// Parse an environment variable, falling back to `default` when the
/// variable is unset or does not parse.
pub fn env_parse<T: FromStr + Copy>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Read a non-empty environment variable.
#[must_use]
pub fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

// =============================================================================
// SESSION
// =============================================================================

/// Per-session settings.
#[derive(Clone, Default)]
pub struct SessionConfig {
    /// Seed for call ids and the `session` field in logs. Random if unset.
    pub tag: Option<String>,
    /// Replaces the default sink, which logs each error.
    pub on_error: Option<ErrorSink>,
    pub interceptors: Vec<Arc<dyn Interceptor>>,
}

impl SessionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    #[must_use]
    pub fn with_error_sink<F>(mut self, f: F) -> Self
    where
        F: Fn(&ProtocolError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn with_interceptor(mut self, interceptor: impl Interceptor + 'static) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("tag", &self.tag)
            .field("on_error", &self.on_error.is_some())
            .field("interceptors", &self.interceptors.len())
            .finish()
    }
}

// =============================================================================
// HTTP
// =============================================================================

/// Where the polling HTTP client posts packets.
#[derive(Clone, Debug)]
pub struct HttpClientConfig {
    pub url: String,
    /// Per-request timeout. Polls wait for the next item, so unset by default.
    pub timeout: Option<Duration>,
}

impl HttpClientConfig {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), timeout: None }
    }

    /// Build the endpoint URL from its parts. A missing protocol means
    /// plain `http`.
    #[must_use]
    pub fn from_parts(protocol: Option<&str>, host: &str, port: Option<u16>, path: &str) -> Self {
        let protocol = protocol.unwrap_or("http");
        let url = match port {
            Some(port) => format!("{protocol}://{host}:{port}{path}"),
            None => format!("{protocol}://{host}{path}"),
        };
        Self::new(url)
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Buffered HTTP server settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpServerConfig {
    pub port: u16,
    pub path: String,
    /// Value for `Access-Control-Allow-Origin`; header omitted when unset.
    pub allow_origin: Option<String>,
    /// Negotiate gzip/deflate response compression.
    pub compress: bool,
    /// Abandon open responses nobody emitted to or polled for this long.
    /// `None` keeps them until they complete.
    pub idle_timeout: Option<Duration>,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            path: DEFAULT_PATH.to_owned(),
            allow_origin: None,
            compress: true,
            idle_timeout: Some(Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS)),
        }
    }
}

impl HttpServerConfig {
    /// Read `RPC_PORT`, `RPC_PATH`, `RPC_ALLOW_ORIGIN`, `RPC_COMPRESS` and
    /// `RPC_IDLE_TIMEOUT_SECS` (`0` disables expiry).
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let mut path = env_string("RPC_PATH").unwrap_or(defaults.path);
        if !path.starts_with('/') {
            path.insert(0, '/');
        }
        Self {
            port: env_parse("RPC_PORT", defaults.port),
            path,
            allow_origin: env_string("RPC_ALLOW_ORIGIN"),
            compress: env_parse("RPC_COMPRESS", defaults.compress),
            idle_timeout: match env_parse("RPC_IDLE_TIMEOUT_SECS", DEFAULT_IDLE_TIMEOUT_SECS) {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        }
    }
}

// =============================================================================
// SOCKETS
// =============================================================================

/// Frame encoding for outgoing socket messages. Incoming frames are decoded
/// by frame type regardless: text is JSON, binary is protobuf.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Encoding {
    #[default]
    Json,
    Protobuf,
}

impl FromStr for Encoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "protobuf" | "proto" => Ok(Self::Protobuf),
            other => Err(format!("unknown encoding: {other}")),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SocketConfig {
    pub encoding: Encoding,
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
