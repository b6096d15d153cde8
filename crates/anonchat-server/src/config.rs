//! Server configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! - `PORT`: HTTP/WebSocket listen port. Default: `3001`
//! - `ANONCHAT_BIND`: Listen address. Default: `0.0.0.0`
//! - `CLIENT_URL`: Origin allowed to call the server cross-origin.
//!   Default: `http://localhost:3000`
//! - `ANONCHAT_OUTBOUND_BUFFER`: Per-connection outbound event buffer. Default: `64`
//! - `ANONCHAT_MAX_FRAME_BYTES`: Largest accepted WebSocket message. Default: `65536`
//! - `ANONCHAT_LOG_FORMAT`: `pretty` or `json`. Default: `pretty`
//!
//! # Examples
//!
//! ```bash
//! PORT=8080 CLIENT_URL=https://chat.example.com cargo run -p anonchat-server
//! ```

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;

use anonchat_core::ChatError;
use tracing::info;

/// Default listen port.
pub const DEFAULT_PORT: u16 = 3001;

/// Default allowed cross-origin caller.
pub const DEFAULT_CLIENT_URL: &str = "http://localhost:3000";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable multi-line output for local development
    #[default]
    Pretty,
    /// One JSON object per line for log shippers
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(ChatError::config(format!(
                "ANONCHAT_LOG_FORMAT must be 'pretty' or 'json', got '{}'",
                other
            ))),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address
    pub bind: IpAddr,
    /// Listen port
    pub port: u16,
    /// Allowed CORS origin, normalized (scheme://host[:port])
    pub client_origin: String,
    /// Capacity of each connection's outbound event channel
    pub outbound_buffer: usize,
    /// Largest accepted WebSocket message, in bytes
    pub max_frame_bytes: usize,
    /// Log output format
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            client_origin: DEFAULT_CLIENT_URL.to_string(),
            outbound_buffer: 64,
            max_frame_bytes: 64 * 1024,
            log_format: LogFormat::default(),
        }
    }
}

impl ServerConfig {
    /// Load server configuration from environment variables.
    pub fn from_env() -> Result<Self, ChatError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    ///
    /// Unset keys fall back to defaults; set but invalid keys are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ChatError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let bind = parse_or(&lookup, "ANONCHAT_BIND", defaults.bind)?;
        let port = parse_or(&lookup, "PORT", defaults.port)?;
        let outbound_buffer = parse_or(&lookup, "ANONCHAT_OUTBOUND_BUFFER", defaults.outbound_buffer)?;
        let max_frame_bytes = parse_or(&lookup, "ANONCHAT_MAX_FRAME_BYTES", defaults.max_frame_bytes)?;
        let log_format = match lookup("ANONCHAT_LOG_FORMAT") {
            Some(value) => value.parse()?,
            None => defaults.log_format,
        };
        let client_origin = match lookup("CLIENT_URL") {
            Some(value) => normalize_origin(&value)?,
            None => defaults.client_origin,
        };

        if outbound_buffer == 0 {
            return Err(ChatError::config("ANONCHAT_OUTBOUND_BUFFER must be at least 1"));
        }
        if max_frame_bytes == 0 {
            return Err(ChatError::config("ANONCHAT_MAX_FRAME_BYTES must be at least 1"));
        }

        Ok(Self {
            bind,
            port,
            client_origin,
            outbound_buffer,
            max_frame_bytes,
            log_format,
        })
    }

    /// Address to listen on.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    /// Log the current server configuration.
    pub fn log_config(&self) {
        info!("Listening address: {}", self.socket_addr());
        info!("Allowed client origin: {}", self.client_origin);
        info!(
            outbound_buffer = self.outbound_buffer,
            max_frame_bytes = self.max_frame_bytes,
            log_format = %self.log_format,
            "Connection limits"
        );
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ChatError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|e| ChatError::config(format!("{} has invalid value '{}': {}", key, value, e))),
        None => Ok(default),
    }
}

/// Reduce a client URL to the origin a browser sends (`scheme://host[:port]`).
fn normalize_origin(value: &str) -> Result<String, ChatError> {
    let url = url::Url::parse(value.trim())
        .map_err(|e| ChatError::config(format!("CLIENT_URL '{}' is not a URL: {}", value, e)))?;

    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(ChatError::config(format!(
            "CLIENT_URL '{}' must be an http(s) origin",
            value
        )));
    }

    Ok(url.origin().ascii_serialization())
}
