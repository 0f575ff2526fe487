use std::time::Duration;

use reqwest::Url;
use soundboard_protocol::STREAM_PATH;

use crate::error::{ClientError, Result};

pub const BASE_URL_ENV: &str = "SOUNDBOARD_BASE_URL";
pub const HTTP_TIMEOUT_ENV: &str = "SOUNDBOARD_HTTP_TIMEOUT_MS";
pub const CONNECT_TIMEOUT_ENV: &str = "SOUNDBOARD_CONNECT_TIMEOUT_MS";
pub const RECEIVE_TIMEOUT_ENV: &str = "SOUNDBOARD_RECEIVE_TIMEOUT_MS";

pub const DEFAULT_BASE_URL: &str = "http://localhost:8765";
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Engine address and timeouts shared by the control and data planes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    pub base_url: String,
    /// Bounds each control-plane call
    pub http_timeout: Duration,
    /// Bounds the data-plane handshake
    pub connect_timeout: Duration,
    /// Longest gap allowed between two complete data-plane messages
    pub receive_timeout: Duration,
    /// Largest reassembled data-plane message accepted
    pub max_message_size: usize,
}

impl Default for ClientOptions {
    /// Uses `SOUNDBOARD_BASE_URL` when set, otherwise `http://localhost:8765`.
    fn default() -> Self {
        let base_url = std::env::var(BASE_URL_ENV)
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self::new(base_url)
    }
}

impl ClientOptions {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Defaults plus the `SOUNDBOARD_*_TIMEOUT_MS` overrides.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            http_timeout: env_millis(HTTP_TIMEOUT_ENV).unwrap_or(defaults.http_timeout),
            connect_timeout: env_millis(CONNECT_TIMEOUT_ENV).unwrap_or(defaults.connect_timeout),
            receive_timeout: env_millis(RECEIVE_TIMEOUT_ENV).unwrap_or(defaults.receive_timeout),
            ..defaults
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    pub fn with_max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = bytes;
        self
    }

    /// Data-plane endpoint: `http` becomes `ws`, `https` becomes `wss`, and
    /// `/stream` is appended to the base path.
    pub fn stream_url(&self) -> Result<Url> {
        let mut url = self.parse_base()?;
        let scheme = match url.scheme() {
            "https" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme).map_err(|_| {
            ClientError::InvalidConfig(format!("cannot derive {scheme} url from {}", self.base_url))
        })?;
        let path = format!("{}{}", url.path().trim_end_matches('/'), STREAM_PATH);
        url.set_path(&path);
        Ok(url)
    }

    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn parse_base(&self) -> Result<Url> {
        Url::parse(&self.base_url)
            .map_err(|e| ClientError::InvalidConfig(format!("bad base url {:?}: {e}", self.base_url)))
    }
}

fn env_millis(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
}
