//! Client configuration.

use std::time::Duration;

/// Root of the public ER:LC API.
pub const DEFAULT_BASE_URL: &str = "https://api.policeroleplay.community/v1";

/// Idle wait between dispatcher scans when nothing was eligible.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Upper bound on a single HTTP round-trip in the default transport.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Minimum severity a client emits. Ordered `Info < Warning < Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    #[default]
    Info,
    Warning,
    Error,
}

impl LogLevel {
    /// Whether an event at `level` passes this threshold.
    pub fn allows(self, level: LogLevel) -> bool {
        level >= self
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Endpoints are appended as `{base_url}/{endpoint}`.
    pub base_url: String,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub log_level: LogLevel,
}

impl ClientConfig {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            ..Self::default()
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            log_level: LogLevel::Info,
        }
    }
}
