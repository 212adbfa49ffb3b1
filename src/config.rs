//! Client configuration
//!
//! Configuration is built in code or loaded from `ABATTOIR_*` environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Backend origin used when `ABATTOIR_API_URL` is not set
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

pub const LOGIN_PATH: &str = "/api/users/auth/login/";
pub const REFRESH_PATH: &str = "/api/users/auth/refresh/";
pub const LOGOUT_PATH: &str = "/api/users/logout/";

/// Configuration for the session manager and its HTTP client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Backend origin, without trailing slash
    pub base_url: String,

    /// Timeout applied to every request
    /// Default: 10 seconds
    pub timeout: Duration,

    /// A token expiring within this window is considered "expiring soon"
    /// Default: 5 minutes
    pub refresh_before_expiry: Duration,

    /// Check interval of the optional auto-refresh task
    /// Default: 30 seconds
    pub refresh_check_interval: Duration,

    /// Session file used by `FileStorage`, if any
    pub storage_path: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: normalize_base_url(&base_url.into()),
            timeout: Duration::from_secs(10),
            refresh_before_expiry: Duration::from_secs(5 * 60),
            refresh_check_interval: Duration::from_secs(30),
            storage_path: None,
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_vars(|key| env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let base_url = var("ABATTOIR_API_URL")
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let mut config = Self::new(base_url);

        if let Some(timeout) = secs_var(&var, "ABATTOIR_API_TIMEOUT_SECS") {
            config.timeout = timeout;
        }
        if let Some(window) = secs_var(&var, "ABATTOIR_REFRESH_BEFORE_EXPIRY_SECS") {
            config.refresh_before_expiry = window;
        }
        if let Some(interval) = secs_var(&var, "ABATTOIR_REFRESH_CHECK_INTERVAL_SECS") {
            config.refresh_check_interval = interval;
        }
        if let Some(path) = var("ABATTOIR_SESSION_FILE").filter(|p| !p.is_empty()) {
            config.storage_path = Some(PathBuf::from(path));
        }

        config
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_refresh_before_expiry(mut self, window: Duration) -> Self {
        self.refresh_before_expiry = window;
        self
    }

    pub fn with_refresh_check_interval(mut self, interval: Duration) -> Self {
        self.refresh_check_interval = interval;
        self
    }

    pub fn with_storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_path = Some(path.into());
        self
    }

    /// Absolute URL for an API path such as `/api/users/`
    pub fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }
}

fn normalize_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

fn secs_var(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<Duration> {
    let raw = var(key)?;
    match raw.trim().parse::<u64>() {
        Ok(secs) => Some(Duration::from_secs(secs)),
        Err(e) => {
            warn!(key, value = %raw, error = %e, "Ignoring invalid duration");
            None
        }
    }
}
