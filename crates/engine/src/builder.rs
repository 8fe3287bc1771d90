//! # Builder for DownloaderConfig
//!
//! Fluent construction of [`DownloaderConfig`] values.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use hlsgrab_engine::DownloaderConfig;
//! use hlsgrab_engine::proxy::{ProxyAuth, ProxyConfig, ProxyType};
//!
//! let config = DownloaderConfig::builder()
//!     .with_timeout(Duration::from_secs(60))
//!     .with_connect_timeout(Duration::from_secs(15))
//!     .with_user_agent("MyApp/1.0")
//!     .with_header("Referer", "https://example.com/")
//!     .with_proxy(ProxyConfig {
//!         url: "http://proxy.example.com:8080".to_string(),
//!         proxy_type: ProxyType::Http,
//!         auth: Some(ProxyAuth {
//!             username: "user".to_string(),
//!             password: "pass".to_string(),
//!         }),
//!     })
//!     .build();
//! assert_eq!(config.timeout, Duration::from_secs(60));
//! ```

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::warn;

use crate::{DownloaderConfig, proxy::ProxyConfig};

/// Builder for creating DownloaderConfig instances with a fluent API
#[derive(Debug, Clone)]
pub struct DownloaderConfigBuilder {
    config: DownloaderConfig,
}

impl DownloaderConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: DownloaderConfig::default(),
        }
    }

    /// Set the overall timeout for a single HTTP request
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the connection timeout (time to establish initial connection)
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn with_pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.pool_idle_timeout = timeout;
        self
    }

    /// Set whether to follow redirects
    pub fn with_follow_redirects(mut self, follow: bool) -> Self {
        self.config.follow_redirects = follow;
        self
    }

    /// Set the user agent string
    pub fn with_user_agent<S: Into<String>>(mut self, user_agent: S) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Replace all headers
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.config.headers = headers;
        self
    }

    /// Add a single header. Invalid names or values are skipped with a warning.
    pub fn with_header<K: AsRef<str>, V: AsRef<str>>(mut self, name: K, value: V) -> Self {
        match (
            HeaderName::from_bytes(name.as_ref().as_bytes()),
            HeaderValue::from_str(value.as_ref()),
        ) {
            (Ok(name), Ok(value)) => {
                self.config.headers.insert(name, value);
            }
            _ => warn!(header = name.as_ref(), "Ignoring invalid HTTP header"),
        }
        self
    }

    /// Set an explicit proxy configuration
    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.config.proxy = Some(proxy);
        self.config.use_system_proxy = false;
        self
    }

    /// Set whether to use system proxy settings if available
    pub fn with_system_proxy(mut self, use_system_proxy: bool) -> Self {
        self.config.use_system_proxy = use_system_proxy;
        self
    }

    pub fn build(self) -> DownloaderConfig {
        self.config
    }
}

impl Default for DownloaderConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_overrides_default() {
        let config = DownloaderConfig::builder()
            .with_header("accept-language", "fr-FR")
            .with_header("bad header", "x")
            .build();
        assert_eq!(
            config.headers.get(reqwest::header::ACCEPT_LANGUAGE).unwrap(),
            "fr-FR"
        );
        assert!(config.headers.get("bad header").is_none());
    }

    #[test]
    fn explicit_proxy_disables_system_proxy() {
        let config = DownloaderConfig::builder()
            .with_proxy(ProxyConfig {
                url: "socks5://127.0.0.1:1080".to_string(),
                proxy_type: crate::proxy::ProxyType::Socks5,
                auth: None,
            })
            .build();
        assert!(config.proxy.is_some());
        assert!(!config.use_system_proxy);
    }
}
