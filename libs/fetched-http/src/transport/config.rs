use std::collections::HashSet;
use std::time::Duration;

/// Default User-Agent string for outgoing requests
pub const DEFAULT_USER_AGENT: &str = concat!("fetched-http/", env!("CARGO_PKG_VERSION"));

/// Default maximum response body size (10 MB)
pub const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Configuration for redirect behavior of the default transport
///
/// Applies only to requests whose redirect mode is `Follow`; `Manual` and
/// `Error` requests never follow a redirect.
///
/// ## Example
///
/// ```rust,ignore
/// use fetched_http::RedirectConfig;
/// use std::collections::HashSet;
///
/// // Only follow redirects within the original origin or to a CDN
/// let config = RedirectConfig {
///     same_origin_only: true,
///     allowed_redirect_hosts: HashSet::from(["cdn.example.com".to_string()]),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct RedirectConfig {
    /// Maximum number of redirects to follow (default: 20)
    ///
    /// Set to `0` to disable redirect following entirely.
    pub max_redirects: usize,

    /// Only allow same-origin redirects (default: false)
    ///
    /// When `true`, redirects to different hosts are not followed unless the
    /// target host is in `allowed_redirect_hosts`.
    pub same_origin_only: bool,

    /// Hosts that are allowed as redirect targets even when `same_origin_only` is true
    ///
    /// **Note**: Entries should be hostnames only, without scheme or port.
    /// Example: `"cdn.example.com"`, not `"https://cdn.example.com"`.
    pub allowed_redirect_hosts: HashSet<String>,

    /// Strip sensitive headers on cross-origin redirects (default: true)
    ///
    /// When a redirect goes to a different origin, this removes the
    /// `Authorization`, `Cookie` and `Proxy-Authorization` headers.
    pub strip_sensitive_headers: bool,

    /// Allow HTTPS → HTTP downgrades (default: false)
    pub allow_https_downgrade: bool,
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self {
            max_redirects: 20,
            same_origin_only: false,
            allowed_redirect_hosts: HashSet::new(),
            strip_sensitive_headers: true,
            allow_https_downgrade: false,
        }
    }
}

impl RedirectConfig {
    /// Create a configuration that only follows same-origin redirects
    #[must_use]
    pub fn same_origin() -> Self {
        Self {
            same_origin_only: true,
            ..Default::default()
        }
    }

    /// Create a configuration that disables redirect following
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            max_redirects: 0,
            ..Default::default()
        }
    }

    /// Create a configuration for testing (allows HTTPS → HTTP)
    ///
    /// **WARNING**: Only use for local testing with mock servers.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            allow_https_downgrade: true,
            ..Default::default()
        }
    }
}

/// TLS root certificate configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum TlsRootConfig {
    /// Use Mozilla's root certificates (webpki-roots, no OS dependency)
    #[default]
    WebPki,
    /// Use OS native root certificate store
    Native,
}

/// Transport security configuration
///
/// Controls whether the transport enforces TLS or allows insecure HTTP.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportSecurity {
    /// Require TLS for all connections (HTTPS only)
    #[default]
    TlsOnly,
    /// Allow insecure HTTP connections
    ///
    /// **WARNING**: traffic is not encrypted. Intended for local services and
    /// mock servers.
    AllowInsecureHttp,
}

/// Configuration of the default hyper-based transport
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Per-request timeout (default: 30 seconds)
    pub request_timeout: Duration,

    /// Maximum response body size in bytes, after decompression (default: 10 MB)
    pub max_body_size: usize,

    /// User-Agent header value, sent unless the request sets its own
    pub user_agent: String,

    /// Transport security mode (default: `TlsOnly`)
    pub transport: TransportSecurity,

    /// TLS root certificate strategy (default: `WebPki`)
    pub tls_roots: TlsRootConfig,

    /// Redirect policy for requests in `Follow` mode
    pub redirect: RedirectConfig,

    /// Timeout for idle pooled connections (default: 90 seconds)
    ///
    /// Set to `None` to use hyper-util's default idle timeout.
    pub pool_idle_timeout: Option<Duration>,

    /// Maximum number of idle connections per host (default: 32)
    pub pool_max_idle_per_host: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            transport: TransportSecurity::TlsOnly,
            tls_roots: TlsRootConfig::default(),
            redirect: RedirectConfig::default(),
            pool_idle_timeout: Some(Duration::from_secs(90)),
            pool_max_idle_per_host: 32,
        }
    }
}

impl TransportConfig {
    /// Create configuration for testing with mock servers (allows insecure HTTP)
    ///
    /// **WARNING**: This configuration allows plain HTTP connections.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            max_body_size: 1024 * 1024,
            transport: TransportSecurity::AllowInsecureHttp,
            redirect: RedirectConfig::for_testing(),
            pool_idle_timeout: Some(Duration::from_secs(10)),
            pool_max_idle_per_host: 4,
            ..Default::default()
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_transport_config_default() {
        let config = TransportConfig::default();
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.max_body_size, DEFAULT_MAX_BODY_SIZE);
        assert_eq!(config.transport, TransportSecurity::TlsOnly);
        assert_eq!(config.tls_roots, TlsRootConfig::WebPki);
        assert!(config.user_agent.starts_with("fetched-http/"));
    }

    #[test]
    fn test_transport_config_for_testing() {
        let config = TransportConfig::for_testing();
        assert_eq!(config.transport, TransportSecurity::AllowInsecureHttp);
        assert!(config.redirect.allow_https_downgrade);
    }

    #[test]
    fn test_redirect_config_presets() {
        let config = RedirectConfig::default();
        assert_eq!(config.max_redirects, 20);
        assert!(!config.same_origin_only);
        assert!(config.strip_sensitive_headers);
        assert!(!config.allow_https_downgrade);

        assert!(RedirectConfig::same_origin().same_origin_only);
        assert_eq!(RedirectConfig::disabled().max_redirects, 0);
    }
}
