use super::config::{RedirectConfig, TlsRootConfig, TransportConfig, TransportSecurity};
use super::{Transport, TransportRequest, into_fetch_error};
use crate::error::{BoxError, FetchError, InvalidUriKind};
use crate::layers::{AbortLayer, SecureRedirectPolicy, UserAgentLayer};
use crate::response::{LimitedBody, ResponseBody};
use crate::tls;
use bytes::Bytes;
use futures::future::BoxFuture;
use http::Response;
use http_body_util::{BodyExt, Full};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use std::fmt;
use std::time::Duration;
use tower::timeout::TimeoutLayer;
use tower::util::BoxCloneSyncService;
use tower::{ServiceBuilder, ServiceExt};
use tower_http::decompression::DecompressionLayer;
use tower_http::follow_redirect::FollowRedirectLayer;

type TransportService = BoxCloneSyncService<TransportRequest, Response<ResponseBody>, FetchError>;

/// Default transport: pooled hyper client with rustls
///
/// Cloning is cheap; clones share the connection pool.
#[derive(Clone)]
pub struct HttpTransport {
    service: TransportService,
    max_body_size: usize,
    transport_security: TransportSecurity,
}

impl HttpTransport {
    /// Create a transport with default configuration
    ///
    /// # Errors
    /// Returns an error if TLS initialization fails
    pub fn new() -> Result<Self, FetchError> {
        HttpTransportBuilder::new().build()
    }

    #[must_use]
    pub fn builder() -> HttpTransportBuilder {
        HttpTransportBuilder::new()
    }

    /// Check the request address against the transport security mode.
    fn validate_uri(&self, uri: &http::Uri) -> Result<(), FetchError> {
        if uri.authority().is_none() {
            return Err(FetchError::InvalidUri {
                url: uri.to_string(),
                kind: InvalidUriKind::MissingAuthority,
                reason: "missing host/authority".to_owned(),
            });
        }

        match uri.scheme_str() {
            Some("https") => Ok(()),
            Some("http") => match self.transport_security {
                TransportSecurity::AllowInsecureHttp => Ok(()),
                TransportSecurity::TlsOnly => Err(FetchError::InvalidScheme {
                    scheme: "http".to_owned(),
                    reason: "HTTPS required (transport security is TlsOnly)".to_owned(),
                }),
            },
            Some(scheme) => Err(FetchError::InvalidScheme {
                scheme: scheme.to_owned(),
                reason: "only http:// and https:// schemes are supported".to_owned(),
            }),
            None => Err(FetchError::InvalidUri {
                url: uri.to_string(),
                kind: InvalidUriKind::MissingScheme,
                reason: "missing scheme".to_owned(),
            }),
        }
    }
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("max_body_size", &self.max_body_size)
            .field("transport_security", &self.transport_security)
            .finish_non_exhaustive()
    }
}

impl Transport for HttpTransport {
    fn send(
        &self,
        request: TransportRequest,
    ) -> BoxFuture<'static, Result<Response<ResponseBody>, FetchError>> {
        if let Err(err) = self.validate_uri(request.uri()) {
            return Box::pin(std::future::ready(Err(err)));
        }
        Box::pin(self.service.clone().oneshot(request))
    }

    fn max_body_size(&self) -> usize {
        self.max_body_size
    }
}

/// Builder for [`HttpTransport`]
///
/// # Example
///
/// ```ignore
/// let transport = HttpTransport::builder()
///     .timeout(Duration::from_secs(5))
///     .user_agent("my-app/1.0")
///     .redirect(RedirectConfig::same_origin())
///     .build()?;
/// let api = Fetcher::from_transport(transport);
/// ```
#[derive(Debug, Clone, Default)]
pub struct HttpTransportBuilder {
    config: TransportConfig,
}

impl HttpTransportBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_config(config: TransportConfig) -> Self {
        Self { config }
    }

    /// Set the per-request timeout
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Set the maximum response body size, counted after decompression
    #[must_use]
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.config.max_body_size = size;
        self
    }

    #[must_use]
    pub fn transport(mut self, transport: TransportSecurity) -> Self {
        self.config.transport = transport;
        self
    }

    /// Allow plain `http://` addresses
    ///
    /// Only available in debug builds or with the `allow-insecure-http`
    /// feature.
    #[must_use]
    #[cfg(any(debug_assertions, feature = "allow-insecure-http"))]
    pub fn allow_insecure_http(mut self) -> Self {
        tracing::warn!(
            target: "fetched_http::security",
            "allow_insecure_http() called - HTTP traffic will NOT be encrypted"
        );
        self.config.transport = TransportSecurity::AllowInsecureHttp;
        self
    }

    #[must_use]
    pub fn tls_roots(mut self, tls_roots: TlsRootConfig) -> Self {
        self.config.tls_roots = tls_roots;
        self
    }

    #[must_use]
    pub fn redirect(mut self, config: RedirectConfig) -> Self {
        self.config.redirect = config;
        self
    }

    #[must_use]
    pub fn max_redirects(mut self, max_redirects: usize) -> Self {
        self.config.redirect.max_redirects = max_redirects;
        self
    }

    /// Never follow redirects, whatever the request's redirect mode
    #[must_use]
    pub fn no_redirects(mut self) -> Self {
        self.config.redirect.max_redirects = 0;
        self
    }

    #[must_use]
    pub fn pool_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.pool_idle_timeout = timeout;
        self
    }

    #[must_use]
    pub fn pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.config.pool_max_idle_per_host = max;
        self
    }

    /// Build the transport
    ///
    /// # Errors
    /// Returns an error if TLS initialization fails or the user agent is not
    /// a valid header value
    pub fn build(self) -> Result<HttpTransport, FetchError> {
        let config = self.config;
        if config.transport == TransportSecurity::AllowInsecureHttp {
            tracing::warn!(
                "insecure HTTP enabled (TransportSecurity::AllowInsecureHttp); \
                 traffic to http:// addresses is not encrypted"
            );
        }

        let timeout = config.request_timeout;
        let max_body_size = config.max_body_size;

        let https = build_https_connector(config.tls_roots, config.transport)?;

        let mut client_builder = Client::builder(TokioExecutor::new());
        // pool_timer is required for pool_idle_timeout to work
        client_builder
            .pool_timer(TokioTimer::new())
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .http2_only(false);
        if let Some(idle_timeout) = config.pool_idle_timeout {
            client_builder.pool_idle_timeout(idle_timeout);
        }
        let hyper_client = client_builder.build::<_, Full<Bytes>>(https);

        let ua_layer = UserAgentLayer::try_new(&config.user_agent)?;
        let redirect_policy = SecureRedirectPolicy::new(config.redirect);

        // Request flow (outer → inner):
        //   Abort → ErrorMapping → BodyLimit → Timeout → UserAgent →
        //   Decompression → FollowRedirect → hyper_client
        //
        // Body limits apply to decompressed bytes.
        let service = ServiceBuilder::new()
            .layer(TimeoutLayer::new(timeout))
            .layer(ua_layer)
            .layer(DecompressionLayer::new())
            .layer(FollowRedirectLayer::with_policy(redirect_policy))
            .service(hyper_client)
            .map_response(move |response| limit_response(response, max_body_size))
            .map_err(move |e: tower::BoxError| map_tower_error(e, timeout));

        let service = ServiceBuilder::new().layer(AbortLayer).service(service);

        Ok(HttpTransport {
            service: BoxCloneSyncService::new(service),
            max_body_size,
            transport_security: config.transport,
        })
    }
}

/// Map tower errors to `FetchError` with the actual timeout duration
fn map_tower_error(err: tower::BoxError, timeout: Duration) -> FetchError {
    if err.is::<tower::timeout::error::Elapsed>() {
        return FetchError::Timeout(timeout);
    }
    into_fetch_error(err)
}

/// Box the decompressed body behind a size limit.
fn limit_response<B>(response: Response<B>, limit: usize) -> Response<ResponseBody>
where
    B: hyper::body::Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<BoxError>,
{
    let (parts, body) = response.into_parts();
    let body: ResponseBody = body.map_err(Into::into).boxed();
    let limited: ResponseBody = LimitedBody::new(body, limit)
        .map_err(|e| Box::new(e) as BoxError)
        .boxed();
    Response::from_parts(parts, limited)
}

/// Build the HTTPS connector with the specified TLS root configuration.
///
/// HTTP/2 is negotiated through ALPN (`enable_all_versions`).
///
/// # Errors
/// Returns `FetchError::Tls` if `TlsRootConfig::Native` is requested but no
/// valid root certificates are available from the OS certificate store.
fn build_https_connector(
    tls_roots: TlsRootConfig,
    transport: TransportSecurity,
) -> Result<HttpsConnector<HttpConnector>, FetchError> {
    let allow_http = transport == TransportSecurity::AllowInsecureHttp;

    let builder = match tls_roots {
        TlsRootConfig::WebPki => hyper_rustls::HttpsConnectorBuilder::new()
            .with_provider_and_webpki_roots(tls::get_crypto_provider())
            .map_err(|e| FetchError::Tls(Box::new(e)))?,
        TlsRootConfig::Native => {
            let client_config = tls::native_roots_client_config()?;
            hyper_rustls::HttpsConnectorBuilder::new().with_tls_config(client_config)
        }
    };

    let connector = if allow_http {
        builder.https_or_http().enable_all_versions().build()
    } else {
        builder.https_only().enable_all_versions().build()
    };
    Ok(connector)
}
