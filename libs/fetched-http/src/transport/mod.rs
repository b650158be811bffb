//! The function that actually performs requests.
//!
//! Instances talk to the network through a [`Transport`]. The default one is
//! [`HttpTransport`]; any tower service over `http` types can be used through
//! [`ServiceTransport`].

mod client;
mod config;

pub use self::client::{HttpTransport, HttpTransportBuilder};
pub use self::config::{
    DEFAULT_MAX_BODY_SIZE, DEFAULT_USER_AGENT, RedirectConfig, TlsRootConfig, TransportConfig,
    TransportSecurity,
};

use crate::error::{BoxError, FetchError};
use crate::response::ResponseBody;
use bytes::Bytes;
use futures::future::BoxFuture;
use http::{Request, Response};
use http_body_util::Full;
use tower::{Service, ServiceExt};

/// Outgoing request as handed to a transport
pub type TransportRequest = Request<Full<Bytes>>;

/// Performs a single request.
///
/// The redirect mode ([`RedirectMode`](crate::RedirectMode)) and the abort
/// signal ([`CancellationToken`](tokio_util::sync::CancellationToken)) of the
/// request travel in its extensions. Any settled response, whatever its
/// status, is `Ok`.
pub trait Transport: Send + Sync + 'static {
    fn send(
        &self,
        request: TransportRequest,
    ) -> BoxFuture<'static, Result<Response<ResponseBody>, FetchError>>;

    /// Largest response body that will be buffered
    fn max_body_size(&self) -> usize {
        usize::MAX
    }
}

/// Adapts a tower service into a [`Transport`]
///
/// # Example
///
/// ```ignore
/// let transport = ServiceTransport::new(tower::service_fn(|req: TransportRequest| async move {
///     Ok::<_, FetchError>(Response::new(full_body("pong")))
/// }));
/// let api = Fetcher::from_transport(transport);
/// ```
#[derive(Debug, Clone)]
pub struct ServiceTransport<S> {
    service: S,
}

impl<S> ServiceTransport<S> {
    #[must_use]
    pub fn new(service: S) -> Self {
        Self { service }
    }
}

impl<S> Transport for ServiceTransport<S>
where
    S: Service<TransportRequest, Response = Response<ResponseBody>> + Clone + Send + Sync + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send + 'static,
{
    fn send(
        &self,
        request: TransportRequest,
    ) -> BoxFuture<'static, Result<Response<ResponseBody>, FetchError>> {
        let service = self.service.clone();
        Box::pin(async move { service.oneshot(request).await.map_err(into_fetch_error) })
    }
}

/// Recover a typed error from a boxed service error, or wrap it as transport failure.
pub fn into_fetch_error(err: impl Into<BoxError>) -> FetchError {
    match err.into().downcast::<FetchError>() {
        Ok(fetch_err) => *fetch_err,
        Err(other) => FetchError::Transport(other),
    }
}
