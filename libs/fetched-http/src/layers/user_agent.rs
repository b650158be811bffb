use crate::error::FetchError;
use http::header::USER_AGENT;
use http::{HeaderValue, Request};
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Tower layer that fills in the `User-Agent` header
#[derive(Debug, Clone)]
pub struct UserAgentLayer {
    user_agent: HeaderValue,
}

impl UserAgentLayer {
    /// # Errors
    /// Returns `FetchError::InvalidHeaderValue` if the user agent string is not
    /// a valid header value
    pub fn try_new(user_agent: impl AsRef<str>) -> Result<Self, FetchError> {
        Ok(Self {
            user_agent: HeaderValue::from_str(user_agent.as_ref())?,
        })
    }
}

impl<S> Layer<S> for UserAgentLayer {
    type Service = UserAgentService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        UserAgentService {
            inner,
            user_agent: self.user_agent.clone(),
        }
    }
}

/// Service that adds `User-Agent` to requests that carry none
#[derive(Debug, Clone)]
pub struct UserAgentService<S> {
    inner: S,
    user_agent: HeaderValue,
}

impl<S, ReqBody> Service<Request<ReqBody>> for UserAgentService<S>
where
    S: Service<Request<ReqBody>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        req.headers_mut()
            .entry(USER_AGENT)
            .or_insert_with(|| self.user_agent.clone());
        self.inner.call(req)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::Response;
    use http_body_util::Full;
    use tower::ServiceExt;

    async fn sent_user_agent(layer: &UserAgentLayer, request: Request<Full<Bytes>>) -> String {
        let echo = tower::service_fn(|req: Request<Full<Bytes>>| async move {
            let ua = req.headers()[USER_AGENT].to_str().unwrap().to_owned();
            Ok::<_, FetchError>(Response::new(ua))
        });
        layer
            .layer(echo)
            .oneshot(request)
            .await
            .unwrap()
            .into_body()
    }

    #[tokio::test]
    async fn test_user_agent_added() {
        let layer = UserAgentLayer::try_new("test-agent/1.0").unwrap();
        let request = Request::builder()
            .uri("https://example.com")
            .body(Full::new(Bytes::new()))
            .unwrap();

        assert_eq!(sent_user_agent(&layer, request).await, "test-agent/1.0");
    }

    #[tokio::test]
    async fn test_user_agent_not_overwritten() {
        let layer = UserAgentLayer::try_new("test-agent/1.0").unwrap();
        let request = Request::builder()
            .uri("https://example.com")
            .header(USER_AGENT, "custom-agent/2.0")
            .body(Full::new(Bytes::new()))
            .unwrap();

        assert_eq!(sent_user_agent(&layer, request).await, "custom-agent/2.0");
    }

    #[test]
    fn test_user_agent_layer_invalid_value() {
        let result = UserAgentLayer::try_new("invalid\x00agent");
        assert!(matches!(result, Err(FetchError::InvalidHeaderValue(_))));
    }
}
