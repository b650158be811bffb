//! Per-request callbacks.
//!
//! Hooks are stored type-erased behind `Arc` so option records stay cheap to
//! clone. Response and error hooks are async and always awaited.

use crate::error::FetchError;
use crate::input::FetchRequest;
use crate::response::{FetchResponse, Reply};
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

type HookFuture<T> = BoxFuture<'static, Result<T, FetchError>>;
type ResponseFn = dyn Fn(FetchResponse, FetchRequest) -> HookFuture<Option<Reply>> + Send + Sync;
type ErrorFn = dyn Fn(FetchFailure) -> HookFuture<Reply> + Send + Sync;
type RequestFn = dyn Fn(&mut FetchRequest) + Send + Sync;

/// Everything known about a failed call
#[derive(Debug)]
pub struct FetchFailure {
    pub error: FetchError,
    /// The request as it was sent
    pub request: FetchRequest,
    /// The settled response, when the server answered
    pub response: Option<FetchResponse>,
}

/// Called with every successful response.
///
/// Returning `Ok(Some(reply))` makes `reply` the call result; `Ok(None)`
/// falls through to the default response handling. An `Err` is returned to
/// the caller as is.
#[derive(Clone)]
pub struct ResponseHook(Arc<ResponseFn>);

impl ResponseHook {
    pub fn new<F, Fut>(hook: F) -> Self
    where
        F: Fn(FetchResponse, FetchRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Reply>, FetchError>> + Send + 'static,
    {
        Self(Arc::new(move |response, request| Box::pin(hook(response, request))))
    }

    pub(crate) fn call(
        &self,
        response: FetchResponse,
        request: FetchRequest,
    ) -> HookFuture<Option<Reply>> {
        (self.0)(response, request)
    }
}

impl fmt::Debug for ResponseHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ResponseHook(..)")
    }
}

/// Called with every failure of the transport call or the response.
///
/// Its result becomes the call result.
#[derive(Clone)]
pub struct ErrorHook(Arc<ErrorFn>);

impl ErrorHook {
    pub fn new<F, Fut>(hook: F) -> Self
    where
        F: Fn(FetchFailure) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply, FetchError>> + Send + 'static,
    {
        Self(Arc::new(move |failure| Box::pin(hook(failure))))
    }

    pub(crate) fn call(&self, failure: FetchFailure) -> HookFuture<Reply> {
        (self.0)(failure)
    }
}

impl fmt::Debug for ErrorHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ErrorHook(..)")
    }
}

/// Inspects or edits the outgoing request right before the transport call
#[derive(Clone)]
pub struct RequestHook(Arc<RequestFn>);

impl RequestHook {
    pub fn new<F>(hook: F) -> Self
    where
        F: Fn(&mut FetchRequest) + Send + Sync + 'static,
    {
        Self(Arc::new(hook))
    }

    pub(crate) fn call(&self, request: &mut FetchRequest) {
        (self.0)(request);
    }
}

impl fmt::Debug for RequestHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RequestHook(..)")
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::config::Method;
    use http::{HeaderMap, StatusCode};
    use url::Url;

    fn request() -> FetchRequest {
        FetchRequest::new(Method::Get, Url::parse("https://api.test/a").unwrap())
    }

    #[tokio::test]
    async fn test_response_hook_receives_response_and_request() {
        let hook = ResponseHook::new(|response: FetchResponse, request: FetchRequest| async move {
            let status = response.status().as_u16();
            Ok(Some(Reply::Text(format!("{status} {}", request.url.path()))))
        });

        let response = FetchResponse::new(
            StatusCode::OK,
            HeaderMap::new(),
            Url::parse("https://api.test/a").unwrap(),
            "",
        );
        let reply = hook.call(response, request()).await.unwrap().unwrap();
        assert_eq!(reply.as_text(), Some("200 /a"));
    }

    #[tokio::test]
    async fn test_error_hook_result_is_returned() {
        let hook = ErrorHook::new(|failure: FetchFailure| async move {
            Ok(Reply::Text(format!("handled: {}", failure.error)))
        });

        let failure = FetchFailure {
            error: FetchError::Aborted,
            request: request(),
            response: None,
        };
        let reply = hook.call(failure).await.unwrap();
        assert_eq!(reply.as_text(), Some("handled: Request aborted"));
    }

    #[test]
    fn test_request_hook_edits_request() {
        let hook = RequestHook::new(|request: &mut FetchRequest| {
            request.headers.insert("x-trace", "1".parse().unwrap());
        });
        let mut request = request();
        hook.call(&mut request);
        assert_eq!(request.headers.get("x-trace").unwrap(), "1");
        assert_eq!(format!("{hook:?}"), "RequestHook(..)");
    }
}
