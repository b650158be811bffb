use crate::error::FetchError;
use futures::future::BoxFuture;
use http::Request;
use std::task::{Context, Poll};
use tokio_util::sync::CancellationToken;
use tower::{Layer, Service};

/// Tower layer that cancels requests through their abort signal
///
/// The signal is a [`CancellationToken`] carried in the request extensions.
/// Requests without one are passed through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct AbortLayer;

impl<S> Layer<S> for AbortLayer {
    type Service = AbortService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AbortService { inner }
    }
}

#[derive(Debug, Clone)]
pub struct AbortService<S> {
    inner: S,
}

impl<S, ReqBody> Service<Request<ReqBody>> for AbortService<S>
where
    S: Service<Request<ReqBody>, Error = FetchError>,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
{
    type Response = S::Response;
    type Error = FetchError;
    type Future = BoxFuture<'static, Result<S::Response, FetchError>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let Some(signal) = req.extensions().get::<CancellationToken>().cloned() else {
            return Box::pin(self.inner.call(req));
        };
        if signal.is_cancelled() {
            tracing::debug!("Request aborted before it was sent");
            return Box::pin(std::future::ready(Err(FetchError::Aborted)));
        }

        let future = self.inner.call(req);
        Box::pin(async move {
            tokio::select! {
                biased;
                () = signal.cancelled() => {
                    tracing::debug!("Request aborted in flight");
                    Err(FetchError::Aborted)
                }
                result = future => result,
            }
        })
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tower::ServiceExt;

    fn request(signal: Option<&CancellationToken>) -> Request<()> {
        let mut request = Request::new(());
        if let Some(signal) = signal {
            request.extensions_mut().insert(signal.clone());
        }
        request
    }

    #[tokio::test]
    async fn test_passes_through_without_signal() {
        let service = AbortLayer.layer(tower::service_fn(|_: Request<()>| async {
            Ok::<_, FetchError>("done")
        }));
        assert_eq!(service.oneshot(request(None)).await.unwrap(), "done");
    }

    #[tokio::test]
    async fn test_cancelled_signal_skips_inner_service() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let service = AbortLayer.layer(tower::service_fn(move |_: Request<()>| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, FetchError>(()) }
        }));

        let signal = CancellationToken::new();
        signal.cancel();

        let err = service.oneshot(request(Some(&signal))).await.unwrap_err();
        assert!(matches!(err, FetchError::Aborted));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_in_flight() {
        let service = AbortLayer.layer(tower::service_fn(|_: Request<()>| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok::<_, FetchError>(())
        }));

        let signal = CancellationToken::new();
        let canceller = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let err = service.oneshot(request(Some(&signal))).await.unwrap_err();
        assert!(matches!(err, FetchError::Aborted));
    }
}
