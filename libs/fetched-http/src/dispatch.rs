//! Transport call and response handling.

use crate::body::encode_body;
use crate::config::{EffectiveConfig, RedirectMode};
use crate::error::FetchError;
use crate::hooks::{ErrorHook, FetchFailure};
use crate::input::{FetchInput, FetchRequest};
use crate::response::{FetchResponse, Reply};
use crate::transport::Transport;
use std::sync::Arc;
use tracing::Instrument;
use url::{Position, Url};

/// Send a resolved request and interpret the outcome.
///
/// Transport failures, refused redirects and non-2xx responses go to the
/// error hook when there is one; otherwise they are logged and returned.
/// A successful response goes through the response hook and, when enabled,
/// the JSON/text transform.
pub async fn dispatch(
    transport: Arc<dyn Transport>,
    input: FetchInput,
    config: EffectiveConfig,
) -> Result<Reply, FetchError> {
    let EffectiveConfig {
        method,
        headers,
        body,
        transform,
        redirect,
        signal,
        on_request,
        on_response,
        on_error,
    } = config;

    let mut request = match input {
        FetchInput::Request(request) => {
            let mut request = *request;
            request.method = method;
            if let Some(headers) = headers {
                request.headers = headers;
            }
            if body.is_some() {
                request.body = body;
            } else {
                let mut own_headers = Some(std::mem::take(&mut request.headers));
                request.body = encode_body(request.body.take(), &mut own_headers)?;
                request.headers = own_headers.unwrap_or_default();
            }
            if let Some(redirect) = redirect {
                request.redirect = redirect;
            }
            if signal.is_some() {
                request.signal = signal;
            }
            request
        }
        other => FetchRequest {
            method,
            url: other.to_url()?,
            headers: headers.unwrap_or_default(),
            body,
            redirect: redirect.unwrap_or_default(),
            signal,
        },
    };

    if let Some(hook) = &on_request {
        hook.call(&mut request);
    }
    let http_request = request.to_http()?;

    let span = tracing::info_span!(
        "fetch",
        http.method = %request.method,
        http.url = %sanitized(&request.url),
        http.status_code = tracing::field::Empty,
        error = tracing::field::Empty,
    );

    async move {
        let response = match exchange(transport.as_ref(), http_request, &request).await {
            Ok(response) => response,
            Err(error) => return handle_failure(on_error.as_ref(), error, request, None).await,
        };

        let status = response.status();
        tracing::Span::current().record("http.status_code", status.as_u16());

        if status.is_redirection() && request.redirect == RedirectMode::Error {
            let error = FetchError::RedirectBlocked {
                status,
                location: response.location().unwrap_or_default().to_owned(),
            };
            return handle_failure(on_error.as_ref(), error, request, Some(response)).await;
        }
        let manual_redirect = status.is_redirection() && request.redirect == RedirectMode::Manual;
        if !response.ok() && !manual_redirect {
            let error = response.status_error();
            return handle_failure(on_error.as_ref(), error, request, Some(response)).await;
        }

        if let Some(hook) = &on_response
            && let Some(reply) = hook.call(response.clone(), request).await?
        {
            return Ok(reply);
        }

        Ok(if transform && !response.bytes().is_empty() {
            transform_body(&response)
        } else {
            Reply::Response(response)
        })
    }
    .instrument(span)
    .await
}

/// Transport call plus body read; the abort signal covers the read too.
async fn exchange(
    transport: &dyn Transport,
    http_request: http::Request<http_body_util::Full<bytes::Bytes>>,
    request: &FetchRequest,
) -> Result<FetchResponse, FetchError> {
    let limit = transport.max_body_size();
    let response = transport.send(http_request).await?;
    let read = FetchResponse::read(response, request.url.clone(), limit);

    match &request.signal {
        Some(signal) => tokio::select! {
            biased;
            () = signal.cancelled() => Err(FetchError::Aborted),
            result = read => result,
        },
        None => read.await,
    }
}

async fn handle_failure(
    hook: Option<&ErrorHook>,
    error: FetchError,
    request: FetchRequest,
    response: Option<FetchResponse>,
) -> Result<Reply, FetchError> {
    tracing::Span::current().record("error", true);

    if let Some(hook) = hook {
        tracing::debug!(error = %error, "passing failure to error hook");
        return hook
            .call(FetchFailure {
                error,
                request,
                response,
            })
            .await;
    }

    tracing::warn!(
        error = %error,
        method = %request.method,
        url = %sanitized(&request.url),
        "unhandled request failure"
    );
    Err(error)
}

/// JSON when the body parses, text otherwise.
fn transform_body(response: &FetchResponse) -> Reply {
    match serde_json::from_slice(response.bytes()) {
        Ok(value) => Reply::Json(value),
        Err(_) => Reply::Text(response.text()),
    }
}

/// Address without query or fragment, safe for logs
fn sanitized(url: &Url) -> &str {
    &url[..Position::AfterPath]
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::config::Method;
    use crate::response::full_body;
    use crate::transport::{ServiceTransport, TransportRequest};
    use http::{Response, StatusCode};
    use serde_json::json;

    fn transport(status: u16, body: &'static str) -> Arc<dyn Transport> {
        Arc::new(ServiceTransport::new(tower::service_fn(
            move |_: TransportRequest| async move {
                Ok::<_, FetchError>(
                    Response::builder()
                        .status(status)
                        .header("location", "https://api.test/next")
                        .body(full_body(body))
                        .unwrap(),
                )
            },
        )))
    }

    fn config(method: Method, transform: bool) -> EffectiveConfig {
        EffectiveConfig {
            method,
            headers: None,
            body: None,
            transform,
            redirect: None,
            signal: None,
            on_request: None,
            on_response: None,
            on_error: None,
        }
    }

    fn input() -> FetchInput {
        FetchInput::from("https://api.test/items?token=secret")
    }

    #[test]
    fn test_sanitized_drops_query() {
        let url = Url::parse("https://api.test/items?token=secret#x").unwrap();
        assert_eq!(sanitized(&url), "https://api.test/items");
    }

    #[tokio::test]
    async fn test_transform_parses_json() {
        let reply = dispatch(transport(200, r#"{"a":1}"#), input(), config(Method::Get, true))
            .await
            .unwrap();
        assert_eq!(reply.as_json(), Some(&json!({ "a": 1 })));
    }

    #[tokio::test]
    async fn test_transform_falls_back_to_text() {
        let reply = dispatch(transport(200, "plain"), input(), config(Method::Get, true))
            .await
            .unwrap();
        assert_eq!(reply.as_text(), Some("plain"));
    }

    #[tokio::test]
    async fn test_empty_body_is_not_transformed() {
        let reply = dispatch(transport(204, ""), input(), config(Method::Get, true))
            .await
            .unwrap();
        assert_eq!(reply.as_response().unwrap().status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_without_transform_returns_response() {
        let reply = dispatch(transport(200, r#"{"a":1}"#), input(), config(Method::Put, false))
            .await
            .unwrap();
        assert!(reply.as_response().is_some());
    }

    #[tokio::test]
    async fn test_status_error_without_hook() {
        let err = dispatch(transport(404, "nope"), input(), config(Method::Get, true))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn test_redirect_modes() {
        let mut manual = config(Method::Get, true);
        manual.redirect = Some(RedirectMode::Manual);
        let reply = dispatch(transport(302, ""), input(), manual).await.unwrap();
        assert_eq!(reply.as_response().unwrap().location(), Some("https://api.test/next"));

        let mut refuse = config(Method::Get, true);
        refuse.redirect = Some(RedirectMode::Error);
        let err = dispatch(transport(302, ""), input(), refuse).await.unwrap_err();
        assert!(matches!(
            err,
            FetchError::RedirectBlocked { ref location, .. } if location == "https://api.test/next"
        ));
    }

    #[tokio::test]
    async fn test_descriptor_fields_used_unless_overridden() {
        let seen = Arc::new(std::sync::Mutex::new(None));
        let record = seen.clone();
        let transport: Arc<dyn Transport> = Arc::new(ServiceTransport::new(tower::service_fn(
            move |req: TransportRequest| {
                let record = record.clone();
                async move {
                    *record.lock().unwrap() = Some((
                        req.method().clone(),
                        req.headers().get("x-a").cloned(),
                    ));
                    Ok::<_, FetchError>(Response::new(full_body("")))
                }
            },
        )));

        let mut headers = http::HeaderMap::new();
        headers.insert("x-a", "descriptor".parse().unwrap());
        let descriptor = FetchRequest::new(Method::Get, Url::parse("https://api.test/d").unwrap())
            .with_headers(headers);

        dispatch(transport, descriptor.into(), config(Method::Patch, false))
            .await
            .unwrap();

        let (method, header) = seen.lock().unwrap().take().unwrap();
        assert_eq!(method, http::Method::PATCH);
        assert_eq!(header.unwrap(), "descriptor");
    }
}
