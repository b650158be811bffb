use crate::error::{BoxError, FetchError};
use bytes::Bytes;
use http::{HeaderMap, Response, StatusCode, Version};
use http_body::Frame;
use http_body_util::{BodyExt, Full};
use pin_project_lite::pin_project;
use serde::de::DeserializeOwned;
use std::pin::Pin;
use std::task::{Context, Poll};
use tower_http::follow_redirect::RequestUri;
use url::Url;

/// Maximum body preview size kept on status errors (8KB).
///
/// When a request returns a non-2xx status, the start of the response body is
/// included in the error for debugging.
pub const ERROR_BODY_PREVIEW_LIMIT: usize = 8 * 1024;

/// Type alias for the boxed response body produced by transports.
///
/// The body is type-erased so transports may decompress, limit or mock it
/// transparently.
pub type ResponseBody = http_body_util::combinators::BoxBody<Bytes, BoxError>;

/// Box a complete in-memory body as a [`ResponseBody`].
///
/// Useful for custom transports and tests.
#[must_use]
pub fn full_body(bytes: impl Into<Bytes>) -> ResponseBody {
    Full::new(bytes.into())
        .map_err(|never| match never {})
        .boxed()
}

pin_project! {
    /// Body wrapper that enforces size limits during streaming.
    ///
    /// Tracks bytes read and returns [`FetchError::BodyTooLarge`] once the
    /// limit is exceeded. The limit applies to decompressed bytes when placed
    /// after the decompression layer.
    pub struct LimitedBody {
        #[pin]
        inner: ResponseBody,
        limit: usize,
        read: usize,
    }
}

impl LimitedBody {
    /// Creates a new `LimitedBody` wrapping the given body with the specified limit.
    #[must_use]
    pub fn new(inner: ResponseBody, limit: usize) -> Self {
        Self {
            inner,
            limit,
            read: 0,
        }
    }

    /// Returns the number of bytes read so far.
    #[must_use]
    pub fn bytes_read(&self) -> usize {
        self.read
    }

    /// Returns the configured size limit.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }
}

impl http_body::Body for LimitedBody {
    type Data = Bytes;
    type Error = FetchError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();

        match this.inner.poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    *this.read += data.len();
                    if *this.read > *this.limit {
                        return Poll::Ready(Some(Err(FetchError::BodyTooLarge {
                            limit: *this.limit,
                            actual: *this.read,
                        })));
                    }
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(body_error(e)))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Recover a typed error from a boxed body error, or wrap it as transport failure.
fn body_error(err: BoxError) -> FetchError {
    match err.downcast::<FetchError>() {
        Ok(fetch_err) => *fetch_err,
        Err(other) => FetchError::Transport(other),
    }
}

/// A settled response with its body fully buffered.
///
/// Cloning is cheap and the body can be read any number of times.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    status: StatusCode,
    status_text: String,
    version: Version,
    headers: HeaderMap,
    url: Url,
    body: Bytes,
}

impl FetchResponse {
    /// Build a response from parts (for custom transports and tests).
    #[must_use]
    pub fn new(status: StatusCode, headers: HeaderMap, url: Url, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            status_text: status.canonical_reason().unwrap_or_default().to_owned(),
            version: Version::HTTP_11,
            headers,
            url,
            body: body.into(),
        }
    }

    /// Buffer a transport response, reading at most `limit` body bytes.
    ///
    /// `url` is replaced by the final address when redirects were followed.
    pub(crate) async fn read(
        response: Response<ResponseBody>,
        url: Url,
        limit: usize,
    ) -> Result<Self, FetchError> {
        let status_text = response
            .extensions()
            .get::<hyper::ext::ReasonPhrase>()
            .map(|reason| String::from_utf8_lossy(reason.as_bytes()).into_owned())
            .or_else(|| response.status().canonical_reason().map(str::to_owned))
            .unwrap_or_default();
        let url = response
            .extensions()
            .get::<RequestUri>()
            .and_then(|final_uri| Url::parse(&final_uri.0.to_string()).ok())
            .unwrap_or(url);
        let (parts, body) = response.into_parts();
        let body = read_body_limited(body, limit).await?;

        Ok(Self {
            status: parts.status,
            status_text,
            version: parts.version,
            headers: parts.headers,
            url,
            body,
        })
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// True for 2xx statuses
    #[must_use]
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Reason phrase sent by the server, or the canonical one for the status
    #[must_use]
    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    #[must_use]
    pub fn version(&self) -> Version {
        self.version
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Final address of the request, after any followed redirects
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    /// `Location` header of a redirect response
    #[must_use]
    pub fn location(&self) -> Option<&str> {
        self.headers
            .get(http::header::LOCATION)
            .and_then(|v| v.to_str().ok())
    }

    #[must_use]
    pub fn bytes(&self) -> &Bytes {
        &self.body
    }

    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        self.body
    }

    /// Body decoded as UTF-8; invalid sequences are replaced.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Parse the body as JSON.
    ///
    /// # Errors
    /// Returns `FetchError::Json` if the body is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, FetchError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Status error for this response, with a bounded body preview.
    pub(crate) fn status_error(&self) -> FetchError {
        let preview = &self.body[..self.body.len().min(ERROR_BODY_PREVIEW_LIMIT)];
        FetchError::HttpStatus {
            status: self.status,
            status_text: self.status_text.clone(),
            body_preview: String::from_utf8_lossy(preview).into_owned(),
            content_type: self.content_type().map(str::to_owned),
        }
    }
}

/// Value a request call resolves to
#[derive(Debug, Clone)]
pub enum Reply {
    /// Response body parsed as JSON
    Json(serde_json::Value),
    /// Response body as text (JSON parsing failed)
    Text(String),
    /// The response itself
    Response(FetchResponse),
}

impl Reply {
    #[must_use]
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Reply::Json(value) => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Reply::Text(text) => Some(text),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_response(&self) -> Option<&FetchResponse> {
        match self {
            Reply::Response(response) => Some(response),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_response(self) -> Option<FetchResponse> {
        match self {
            Reply::Response(response) => Some(response),
            _ => None,
        }
    }

    /// Deserialize the reply, whatever shape it took.
    ///
    /// # Errors
    /// Returns `FetchError::Json` if the content does not match `T`.
    pub fn into_json<T: DeserializeOwned>(self) -> Result<T, FetchError> {
        Ok(match self {
            Reply::Json(value) => serde_json::from_value(value)?,
            Reply::Text(text) => serde_json::from_str(&text)?,
            Reply::Response(response) => response.json()?,
        })
    }
}

impl From<serde_json::Value> for Reply {
    fn from(value: serde_json::Value) -> Self {
        Reply::Json(value)
    }
}

impl From<String> for Reply {
    fn from(value: String) -> Self {
        Reply::Text(value)
    }
}

impl From<&str> for Reply {
    fn from(value: &str) -> Self {
        Reply::Text(value.to_owned())
    }
}

impl From<FetchResponse> for Reply {
    fn from(value: FetchResponse) -> Self {
        Reply::Response(value)
    }
}

/// Read a body into memory, failing once more than `limit` bytes arrive.
///
/// The limit is enforced on the (possibly decompressed) bytes the body
/// yields, which protects against decompression bombs.
///
/// # Errors
/// Returns `FetchError::BodyTooLarge` once the limit is exceeded, or the
/// error of the frame that failed to arrive.
pub async fn read_body_limited(body: ResponseBody, limit: usize) -> Result<Bytes, FetchError> {
    let mut collected = Vec::new();
    let mut body = std::pin::pin!(body);

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(body_error)?;
        if let Some(chunk) = frame.data_ref() {
            if collected.len() + chunk.len() > limit {
                return Err(FetchError::BodyTooLarge {
                    limit,
                    actual: collected.len() + chunk.len(),
                });
            }
            collected.extend_from_slice(chunk);
        }
    }

    Ok(Bytes::from(collected))
}
