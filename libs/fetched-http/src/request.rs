use crate::body::Body;
use crate::config::{FetchOptions, Method, RedirectMode};
use crate::error::FetchError;
use crate::form::FormData;
use crate::headers::HeaderSource;
use crate::hooks::FetchFailure;
use crate::input::{FetchInput, FetchRequest};
use crate::instance::Fetcher;
use crate::params::SearchParams;
use crate::response::{FetchResponse, Reply};
use futures::future::BoxFuture;
use serde::Serialize;
use std::future::{Future, IntoFuture};
use tokio_util::sync::CancellationToken;

/// Call-site options of one request
///
/// Created by [`Fetcher::get`], [`Fetcher::post`], etc. Everything set here
/// takes precedence over the instance and verb defaults. The request is
/// sent by [`send()`](RequestBuilder::send) or by awaiting the builder.
///
/// # Example
///
/// ```ignore
/// // GET with query parameters, transformed into JSON
/// let reply = api.get("/users").query("page", "1").await?;
/// let users: Vec<User> = reply.into_json()?;
///
/// // POST with a form body, raw response wanted
/// let reply = api
///     .post("/token")
///     .header("authorization", "Basic xyz")
///     .form(&[("grant_type", "client_credentials")])?
///     .transform(false)
///     .send()
///     .await?;
/// ```
#[must_use = "RequestBuilder does nothing until .send() is called"]
pub struct RequestBuilder {
    fetcher: Fetcher,
    method: Method,
    input: FetchInput,
    options: FetchOptions,
}

impl RequestBuilder {
    pub(crate) fn new(fetcher: Fetcher, method: Method, input: FetchInput) -> Self {
        Self {
            fetcher,
            method,
            input,
            options: FetchOptions::default(),
        }
    }

    fn map(mut self, update: impl FnOnce(FetchOptions) -> FetchOptions) -> Self {
        self.options = update(self.options);
        self
    }

    /// Set a header, replacing any value the defaults give it.
    ///
    /// Names and values are validated when the request is sent.
    pub fn header(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.map(|o| o.header(name, value))
    }

    /// Add a header value alongside the ones the defaults give it
    pub fn append_header(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.map(|o| o.append_header(name, value))
    }

    pub fn headers(self, headers: impl Into<HeaderSource>) -> Self {
        self.map(|o| o.headers(headers))
    }

    pub fn append_headers(self, headers: impl Into<HeaderSource>) -> Self {
        self.map(|o| o.append_headers(headers))
    }

    /// Add a query parameter; replaces a default of the same name.
    pub fn query(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.map(|o| o.query(name, value))
    }

    pub fn query_params(self, params: impl Into<SearchParams>) -> Self {
        self.map(|o| o.query_params(params))
    }

    /// Request body, encoded according to its kind and the `content-type`
    /// header. Dropped for `GET` and `HEAD`.
    pub fn body(self, body: impl Into<Body>) -> Self {
        self.map(|o| o.body(body))
    }

    /// JSON body from any serializable value
    ///
    /// # Errors
    /// Returns `FetchError::Json` if serialization fails
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self, FetchError> {
        self.options = self.options.json(value)?;
        Ok(self)
    }

    /// URL-encoded form body
    ///
    /// # Errors
    /// Returns `FetchError::FormEncode` if `fields` cannot be encoded
    pub fn form<T: Serialize + ?Sized>(self, fields: &T) -> Result<Self, FetchError> {
        let params = SearchParams::from_serialize(fields)?;
        Ok(self.map(|o| o.body(params)))
    }

    /// `multipart/form-data` body
    pub fn multipart(self, form: FormData) -> Self {
        self.map(|o| o.body(form))
    }

    /// Parse the successful response body into JSON (or text)
    pub fn transform(self, transform: bool) -> Self {
        self.map(|o| o.transform(transform))
    }

    pub fn redirect(self, redirect: RedirectMode) -> Self {
        self.map(|o| o.redirect(redirect))
    }

    /// Abort the request when `signal` is cancelled
    pub fn signal(self, signal: CancellationToken) -> Self {
        self.map(|o| o.signal(signal))
    }

    pub fn base_url(self, base_url: impl Into<String>) -> Self {
        self.map(|o| o.base_url(base_url))
    }

    pub fn on_request<F>(self, hook: F) -> Self
    where
        F: Fn(&mut FetchRequest) + Send + Sync + 'static,
    {
        self.map(|o| o.on_request(hook))
    }

    pub fn on_response<F, Fut>(self, hook: F) -> Self
    where
        F: Fn(FetchResponse, FetchRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Reply>, FetchError>> + Send + 'static,
    {
        self.map(|o| o.on_response(hook))
    }

    pub fn on_error<F, Fut>(self, hook: F) -> Self
    where
        F: Fn(FetchFailure) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply, FetchError>> + Send + 'static,
    {
        self.map(|o| o.on_error(hook))
    }

    /// Assign every field `options` defines
    pub fn options(mut self, options: FetchOptions) -> Self {
        self.options.assign(options);
        self
    }

    /// Send the request
    ///
    /// Defaults are read now, not when the builder was created.
    ///
    /// # Errors
    /// Returns an error if the request cannot be built or sent, or the
    /// response is not successful, unless an error hook handles it.
    pub async fn send(self) -> Result<Reply, FetchError> {
        let Self {
            fetcher,
            method,
            input,
            options,
        } = self;
        fetcher.execute(method, input, options).await
    }
}

impl IntoFuture for RequestBuilder {
    type Output = Result<Reply, FetchError>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.send())
    }
}

impl std::fmt::Debug for RequestBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestBuilder")
            .field("method", &self.method)
            .field("input", &self.input)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::response::full_body;
    use crate::transport::TransportRequest;
    use http::Response;
    use http_body_util::BodyExt;
    use std::sync::{Arc, Mutex};

    type Seen = Arc<Mutex<Vec<(http::Method, String, http::HeaderMap, String)>>>;

    fn recording() -> (Fetcher, Seen) {
        let seen: Seen = Arc::default();
        let record = seen.clone();
        let fetcher = Fetcher::from_service(tower::service_fn(move |req: TransportRequest| {
            let record = record.clone();
            async move {
                let (parts, body) = req.into_parts();
                let body = body.collect().await.unwrap().to_bytes();
                record.lock().unwrap().push((
                    parts.method,
                    parts.uri.to_string(),
                    parts.headers,
                    String::from_utf8_lossy(&body).into_owned(),
                ));
                Ok::<_, FetchError>(Response::new(full_body("{}")))
            }
        }));
        (fetcher, seen)
    }

    #[tokio::test]
    async fn test_form_body_is_urlencoded() {
        let (api, seen) = recording();
        api.post("https://api.test/token")
            .form(&[("grant_type", "client_credentials"), ("scope", "a b")])
            .unwrap()
            .send()
            .await
            .unwrap();

        let (method, _, headers, body) = seen.lock().unwrap().remove(0);
        assert_eq!(method, http::Method::POST);
        assert_eq!(
            headers.get("content-type").unwrap(),
            "application/x-www-form-urlencoded;charset=UTF-8"
        );
        assert_eq!(body, "grant_type=client_credentials&scope=a+b");
    }

    #[tokio::test]
    async fn test_call_site_options_win() {
        let (api, seen) = recording();
        let api = api.create(
            crate::FetchInit::new()
                .base_url("https://api.test")
                .header("x-a", "default")
                .query("page", "1"),
        );

        api.get("/list")
            .header("x-a", "call")
            .query("page", "2")
            .options(FetchOptions::new().append_header("x-b", "1"))
            .await
            .unwrap();

        let (_, uri, headers, _) = seen.lock().unwrap().remove(0);
        assert_eq!(uri, "https://api.test/list?page=2");
        assert_eq!(headers.get("x-a").unwrap(), "call");
        assert_eq!(headers.get("x-b").unwrap(), "1");
    }

    #[tokio::test]
    async fn test_json_serialization_error_is_returned() {
        let (api, _) = recording();
        let mut map = std::collections::HashMap::new();
        map.insert(vec![1u8], 1);
        assert!(api.post("https://api.test").json(&map).is_err());
    }
}
