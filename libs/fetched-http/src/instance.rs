use crate::config::{Defaults, FetchInit, FetchOptions, Method, resolve_config};
use crate::dispatch::dispatch;
use crate::error::{BoxError, FetchError};
use crate::input::{FetchInput, resolve_input};
use crate::request::RequestBuilder;
use crate::response::{ResponseBody, Reply};
use crate::transport::{HttpTransportBuilder, ServiceTransport, Transport, TransportRequest};
use arc_swap::ArcSwap;
use http::Response;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tower::Service;

/// Request client with layered defaults
///
/// An instance holds its own default options plus one set of options per
/// verb, and sends requests through a [`Transport`]. Every request is
/// configured, lowest precedence first, by the instance defaults, the
/// defaults of its verb and the options given at the call site.
///
/// # Thread Safety
///
/// `Fetcher` is `Clone + Send + Sync`. Clones are handles to the same
/// instance: reconfiguring one is visible through all of them. Defaults are
/// replaced atomically, so a request always sees a consistent snapshot taken
/// when it is sent. Use [`Fetcher::with`] or [`Fetcher::create`] for an
/// independent instance.
///
/// # Example
///
/// ```ignore
/// let api = Fetcher::builder()
///     .base_url("https://api.example.com")
///     .header("authorization", "Bearer token")
///     .build()?;
///
/// let users = api.get("/users").query("page", "2").await?;
/// let created = api.post("/users").json(&new_user)?.await?;
/// ```
#[derive(Clone)]
pub struct Fetcher {
    transport: Arc<dyn Transport>,
    defaults: Arc<ArcSwap<Defaults>>,
}

impl Fetcher {
    /// Instance on the default [`HttpTransport`](crate::HttpTransport) with no defaults
    ///
    /// # Errors
    /// Returns an error if TLS initialization fails
    pub fn new() -> Result<Self, FetchError> {
        FetcherBuilder::new().build()
    }

    #[must_use]
    pub fn builder() -> FetcherBuilder {
        FetcherBuilder::new()
    }

    /// Instance sending requests through `transport`
    #[must_use]
    pub fn from_transport(transport: impl Transport) -> Self {
        Self::with_parts(Arc::new(transport), Defaults::default())
    }

    /// Instance sending requests through a tower service
    #[must_use]
    pub fn from_service<S>(service: S) -> Self
    where
        S: Service<TransportRequest, Response = Response<ResponseBody>>
            + Clone
            + Send
            + Sync
            + 'static,
        S::Error: Into<BoxError>,
        S::Future: Send + 'static,
    {
        Self::from_transport(ServiceTransport::new(service))
    }

    fn with_parts(transport: Arc<dyn Transport>, defaults: Defaults) -> Self {
        Self {
            transport,
            defaults: Arc::new(ArcSwap::from_pointee(defaults)),
        }
    }

    /// Brand new instance on the same transport, configured only by `init`
    #[must_use]
    pub fn create(&self, init: impl Into<FetchInit>) -> Fetcher {
        Self::with_parts(self.transport.clone(), Defaults::from_init(init.into()))
    }

    /// Independent instance starting from a copy of the current defaults,
    /// with `init` applied on top
    #[must_use]
    pub fn with(&self, init: impl Into<FetchInit>) -> Fetcher {
        let mut defaults = self.defaults.load().detached();
        defaults.apply(init.into());
        Self::with_parts(self.transport.clone(), defaults)
    }

    /// Drop every instance and verb default, then apply `init`.
    pub fn set(&self, init: impl Into<FetchInit>) -> &Self {
        self.defaults.store(Arc::new(Defaults::from_init(init.into())));
        tracing::debug!("instance defaults replaced");
        self
    }

    /// Apply `init` onto the current defaults.
    ///
    /// Verb-keyed options are assigned onto that verb's defaults, the rest
    /// onto the instance defaults. Fields `init` leaves undefined keep their
    /// value.
    pub fn configure(&self, init: impl Into<FetchInit>) -> &Self {
        let init = init.into();
        self.defaults.rcu(|current| {
            let mut next = Defaults::clone(current);
            next.apply(init.clone());
            next
        });
        tracing::debug!("instance defaults updated");
        self
    }

    /// Snapshot of the current defaults
    #[must_use]
    pub fn defaults(&self) -> Arc<Defaults> {
        self.defaults.load_full()
    }

    #[must_use]
    pub fn base_url(&self) -> Option<String> {
        self.defaults.load().options().base_url.clone()
    }

    /// Request with an arbitrary verb
    pub fn request(&self, method: Method, input: impl Into<FetchInput>) -> RequestBuilder {
        RequestBuilder::new(self.clone(), method, input.into())
    }

    /// `GET` request; the body is always dropped and the response transformed
    /// by default.
    pub fn get(&self, input: impl Into<FetchInput>) -> RequestBuilder {
        self.request(Method::Get, input)
    }

    /// `POST` request; transformed by default
    ///
    /// # Example
    ///
    /// ```ignore
    /// let reply = api
    ///     .post("/items")
    ///     .json(&serde_json::json!({ "name": "widget" }))?
    ///     .await?;
    /// ```
    pub fn post(&self, input: impl Into<FetchInput>) -> RequestBuilder {
        self.request(Method::Post, input)
    }

    pub fn put(&self, input: impl Into<FetchInput>) -> RequestBuilder {
        self.request(Method::Put, input)
    }

    pub fn patch(&self, input: impl Into<FetchInput>) -> RequestBuilder {
        self.request(Method::Patch, input)
    }

    pub fn delete(&self, input: impl Into<FetchInput>) -> RequestBuilder {
        self.request(Method::Delete, input)
    }

    /// `HEAD` request; the body is always dropped
    pub fn head(&self, input: impl Into<FetchInput>) -> RequestBuilder {
        self.request(Method::Head, input)
    }

    /// `OPTIONS` request; transformed by default
    pub fn options(&self, input: impl Into<FetchInput>) -> RequestBuilder {
        self.request(Method::Options, input)
    }

    pub fn trace(&self, input: impl Into<FetchInput>) -> RequestBuilder {
        self.request(Method::Trace, input)
    }

    pub fn connect(&self, input: impl Into<FetchInput>) -> RequestBuilder {
        self.request(Method::Connect, input)
    }

    /// Resolve and dispatch one request against the current defaults.
    pub(crate) async fn execute(
        &self,
        method: Method,
        input: FetchInput,
        call: FetchOptions,
    ) -> Result<Reply, FetchError> {
        let defaults = self.defaults.load_full();
        let resolved = resolve_config(
            method,
            [defaults.options(), defaults.method(method), &call],
        )?;
        let input = resolve_input(input, resolved.base_url.as_deref(), resolved.query.as_ref())?;
        dispatch(self.transport.clone(), input, resolved.effective).await
    }
}

impl fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fetcher")
            .field("defaults", &self.defaults.load_full())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Fetcher`]
///
/// Without an explicit transport, an [`HttpTransport`](crate::HttpTransport) is built from the
/// transport settings collected here.
///
/// # Example
///
/// ```ignore
/// let api = Fetcher::builder()
///     .http_transport(|http| http.timeout(Duration::from_secs(5)).max_redirects(3))
///     .init(FetchInit::from_json(&settings)?)
///     .build()?;
/// ```
pub struct FetcherBuilder {
    transport: Option<Arc<dyn Transport>>,
    http: HttpTransportBuilder,
    init: FetchInit,
}

impl FetcherBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            transport: None,
            http: HttpTransportBuilder::new(),
            init: FetchInit::default(),
        }
    }

    /// Use `transport` instead of building the default transport
    #[must_use]
    pub fn transport(mut self, transport: impl Transport) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Adjust the settings of the default transport
    #[must_use]
    pub fn http_transport(
        mut self,
        configure: impl FnOnce(HttpTransportBuilder) -> HttpTransportBuilder,
    ) -> Self {
        self.http = configure(self.http);
        self
    }

    /// Initial defaults; applied over anything set before
    #[must_use]
    pub fn init(mut self, init: impl Into<FetchInit>) -> Self {
        let init = init.into();
        self.init.options.assign(init.options);
        for (method, options) in init.methods {
            self.init.methods.entry(method).or_default().assign(options);
        }
        self
    }

    #[must_use]
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.init = self.init.base_url(base_url);
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.init = self.init.header(name, value);
        self
    }

    /// Build the instance
    ///
    /// # Errors
    /// Returns an error if the default transport cannot be built
    pub fn build(self) -> Result<Fetcher, FetchError> {
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(self.http.build()?),
        };
        Ok(Fetcher::with_parts(transport, Defaults::from_init(self.init)))
    }
}

impl Default for FetcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FetcherBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetcherBuilder")
            .field("custom_transport", &self.transport.is_some())
            .field("http", &self.http)
            .field("init", &self.init)
            .finish()
    }
}

static DEFAULT_INSTANCE: OnceLock<Fetcher> = OnceLock::new();

/// Process-wide default instance, built on first use.
///
/// # Errors
/// Returns an error if the default transport cannot be built; a later call
/// tries again.
pub fn api() -> Result<&'static Fetcher, FetchError> {
    if let Some(fetcher) = DEFAULT_INSTANCE.get() {
        return Ok(fetcher);
    }
    let fetcher = Fetcher::new()?;
    Ok(DEFAULT_INSTANCE.get_or_init(|| fetcher))
}

/// New instance on the default transport, configured by `init`
///
/// # Errors
/// Returns an error if the default transport cannot be built
pub fn create(init: impl Into<FetchInit>) -> Result<Fetcher, FetchError> {
    Fetcher::builder().init(init).build()
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::response::full_body;

    fn echo() -> Fetcher {
        Fetcher::from_service(tower::service_fn(|req: TransportRequest| async move {
            Ok::<_, FetchError>(Response::new(full_body(req.uri().to_string())))
        }))
    }

    #[test]
    fn test_every_verb_has_a_slot() {
        let api = echo().create(
            FetchInit::new().method(Method::Trace, FetchOptions::new().transform(true)),
        );
        let defaults = api.defaults();
        for method in Method::ALL {
            let expected = (method == Method::Trace).then_some(true);
            assert_eq!(defaults.method(method).transform, expected, "{method}");
        }
    }

    #[test]
    fn test_create_ignores_parent_defaults() {
        let parent = echo().create(FetchInit::new().base_url("https://a.test"));
        let child = parent.create(FetchInit::new().header("x-a", "1"));
        assert_eq!(child.base_url(), None);
        assert!(child.defaults().options().headers.is_some());
    }

    #[test]
    fn test_with_is_independent() {
        let parent = echo().create(FetchInit::new().base_url("https://a.test"));
        let child = parent.with(FetchInit::new().transform(false));
        child.configure(FetchInit::new().base_url("https://b.test"));

        assert_eq!(parent.base_url().as_deref(), Some("https://a.test"));
        assert_eq!(child.base_url().as_deref(), Some("https://b.test"));
        assert_eq!(parent.defaults().options().transform, None);
    }

    #[test]
    fn test_set_clears_then_configure_merges() {
        let api = echo().create(
            FetchInit::new()
                .base_url("https://a.test")
                .method(Method::Get, FetchOptions::new().transform(false)),
        );
        let handle = api.clone();

        api.configure(FetchInit::new().header("x-a", "1"));
        assert_eq!(handle.base_url().as_deref(), Some("https://a.test"));

        api.set(FetchInit::new().transform(true));
        let defaults = handle.defaults();
        assert_eq!(defaults.options().base_url, None);
        assert_eq!(defaults.options().transform, Some(true));
        assert_eq!(defaults.method(Method::Get).transform, None);
    }

    #[tokio::test]
    async fn test_request_reads_defaults_at_send_time() {
        let api = echo().create(FetchInit::new().base_url("https://a.test"));
        let pending = api.get("/x");
        api.configure(FetchInit::new().base_url("https://b.test"));

        let reply = pending.await.unwrap();
        assert_eq!(reply.as_text(), Some("https://b.test/x"));
    }

    #[test]
    fn test_builder_merges_init() {
        let api = Fetcher::builder()
            .transport(ServiceTransport::new(tower::service_fn(|_: TransportRequest| async {
                Ok::<_, FetchError>(Response::new(full_body("")))
            })))
            .base_url("https://a.test")
            .init(FetchInit::new().transform(true))
            .build()
            .unwrap();

        let defaults = api.defaults();
        assert_eq!(defaults.options().base_url.as_deref(), Some("https://a.test"));
        assert_eq!(defaults.options().transform, Some(true));
    }
}
