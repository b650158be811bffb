//! Request configuration layers and their resolution.
//!
//! A request is configured by up to three [`FetchOptions`] layers: instance
//! defaults, method defaults and the call site. [`resolve_config`] folds them
//! into the [`EffectiveConfig`] used for dispatch.

use crate::body::{Body, encode_body};
use crate::error::FetchError;
use crate::headers::{HeaderMode, HeaderSource, merge_headers};
use crate::hooks::{ErrorHook, FetchFailure, RequestHook, ResponseHook};
use crate::input::FetchRequest;
use crate::params::SearchParams;
use crate::response::{FetchResponse, Reply};
use crate::value::{self, Value};
use figment::Figment;
use figment::providers::{Format, Json};
use http::HeaderMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use tokio_util::sync::CancellationToken;

/// HTTP verbs an instance exposes a constructor for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
    Trace,
    Connect,
}

impl Method {
    /// Number of verbs; every instance holds one options slot per verb.
    pub const COUNT: usize = 9;

    pub const ALL: [Method; Self::COUNT] = [
        Method::Get,
        Method::Post,
        Method::Put,
        Method::Patch,
        Method::Delete,
        Method::Head,
        Method::Options,
        Method::Trace,
        Method::Connect,
    ];

    /// Lowercase verb name, as used for method-keyed settings
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Method::Get => "get",
            Method::Post => "post",
            Method::Put => "put",
            Method::Patch => "patch",
            Method::Delete => "delete",
            Method::Head => "head",
            Method::Options => "options",
            Method::Trace => "trace",
            Method::Connect => "connect",
        }
    }

    #[must_use]
    pub fn to_http(self) -> http::Method {
        match self {
            Method::Get => http::Method::GET,
            Method::Post => http::Method::POST,
            Method::Put => http::Method::PUT,
            Method::Patch => http::Method::PATCH,
            Method::Delete => http::Method::DELETE,
            Method::Head => http::Method::HEAD,
            Method::Options => http::Method::OPTIONS,
            Method::Trace => http::Method::TRACE,
            Method::Connect => http::Method::CONNECT,
        }
    }

    /// Whether responses are transformed when no layer says otherwise
    #[must_use]
    pub const fn default_transform(self) -> bool {
        matches!(self, Method::Get | Method::Post | Method::Options)
    }

    /// Verbs that never carry a request body
    #[must_use]
    pub const fn forbids_body(self) -> bool {
        matches!(self, Method::Get | Method::Head)
    }

    const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_http().as_str())
    }
}

impl FromStr for Method {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Method::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| figment::Error::from(format!("unknown HTTP method '{s}'")).into())
    }
}

/// How the transport treats redirect responses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedirectMode {
    /// Follow redirects transparently
    #[default]
    Follow,
    /// Return the redirect response itself
    Manual,
    /// Fail with `FetchError::RedirectBlocked`
    Error,
}

/// One layer of request options.
///
/// Every field is optional; an undefined field leaves earlier layers in
/// effect.
///
/// # Example
///
/// ```ignore
/// let options = FetchOptions::new()
///     .base_url("https://api.example.com")
///     .header("authorization", "Bearer token")
///     .query("version", "2")
///     .transform(true);
/// ```
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub base_url: Option<String>,
    /// Query parameters appended to the address
    pub query: Option<SearchParams>,
    /// Headers that replace values of the same name
    pub headers: Option<HeaderSource>,
    /// Headers added alongside values of the same name
    pub append_headers: Option<HeaderSource>,
    pub body: Option<Body>,
    /// Parse successful bodies into JSON (or text)
    pub transform: Option<bool>,
    pub redirect: Option<RedirectMode>,
    pub signal: Option<CancellationToken>,
    pub on_request: Option<RequestHook>,
    pub on_response: Option<ResponseHook>,
    pub on_error: Option<ErrorHook>,
}

impl FetchOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Add a query parameter, replacing an earlier one of the same name
    #[must_use]
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query
            .get_or_insert_with(SearchParams::new)
            .set(name, value);
        self
    }

    #[must_use]
    pub fn query_params(mut self, params: impl Into<SearchParams>) -> Self {
        self.query = Some(params.into());
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        push_header(&mut self.headers, name, value);
        self
    }

    #[must_use]
    pub fn headers(mut self, headers: impl Into<HeaderSource>) -> Self {
        self.headers = Some(headers.into());
        self
    }

    #[must_use]
    pub fn append_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        push_header(&mut self.append_headers, name, value);
        self
    }

    #[must_use]
    pub fn append_headers(mut self, headers: impl Into<HeaderSource>) -> Self {
        self.append_headers = Some(headers.into());
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Structured body from any serializable value.
    ///
    /// # Errors
    /// Returns `FetchError::Json` if `value` cannot be represented as JSON data.
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self, FetchError> {
        self.body = Some(Body::json(value)?);
        Ok(self)
    }

    #[must_use]
    pub fn transform(mut self, transform: bool) -> Self {
        self.transform = Some(transform);
        self
    }

    #[must_use]
    pub fn redirect(mut self, redirect: RedirectMode) -> Self {
        self.redirect = Some(redirect);
        self
    }

    #[must_use]
    pub fn signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }

    #[must_use]
    pub fn on_request<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut FetchRequest) + Send + Sync + 'static,
    {
        self.on_request = Some(RequestHook::new(hook));
        self
    }

    #[must_use]
    pub fn on_response<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(FetchResponse, FetchRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Reply>, FetchError>> + Send + 'static,
    {
        self.on_response = Some(ResponseHook::new(hook));
        self
    }

    #[must_use]
    pub fn on_error<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(FetchFailure) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply, FetchError>> + Send + 'static,
    {
        self.on_error = Some(ErrorHook::new(hook));
        self
    }

    /// Assign every field `other` defines onto `self`.
    pub fn assign(&mut self, other: FetchOptions) {
        let FetchOptions {
            base_url,
            query,
            headers,
            append_headers,
            body,
            transform,
            redirect,
            signal,
            on_request,
            on_response,
            on_error,
        } = other;

        assign(&mut self.base_url, base_url);
        assign(&mut self.query, query);
        assign(&mut self.headers, headers);
        assign(&mut self.append_headers, append_headers);
        assign(&mut self.body, body);
        assign(&mut self.transform, transform);
        assign(&mut self.redirect, redirect);
        assign(&mut self.signal, signal);
        assign(&mut self.on_request, on_request);
        assign(&mut self.on_response, on_response);
        assign(&mut self.on_error, on_error);
    }

    /// Copy with structured bodies copied into fresh storage
    #[must_use]
    pub(crate) fn detached(&self) -> Self {
        let mut copy = self.clone();
        if let Some(Body::Value(body)) = &self.body {
            copy.body = Some(Body::Value(value::deep_clone(body)));
        }
        copy
    }
}

fn assign<T>(target: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *target = value;
    }
}

fn push_header(
    target: &mut Option<HeaderSource>,
    name: impl Into<String>,
    value: impl Into<String>,
) {
    target
        .get_or_insert_with(|| HeaderSource::Pairs(Vec::new()))
        .push(name, value);
}

/// Options for creating or reconfiguring an instance.
///
/// Unkeyed options become instance defaults; options keyed by a [`Method`]
/// become that verb's defaults.
///
/// # Example
///
/// ```ignore
/// let init = FetchInit::new()
///     .base_url("https://api.example.com")
///     .method(Method::Delete, FetchOptions::new().transform(true));
/// let api = fetched_http::create(init)?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct FetchInit {
    pub options: FetchOptions,
    pub methods: BTreeMap<Method, FetchOptions>,
}

impl FetchInit {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the instance-level options
    #[must_use]
    pub fn options(mut self, options: FetchOptions) -> Self {
        self.options = options;
        self
    }

    /// Options for a single verb; repeated calls for one verb are assigned
    /// onto each other.
    #[must_use]
    pub fn method(mut self, method: Method, options: FetchOptions) -> Self {
        self.methods.entry(method).or_default().assign(options);
        self
    }

    #[must_use]
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.options.base_url = Some(base_url.into());
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        push_header(&mut self.options.headers, name, value);
        self
    }

    #[must_use]
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options = self.options.query(name, value);
        self
    }

    #[must_use]
    pub fn transform(mut self, transform: bool) -> Self {
        self.options.transform = Some(transform);
        self
    }

    /// Build from deserialized settings.
    #[must_use]
    pub fn from_settings(settings: FetchSettings) -> Self {
        let FetchSettings {
            defaults,
            get,
            post,
            put,
            patch,
            delete,
            head,
            options,
            trace,
            connect,
        } = settings;

        let keyed = [
            (Method::Get, get),
            (Method::Post, post),
            (Method::Put, put),
            (Method::Patch, patch),
            (Method::Delete, delete),
            (Method::Head, head),
            (Method::Options, options),
            (Method::Trace, trace),
            (Method::Connect, connect),
        ];

        Self {
            options: defaults.into(),
            methods: keyed
                .into_iter()
                .filter_map(|(method, settings)| settings.map(|s| (method, s.into())))
                .collect(),
        }
    }

    /// Extract settings from layered configuration sources.
    ///
    /// # Errors
    /// Returns `FetchError::Config` if the sources do not hold valid settings.
    pub fn from_figment(figment: &Figment) -> Result<Self, FetchError> {
        let settings: FetchSettings = figment.extract()?;
        tracing::debug!(
            base_url = settings.defaults.base_url.as_deref(),
            "loaded fetch settings"
        );
        Ok(Self::from_settings(settings))
    }

    /// Parse settings from a JSON document.
    ///
    /// # Errors
    /// Returns `FetchError::Config` if the document does not hold valid settings.
    pub fn from_json(json: &str) -> Result<Self, FetchError> {
        Self::from_figment(&Figment::from(Json::string(json)))
    }
}

impl From<FetchOptions> for FetchInit {
    fn from(options: FetchOptions) -> Self {
        Self {
            options,
            methods: BTreeMap::new(),
        }
    }
}

/// Serializable subset of [`FetchOptions`]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OptionSettings {
    #[serde(alias = "baseURL", alias = "baseUrl")]
    pub base_url: Option<String>,
    #[serde(alias = "params")]
    pub query: Option<SearchParams>,
    pub headers: Option<HeaderSource>,
    #[serde(alias = "appendHeaders")]
    pub append_headers: Option<HeaderSource>,
    pub body: Option<Value>,
    pub transform: Option<bool>,
    pub redirect: Option<RedirectMode>,
}

impl From<OptionSettings> for FetchOptions {
    fn from(settings: OptionSettings) -> Self {
        Self {
            base_url: settings.base_url,
            query: settings.query,
            headers: settings.headers,
            append_headers: settings.append_headers,
            body: settings.body.map(Body::Value),
            transform: settings.transform,
            redirect: settings.redirect,
            ..Self::default()
        }
    }
}

/// Instance settings as read from configuration files or the environment.
///
/// ```yaml
/// base_url: https://api.example.com
/// headers:
///   x-client: demo
/// transform: true
/// delete:
///   transform: true
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    #[serde(flatten)]
    pub defaults: OptionSettings,
    pub get: Option<OptionSettings>,
    pub post: Option<OptionSettings>,
    pub put: Option<OptionSettings>,
    pub patch: Option<OptionSettings>,
    pub delete: Option<OptionSettings>,
    pub head: Option<OptionSettings>,
    pub options: Option<OptionSettings>,
    pub trace: Option<OptionSettings>,
    pub connect: Option<OptionSettings>,
}

/// Configuration held by an instance: its own options plus one slot per verb
#[derive(Debug, Clone, Default)]
pub struct Defaults {
    options: FetchOptions,
    methods: [FetchOptions; Method::COUNT],
}

impl Defaults {
    /// Defaults seeded from `init`
    #[must_use]
    pub fn from_init(init: FetchInit) -> Self {
        let mut defaults = Self::default();
        defaults.apply(init);
        defaults
    }

    /// Instance-wide options
    #[must_use]
    pub fn options(&self) -> &FetchOptions {
        &self.options
    }

    /// Options of one verb
    #[must_use]
    pub fn method(&self, method: Method) -> &FetchOptions {
        &self.methods[method.index()]
    }

    /// Assign `init` onto the current defaults.
    pub fn apply(&mut self, init: FetchInit) {
        self.options.assign(init.options);
        for (method, options) in init.methods {
            self.methods[method.index()].assign(options);
        }
    }

    /// Independent copy; structured bodies do not share storage.
    #[must_use]
    pub fn detached(&self) -> Self {
        Self {
            options: self.options.detached(),
            methods: std::array::from_fn(|i| self.methods[i].detached()),
        }
    }
}

/// Options in effect for a single request
#[derive(Debug, Clone)]
pub struct EffectiveConfig {
    pub method: Method,
    pub headers: Option<HeaderMap>,
    /// Encoded body; always `None` for `GET` and `HEAD`
    pub body: Option<Body>,
    pub transform: bool,
    pub redirect: Option<RedirectMode>,
    pub signal: Option<CancellationToken>,
    pub on_request: Option<RequestHook>,
    pub on_response: Option<ResponseHook>,
    pub on_error: Option<ErrorHook>,
}

/// Effective configuration plus the fields used to resolve the address
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub base_url: Option<String>,
    pub query: Option<SearchParams>,
    pub effective: EffectiveConfig,
}

/// Merge option layers, lowest precedence first, into the configuration of
/// one request.
///
/// Defined fields of later layers win. Query parameters accumulate across
/// layers, later values replacing earlier ones per name. Headers are merged
/// in layer order, `headers` before `append_headers` within a layer. The body
/// is dropped for `GET` and `HEAD`, then encoded.
///
/// # Errors
/// Returns an error when headers are invalid or the body cannot be encoded.
pub fn resolve_config<'a, I>(method: Method, layers: I) -> Result<ResolvedConfig, FetchError>
where
    I: IntoIterator<Item = &'a FetchOptions>,
{
    let mut merged = FetchOptions::default();
    let mut query: Option<SearchParams> = None;
    let mut header_sources = Vec::new();

    for layer in layers {
        if let Some(params) = &layer.query {
            query.get_or_insert_with(SearchParams::new).merge_set(params);
        }
        if let Some(headers) = &layer.headers {
            header_sources.push((HeaderMode::Set, headers));
        }
        if let Some(headers) = &layer.append_headers {
            header_sources.push((HeaderMode::Append, headers));
        }
        merged.assign(FetchOptions {
            base_url: layer.base_url.clone(),
            body: layer.body.clone(),
            transform: layer.transform,
            redirect: layer.redirect,
            signal: layer.signal.clone(),
            on_request: layer.on_request.clone(),
            on_response: layer.on_response.clone(),
            on_error: layer.on_error.clone(),
            ..FetchOptions::default()
        });
    }

    let mut headers = merge_headers(header_sources)?;
    let body = if method.forbids_body() {
        None
    } else {
        merged.body
    };
    let body = encode_body(body, &mut headers)?;
    let transform = merged
        .transform
        .unwrap_or_else(|| method.default_transform());

    tracing::debug!(
        method = %method,
        transform,
        has_body = body.is_some(),
        "resolved request configuration"
    );

    Ok(ResolvedConfig {
        base_url: merged.base_url.map(|b| b.trim().to_owned()),
        query,
        effective: EffectiveConfig {
            method,
            headers,
            body,
            transform,
            redirect: merged.redirect,
            signal: merged.signal,
            on_request: merged.on_request,
            on_response: merged.on_response,
            on_error: merged.on_error,
        },
    })
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use http::header::CONTENT_TYPE;
    use serde_json::json;

    fn content_type(config: &ResolvedConfig) -> Option<&str> {
        config
            .effective
            .headers
            .as_ref()
            .and_then(|h| h.get(CONTENT_TYPE))
            .map(|v| v.to_str().unwrap())
    }

    #[test]
    fn test_default_transform_per_method() {
        for method in Method::ALL {
            let config = resolve_config(method, [&FetchOptions::new()]).unwrap();
            let expected = matches!(method, Method::Get | Method::Post | Method::Options);
            assert_eq!(config.effective.transform, expected, "{method}");
        }
    }

    #[test]
    fn test_later_layers_win() {
        let instance = FetchOptions::new()
            .base_url("https://a.test")
            .transform(false)
            .redirect(RedirectMode::Manual);
        let method = FetchOptions::new().base_url(" https://b.test ");
        let call = FetchOptions::new().transform(true);

        let config = resolve_config(Method::Delete, [&instance, &method, &call]).unwrap();
        assert_eq!(config.base_url.as_deref(), Some("https://b.test"));
        assert!(config.effective.transform);
        assert_eq!(config.effective.redirect, Some(RedirectMode::Manual));
    }

    #[test]
    fn test_headers_merge_across_layers() {
        let instance = FetchOptions::new()
            .header("x-a", "1")
            .header("accept", "text/plain");
        let call = FetchOptions::new()
            .header("X-A", "2")
            .append_header("accept", "application/json");

        let config = resolve_config(Method::Get, [&instance, &call]).unwrap();
        let headers = config.effective.headers.unwrap();
        assert_eq!(headers.get("x-a").unwrap(), "2");
        let accept: Vec<_> = headers.get_all("accept").iter().collect();
        assert_eq!(accept, vec!["text/plain", "application/json"]);
    }

    #[test]
    fn test_no_headers_anywhere_yields_none() {
        let config = resolve_config(Method::Delete, [&FetchOptions::new()]).unwrap();
        assert!(config.effective.headers.is_none());
    }

    #[test]
    fn test_query_accumulates_with_set_semantics() {
        let instance = FetchOptions::new().query("a", "1").query("b", "1");
        let call = FetchOptions::new().query("b", "2");

        let config = resolve_config(Method::Get, [&instance, &call]).unwrap();
        assert_eq!(config.query.unwrap().to_string(), "a=1&b=2");
    }

    #[test]
    fn test_get_and_head_drop_body() {
        let options = FetchOptions::new().json(&json!({ "a": 1 })).unwrap();
        for method in [Method::Get, Method::Head] {
            let config = resolve_config(method, [&options]).unwrap();
            assert!(config.effective.body.is_none());
            assert!(config.effective.headers.is_none());
        }
    }

    #[test]
    fn test_structured_body_defaults_to_json() {
        let options = FetchOptions::new().json(&json!({ "a": 1 })).unwrap();
        let config = resolve_config(Method::Post, [&options]).unwrap();
        assert_eq!(content_type(&config), Some("application/json"));
        assert_eq!(config.effective.body, Some(Body::Text(r#"{"a":1}"#.to_owned())));
    }

    #[test]
    fn test_body_is_last_defined_not_merged() {
        let instance = FetchOptions::new().json(&json!({ "a": 1 })).unwrap();
        let call = FetchOptions::new().json(&json!({ "b": 2 })).unwrap();
        let config = resolve_config(Method::Put, [&instance, &call]).unwrap();
        assert_eq!(config.effective.body, Some(Body::Text(r#"{"b":2}"#.to_owned())));
    }

    #[test]
    fn test_urlencoded_body_uses_declared_content_type() {
        let options = FetchOptions::new()
            .header("Content-Type", "application/x-www-form-urlencoded")
            .json(&json!({ "x": 1, "y": "z" }))
            .unwrap();
        let config = resolve_config(Method::Post, [&options]).unwrap();
        assert!(matches!(
            config.effective.body,
            Some(Body::Params(ref p)) if p.to_string() == "x=1&y=z"
        ));
    }

    #[test]
    fn test_defaults_keep_method_slots_separate() {
        let init = FetchInit::new()
            .base_url("https://api.test")
            .method(Method::Post, FetchOptions::new().transform(false));
        let defaults = Defaults::from_init(init);

        assert_eq!(defaults.method(Method::Post).transform, Some(false));
        assert!(defaults.method(Method::Get).transform.is_none());
        assert_eq!(defaults.options().base_url.as_deref(), Some("https://api.test"));
    }

    #[test]
    fn test_method_options_assign_onto_each_other() {
        let init = FetchInit::new()
            .method(Method::Get, FetchOptions::new().header("x-a", "1"))
            .method(Method::Get, FetchOptions::new().transform(false));
        let options = &init.methods[&Method::Get];
        assert!(options.headers.is_some());
        assert_eq!(options.transform, Some(false));
    }

    #[test]
    fn test_from_json_settings() {
        let init = FetchInit::from_json(
            r#"{
                "baseURL": "https://api.test",
                "headers": { "x-client": "demo" },
                "params": "lang=en",
                "delete": { "transform": true },
                "post": { "redirect": "manual" }
            }"#,
        )
        .unwrap();

        assert_eq!(init.options.base_url.as_deref(), Some("https://api.test"));
        assert_eq!(init.options.query.as_ref().unwrap().get("lang"), Some("en"));
        assert_eq!(init.methods[&Method::Delete].transform, Some(true));
        assert_eq!(init.methods[&Method::Post].redirect, Some(RedirectMode::Manual));
        assert!(!init.methods.contains_key(&Method::Get));
    }

    #[test]
    fn test_from_json_rejects_invalid_settings() {
        let err = FetchInit::from_json(r#"{ "transform": "maybe" }"#).unwrap_err();
        assert!(matches!(err, FetchError::Config(_)), "got {err:?}");
    }

    #[test]
    fn test_method_parsing_and_display() {
        assert_eq!("DELETE".parse::<Method>().unwrap(), Method::Delete);
        assert_eq!(Method::Patch.to_string(), "PATCH");
        assert!("FETCH".parse::<Method>().is_err());
    }
}
