#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Fetch-style HTTP client with layered defaults
//!
//! A [`Fetcher`] wraps a transport with:
//! - Instance-wide and per-verb default options, reconfigurable at runtime
//! - Base URL joining and query parameter accumulation
//! - Header merging with set and append semantics
//! - Automatic body encoding (JSON, url-encoded, multipart) driven by `content-type`
//! - Response transformation into JSON or text
//! - Request, response and error hooks
//!
//! Requests go through [`HttpTransport`] by default: hyper with rustls
//! (HTTPS only by default), transparent decompression, redirect policy,
//! timeouts and body size limits. Any tower service over `http` types can
//! stand in for it.
//!
//! # Precedence
//!
//! Options are resolved at send time, lowest precedence first:
//! instance defaults, the verb's defaults, the call site. `GET` and `HEAD`
//! never send a body. `GET`, `POST` and `OPTIONS` transform their responses
//! unless told otherwise.
//!
//! # Example
//!
//! ```ignore
//! use fetched_http::{FetchInit, FetchOptions, Method};
//!
//! let api = fetched_http::create(
//!     FetchInit::new()
//!         .base_url("https://api.example.com")
//!         .header("authorization", "Bearer token")
//!         .method(Method::Delete, FetchOptions::new().transform(true)),
//! )?;
//!
//! // JSON in, JSON out
//! let user = api
//!     .post("/users")
//!     .json(&NewUser { name: "Alice" })?
//!     .await?
//!     .into_json::<User>()?;
//!
//! // Failures without an error hook come back as `Err`
//! match api.get("/missing").await {
//!     Err(FetchError::HttpStatus { status, .. }) => assert_eq!(status, 404),
//!     other => panic!("{other:?}"),
//! }
//! ```

mod body;
mod config;
mod dispatch;
mod error;
mod form;
mod headers;
mod hooks;
mod input;
mod instance;
mod layers;
mod params;
mod request;
mod response;
pub mod tls;
mod transport;
pub mod value;

pub use body::{Body, FILENAME_KEY, encode_body};
pub use config::{
    Defaults, EffectiveConfig, FetchInit, FetchOptions, FetchSettings, Method, OptionSettings,
    RedirectMode, ResolvedConfig, resolve_config,
};
pub use error::{BoxError, FetchError, InvalidUriKind};
pub use form::{FormData, FormValue};
pub use headers::{HeaderMode, HeaderSource, merge_headers};
pub use hooks::{ErrorHook, FetchFailure, RequestHook, ResponseHook};
pub use input::{FetchInput, FetchRequest, resolve_input};
pub use instance::{Fetcher, FetcherBuilder, api, create};
pub use layers::{AbortLayer, AbortService, SecureRedirectPolicy, UserAgentLayer, UserAgentService};
pub use params::SearchParams;
pub use request::RequestBuilder;
pub use response::{
    ERROR_BODY_PREVIEW_LIMIT, FetchResponse, LimitedBody, Reply, ResponseBody, full_body,
    read_body_limited,
};
pub use transport::{
    DEFAULT_MAX_BODY_SIZE, DEFAULT_USER_AGENT, HttpTransport, HttpTransportBuilder, RedirectConfig,
    ServiceTransport, TlsRootConfig, Transport, TransportConfig, TransportRequest,
    TransportSecurity,
};
pub use value::{Blob, Kind, Record, Value};
