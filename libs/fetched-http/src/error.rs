use std::time::Duration;
use thiserror::Error;

/// Boxed error type carried by transport and callback failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Classification of URL validation failures.
///
/// Provides programmatic matching for different failure modes without
/// relying on unstable error message strings.
///
/// # Example
///
/// ```ignore
/// match &err {
///     FetchError::InvalidUri { kind, .. } => match kind {
///         InvalidUriKind::ParseError => println!("Malformed URL syntax"),
///         InvalidUriKind::MissingAuthority => println!("URL needs a host"),
///         InvalidUriKind::MissingScheme => println!("URL needs http:// or https://"),
///         _ => println!("Other URI error"),
///     },
///     _ => {}
/// }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidUriKind {
    /// URL could not be parsed (malformed syntax)
    ParseError,
    /// URL is missing required host/authority component
    MissingAuthority,
    /// URL is missing required scheme (http/https)
    MissingScheme,
}

/// Errors produced while configuring, sending or interpreting a request
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum FetchError {
    /// Request building failed
    #[error("Failed to build request: {0}")]
    RequestBuild(#[from] http::Error),

    /// Invalid header name
    #[error("Invalid header name: {0}")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    /// Invalid header value
    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// Request attempt timed out in the transport
    #[error("Request attempt timed out after {0:?}")]
    Timeout(Duration),

    /// Request was cancelled through its abort signal
    #[error("Request aborted")]
    Aborted,

    /// Transport error (network, connection, etc)
    #[error("Transport error: {0}")]
    Transport(#[source] BoxError),

    /// TLS error
    #[error("TLS error: {0}")]
    Tls(#[source] BoxError),

    /// Response body exceeded size limit
    #[error("Response body too large: limit {limit} bytes, got {actual} bytes")]
    BodyTooLarge { limit: usize, actual: usize },

    /// Server answered with a non-2xx status
    #[error("HTTP {} {status_text}", .status.as_u16())]
    HttpStatus {
        status: http::StatusCode,
        /// Reason phrase sent by the server, or the canonical one
        status_text: String,
        /// Leading part of the response body, lossily decoded
        body_preview: String,
        content_type: Option<String>,
    },

    /// Redirect received while the request's redirect mode is `Error`
    #[error("Redirect ({status}) to '{location}' refused by redirect mode")]
    RedirectBlocked {
        status: http::StatusCode,
        location: String,
    },

    /// JSON serialization or parsing error
    #[error("JSON processing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Form URL encoding error
    #[error("Form encoding failed: {0}")]
    FormEncode(#[from] serde_urlencoded::ser::Error),

    /// Invalid URL (failed to parse)
    ///
    /// Use the `kind` field for programmatic matching. The `reason` field contains
    /// a diagnostic message intended for logging only; do not match on its contents
    /// as the format is unstable and may change between releases.
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUri {
        /// The URL that failed to parse
        url: String,
        /// Structured failure classification for programmatic matching
        kind: InvalidUriKind,
        /// Diagnostic message (unstable format, for logging only)
        reason: String,
    },

    /// Invalid URL scheme for transport security configuration
    #[error("URL scheme '{scheme}' not allowed: {reason}")]
    InvalidScheme {
        /// The URL scheme that was rejected
        scheme: String,
        /// Reason the scheme was rejected
        reason: String,
    },

    /// Settings could not be extracted from configuration sources
    #[error("Invalid configuration: {0}")]
    Config(#[from] Box<figment::Error>),

    /// A response or error callback failed
    #[error("Callback failed: {0}")]
    Callback(#[source] BoxError),
}

impl FetchError {
    /// Wrap an arbitrary error returned from a user callback.
    #[must_use]
    pub fn callback(err: impl Into<BoxError>) -> Self {
        FetchError::Callback(err.into())
    }

    /// Returns the HTTP status if this error came from a non-2xx response.
    #[must_use]
    pub fn status(&self) -> Option<http::StatusCode> {
        match self {
            FetchError::HttpStatus { status, .. } | FetchError::RedirectBlocked { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }
}

impl From<figment::Error> for FetchError {
    fn from(err: figment::Error) -> Self {
        FetchError::Config(Box::new(err))
    }
}

impl From<hyper::Error> for FetchError {
    fn from(err: hyper::Error) -> Self {
        FetchError::Transport(Box::new(err))
    }
}

impl From<hyper_util::client::legacy::Error> for FetchError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        FetchError::Transport(Box::new(err))
    }
}

impl From<url::ParseError> for InvalidUriKind {
    fn from(err: url::ParseError) -> Self {
        match err {
            url::ParseError::RelativeUrlWithoutBase => InvalidUriKind::MissingScheme,
            url::ParseError::EmptyHost => InvalidUriKind::MissingAuthority,
            _ => InvalidUriKind::ParseError,
        }
    }
}
