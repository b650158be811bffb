//! Request targets and address resolution.

use crate::body::Body;
use crate::config::{Method, RedirectMode};
use crate::error::{FetchError, InvalidUriKind};
use crate::params::SearchParams;
use bytes::Bytes;
use http::HeaderMap;
use http_body_util::Full;
use tokio_util::sync::CancellationToken;
use url::Url;

/// A fully described outgoing request.
///
/// Callers may pass one as the target of a call; its fields are used unless
/// the effective options of the call define their own. Hooks receive the
/// request that was actually sent.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Body>,
    pub redirect: RedirectMode,
    pub signal: Option<CancellationToken>,
}

impl FetchRequest {
    #[must_use]
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
            redirect: RedirectMode::default(),
            signal: None,
        }
    }

    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Build the `http::Request` handed to the transport.
    ///
    /// The redirect mode and abort signal travel as request extensions.
    pub(crate) fn to_http(&self) -> Result<http::Request<Full<Bytes>>, FetchError> {
        let mut headers = self.headers.clone();
        let bytes = match &self.body {
            Some(body) if !self.method.forbids_body() => body.clone().into_wire(&mut headers)?,
            _ => Bytes::new(),
        };

        let mut request = http::Request::builder()
            .method(self.method.to_http())
            .uri(self.url.as_str())
            .body(Full::new(bytes))?;
        *request.headers_mut() = headers;
        request.extensions_mut().insert(self.redirect);
        if let Some(signal) = &self.signal {
            request.extensions_mut().insert(signal.clone());
        }
        Ok(request)
    }
}

/// Target of a request call
#[derive(Debug, Clone)]
pub enum FetchInput {
    /// Address as written by the caller, possibly relative
    Url(String),
    /// Parsed absolute address
    Parsed(Url),
    /// Pre-built request descriptor
    Request(Box<FetchRequest>),
}

impl FetchInput {
    /// True only for a pre-built request descriptor.
    #[must_use]
    pub fn is_request_like(&self) -> bool {
        matches!(self, FetchInput::Request(_))
    }

    /// The address in string form
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            FetchInput::Url(raw) => raw.trim(),
            FetchInput::Parsed(url) => url.as_str(),
            FetchInput::Request(request) => request.url.as_str(),
        }
    }

    /// Parse the address into a [`Url`].
    ///
    /// # Errors
    /// Returns `FetchError::InvalidUri` if the address is not an absolute URL.
    pub fn to_url(&self) -> Result<Url, FetchError> {
        match self {
            FetchInput::Url(raw) => parse_url(raw.trim()),
            FetchInput::Parsed(url) => Ok(url.clone()),
            FetchInput::Request(request) => Ok(request.url.clone()),
        }
    }
}

impl Default for FetchInput {
    fn default() -> Self {
        FetchInput::Url(String::new())
    }
}

impl From<&str> for FetchInput {
    fn from(value: &str) -> Self {
        FetchInput::Url(value.to_owned())
    }
}

impl From<String> for FetchInput {
    fn from(value: String) -> Self {
        FetchInput::Url(value)
    }
}

impl From<&String> for FetchInput {
    fn from(value: &String) -> Self {
        FetchInput::Url(value.clone())
    }
}

impl From<Url> for FetchInput {
    fn from(value: Url) -> Self {
        FetchInput::Parsed(value)
    }
}

impl From<FetchRequest> for FetchInput {
    fn from(value: FetchRequest) -> Self {
        FetchInput::Request(Box::new(value))
    }
}

fn parse_url(raw: &str) -> Result<Url, FetchError> {
    Url::parse(raw).map_err(|e| FetchError::InvalidUri {
        url: raw.to_owned(),
        kind: InvalidUriKind::from(e),
        reason: e.to_string(),
    })
}

/// Whether `raw` starts with a URL scheme (`ALPHA *( ALPHA / DIGIT / "+" / "-" / "." ) ":"`)
fn is_absolute(raw: &str) -> bool {
    let Some((scheme, _)) = raw.split_once(':') else {
        return false;
    };
    let mut chars = scheme.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

fn join(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        base.to_owned()
    } else {
        format!("{base}/{path}")
    }
}

/// Compute the final request address.
///
/// Without a base URL and without query parameters the input is returned
/// unchanged. Otherwise a relative input is joined to the base with exactly
/// one slash (absolute inputs and inputs already starting with the base are
/// left alone), the query parameters are appended to the address's own query,
/// and the result is parsed. A request descriptor keeps all of its other
/// fields.
///
/// # Errors
/// Returns `FetchError::InvalidUri` if the resulting address does not parse.
pub fn resolve_input(
    input: FetchInput,
    base_url: Option<&str>,
    query: Option<&SearchParams>,
) -> Result<FetchInput, FetchError> {
    let base = base_url.map(str::trim).filter(|b| !b.is_empty());
    let query = query.filter(|q| !q.is_empty());
    if base.is_none() && query.is_none() {
        return Ok(input);
    }

    let raw = input.as_str();
    let address = match base {
        Some(base) if !is_absolute(raw) && !raw.starts_with(base) => join(base, raw),
        _ => raw.to_owned(),
    };

    let mut url = parse_url(&address)?;
    if let Some(query) = query {
        url.query_pairs_mut().extend_pairs(query.iter());
    }
    tracing::trace!(url = %url, "resolved request address");

    Ok(match input {
        FetchInput::Request(mut request) => {
            request.url = url;
            FetchInput::Request(request)
        }
        FetchInput::Url(_) | FetchInput::Parsed(_) => FetchInput::Parsed(url),
    })
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn resolved(
        input: impl Into<FetchInput>,
        base: Option<&str>,
        query: Option<&SearchParams>,
    ) -> String {
        resolve_input(input.into(), base, query)
            .unwrap()
            .as_str()
            .to_owned()
    }

    #[test]
    fn test_joins_with_single_slash() {
        assert_eq!(
            resolved("users/5", Some("https://api.test/"), None),
            "https://api.test/users/5"
        );
        assert_eq!(
            resolved("//users/5", Some("https://api.test//"), None),
            "https://api.test/users/5"
        );
        assert_eq!(
            resolved("/ping", Some("https://api.test/v1"), None),
            "https://api.test/v1/ping"
        );
    }

    #[test]
    fn test_absolute_input_is_not_prefixed() {
        assert_eq!(
            resolved("https://api.test/users/5", Some("https://api.test"), None),
            "https://api.test/users/5"
        );
        assert_eq!(
            resolved("HTTP://other.test/x", Some("https://api.test"), None),
            "http://other.test/x"
        );
        assert_eq!(
            resolved("ws://stream.test/feed", Some("https://api.test"), None),
            "ws://stream.test/feed"
        );
        assert_eq!(
            resolved("file:/tmp/report", Some("https://api.test"), None),
            "file:///tmp/report"
        );
    }

    #[test]
    fn test_scheme_detection() {
        assert!(is_absolute("mailto:someone@example.com"));
        assert!(is_absolute("git+ssh://host/repo"));
        assert!(!is_absolute("users/5"));
        assert!(!is_absolute("/path:with/colon"));
        assert!(!is_absolute("1abc:x"));
    }

    #[test]
    fn test_no_base_no_query_returns_input_unchanged() {
        let input = resolve_input(FetchInput::from("relative/path"), None, None).unwrap();
        assert!(matches!(input, FetchInput::Url(ref raw) if raw == "relative/path"));
    }

    #[test]
    fn test_query_is_appended() {
        let query = SearchParams::from([("page", "2"), ("q", "a b")]);
        assert_eq!(
            resolved("/items", Some("https://api.test"), Some(&query)),
            "https://api.test/items?page=2&q=a+b"
        );
    }

    #[test]
    fn test_query_extends_existing_query() {
        let query = SearchParams::from([("b", "2")]);
        assert_eq!(
            resolved("https://api.test/items?a=1", None, Some(&query)),
            "https://api.test/items?a=1&b=2"
        );
    }

    #[test]
    fn test_empty_path_keeps_base() {
        let query = SearchParams::from([("a", "1")]);
        assert_eq!(
            resolved("", Some("https://api.test/root/"), Some(&query)),
            "https://api.test/root?a=1"
        );
    }

    #[test]
    fn test_request_descriptor_keeps_its_fields() {
        let url = Url::parse("https://placeholder.test/users").unwrap();
        let request = FetchRequest::new(Method::Put, url).with_body("payload");
        let input = FetchInput::from(request);
        assert!(input.is_request_like());

        let resolved = resolve_input(input, None, Some(&SearchParams::from([("v", "1")]))).unwrap();
        let FetchInput::Request(request) = resolved else {
            panic!("expected request descriptor");
        };
        assert_eq!(request.url.as_str(), "https://placeholder.test/users?v=1");
        assert_eq!(request.method, Method::Put);
        assert_eq!(request.body, Some(Body::Text("payload".to_owned())));
    }

    #[test]
    fn test_unparseable_address_is_reported() {
        let err = resolve_input(FetchInput::from("users"), Some("not a url"), None).unwrap_err();
        assert!(matches!(
            err,
            FetchError::InvalidUri {
                kind: InvalidUriKind::MissingScheme,
                ..
            }
        ));
    }

    #[test]
    fn test_to_http_carries_extensions() {
        let url = Url::parse("https://api.test/a").unwrap();
        let token = CancellationToken::new();
        let mut request = FetchRequest::new(Method::Post, url).with_body("x");
        request.redirect = RedirectMode::Manual;
        request.signal = Some(token);

        let http = request.to_http().unwrap();
        assert_eq!(http.method(), http::Method::POST);
        assert_eq!(http.extensions().get::<RedirectMode>(), Some(&RedirectMode::Manual));
        assert!(http.extensions().get::<CancellationToken>().is_some());
        assert_eq!(
            http.headers().get(http::header::CONTENT_TYPE).unwrap(),
            "text/plain;charset=UTF-8"
        );
    }

    #[test]
    fn test_to_http_drops_body_for_get() {
        let url = Url::parse("https://api.test/a").unwrap();
        let request = FetchRequest::new(Method::Get, url).with_body("ignored");
        let http = request.to_http().unwrap();
        assert!(http.headers().get(http::header::CONTENT_TYPE).is_none());
    }
}
