//! Redirect policy of the default transport
//!
//! The request's [`RedirectMode`] decides whether redirects are followed at
//! all. In `Follow` mode, [`RedirectConfig`] limits where they may lead:
//! - Redirect count is bounded
//! - HTTPS → HTTP downgrades are not followed
//! - Cross-origin targets can be restricted to an allow-list
//! - `Authorization`, `Cookie` and `Proxy-Authorization` are stripped once
//!   the chain leaves the original origin
//!
//! A redirect that is not followed is returned to the caller as is.

use crate::config::RedirectMode;
use crate::transport::RedirectConfig;
use http::{Request, Uri, header};
use tower_http::follow_redirect::policy::{Action, Attempt, Policy};

/// Headers that are stripped on cross-origin redirects
const SENSITIVE_HEADERS: &[header::HeaderName] = &[
    header::AUTHORIZATION,
    header::COOKIE,
    header::PROXY_AUTHORIZATION,
];

/// Redirect policy honoring per-request redirect modes
///
/// Implements [`tower_http::follow_redirect::policy::Policy`]. The policy is
/// cloned for every request, so its counters are per request.
#[derive(Debug, Clone)]
pub struct SecureRedirectPolicy {
    config: RedirectConfig,
    /// Mode of the request being served, read from its extensions
    mode: Option<RedirectMode>,
    redirect_count: usize,
    cross_origin_detected: bool,
}

impl SecureRedirectPolicy {
    #[must_use]
    pub fn new(config: RedirectConfig) -> Self {
        Self {
            config,
            mode: None,
            redirect_count: 0,
            cross_origin_detected: false,
        }
    }

    /// Same scheme, host and port.
    ///
    /// Missing schemes default to "https".
    fn is_same_origin(original: &Uri, target: &Uri) -> bool {
        let orig_scheme = original.scheme_str().unwrap_or("https");
        let target_scheme = target.scheme_str().unwrap_or("https");

        let orig_host = original.host().unwrap_or("");
        let target_host = target.host().unwrap_or("");

        let orig_port = original
            .port_u16()
            .unwrap_or_else(|| default_port(orig_scheme));
        let target_port = target
            .port_u16()
            .unwrap_or_else(|| default_port(target_scheme));

        orig_scheme == target_scheme && orig_host == target_host && orig_port == target_port
    }

    fn is_https_downgrade(original: &Uri, target: &Uri) -> bool {
        let orig_scheme = original.scheme_str().unwrap_or("https");
        let target_scheme = target.scheme_str().unwrap_or("https");

        orig_scheme == "https" && target_scheme == "http"
    }

    fn is_allowed_host(&self, target: &Uri) -> bool {
        target
            .host()
            .is_some_and(|host| self.config.allowed_redirect_hosts.contains(host))
    }

    /// Whether the request's mode and the hop budget allow another hop.
    fn may_follow(&mut self, attempt: &Attempt<'_>) -> bool {
        let mode = self.mode.unwrap_or_default();
        if mode != RedirectMode::Follow {
            tracing::debug!(?mode, location = %attempt.location(), "Redirect not followed");
            return false;
        }

        self.redirect_count += 1;
        if self.redirect_count > self.config.max_redirects {
            tracing::debug!(
                count = self.redirect_count,
                max = self.config.max_redirects,
                "Redirect limit reached"
            );
            return false;
        }
        true
    }

    /// Origin checks for one hop. A permitted cross-origin hop arms header stripping.
    fn is_permitted_target(&mut self, original: &Uri, target: &Uri) -> bool {
        if !self.config.allow_https_downgrade && Self::is_https_downgrade(original, target) {
            tracing::warn!(
                original = %original,
                target = %target,
                "Blocking HTTPS to HTTP downgrade redirect"
            );
            return false;
        }

        let is_same_origin = Self::is_same_origin(original, target);
        if self.config.same_origin_only && !is_same_origin && !self.is_allowed_host(target) {
            tracing::warn!(
                original = %original,
                target = %target,
                "Blocking cross-origin redirect (same_origin_only=true)"
            );
            return false;
        }

        if !is_same_origin {
            self.cross_origin_detected = true;
        }
        true
    }
}

fn default_port(scheme: &str) -> u16 {
    match scheme {
        "http" => 80,
        "https" => 443,
        _ => 0,
    }
}

impl<B: Clone, E> Policy<B, E> for SecureRedirectPolicy {
    fn redirect(&mut self, attempt: &Attempt<'_>) -> Result<Action, E> {
        if self.may_follow(attempt)
            && self.is_permitted_target(attempt.previous(), attempt.location())
        {
            Ok(Action::Follow)
        } else {
            Ok(Action::Stop)
        }
    }

    fn on_request(&mut self, request: &mut Request<B>) {
        // first call is the original request
        if self.mode.is_none() {
            self.mode = Some(
                request
                    .extensions()
                    .get::<RedirectMode>()
                    .copied()
                    .unwrap_or_default(),
            );
        }

        if self.cross_origin_detected && self.config.strip_sensitive_headers {
            let headers = request.headers_mut();
            for header_name in SENSITIVE_HEADERS {
                if headers.remove(header_name).is_some() {
                    tracing::debug!(
                        header = %header_name,
                        "Stripped sensitive header on cross-origin redirect"
                    );
                }
            }
        }
    }

    fn clone_body(&self, body: &B) -> Option<B> {
        Some(body.clone())
    }
}
