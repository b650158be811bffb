//! TLS setup of the default transport.
//!
//! Native root certificates are loaded from the OS store once per process.

use crate::error::FetchError;
use rustls_pki_types::CertificateDer;
use std::sync::{Arc, OnceLock};

/// Empty when the OS store had no usable certificates.
static NATIVE_ROOTS: OnceLock<Vec<CertificateDer<'static>>> = OnceLock::new();

#[cfg(test)]
static LOAD_COUNT: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);

fn load_native_roots() -> Vec<CertificateDer<'static>> {
    #[cfg(test)]
    LOAD_COUNT.fetch_add(1, std::sync::atomic::Ordering::SeqCst);

    let result = rustls_native_certs::load_native_certs();
    for err in &result.errors {
        tracing::warn!(error = %err, "error loading native root certificate");
    }

    if result.certs.is_empty() {
        tracing::warn!("no native root CA certificates found");
    } else {
        tracing::debug!(count = result.certs.len(), "loaded native root certificates");
    }
    result.certs
}

/// Native root certificates, loaded on first use.
pub fn native_root_certs() -> &'static [CertificateDer<'static>] {
    NATIVE_ROOTS.get_or_init(load_native_roots).as_slice()
}

/// Crypto provider for TLS connections.
///
/// Uses the process-wide default provider when one is installed, otherwise
/// an aws-lc-rs provider that is not installed globally.
#[must_use]
pub fn get_crypto_provider() -> Arc<rustls::crypto::CryptoProvider> {
    rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

/// Client configuration trusting the native root certificates.
///
/// # Errors
/// Returns `FetchError::Tls` when the OS store holds no certificate that
/// parses, so broken setups fail when the transport is built rather than on
/// the first handshake.
pub fn native_roots_client_config() -> Result<rustls::ClientConfig, FetchError> {
    let certs = native_root_certs();
    if certs.is_empty() {
        return Err(tls_error(
            "no native root CA certificates found in OS certificate store".to_owned(),
        ));
    }

    let mut root_store = rustls::RootCertStore::empty();
    let (added, ignored) = root_store.add_parsable_certificates(certs.iter().cloned());
    if ignored > 0 {
        tracing::warn!(added, ignored, "some native root certificates could not be parsed");
    }
    if added == 0 {
        return Err(tls_error(format!(
            "no valid native root CA certificates parsed (found {}, all failed to parse)",
            certs.len()
        )));
    }

    let config = rustls::ClientConfig::builder_with_provider(get_crypto_provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| FetchError::Tls(Box::new(e)))?
        .with_root_certificates(root_store)
        .with_no_client_auth();

    Ok(config)
}

fn tls_error(message: String) -> FetchError {
    FetchError::Tls(message.into())
}
