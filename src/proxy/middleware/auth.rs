//! Credential gate for the forwarder
//!
//! The forwarder does not verify credentials itself. It only makes sure one
//! is present (or a configured default applies) and hands it on to proxy
//! issuance, which is where verification happens.

use hyper::header::AUTHORIZATION;
use hyper::Request;
use tracing::{debug, warn};

use crate::error::{GatewayError, Result};

/// Credential presence check
#[derive(Debug, Clone)]
pub struct AuthCheck {
    /// Whether a request without any credential is rejected
    required: bool,
    /// Used when the request carries no `Authorization` header
    default_credential: Option<String>,
}

impl AuthCheck {
    pub fn new(required: bool, default_credential: Option<String>) -> Self {
        Self {
            required,
            default_credential: default_credential.filter(|c| !c.trim().is_empty()),
        }
    }

    /// Accept every request, forwarding whatever credential is present
    pub fn disabled() -> Self {
        Self::new(false, None)
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    /// Credential to forward to proxy issuance
    ///
    /// Prefers the request's `Authorization` header, then the configured
    /// default. Fails with [`GatewayError::AuthRequired`] when neither exists
    /// and credentials are required.
    pub fn resolve<T>(&self, req: &Request<T>) -> Result<Option<String>> {
        let presented = req
            .headers()
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);

        match presented.or_else(|| self.default_credential.clone()) {
            Some(credential) => {
                debug!(credential = %mask_credential(&credential), "Resolved credential");
                Ok(Some(credential))
            }
            None if self.required => {
                warn!("Rejecting request without credential");
                Err(GatewayError::AuthRequired)
            }
            None => Ok(None),
        }
    }
}

/// Token part of an `Authorization` value, without a `Bearer` scheme
pub fn bearer_token(value: &str) -> &str {
    let value = value.trim();
    match value.split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") => token.trim(),
        _ => value,
    }
}

/// Loggable form of a credential
///
/// Keeps the scheme plus the first 8 and last 4 characters of the token.
pub fn mask_credential(value: &str) -> String {
    let (scheme, token) = match value.trim().split_once(' ') {
        Some((scheme, token)) => (Some(scheme), token.trim()),
        None => (None, value.trim()),
    };

    let chars: Vec<char> = token.chars().collect();
    let masked = if chars.len() <= 12 {
        "***".to_string()
    } else {
        let head: String = chars[..8].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", head, tail)
    };

    match scheme {
        Some(scheme) => format!("{} {}", scheme, masked),
        None => masked,
    }
}
