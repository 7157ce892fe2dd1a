//! Session cookies and the identity gate
//!
//! The dispatch layer only ever asks two questions of a request: is it
//! authenticated, and whose identity does it carry. `IdentityGate` captures
//! exactly that; `SessionManager` answers it from a signed cookie.

use axum::http::{header, HeaderMap};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default session cookie name
pub const DEFAULT_COOKIE_NAME: &str = "whereis-session";

/// Default session lifetime in seconds (7 days)
pub const DEFAULT_SESSION_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Upper bound on session lifetime (one year)
const MAX_SESSION_TTL_SECS: i64 = 365 * 24 * 60 * 60;

/// Answers "who is making this request"
pub trait IdentityGate: Send + Sync {
    /// Authenticated identity of the request, empty if none
    fn identity(&self, headers: &HeaderMap) -> String;

    /// Whether the request carries a valid session
    fn is_authenticated(&self, headers: &HeaderMap) -> bool {
        !self.identity(headers).is_empty()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionClaims {
    sub: String,
    iat: i64,
    exp: i64,
}

/// Issues and validates HS256-signed session cookies
pub struct SessionManager {
    encoding: EncodingKey,
    decoding: DecodingKey,
    cookie_name: String,
    ttl: Duration,
    secure: bool,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("cookie_name", &self.cookie_name)
            .field("ttl", &self.ttl)
            .field("secure", &self.secure)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Create a session manager signing with `secret`
    #[must_use]
    pub fn new(secret: &SecretString, cookie_name: &str, ttl_secs: u64, secure: bool) -> Self {
        let key = secret.expose_secret().as_bytes();
        Self {
            encoding: EncodingKey::from_secret(key),
            decoding: DecodingKey::from_secret(key),
            cookie_name: cookie_name.to_string(),
            ttl: Duration::seconds(
                i64::try_from(ttl_secs)
                    .unwrap_or(i64::MAX)
                    .min(MAX_SESSION_TTL_SECS),
            ),
            secure,
        }
    }

    /// Build a `Set-Cookie` value establishing a session for `email`
    ///
    /// # Errors
    ///
    /// Returns error if the session token cannot be signed
    pub fn issue_cookie(&self, email: &str) -> Result<String> {
        let now = Utc::now();
        let claims = SessionClaims {
            sub: email.to_string(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| Error::Auth(format!("failed to sign session: {e}")))?;

        Ok(self.cookie(&token, self.ttl.num_seconds()))
    }

    /// Build a `Set-Cookie` value that removes the session
    #[must_use]
    pub fn clear_cookie(&self) -> String {
        self.cookie("", 0)
    }

    fn cookie(&self, value: &str, max_age: i64) -> String {
        let mut cookie = format!(
            "{}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}",
            self.cookie_name
        );
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie
    }

    /// Validate a session token and return its subject
    fn subject(&self, token: &str) -> Option<String> {
        let validation = Validation::new(Algorithm::HS256);
        match decode::<SessionClaims>(token, &self.decoding, &validation) {
            Ok(data) if !data.claims.sub.is_empty() => Some(data.claims.sub),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!(error = %e, "rejected session cookie");
                None
            }
        }
    }
}

impl IdentityGate for SessionManager {
    fn identity(&self, headers: &HeaderMap) -> String {
        cookie_value(headers, &self.cookie_name)
            .and_then(|token| self.subject(token))
            .unwrap_or_default()
    }
}

/// Find a cookie by name across all `Cookie` headers
fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, value)| *key == name && !value.is_empty())
        .map(|(_, value)| value)
}
