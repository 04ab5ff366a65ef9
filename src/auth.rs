//! HTTP Basic authentication for the broker API.
//!
//! The platform authenticates every broker call (except the catalog) with
//! a single configured username/password pair:
//! 1. Parse `Authorization: Basic <base64(user:pass)>`
//! 2. Compare both halves against the configured credentials in
//!    constant time

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use subtle::ConstantTimeEq;

use crate::config::AuthConfig;

// ── Parsed types ────────────────────────────────────────────────────

/// Decoded Basic credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicCredentials {
    pub username: String,
    pub password: String,
}

/// Result of checking a request's credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthResult {
    /// Credentials matched.
    Ok,
    /// No `Authorization` header was sent.
    Missing,
    /// The header was not a well-formed Basic credential.
    Malformed(String),
    /// Username or password did not match.
    Mismatch,
}

// ── Parsing ─────────────────────────────────────────────────────────

/// Parse the value of an `Authorization` header.
///
/// The scheme is matched case-insensitively.  The password may contain
/// colons; only the first colon separates it from the username.
pub fn parse_basic_auth(header: &str) -> Result<BasicCredentials, String> {
    let (scheme, encoded) = header
        .trim()
        .split_once(' ')
        .ok_or_else(|| "Authorization header has no credentials".to_string())?;
    if !scheme.eq_ignore_ascii_case("Basic") {
        return Err(format!("Unsupported authorization scheme: {scheme}"));
    }

    let decoded = BASE64_STANDARD
        .decode(encoded.trim())
        .map_err(|e| format!("Invalid base64 in Basic credentials: {e}"))?;
    let decoded = String::from_utf8(decoded)
        .map_err(|_| "Basic credentials are not valid UTF-8".to_string())?;

    let (username, password) = decoded
        .split_once(':')
        .ok_or_else(|| "Basic credentials are missing ':'".to_string())?;

    Ok(BasicCredentials {
        username: username.to_string(),
        password: password.to_string(),
    })
}

/// Compare two strings in constant time.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

// ── Verification ────────────────────────────────────────────────────

/// Check an optional `Authorization` header value against `expected`.
pub fn check_basic_auth(header: Option<&str>, expected: &AuthConfig) -> AuthResult {
    let Some(header) = header else {
        return AuthResult::Missing;
    };
    let credentials = match parse_basic_auth(header) {
        Ok(c) => c,
        Err(e) => return AuthResult::Malformed(e),
    };

    // Evaluate both comparisons so timing does not reveal which one failed.
    let user_ok = constant_time_eq(&credentials.username, &expected.username);
    let pass_ok = constant_time_eq(&credentials.password, &expected.password);
    if user_ok & pass_ok {
        AuthResult::Ok
    } else {
        AuthResult::Mismatch
    }
}
