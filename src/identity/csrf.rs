//! Double-submit CSRF protection.
//!
//! A random token is set in a script-readable cookie and must be echoed back in
//! the `X-CSRF-Token` header on every mutating request. Nothing is stored
//! server-side: a cross-site page can make the browser send the cookie but
//! cannot read it to forge the header.

use axum::http::header::SET_COOKIE;
use axum::http::HeaderMap;
use base64::Engine;
use subtle::ConstantTimeEq;

use super::cookies::{parse_cookie, CookiePolicy};
use crate::error::AppError;

pub const CSRF_COOKIE: &str = "csrf_token";
pub const CSRF_HEADER: &str = "x-csrf-token";

const TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone)]
pub struct CsrfGuard {
    policy: CookiePolicy,
}

/// 256-bit random token, base64url without padding.
pub fn generate_token() -> Result<String, AppError> {
    let mut buf = [0u8; TOKEN_BYTES];
    getrandom::getrandom(&mut buf).map_err(|e| AppError::internal("rng_failure".to_string(), e.to_string()))?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf))
}

impl CsrfGuard {
    pub fn new(policy: CookiePolicy) -> Self { Self { policy } }

    /// Set a fresh token cookie on the response and return the token for the body.
    pub fn issue(&self, response: &mut HeaderMap) -> Result<String, AppError> {
        let token = generate_token()?;
        response.append(SET_COOKIE, self.policy.issue(CSRF_COOKIE, &token, false)?);
        Ok(token)
    }

    /// Accept only when cookie and header are both present, non-empty and equal.
    pub fn verify(&self, headers: &HeaderMap) -> Result<(), AppError> {
        let header = headers.get(CSRF_HEADER).and_then(|v| v.to_str().ok()).unwrap_or("");
        let cookie = parse_cookie(headers, CSRF_COOKIE).unwrap_or_default();
        if header.is_empty() || cookie.is_empty() {
            return Err(AppError::csrf_rejected());
        }
        if bool::from(header.as_bytes().ct_eq(cookie.as_bytes())) {
            Ok(())
        } else {
            Err(AppError::csrf_rejected())
        }
    }

    pub fn expire(&self, response: &mut HeaderMap) {
        response.append(SET_COOKIE, self.policy.expire(CSRF_COOKIE, false));
    }
}
