//! Cookie header plumbing shared by the session and CSRF cookies.
//!
//! Both cookies are issued and cleared through [`CookiePolicy`] so the
//! attributes on the clearing `Set-Cookie` always match the issuing one.
//! Browsers ignore a deletion whose Path/SameSite/Secure differ.

use axum::http::header::COOKIE;
use axum::http::{HeaderMap, HeaderValue};

use crate::config::Settings;
use crate::error::AppError;

const EPOCH_EXPIRES: &str = "Thu, 01 Jan 1970 00:00:00 GMT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CookiePolicy {
    pub max_age: i64,
    pub secure: bool,
}

impl CookiePolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self { max_age: settings.max_age_seconds(), secure: settings.cookie_secure }
    }

    /// `Set-Cookie` value issuing `name=value` for the configured lifetime.
    pub fn issue(&self, name: &str, value: &str, http_only: bool) -> Result<HeaderValue, AppError> {
        let line = format!("{}={}; Max-Age={}; Path=/; SameSite=Lax{}", name, value, self.max_age, self.flags(http_only));
        HeaderValue::from_str(&line).map_err(|_| AppError::internal("cookie_encoding", "cookie value is not header-safe"))
    }

    /// `Set-Cookie` value that expires `name` immediately.
    pub fn expire(&self, name: &str, http_only: bool) -> HeaderValue {
        let line = format!(
            "{}=; Max-Age=0; Expires={}; Path=/; SameSite=Lax{}",
            name,
            EPOCH_EXPIRES,
            self.flags(http_only)
        );
        // Cookie names are compile-time constants, so this cannot fail.
        HeaderValue::from_str(&line).unwrap_or_else(|_| HeaderValue::from_static("invalid=; Max-Age=0"))
    }

    fn flags(&self, http_only: bool) -> &'static str {
        match (http_only, self.secure) {
            (true, true) => "; HttpOnly; Secure",
            (true, false) => "; HttpOnly",
            (false, true) => "; Secure",
            (false, false) => "",
        }
    }
}

/// First value of cookie `name` across every `Cookie` header on the request.
pub fn parse_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    for cookie in headers.get_all(COOKIE) {
        let Ok(s) = cookie.to_str() else { continue };
        for part in s.split(';') {
            let p = part.trim();
            if let Some((k, v)) = p.split_once('=') {
                if k.trim() == name { return Some(v.trim().to_string()); }
            }
        }
    }
    None
}
