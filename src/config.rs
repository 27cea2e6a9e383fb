//! Process configuration.
//!
//! `Settings` is built once at start-up from environment variables (optionally
//! overridden by CLI flags in the server binary) and then shared read-only via
//! `Arc` into the identity components and the HTTP state.

use std::fmt;

use thiserror::Error;

pub const DEFAULT_HTTP_PORT: u16 = 8000;
pub const DEFAULT_COOKIE_MAX_AGE_DAYS: i64 = 30;
const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("AUTH_SECRET is not set or empty")]
    MissingSecret,
    #[error("DATABASE_URL is required for the postgres store backend")]
    MissingDatabaseUrl,
    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Which `UserStore`/`ProjectStore` implementation the server runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Clone)]
pub struct Settings {
    pub auth_secret: String,
    pub database_url: Option<String>,
    pub cookie_secure: bool,
    pub cookie_max_age_days: i64,
    pub http_port: u16,
    pub backend: StoreBackend,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("auth_secret", &"<redacted>")
            .field("database_url", &self.database_url.as_ref().map(|_| "<set>"))
            .field("cookie_secure", &self.cookie_secure)
            .field("cookie_max_age_days", &self.cookie_max_age_days)
            .field("http_port", &self.http_port)
            .field("backend", &self.backend)
            .finish()
    }
}

impl Settings {
    /// Minimal settings for an in-memory deployment; used by tests and `--memory` runs.
    pub fn new<S: Into<String>>(auth_secret: S) -> Self {
        Self {
            auth_secret: auth_secret.into(),
            database_url: None,
            cookie_secure: false,
            cookie_max_age_days: DEFAULT_COOKIE_MAX_AGE_DAYS,
            http_port: DEFAULT_HTTP_PORT,
            backend: StoreBackend::Memory,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build settings from an arbitrary variable source. `from_env` delegates here.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let auth_secret = lookup("AUTH_SECRET").unwrap_or_default();

        let cookie_secure = match lookup("COOKIE_SECURE") {
            Some(v) => parse_bool("COOKIE_SECURE", &v)?,
            None => false,
        };

        let cookie_max_age_days = match lookup("COOKIE_MAX_AGE_DAYS") {
            Some(v) => match v.trim().parse::<i64>() {
                Ok(days) if days_to_seconds(days).is_some() => days,
                _ => return Err(ConfigError::Invalid { name: "COOKIE_MAX_AGE_DAYS", value: v }),
            },
            None => DEFAULT_COOKIE_MAX_AGE_DAYS,
        };

        let http_port = match lookup("PROJECTDESK_HTTP_PORT") {
            Some(v) => v
                .trim()
                .parse::<u16>()
                .map_err(|_| ConfigError::Invalid { name: "PROJECTDESK_HTTP_PORT", value: v.clone() })?,
            None => DEFAULT_HTTP_PORT,
        };

        let backend = match lookup("PROJECTDESK_STORE").map(|s| s.trim().to_ascii_lowercase()) {
            None => StoreBackend::Postgres,
            Some(s) if s == "postgres" || s.is_empty() => StoreBackend::Postgres,
            Some(s) if s == "memory" => StoreBackend::Memory,
            Some(s) => return Err(ConfigError::Invalid { name: "PROJECTDESK_STORE", value: s }),
        };

        let database_url = lookup("DATABASE_URL").filter(|s| !s.trim().is_empty());

        let settings = Self {
            auth_secret,
            database_url,
            cookie_secure,
            cookie_max_age_days,
            http_port,
            backend,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Checks the invariants the server relies on. Called again after CLI overrides.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth_secret.trim().is_empty() {
            return Err(ConfigError::MissingSecret);
        }
        if self.backend == StoreBackend::Postgres && self.database_url.is_none() {
            return Err(ConfigError::MissingDatabaseUrl);
        }
        if days_to_seconds(self.cookie_max_age_days).is_none() {
            return Err(ConfigError::Invalid {
                name: "COOKIE_MAX_AGE_DAYS",
                value: self.cookie_max_age_days.to_string(),
            });
        }
        Ok(())
    }

    /// Cookie `Max-Age` for both the session and CSRF cookies.
    pub fn max_age_seconds(&self) -> i64 {
        // Fields are public; saturate rather than wrap if someone skips `validate`.
        self.cookie_max_age_days.saturating_mul(SECONDS_PER_DAY)
    }
}

/// Positive day counts whose `Max-Age` still fits in an `i64`.
fn days_to_seconds(days: i64) -> Option<i64> {
    if days <= 0 { return None; }
    days.checked_mul(SECONDS_PER_DAY)
}

pub fn parse_bool(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid { name, value: value.to_string() }),
    }
}
