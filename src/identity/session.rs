use std::sync::Arc;

use axum::http::header::SET_COOKIE;
use axum::http::HeaderMap;
use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use super::cookies::{parse_cookie, CookiePolicy};
use super::csrf::CsrfGuard;
use super::token::IdentityCodec;
use crate::config::{ConfigError, Settings};
use crate::error::AppError;
use crate::storage::{User, UserStore};

pub const SESSION_COOKIE: &str = "user_id";

/// Stateless session gate: identity lives in the signed cookie, the store only
/// confirms the account still exists and records activity.
pub struct SessionManager<S> {
    codec: IdentityCodec,
    csrf: CsrfGuard,
    policy: CookiePolicy,
    store: Arc<S>,
}

impl<S> Clone for SessionManager<S> {
    fn clone(&self) -> Self {
        Self { codec: self.codec.clone(), csrf: self.csrf.clone(), policy: self.policy, store: Arc::clone(&self.store) }
    }
}

impl<S: UserStore> SessionManager<S> {
    pub fn new(settings: &Settings, store: Arc<S>) -> Result<Self, ConfigError> {
        let codec = IdentityCodec::new(settings.auth_secret.as_bytes())?;
        let policy = CookiePolicy::from_settings(settings);
        Ok(Self { codec, csrf: CsrfGuard::new(policy), policy, store })
    }

    pub fn codec(&self) -> &IdentityCodec { &self.codec }

    pub fn csrf(&self) -> &CsrfGuard { &self.csrf }

    /// Cookie and signature check only. No store access, no side effects.
    pub fn verify(&self, headers: &HeaderMap) -> Result<Uuid, AppError> {
        let raw = parse_cookie(headers, SESSION_COOKIE).ok_or_else(AppError::unauthorized)?;
        self.codec.decode(&raw).ok_or_else(AppError::unauthorized)
    }

    /// Full gate for protected requests. On success the session cookie is
    /// re-issued into `response` and last-seen is refreshed.
    pub async fn resolve(&self, headers: &HeaderMap, response: &mut HeaderMap) -> Result<User, AppError> {
        let user_id = self.verify(headers)?;
        let Some(user) = self.store.fetch_user(user_id).await? else {
            debug!(target: "session", user = %user_id, "signed cookie for unknown user");
            return Err(AppError::unauthorized());
        };
        self.renew(response, user.id)?;
        self.store.touch_user(user.id, Utc::now()).await?;
        Ok(user)
    }

    /// Sliding expiration: same identifier, fresh Max-Age window.
    pub fn renew(&self, response: &mut HeaderMap, user_id: Uuid) -> Result<(), AppError> {
        let token = self.codec.encode(user_id);
        response.append(SET_COOKIE, self.policy.issue(SESSION_COOKIE, &token, true)?);
        Ok(())
    }

    /// Start a session: identity cookie plus a new CSRF token, always together.
    /// Returns the CSRF token for the response body.
    pub fn establish(&self, response: &mut HeaderMap, user_id: Uuid) -> Result<String, AppError> {
        self.renew(response, user_id)?;
        let csrf = self.csrf.issue(response)?;
        debug!(target: "session", user = %user_id, "session established");
        Ok(csrf)
    }

    /// Clear both cookies with the same attributes they were issued with.
    pub fn teardown(&self, response: &mut HeaderMap) {
        response.append(SET_COOKIE, self.policy.expire(SESSION_COOKIE, true));
        self.csrf.expire(response);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, StoreError};
    use axum::http::header::COOKIE;
    use axum::http::HeaderValue;

    fn manager() -> (SessionManager<MemoryStore>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let sm = SessionManager::new(&Settings::new("session-test-secret"), Arc::clone(&store)).unwrap();
        (sm, store)
    }

    fn cookie_header(token: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(COOKIE, HeaderValue::from_str(&format!("{}={}", SESSION_COOKIE, token)).unwrap());
        h
    }

    fn set_cookies(h: &HeaderMap) -> Vec<String> {
        h.get_all(SET_COOKIE).iter().map(|v| v.to_str().unwrap().to_string()).collect()
    }

    fn session_token_from(h: &HeaderMap) -> String {
        let prefix = format!("{}=", SESSION_COOKIE);
        let line = set_cookies(h).into_iter().find(|c| c.starts_with(&prefix)).unwrap();
        line[prefix.len()..].split(';').next().unwrap().to_string()
    }

    #[tokio::test]
    async fn resolve_without_cookie_is_unauthorized() {
        let (sm, _) = manager();
        let mut resp = HeaderMap::new();
        assert_eq!(sm.resolve(&HeaderMap::new(), &mut resp).await.unwrap_err(), AppError::unauthorized());
        assert!(resp.is_empty());
    }

    #[tokio::test]
    async fn resolve_with_forged_cookie_is_unauthorized() {
        let (sm, store) = manager();
        let user = store.create_user_with_password("eve", "phc").await.unwrap();
        let other = SessionManager::new(&Settings::new("another-secret"), Arc::clone(&store)).unwrap();
        let forged = other.codec().encode(user.id);
        let mut resp = HeaderMap::new();
        assert_eq!(sm.resolve(&cookie_header(&forged), &mut resp).await.unwrap_err(), AppError::unauthorized());
        assert!(resp.is_empty());
    }

    #[tokio::test]
    async fn resolve_for_deleted_user_is_the_same_unauthorized() {
        let (sm, store) = manager();
        let user = store.create_user_with_password("gone", "phc").await.unwrap();
        let token = sm.codec().encode(user.id);
        store.delete_user_and_owned_records(user.id).await.unwrap();
        let mut resp = HeaderMap::new();
        assert_eq!(sm.resolve(&cookie_header(&token), &mut resp).await.unwrap_err(), AppError::unauthorized());
    }

    #[tokio::test]
    async fn resolve_renews_cookie_and_touches_last_seen() {
        let (sm, store) = manager();
        let user = store.create_user_with_password("carol", "phc").await.unwrap();
        let stale = user.last_seen - chrono::Duration::days(3);
        store.touch_user(user.id, stale).await.unwrap();

        let token = sm.codec().encode(user.id);
        let mut resp = HeaderMap::new();
        let resolved = sm.resolve(&cookie_header(&token), &mut resp).await.unwrap();
        assert_eq!(resolved.id, user.id);

        let renewed = session_token_from(&resp);
        assert_eq!(sm.codec().decode(&renewed), Some(user.id));
        let line = &set_cookies(&resp)[0];
        assert!(line.contains("Max-Age=2592000"));
        assert!(line.contains("HttpOnly"));

        let after = store.fetch_user(user.id).await.unwrap().unwrap();
        assert!(after.last_seen > stale);
    }

    #[tokio::test]
    async fn renewal_never_changes_identity() {
        let (sm, _) = manager();
        let id = Uuid::new_v4();
        let mut first = HeaderMap::new();
        sm.renew(&mut first, id).unwrap();
        let mut second = HeaderMap::new();
        sm.renew(&mut second, sm.codec().decode(&session_token_from(&first)).unwrap()).unwrap();
        assert_eq!(sm.codec().decode(&session_token_from(&second)), Some(id));
    }

    #[test]
    fn establish_issues_both_cookies_together() {
        let (sm, _) = manager();
        let mut resp = HeaderMap::new();
        let csrf = sm.establish(&mut resp, Uuid::new_v4()).unwrap();
        let cookies = set_cookies(&resp);
        assert_eq!(cookies.len(), 2);
        assert!(cookies[0].starts_with("user_id="));
        assert!(cookies[1].starts_with(&format!("csrf_token={};", csrf)));
    }

    #[test]
    fn teardown_expires_both_cookies_with_issue_flags() {
        let mut settings = Settings::new("k");
        settings.cookie_secure = true;
        let sm = SessionManager::new(&settings, Arc::new(MemoryStore::new())).unwrap();
        let mut resp = HeaderMap::new();
        sm.teardown(&mut resp);
        let cookies = set_cookies(&resp);
        assert_eq!(cookies.len(), 2);
        assert!(cookies[0].starts_with("user_id=;"));
        assert!(cookies[0].ends_with("SameSite=Lax; HttpOnly; Secure"));
        assert!(cookies[1].starts_with("csrf_token=;"));
        assert!(cookies[1].ends_with("SameSite=Lax; Secure"));
        assert!(cookies.iter().all(|c| c.contains("Max-Age=0")));
    }

    struct DownStore;

    impl UserStore for DownStore {
        async fn fetch_user(&self, _id: Uuid) -> Result<Option<User>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn fetch_credentials_by_nickname(&self, _n: &str) -> Result<Option<crate::storage::Credentials>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn create_user_with_password(&self, _n: &str, _h: &str) -> Result<User, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn touch_user(&self, _id: Uuid, _at: chrono::DateTime<Utc>) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn delete_user_and_owned_records(&self, _id: Uuid) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn store_outage_is_not_reported_as_unauthorized() {
        let sm = SessionManager::new(&Settings::new("k"), Arc::new(DownStore)).unwrap();
        let token = sm.codec().encode(Uuid::new_v4());
        let mut resp = HeaderMap::new();
        let err = sm.resolve(&cookie_header(&token), &mut resp).await.unwrap_err();
        assert_eq!(err.http_status(), 503);
    }
}
