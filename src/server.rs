//!
//! projectdesk HTTP server
//! -----------------------
//! This module defines the Axum-based HTTP API.
//!
//! Responsibilities:
//! - Session management with a signed identity cookie + double-submit CSRF token.
//! - Registration, login, `/me`, logout and account deletion endpoints.
//! - Ownership-scoped project endpoints (see `projects`).
//! - Request logging middleware (see `logging`).
//! - Store selection and server start-up.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{ConfigError, Settings, StoreBackend};
use crate::error::{AppError, AppResult};
use crate::identity::SessionManager;
use crate::security;
use crate::storage::{MemoryStore, PgStore, Store, User};

pub mod extract;
pub mod logging;
pub mod projects;

use extract::{AppJson, CsrfProtected, CurrentUser, SessionRenewal};

/// Shared server state injected into all handlers.
///
/// Everything here is immutable after start-up; per-request identity comes
/// from the signed cookie, not from in-process session maps.
pub struct AppState<S> {
    pub settings: Arc<Settings>,
    pub store: Arc<S>,
    pub sessions: SessionManager<S>,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self { settings: Arc::clone(&self.settings), store: Arc::clone(&self.store), sessions: self.sessions.clone() }
    }
}

impl<S: Store> AppState<S> {
    pub fn new(settings: Settings, store: Arc<S>) -> Result<Self, ConfigError> {
        settings.validate()?;
        let sessions = SessionManager::new(&settings, Arc::clone(&store))?;
        Ok(Self { settings: Arc::new(settings), store, sessions })
    }
}

/// Build the full route table for a given store backend.
pub fn router<S: Store>(state: AppState<S>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/auth/register", post(register::<S>))
        .route("/api/auth/login", post(login::<S>))
        .route("/api/auth/logout", post(logout::<S>))
        .route("/api/auth/me", get(me::<S>).delete(delete_account::<S>))
        .route("/api/projects", get(projects::list_projects::<S>).post(projects::create_project::<S>))
        .route(
            "/api/projects/{project_id}",
            get(projects::get_project::<S>)
                .put(projects::update_project::<S>)
                .delete(projects::delete_project::<S>),
        )
        .layer(middleware::from_fn_with_state(state.clone(), logging::log_requests::<S>))
        .with_state(state)
}

fn log_startup(settings: &Settings) {
    let cwd = std::env::current_dir().ok();
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    info!(target: "startup", "projectdesk starting: cwd={:?}, RUST_LOG='{}', settings={:?}", cwd, rust_log, settings);
    if !settings.cookie_secure {
        warn!(target: "startup", "cookies are issued without the Secure flag; enable COOKIE_SECURE behind HTTPS");
    }
}

/// Start the HTTP server against the configured store backend.
pub async fn run(settings: Settings) -> anyhow::Result<()> {
    log_startup(&settings);
    match settings.backend {
        StoreBackend::Memory => {
            warn!(target: "startup", "using the in-memory store; all data is lost on shutdown");
            serve(settings, Arc::new(MemoryStore::new())).await
        }
        StoreBackend::Postgres => {
            let url = settings.database_url.clone().ok_or(ConfigError::MissingDatabaseUrl)?;
            let store = PgStore::connect(&url).await.context("While connecting to the PostgreSQL store")?;
            serve(settings, Arc::new(store)).await
        }
    }
}

async fn serve<S: Store>(settings: Settings, store: Arc<S>) -> anyhow::Result<()> {
    let port = settings.http_port;
    let state = AppState::new(settings, store).context("While building server state")?;
    let app = router(state);

    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct RegisterPayload {
    nickname: String,
    #[serde(default)]
    create_if_missing: bool,
}

#[derive(Debug, Serialize)]
struct RegisterResponse {
    login: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct LoginPayload { login: String, password: String }

#[derive(Debug, Serialize)]
struct AuthResponse {
    user: User,
    csrf_token: String,
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

async fn run_blocking<T, F>(task: F) -> AppResult<T>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| AppError::internal("blocking_task".to_string(), e.to_string()))?
        .map_err(|e| AppError::internal("password_hash".to_string(), e.to_string()))
}

/// Create an account. The initial password equals the nickname and is handed
/// back once; registration does not log the caller in.
async fn register<S: Store>(
    State(state): State<AppState<S>>,
    AppJson(payload): AppJson<RegisterPayload>,
) -> AppResult<impl IntoResponse> {
    let nickname = payload.nickname.trim().to_string();
    if nickname.is_empty() {
        return Err(AppError::user("nickname_required", "Nickname is required"));
    }
    if state.store.fetch_credentials_by_nickname(&nickname).await?.is_some() {
        return Err(AppError::user("user_exists", "User already exists"));
    }
    if !payload.create_if_missing {
        info!(target: "audit", nick = %nickname, "event=user_not_created");
        return Err(AppError::user("creation_not_allowed", "Creation is not allowed"));
    }

    let password = nickname.clone();
    let to_hash = password.clone();
    let phc = run_blocking(move || security::hash_password(&to_hash)).await?;
    let user = state.store.create_user_with_password(&nickname, &phc).await?;
    info!(target: "audit", user = %user.id, nick = %user.nickname, "event=user_registered");
    Ok(Json(RegisterResponse { login: user.nickname, password }))
}

async fn login<S: Store>(
    State(state): State<AppState<S>>,
    AppJson(payload): AppJson<LoginPayload>,
) -> AppResult<impl IntoResponse> {
    let nickname = payload.login.trim();
    if nickname.is_empty() || payload.password.is_empty() {
        return Err(AppError::user("credentials_required", "Login and password are required"));
    }
    let invalid = || AppError::auth("invalid_credentials", "Invalid credentials");

    let creds = state.store.fetch_credentials_by_nickname(nickname).await?.ok_or_else(invalid)?;
    let hash = creds.password_hash.clone();
    let password = payload.password.clone();
    let ok = run_blocking(move || Ok(security::verify_password(&hash, &password))).await?;
    if !ok {
        return Err(invalid());
    }

    let mut headers = HeaderMap::new();
    let csrf_token = state.sessions.establish(&mut headers, creds.user.id)?;
    info!(target: "audit", user = %creds.user.id, nick = %creds.user.nickname, "event=user_login");
    Ok((SessionRenewal(headers), Json(AuthResponse { user: creds.user, csrf_token })))
}

/// Current user plus a freshly issued session cookie and CSRF token.
async fn me<S: Store>(State(state): State<AppState<S>>, current: CurrentUser) -> AppResult<impl IntoResponse> {
    // `establish` re-issues the session cookie itself, so the extractor's renewal is dropped.
    let mut headers = HeaderMap::new();
    let csrf_token = state.sessions.establish(&mut headers, current.user.id)?;
    info!(target: "audit", nick = %current.user.nickname, "event=auth_me");
    Ok((SessionRenewal(headers), Json(AuthResponse { user: current.user, csrf_token })))
}

async fn logout<S: Store>(State(state): State<AppState<S>>) -> impl IntoResponse {
    let mut headers = HeaderMap::new();
    state.sessions.teardown(&mut headers);
    info!(target: "audit", "event=logout");
    (SessionRenewal(headers), Json(serde_json::json!({"status": "logged_out"})))
}

async fn delete_account<S: Store>(
    State(state): State<AppState<S>>,
    _csrf: CsrfProtected,
    current: CurrentUser,
) -> AppResult<impl IntoResponse> {
    let removed = state.store.delete_user_and_owned_records(current.user.id).await?;
    let mut headers = HeaderMap::new();
    state.sessions.teardown(&mut headers);
    if removed {
        info!(target: "audit", nick = %current.user.nickname, "event=account_deleted");
    } else {
        // Lost a race with another deletion of the same account; the end state is the same.
        warn!(target: "audit", nick = %current.user.nickname, "event=account_already_deleted");
    }
    Ok((StatusCode::NO_CONTENT, SessionRenewal(headers), ()))
}
