//! Ownership-scoped project CRUD. Reads need a session; writes also need CSRF.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use tracing::info;

use super::extract::{AppJson, AppPath, CsrfProtected, CurrentUser};
use super::AppState;
use crate::error::{AppError, AppResult};
use crate::storage::{NewProject, ProjectPatch, Store};

fn not_found() -> AppError { AppError::not_found("not_found", "Not found") }

fn require_name(name: &str) -> AppResult<()> {
    if name.trim().is_empty() {
        return Err(AppError::user("name_required", "name_ru must not be empty"));
    }
    Ok(())
}

pub async fn list_projects<S: Store>(
    State(state): State<AppState<S>>,
    current: CurrentUser,
) -> AppResult<impl IntoResponse> {
    let projects = state.store.list_projects(current.user.id).await?;
    info!(target: "audit", nick = %current.user.nickname, count = projects.len(), "event=projects_listed");
    Ok((current.renewal, Json(projects)))
}

pub async fn get_project<S: Store>(
    State(state): State<AppState<S>>,
    AppPath(project_id): AppPath<i64>,
    current: CurrentUser,
) -> AppResult<impl IntoResponse> {
    let project = state.store.fetch_project(project_id, current.user.id).await?.ok_or_else(not_found)?;
    info!(target: "audit", nick = %current.user.nickname, id = project_id, "event=project_read");
    Ok((current.renewal, Json(project)))
}

pub async fn create_project<S: Store>(
    State(state): State<AppState<S>>,
    _csrf: CsrfProtected,
    current: CurrentUser,
    AppJson(payload): AppJson<NewProject>,
) -> AppResult<impl IntoResponse> {
    require_name(&payload.name_ru)?;
    let project = state.store.create_project(payload, current.user.id).await?;
    info!(target: "audit", nick = %current.user.nickname, id = project.id, "event=project_created");
    Ok((StatusCode::CREATED, current.renewal, Json(project)))
}

pub async fn update_project<S: Store>(
    State(state): State<AppState<S>>,
    AppPath(project_id): AppPath<i64>,
    _csrf: CsrfProtected,
    current: CurrentUser,
    AppJson(patch): AppJson<ProjectPatch>,
) -> AppResult<impl IntoResponse> {
    if let Some(name) = &patch.name_ru {
        require_name(name)?;
    }
    let project = state
        .store
        .update_project(project_id, patch, current.user.id)
        .await?
        .ok_or_else(not_found)?;
    info!(target: "audit", nick = %current.user.nickname, id = project_id, "event=project_updated");
    Ok((current.renewal, Json(project)))
}

pub async fn delete_project<S: Store>(
    State(state): State<AppState<S>>,
    AppPath(project_id): AppPath<i64>,
    _csrf: CsrfProtected,
    current: CurrentUser,
) -> AppResult<impl IntoResponse> {
    if !state.store.delete_project(project_id, current.user.id).await? {
        return Err(not_found());
    }
    info!(target: "audit", nick = %current.user.nickname, id = project_id, "event=project_deleted");
    Ok((StatusCode::NO_CONTENT, current.renewal, ()))
}
