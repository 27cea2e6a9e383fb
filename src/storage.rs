//!
//! projectdesk storage module
//! --------------------------
//! The persistent store is a collaborator of the authentication core. The core
//! only ever needs point lookups and single-row updates on users, plus one
//! atomic operation (account deletion). Project handlers need ownership-scoped
//! CRUD. Both surfaces are traits so the HTTP layer can run against the
//! PostgreSQL store in production and the in-memory store in tests.
//!
//! All trait futures are `Send` so handlers stay spawnable on the tokio runtime.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("nickname already taken: {0}")]
    NicknameTaken(String),
    #[error(transparent)]
    Postgres(#[from] tokio_postgres::Error),
}

/// A registered account as seen by the rest of the service. The password hash is
/// deliberately not part of it; see [`Credentials`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub nickname: String,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Login-only view: the user together with the stored PHC hash.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub user: User,
    pub password_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub name_ru: String,
    pub name_en: String,
    pub organization_ru: String,
    pub organization_en: String,
    pub direction: String,
    pub scope: String,
    pub focus: String,
    pub profile_type: String,
    pub specialization: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Body of a create request. Only `name_ru` is mandatory.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewProject {
    pub name_ru: String,
    #[serde(default)]
    pub name_en: String,
    #[serde(default)]
    pub organization_ru: String,
    #[serde(default)]
    pub organization_en: String,
    #[serde(default)]
    pub direction: String,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub focus: String,
    #[serde(default)]
    pub profile_type: String,
    #[serde(default)]
    pub specialization: String,
}

/// Partial update; `None` keeps the stored value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectPatch {
    pub name_ru: Option<String>,
    pub name_en: Option<String>,
    pub organization_ru: Option<String>,
    pub organization_en: Option<String>,
    pub direction: Option<String>,
    pub scope: Option<String>,
    pub focus: Option<String>,
    pub profile_type: Option<String>,
    pub specialization: Option<String>,
}

impl ProjectPatch {
    fn apply_to(&self, p: &mut Project) {
        let fields: [(&Option<String>, &mut String); 9] = [
            (&self.name_ru, &mut p.name_ru),
            (&self.name_en, &mut p.name_en),
            (&self.organization_ru, &mut p.organization_ru),
            (&self.organization_en, &mut p.organization_en),
            (&self.direction, &mut p.direction),
            (&self.scope, &mut p.scope),
            (&self.focus, &mut p.focus),
            (&self.profile_type, &mut p.profile_type),
            (&self.specialization, &mut p.specialization),
        ];
        for (src, dst) in fields {
            if let Some(v) = src { *dst = v.clone(); }
        }
    }
}

/// User operations consumed by the session core and the auth handlers.
pub trait UserStore: Send + Sync + 'static {
    fn fetch_user(&self, id: Uuid) -> impl Future<Output = Result<Option<User>, StoreError>> + Send;

    /// Case-insensitive nickname lookup used by login and registration.
    fn fetch_credentials_by_nickname(
        &self,
        nickname: &str,
    ) -> impl Future<Output = Result<Option<Credentials>, StoreError>> + Send;

    fn create_user_with_password(
        &self,
        nickname: &str,
        password_hash: &str,
    ) -> impl Future<Output = Result<User, StoreError>> + Send;

    /// Record activity for sliding sessions.
    fn touch_user(&self, id: Uuid, at: DateTime<Utc>) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Remove the user and every project they own in one all-or-nothing step.
    /// Returns whether a user row was deleted.
    fn delete_user_and_owned_records(&self, id: Uuid) -> impl Future<Output = Result<bool, StoreError>> + Send;
}

/// Ownership-scoped project operations. A project owned by someone else behaves
/// exactly like a missing one.
pub trait ProjectStore: Send + Sync + 'static {
    fn list_projects(&self, owner: Uuid) -> impl Future<Output = Result<Vec<Project>, StoreError>> + Send;

    fn fetch_project(&self, id: i64, owner: Uuid) -> impl Future<Output = Result<Option<Project>, StoreError>> + Send;

    fn create_project(&self, new: NewProject, owner: Uuid) -> impl Future<Output = Result<Project, StoreError>> + Send;

    fn update_project(
        &self,
        id: i64,
        patch: ProjectPatch,
        owner: Uuid,
    ) -> impl Future<Output = Result<Option<Project>, StoreError>> + Send;

    fn delete_project(&self, id: i64, owner: Uuid) -> impl Future<Output = Result<bool, StoreError>> + Send;
}

/// Everything the HTTP layer needs from a backend.
pub trait Store: UserStore + ProjectStore {}

impl<T: UserStore + ProjectStore> Store for T {}
