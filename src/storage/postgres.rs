//! PostgreSQL-backed store.
//!
//! A fixed set of client slots, each behind its own async mutex. A slot opens
//! its connection on first use and reopens it once the driver task has ended,
//! so a database restart costs the in-flight requests and nothing more.
//! Schema creation is idempotent (`IF NOT EXISTS`) so start-up doubles as a
//! lightweight migration.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, Config, NoTls, Row};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Credentials, NewProject, Project, ProjectPatch, ProjectStore, StoreError, User, UserStore};

const SCHEMA_DDL: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id UUID PRIMARY KEY,
        nickname TEXT UNIQUE NOT NULL,
        password_hash TEXT NOT NULL DEFAULT '',
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        last_seen TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS users_nickname_lower_idx ON users (lower(nickname))",
    "CREATE TABLE IF NOT EXISTS projects (
        id BIGSERIAL PRIMARY KEY,
        owner_id UUID NOT NULL REFERENCES users(id),
        name_ru TEXT NOT NULL,
        name_en TEXT NOT NULL DEFAULT '',
        organization_ru TEXT NOT NULL DEFAULT '',
        organization_en TEXT NOT NULL DEFAULT '',
        direction TEXT NOT NULL DEFAULT '',
        scope TEXT NOT NULL DEFAULT '',
        focus TEXT NOT NULL DEFAULT '',
        profile_type TEXT NOT NULL DEFAULT '',
        specialization TEXT NOT NULL DEFAULT '',
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )",
    "CREATE INDEX IF NOT EXISTS projects_owner_idx ON projects(owner_id)",
];

const PROJECT_COLUMNS: &str = "id, name_ru, name_en, organization_ru, organization_en, \
     direction, scope, focus, profile_type, specialization, created_at, updated_at";

const POOL_SIZE: usize = 5;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct PgStore {
    config: Config,
    slots: Vec<Mutex<Option<Client>>>,
    next: AtomicUsize,
}

impl PgStore {
    /// Parse the URL, open a first connection and ensure the schema exists.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let store = Self::lazy(database_url)?;
        store.init_schema().await?;
        info!(target: "store", pool = POOL_SIZE, "postgres store ready");
        Ok(store)
    }

    /// No I/O: every slot connects on first use.
    fn lazy(database_url: &str) -> Result<Self, StoreError> {
        let mut config: Config = database_url.parse()?;
        if config.get_connect_timeout().is_none() {
            config.connect_timeout(CONNECT_TIMEOUT);
        }
        let slots = (0..POOL_SIZE).map(|_| Mutex::new(None)).collect();
        Ok(Self { config, slots, next: AtomicUsize::new(0) })
    }

    async fn open(&self) -> Result<Client, StoreError> {
        let (client, connection) = self.config.connect(NoTls).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(target: "store", "postgres connection lost: {e}");
            }
        });
        debug!(target: "store", "opened postgres connection");
        Ok(client)
    }

    /// Borrow a live client: an idle slot if there is one, otherwise the next
    /// slot in turn. Missing or closed clients are replaced before use.
    async fn client(&self) -> Result<MappedMutexGuard<'_, Client>, StoreError> {
        let mut guard = match self.slots.iter().find_map(|slot| slot.try_lock().ok()) {
            Some(guard) => guard,
            None => {
                let i = self.next.fetch_add(1, Ordering::Relaxed) % self.slots.len();
                self.slots[i].lock().await
            }
        };
        if guard.as_ref().map_or(true, Client::is_closed) {
            *guard = None;
            *guard = Some(self.open().await?);
        }
        MutexGuard::try_map(guard, Option::as_mut)
            .map_err(|_| StoreError::Unavailable("no postgres connection".to_string()))
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        let client = self.client().await?;
        for ddl in SCHEMA_DDL {
            client.batch_execute(ddl).await?;
        }
        Ok(())
    }
}

fn user_from_row(row: &Row) -> Result<User, StoreError> {
    Ok(User {
        id: row.try_get("id")?,
        nickname: row.try_get("nickname")?,
        created_at: row.try_get("created_at")?,
        last_seen: row.try_get("last_seen")?,
    })
}

fn project_from_row(row: &Row) -> Result<Project, StoreError> {
    Ok(Project {
        id: row.try_get("id")?,
        name_ru: row.try_get("name_ru")?,
        name_en: row.try_get("name_en")?,
        organization_ru: row.try_get("organization_ru")?,
        organization_en: row.try_get("organization_en")?,
        direction: row.try_get("direction")?,
        scope: row.try_get("scope")?,
        focus: row.try_get("focus")?,
        profile_type: row.try_get("profile_type")?,
        specialization: row.try_get("specialization")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

impl UserStore for PgStore {
    async fn fetch_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let client = self.client().await?;
        let row = client
            .query_opt("SELECT id, nickname, created_at, last_seen FROM users WHERE id = $1", &[&id])
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn fetch_credentials_by_nickname(&self, nickname: &str) -> Result<Option<Credentials>, StoreError> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                "SELECT id, nickname, password_hash, created_at, last_seen FROM users WHERE lower(nickname) = lower($1)",
                &[&nickname],
            )
            .await?;
        match row {
            Some(row) => Ok(Some(Credentials { user: user_from_row(&row)?, password_hash: row.try_get("password_hash")? })),
            None => Ok(None),
        }
    }

    async fn create_user_with_password(&self, nickname: &str, password_hash: &str) -> Result<User, StoreError> {
        let client = self.client().await?;
        let id = Uuid::new_v4();
        let res = client
            .query_one(
                "INSERT INTO users (id, nickname, password_hash) VALUES ($1, $2, $3) \
                 RETURNING id, nickname, created_at, last_seen",
                &[&id, &nickname, &password_hash],
            )
            .await;
        match res {
            Ok(row) => user_from_row(&row),
            Err(e) if e.code() == Some(&SqlState::UNIQUE_VIOLATION) => Err(StoreError::NicknameTaken(nickname.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn touch_user(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        let client = self.client().await?;
        client.execute("UPDATE users SET last_seen = $2 WHERE id = $1", &[&id, &at]).await?;
        Ok(())
    }

    async fn delete_user_and_owned_records(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut client = self.client().await?;
        // Dropping the transaction without commit rolls back both deletes.
        let tx = client.transaction().await?;
        tx.execute("DELETE FROM projects WHERE owner_id = $1", &[&id]).await?;
        let removed = tx.execute("DELETE FROM users WHERE id = $1", &[&id]).await?;
        tx.commit().await?;
        Ok(removed == 1)
    }
}

impl ProjectStore for PgStore {
    async fn list_projects(&self, owner: Uuid) -> Result<Vec<Project>, StoreError> {
        let client = self.client().await?;
        let sql = format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE owner_id = $1 ORDER BY id ASC");
        let rows = client.query(sql.as_str(), &[&owner]).await?;
        rows.iter().map(project_from_row).collect()
    }

    async fn fetch_project(&self, id: i64, owner: Uuid) -> Result<Option<Project>, StoreError> {
        let client = self.client().await?;
        let sql = format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = $1 AND owner_id = $2");
        let row = client.query_opt(sql.as_str(), &[&id, &owner]).await?;
        row.as_ref().map(project_from_row).transpose()
    }

    async fn create_project(&self, new: NewProject, owner: Uuid) -> Result<Project, StoreError> {
        let client = self.client().await?;
        let sql = format!(
            "INSERT INTO projects (owner_id, name_ru, name_en, organization_ru, organization_en, \
             direction, scope, focus, profile_type, specialization) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) RETURNING {PROJECT_COLUMNS}"
        );
        let row = client
            .query_one(
                sql.as_str(),
                &[
                    &owner,
                    &new.name_ru,
                    &new.name_en,
                    &new.organization_ru,
                    &new.organization_en,
                    &new.direction,
                    &new.scope,
                    &new.focus,
                    &new.profile_type,
                    &new.specialization,
                ],
            )
            .await?;
        project_from_row(&row)
    }

    async fn update_project(&self, id: i64, patch: ProjectPatch, owner: Uuid) -> Result<Option<Project>, StoreError> {
        let client = self.client().await?;
        // NULL parameters keep the stored column.
        let sql = format!(
            "UPDATE projects SET \
                name_ru = COALESCE($3, name_ru), \
                name_en = COALESCE($4, name_en), \
                organization_ru = COALESCE($5, organization_ru), \
                organization_en = COALESCE($6, organization_en), \
                direction = COALESCE($7, direction), \
                scope = COALESCE($8, scope), \
                focus = COALESCE($9, focus), \
                profile_type = COALESCE($10, profile_type), \
                specialization = COALESCE($11, specialization), \
                updated_at = NOW() \
             WHERE id = $1 AND owner_id = $2 RETURNING {PROJECT_COLUMNS}"
        );
        let row = client
            .query_opt(
                sql.as_str(),
                &[
                    &id,
                    &owner,
                    &patch.name_ru,
                    &patch.name_en,
                    &patch.organization_ru,
                    &patch.organization_en,
                    &patch.direction,
                    &patch.scope,
                    &patch.focus,
                    &patch.profile_type,
                    &patch.specialization,
                ],
            )
            .await?;
        row.as_ref().map(project_from_row).transpose()
    }

    async fn delete_project(&self, id: i64, owner: Uuid) -> Result<bool, StoreError> {
        let client = self.client().await?;
        let n = client.execute("DELETE FROM projects WHERE id = $1 AND owner_id = $2", &[&id, &owner]).await?;
        Ok(n == 1)
    }
}
