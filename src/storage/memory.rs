//! In-process store used by tests and `--memory` runs.
//!
//! A single `RwLock` guards users and projects together so account deletion is
//! atomic with respect to every other operation.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use super::{Credentials, NewProject, Project, ProjectPatch, ProjectStore, StoreError, User, UserStore};

#[derive(Debug)]
struct UserRow {
    user: User,
    password_hash: String,
}

#[derive(Debug)]
struct ProjectRow {
    owner_id: Uuid,
    project: Project,
}

#[derive(Debug, Default)]
struct Inner {
    users: HashMap<Uuid, UserRow>,
    projects: BTreeMap<i64, ProjectRow>,
    last_project_id: i64,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    pub fn user_count(&self) -> usize { self.inner.read().users.len() }

    pub fn project_count(&self) -> usize { self.inner.read().projects.len() }
}

impl UserStore for MemoryStore {
    async fn fetch_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.inner.read().users.get(&id).map(|row| row.user.clone()))
    }

    async fn fetch_credentials_by_nickname(&self, nickname: &str) -> Result<Option<Credentials>, StoreError> {
        let needle = nickname.to_lowercase();
        let guard = self.inner.read();
        let found = guard
            .users
            .values()
            .find(|row| row.user.nickname.to_lowercase() == needle)
            .map(|row| Credentials { user: row.user.clone(), password_hash: row.password_hash.clone() });
        Ok(found)
    }

    async fn create_user_with_password(&self, nickname: &str, password_hash: &str) -> Result<User, StoreError> {
        let mut guard = self.inner.write();
        let needle = nickname.to_lowercase();
        if guard.users.values().any(|row| row.user.nickname.to_lowercase() == needle) {
            return Err(StoreError::NicknameTaken(nickname.to_string()));
        }
        let now = Utc::now();
        let user = User { id: Uuid::new_v4(), nickname: nickname.to_string(), created_at: now, last_seen: now };
        guard.users.insert(user.id, UserRow { user: user.clone(), password_hash: password_hash.to_string() });
        Ok(user)
    }

    async fn touch_user(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        if let Some(row) = self.inner.write().users.get_mut(&id) {
            row.user.last_seen = at;
        }
        Ok(())
    }

    async fn delete_user_and_owned_records(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut guard = self.inner.write();
        guard.projects.retain(|_, row| row.owner_id != id);
        Ok(guard.users.remove(&id).is_some())
    }
}

impl ProjectStore for MemoryStore {
    async fn list_projects(&self, owner: Uuid) -> Result<Vec<Project>, StoreError> {
        // BTreeMap iteration keeps id order.
        Ok(self
            .inner
            .read()
            .projects
            .values()
            .filter(|row| row.owner_id == owner)
            .map(|row| row.project.clone())
            .collect())
    }

    async fn fetch_project(&self, id: i64, owner: Uuid) -> Result<Option<Project>, StoreError> {
        Ok(self
            .inner
            .read()
            .projects
            .get(&id)
            .filter(|row| row.owner_id == owner)
            .map(|row| row.project.clone()))
    }

    async fn create_project(&self, new: NewProject, owner: Uuid) -> Result<Project, StoreError> {
        let mut guard = self.inner.write();
        guard.last_project_id += 1;
        let now = Utc::now();
        let project = Project {
            id: guard.last_project_id,
            name_ru: new.name_ru,
            name_en: new.name_en,
            organization_ru: new.organization_ru,
            organization_en: new.organization_en,
            direction: new.direction,
            scope: new.scope,
            focus: new.focus,
            profile_type: new.profile_type,
            specialization: new.specialization,
            created_at: now,
            updated_at: now,
        };
        guard.projects.insert(project.id, ProjectRow { owner_id: owner, project: project.clone() });
        Ok(project)
    }

    async fn update_project(&self, id: i64, patch: ProjectPatch, owner: Uuid) -> Result<Option<Project>, StoreError> {
        let mut guard = self.inner.write();
        let Some(row) = guard.projects.get_mut(&id).filter(|row| row.owner_id == owner) else {
            return Ok(None);
        };
        patch.apply_to(&mut row.project);
        row.project.updated_at = Utc::now();
        Ok(Some(row.project.clone()))
    }

    async fn delete_project(&self, id: i64, owner: Uuid) -> Result<bool, StoreError> {
        let mut guard = self.inner.write();
        match guard.projects.get(&id) {
            Some(row) if row.owner_id == owner => {
                guard.projects.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(name: &str) -> NewProject {
        NewProject { name_ru: name.to_string(), ..Default::default() }
    }

    #[tokio::test]
    async fn nickname_lookup_is_case_insensitive_and_unique() {
        let store = MemoryStore::new();
        let user = store.create_user_with_password("Alice", "phc").await.unwrap();
        let creds = store.fetch_credentials_by_nickname("aLiCe").await.unwrap().unwrap();
        assert_eq!(creds.user.id, user.id);
        assert_eq!(creds.password_hash, "phc");
        let dup = store.create_user_with_password("ALICE", "phc2").await;
        assert!(matches!(dup, Err(StoreError::NicknameTaken(_))));
    }

    #[tokio::test]
    async fn touch_updates_last_seen() {
        let store = MemoryStore::new();
        let user = store.create_user_with_password("bob", "phc").await.unwrap();
        let later = user.last_seen + chrono::Duration::minutes(5);
        store.touch_user(user.id, later).await.unwrap();
        assert_eq!(store.fetch_user(user.id).await.unwrap().unwrap().last_seen, later);
    }

    #[tokio::test]
    async fn projects_are_scoped_to_their_owner() {
        let store = MemoryStore::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let p1 = store.create_project(sample("один"), a).await.unwrap();
        let p2 = store.create_project(sample("два"), a).await.unwrap();
        store.create_project(sample("чужой"), b).await.unwrap();

        let listed = store.list_projects(a).await.unwrap();
        assert_eq!(listed.iter().map(|p| p.id).collect::<Vec<_>>(), vec![p1.id, p2.id]);

        assert!(store.fetch_project(p1.id, b).await.unwrap().is_none());
        let patch = ProjectPatch { name_en: Some("x".into()), ..Default::default() };
        assert!(store.update_project(p1.id, patch, b).await.unwrap().is_none());
        assert!(!store.delete_project(p1.id, b).await.unwrap());
        assert!(store.delete_project(p1.id, a).await.unwrap());
        assert!(store.fetch_project(p1.id, a).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn deleting_a_user_removes_only_their_projects() {
        let store = MemoryStore::new();
        let gone = store.create_user_with_password("gone", "phc").await.unwrap();
        let kept = store.create_user_with_password("kept", "phc").await.unwrap();
        store.create_project(sample("a"), gone.id).await.unwrap();
        store.create_project(sample("b"), gone.id).await.unwrap();
        store.create_project(sample("c"), kept.id).await.unwrap();

        assert!(store.delete_user_and_owned_records(gone.id).await.unwrap());
        assert!(store.fetch_user(gone.id).await.unwrap().is_none());
        assert_eq!(store.project_count(), 1);
        assert_eq!(store.user_count(), 1);
        assert!(!store.delete_user_and_owned_records(gone.id).await.unwrap());
    }
}
