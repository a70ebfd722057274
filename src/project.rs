//! Project persistence.
//!
//! A project is a named, versioned [`SourceDocument`] owned by a user.
//! Storage is behind the [`ProjectStore`] trait so embeddings can bring
//! their own backend; [`InMemoryProjectStore`] is the bundled default and
//! the reference for the trait's semantics.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::PersistError;
use crate::source::SourceDocument;

/// One stored project.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: Uuid,
    pub owner: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub source: SourceDocument,
    pub is_public: bool,
    /// Starts at 1 and increases by one per successful update.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a project.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProjectDraft {
    pub owner: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub source: SourceDocument,
    #[serde(default)]
    pub is_public: bool,
}

/// Partial update; `None` fields keep their current value.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProjectPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub source: Option<SourceDocument>,
    pub is_public: Option<bool>,
}

/// Storage backend for projects.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn create(&self, draft: ProjectDraft) -> Result<ProjectRecord, PersistError>;

    async fn get(&self, id: Uuid) -> Result<ProjectRecord, PersistError>;

    /// Apply a patch. Bumps `version` and `updated_at`.
    async fn update(&self, id: Uuid, patch: ProjectPatch) -> Result<ProjectRecord, PersistError>;

    async fn delete(&self, id: Uuid) -> Result<(), PersistError>;

    /// Copy an existing project into a fresh one owned by `new_owner`.
    /// The fork starts its own history at version 1.
    async fn fork(&self, id: Uuid, new_owner: &str) -> Result<ProjectRecord, PersistError>;

    /// All projects marked public, newest first.
    async fn list_public(&self) -> Result<Vec<ProjectRecord>, PersistError>;

    /// All projects belonging to `owner`, newest first.
    async fn list_by_owner(&self, owner: &str) -> Result<Vec<ProjectRecord>, PersistError>;
}

/// Process-local store backed by a map.
#[derive(Default)]
pub struct InMemoryProjectStore {
    records: RwLock<HashMap<Uuid, ProjectRecord>>,
}

impl InMemoryProjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProjectStore for InMemoryProjectStore {
    async fn create(&self, draft: ProjectDraft) -> Result<ProjectRecord, PersistError> {
        let now = Utc::now();
        let record = ProjectRecord {
            id: Uuid::new_v4(),
            owner: draft.owner,
            title: draft.title,
            description: draft.description,
            source: draft.source,
            is_public: draft.is_public,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        self.records.write().insert(record.id, record.clone());
        tracing::debug!(project = %record.id, "created project");
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> Result<ProjectRecord, PersistError> {
        self.records
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| PersistError::NotFound(id.to_string()))
    }

    async fn update(&self, id: Uuid, patch: ProjectPatch) -> Result<ProjectRecord, PersistError> {
        let mut records = self.records.write();
        let record = records
            .get_mut(&id)
            .ok_or_else(|| PersistError::NotFound(id.to_string()))?;
        if let Some(title) = patch.title {
            record.title = title;
        }
        if let Some(description) = patch.description {
            record.description = description;
        }
        if let Some(source) = patch.source {
            record.source = source;
        }
        if let Some(is_public) = patch.is_public {
            record.is_public = is_public;
        }
        record.version += 1;
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn delete(&self, id: Uuid) -> Result<(), PersistError> {
        self.records
            .write()
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| PersistError::NotFound(id.to_string()))
    }

    async fn fork(&self, id: Uuid, new_owner: &str) -> Result<ProjectRecord, PersistError> {
        let original = self.get(id).await?;
        let now = Utc::now();
        let fork = ProjectRecord {
            id: Uuid::new_v4(),
            owner: new_owner.to_string(),
            title: original.title,
            description: original.description,
            source: original.source,
            is_public: false,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        self.records.write().insert(fork.id, fork.clone());
        tracing::debug!(original = %id, fork = %fork.id, "forked project");
        Ok(fork)
    }

    async fn list_public(&self) -> Result<Vec<ProjectRecord>, PersistError> {
        let mut projects: Vec<_> = self
            .records
            .read()
            .values()
            .filter(|record| record.is_public)
            .cloned()
            .collect();
        projects.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(projects)
    }

    async fn list_by_owner(&self, owner: &str) -> Result<Vec<ProjectRecord>, PersistError> {
        let mut projects: Vec<_> = self
            .records
            .read()
            .values()
            .filter(|record| record.owner == owner)
            .cloned()
            .collect();
        projects.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(projects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(owner: &str, title: &str) -> ProjectDraft {
        ProjectDraft {
            owner: owner.into(),
            title: title.into(),
            source: SourceDocument {
                markup: "<h1>hi</h1>".into(),
                style: "h1 { color: red; }".into(),
                script: "console.log('hi');".into(),
            },
            ..ProjectDraft::default()
        }
    }

    #[tokio::test]
    async fn test_create_and_get_round_trip() {
        let store = InMemoryProjectStore::new();
        let created = store.create(draft("alice", "demo")).await.unwrap();
        assert_eq!(created.version, 1);

        let fetched = store.get(created.id).await.unwrap();
        assert_eq!(fetched.title, "demo");
        assert_eq!(fetched.source.markup, "<h1>hi</h1>");
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let store = InMemoryProjectStore::new();
        let err = store.get(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, PersistError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_update_bumps_version_and_keeps_unpatched_fields() {
        let store = InMemoryProjectStore::new();
        let created = store.create(draft("alice", "demo")).await.unwrap();

        let updated = store
            .update(
                created.id,
                ProjectPatch {
                    title: Some("renamed".into()),
                    ..ProjectPatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.title, "renamed");
        assert_eq!(updated.source, created.source);

        let again = store
            .update(created.id, ProjectPatch::default())
            .await
            .unwrap();
        assert_eq!(again.version, 3);
    }

    #[tokio::test]
    async fn test_delete_then_get_fails() {
        let store = InMemoryProjectStore::new();
        let created = store.create(draft("alice", "demo")).await.unwrap();
        store.delete(created.id).await.unwrap();
        assert!(store.get(created.id).await.is_err());
        assert!(store.delete(created.id).await.is_err());
    }

    #[tokio::test]
    async fn test_fork_copies_source_with_fresh_identity() {
        let store = InMemoryProjectStore::new();
        let original = store
            .create(ProjectDraft {
                is_public: true,
                ..draft("alice", "demo")
            })
            .await
            .unwrap();
        store
            .update(
                original.id,
                ProjectPatch {
                    source: Some(SourceDocument {
                        markup: "<p>v2</p>".into(),
                        ..SourceDocument::default()
                    }),
                    ..ProjectPatch::default()
                },
            )
            .await
            .unwrap();

        let fork = store.fork(original.id, "bob").await.unwrap();
        assert_ne!(fork.id, original.id);
        assert_eq!(fork.owner, "bob");
        assert_eq!(fork.version, 1);
        assert!(!fork.is_public);
        assert_eq!(fork.source.markup, "<p>v2</p>");

        // Editing the fork leaves the original untouched.
        store
            .update(
                fork.id,
                ProjectPatch {
                    title: Some("fork of demo".into()),
                    ..ProjectPatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(store.get(original.id).await.unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_list_public_and_by_owner() {
        let store = InMemoryProjectStore::new();
        store
            .create(ProjectDraft {
                is_public: true,
                ..draft("alice", "public one")
            })
            .await
            .unwrap();
        store.create(draft("alice", "private one")).await.unwrap();
        store
            .create(ProjectDraft {
                is_public: true,
                ..draft("bob", "public two")
            })
            .await
            .unwrap();

        let public = store.list_public().await.unwrap();
        assert_eq!(public.len(), 2);
        assert!(public.iter().all(|p| p.is_public));

        let alices = store.list_by_owner("alice").await.unwrap();
        assert_eq!(alices.len(), 2);
    }
}
