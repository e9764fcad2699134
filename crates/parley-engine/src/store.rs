//! Session persistence adapters.
//!
//! The engine itself never touches a store: a turn takes a [`SessionState`]
//! and returns a new one. These adapters are for callers that want
//! load/save by id without writing their own.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parley_types::{ParleyError, Result, SessionId, SessionState};
use tokio::sync::RwLock;

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, id: &SessionId) -> Result<Option<SessionState>>;

    async fn save(&self, session: &SessionState) -> Result<()>;

    /// Returns `true` if a session was removed.
    async fn delete(&self, id: &SessionId) -> Result<bool>;

    /// Load a session that must exist.
    async fn require(&self, id: &SessionId) -> Result<SessionState> {
        self.load(id).await?.ok_or_else(|| ParleyError::SessionNotFound {
            id: id.to_string(),
        })
    }

    /// Load a session, or start a fresh one with this id.
    async fn load_or_create(&self, id: &SessionId) -> Result<SessionState> {
        Ok(self
            .load(id)
            .await?
            .unwrap_or_else(|| SessionState::with_id(id.clone())))
    }
}

// ---------------------------------------------------------------------------
// InMemorySessionStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<SessionId, SessionState>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, id: &SessionId) -> Result<Option<SessionState>> {
        Ok(self.sessions.read().await.get(id).cloned())
    }

    async fn save(&self, session: &SessionState) -> Result<()> {
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn delete(&self, id: &SessionId) -> Result<bool> {
        Ok(self.sessions.write().await.remove(id).is_some())
    }
}

// ---------------------------------------------------------------------------
// FileSessionStore
// ---------------------------------------------------------------------------

/// One pretty-printed JSON file per session under `root`.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    root: PathBuf,
}

impl FileSessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: &SessionId) -> Result<PathBuf> {
        let raw = id.as_str();
        let valid = !raw.is_empty()
            && raw != "."
            && raw != ".."
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(ParleyError::Other(format!(
                "session id '{raw}' cannot be used as a file name"
            )));
        }
        Ok(self.root.join(format!("{raw}.json")))
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self, id: &SessionId) -> Result<Option<SessionState>> {
        let path = self.path_for(id)?;
        if !tokio::fs::try_exists(&path).await? {
            return Ok(None);
        }
        let json = tokio::fs::read_to_string(&path).await?;
        Ok(Some(serde_json::from_str(&json)?))
    }

    async fn save(&self, session: &SessionState) -> Result<()> {
        let path = self.path_for(&session.id)?;
        tokio::fs::create_dir_all(&self.root).await?;
        let json = serde_json::to_string_pretty(session)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        tracing::debug!(session = %session.id, path = %path.display(), "Session saved");
        Ok(())
    }

    async fn delete(&self, id: &SessionId) -> Result<bool> {
        let path = self.path_for(id)?;
        if !tokio::fs::try_exists(&path).await? {
            return Ok(false);
        }
        tokio::fs::remove_file(&path).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_types::HistoryRole;
    use serde_json::json;

    fn sample() -> SessionState {
        SessionState::with_id("session-1")
            .merge_data(&[("name".to_string(), json!("Ada"))].into_iter().collect())
            .with_position("signup", Some("ask_email"))
            .with_message(HistoryRole::User, "I'm Ada", Some("ask_name"))
    }

    #[tokio::test]
    async fn in_memory_round_trip() {
        let store = InMemorySessionStore::new();
        let session = sample();
        store.save(&session).await.unwrap();

        assert_eq!(store.load(&session.id).await.unwrap(), Some(session.clone()));
        assert_eq!(store.len().await, 1);
        assert!(store.delete(&session.id).await.unwrap());
        assert!(!store.delete(&session.id).await.unwrap());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn require_and_load_or_create() {
        let store = InMemorySessionStore::new();
        let id = SessionId::from("nobody");

        let err = store.require(&id).await.unwrap_err();
        assert!(matches!(err, ParleyError::SessionNotFound { .. }));

        let fresh = store.load_or_create(&id).await.unwrap();
        assert_eq!(fresh.id, id);
        assert!(fresh.data.is_empty());
    }

    #[tokio::test]
    async fn file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join("sessions"));
        let session = sample();

        assert!(store.load(&session.id).await.unwrap().is_none());
        store.save(&session).await.unwrap();
        assert!(dir.path().join("sessions/session-1.json").exists());

        let loaded = store.load(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded, session);

        assert!(store.delete(&session.id).await.unwrap());
        assert!(store.load(&session.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_store_rejects_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path());
        let sneaky = SessionState::with_id("../escape");
        assert!(store.save(&sneaky).await.is_err());
    }
}
