//! Session persistence layer
//!
//! Each session lives behind its own mutex. Holding the guard is the
//! exclusive borrow a turn needs; sessions never contend with each other.
//! Currently in-memory only.

use crate::models::{SessionId, SessionState};
use crate::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

pub type SessionHandle = Arc<Mutex<SessionState>>;

/// Trait for session persistence
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    /// Handle for an existing session
    async fn get(&self, id: &SessionId) -> Result<Option<SessionHandle>>;

    /// Handle for the session, creating it with `init` if absent.
    /// The bool is true when the session was created by this call.
    async fn get_or_create(
        &self,
        id: &SessionId,
        init: &(dyn Fn() -> SessionState + Send + Sync),
    ) -> Result<(SessionHandle, bool)>;

    async fn remove(&self, id: &SessionId) -> Result<bool>;

    async fn list(&self) -> Result<Vec<SessionId>>;
}

/// In-memory session store for development
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<SessionId, SessionHandle>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, id: &SessionId) -> Result<Option<SessionHandle>> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(id).cloned())
    }

    async fn get_or_create(
        &self,
        id: &SessionId,
        init: &(dyn Fn() -> SessionState + Send + Sync),
    ) -> Result<(SessionHandle, bool)> {
        if let Some(handle) = self.get(id).await? {
            return Ok((handle, false));
        }

        let mut sessions = self.sessions.write().await;
        // Another caller may have created it between the two locks
        if let Some(handle) = sessions.get(id) {
            return Ok((handle.clone(), false));
        }
        let handle = Arc::new(Mutex::new(init()));
        sessions.insert(id.clone(), handle.clone());
        Ok((handle, true))
    }

    async fn remove(&self, id: &SessionId) -> Result<bool> {
        let mut sessions = self.sessions.write().await;
        Ok(sessions.remove(id).is_some())
    }

    async fn list(&self) -> Result<Vec<SessionId>> {
        let sessions = self.sessions.read().await;
        let mut ids: Vec<SessionId> = sessions.keys().cloned().collect();
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Message;

    #[tokio::test]
    async fn test_get_or_create_once() {
        let store = InMemorySessionStore::new();
        let id = SessionId::new("abc");

        let (first, created) = store
            .get_or_create(&id, &|| {
                let mut state = SessionState::new();
                state.push_message(Message::assistant("Hello"));
                state
            })
            .await
            .unwrap();
        assert!(created);

        let (second, created) = store.get_or_create(&id, &SessionState::new).await.unwrap();
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.lock().await.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_and_list() {
        let store = InMemorySessionStore::new();
        store.get_or_create(&SessionId::new("b"), &SessionState::new).await.unwrap();
        store.get_or_create(&SessionId::new("a"), &SessionState::new).await.unwrap();

        let ids = store.list().await.unwrap();
        assert_eq!(ids, vec![SessionId::new("a"), SessionId::new("b")]);

        assert!(store.remove(&SessionId::new("a")).await.unwrap());
        assert!(!store.remove(&SessionId::new("a")).await.unwrap());
        assert!(store.get(&SessionId::new("a")).await.unwrap().is_none());
    }
}
