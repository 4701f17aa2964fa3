//! Per-viewer sessions and their state stores
//!
//! Each connected viewer owns one [`Session`] holding an isolated key-value
//! [`SessionStore`]. The store survives reruns and is dropped when the
//! session is destroyed; recreating a session with the same id starts empty.
//!
//! Destroying a session flips a shared flag that every store access checks,
//! which is how an in-flight rerun gets cancelled cooperatively.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{debug, info};

use crate::error::{EncoreError, Result};
use crate::logging::{operations, services};
use crate::rerun::RunSlot;

/// Opaque session identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Random identifier for a new viewer
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Lifecycle of a session as seen by the rerun driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Running,
    Destroyed,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Key-value state scoped to exactly one session
pub struct SessionStore {
    session_id: SessionId,
    entries: Mutex<BTreeMap<String, serde_json::Value>>,
    destroyed: Arc<AtomicBool>,
}

impl SessionStore {
    fn new(session_id: SessionId, destroyed: Arc<AtomicBool>) -> Self {
        Self {
            session_id,
            entries: Mutex::new(BTreeMap::new()),
            destroyed,
        }
    }

    /// Lock the entries, failing if the session is gone
    fn entries(&self) -> Result<MutexGuard<'_, BTreeMap<String, serde_json::Value>>> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(EncoreError::Canceled(self.session_id.clone()));
        }
        Ok(lock(&self.entries))
    }

    /// Raw value for `key`; `None` when missing
    pub fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.entries()?.get(key).cloned())
    }

    /// Value for `key` deserialized into `T`
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key)? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| EncoreError::StateValue {
                    key: key.to_string(),
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value).map_err(|e| EncoreError::StateValue {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        self.entries()?.insert(key.to_string(), value);
        Ok(())
    }

    /// Value for `key`, initializing it with `default` when missing
    pub fn get_or_insert_with<T, F>(&self, key: &str, default: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> T,
    {
        if let Some(existing) = self.get_as(key)? {
            return Ok(existing);
        }
        let value = default();
        self.set(key, &value)?;
        Ok(value)
    }

    pub fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.entries()?.contains_key(key))
    }

    /// Remove `key`, returning its previous value
    pub fn remove(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.entries()?.remove(key))
    }

    /// All keys in sorted order
    pub fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries()?.keys().cloned().collect())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.entries()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.entries()?.is_empty())
    }

    pub fn clear(&self) -> Result<()> {
        self.entries()?.clear();
        Ok(())
    }

    /// Copy of the whole store
    pub fn snapshot(&self) -> Result<BTreeMap<String, serde_json::Value>> {
        Ok(self.entries()?.clone())
    }
}

/// One isolated viewer instance
pub struct Session {
    id: SessionId,
    created_at: DateTime<Utc>,
    store: SessionStore,
    destroyed: Arc<AtomicBool>,
    state: Mutex<RunState>,
    pub(crate) run_slot: tokio::sync::Mutex<RunSlot>,
}

impl Session {
    fn new(id: SessionId) -> Self {
        let destroyed = Arc::new(AtomicBool::new(false));
        Self {
            store: SessionStore::new(id.clone(), Arc::clone(&destroyed)),
            id,
            created_at: Utc::now(),
            destroyed,
            state: Mutex::new(RunState::Idle),
            run_slot: tokio::sync::Mutex::new(RunSlot::default()),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn run_state(&self) -> RunState {
        *lock(&self.state)
    }

    /// Move to `next` unless the session has already been destroyed
    pub(crate) fn transition(&self, next: RunState) -> RunState {
        let mut state = lock(&self.state);
        if *state != RunState::Destroyed {
            *state = next;
        }
        *state
    }

    fn mark_destroyed(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
        *lock(&self.state) = RunState::Destroyed;
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("state", &self.run_state())
            .finish_non_exhaustive()
    }
}

/// Registry mapping session ids to live sessions
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
    max_sessions: Option<usize>,
}

impl SessionRegistry {
    pub fn new(max_sessions: Option<usize>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions,
        }
    }

    /// Existing session for `id`, or a fresh one with an empty store
    pub fn get_or_create(&self, id: &SessionId) -> Result<Arc<Session>> {
        if let Some(session) = self.read().get(id) {
            return Ok(Arc::clone(session));
        }

        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(session) = sessions.get(id) {
            return Ok(Arc::clone(session));
        }

        if let Some(max) = self.max_sessions {
            if sessions.len() >= max {
                return Err(EncoreError::SessionLimitReached(sessions.len()));
            }
        }

        let session = Arc::new(Session::new(id.clone()));
        sessions.insert(id.clone(), Arc::clone(&session));
        info!(
            service = services::SESSION,
            operation = operations::CREATE,
            session_id = %id,
            active_sessions = sessions.len(),
            "session created"
        );
        Ok(session)
    }

    /// Live session for `id`
    pub fn get(&self, id: &SessionId) -> Result<Arc<Session>> {
        self.read()
            .get(id)
            .cloned()
            .ok_or_else(|| EncoreError::SessionNotFound(id.clone()))
    }

    /// Tear down a session; any in-flight rerun stops at its next store access
    pub fn destroy(&self, id: &SessionId) -> Result<()> {
        let session = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .ok_or_else(|| EncoreError::SessionNotFound(id.clone()))?;

        session.mark_destroyed();
        info!(
            service = services::SESSION,
            operation = operations::DESTROY,
            session_id = %id,
            "session destroyed"
        );
        Ok(())
    }

    /// Destroy every session (process shutdown)
    pub fn destroy_all(&self) {
        let drained: Vec<_> = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        for (_, session) in &drained {
            session.mark_destroyed();
        }
        debug!("Destroyed {} sessions", drained.len());
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<_> = self.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<SessionId, Arc<Session>>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_or_create_is_idempotent() {
        let registry = SessionRegistry::default();
        let id = SessionId::from("viewer-1");

        let first = registry.get_or_create(&id).unwrap();
        first.store().set("counter", &1).unwrap();
        let second = registry.get_or_create(&id).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.store().get_as::<u32>("counter").unwrap(), Some(1));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_sessions_are_isolated() {
        let registry = SessionRegistry::default();
        let a = registry.get_or_create(&SessionId::from("a")).unwrap();
        let b = registry.get_or_create(&SessionId::from("b")).unwrap();

        for i in 0..20 {
            let key = format!("key-{i}");
            a.store().set(&key, &i).unwrap();
            assert_eq!(b.store().get(&key).unwrap(), None);
        }
        assert!(b.store().is_empty().unwrap());
    }

    #[test]
    fn test_destroy_then_recreate_is_empty() {
        let registry = SessionRegistry::default();
        let id = SessionId::from("reload");

        let old = registry.get_or_create(&id).unwrap();
        old.store().set("name", "ada").unwrap();
        registry.destroy(&id).unwrap();

        assert!(old.is_destroyed());
        assert_eq!(old.run_state(), RunState::Destroyed);
        assert!(matches!(old.store().get("name"), Err(EncoreError::Canceled(_))));

        let fresh = registry.get_or_create(&id).unwrap();
        assert!(!Arc::ptr_eq(&old, &fresh));
        assert!(fresh.store().is_empty().unwrap());
    }

    #[test]
    fn test_unknown_session() {
        let registry = SessionRegistry::default();
        let id = SessionId::from("ghost");

        assert!(matches!(registry.get(&id), Err(EncoreError::SessionNotFound(_))));
        assert!(matches!(registry.destroy(&id), Err(EncoreError::SessionNotFound(_))));
    }

    #[test]
    fn test_session_limit() {
        let registry = SessionRegistry::new(Some(1));
        registry.get_or_create(&SessionId::from("one")).unwrap();

        let err = registry.get_or_create(&SessionId::from("two")).unwrap_err();
        assert!(matches!(err, EncoreError::SessionLimitReached(1)));
        // Existing sessions are still reachable at the limit
        assert!(registry.get_or_create(&SessionId::from("one")).is_ok());
    }

    #[test]
    fn test_session_debug_shows_id_and_state() {
        let registry = SessionRegistry::default();
        let session = registry.get_or_create(&SessionId::from("dbg")).unwrap();

        let rendered = format!("{:?}", session);
        assert!(rendered.contains("dbg"));
        assert!(rendered.contains("Idle"));
    }

    #[test]
    fn test_store_helpers() {
        let registry = SessionRegistry::default();
        let session = registry.get_or_create(&SessionId::generate()).unwrap();
        let store = session.store();

        let count: u32 = store.get_or_insert_with("count", || 0).unwrap();
        assert_eq!(count, 0);
        store.set("count", &5).unwrap();
        let count: u32 = store.get_or_insert_with("count", || 0).unwrap();
        assert_eq!(count, 5);

        store.set("label", "hello").unwrap();
        assert_eq!(store.keys().unwrap(), vec!["count", "label"]);
        assert!(store.contains("label").unwrap());
        assert_eq!(store.remove("label").unwrap(), Some(serde_json::json!("hello")));
        assert_eq!(store.len().unwrap(), 1);

        store.clear().unwrap();
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_get_as_type_error() {
        let registry = SessionRegistry::default();
        let session = registry.get_or_create(&SessionId::from("typed")).unwrap();
        session.store().set("count", "not a number").unwrap();

        let err = session.store().get_as::<u32>("count").unwrap_err();
        assert!(matches!(err, EncoreError::StateValue { .. }));
    }

    #[test]
    fn test_destroy_all() {
        let registry = SessionRegistry::default();
        let a = registry.get_or_create(&SessionId::from("a")).unwrap();
        registry.get_or_create(&SessionId::from("b")).unwrap();

        registry.destroy_all();

        assert!(registry.is_empty());
        assert!(a.is_destroyed());
    }

    #[test]
    fn test_generated_ids_are_unique() {
        assert_ne!(SessionId::generate(), SessionId::generate());
    }
}
