//! Session persistence boundary.
//!
//! The engine only needs get/set/delete/list-expired. Retry and backoff
//! belong to store implementations.

use std::collections::HashMap;

use parking_lot::RwLock;
use thiserror::Error;

use crate::diagnostic::types::DiagnosticSession;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),
    #[error("session payload error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub trait SessionStore: Send + Sync {
    fn get(&self, id: &str) -> Result<Option<DiagnosticSession>, StoreError>;
    fn set(&self, id: &str, session: &DiagnosticSession) -> Result<(), StoreError>;
    /// Returns whether a session was removed.
    fn delete(&self, id: &str) -> Result<bool, StoreError>;
    /// Ids of sessions last updated strictly before `timestamp_ms`.
    fn list_expired_before(&self, timestamp_ms: i64) -> Result<Vec<String>, StoreError>;
}

#[derive(Debug, Clone)]
struct StoredSession {
    updated_at: i64,
    payload: String,
}

/// Process-local store keeping sessions as serialized JSON payloads.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, StoredSession>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

impl SessionStore for InMemorySessionStore {
    fn get(&self, id: &str) -> Result<Option<DiagnosticSession>, StoreError> {
        let guard = self.sessions.read();
        match guard.get(id) {
            Some(stored) => Ok(Some(serde_json::from_str(&stored.payload)?)),
            None => Ok(None),
        }
    }

    fn set(&self, id: &str, session: &DiagnosticSession) -> Result<(), StoreError> {
        let payload = serde_json::to_string(session)?;
        self.sessions.write().insert(
            id.to_string(),
            StoredSession {
                updated_at: session.updated_at,
                payload,
            },
        );
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.sessions.write().remove(id).is_some())
    }

    fn list_expired_before(&self, timestamp_ms: i64) -> Result<Vec<String>, StoreError> {
        let guard = self.sessions.read();
        let mut ids: Vec<String> = guard
            .iter()
            .filter(|(_, stored)| stored.updated_at < timestamp_ms)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}
