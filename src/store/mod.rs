//! Session store collaborator: receives finished conversations.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CarnetError;
use crate::types::Message;

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionOutcome {
    Completed,
    Failed { error: String },
}

/// Summary handed to the store after the terminal event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_id: Uuid,
    pub conversation: Vec<Message>,
    /// Model calls made, the forced one included.
    pub rounds: usize,
    pub outcome: SessionOutcome,
    /// Rounds whose terminal signal was missing or not recognized.
    pub unknown_signals: usize,
    pub duplicate_calls: usize,
    pub finished_at: DateTime<Utc>,
}

/// Persists finished sessions. Called on a detached task; the orchestrator
/// never waits for it. Canceled sessions are not saved.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save(&self, record: SessionRecord) -> Result<(), CarnetError>;
}

/// Keeps records in memory, in save order.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    records: Mutex<Vec<SessionRecord>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<SessionRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get(&self, session_id: Uuid) -> Option<SessionRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|record| record.session_id == session_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn save(&self, record: SessionRecord) -> Result<(), CarnetError> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
        Ok(())
    }
}
