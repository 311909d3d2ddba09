//! Session logging: a sink that sees every message appended to a conversation.
//!
//! The on-disk format belongs to the embedding application. [`InMemorySessionLog`]
//! is provided for tests and short-lived sessions.

use async_trait::async_trait;
use std::sync::{Mutex, PoisonError};

use crate::error::Result;
use crate::message::{Message, SessionId};

#[async_trait]
pub trait SessionLogger: Send + Sync {
    /// Called once per appended message, in conversation order.
    async fn record(&self, session_id: &SessionId, message: &Message) -> Result<()>;
}

/// Keeps every recorded message in memory.
#[derive(Debug, Default)]
pub struct InMemorySessionLog {
    entries: Mutex<Vec<(SessionId, Message)>>,
}

impl InMemorySessionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages recorded for one session, in order.
    pub fn messages(&self, session_id: &SessionId) -> Vec<Message> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(id, _)| id == session_id)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SessionLogger for InMemorySessionLog {
    async fn record(&self, session_id: &SessionId, message: &Message) -> Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((session_id.clone(), message.clone()));
        Ok(())
    }
}
