//! Active session and saved-conversation archive.
//!
//! Every read fails open: a missing, unreadable or corrupt value is logged
//! and replaced by the default (a greeting session, an empty archive). Write
//! failures are logged and swallowed. Callers never see a storage error.

use crate::models::{ActiveSession, Conversation, Message, Role};
use crate::storage::KeyValueStore;
use chrono::Utc;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use uuid::Uuid;

pub const ACTIVE_SESSION_KEY: &str = "nsight.active_session";
pub const ARCHIVE_KEY: &str = "nsight.saved_conversations";
/// Most-recent-first bound on saved conversations.
pub const ARCHIVE_LIMIT: usize = 20;
pub const TITLE_MAX_CHARS: usize = 50;
pub const UNTITLED_TITLE: &str = "Untitled Conversation";

/// Explicit answer to "clear all saved conversations?".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed,
    Declined,
}

impl From<bool> for Confirmation {
    fn from(confirmed: bool) -> Self {
        if confirmed {
            Self::Confirmed
        } else {
            Self::Declined
        }
    }
}

/// Title from the first user message: its first 50 characters, with `...`
/// when it was cut.
pub fn derive_title(messages: &[Message]) -> String {
    let Some(first) = messages.iter().find(|m| m.role == Role::User) else {
        return UNTITLED_TITLE.to_string();
    };
    let mut chars = first.content.chars();
    let head: String = chars.by_ref().take(TITLE_MAX_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

pub struct ConversationStore {
    backend: Arc<dyn KeyValueStore>,
}

impl ConversationStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self { backend }
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.backend.load(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                log::error!("Failed to read '{}' from storage, treating as empty: {:?}", key, e);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("Discarding corrupt value under '{}': {}", key, e);
                if let Err(e) = self.backend.delete(key).await {
                    log::error!("Failed to discard corrupt '{}': {:?}", key, e);
                }
                None
            }
        }
    }

    async fn write<T: serde::Serialize>(&self, key: &str, value: &T) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                log::error!("Failed to serialize '{}': {}", key, e);
                return;
            }
        };
        if let Err(e) = self.backend.save(key, &raw).await {
            log::error!("Failed to persist '{}' ({} bytes): {:?}", key, raw.len(), e);
        }
    }

    /// The persisted session, or a fresh greeting session.
    pub async fn load_active_session(&self) -> ActiveSession {
        match self.read::<ActiveSession>(ACTIVE_SESSION_KEY).await {
            Some(session) if !session.messages.is_empty() => {
                log::info!("Restored active session with {} messages", session.messages.len());
                session
            }
            _ => ActiveSession::new(),
        }
    }

    /// Writes the session; a greeting-only session is not persisted.
    pub async fn persist_active_session(&self, session: &ActiveSession) {
        if session.is_greeting_only() {
            log::debug!("Skipping persist of greeting-only session");
            return;
        }
        self.write(ACTIVE_SESSION_KEY, session).await;
    }

    /// Forgets the persisted session and hands back a fresh one.
    pub async fn reset_active_session(&self) -> ActiveSession {
        if let Err(e) = self.backend.delete(ACTIVE_SESSION_KEY).await {
            log::error!("Failed to remove active session: {:?}", e);
        }
        ActiveSession::new()
    }

    pub async fn list_archive(&self) -> Vec<Conversation> {
        self.read(ARCHIVE_KEY).await.unwrap_or_default()
    }

    /// Snapshots the session at the front of the archive. `None` when the
    /// session holds nothing beyond the greeting.
    pub async fn save_conversation(&self, session: &ActiveSession) -> Option<Conversation> {
        if session.is_greeting_only() {
            log::debug!("Nothing to save: session holds only the greeting");
            return None;
        }

        let conversation = Conversation {
            id: Uuid::new_v4(),
            title: derive_title(&session.messages),
            messages: session.messages.clone(),
            chart_type_overrides: session.chart_type_overrides.clone(),
            saved_at: Utc::now(),
        };

        let mut archive = self.list_archive().await;
        archive.insert(0, conversation.clone());
        if archive.len() > ARCHIVE_LIMIT {
            log::info!("Archive full, evicting {} oldest", archive.len() - ARCHIVE_LIMIT);
            archive.truncate(ARCHIVE_LIMIT);
        }
        self.write(ARCHIVE_KEY, &archive).await;

        log::info!("Saved conversation {} ('{}')", conversation.id, conversation.title);
        Some(conversation)
    }

    pub async fn get_conversation(&self, id: Uuid) -> Option<Conversation> {
        self.list_archive().await.into_iter().find(|c| c.id == id)
    }

    /// Loads a saved conversation into a new active session and persists it.
    /// The archived copy is left as is.
    pub async fn open_conversation(&self, id: Uuid) -> Option<ActiveSession> {
        let conversation = self.get_conversation(id).await?;
        let session = ActiveSession::from(&conversation);
        self.persist_active_session(&session).await;
        Some(session)
    }

    /// Idempotent: an unknown id leaves the archive as it was.
    pub async fn delete_conversation(&self, id: Uuid) {
        let mut archive = self.list_archive().await;
        let before = archive.len();
        archive.retain(|c| c.id != id);
        if archive.len() == before {
            log::debug!("Delete: conversation {} not in archive", id);
            return;
        }
        self.write(ARCHIVE_KEY, &archive).await;
        log::info!("Deleted conversation {}", id);
    }

    /// Returns whether the archive was cleared.
    pub async fn clear_archive(&self, confirmation: Confirmation) -> bool {
        if confirmation == Confirmation::Declined {
            log::info!("Clear archive declined");
            return false;
        }
        log::warn!("Clearing all saved conversations");
        if let Err(e) = self.backend.delete(ARCHIVE_KEY).await {
            log::error!("Failed to clear archive: {:?}", e);
        }
        true
    }
}
