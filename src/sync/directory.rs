//! Chat Directory - ordered session list and the active session
//!
//! The gateway is the source of truth for the list. Local changes are limited
//! to prepending a freshly created session and the optimistic removal done by
//! `delete`, which is rolled back when the gateway refuses.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::core::{ChatSession, SessionId};
use crate::gateway::Gateway;

use super::errors::SyncError;
use super::events::{EventSink, SyncEvent};

/// Asks the user before a chat is deleted
pub trait ConfirmDelete: Send + Sync {
    fn confirm_delete(&self, session: &ChatSession) -> bool;
}

impl<F> ConfirmDelete for F
where
    F: Fn(&ChatSession) -> bool + Send + Sync,
{
    fn confirm_delete(&self, session: &ChatSession) -> bool {
        self(session)
    }
}

/// List contents and active id at one point in time
#[derive(Debug, Clone, PartialEq)]
pub struct DirectorySnapshot {
    pub sessions: Vec<ChatSession>,
    pub active: Option<SessionId>,
}

#[derive(Debug, Default)]
struct DirectoryInner {
    sessions: Vec<ChatSession>,
    active: Option<SessionId>,
    /// Bumped on every local change; a list response started before the
    /// latest change is older than what we already show
    revision: u64,
    /// Sequence of the most recently issued list call
    list_seq: u64,
}

impl DirectoryInner {
    fn snapshot(&self) -> DirectorySnapshot {
        DirectorySnapshot {
            sessions: self.sessions.clone(),
            active: self.active.clone(),
        }
    }

    fn first_id(&self) -> Option<SessionId> {
        self.sessions.first().map(|s| s.id.clone())
    }
}

/// Chat Directory store
#[derive(Clone)]
pub struct ChatDirectory {
    inner: Arc<RwLock<DirectoryInner>>,
    gateway: Arc<dyn Gateway>,
    events: EventSink,
}

impl ChatDirectory {
    pub fn new(gateway: Arc<dyn Gateway>, events: EventSink) -> Self {
        Self {
            inner: Arc::new(RwLock::new(DirectoryInner::default())),
            gateway,
            events,
        }
    }

    fn read_inner(&self) -> RwLockReadGuard<'_, DirectoryInner> {
        self.inner.read().unwrap_or_else(|poisoned| {
            tracing::warn!("ChatDirectory read lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write_inner(&self) -> RwLockWriteGuard<'_, DirectoryInner> {
        self.inner.write().unwrap_or_else(|poisoned| {
            tracing::warn!("ChatDirectory write lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    // ========== Getters ==========

    pub fn sessions(&self) -> Vec<ChatSession> {
        self.read_inner().sessions.clone()
    }

    pub fn active(&self) -> Option<SessionId> {
        self.read_inner().active.clone()
    }

    pub fn active_session(&self) -> Option<ChatSession> {
        let inner = self.read_inner();
        let active = inner.active.as_ref()?;
        inner.sessions.iter().find(|s| &s.id == active).cloned()
    }

    pub fn get(&self, id: &SessionId) -> Option<ChatSession> {
        self.read_inner()
            .sessions
            .iter()
            .find(|s| &s.id == id)
            .cloned()
    }

    pub fn snapshot(&self) -> DirectorySnapshot {
        self.read_inner().snapshot()
    }

    pub fn len(&self) -> usize {
        self.read_inner().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_inner().sessions.is_empty()
    }

    // ========== Operations ==========

    /// Replace the list with the gateway's
    ///
    /// The active session survives if it is still listed; otherwise the first
    /// listed session becomes active. A failed fetch leaves an empty directory.
    pub async fn list(&self) -> Result<(), SyncError> {
        let (started_at, seq) = {
            let mut inner = self.write_inner();
            inner.list_seq += 1;
            (inner.revision, inner.list_seq)
        };
        let result = self.gateway.list_sessions().await;

        let active = {
            let mut inner = self.write_inner();
            if inner.revision != started_at || inner.list_seq != seq {
                tracing::debug!("Discarding stale chat list response");
                return Ok(());
            }

            match result {
                Ok(sessions) => {
                    let keep = inner
                        .active
                        .as_ref()
                        .is_some_and(|id| sessions.iter().any(|s| &s.id == id));
                    inner.sessions = sessions;
                    if !keep {
                        inner.active = inner.first_id();
                    }
                    tracing::debug!(
                        "Chat list refreshed: {} sessions, active {:?}",
                        inner.sessions.len(),
                        inner.active
                    );
                    inner.active.clone()
                }
                Err(e) => {
                    inner.sessions.clear();
                    inner.active = None;
                    inner.revision += 1;
                    drop(inner);
                    tracing::warn!("Failed to list chats: {}", e);
                    self.events.emit(SyncEvent::DirectoryChanged { active: None });
                    self.events
                        .error(format!("Could not load chats: {}", e.detail()));
                    return Err(e.into());
                }
            }
        };

        self.events.emit(SyncEvent::DirectoryChanged { active });
        Ok(())
    }

    /// Create a session and make it active without re-listing
    pub async fn create(&self, title: Option<&str>) -> Result<ChatSession, SyncError> {
        let session = match self.gateway.create_session(title).await {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!("Failed to create chat: {}", e);
                self.events
                    .error(format!("Could not create chat: {}", e.detail()));
                return Err(e.into());
            }
        };

        {
            let mut inner = self.write_inner();
            inner.sessions.retain(|s| s.id != session.id);
            inner.sessions.insert(0, session.clone());
            inner.active = Some(session.id.clone());
            inner.revision += 1;
        }
        tracing::info!("Created chat {} ({})", session.id, session.title);
        self.events.emit(SyncEvent::DirectoryChanged {
            active: Some(session.id.clone()),
        });
        Ok(session)
    }

    /// Make a listed session active
    pub fn set_active(&self, id: &SessionId) -> Result<(), SyncError> {
        {
            let mut inner = self.write_inner();
            if !inner.sessions.iter().any(|s| &s.id == id) {
                return Err(SyncError::UnknownSession(id.clone()));
            }
            if inner.active.as_ref() == Some(id) {
                return Ok(());
            }
            inner.active = Some(id.clone());
        }
        self.events.emit(SyncEvent::DirectoryChanged {
            active: Some(id.clone()),
        });
        Ok(())
    }

    /// Delete a session after the user confirmed it
    ///
    /// The entry disappears immediately. If it was active, the first remaining
    /// session takes over. A gateway failure other than not-found restores the
    /// list and active id exactly as they were before the removal.
    pub async fn delete(
        &self,
        id: &SessionId,
        confirm: &dyn ConfirmDelete,
    ) -> Result<(), SyncError> {
        let session = self
            .get(id)
            .ok_or_else(|| SyncError::UnknownSession(id.clone()))?;
        if !confirm.confirm_delete(&session) {
            tracing::debug!("Delete of {} cancelled by user", id);
            return Err(SyncError::NotConfirmed(id.clone()));
        }

        let (before, active) = {
            let mut inner = self.write_inner();
            let before = inner.snapshot();
            inner.sessions.retain(|s| &s.id != id);
            if inner.active.as_ref() == Some(id) {
                inner.active = inner.first_id();
            }
            inner.revision += 1;
            (before, inner.active.clone())
        };
        self.events.emit(SyncEvent::DirectoryChanged { active });

        match self.gateway.delete_session(id).await {
            Ok(()) => {
                tracing::info!("Deleted chat {}", id);
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                tracing::debug!("Chat {} was already gone", id);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Failed to delete chat {}: {}, rolling back", id, e);
                let active = before.active.clone();
                {
                    let mut inner = self.write_inner();
                    inner.sessions = before.sessions;
                    inner.active = before.active;
                    inner.revision += 1;
                }
                self.events.emit(SyncEvent::DirectoryChanged { active });
                self.events
                    .error(format!("Could not delete chat: {}", e.detail()));
                Err(e.into())
            }
        }
    }
}
