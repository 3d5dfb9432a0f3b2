//! Message Thread Controller - the open chat's messages
//!
//! Sending is optimistic: the user's message and an assistant placeholder are
//! appended before the query leaves, and the placeholder is later replaced in
//! the same slot by the reply or by an error entry. Each chat may have one
//! query outstanding; chats do not block each other.
//!
//! Entries the server does not hold are kept per chat: the user turn and
//! placeholder of an outstanding send, and every failed exchange. They are
//! put back after the fetched history each time that chat is shown, so an
//! error stays in the conversation and a send survives switching away.
//!
//! Fetches and replies can arrive after the user has moved on. A fetch is
//! applied only if its chat is still open and no newer switch happened. A
//! successful reply for a chat that is no longer open is dropped (the server
//! stored it).

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::core::{Delivery, GenerationSettings, Message, MessageId, MessageRole, SessionId};
use crate::gateway::{Gateway, QueryRequest};

use super::errors::SyncError;
use super::events::{EventSink, SyncEvent};

/// Marker shown in the assistant slot while a reply is outstanding
pub const DEFAULT_PLACEHOLDER: &str = "...";

/// Handle of an outstanding send, recorded when the placeholder is appended
#[derive(Debug, Clone, Copy)]
struct PendingSend {
    user_handle: u64,
    handle: u64,
    /// Slot of the placeholder at send time; verified against `handle`
    position: usize,
}

#[derive(Debug, Default)]
struct ThreadInner {
    session: Option<SessionId>,
    messages: Vec<Message>,
    /// Incremented by every switch; fetch results carry the value they saw
    switch_seq: u64,
    loading: bool,
    next_local_id: u64,
    /// Per chat, local entries missing from the server's history
    unsynced: HashMap<SessionId, Vec<Message>>,
}

impl ThreadInner {
    fn next_local_id(&mut self) -> u64 {
        self.next_local_id += 1;
        self.next_local_id
    }

    fn locate(&self, pending: &PendingSend) -> Option<usize> {
        let wanted = MessageId::Local(pending.handle);
        match self.messages.get(pending.position) {
            Some(m) if m.id == wanted => Some(pending.position),
            _ => self.messages.iter().position(|m| m.id == wanted),
        }
    }

    fn unsynced_for(&self, session: &SessionId) -> Vec<Message> {
        self.unsynced.get(session).cloned().unwrap_or_default()
    }

    /// A failure replaces the kept placeholder; a reply drops the exchange
    fn settle_unsynced(&mut self, session: &SessionId, pending: &PendingSend, entry: &Message) {
        let Some(kept) = self.unsynced.get_mut(session) else {
            return;
        };
        if entry.is_failed() {
            let wanted = MessageId::Local(pending.handle);
            if let Some(slot) = kept.iter_mut().find(|m| m.id == wanted) {
                *slot = entry.clone();
            }
        } else {
            kept.retain(|m| {
                !matches!(m.id, MessageId::Local(n) if n == pending.handle || n == pending.user_handle)
            });
            if kept.is_empty() {
                self.unsynced.remove(session);
            }
        }
    }
}

/// Message Thread store
#[derive(Clone)]
pub struct MessageThread {
    inner: Arc<RwLock<ThreadInner>>,
    pending: Arc<DashMap<SessionId, PendingSend>>,
    gateway: Arc<dyn Gateway>,
    events: EventSink,
    placeholder: String,
}

impl MessageThread {
    pub fn new(gateway: Arc<dyn Gateway>, events: EventSink) -> Self {
        Self {
            inner: Arc::new(RwLock::new(ThreadInner::default())),
            pending: Arc::new(DashMap::new()),
            gateway,
            events,
            placeholder: DEFAULT_PLACEHOLDER.to_string(),
        }
    }

    pub fn with_placeholder(mut self, marker: impl Into<String>) -> Self {
        self.placeholder = marker.into();
        self
    }

    fn read_inner(&self) -> RwLockReadGuard<'_, ThreadInner> {
        self.inner.read().unwrap_or_else(|poisoned| {
            tracing::warn!("MessageThread read lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write_inner(&self) -> RwLockWriteGuard<'_, ThreadInner> {
        self.inner.write().unwrap_or_else(|poisoned| {
            tracing::warn!("MessageThread write lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    // ========== Getters ==========

    /// Chat whose messages the thread currently shows
    pub fn session(&self) -> Option<SessionId> {
        self.read_inner().session.clone()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.read_inner().messages.clone()
    }

    pub fn with_messages<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&[Message]) -> R,
    {
        f(&self.read_inner().messages)
    }

    pub fn len(&self) -> usize {
        self.read_inner().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_inner().messages.is_empty()
    }

    /// A fetch for the open chat is in flight
    pub fn is_loading(&self) -> bool {
        self.read_inner().loading
    }

    /// A query is outstanding for `session`
    pub fn is_pending(&self, session: &SessionId) -> bool {
        self.pending.contains_key(session)
    }

    // ========== Switching ==========

    /// Show `id`'s messages
    ///
    /// The previous chat's messages are cleared before the fetch is issued.
    pub async fn switch_to(&self, id: &SessionId) -> Result<(), SyncError> {
        let seq = {
            let mut inner = self.write_inner();
            inner.session = Some(id.clone());
            inner.messages.clear();
            inner.switch_seq += 1;
            inner.loading = true;
            inner.switch_seq
        };
        self.events.emit(SyncEvent::ThreadChanged {
            session: Some(id.clone()),
        });

        let result = self.gateway.list_messages(id).await;

        let mut inner = self.write_inner();
        if inner.session.as_ref() != Some(id) || inner.switch_seq != seq {
            tracing::debug!("Dropping messages for {}: no longer the open chat", id);
            return Ok(());
        }
        inner.loading = false;

        match result {
            Ok(remote) => {
                let mut messages: Vec<Message> = remote.into_iter().map(Message::from).collect();
                messages.extend(inner.unsynced_for(id));

                tracing::debug!("Loaded {} messages for {}", messages.len(), id);
                inner.messages = messages;
                drop(inner);
                self.events.emit(SyncEvent::ThreadChanged {
                    session: Some(id.clone()),
                });
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                inner.messages.clear();
                drop(inner);
                tracing::warn!("Chat {} is gone: {}", id, e);
                self.events.emit(SyncEvent::ThreadChanged {
                    session: Some(id.clone()),
                });
                self.events.error("This chat no longer exists");
                Err(SyncError::SessionGone(id.clone()))
            }
            Err(e) => {
                inner.messages.clear();
                drop(inner);
                tracing::warn!("Failed to load messages for {}: {}", id, e);
                self.events.emit(SyncEvent::ThreadChanged {
                    session: Some(id.clone()),
                });
                self.events
                    .error(format!("Could not load messages: {}", e.detail()));
                Err(e.into())
            }
        }
    }

    /// Show an empty thread for a chat known to have no messages yet
    pub fn open_empty(&self, id: &SessionId) {
        {
            let mut inner = self.write_inner();
            inner.session = Some(id.clone());
            inner.messages = inner.unsynced_for(id);
            inner.switch_seq += 1;
            inner.loading = false;
        }
        self.events.emit(SyncEvent::ThreadChanged {
            session: Some(id.clone()),
        });
    }

    /// Show nothing (no chat is open)
    pub fn close(&self) {
        {
            let mut inner = self.write_inner();
            inner.session = None;
            inner.messages.clear();
            inner.switch_seq += 1;
            inner.loading = false;
        }
        self.events.emit(SyncEvent::ThreadChanged { session: None });
    }

    /// Drop everything held for a deleted chat
    pub fn forget(&self, id: &SessionId) {
        let was_open = {
            let mut inner = self.write_inner();
            inner.unsynced.remove(id);
            inner.session.as_ref() == Some(id)
        };
        self.pending.remove(id);
        if was_open {
            self.close();
        }
    }

    // ========== Sending ==========

    /// Send `text` to the open chat and wait for the reply
    ///
    /// Preconditions are checked before anything changes: non-blank text, a
    /// model, an open chat equal to `session`, and no reply outstanding for
    /// it. On return the placeholder has been replaced by the reply (`Ok`) or
    /// by an error entry (`Err`).
    pub async fn send(
        &self,
        session: Option<&SessionId>,
        text: &str,
        model: Option<&str>,
        settings: GenerationSettings,
        use_internet: bool,
    ) -> Result<Message, SyncError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SyncError::EmptyMessage);
        }
        let model = model
            .filter(|m| !m.trim().is_empty())
            .ok_or(SyncError::NoModelSelected)?;
        let session = session.ok_or(SyncError::NoActiveSession)?;

        let pending = {
            let mut inner = self.write_inner();
            if inner.session.as_ref() != Some(session) {
                return Err(SyncError::SessionNotActive(session.clone()));
            }
            match self.pending.entry(session.clone()) {
                Entry::Occupied(_) => {
                    tracing::debug!("Rejecting send to {}: reply outstanding", session);
                    return Err(SyncError::SendPending(session.clone()));
                }
                Entry::Vacant(slot) => {
                    let user_handle = inner.next_local_id();
                    let handle = inner.next_local_id();
                    let user = Message::local_user(user_handle, text);
                    let placeholder = Message::placeholder(handle, self.placeholder.as_str());
                    inner
                        .unsynced
                        .entry(session.clone())
                        .or_default()
                        .extend([user.clone(), placeholder.clone()]);
                    inner.messages.push(user);
                    let position = inner.messages.len();
                    inner.messages.push(placeholder);
                    let pending = PendingSend {
                        user_handle,
                        handle,
                        position,
                    };
                    slot.insert(pending);
                    pending
                }
            }
        };
        self.events.emit(SyncEvent::ThreadChanged {
            session: Some(session.clone()),
        });

        let request = QueryRequest::new(session.clone(), model, text, settings.clamped())
            .with_internet(use_internet);
        tracing::info!("Sending query to {} with model {}", session, model);
        let result = self.gateway.submit_query(&request).await;

        let (entry, error) = match result {
            Ok(reply) => {
                tracing::debug!(
                    "Reply for {}: {} chars, {:?} tokens",
                    session,
                    reply.response.len(),
                    reply.tokens_used
                );
                let entry = Message {
                    id: MessageId::Local(pending.handle),
                    role: MessageRole::Assistant,
                    content: reply.response,
                    timestamp: Utc::now(),
                    delivery: Delivery::Confirmed,
                    tokens_used: reply.tokens_used,
                };
                (entry, None)
            }
            Err(e) => {
                tracing::warn!("Query in {} failed: {}", session, e);
                let entry = Message {
                    id: MessageId::Local(pending.handle),
                    role: MessageRole::Assistant,
                    content: format!("Error: {}", e.detail()),
                    timestamp: Utc::now(),
                    delivery: Delivery::Failed,
                    tokens_used: None,
                };
                (entry, Some(e))
            }
        };

        self.resolve(session, pending, entry.clone(), error.is_some());

        match error {
            None => Ok(entry),
            Some(e) => {
                self.events
                    .error(format!("The model did not answer: {}", e.detail()));
                Err(e.into())
            }
        }
    }

    /// Put a reply (or error entry) where its placeholder is
    fn resolve(&self, session: &SessionId, pending: PendingSend, entry: Message, failed: bool) {
        let index = {
            let mut inner = self.write_inner();
            self.pending.remove(session);
            inner.settle_unsynced(session, &pending, &entry);

            if inner.session.as_ref() != Some(session) {
                if failed {
                    tracing::debug!("Failed reply for {} kept until it is reopened", session);
                } else {
                    tracing::debug!("Reply for {} arrived after it was closed", session);
                }
                return;
            }

            match inner.locate(&pending) {
                Some(index) => {
                    inner.messages[index] = entry;
                    index
                }
                None => {
                    tracing::debug!("Placeholder for {} is gone, appending reply", session);
                    inner.messages.push(entry);
                    inner.messages.len() - 1
                }
            }
        };

        self.events.emit(SyncEvent::ReplyResolved {
            session: session.clone(),
            index,
            failed,
        });
    }
}
