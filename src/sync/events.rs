//! Store change notifications
//!
//! Stores publish an event after every mutation that is visible to the user.
//! The presentation layer reads them from an unbounded channel and re-renders
//! from the stores' accessors.

use tokio::sync::mpsc;

use crate::core::{GenerationSettings, InstallState, SessionId};

/// Severity of a user-facing notice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// A message for the user (usually a failure)
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

/// Events emitted by the sync stores
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    // ========== Chat Directory ==========
    /// Session list or active session changed
    DirectoryChanged { active: Option<SessionId> },

    // ========== Message Thread ==========
    /// Thread content replaced or extended
    ThreadChanged { session: Option<SessionId> },

    /// A pending reply resolved (in place when `index` is the placeholder slot)
    ReplyResolved {
        session: SessionId,
        index: usize,
        failed: bool,
    },

    // ========== Model Catalog ==========
    /// Entries or cursor changed
    CatalogChanged { len: usize, next_offset: usize },

    /// Selected model changed
    SelectionChanged(Option<String>),

    InstallStateChanged { name: String, state: InstallState },

    // ========== Settings ==========
    SettingsCommitted(GenerationSettings),

    /// Draft opened, edited or closed (`None`)
    DraftChanged(Option<GenerationSettings>),

    // ========== Notices ==========
    Notice(Notice),
}

/// Sending half shared by all stores
///
/// A sink without a receiver drops events silently, which is what tests and
/// one-shot CLI commands want.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<SyncEvent>>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SyncEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Sink that discards everything
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: SyncEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    pub fn notify(&self, level: NoticeLevel, message: impl Into<String>) {
        self.emit(SyncEvent::Notice(Notice {
            level,
            message: message.into(),
        }));
    }

    pub fn info(&self, message: impl Into<String>) {
        self.notify(NoticeLevel::Info, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.notify(NoticeLevel::Error, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_delivers_in_order() {
        let (sink, mut rx) = EventSink::channel();
        sink.emit(SyncEvent::SelectionChanged(Some("a".into())));
        sink.error("boom");

        assert_eq!(
            rx.try_recv().unwrap(),
            SyncEvent::SelectionChanged(Some("a".into()))
        );
        match rx.try_recv().unwrap() {
            SyncEvent::Notice(n) => {
                assert_eq!(n.level, NoticeLevel::Error);
                assert_eq!(n.message, "boom");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_disabled_sink_is_silent() {
        EventSink::disabled().error("nobody listens");
    }
}
