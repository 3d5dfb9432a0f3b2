//! Client-side sync engine
//!
//! Four stores hold local copies of remote state and reconcile them with the
//! gateway under concurrent, fallible calls:
//! - `ChatDirectory`: chat list and the active chat
//! - `MessageThread`: messages of the open chat, optimistic sends
//! - `ModelCatalog`: paginated model list with install progress
//! - `SettingsDraft`: generation settings with commit/revert
//!
//! `SyncOrchestrator` drives them for user actions. Every visible change is
//! published as a [`SyncEvent`].

pub mod catalog;
pub mod directory;
pub mod errors;
pub mod events;
pub mod orchestrator;
pub mod settings;
pub mod thread;

pub use catalog::ModelCatalog;
pub use directory::{ChatDirectory, ConfirmDelete, DirectorySnapshot};
pub use errors::{ErrorKind, SyncError};
pub use events::{EventSink, Notice, NoticeLevel, SyncEvent};
pub use orchestrator::{StartupReport, SyncOrchestrator};
pub use settings::SettingsDraft;
pub use thread::MessageThread;
