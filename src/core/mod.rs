//! Core domain types
//!
//! Shared by the gateway, the sync stores and the presentation layer.

pub mod types;

pub use types::{
    ChatSession, Delivery, GenerationSettings, InstallState, Message, MessageId, MessageRole,
    ModelEntry, SessionId, SortKey,
};
