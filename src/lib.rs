//! lmdesk: client for a locally hosted language-model query service
//!
//! This library provides:
//! - A gateway to the query service (HTTP, plus an in-memory simulation)
//! - Sync stores for chats, messages, the model catalog and generation settings
//! - An orchestrator that coordinates them for user actions
//! - CLI commands rendering the stores in a terminal

pub mod config;
pub mod core;
pub mod gateway;
pub mod sync;
pub mod transport;

pub use config::Config;
pub use gateway::{Gateway, GatewayError, HttpGateway};
pub use sync::{SyncError, SyncEvent, SyncOrchestrator};
