//! Remote gateway boundary
//!
//! The stores only talk to the backend through the [`Gateway`] trait:
//! - `HttpGateway`: JSON over HTTP against the local query service
//! - `SimGateway`: in-memory backend with fault injection (feature `test-sim`)

mod error;
mod http;
#[cfg(feature = "test-sim")]
pub mod sim;
mod types;

use async_trait::async_trait;

use crate::core::{ChatSession, GenerationSettings, ModelEntry, SessionId};

pub use error::GatewayError;
pub use http::HttpGateway;
#[cfg(feature = "test-sim")]
pub use sim::{Gate, Op, SimGateway};
pub use types::{
    CredentialRequest, InstallRequest, ModelPageRequest, ModelStatus, NewChatRequest,
    QueryReply, QueryRequest, RemoteMessage, Sender,
};

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Request/response surface of the local query service
///
/// Every call may fail with a transport error. Implementations never retry.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// All chat sessions in server order
    async fn list_sessions(&self) -> GatewayResult<Vec<ChatSession>>;

    /// Create a session; the server picks a title when none is given
    async fn create_session(&self, title: Option<&str>) -> GatewayResult<ChatSession>;

    /// Delete a session. `NotFound` means it was already gone.
    async fn delete_session(&self, id: &SessionId) -> GatewayResult<()>;

    /// Stored messages of a session, oldest first
    async fn list_messages(&self, id: &SessionId) -> GatewayResult<Vec<RemoteMessage>>;

    /// Run one query and wait for the full reply
    async fn submit_query(&self, request: &QueryRequest) -> GatewayResult<QueryReply>;

    /// One page of the model catalog
    async fn list_models(&self, request: &ModelPageRequest) -> GatewayResult<Vec<ModelEntry>>;

    async fn install_model(&self, name: &str) -> GatewayResult<()>;

    /// Make `name` the model the backend keeps loaded
    async fn load_model(&self, name: &str) -> GatewayResult<()>;

    /// Drop the backend's in-memory dialog context (stored chats are kept)
    async fn clear_history(&self) -> GatewayResult<()>;

    async fn get_settings(&self) -> GatewayResult<GenerationSettings>;

    /// Store settings and return what the server actually kept
    async fn commit_settings(
        &self,
        settings: &GenerationSettings,
    ) -> GatewayResult<GenerationSettings>;

    async fn persist_credential(&self, value: &str) -> GatewayResult<()>;

    async fn model_status(&self) -> GatewayResult<ModelStatus>;
}
