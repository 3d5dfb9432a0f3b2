//! Typed errors for the sync stores
//!
//! Validation and conflict errors are raised before any network call and
//! leave every store untouched.

use thiserror::Error;

use crate::core::SessionId;
use crate::gateway::GatewayError;

/// Broad category used by the presentation layer to pick wording and colour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing precondition on a user action
    Validation,
    /// An operation of the same kind is already in flight
    Conflict,
    /// The referenced resource is gone server-side
    NotFound,
    /// The gateway failed or was unreachable
    Transport,
}

#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error("Message is empty")]
    EmptyMessage,

    #[error("No model selected")]
    NoModelSelected,

    #[error("No active chat")]
    NoActiveSession,

    #[error("Chat {0} is not the open chat")]
    SessionNotActive(SessionId),

    #[error("Unknown chat: {0}")]
    UnknownSession(SessionId),

    #[error("Deleting chat {0} was not confirmed")]
    NotConfirmed(SessionId),

    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Model {0} is not installed")]
    ModelNotInstalled(String),

    #[error("Settings dialog is not open")]
    DraftClosed,

    #[error("{0} must be a finite number")]
    InvalidSetting(&'static str),

    #[error("Credential is empty")]
    EmptyCredential,

    #[error("A reply is still pending in chat {0}")]
    SendPending(SessionId),

    #[error("{0} is already being installed")]
    InstallPending(String),

    #[error("Chat {0} no longer exists")]
    SessionGone(SessionId),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::EmptyMessage
            | SyncError::NoModelSelected
            | SyncError::NoActiveSession
            | SyncError::SessionNotActive(_)
            | SyncError::UnknownSession(_)
            | SyncError::NotConfirmed(_)
            | SyncError::UnknownModel(_)
            | SyncError::ModelNotInstalled(_)
            | SyncError::DraftClosed
            | SyncError::InvalidSetting(_)
            | SyncError::EmptyCredential => ErrorKind::Validation,
            SyncError::SendPending(_) | SyncError::InstallPending(_) => ErrorKind::Conflict,
            SyncError::SessionGone(_) => ErrorKind::NotFound,
            SyncError::Gateway(e) if e.is_not_found() => ErrorKind::NotFound,
            SyncError::Gateway(_) => ErrorKind::Transport,
        }
    }

    /// Text suitable for showing to the user
    pub fn user_message(&self) -> String {
        match self {
            SyncError::Gateway(e) => e.detail().to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(SyncError::EmptyMessage.kind(), ErrorKind::Validation);
        assert_eq!(
            SyncError::SendPending(SessionId::from("a")).kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            SyncError::from(GatewayError::NotFound("x".into())).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            SyncError::from(GatewayError::Network("refused".into())).kind(),
            ErrorKind::Transport
        );
    }

    #[test]
    fn test_user_message_strips_category() {
        let err = SyncError::from(GatewayError::ServiceError("Model not initialized".into()));
        assert_eq!(err.user_message(), "Model not initialized");
        assert_eq!(SyncError::NoModelSelected.user_message(), "No model selected");
    }
}
