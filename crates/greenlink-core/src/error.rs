//! Error taxonomy for session operations.

use thiserror::Error;

use crate::session::{Operation, SessionState};

/// Why a transport channel could not be opened.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("protocol mismatch: {0}")]
    ProtocolMismatch(String),
}

/// Why a login attempt was refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationError {
    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    /// The backend needs a live network the caller does not have.
    #[error("live network required: {0}")]
    NetworkRequired(String),
}

/// A query or account call failed inside the backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("backend error: {0}")]
pub struct BackendError(pub String);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Failed to allocate session: {0}")]
    Allocation(String),

    #[error("Connection failed: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Authentication failed: {0}")]
    Authentication(#[from] AuthenticationError),

    #[error("Cannot {operation} while session is {state}")]
    InvalidState {
        operation: Operation,
        state: SessionState,
    },

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl SessionError {
    /// True when the failure means "this environment cannot run the step"
    /// rather than "the step is broken".
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            SessionError::Authentication(AuthenticationError::NetworkRequired(_))
        )
    }

    pub fn is_invalid_state(&self) -> bool {
        matches!(self, SessionError::InvalidState { .. })
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
