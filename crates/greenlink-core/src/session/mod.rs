//! The wallet session and its lifecycle.
//!
//! A [`SessionManager`] owns exactly one backend session and walks it through
//! `created -> connected -> authenticated -> disconnected -> ... -> destroyed`.
//! Operations outside the transition table fail with
//! [`SessionError::InvalidState`](crate::SessionError::InvalidState).

mod manager;
mod state;

pub use manager::SessionManager;
pub use state::{Operation, Session, SessionId, SessionState};
