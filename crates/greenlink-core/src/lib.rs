//! # greenlink-core
//!
//! Session lifecycle and notification delivery for a hosted wallet backend.
//!
//! The crate is backend-agnostic: anything implementing [`WalletBackend`] can
//! be driven by a [`SessionManager`]. [`simulated::SimulatedBackend`] runs the
//! whole flow in-process for tests and smoke runs.
//!
//! ## Key Concepts
//!
//! - **Session**: one allocated backend session, moved through a strict state
//!   machine by the manager
//! - **Epoch**: the span between a connect and its disconnect; every
//!   notification is stamped with the epoch it arrived in
//! - **Readiness**: the `subaccount`, `fees` and `block` notifications pushed
//!   after login, counted by [`NotificationCounter`]

pub mod backend;
pub mod bridge;
pub mod config;
pub mod credentials;
pub mod error;
pub mod logging;
pub mod network;
pub mod notification;
pub mod session;
pub mod simulated;

// Re-export commonly used types
pub use backend::{LoginData, WalletBackend};
pub use bridge::{ChannelObserver, NotificationObserver, NotificationSink};
pub use config::SessionConfig;
pub use credentials::Credentials;
pub use error::{AuthenticationError, BackendError, ConnectionError, SessionError, SessionResult};
pub use network::{NetworkParameters, NetworkTarget};
pub use notification::{Notification, NotificationCounter};
pub use session::{Operation, SessionId, SessionManager, SessionState};
