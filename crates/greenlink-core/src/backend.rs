//! The wallet backend SDK seen from the session layer.
//!
//! Everything wallet-specific (key derivation, registration, the wire protocol,
//! transaction history) lives behind [`WalletBackend`]. The session layer only
//! sequences these calls and routes the notifications the backend pushes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bridge::NotificationSink;
use crate::credentials::Credentials;
use crate::error::{AuthenticationError, BackendError, ConnectionError};
use crate::network::NetworkParameters;

/// What a successful login reports back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginData {
    pub wallet_id: String,
    pub watch_only: bool,
    pub block_height: u32,
}

/// Backend SDK operations used by [`SessionManager`](crate::SessionManager).
///
/// Calls are synchronous: they return once the backend has finished the
/// request. Notifications arrive separately through the sink handed to
/// [`connect`](Self::connect), from whatever thread the backend uses for I/O.
pub trait WalletBackend: Send + Sync + 'static {
    /// Per-session state owned by the manager.
    type Handle: Send + 'static;

    /// Allocate a new, unconnected session. The error describes what ran out.
    fn create_session(&self) -> Result<Self::Handle, String>;

    /// Open a transport channel. `sink` stays valid until the session is
    /// disconnected; pushes after that are rejected.
    fn connect(
        &self,
        handle: &mut Self::Handle,
        params: &NetworkParameters,
        verbose: bool,
        sink: NotificationSink,
    ) -> Result<(), ConnectionError>;

    fn register_user(&self, handle: &mut Self::Handle, mnemonic: &str)
        -> Result<(), AuthenticationError>;

    /// Log in with either credential variant. On success the backend starts
    /// pushing its initial notifications.
    fn login(
        &self,
        handle: &mut Self::Handle,
        credentials: &Credentials,
        user_agent: &str,
    ) -> Result<LoginData, AuthenticationError>;

    fn set_watch_only(
        &self,
        handle: &mut Self::Handle,
        username: &str,
        password: &str,
    ) -> Result<(), BackendError>;

    /// Close the transport. Must not fail and must not block on notification
    /// delivery.
    fn disconnect(&self, handle: &mut Self::Handle);

    fn get_subaccounts(&self, handle: &Self::Handle) -> Result<Value, BackendError>;

    fn get_transactions(
        &self,
        handle: &Self::Handle,
        offset: u32,
        limit: u32,
    ) -> Result<Value, BackendError>;

    /// Release the session. The handle is never used again.
    fn destroy_session(&self, handle: Self::Handle);

    fn generate_mnemonic(&self) -> String;

    fn get_random_bytes(&self, n: usize) -> Vec<u8>;
}
