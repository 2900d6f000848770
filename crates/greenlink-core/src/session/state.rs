//! Per-session state and the lifecycle transition table.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    Connected,
    Authenticated,
    Disconnected,
    Destroyed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Created => "created",
            SessionState::Connected => "connected",
            SessionState::Authenticated => "authenticated",
            SessionState::Disconnected => "disconnected",
            SessionState::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

/// Operations a caller can request on a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    RegisterObserver,
    Connect,
    RegisterUser,
    Authenticate,
    SetWatchOnly,
    Query,
    Disconnect,
    Reconnect,
    Destroy,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Operation::RegisterObserver => "register observer",
            Operation::Connect => "connect",
            Operation::RegisterUser => "register user",
            Operation::Authenticate => "authenticate",
            Operation::SetWatchOnly => "set watch-only",
            Operation::Query => "query",
            Operation::Disconnect => "disconnect",
            Operation::Reconnect => "reconnect",
            Operation::Destroy => "destroy",
        };
        f.write_str(name)
    }
}

impl SessionState {
    /// The state reached when `op` succeeds from `self`, or `None` when the
    /// transition is not allowed.
    ///
    /// Operations that do not change the lifecycle (queries, registration,
    /// observer changes) map to `Some(self)` in the states that accept them.
    pub fn next(self, op: Operation) -> Option<SessionState> {
        use Operation as Op;
        use SessionState as S;

        match (self, op) {
            (S::Destroyed, _) => None,

            (_, Op::RegisterObserver) => Some(self),
            (_, Op::Destroy) => Some(S::Destroyed),

            (S::Created | S::Disconnected, Op::Connect) => Some(S::Connected),
            (S::Connected, Op::RegisterUser) => Some(S::Connected),
            (S::Connected, Op::Authenticate) => Some(S::Authenticated),
            (S::Authenticated, Op::SetWatchOnly | Op::Query) => Some(S::Authenticated),
            (S::Connected | S::Authenticated | S::Disconnected, Op::Disconnect) => {
                Some(S::Disconnected)
            }
            (S::Disconnected, Op::Reconnect) => Some(S::Authenticated),

            _ => None,
        }
    }

    /// Whether a transport channel is open in this state.
    pub fn is_connected(self) -> bool {
        matches!(self, SessionState::Connected | SessionState::Authenticated)
    }
}

/// The single session owned by a manager.
pub struct Session<H> {
    /// Unique session identifier
    pub id: SessionId,

    /// Current lifecycle state
    pub state: SessionState,

    /// Backend handle; `None` once destroyed
    pub handle: Option<H>,
}

impl<H> Session<H> {
    pub fn new(id: SessionId, handle: H) -> Self {
        Self {
            id,
            state: SessionState::Created,
            handle: Some(handle),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod session_id {
        use super::*;

        #[test]
        fn new_generates_unique_ids() {
            let id1 = SessionId::new();
            let id2 = SessionId::new();
            assert_ne!(id1, id2);
        }

        #[test]
        fn display_shows_inner_string() {
            let id = SessionId("wallet-session-1".to_string());
            assert_eq!(format!("{}", id), "wallet-session-1");
        }

        #[test]
        fn serialization_roundtrip() {
            let id = SessionId("abc".to_string());
            let json = serde_json::to_string(&id).unwrap();
            let parsed: SessionId = serde_json::from_str(&json).unwrap();
            assert_eq!(id, parsed);
        }
    }

    mod transitions {
        use super::*;

        const ALL_OPS: [Operation; 9] = [
            Operation::RegisterObserver,
            Operation::Connect,
            Operation::RegisterUser,
            Operation::Authenticate,
            Operation::SetWatchOnly,
            Operation::Query,
            Operation::Disconnect,
            Operation::Reconnect,
            Operation::Destroy,
        ];

        #[test]
        fn happy_path_cycle() {
            let s = SessionState::Created;
            let s = s.next(Operation::Connect).unwrap();
            assert_eq!(s, SessionState::Connected);
            let s = s.next(Operation::Authenticate).unwrap();
            assert_eq!(s, SessionState::Authenticated);
            let s = s.next(Operation::Disconnect).unwrap();
            assert_eq!(s, SessionState::Disconnected);
            let s = s.next(Operation::Connect).unwrap();
            assert_eq!(s, SessionState::Connected);
            let s = s.next(Operation::Authenticate).unwrap();
            assert_eq!(s, SessionState::Authenticated);
            let s = s.next(Operation::Destroy).unwrap();
            assert_eq!(s, SessionState::Destroyed);
        }

        #[test]
        fn destroyed_is_terminal() {
            for op in ALL_OPS {
                assert_eq!(SessionState::Destroyed.next(op), None, "{op} after destroy");
            }
        }

        #[test]
        fn authenticate_requires_connection() {
            assert_eq!(SessionState::Created.next(Operation::Authenticate), None);
            assert_eq!(SessionState::Disconnected.next(Operation::Authenticate), None);
            assert_eq!(SessionState::Authenticated.next(Operation::Authenticate), None);
        }

        #[test]
        fn connect_rejected_while_connected() {
            assert_eq!(SessionState::Connected.next(Operation::Connect), None);
            assert_eq!(SessionState::Authenticated.next(Operation::Connect), None);
        }

        #[test]
        fn disconnect_is_idempotent_but_not_from_created() {
            assert_eq!(
                SessionState::Disconnected.next(Operation::Disconnect),
                Some(SessionState::Disconnected)
            );
            assert_eq!(SessionState::Created.next(Operation::Disconnect), None);
        }

        #[test]
        fn reconnect_only_from_disconnected() {
            assert_eq!(
                SessionState::Disconnected.next(Operation::Reconnect),
                Some(SessionState::Authenticated)
            );
            assert_eq!(SessionState::Created.next(Operation::Reconnect), None);
            assert_eq!(SessionState::Authenticated.next(Operation::Reconnect), None);
        }

        #[test]
        fn queries_need_authentication() {
            assert_eq!(SessionState::Connected.next(Operation::Query), None);
            assert_eq!(
                SessionState::Authenticated.next(Operation::Query),
                Some(SessionState::Authenticated)
            );
        }

        #[test]
        fn is_connected_matches_open_transport() {
            assert!(SessionState::Connected.is_connected());
            assert!(SessionState::Authenticated.is_connected());
            assert!(!SessionState::Created.is_connected());
            assert!(!SessionState::Disconnected.is_connected());
            assert!(!SessionState::Destroyed.is_connected());
        }
    }

    mod session {
        use super::*;

        #[test]
        fn new_starts_created_with_handle() {
            let session = Session::new(SessionId::new(), 7u32);
            assert_eq!(session.state, SessionState::Created);
            assert_eq!(session.handle, Some(7));
        }
    }
}
