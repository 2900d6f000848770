//! SessionManager - owns one wallet session and sequences its lifecycle.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use super::state::{Operation, Session, SessionId, SessionState};
use crate::backend::{LoginData, WalletBackend};
use crate::bridge::{NotificationBridge, NotificationObserver};
use crate::config::SessionConfig;
use crate::credentials::Credentials;
use crate::error::{SessionError, SessionResult};
use crate::logging::{self, log_line, LogHandle};
use crate::network::NetworkTarget;
use crate::notification::NotificationCounter;

struct Inner<H> {
    session: Session<H>,
    target: Option<NetworkTarget>,
    verbose: bool,
    login: Option<LoginData>,
}

/// Owns a single backend session, its notification bridge and counter.
///
/// Lifecycle calls are synchronous and serialized by an internal lock, so a
/// manager can be shared between threads behind an `Arc`. Notifications are
/// delivered on the bridge's worker thread, never on the caller's.
pub struct SessionManager<B: WalletBackend> {
    backend: Arc<B>,
    config: SessionConfig,
    id: SessionId,
    inner: Mutex<Inner<B::Handle>>,
    bridge: NotificationBridge,
    counter: Arc<NotificationCounter>,
    transcript: LogHandle,
}

impl<B: WalletBackend> SessionManager<B> {
    /// Allocate a backend session and start notification delivery.
    pub fn create(backend: Arc<B>, config: SessionConfig) -> SessionResult<Self> {
        let handle = backend.create_session().map_err(|e| {
            log::warn!("Session allocation failed: {}", e);
            SessionError::Allocation(e)
        })?;

        let id = SessionId::new();
        let transcript = logging::open_log_file(config.transcript_dir.as_deref(), &id.0);
        let counter = Arc::new(NotificationCounter::with_poll_interval(config.poll_interval));

        let bridge = match NotificationBridge::new(Arc::clone(&counter), transcript.clone()) {
            Ok(bridge) => bridge.with_shutdown_timeout(config.shutdown_timeout),
            Err(e) => {
                backend.destroy_session(handle);
                return Err(SessionError::Allocation(format!(
                    "cannot start notification worker: {}",
                    e
                )));
            }
        };

        log::info!("Session {} created", id);
        log_line(&transcript, "STATE", "created");

        Ok(Self {
            backend,
            config,
            id: id.clone(),
            inner: Mutex::new(Inner {
                session: Session::new(id, handle),
                target: None,
                verbose: false,
                login: None,
            }),
            bridge,
            counter,
            transcript,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner<B::Handle>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The state `op` leads to, or `InvalidState` without touching anything.
    fn check(inner: &Inner<B::Handle>, op: Operation) -> SessionResult<SessionState> {
        let state = inner.session.state;
        state.next(op).ok_or_else(|| {
            log::debug!("Session {} rejected {} while {}", inner.session.id, op, state);
            SessionError::InvalidState {
                operation: op,
                state,
            }
        })
    }

    fn handle_mut(inner: &mut Inner<B::Handle>, op: Operation) -> SessionResult<&mut B::Handle> {
        let state = inner.session.state;
        inner
            .session
            .handle
            .as_mut()
            .ok_or(SessionError::InvalidState {
                operation: op,
                state,
            })
    }

    fn handle(inner: &Inner<B::Handle>, op: Operation) -> SessionResult<&B::Handle> {
        let state = inner.session.state;
        inner
            .session
            .handle
            .as_ref()
            .ok_or(SessionError::InvalidState {
                operation: op,
                state,
            })
    }

    fn transition(&self, inner: &mut Inner<B::Handle>, next: SessionState) {
        let previous = std::mem::replace(&mut inner.session.state, next);
        if previous != next {
            log::info!("Session {} {} -> {}", self.id, previous, next);
            log_line(&self.transcript, "STATE", &format!("{} -> {}", previous, next));
        }
    }

    /// Install the observer, replacing any previous one.
    pub fn register_observer(&self, observer: Arc<dyn NotificationObserver>) -> SessionResult<()> {
        let inner = self.lock();
        Self::check(&inner, Operation::RegisterObserver)?;
        if self.bridge.set_observer(Some(observer)).is_some() {
            log::debug!("Session {} replaced its observer", self.id);
        }
        Ok(())
    }

    /// Remove the observer. Notifications keep being counted.
    pub fn clear_observer(&self) -> SessionResult<()> {
        let inner = self.lock();
        Self::check(&inner, Operation::RegisterObserver)?;
        self.bridge.set_observer(None);
        Ok(())
    }

    pub fn connect(&self, target: NetworkTarget, verbose: bool) -> SessionResult<()> {
        let mut inner = self.lock();
        self.connect_locked(&mut inner, target, verbose)
    }

    fn connect_locked(
        &self,
        inner: &mut Inner<B::Handle>,
        target: NetworkTarget,
        verbose: bool,
    ) -> SessionResult<()> {
        let next = Self::check(inner, Operation::Connect)?;
        let params = target.parameters();
        let sink = self.bridge.open_epoch();
        let epoch = sink.epoch();

        let handle = Self::handle_mut(inner, Operation::Connect)?;
        if let Err(e) = self.backend.connect(handle, &params, verbose, sink) {
            self.bridge.close_epoch();
            log::warn!("Session {} failed to connect to {}: {}", self.id, target, e);
            return Err(e.into());
        }

        inner.target = Some(target);
        inner.verbose = verbose;
        log::info!(
            "Session {} connected to {} ({}, epoch {})",
            self.id,
            target,
            params.wamp_url,
            epoch
        );
        self.transition(inner, next);
        Ok(())
    }

    /// Register a wallet mnemonic with the backend.
    pub fn register_user(&self, mnemonic: &str) -> SessionResult<()> {
        let mut inner = self.lock();
        Self::check(&inner, Operation::RegisterUser)?;
        let handle = Self::handle_mut(&mut inner, Operation::RegisterUser)?;
        self.backend.register_user(handle, mnemonic).map_err(|e| {
            log::warn!("Session {} failed to register user: {}", self.id, e);
            SessionError::from(e)
        })
    }

    /// Log in. The readiness notifications follow asynchronously.
    pub fn authenticate(&self, credentials: &Credentials) -> SessionResult<LoginData> {
        let mut inner = self.lock();
        self.authenticate_locked(&mut inner, credentials)
    }

    fn authenticate_locked(
        &self,
        inner: &mut Inner<B::Handle>,
        credentials: &Credentials,
    ) -> SessionResult<LoginData> {
        let next = Self::check(inner, Operation::Authenticate)?;
        let handle = Self::handle_mut(inner, Operation::Authenticate)?;

        let data = match self.backend.login(handle, credentials, &self.config.user_agent) {
            Ok(data) => data,
            Err(e) => {
                let err = SessionError::from(e);
                if err.is_skippable() {
                    log::info!("Session {} cannot log in here: {}", self.id, err);
                } else {
                    log::warn!("Session {} {} login failed: {}", self.id, credentials.kind(), err);
                }
                return Err(err);
            }
        };

        log::info!(
            "Session {} logged in ({}, wallet {}, block {})",
            self.id,
            credentials.kind(),
            data.wallet_id,
            data.block_height
        );
        inner.login = Some(data.clone());
        self.transition(inner, next);
        Ok(data)
    }

    /// Give the logged-in wallet a watch-only username and password.
    pub fn set_watch_only(&self, username: &str, password: &str) -> SessionResult<()> {
        let mut inner = self.lock();
        Self::check(&inner, Operation::SetWatchOnly)?;
        let handle = Self::handle_mut(&mut inner, Operation::SetWatchOnly)?;
        self.backend.set_watch_only(handle, username, password)?;
        log::info!("Session {} set watch-only user {}", self.id, username);
        Ok(())
    }

    pub fn get_subaccounts(&self) -> SessionResult<Value> {
        let inner = self.lock();
        Self::check(&inner, Operation::Query)?;
        let handle = Self::handle(&inner, Operation::Query)?;
        Ok(self.backend.get_subaccounts(handle)?)
    }

    pub fn get_transactions(&self, offset: u32, limit: u32) -> SessionResult<Value> {
        let inner = self.lock();
        Self::check(&inner, Operation::Query)?;
        let handle = Self::handle(&inner, Operation::Query)?;
        Ok(self.backend.get_transactions(handle, offset, limit)?)
    }

    /// Close the transport. A no-op when already disconnected.
    pub fn disconnect(&self) -> SessionResult<()> {
        let mut inner = self.lock();
        let next = Self::check(&inner, Operation::Disconnect)?;
        if inner.session.state == SessionState::Disconnected {
            log::debug!("Session {} already disconnected", self.id);
            return Ok(());
        }
        self.disconnect_locked(&mut inner)?;
        self.transition(&mut inner, next);
        Ok(())
    }

    fn disconnect_locked(&self, inner: &mut Inner<B::Handle>) -> SessionResult<()> {
        let closed = self.bridge.close_epoch();
        let handle = Self::handle_mut(inner, Operation::Disconnect)?;
        self.backend.disconnect(handle);
        inner.login = None;
        log::info!(
            "Session {} disconnected (epoch {})",
            self.id,
            closed.unwrap_or_default()
        );
        Ok(())
    }

    /// Connect to `target` again and log in with `credentials`.
    ///
    /// Uses the verbose flag of the previous connect. The counter is left as
    /// is; reset it first to wait for a fresh readiness burst.
    pub fn reconnect_and_reauthenticate(
        &self,
        target: NetworkTarget,
        credentials: &Credentials,
    ) -> SessionResult<LoginData> {
        let mut inner = self.lock();
        Self::check(&inner, Operation::Reconnect)?;
        let verbose = inner.verbose;
        self.connect_locked(&mut inner, target, verbose)?;
        self.authenticate_locked(&mut inner, credentials)
    }

    /// Tear the session down. Every later operation fails with `InvalidState`.
    pub fn destroy(&self) -> SessionResult<()> {
        {
            let mut inner = self.lock();
            let next = Self::check(&inner, Operation::Destroy)?;
            if inner.session.state.is_connected() {
                self.disconnect_locked(&mut inner)?;
            }
            if let Some(handle) = inner.session.handle.take() {
                self.backend.destroy_session(handle);
            }
            inner.target = None;
            self.transition(&mut inner, next);
        }
        self.bridge.shutdown();
        Ok(())
    }

    pub fn session_id(&self) -> &SessionId {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.lock().session.state
    }

    /// Network of the last successful connect.
    pub fn target(&self) -> Option<NetworkTarget> {
        self.lock().target
    }

    /// Most recently opened notification epoch (0 before the first connect).
    pub fn epoch(&self) -> u64 {
        self.bridge.epoch()
    }

    pub fn counter(&self) -> Arc<NotificationCounter> {
        Arc::clone(&self.counter)
    }

    /// Reset the notification counter, returning the count it held.
    ///
    /// Notifications from epochs that are already closed stop counting, even
    /// if they are still queued for the observer. While connected, the
    /// current epoch keeps counting.
    pub fn reset_counter(&self) -> u64 {
        let _inner = self.lock();
        let current = self.bridge.epoch();
        let min_epoch = if self.bridge.is_open() {
            current
        } else {
            current + 1
        };
        self.counter.reset_from_epoch(min_epoch)
    }

    /// What the current login reported; `None` when not authenticated.
    pub fn login_data(&self) -> Option<LoginData> {
        self.lock().login.clone()
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn generate_mnemonic(&self) -> String {
        self.backend.generate_mnemonic()
    }

    pub fn get_random_bytes(&self, n: usize) -> Vec<u8> {
        self.backend.get_random_bytes(n)
    }
}

impl<B: WalletBackend> Drop for SessionManager<B> {
    fn drop(&mut self) {
        if self.state() == SessionState::Destroyed {
            return;
        }
        if let Err(e) = self.destroy() {
            log::warn!("Session {} teardown on drop failed: {}", self.id, e);
        }
    }
}
