//! In-process wallet backend.
//!
//! Behaves like the hosted service from the session layer's point of view:
//! networks can be unreachable, logins push an asynchronous burst of
//! notifications from a server-side thread, and watch-only logins need a live
//! network. No keys are derived and nothing goes over the wire.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::RngCore;
use serde_json::{json, Map, Value};

use crate::backend::{LoginData, WalletBackend};
use crate::bridge::NotificationSink;
use crate::credentials::Credentials;
use crate::error::{AuthenticationError, BackendError, ConnectionError};
use crate::network::{NetworkParameters, NetworkTarget};
use crate::notification::Notification;

/// Words a generated mnemonic is drawn from.
const WORDLIST: [&str; 64] = [
    "abandon", "ability", "able", "about", "above", "absent", "absorb", "abstract", "absurd",
    "abuse", "access", "accident", "account", "accuse", "achieve", "acid", "acoustic", "acquire",
    "across", "act", "action", "actor", "actress", "actual", "adapt", "add", "addict", "address",
    "adjust", "admit", "adult", "advance", "advice", "aerobic", "affair", "afford", "afraid",
    "again", "age", "agent", "agree", "ahead", "aim", "air", "airport", "aisle", "alarm", "album",
    "alcohol", "alert", "alien", "all", "alley", "allow", "almost", "alone", "alpha", "already",
    "also", "alter", "always", "amateur", "amazing", "among",
];

pub const MNEMONIC_WORDS: usize = 24;

/// Number of fee estimates pushed at login, one per confirmation target.
pub const FEE_ESTIMATE_COUNT: usize = 25;

/// Behaviour knobs for [`SimulatedBackend`].
#[derive(Debug, Clone)]
pub struct SimulatedConfig {
    /// Networks a connect succeeds on.
    pub reachable: HashSet<NetworkTarget>,
    /// Networks with a live server behind them; watch-only login needs one.
    pub live: HashSet<NetworkTarget>,
    /// Every connect fails with a protocol mismatch.
    pub protocol_mismatch: bool,
    /// Maximum concurrently allocated sessions.
    pub max_sessions: Option<usize>,
    /// Pause between the notifications of a login burst.
    pub burst_delay: Duration,
    pub initial_block_height: u32,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            reachable: [NetworkTarget::Testnet, NetworkTarget::Localtest]
                .into_iter()
                .collect(),
            live: [NetworkTarget::Testnet].into_iter().collect(),
            protocol_mismatch: false,
            max_sessions: None,
            burst_delay: Duration::ZERO,
            initial_block_height: 1_000,
        }
    }
}

impl SimulatedConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unreachable(mut self, target: NetworkTarget) -> Self {
        self.reachable.remove(&target);
        self
    }

    pub fn live(mut self, target: NetworkTarget) -> Self {
        self.live.insert(target);
        self
    }

    pub fn offline(mut self, target: NetworkTarget) -> Self {
        self.live.remove(&target);
        self
    }

    pub fn protocol_mismatch(mut self) -> Self {
        self.protocol_mismatch = true;
        self
    }

    pub fn max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = Some(max);
        self
    }

    pub fn burst_delay(mut self, delay: Duration) -> Self {
        self.burst_delay = delay;
        self
    }
}

#[derive(Debug, Clone)]
struct Wallet {
    wallet_id: String,
    subaccounts: Vec<Value>,
    transactions: Vec<Value>,
}

impl Wallet {
    fn new(wallet_id: String) -> Self {
        Self {
            wallet_id,
            subaccounts: vec![json!({
                "pointer": 0,
                "name": "",
                "type": "2of2",
                "satoshi": 0,
                "has_transactions": false,
                "is_dirty": false,
            })],
            transactions: Vec::new(),
        }
    }
}

struct LiveSession {
    sink: NotificationSink,
    /// Mnemonic of the logged-in wallet.
    wallet: Option<String>,
}

struct SimState {
    allocated: usize,
    block_height: u32,
    wallets: HashMap<String, Wallet>,
    /// username -> (password, wallet mnemonic)
    watch_only: HashMap<String, (String, String)>,
    sessions: HashMap<u64, LiveSession>,
}

/// Per-session state of the simulated backend.
#[derive(Debug)]
pub struct SimulatedHandle {
    id: u64,
    network: Option<NetworkTarget>,
    sink: Option<NotificationSink>,
    wallet: Option<String>,
    watch_only: bool,
}

impl SimulatedHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn network(&self) -> Option<NetworkTarget> {
        self.network
    }

    pub fn is_logged_in(&self) -> bool {
        self.wallet.is_some()
    }
}

/// A [`WalletBackend`] that runs entirely in this process.
pub struct SimulatedBackend {
    config: SimulatedConfig,
    state: Mutex<SimState>,
    next_id: AtomicU64,
}

impl SimulatedBackend {
    pub fn new(config: SimulatedConfig) -> Self {
        let block_height = config.initial_block_height;
        Self {
            config,
            state: Mutex::new(SimState {
                allocated: 0,
                block_height,
                wallets: HashMap::new(),
                watch_only: HashMap::new(),
                sessions: HashMap::new(),
            }),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &SimulatedConfig {
        &self.config
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of sessions currently allocated.
    pub fn allocated_sessions(&self) -> usize {
        self.state().allocated
    }

    /// Number of sessions with an open transport.
    pub fn connected_sessions(&self) -> usize {
        self.state().sessions.len()
    }

    pub fn is_registered(&self, mnemonic: &str) -> bool {
        self.state().wallets.contains_key(&normalize(mnemonic))
    }

    /// Announce a new block to every connected session.
    ///
    /// Returns how many sessions accepted the notification.
    pub fn push_block(&self) -> usize {
        let mut state = self.state();
        state.block_height += 1;
        let payload = block_payload(state.block_height);
        state
            .sessions
            .values()
            .filter(|live| live.sink.push(payload.clone()).is_ok())
            .count()
    }

    /// Record an incoming transaction for a registered wallet and notify every
    /// session logged into it. Returns the transaction hash.
    pub fn push_transaction(&self, mnemonic: &str, satoshi: u64) -> Result<String, BackendError> {
        let key = normalize(mnemonic);
        let txhash = hex(&self.get_random_bytes(32));

        let mut state = self.state();
        let block_height = state.block_height;
        let wallet = state
            .wallets
            .get_mut(&key)
            .ok_or_else(|| BackendError("wallet is not registered".to_string()))?;

        let transaction = json!({
            "txhash": txhash,
            "satoshi": satoshi,
            "type": "incoming",
            "block_height": block_height,
            "subaccounts": [0],
        });
        wallet.transactions.push(transaction.clone());
        if let Some(first) = wallet.subaccounts.first_mut() {
            let balance = first["satoshi"].as_u64().unwrap_or(0);
            first["satoshi"] = json!(balance + satoshi);
            first["has_transactions"] = json!(true);
        }

        let payload = Notification::payload("transaction", transaction);
        let mut delivered = 0;
        for live in state.sessions.values() {
            if live.wallet.as_deref() != Some(key.as_str()) {
                continue;
            }
            match live.sink.push(payload.clone()) {
                Ok(_) => delivered += 1,
                Err(closed) => log::debug!("Transaction {} not announced: {}", txhash, closed),
            }
        }
        log::debug!("Transaction {} announced to {} session(s)", txhash, delivered);
        Ok(txhash)
    }

    fn login_burst(&self, wallet: &Wallet, block_height: u32) -> Vec<Map<String, Value>> {
        let fees: Vec<u64> = (0..FEE_ESTIMATE_COUNT as u64).map(|i| 1_000 + i * 10).collect();
        vec![
            Notification::payload(
                "twofactor_reset",
                json!({ "is_active": false, "days_remaining": -1, "is_disputed": false }),
            ),
            Notification::payload("subaccount", wallet.subaccounts[0].clone()),
            Notification::payload("fees", json!(fees)),
            block_payload(block_height),
        ]
    }

    fn spawn_burst(&self, sink: NotificationSink, burst: Vec<Map<String, Value>>) {
        let delay = self.config.burst_delay;
        thread::spawn(move || {
            for payload in burst {
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
                if let Err(closed) = sink.push(payload) {
                    log::debug!("Login burst stopped: {}", closed);
                    break;
                }
            }
        });
    }
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new(SimulatedConfig::default())
    }
}

fn normalize(mnemonic: &str) -> String {
    mnemonic.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn block_payload(block_height: u32) -> Map<String, Value> {
    Notification::payload(
        "block",
        json!({
            "block_height": block_height,
            "block_hash": format!("{:064x}", block_height),
            "initial_timestamp": 0,
        }),
    )
}

impl WalletBackend for SimulatedBackend {
    type Handle = SimulatedHandle;

    fn create_session(&self) -> Result<SimulatedHandle, String> {
        let mut state = self.state();
        if let Some(max) = self.config.max_sessions {
            if state.allocated >= max {
                return Err(format!("session limit of {} reached", max));
            }
        }
        state.allocated += 1;
        Ok(SimulatedHandle {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            network: None,
            sink: None,
            wallet: None,
            watch_only: false,
        })
    }

    fn connect(
        &self,
        handle: &mut SimulatedHandle,
        params: &NetworkParameters,
        verbose: bool,
        sink: NotificationSink,
    ) -> Result<(), ConnectionError> {
        if verbose {
            log::debug!("Session {} connecting to {}", handle.id, params.wamp_url);
        }
        if !self.config.reachable.contains(&params.target) {
            return Err(ConnectionError::NetworkUnreachable(format!(
                "{} ({}) did not answer",
                params.target, params.wamp_url
            )));
        }
        if self.config.protocol_mismatch {
            return Err(ConnectionError::ProtocolMismatch(format!(
                "{} speaks an unsupported protocol version",
                params.wamp_url
            )));
        }

        self.state().sessions.insert(
            handle.id,
            LiveSession {
                sink: sink.clone(),
                wallet: None,
            },
        );
        handle.network = Some(params.target);
        handle.sink = Some(sink);
        Ok(())
    }

    fn register_user(
        &self,
        handle: &mut SimulatedHandle,
        mnemonic: &str,
    ) -> Result<(), AuthenticationError> {
        if handle.network.is_none() {
            return Err(AuthenticationError::NetworkRequired(
                "register needs a connected session".to_string(),
            ));
        }
        let key = normalize(mnemonic);
        let words = key.split(' ').filter(|w| !w.is_empty()).count();
        if words != 12 && words != MNEMONIC_WORDS {
            return Err(AuthenticationError::InvalidCredential(format!(
                "mnemonic must have 12 or 24 words, got {}",
                words
            )));
        }

        let mut state = self.state();
        if !state.wallets.contains_key(&key) {
            let wallet_id = hex(&self.get_random_bytes(16));
            state.wallets.insert(key, Wallet::new(wallet_id));
        }
        Ok(())
    }

    fn login(
        &self,
        handle: &mut SimulatedHandle,
        credentials: &Credentials,
        _user_agent: &str,
    ) -> Result<LoginData, AuthenticationError> {
        let network = handle.network.ok_or_else(|| {
            AuthenticationError::NetworkRequired("login needs a connected session".to_string())
        })?;
        let sink = handle.sink.clone().ok_or_else(|| {
            AuthenticationError::NetworkRequired("login needs a connected session".to_string())
        })?;

        let mut state = self.state();
        let (key, watch_only) = match credentials {
            Credentials::Mnemonic { phrase, password } => {
                if password.is_some() {
                    return Err(AuthenticationError::InvalidCredential(
                        "encrypted mnemonics are not supported".to_string(),
                    ));
                }
                (normalize(phrase), false)
            }
            Credentials::WatchOnly { username, password } => {
                if !self.config.live.contains(&network) {
                    return Err(AuthenticationError::NetworkRequired(format!(
                        "watch-only login needs a live {} backend",
                        network
                    )));
                }
                match state.watch_only.get(username) {
                    Some((expected, key)) if expected == password => (key.clone(), true),
                    _ => {
                        return Err(AuthenticationError::InvalidCredential(
                            "unknown watch-only username or password".to_string(),
                        ))
                    }
                }
            }
        };

        let wallet = state.wallets.get(&key).cloned().ok_or_else(|| {
            AuthenticationError::InvalidCredential("mnemonic is not registered".to_string())
        })?;
        let block_height = state.block_height;
        if let Some(live) = state.sessions.get_mut(&handle.id) {
            live.wallet = Some(key.clone());
        }
        drop(state);

        handle.wallet = Some(key);
        handle.watch_only = watch_only;
        self.spawn_burst(sink, self.login_burst(&wallet, block_height));

        Ok(LoginData {
            wallet_id: wallet.wallet_id,
            watch_only,
            block_height,
        })
    }

    fn set_watch_only(
        &self,
        handle: &mut SimulatedHandle,
        username: &str,
        password: &str,
    ) -> Result<(), BackendError> {
        let key = handle
            .wallet
            .clone()
            .ok_or_else(|| BackendError("not logged in".to_string()))?;
        if handle.watch_only {
            return Err(BackendError(
                "watch-only sessions cannot change watch-only credentials".to_string(),
            ));
        }
        if username.is_empty() || password.is_empty() {
            return Err(BackendError("username and password are required".to_string()));
        }

        let mut state = self.state();
        if let Some((_, owner)) = state.watch_only.get(username) {
            if *owner != key {
                return Err(BackendError(format!("username {} is taken", username)));
            }
        }
        state
            .watch_only
            .insert(username.to_string(), (password.to_string(), key));
        Ok(())
    }

    fn disconnect(&self, handle: &mut SimulatedHandle) {
        self.state().sessions.remove(&handle.id);
        handle.network = None;
        handle.sink = None;
        handle.wallet = None;
        handle.watch_only = false;
    }

    fn get_subaccounts(&self, handle: &SimulatedHandle) -> Result<Value, BackendError> {
        let key = handle
            .wallet
            .as_ref()
            .ok_or_else(|| BackendError("not logged in".to_string()))?;
        let state = self.state();
        let wallet = state
            .wallets
            .get(key)
            .ok_or_else(|| BackendError("wallet disappeared".to_string()))?;
        Ok(Value::Array(wallet.subaccounts.clone()))
    }

    fn get_transactions(
        &self,
        handle: &SimulatedHandle,
        offset: u32,
        limit: u32,
    ) -> Result<Value, BackendError> {
        let key = handle
            .wallet
            .as_ref()
            .ok_or_else(|| BackendError("not logged in".to_string()))?;
        let state = self.state();
        let wallet = state
            .wallets
            .get(key)
            .ok_or_else(|| BackendError("wallet disappeared".to_string()))?;

        // Newest first, like the hosted service.
        let list: Vec<Value> = wallet
            .transactions
            .iter()
            .rev()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect();
        Ok(json!({
            "list": list,
            "offset": offset,
            "total": wallet.transactions.len(),
        }))
    }

    fn destroy_session(&self, handle: SimulatedHandle) {
        let mut state = self.state();
        state.sessions.remove(&handle.id);
        state.allocated = state.allocated.saturating_sub(1);
    }

    fn generate_mnemonic(&self) -> String {
        let mut rng = rand::thread_rng();
        (0..MNEMONIC_WORDS)
            .filter_map(|_| WORDLIST.choose(&mut rng).copied())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn get_random_bytes(&self, n: usize) -> Vec<u8> {
        let mut bytes = vec![0u8; n];
        rand::thread_rng().fill_bytes(&mut bytes);
        bytes
    }
}
