//! The end-to-end smoke run.
//!
//! Walks one session through its whole lifecycle twice (fresh login, then
//! reconnect) and finishes with a watch-only login. A watch-only login that
//! needs a live network this environment lacks ends the run as skipped.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use greenlink_core::{
    Credentials, NetworkTarget, Notification, NotificationObserver, SessionConfig,
    SessionManager, WalletBackend,
};
use tokio::sync::mpsc;

/// Default bound on each readiness wait.
pub const READINESS_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct HarnessOptions {
    pub target: NetworkTarget,
    /// Do not print notifications and connect without verbose logging.
    pub quiet: bool,
    pub readiness_timeout: Duration,
    pub transcript_dir: Option<PathBuf>,
}

impl HarnessOptions {
    pub fn new(target: NetworkTarget, quiet: bool) -> Self {
        Self {
            target,
            quiet,
            readiness_timeout: READINESS_TIMEOUT,
            transcript_dir: None,
        }
    }
}

/// How a run that did not fail ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Passed,
    Skipped(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Create,
    Mnemonic,
    Observer,
    Connect,
    Register,
    Login,
    Readiness,
    Queries,
    SetWatchOnly,
    Disconnect,
    Reconnect,
    WatchOnlyLogin,
    Destroy,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Create => "create",
            Phase::Mnemonic => "mnemonic",
            Phase::Observer => "observer",
            Phase::Connect => "connect",
            Phase::Register => "register",
            Phase::Login => "login",
            Phase::Readiness => "readiness",
            Phase::Queries => "queries",
            Phase::SetWatchOnly => "set watch-only",
            Phase::Disconnect => "disconnect",
            Phase::Reconnect => "reconnect",
            Phase::WatchOnlyLogin => "watch-only login",
            Phase::Destroy => "destroy",
        };
        f.write_str(name)
    }
}

/// Prints each notification unless quiet and forwards readiness events.
struct HarnessObserver {
    quiet: bool,
    readiness: mpsc::UnboundedSender<Notification>,
}

impl NotificationObserver for HarnessObserver {
    fn on_notification(&self, notification: &Notification) {
        if notification.is_readiness() && self.readiness.send(notification.clone()).is_err() {
            log::debug!("Readiness receiver gone, dropping {}", notification.seq);
        }
        if self.quiet {
            return;
        }
        match serde_json::to_string(&notification.payload) {
            Ok(json) => println!("notification {}: {}", notification.seq, json),
            Err(e) => log::warn!("Unprintable notification {}: {}", notification.seq, e),
        }
    }

    fn on_closed(&self, epoch: u64) {
        if !self.quiet {
            println!("notifications closed (epoch {})", epoch);
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Wait for a readiness-class notification from the session's current epoch.
///
/// Readiness events left over from an earlier epoch are skipped.
async fn wait_ready<B: WalletBackend>(
    manager: &SessionManager<B>,
    readiness: &mut mpsc::UnboundedReceiver<Notification>,
    timeout: Duration,
) -> Result<Notification> {
    let epoch = manager.epoch();
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let next = tokio::time::timeout_at(deadline, readiness.recv())
            .await
            .with_context(|| {
                format!(
                    "no readiness notification for epoch {} after {:?}",
                    epoch, timeout
                )
            })?;
        let notification = next.context("readiness channel closed")?;
        if notification.epoch == epoch {
            log::info!(
                "[{}] {} (epoch {}, {} notifications counted)",
                Phase::Readiness,
                notification.event().unwrap_or("<untyped>"),
                epoch,
                manager.counter().get()
            );
            return Ok(notification);
        }
        log::debug!(
            "[{}] skipping {} from epoch {}",
            Phase::Readiness,
            notification.event().unwrap_or("<untyped>"),
            notification.epoch
        );
    }
}

/// Run every phase against `backend`.
pub async fn run<B: WalletBackend>(backend: Arc<B>, options: &HarnessOptions) -> Result<Outcome> {
    let target = options.target;
    let verbose = !options.quiet;

    let mut config = SessionConfig::new();
    if let Some(dir) = &options.transcript_dir {
        config = config.transcript_dir(dir);
    }
    let manager = SessionManager::create(backend, config).context(Phase::Create)?;
    log::info!("[{}] session {}", Phase::Create, manager.session_id());

    let mnemonic = manager.generate_mnemonic();
    let words = mnemonic.split_whitespace().count();
    if words != 24 {
        bail!("{}: expected 24 words, got {}", Phase::Mnemonic, words);
    }
    let random = manager.get_random_bytes(32);
    if random.len() != 32 {
        bail!("{}: expected 32 random bytes, got {}", Phase::Mnemonic, random.len());
    }

    let (readiness_tx, mut readiness) = mpsc::unbounded_channel();
    manager
        .register_observer(Arc::new(HarnessObserver {
            quiet: options.quiet,
            readiness: readiness_tx,
        }))
        .context(Phase::Observer)?;

    manager.connect(target, verbose).context(Phase::Connect)?;
    log::info!("[{}] {} (epoch {})", Phase::Connect, target, manager.epoch());

    manager.register_user(&mnemonic).context(Phase::Register)?;
    let credentials = Credentials::mnemonic(mnemonic);
    let login = manager.authenticate(&credentials).context(Phase::Login)?;
    log::info!("[{}] wallet {}", Phase::Login, login.wallet_id);

    wait_ready(&manager, &mut readiness, options.readiness_timeout).await?;

    let subaccounts = manager.get_subaccounts().context(Phase::Queries)?;
    match subaccounts.as_array() {
        Some(list) if !list.is_empty() => {}
        _ => bail!("{}: no subaccounts returned", Phase::Queries),
    }
    let transactions = manager.get_transactions(0, 30).context(Phase::Queries)?;
    log::info!(
        "[{}] {} subaccount(s), {} transaction(s)",
        Phase::Queries,
        subaccounts.as_array().map_or(0, Vec::len),
        transactions["list"].as_array().map_or(0, Vec::len)
    );

    let username = format!("smoke-{}", hex(&manager.get_random_bytes(6)));
    let password = hex(&manager.get_random_bytes(16));
    manager
        .set_watch_only(&username, &password)
        .context(Phase::SetWatchOnly)?;

    manager.disconnect().context(Phase::Disconnect)?;
    let before = manager.reset_counter();
    log::info!("[{}] counter reset from {}", Phase::Disconnect, before);

    manager
        .reconnect_and_reauthenticate(target, &credentials)
        .context(Phase::Reconnect)?;
    wait_ready(&manager, &mut readiness, options.readiness_timeout).await?;
    manager.disconnect().context(Phase::Disconnect)?;

    manager.connect(target, verbose).context(Phase::Connect)?;
    let outcome = match manager.authenticate(&Credentials::watch_only(username, password)) {
        Ok(data) => {
            log::info!("[{}] wallet {}", Phase::WatchOnlyLogin, data.wallet_id);
            Outcome::Passed
        }
        Err(e) if e.is_skippable() => {
            log::warn!("[{}] skipped: {}", Phase::WatchOnlyLogin, e);
            Outcome::Skipped(e.to_string())
        }
        Err(e) => return Err(e).context(Phase::WatchOnlyLogin),
    };

    manager.destroy().context(Phase::Destroy)?;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use greenlink_core::simulated::{SimulatedBackend, SimulatedConfig};
    use greenlink_core::{ConnectionError, SessionError};

    fn options(target: NetworkTarget) -> HarnessOptions {
        HarnessOptions {
            readiness_timeout: Duration::from_secs(5),
            ..HarnessOptions::new(target, true)
        }
    }

    #[tokio::test]
    async fn passes_on_live_testnet() {
        let backend = Arc::new(SimulatedBackend::default());
        let outcome = run(Arc::clone(&backend), &options(NetworkTarget::Testnet))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Passed);
        assert_eq!(backend.allocated_sessions(), 0);
    }

    #[tokio::test]
    async fn watch_only_without_live_network_is_skipped() {
        let backend = Arc::new(SimulatedBackend::default());
        let outcome = run(backend, &options(NetworkTarget::Localtest))
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::Skipped(_)));
    }

    #[tokio::test]
    async fn unreachable_network_fails() {
        let backend = Arc::new(SimulatedBackend::new(
            SimulatedConfig::new().unreachable(NetworkTarget::Testnet),
        ));
        let err = run(Arc::clone(&backend), &options(NetworkTarget::Testnet))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "connect");
        assert!(matches!(
            err.downcast_ref::<SessionError>(),
            Some(SessionError::Connection(ConnectionError::NetworkUnreachable(_)))
        ));
        // The manager was dropped on the error path.
        assert_eq!(backend.allocated_sessions(), 0);
    }

    #[tokio::test]
    async fn allocation_failure_fails() {
        let backend = Arc::new(SimulatedBackend::new(SimulatedConfig::new().max_sessions(0)));
        let err = run(backend, &options(NetworkTarget::Testnet))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SessionError>(),
            Some(SessionError::Allocation(_))
        ));
    }

    #[tokio::test]
    async fn slow_readiness_times_out() {
        let backend = Arc::new(SimulatedBackend::new(
            SimulatedConfig::new().burst_delay(Duration::from_millis(200)),
        ));
        let options = HarnessOptions {
            readiness_timeout: Duration::from_millis(50),
            ..HarnessOptions::new(NetworkTarget::Testnet, true)
        };
        let err = run(backend, &options).await.unwrap_err();
        assert!(err.to_string().contains("no readiness notification"));
    }

    #[tokio::test]
    async fn writes_transcript() {
        let dir = tempfile::tempdir().unwrap();
        let options = HarnessOptions {
            transcript_dir: Some(dir.path().to_path_buf()),
            ..options(NetworkTarget::Testnet)
        };
        run(Arc::new(SimulatedBackend::default()), &options)
            .await
            .unwrap();

        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
    }

    fn readiness(epoch: u64, event: &str) -> Notification {
        Notification::new(epoch, 1, Notification::payload(event, serde_json::json!({})))
    }

    #[tokio::test]
    async fn wait_ready_skips_other_epochs_and_non_readiness() {
        let manager =
            SessionManager::create(Arc::new(SimulatedBackend::default()), SessionConfig::new())
                .unwrap();
        manager.connect(NetworkTarget::Testnet, false).unwrap();
        manager.disconnect().unwrap();
        manager.connect(NetworkTarget::Testnet, false).unwrap();
        assert_eq!(manager.epoch(), 2);

        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(readiness(1, "block")).unwrap();
        let err = wait_ready(&manager, &mut rx, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("epoch 2"));

        tx.send(readiness(1, "fees")).unwrap();
        tx.send(readiness(2, "subaccount")).unwrap();
        let ready = wait_ready(&manager, &mut rx, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(ready.epoch, 2);
        assert_eq!(ready.event(), Some("subaccount"));
    }

    #[test]
    fn observer_forwards_only_readiness() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let observer = HarnessObserver {
            quiet: true,
            readiness: tx,
        };
        observer.on_notification(&readiness(1, "twofactor_reset"));
        observer.on_notification(&readiness(1, "block"));

        assert_eq!(rx.try_recv().unwrap().event(), Some("block"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn phase_names() {
        assert_eq!(Phase::WatchOnlyLogin.to_string(), "watch-only login");
        assert_eq!(Phase::SetWatchOnly.to_string(), "set watch-only");
    }
}
