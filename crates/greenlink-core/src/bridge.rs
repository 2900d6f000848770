//! Delivery of backend notifications to the registered observer.
//!
//! The transport pushes messages into a [`NotificationSink`]; a dedicated
//! worker thread hands them to the observer one at a time, in the order they
//! were pushed, then bumps the shared [`NotificationCounter`]. Pushing never
//! waits on the observer, so a slow observer only delays later deliveries.
//!
//! Each connect opens a new epoch with its own sink. Closing the epoch (on
//! disconnect) stops the sink from accepting messages; whatever was already
//! queued is still delivered, followed by a final `on_closed` call.
//!
//! Observers run on the worker thread and must return promptly; a call that
//! takes longer than [`SLOW_OBSERVER`] is logged. [`NotificationBridge::shutdown`]
//! waits at most the bridge's shutdown timeout for the worker and detaches it
//! after that, so a stuck observer cannot hang teardown.
//!
//! # Example
//!
//! ```rust
//! use greenlink_core::bridge::NotificationBridge;
//! use greenlink_core::logging;
//! use greenlink_core::notification::{Notification, NotificationCounter};
//! use std::sync::Arc;
//!
//! let counter = Arc::new(NotificationCounter::new());
//! let bridge = NotificationBridge::new(Arc::clone(&counter), logging::disabled()).unwrap();
//!
//! let sink = bridge.open_epoch();
//! sink.push(Notification::payload("block", serde_json::json!({"block_height": 1}))).unwrap();
//!
//! counter.wait_for_at_least(1);
//! bridge.shutdown();
//! ```

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use thiserror::Error;

use crate::logging::{log_line, LogHandle};
use crate::notification::{Notification, NotificationCounter};

/// Default bound on how long [`NotificationBridge::shutdown`] waits for the worker.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Observer calls slower than this are reported.
pub const SLOW_OBSERVER: Duration = Duration::from_secs(1);

/// Receives notifications on the bridge's worker thread.
pub trait NotificationObserver: Send + Sync {
    fn on_notification(&self, notification: &Notification);

    /// Called once per epoch after its last queued notification.
    fn on_closed(&self, _epoch: u64) {}
}

impl<F> NotificationObserver for F
where
    F: Fn(&Notification) + Send + Sync,
{
    fn on_notification(&self, notification: &Notification) {
        self(notification)
    }
}

/// Forwards every notification into a channel.
///
/// A dropped receiver is not an error; the message is discarded.
pub struct ChannelObserver(Mutex<Sender<Notification>>);

impl ChannelObserver {
    pub fn new(sender: Sender<Notification>) -> Self {
        Self(Mutex::new(sender))
    }

    /// Create an observer together with the receiving end.
    pub fn channel() -> (Self, Receiver<Notification>) {
        let (tx, rx) = mpsc::channel();
        (Self::new(tx), rx)
    }
}

impl NotificationObserver for ChannelObserver {
    fn on_notification(&self, notification: &Notification) {
        let sender = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if sender.send(notification.clone()).is_err() {
            log::debug!("Observer channel closed, dropping notification {}", notification.seq);
        }
    }
}

/// Shared, replaceable observer slot.
pub type ObserverSlot = Arc<RwLock<Option<Arc<dyn NotificationObserver>>>>;

/// The sink's epoch has been closed.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("notification sink for epoch {0} is closed")]
pub struct SinkClosed(pub u64);

enum BridgeMessage {
    Notify(Notification),
    Closed(u64),
    Shutdown,
}

/// Transport-side handle for pushing notifications of one epoch.
#[derive(Clone)]
pub struct NotificationSink {
    epoch: u64,
    open: Arc<AtomicBool>,
    seq: Arc<AtomicU64>,
    tx: Sender<BridgeMessage>,
}

impl NotificationSink {
    /// Queue a message for delivery. Returns its sequence number.
    pub fn push(&self, payload: Map<String, Value>) -> Result<u64, SinkClosed> {
        if !self.is_open() {
            return Err(SinkClosed(self.epoch));
        }
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.tx
            .send(BridgeMessage::Notify(Notification::new(self.epoch, seq, payload)))
            .map_err(|_| SinkClosed(self.epoch))?;
        Ok(seq)
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for NotificationSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationSink")
            .field("epoch", &self.epoch)
            .field("open", &self.is_open())
            .finish()
    }
}

/// The running worker and a receiver that disconnects when it exits.
struct Worker {
    handle: JoinHandle<()>,
    done: Receiver<()>,
}

struct OpenEpoch {
    epoch: u64,
    open: Arc<AtomicBool>,
}

/// Bridges transport sinks to the observer through a worker thread.
pub struct NotificationBridge {
    tx: Sender<BridgeMessage>,
    observer: ObserverSlot,
    counter: Arc<NotificationCounter>,
    current: Mutex<Option<OpenEpoch>>,
    last_epoch: AtomicU64,
    seq: Arc<AtomicU64>,
    worker: Mutex<Option<Worker>>,
    shutdown_timeout: Duration,
}

impl NotificationBridge {
    /// Start the delivery worker.
    pub fn new(counter: Arc<NotificationCounter>, transcript: LogHandle) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel();
        let observer: ObserverSlot = Arc::new(RwLock::new(None));

        let (done_tx, done) = mpsc::channel::<()>();
        let handle = {
            let observer = Arc::clone(&observer);
            let counter = Arc::clone(&counter);
            thread::Builder::new()
                .name("greenlink-notify".to_string())
                .spawn(move || {
                    // Dropped on exit, including unwinding.
                    let _done = done_tx;
                    run_worker(rx, observer, counter, transcript)
                })?
        };

        Ok(Self {
            tx,
            observer,
            counter,
            current: Mutex::new(None),
            last_epoch: AtomicU64::new(0),
            seq: Arc::new(AtomicU64::new(0)),
            worker: Mutex::new(Some(Worker { handle, done })),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        })
    }

    /// Bound how long [`shutdown`](Self::shutdown) waits for the worker.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    /// Install `observer`, or clear the slot with `None`. Returns the previous one.
    pub fn set_observer(
        &self,
        observer: Option<Arc<dyn NotificationObserver>>,
    ) -> Option<Arc<dyn NotificationObserver>> {
        let mut slot = self.observer.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *slot, observer)
    }

    pub fn has_observer(&self) -> bool {
        self.observer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn counter(&self) -> &Arc<NotificationCounter> {
        &self.counter
    }

    /// Start a new epoch and return its sink. Any epoch still open is closed first.
    pub fn open_epoch(&self) -> NotificationSink {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = current.take() {
            self.close(previous);
        }

        let epoch = self.last_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let open = Arc::new(AtomicBool::new(true));
        *current = Some(OpenEpoch {
            epoch,
            open: Arc::clone(&open),
        });
        log::debug!("Opened notification epoch {}", epoch);

        NotificationSink {
            epoch,
            open,
            seq: Arc::clone(&self.seq),
            tx: self.tx.clone(),
        }
    }

    /// Close the open epoch, if any. Returns the epoch that was closed.
    pub fn close_epoch(&self) -> Option<u64> {
        let previous = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        previous.map(|open| {
            let epoch = open.epoch;
            self.close(open);
            epoch
        })
    }

    fn close(&self, open: OpenEpoch) {
        open.open.store(false, Ordering::SeqCst);
        if self.tx.send(BridgeMessage::Closed(open.epoch)).is_err() {
            log::debug!("Bridge worker gone while closing epoch {}", open.epoch);
        }
    }

    /// The most recently opened epoch (0 before the first connect).
    pub fn epoch(&self) -> u64 {
        self.last_epoch.load(Ordering::SeqCst)
    }

    /// Whether an epoch is currently accepting notifications.
    pub fn is_open(&self) -> bool {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Close any open epoch, drain queued messages and stop the worker.
    ///
    /// Safe to call more than once. Called from an observer callback, the
    /// worker is told to stop but not joined. If the worker has not finished
    /// within the shutdown timeout (an observer is stuck), it is detached and
    /// exits on its own once the observer returns.
    pub fn shutdown(&self) {
        self.close_epoch();
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(worker) = worker else {
            return;
        };

        if self.tx.send(BridgeMessage::Shutdown).is_err() {
            log::debug!("Bridge worker already gone at shutdown");
        }
        if worker.handle.thread().id() == thread::current().id() {
            return;
        }

        match worker.done.recv_timeout(self.shutdown_timeout) {
            Err(mpsc::RecvTimeoutError::Timeout) => {
                log::warn!(
                    "Notification worker still busy after {:?}, detaching it",
                    self.shutdown_timeout
                );
            }
            _ => {
                if worker.handle.join().is_err() {
                    log::warn!("Notification worker panicked");
                }
            }
        }
    }
}

impl Drop for NotificationBridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(
    rx: Receiver<BridgeMessage>,
    observer: ObserverSlot,
    counter: Arc<NotificationCounter>,
    transcript: LogHandle,
) {
    let current_observer = || {
        observer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    };

    // Highest epoch whose close has been processed.
    let mut closed_through = 0u64;

    while let Ok(message) = rx.recv() {
        match message {
            BridgeMessage::Notify(notification) => {
                if notification.epoch <= closed_through {
                    log::debug!(
                        "Dropping notification {} from closed epoch {}",
                        notification.seq,
                        notification.epoch
                    );
                    continue;
                }

                if let Some(observer) = current_observer() {
                    let started = Instant::now();
                    let delivered =
                        catch_unwind(AssertUnwindSafe(|| observer.on_notification(&notification)));
                    if delivered.is_err() {
                        log::warn!("Observer panicked on notification {}", notification.seq);
                    }
                    let elapsed = started.elapsed();
                    if elapsed > SLOW_OBSERVER {
                        log::warn!(
                            "Observer took {:?} on notification {}, later deliveries waited",
                            elapsed,
                            notification.seq
                        );
                    }
                }

                match counter.increment_for_epoch(notification.epoch) {
                    Some(count) => log::debug!(
                        "Delivered {} (epoch {}, seq {}, count {})",
                        notification.event().unwrap_or("<untyped>"),
                        notification.epoch,
                        notification.seq,
                        count
                    ),
                    None => log::debug!(
                        "Delivered {} from epoch {} after a counter reset, not counted",
                        notification.event().unwrap_or("<untyped>"),
                        notification.epoch
                    ),
                }
                match serde_json::to_string(&notification.payload) {
                    Ok(line) => log_line(&transcript, "NOTIFY", &line),
                    Err(e) => log::warn!("Failed to serialize notification: {}", e),
                }
            }
            BridgeMessage::Closed(epoch) => {
                closed_through = closed_through.max(epoch);
                if let Some(observer) = current_observer() {
                    if catch_unwind(AssertUnwindSafe(|| observer.on_closed(epoch))).is_err() {
                        log::warn!("Observer panicked closing epoch {}", epoch);
                    }
                }
                log_line(&transcript, "CLOSED", &format!("epoch {}", epoch));
            }
            BridgeMessage::Shutdown => break,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
