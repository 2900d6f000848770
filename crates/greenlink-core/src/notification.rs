//! Notifications pushed by the backend and the counter callers wait on.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Notify;

/// Events that tell the caller the session can serve queries.
pub const READINESS_EVENTS: [&str; 3] = ["subaccount", "fees", "block"];

/// Default interval for [`NotificationCounter::wait_for_at_least`] re-checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A delivered notification.
///
/// `payload` is the message exactly as the backend produced it, conventionally
/// `{"event": <name>, <name>: <body>}`. The remaining fields are stamped by the
/// bridge when the message is queued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Connection epoch the message arrived on.
    pub epoch: u64,
    /// Per-manager sequence number, 1-indexed, in transport order.
    pub seq: u64,
    pub received_at: DateTime<Utc>,
    pub payload: Map<String, Value>,
}

impl Notification {
    pub fn new(epoch: u64, seq: u64, payload: Map<String, Value>) -> Self {
        Self {
            epoch,
            seq,
            received_at: Utc::now(),
            payload,
        }
    }

    /// Build a payload in the backend's `{"event": name, name: body}` shape.
    pub fn payload(event: &str, body: Value) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("event".to_string(), Value::String(event.to_string()));
        map.insert(event.to_string(), body);
        map
    }

    pub fn event(&self) -> Option<&str> {
        self.payload.get("event").and_then(Value::as_str)
    }

    /// The body stored under the event's own name, if any.
    pub fn body(&self) -> Option<&Value> {
        self.event().and_then(|name| self.payload.get(name))
    }

    pub fn is_readiness(&self) -> bool {
        self.event()
            .map(|name| READINESS_EVENTS.contains(&name))
            .unwrap_or(false)
    }
}

/// Smallest poll interval a counter accepts.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Default)]
struct Tally {
    count: u64,
    /// Deliveries from epochs below this are not counted.
    min_epoch: u64,
}

/// Counts dispatched notifications so callers can wait for "at least N".
///
/// Shared between the delivery worker (which increments) and any number of
/// waiters. The value only goes down through [`reset`](Self::reset) or
/// [`reset_from_epoch`](Self::reset_from_epoch).
#[derive(Debug)]
pub struct NotificationCounter {
    tally: Mutex<Tally>,
    changed: Condvar,
    notify: Notify,
    poll_interval: Duration,
}

impl NotificationCounter {
    pub fn new() -> Self {
        Self::with_poll_interval(DEFAULT_POLL_INTERVAL)
    }

    /// Counter whose blocking waits re-check every `poll_interval`, raised to
    /// at least [`MIN_POLL_INTERVAL`].
    pub fn with_poll_interval(poll_interval: Duration) -> Self {
        Self {
            tally: Mutex::new(Tally::default()),
            changed: Condvar::new(),
            notify: Notify::new(),
            poll_interval: poll_interval.max(MIN_POLL_INTERVAL),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Tally> {
        // A panic while holding the guard cannot leave a half-written tally.
        self.tally.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wake(&self) {
        self.changed.notify_all();
        self.notify.notify_waiters();
    }

    /// Record one delivery and wake waiters. Returns the new value.
    pub fn increment(&self) -> u64 {
        let value = {
            let mut tally = self.lock();
            tally.count += 1;
            tally.count
        };
        self.wake();
        value
    }

    /// Record one delivery from `epoch`. Returns the new value, or `None` when
    /// the epoch predates the last [`reset_from_epoch`](Self::reset_from_epoch).
    pub fn increment_for_epoch(&self, epoch: u64) -> Option<u64> {
        let value = {
            let mut tally = self.lock();
            if epoch < tally.min_epoch {
                return None;
            }
            tally.count += 1;
            tally.count
        };
        self.wake();
        Some(value)
    }

    pub fn get(&self) -> u64 {
        self.lock().count
    }

    /// Set the counter back to zero. Returns the value it had.
    pub fn reset(&self) -> u64 {
        std::mem::take(&mut self.lock().count)
    }

    /// Set the counter back to zero and stop counting deliveries from epochs
    /// before `min_epoch`, including ones still queued. Returns the old value.
    pub fn reset_from_epoch(&self, min_epoch: u64) -> u64 {
        let mut tally = self.lock();
        tally.min_epoch = tally.min_epoch.max(min_epoch);
        std::mem::take(&mut tally.count)
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Block until at least `n` notifications have been counted.
    ///
    /// Re-checks at least once per poll interval and has no timeout of its
    /// own; wrap it if the wait must be bounded. Returns the observed value.
    pub fn wait_for_at_least(&self, n: u64) -> u64 {
        let mut tally = self.lock();
        while tally.count < n {
            tally = match self.changed.wait_timeout(tally, self.poll_interval) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        tally.count
    }

    /// Async form of [`wait_for_at_least`](Self::wait_for_at_least).
    ///
    /// Cancel-safe, so it can be raced against `tokio::time::timeout`.
    pub async fn wait_for_at_least_async(&self, n: u64) -> u64 {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so an increment in between is not lost.
            notified.as_mut().enable();

            let current = self.get();
            if current >= n {
                return current;
            }
            notified.await;
        }
    }
}

impl Default for NotificationCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::thread;

    mod notification {
        use super::*;

        #[test]
        fn payload_uses_event_shape() {
            let payload = Notification::payload("block", json!({"block_height": 101}));
            assert_eq!(payload["event"], "block");
            assert_eq!(payload["block"]["block_height"], 101);
        }

        #[test]
        fn event_and_body_accessors() {
            let n = Notification::new(1, 1, Notification::payload("fees", json!([1000, 2000])));
            assert_eq!(n.event(), Some("fees"));
            assert_eq!(n.body(), Some(&json!([1000, 2000])));
        }

        #[test]
        fn readiness_classification() {
            for event in ["subaccount", "fees", "block"] {
                let n = Notification::new(1, 1, Notification::payload(event, json!({})));
                assert!(n.is_readiness(), "{event} should be readiness");
            }
            let reset = Notification::new(1, 1, Notification::payload("twofactor_reset", json!({})));
            assert!(!reset.is_readiness());
        }

        #[test]
        fn missing_event_key_is_not_readiness() {
            let n = Notification::new(1, 1, Map::new());
            assert_eq!(n.event(), None);
            assert_eq!(n.body(), None);
            assert!(!n.is_readiness());
        }
    }

    mod counter {
        use super::*;

        #[test]
        fn starts_at_zero_and_increments() {
            let counter = NotificationCounter::new();
            assert_eq!(counter.get(), 0);
            assert_eq!(counter.increment(), 1);
            assert_eq!(counter.increment(), 2);
            assert_eq!(counter.get(), 2);
        }

        #[test]
        fn reset_returns_previous_value() {
            let counter = NotificationCounter::new();
            counter.increment();
            counter.increment();
            assert_eq!(counter.reset(), 2);
            assert_eq!(counter.get(), 0);
        }

        #[test]
        fn reset_from_epoch_ignores_older_epochs() {
            let counter = NotificationCounter::new();
            assert_eq!(counter.increment_for_epoch(1), Some(1));
            assert_eq!(counter.reset_from_epoch(2), 1);

            // Still queued from the closed epoch.
            assert_eq!(counter.increment_for_epoch(1), None);
            assert_eq!(counter.get(), 0);

            assert_eq!(counter.increment_for_epoch(2), Some(1));
            assert_eq!(counter.increment_for_epoch(3), Some(2));
        }

        #[test]
        fn epoch_floor_never_moves_back() {
            let counter = NotificationCounter::new();
            counter.reset_from_epoch(3);
            counter.reset_from_epoch(1);
            assert_eq!(counter.increment_for_epoch(2), None);
            assert_eq!(counter.increment_for_epoch(3), Some(1));
        }

        #[test]
        fn plain_reset_keeps_epoch_floor() {
            let counter = NotificationCounter::new();
            counter.reset_from_epoch(2);
            counter.reset();
            assert_eq!(counter.increment_for_epoch(1), None);
        }

        #[test]
        fn zero_poll_interval_is_clamped() {
            let counter = NotificationCounter::with_poll_interval(Duration::ZERO);
            assert_eq!(counter.poll_interval(), MIN_POLL_INTERVAL);
        }

        #[test]
        fn wait_returns_immediately_when_satisfied() {
            let counter = NotificationCounter::new();
            counter.increment();
            assert_eq!(counter.wait_for_at_least(1), 1);
            assert_eq!(counter.wait_for_at_least(0), 1);
        }

        #[test]
        fn wait_unblocks_on_increment_from_other_thread() {
            let counter = Arc::new(NotificationCounter::with_poll_interval(
                Duration::from_millis(10),
            ));
            let producer = Arc::clone(&counter);
            let handle = thread::spawn(move || {
                for _ in 0..5 {
                    thread::sleep(Duration::from_millis(5));
                    producer.increment();
                }
            });

            assert!(counter.wait_for_at_least(5) >= 5);
            handle.join().unwrap();
        }

        #[test]
        fn concurrent_readers_see_monotonic_values() {
            let counter = Arc::new(NotificationCounter::new());
            let writer = {
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..2000 {
                        counter.increment();
                    }
                })
            };
            let readers: Vec<_> = (0..4)
                .map(|_| {
                    let counter = Arc::clone(&counter);
                    thread::spawn(move || {
                        let mut last = 0;
                        for _ in 0..2000 {
                            let value = counter.get();
                            assert!(value >= last, "counter went from {last} to {value}");
                            last = value;
                        }
                    })
                })
                .collect();

            writer.join().unwrap();
            for reader in readers {
                reader.join().unwrap();
            }
            assert_eq!(counter.get(), 2000);
        }

        #[tokio::test]
        async fn async_wait_completes_after_increments() {
            let counter = Arc::new(NotificationCounter::new());
            let producer = Arc::clone(&counter);
            let handle = thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                producer.increment();
                producer.increment();
            });

            let seen = tokio::time::timeout(
                Duration::from_secs(5),
                counter.wait_for_at_least_async(2),
            )
            .await
            .expect("wait timed out");
            assert!(seen >= 2);
            handle.join().unwrap();
        }

        #[tokio::test]
        async fn async_wait_can_be_bounded_by_caller() {
            let counter = NotificationCounter::new();
            let result = tokio::time::timeout(
                Duration::from_millis(30),
                counter.wait_for_at_least_async(1),
            )
            .await;
            assert!(result.is_err());
        }
    }
}
