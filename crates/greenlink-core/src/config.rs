//! Session configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::bridge::DEFAULT_SHUTDOWN_TIMEOUT;
use crate::notification::{DEFAULT_POLL_INTERVAL, MIN_POLL_INTERVAL};

/// Default user agent reported to the backend at login.
pub const DEFAULT_USER_AGENT: &str = concat!("greenlink/", env!("CARGO_PKG_VERSION"));

/// Configuration for a [`SessionManager`](crate::SessionManager).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How often counter waits re-check their condition.
    pub poll_interval: Duration,
    /// Directory for per-session transcript files; `None` disables them.
    pub transcript_dir: Option<PathBuf>,
    pub user_agent: String,
    /// How long destroy waits for the notification worker before detaching it.
    pub shutdown_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            transcript_dir: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the counter poll interval. Zero is raised to one millisecond.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(MIN_POLL_INTERVAL);
        self
    }

    pub fn transcript_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.transcript_dir = Some(dir.into());
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = agent.into();
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.poll_interval, DEFAULT_POLL_INTERVAL);
        assert!(config.transcript_dir.is_none());
        assert!(config.user_agent.starts_with("greenlink/"));
        assert_eq!(config.shutdown_timeout, DEFAULT_SHUTDOWN_TIMEOUT);
    }

    #[test]
    fn builder_setters() {
        let config = SessionConfig::new()
            .poll_interval(Duration::from_millis(250))
            .transcript_dir("/tmp/greenlink")
            .user_agent("smoke")
            .shutdown_timeout(Duration::from_millis(500));
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.transcript_dir, Some(PathBuf::from("/tmp/greenlink")));
        assert_eq!(config.user_agent, "smoke");
        assert_eq!(config.shutdown_timeout, Duration::from_millis(500));
    }

    #[test]
    fn zero_poll_interval_is_clamped() {
        let config = SessionConfig::new().poll_interval(Duration::ZERO);
        assert_eq!(config.poll_interval, Duration::from_millis(1));
    }
}
