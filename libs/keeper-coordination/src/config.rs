//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default session timeout requested from the service.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(10);

/// Default upper bound on waiting for the session to become connected.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default cadence of the session monitor's timeout-heuristic check.
pub const DEFAULT_MONITOR_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Configuration for a [`crate::client::CoordinationClient`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server addresses of the backing coordination service.
    pub servers: Vec<String>,
    /// Session timeout requested at connect time. The service may
    /// negotiate a different value; the negotiated one governs expiry
    /// detection.
    pub session_timeout: Duration,
    /// How long `connect` waits for the session to reach `Connected`
    /// before giving up. `None` waits indefinitely.
    pub connect_timeout: Option<Duration>,
    /// Interval at which the session monitor re-checks the
    /// disconnect-timeout heuristic between state transitions.
    pub monitor_poll_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            monitor_poll_interval: DEFAULT_MONITOR_POLL_INTERVAL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert!(config.servers.is_empty());
        assert_eq!(config.session_timeout, DEFAULT_SESSION_TIMEOUT);
        assert_eq!(config.connect_timeout, Some(DEFAULT_CONNECT_TIMEOUT));
        assert_eq!(config.monitor_poll_interval, DEFAULT_MONITOR_POLL_INTERVAL);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"servers": ["10.0.0.1:2181"]}"#).expect("valid config");
        assert_eq!(config.servers, vec!["10.0.0.1:2181".to_string()]);
        assert_eq!(config.session_timeout, DEFAULT_SESSION_TIMEOUT);
    }
}
