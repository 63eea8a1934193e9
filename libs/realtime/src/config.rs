//! Runtime configuration for the realtime layer.

use std::env;
use std::time::Duration;

/// Tunables for the realtime layer. `Default` carries the production values;
/// tests override individual fields to keep timing-sensitive paths fast.
#[derive(Clone, Debug)]
pub struct RealtimeConfig {
    /// Gateway websocket endpoint, e.g. `wss://gateway.taskora.app/rt`.
    pub gateway_url: String,
    /// REST base, e.g. `https://api.taskora.app/api/v1`.
    pub rest_base_url: String,
    /// First reconnect delay; doubles on every failed attempt.
    pub reconnect_base_delay: Duration,
    /// Ceiling for the reconnect delay, jitter included.
    pub reconnect_max_delay: Duration,
    /// Consecutive failed connect attempts before giving up.
    pub reconnect_max_attempts: u32,
    /// How long a gateway write waits for its acknowledgment before the
    /// REST fallback takes over.
    pub ack_timeout: Duration,
    /// Total time a queued write keeps retrying before it is marked failed.
    pub retry_window: Duration,
    /// Pause between delivery attempts while the retry window is open.
    pub retry_interval: Duration,
    /// How long a toast stays eligible for display.
    pub toast_duration: Duration,
    /// Page size for notification feed fetches.
    pub notification_page_size: u32,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            gateway_url: "wss://gateway.taskora.app/rt".to_string(),
            rest_base_url: "https://api.taskora.app/api/v1".to_string(),
            reconnect_base_delay: Duration::from_millis(500),
            reconnect_max_delay: Duration::from_secs(30),
            reconnect_max_attempts: 5,
            ack_timeout: Duration::from_secs(5),
            retry_window: Duration::from_secs(60),
            retry_interval: Duration::from_secs(5),
            toast_duration: Duration::from_secs(5),
            notification_page_size: 25,
        }
    }
}

impl RealtimeConfig {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            gateway_url: required_var("TASKORA_GATEWAY_URL"),
            rest_base_url: required_var("TASKORA_API_URL"),
            reconnect_base_delay: millis_var(
                "TASKORA_RECONNECT_BASE_MS",
                defaults.reconnect_base_delay,
            ),
            reconnect_max_delay: millis_var("TASKORA_RECONNECT_MAX_MS", defaults.reconnect_max_delay),
            reconnect_max_attempts: env::var("TASKORA_RECONNECT_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.reconnect_max_attempts),
            ack_timeout: millis_var("TASKORA_ACK_TIMEOUT_MS", defaults.ack_timeout),
            retry_window: millis_var("TASKORA_RETRY_WINDOW_MS", defaults.retry_window),
            retry_interval: millis_var("TASKORA_RETRY_INTERVAL_MS", defaults.retry_interval),
            toast_duration: millis_var("TASKORA_TOAST_MS", defaults.toast_duration),
            notification_page_size: env::var("TASKORA_NOTIFICATION_PAGE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.notification_page_size),
        }
    }
}

fn required_var(name: &str) -> String {
    env::var(name).unwrap_or_else(|_| panic!("{name} must be set"))
}

fn millis_var(name: &str, default: Duration) -> Duration {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_backoff_is_bounded() {
        let config = RealtimeConfig::default();
        assert!(config.reconnect_base_delay < config.reconnect_max_delay);
        assert!(config.reconnect_max_attempts > 0);
    }

    #[test]
    fn retry_interval_fits_inside_window() {
        let config = RealtimeConfig::default();
        assert!(config.retry_interval < config.retry_window);
    }
}
