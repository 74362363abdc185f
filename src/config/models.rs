use crate::humanize::HumanDuration;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
}

/// Coordinator connection configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CoordinatorConfig {
    #[serde(default = "default_url")]
    pub url: String,
    /// Authorization credential (loaded from environment, never from config file)
    #[serde(skip)]
    pub auth_token: Option<String>,
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout: HumanDuration,
    /// Pause between liveness checks while the socket is down
    #[serde(default = "default_liveness_backoff")]
    pub liveness_backoff: HumanDuration,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            auth_token: None,
            handshake_timeout: default_handshake_timeout(),
            liveness_backoff: default_liveness_backoff(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

fn default_url() -> String {
    "ws://localhost:8080/ws/worker".to_string()
}

fn default_handshake_timeout() -> HumanDuration {
    HumanDuration::from_secs(10)
}

fn default_liveness_backoff() -> HumanDuration {
    HumanDuration::from_secs(2)
}

/// Exponential reconnect backoff
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_min_interval")]
    pub min_interval: HumanDuration,
    #[serde(default = "default_max_interval")]
    pub max_interval: HumanDuration,
    #[serde(default = "default_factor")]
    pub factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            min_interval: default_min_interval(),
            max_interval: default_max_interval(),
            factor: default_factor(),
        }
    }
}

impl ReconnectConfig {
    /// Delay before reconnect attempt `attempt` (0-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let min = self.min_interval.as_duration().as_secs_f64();
        let max = self.max_interval.as_duration().as_secs_f64();
        let delay = min * self.factor.powi(attempt.min(i32::MAX as u32) as i32);
        Duration::from_secs_f64(delay.min(max))
    }
}

fn default_min_interval() -> HumanDuration {
    HumanDuration::from_secs(2)
}

fn default_max_interval() -> HumanDuration {
    HumanDuration::from_secs(30)
}

fn default_factor() -> f64 {
    1.5
}

/// Local worker pool configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkersConfig {
    #[serde(default = "default_count")]
    pub count: usize,
    #[serde(default = "default_dispatch_capacity")]
    pub dispatch_capacity: usize,
    /// How long an idle worker waits before re-polling the backlog
    #[serde(default = "default_poll_interval")]
    pub poll_interval: HumanDuration,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            count: default_count(),
            dispatch_capacity: default_dispatch_capacity(),
            poll_interval: default_poll_interval(),
        }
    }
}

fn default_count() -> usize {
    4
}

fn default_dispatch_capacity() -> usize {
    100
}

fn default_poll_interval() -> HumanDuration {
    HumanDuration::from_millis(100)
}
