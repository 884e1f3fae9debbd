//! Scheduler configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings shared by every handle a [`SchedulerContext`] constructs.
///
/// [`SchedulerContext`]: crate::context::SchedulerContext
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Deliver the one-shot catch-up notification on the registering
    /// caller's task instead of a worker task (default: true)
    #[serde(default = "default_sync_notify")]
    pub sync_notify: bool,

    /// Dispatch each listener on its own worker task per tick instead of
    /// one serial batch (default: false)
    #[serde(default)]
    pub concur_notify: bool,

    /// How often the cron engine scans for due registrations, in
    /// milliseconds (default: 1000)
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

fn default_sync_notify() -> bool {
    true
}

fn default_tick_interval_ms() -> u64 {
    1_000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sync_notify: default_sync_notify(),
            concur_notify: false,
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

impl SchedulerConfig {
    /// Engine scan cadence as a [`Duration`].
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SchedulerConfig::default();
        assert!(config.sync_notify);
        assert!(!config.concur_notify);
        assert_eq!(config.tick_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_partial_deserialization_fills_defaults() {
        let config: SchedulerConfig = serde_json::from_str(r#"{"concur_notify": true}"#).unwrap();
        assert!(config.sync_notify);
        assert!(config.concur_notify);
        assert_eq!(config.tick_interval_ms, 1_000);
    }
}
