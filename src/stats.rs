//! Per-handle execution statistics
//!
//! Mutated only by the tick runner while it holds the handle mutex;
//! reads go through the handle accessors, which also lock. Idle time is
//! measured from creation to the first start, then between each tick's
//! end and the next tick's start.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Counters and timings for one scheduled-task handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleStatistics {
    create_time: DateTime<Utc>,
    last_start_time: Option<DateTime<Utc>>,
    last_end_time: Option<DateTime<Utc>>,
    execution_count: u32,
    last_execution_ms: u64,
    last_idle_ms: u64,
    total_execution_ms: u64,
    total_idle_ms: u64,
    running: bool,
}

impl ScheduleStatistics {
    pub(crate) fn new() -> Self {
        Self::created_at(Utc::now())
    }

    fn created_at(create_time: DateTime<Utc>) -> Self {
        Self {
            create_time,
            last_start_time: None,
            last_end_time: None,
            execution_count: 0,
            last_execution_ms: 0,
            last_idle_ms: 0,
            total_execution_ms: 0,
            total_idle_ms: 0,
            running: false,
        }
    }

    pub(crate) fn on_start(&mut self) {
        self.on_start_at(Utc::now());
    }

    pub(crate) fn on_end(&mut self) {
        self.on_end_at(Utc::now());
    }

    fn on_start_at(&mut self, now: DateTime<Utc>) {
        let idle_since = self.last_end_time.unwrap_or(self.create_time);
        let idle = millis_between(idle_since, now);
        self.last_idle_ms = idle;
        self.total_idle_ms += idle;
        self.last_start_time = Some(now);
        self.running = true;
    }

    fn on_end_at(&mut self, now: DateTime<Utc>) {
        let started = self.last_start_time.unwrap_or(now);
        let exec = millis_between(started, now);
        self.last_execution_ms = exec;
        self.total_execution_ms += exec;
        self.last_end_time = Some(now);
        self.execution_count += 1;
        self.running = false;
    }

    /// Instant the handle was constructed.
    pub fn create_time(&self) -> DateTime<Utc> {
        self.create_time
    }

    /// Start of the most recent tick, if any tick has started.
    pub fn last_start_time(&self) -> Option<DateTime<Utc>> {
        self.last_start_time
    }

    /// End of the most recent tick, if any tick has completed.
    pub fn last_end_time(&self) -> Option<DateTime<Utc>> {
        self.last_end_time
    }

    /// Number of completed ticks.
    pub fn execution_count(&self) -> u32 {
        self.execution_count
    }

    /// True between a tick's start and its end.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Duration of the most recent completed tick.
    pub fn last_execution_ms(&self) -> u64 {
        self.last_execution_ms
    }

    /// Idle gap preceding the most recent tick.
    pub fn last_idle_ms(&self) -> u64 {
        self.last_idle_ms
    }

    /// Total time spent inside ticks.
    pub fn total_execution_ms(&self) -> u64 {
        self.total_execution_ms
    }

    /// Total time spent between ticks (and before the first one).
    pub fn total_idle_ms(&self) -> u64 {
        self.total_idle_ms
    }

    /// Mean tick duration over completed ticks; 0 before the first.
    pub fn average_execution_ms(&self) -> f64 {
        if self.execution_count == 0 {
            0.0
        } else {
            self.total_execution_ms as f64 / self.execution_count as f64
        }
    }

    /// Mean idle gap over completed ticks; 0 before the first.
    pub fn average_idle_ms(&self) -> f64 {
        if self.execution_count == 0 {
            0.0
        } else {
            self.total_idle_ms as f64 / self.execution_count as f64
        }
    }

    /// Wall-clock footprint of the schedule so far: execution plus idle.
    pub fn duration_ms(&self) -> u64 {
        self.total_execution_ms + self.total_idle_ms
    }
}

fn millis_between(from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    (to - from).num_milliseconds().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap() + chrono::Duration::seconds(secs as i64)
    }

    #[test]
    fn test_first_tick_accounting() {
        let mut stats = ScheduleStatistics::created_at(at(0));
        stats.on_start_at(at(10));
        assert!(stats.is_running());
        assert_eq!(stats.last_idle_ms(), 10_000);

        stats.on_end_at(at(13));
        assert!(!stats.is_running());
        assert_eq!(stats.execution_count(), 1);
        assert_eq!(stats.last_execution_ms(), 3_000);
        assert_eq!(stats.total_execution_ms(), 3_000);
        assert_eq!(stats.total_idle_ms(), 10_000);
        assert_eq!(stats.last_start_time(), Some(at(10)));
        assert_eq!(stats.last_end_time(), Some(at(13)));
    }

    #[test]
    fn test_idle_measured_between_ticks() {
        let mut stats = ScheduleStatistics::created_at(at(0));
        stats.on_start_at(at(5));
        stats.on_end_at(at(6));
        stats.on_start_at(at(20));
        stats.on_end_at(at(23));

        assert_eq!(stats.execution_count(), 2);
        assert_eq!(stats.last_idle_ms(), 14_000);
        assert_eq!(stats.total_idle_ms(), 19_000);
        assert_eq!(stats.total_execution_ms(), 4_000);
    }

    #[test]
    fn test_averages() {
        let mut stats = ScheduleStatistics::created_at(at(0));
        assert_eq!(stats.average_execution_ms(), 0.0);
        assert_eq!(stats.average_idle_ms(), 0.0);

        stats.on_start_at(at(2));
        stats.on_end_at(at(4));
        stats.on_start_at(at(8));
        stats.on_end_at(at(12));

        assert_eq!(stats.average_execution_ms(), 3_000.0);
        assert_eq!(stats.average_idle_ms(), 3_000.0);
        assert_eq!(stats.duration_ms(), 12_000);
    }

    #[test]
    fn test_serde_round_trip() {
        let mut stats = ScheduleStatistics::created_at(at(0));
        stats.on_start_at(at(1));
        stats.on_end_at(at(2));

        let json = serde_json::to_string(&stats).unwrap();
        let back: ScheduleStatistics = serde_json::from_str(&json).unwrap();
        assert_eq!(back.execution_count(), 1);
        assert_eq!(back.last_execution_ms(), 1_000);
        assert_eq!(back.create_time(), stats.create_time());
    }
}
