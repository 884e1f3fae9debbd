//! Per-tick snapshots and the terminal wire format
//!
//! A [`ScheduleSnapshot`] is what listeners receive: the notifying
//! tick's `(result, error)` frozen at dispatch time, with every other
//! accessor reading through to the live handle (counters keep moving
//! under it). The same module carries the serialization contract: a
//! handle serializes as its terminal state and deserializes into a
//! frozen, already-done handle.

use chrono::{DateTime, Utc};
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::future::ScheduleFuture;
use crate::stats::ScheduleStatistics;
use crate::types::{Result, TickOutcome};

/// Immutable view of a handle with a fixed last outcome.
pub struct ScheduleSnapshot<R> {
    handle: ScheduleFuture<R>,
    outcome: TickOutcome<R>,
}

impl<R: Clone> Clone for ScheduleSnapshot<R> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            outcome: self.outcome.clone(),
        }
    }
}

impl<R: Clone + Send + Sync + 'static> ScheduleSnapshot<R> {
    pub(crate) fn new(handle: ScheduleFuture<R>, outcome: TickOutcome<R>) -> Self {
        Self { handle, outcome }
    }

    /// The frozen outcome of the tick this snapshot was taken for.
    pub fn last(&self) -> Result<Option<R>> {
        self.outcome.to_last()
    }

    /// The live handle behind this snapshot.
    pub fn handle(&self) -> &ScheduleFuture<R> {
        &self.handle
    }

    /// Await the next tick on the live handle.
    pub async fn get(&self) -> Result<Option<R>> {
        self.handle.get().await
    }

    /// Live execution count; may exceed the tick this snapshot froze.
    pub fn count(&self) -> u32 {
        self.handle.count()
    }

    pub fn is_done(&self) -> bool {
        self.handle.is_done()
    }

    pub fn is_cancelled(&self) -> bool {
        self.handle.is_cancelled()
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_running()
    }

    pub fn pattern(&self) -> Option<String> {
        self.handle.pattern().map(str::to_string)
    }

    pub fn create_time(&self) -> DateTime<Utc> {
        self.handle.create_time()
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.handle.start_time()
    }

    pub fn next_execution_times(&self, count: usize, start: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        self.handle.next_execution_times(count, start)
    }
}

/// Wire form of a terminal handle. Field order is the serialization
/// contract: cancelled, last result, last error, statistics, then the
/// two notification flags. The pattern, registration id, delay, call
/// bound and call counter do not cross the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalState<R> {
    pub cancelled: bool,
    pub last_res: Option<R>,
    pub last_err: Option<String>,
    pub stats: ScheduleStatistics,
    pub sync_notify: bool,
    pub concur_notify: bool,
}

impl<R> Serialize for ScheduleFuture<R>
where
    R: Serialize + Clone + Send + Sync + 'static,
{
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_terminal().serialize(serializer)
    }
}

impl<'de, R> Deserialize<'de> for ScheduleFuture<R>
where
    R: Deserialize<'de> + Clone + Send + Sync + 'static,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        TerminalState::deserialize(deserializer).map(ScheduleFuture::restore)
    }
}
