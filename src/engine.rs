//! Shared cron engine
//!
//! Owns every registered `(expression, callback)` pair and fires the
//! callbacks whose next matching instant has arrived. A background
//! ticker started with [`CronEngine::start`] drives [`CronEngine::fire_due`]
//! at the configured cadence; callers that want deterministic firing
//! (tests, embedders with their own clock) can call `fire_due` directly.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tokio::sync::RwLock;
use tokio::time::interval;
use uuid::Uuid;

use crate::expression::CronExpression;
use crate::types::{Result, ScheduleError};

/// Callback registered for one cron expression. Each firing gets its own
/// spawned task.
pub type TickCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

struct EngineEntry {
    expr: CronExpression,
    next_fire: DateTime<Utc>,
    callback: TickCallback,
}

/// Cron registration and firing.
#[derive(Clone)]
pub struct CronEngine {
    entries: Arc<RwLock<HashMap<String, EngineEntry>>>,
    running: Arc<RwLock<bool>>,
    tick_interval: std::time::Duration,
}

impl CronEngine {
    pub fn new(tick_interval: std::time::Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            running: Arc::new(RwLock::new(false)),
            tick_interval,
        }
    }

    /// Validate a bare cron expression.
    pub fn validate(&self, cron: &str) -> bool {
        CronExpression::is_valid(cron)
    }

    /// Register a callback under a cron expression. Returns the
    /// registration id.
    pub async fn schedule(&self, cron: &str, callback: TickCallback) -> Result<String> {
        let expr = CronExpression::parse(cron)?;
        let next_fire = expr.next_after(Utc::now()).ok_or_else(|| {
            ScheduleError::invalid_pattern(cron, "expression never matches a future instant")
        })?;

        let id = Uuid::new_v4().to_string();
        let entry = EngineEntry {
            expr,
            next_fire,
            callback,
        };
        self.entries.write().await.insert(id.clone(), entry);

        tracing::info!(%id, %cron, "cron callback registered");
        Ok(id)
    }

    /// Drop a registration. Unknown ids are ignored.
    pub async fn deschedule(&self, id: &str) {
        if self.entries.write().await.remove(id).is_some() {
            tracing::info!(%id, "cron callback descheduled");
        } else {
            tracing::debug!(%id, "deschedule of unknown id ignored");
        }
    }

    /// Whether `id` is currently registered.
    pub async fn is_scheduled(&self, id: &str) -> bool {
        self.entries.read().await.contains_key(id)
    }

    /// Number of live registrations.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Fire every registration due at `now` and advance it to its next
    /// matching instant. Each callback runs on its own spawned task.
    /// Returns how many fired.
    pub async fn fire_due(&self, now: DateTime<Utc>) -> usize {
        let mut due: Vec<TickCallback> = Vec::new();
        {
            let mut entries = self.entries.write().await;
            let mut exhausted: Vec<String> = Vec::new();

            for (id, entry) in entries.iter_mut() {
                if entry.next_fire > now {
                    continue;
                }
                due.push(entry.callback.clone());
                match entry.expr.next_after(now) {
                    Some(next) => entry.next_fire = next,
                    None => {
                        tracing::warn!(%id, "cron expression has no further match; dropping");
                        exhausted.push(id.clone());
                    }
                }
            }

            for id in exhausted {
                entries.remove(&id);
            }
        }

        let fired = due.len();
        for callback in due {
            tokio::spawn(callback());
        }
        fired
    }

    /// Start the background ticker. Idempotent.
    pub async fn start(&self) {
        {
            let mut running = self.running.write().await;
            if *running {
                return;
            }
            *running = true;
        }

        tracing::info!("cron engine started");

        let engine = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(engine.tick_interval);
            loop {
                ticker.tick().await;
                if !*engine.running.read().await {
                    break;
                }
                engine.fire_due(Utc::now()).await;
            }
            tracing::info!("cron engine stopped");
        });
    }

    /// Stop the background ticker. Registrations stay in place.
    pub async fn stop(&self) {
        *self.running.write().await = false;
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting_callback() -> (TickCallback, Arc<AtomicU32>) {
        let count = Arc::new(AtomicU32::new(0));
        let counter = count.clone();
        let callback: TickCallback = Arc::new(move || {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        });
        (callback, count)
    }

    async fn settle(count: &AtomicU32, expected: u32) {
        for _ in 0..200 {
            if count.load(Ordering::SeqCst) == expected {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
        panic!(
            "callback count never reached {expected}, got {}",
            count.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn test_validate() {
        let engine = CronEngine::new(std::time::Duration::from_secs(1));
        assert!(engine.validate("*/5 * * * *"));
        assert!(!engine.validate("bogus"));
    }

    #[tokio::test]
    async fn test_schedule_rejects_invalid_expression() {
        let engine = CronEngine::new(std::time::Duration::from_secs(1));
        let (callback, _) = counting_callback();
        assert!(engine.schedule("61 * * * *", callback).await.is_err());
    }

    #[tokio::test]
    async fn test_fire_due_runs_and_advances() {
        let engine = CronEngine::new(std::time::Duration::from_secs(1));
        let (callback, count) = counting_callback();
        let id = engine.schedule("* * * * *", callback).await.unwrap();
        assert!(engine.is_scheduled(&id).await);

        let now = Utc::now();
        assert_eq!(engine.fire_due(now + Duration::minutes(2)).await, 1);
        settle(&count, 1).await;

        // Not due again at the same instant.
        assert_eq!(engine.fire_due(now + Duration::minutes(2)).await, 0);

        // Due again one cron period later.
        assert_eq!(engine.fire_due(now + Duration::minutes(4)).await, 1);
        settle(&count, 2).await;
    }

    #[tokio::test]
    async fn test_not_due_before_next_match() {
        let engine = CronEngine::new(std::time::Duration::from_secs(1));
        let (callback, count) = counting_callback();
        engine.schedule("* * * * *", callback).await.unwrap();

        assert_eq!(engine.fire_due(Utc::now() - Duration::minutes(5)).await, 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_deschedule_stops_firing() {
        let engine = CronEngine::new(std::time::Duration::from_secs(1));
        let (callback, count) = counting_callback();
        let id = engine.schedule("* * * * *", callback).await.unwrap();

        engine.deschedule(&id).await;
        assert!(!engine.is_scheduled(&id).await);
        assert!(engine.is_empty().await);

        assert_eq!(engine.fire_due(Utc::now() + Duration::minutes(2)).await, 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);

        // Unknown id: no-op.
        engine.deschedule(&id).await;
    }

    #[tokio::test]
    async fn test_start_stop_flags() {
        let engine = CronEngine::new(std::time::Duration::from_millis(10));
        assert!(!engine.is_running().await);

        engine.start().await;
        assert!(engine.is_running().await);
        engine.start().await; // idempotent

        engine.stop().await;
        assert!(!engine.is_running().await);
    }
}
