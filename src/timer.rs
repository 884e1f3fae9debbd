//! One-shot timeout service
//!
//! Drives delayed schedule registration: a handle constructed with a
//! `{delay,…}` prefix hands the service an object that fires once at an
//! absolute instant. Objects whose deadline already passed fire
//! immediately. The service owns its spawned waits and aborts the ones
//! still pending on `shutdown`.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

/// Something that wants a callback at an absolute instant.
#[async_trait]
pub trait TimeoutObject: Send + Sync {
    /// Absolute instant at which to fire.
    fn end_time(&self) -> DateTime<Utc>;

    /// Invoked once when the instant arrives.
    async fn on_timeout(&self);
}

/// Fire-and-forget timeout scheduling.
#[derive(Debug, Default)]
pub struct TimerService {
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl TimerService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a timeout object. Fires immediately if its deadline is
    /// already in the past.
    pub fn add_timeout_object(&self, obj: Arc<dyn TimeoutObject>) {
        let handle = tokio::spawn(async move {
            if let Ok(wait) = (obj.end_time() - Utc::now()).to_std() {
                tokio::time::sleep(wait).await;
            }
            obj.on_timeout().await;
        });

        let mut pending = self.pending.lock().unwrap();
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }

    /// Number of waits not yet fired.
    pub fn pending_count(&self) -> usize {
        let mut pending = self.pending.lock().unwrap();
        pending.retain(|h| !h.is_finished());
        pending.len()
    }

    /// Abort every wait still pending.
    pub fn shutdown(&self) {
        let drained: Vec<JoinHandle<()>> = self.pending.lock().unwrap().drain(..).collect();
        for handle in drained {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct Probe {
        end_time: DateTime<Utc>,
        fired: AtomicU32,
    }

    impl Probe {
        fn at(end_time: DateTime<Utc>) -> Arc<Self> {
            Arc::new(Self {
                end_time,
                fired: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl TimeoutObject for Probe {
        fn end_time(&self) -> DateTime<Utc> {
            self.end_time
        }

        async fn on_timeout(&self) {
            self.fired.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn wait_for(probe: &Probe) {
        for _ in 0..200 {
            if probe.fired.load(Ordering::SeqCst) > 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timeout object never fired");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_deadline() {
        let timer = TimerService::new();
        let probe = Probe::at(Utc::now() + chrono::Duration::milliseconds(500));
        timer.add_timeout_object(probe.clone());

        wait_for(&probe).await;
        assert_eq!(probe.fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_past_deadline_fires_immediately() {
        let timer = TimerService::new();
        let probe = Probe::at(Utc::now() - chrono::Duration::seconds(30));
        timer.add_timeout_object(probe.clone());

        wait_for(&probe).await;
        assert_eq!(probe.fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_aborts_pending() {
        let timer = TimerService::new();
        let probe = Probe::at(Utc::now() + chrono::Duration::days(1));
        timer.add_timeout_object(probe.clone());
        assert_eq!(timer.pending_count(), 1);

        timer.shutdown();
        assert_eq!(timer.pending_count(), 0);

        // Give the aborted task a chance to (incorrectly) fire.
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(probe.fired.load(Ordering::SeqCst), 0);
    }
}
