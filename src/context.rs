//! Scheduler context
//!
//! Bundles the collaborators every handle needs — the cron engine, the
//! timeout service, the registry hooks and the configuration — behind
//! one cheaply cloneable value, and is the construction entry point for
//! scheduled-task futures.

use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;

use crate::config::SchedulerConfig;
use crate::engine::CronEngine;
use crate::future::{ScheduleFuture, TaskFn};
use crate::pattern::SchedulePattern;
use crate::registry::{ActiveScheduleSet, ScheduleRegistry};
use crate::timer::TimerService;
use crate::types::Result;

struct ContextInner {
    config: SchedulerConfig,
    engine: CronEngine,
    timer: TimerService,
    registry: Arc<dyn ScheduleRegistry>,
}

/// Shared scheduling environment.
pub struct SchedulerContext {
    inner: Arc<ContextInner>,
}

impl Clone for SchedulerContext {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl Default for SchedulerContext {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl SchedulerContext {
    /// Create a context with the default registry.
    pub fn new(config: SchedulerConfig) -> Self {
        Self::with_registry(config, Arc::new(ActiveScheduleSet::new()))
    }

    /// Create a context with custom registry hooks.
    pub fn with_registry(config: SchedulerConfig, registry: Arc<dyn ScheduleRegistry>) -> Self {
        let engine = CronEngine::new(config.tick_interval());
        Self {
            inner: Arc::new(ContextInner {
                config,
                engine,
                timer: TimerService::new(),
                registry,
            }),
        }
    }

    /// Schedule `task` under an extended cron pattern and return the
    /// handle. Fails only on an invalid pattern; the handle is live (or
    /// pending its start delay) on return.
    pub async fn schedule<R, T, F>(&self, pattern: &str, task: T) -> Result<ScheduleFuture<R>>
    where
        R: Clone + Send + Sync + 'static,
        T: Fn() -> F + Send + Sync + 'static,
        F: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        let pattern = SchedulePattern::parse(pattern)?;
        let task: TaskFn<R> = Arc::new(move || task().boxed());

        let future = ScheduleFuture::new(self.clone(), pattern, task);
        future.activate().await;
        Ok(future)
    }

    /// Start the engine's background ticker.
    pub async fn start(&self) {
        self.inner.engine.start().await;
    }

    /// Stop the ticker and abort pending delayed starts. Live
    /// registrations stay in place for a later `start`.
    pub async fn stop(&self) {
        self.inner.engine.stop().await;
        self.inner.timer.shutdown();
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    pub fn engine(&self) -> &CronEngine {
        &self.inner.engine
    }

    pub fn timer(&self) -> &TimerService {
        &self.inner.timer
    }

    pub fn registry(&self) -> &Arc<dyn ScheduleRegistry> {
        &self.inner.registry
    }
}
