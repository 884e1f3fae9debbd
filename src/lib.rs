//! Scheduled-task futures driven by extended cron patterns
//!
//! Binds a user task to a recurring schedule and hands back a handle
//! that is both the schedule and a future over its next result:
//! - Extended pattern syntax: `"{delay,maxCalls} cron"` — an optional
//!   start delay in seconds and an invocation bound on top of a standard
//!   five-field cron expression
//! - `get` awaits the next tick to complete; `get_timeout` bounds the wait
//! - Listeners receive a frozen snapshot per completed tick
//! - Overlapping firings are skipped, never queued
//! - A finished handle serializes as a frozen snapshot of its last outcome
//!
//! ## Quick Start
//!
//! ```ignore
//! use cron_future::SchedulerContext;
//!
//! let ctx = SchedulerContext::default();
//! ctx.start().await;
//!
//! // Run at most 10 times, hourly, starting 5 seconds from now.
//! let future = ctx
//!     .schedule("{5,10} 0 * * * *", || async { Ok("refreshed".to_string()) })
//!     .await?;
//!
//! let id = future.listen(|snapshot| {
//!     if let Ok(Some(result)) = snapshot.last() {
//!         println!("tick #{}: {result}", snapshot.count());
//!     }
//! });
//!
//! // Await the next tick's result.
//! let next = future.get().await?;
//!
//! future.stop_listen(&[id]);
//! future.cancel().await;
//! ```

mod config;
mod context;
mod engine;
mod expression;
mod future;
mod pattern;
mod registry;
mod snapshot;
mod stats;
mod timer;
mod types;
mod worker;

pub use config::SchedulerConfig;
pub use context::SchedulerContext;
pub use engine::{CronEngine, TickCallback};
pub use expression::CronExpression;
pub use future::{ListenerFn, ListenerId, ScheduleFuture, TaskFn};
pub use pattern::SchedulePattern;
pub use registry::{ActiveScheduleSet, ScheduleIdent, ScheduleRegistry};
pub use snapshot::{ScheduleSnapshot, TerminalState};
pub use stats::ScheduleStatistics;
pub use timer::{TimeoutObject, TimerService};
pub use types::{Result, ScheduleError, TaskError, TickOutcome};
