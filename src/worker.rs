//! Guarded fire-and-forget execution
//!
//! Listener callbacks run on anonymous worker tasks; a panicking
//! callback must never take a sibling listener or the handle's state
//! down with it. Both entry points catch unwinds and log them.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Run `f` on the calling thread, logging a panic instead of unwinding.
pub(crate) fn run_guarded<F: FnOnce()>(label: &'static str, f: F) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(f)) {
        tracing::error!("{label} panicked: {}", panic_message(payload.as_ref()));
    }
}

/// Run `f` on a spawned worker task, logging a panic instead of unwinding.
pub(crate) fn spawn_guarded<F>(label: &'static str, f: F)
where
    F: FnOnce() + Send + 'static,
{
    tokio::spawn(async move {
        run_guarded(label, f);
    });
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
