//! Scheduler registry hooks
//!
//! The registry is told about every handle exactly once when it enters
//! scheduling and exactly once when it is descheduled. The default
//! implementation keeps the set of live schedules for inspection;
//! embedders can supply their own bookkeeping.

use std::collections::HashMap;
use std::sync::Mutex;

use uuid::Uuid;

/// Identity of one scheduled handle, stable across its lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleIdent {
    /// Handle key, assigned at construction (distinct from the cron
    /// engine registration id, which only exists once registered).
    pub key: Uuid,
    /// The extended pattern the handle was built from.
    pub pattern: String,
}

/// Lifecycle hooks called once each per handle.
pub trait ScheduleRegistry: Send + Sync {
    fn on_scheduled(&self, ident: &ScheduleIdent);
    fn on_descheduled(&self, ident: &ScheduleIdent);
}

/// Default registry: tracks the currently live schedules.
#[derive(Debug, Default)]
pub struct ActiveScheduleSet {
    active: Mutex<HashMap<Uuid, ScheduleIdent>>,
}

impl ActiveScheduleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idents of every schedule currently live.
    pub fn active(&self) -> Vec<ScheduleIdent> {
        self.active.lock().unwrap().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.active.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.lock().unwrap().is_empty()
    }

    pub fn contains(&self, key: Uuid) -> bool {
        self.active.lock().unwrap().contains_key(&key)
    }
}

impl ScheduleRegistry for ActiveScheduleSet {
    fn on_scheduled(&self, ident: &ScheduleIdent) {
        tracing::info!(key = %ident.key, pattern = %ident.pattern, "schedule registered");
        self.active.lock().unwrap().insert(ident.key, ident.clone());
    }

    fn on_descheduled(&self, ident: &ScheduleIdent) {
        tracing::info!(key = %ident.key, pattern = %ident.pattern, "schedule removed");
        self.active.lock().unwrap().remove(&ident.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(pattern: &str) -> ScheduleIdent {
        ScheduleIdent {
            key: Uuid::new_v4(),
            pattern: pattern.to_string(),
        }
    }

    #[test]
    fn test_tracks_live_schedules() {
        let registry = ActiveScheduleSet::new();
        assert!(registry.is_empty());

        let a = ident("* * * * *");
        let b = ident("{5,1} 0 * * * *");
        registry.on_scheduled(&a);
        registry.on_scheduled(&b);
        assert_eq!(registry.len(), 2);
        assert!(registry.contains(a.key));

        registry.on_descheduled(&a);
        assert_eq!(registry.len(), 1);
        assert!(!registry.contains(a.key));
        assert_eq!(registry.active(), vec![b]);
    }

    #[test]
    fn test_deschedule_unknown_is_noop() {
        let registry = ActiveScheduleSet::new();
        registry.on_descheduled(&ident("* * * * *"));
        assert!(registry.is_empty());
    }
}
