//! Extended schedule patterns
//!
//! An extended pattern is a five-field cron expression with an optional
//! `{delay,maxCalls}` prefix:
//!
//! ```text
//! {5,10} 0 * * * *    delay first registration 5 s, run at most 10 times
//! 0 0 * * 1           no prefix: start immediately, run forever
//! ```
//!
//! Each prefix field is either `*` or a non-negative decimal integer.
//! `*` means "no delay" / "unbounded"; a literal `0` for the call limit
//! is rejected (zero runs is only expressible as `*`).

use std::sync::OnceLock;

use regex::Regex;

use crate::expression::CronExpression;
use crate::types::{Result, ScheduleError};

/// `{delay,maxCalls}` prefix followed by the bare cron tail.
fn extended_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:\{(\*|\d+),\s*(\*|\d+)\})?(.*)$").expect("extended pattern regex")
    })
}

/// A parsed extended schedule pattern.
#[derive(Debug, Clone)]
pub struct SchedulePattern {
    /// Original pattern text, trimmed.
    raw: String,
    /// Seconds to wait before the first cron registration. 0 = immediate.
    delay_secs: u32,
    /// Maximum number of task invocations. 0 = unbounded.
    max_calls: u32,
    /// The bare cron tail.
    cron: String,
    /// Parsed form of `cron`.
    expr: CronExpression,
}

impl SchedulePattern {
    /// Parse an extended pattern.
    pub fn parse(pattern: &str) -> Result<Self> {
        let raw = pattern.trim().to_string();

        let caps = extended_re()
            .captures(&raw)
            .ok_or_else(|| ScheduleError::invalid_pattern(&raw, "unrecognized pattern"))?;

        let delay_secs = match caps.get(1).map(|m| m.as_str()) {
            None | Some("*") => 0,
            Some(text) => text.parse().map_err(|_| {
                ScheduleError::invalid_pattern(&raw, format!("invalid delay {text:?}"))
            })?,
        };

        let max_calls = match caps.get(2).map(|m| m.as_str()) {
            None | Some("*") => 0,
            Some(text) => {
                let n: u32 = text.parse().map_err(|_| {
                    ScheduleError::invalid_pattern(
                        &raw,
                        format!("invalid number of calls {text:?}"),
                    )
                })?;
                if n == 0 {
                    return Err(ScheduleError::invalid_pattern(
                        &raw,
                        "number of calls must be positive or \"*\"",
                    ));
                }
                n
            }
        };

        let cron = caps
            .get(3)
            .map(|m| m.as_str().trim())
            .unwrap_or_default()
            .to_string();
        if cron.is_empty() {
            return Err(ScheduleError::invalid_pattern(&raw, "missing cron expression"));
        }

        let expr = CronExpression::parse(&cron).map_err(|err| match err {
            ScheduleError::InvalidPattern { detail, .. } => {
                ScheduleError::invalid_pattern(&raw, detail)
            }
            other => other,
        })?;

        Ok(Self {
            raw,
            delay_secs,
            max_calls,
            cron,
            expr,
        })
    }

    /// The original pattern text.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Seconds before the first cron registration.
    pub fn delay_secs(&self) -> u32 {
        self.delay_secs
    }

    /// Maximum task invocations; 0 means unbounded.
    pub fn max_calls(&self) -> u32 {
        self.max_calls
    }

    /// The bare cron tail.
    pub fn cron(&self) -> &str {
        &self.cron
    }

    /// The parsed cron expression.
    pub fn expression(&self) -> &CronExpression {
        &self.expr
    }
}
