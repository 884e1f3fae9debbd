//! Bare five-field cron expressions
//!
//! ```text
//! ┌───────────── minute (0-59)
//! │ ┌───────────── hour (0-23)
//! │ │ ┌───────────── day of month (1-31)
//! │ │ │ ┌───────────── month (1-12)
//! │ │ │ │ ┌───────────── day of week (0-6, 0=Sunday)
//! │ │ │ │ │
//! * * * * *
//! ```
//!
//! Fields accept `*`, single values, lists (`1,3,5`), ranges (`1-5`) and
//! steps (`*/5`, `0-30/5`). Matching is minute-granular; the predictor
//! walks forward minute by minute, so an expression that cannot match
//! within four years is reported as having no next instant.

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};

use crate::types::{Result, ScheduleError};

/// Field positions with their display names and inclusive bounds.
const FIELD_BOUNDS: [(&str, u32, u32); 5] = [
    ("minute", 0, 59),
    ("hour", 0, 23),
    ("day of month", 1, 31),
    ("month", 1, 12),
    ("day of week", 0, 6),
];

/// Upper bound on the minute-by-minute forward search (four years,
/// covering leap-year day-of-month combinations).
const MAX_SEARCH_MINUTES: i64 = 4 * 366 * 24 * 60;

/// A parsed five-field cron expression.
#[derive(Debug, Clone)]
pub struct CronExpression {
    source: String,
    /// Allowed values per field, in `FIELD_BOUNDS` order.
    fields: [BTreeSet<u32>; 5],
}

impl CronExpression {
    /// Parse a five-field cron expression.
    pub fn parse(expression: &str) -> Result<Self> {
        let source = expression.trim().to_string();
        let parts: Vec<&str> = source.split_whitespace().collect();

        if parts.len() != FIELD_BOUNDS.len() {
            return Err(ScheduleError::invalid_pattern(
                &source,
                format!("expected 5 cron fields, got {}", parts.len()),
            ));
        }

        let mut fields: [BTreeSet<u32>; 5] = Default::default();
        for (i, (name, min, max)) in FIELD_BOUNDS.iter().enumerate() {
            fields[i] = parse_field(&source, parts[i], *name, *min, *max)?;
        }

        Ok(Self { source, fields })
    }

    /// True when `expression` parses as a five-field cron expression.
    pub fn is_valid(expression: &str) -> bool {
        Self::parse(expression).is_ok()
    }

    /// The trimmed expression string this was parsed from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Check whether an instant matches, second and sub-second parts ignored.
    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        let probes = [
            at.minute(),
            at.hour(),
            at.day(),
            at.month(),
            at.weekday().num_days_from_sunday(),
        ];
        self.fields
            .iter()
            .zip(probes)
            .all(|(allowed, value)| allowed.contains(&value))
    }

    /// The first matching instant strictly after `after`, at minute
    /// granularity. `None` when no instant matches within the search bound.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut probe = floor_to_minute(after + Duration::minutes(1))?;
        for _ in 0..MAX_SEARCH_MINUTES {
            if self.matches(probe) {
                return Some(probe);
            }
            probe = probe + Duration::minutes(1);
        }
        None
    }

    /// The next `count` matching instants strictly after `start`, in order.
    /// Stops short if the expression runs out of matches.
    pub fn next_matching_times(&self, start: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        let mut times = Vec::with_capacity(count);
        let mut cursor = start;
        for _ in 0..count {
            match self.next_after(cursor) {
                Some(next) => {
                    times.push(next);
                    cursor = next;
                }
                None => break,
            }
        }
        times
    }
}

/// Truncate an instant to the start of its minute.
fn floor_to_minute(at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    Utc.with_ymd_and_hms(at.year(), at.month(), at.day(), at.hour(), at.minute(), 0)
        .single()
}

/// Expand one cron field into its set of allowed values.
fn parse_field(
    expression: &str,
    field: &str,
    name: &str,
    min: u32,
    max: u32,
) -> Result<BTreeSet<u32>> {
    let mut values = BTreeSet::new();

    for term in field.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let (range, step) = split_step(expression, term, name)?;

        let (start, end) = match range {
            "*" => (min, max),
            r => match r.split_once('-') {
                Some((lo, hi)) => (
                    parse_bound(expression, lo, name)?,
                    parse_bound(expression, hi, name)?,
                ),
                None => {
                    let v = parse_bound(expression, r, name)?;
                    (v, v)
                }
            },
        };

        if start < min || end > max || start > end {
            return Err(ScheduleError::invalid_pattern(
                expression,
                format!("{name} term {term:?} outside {min}-{max}"),
            ));
        }

        values.extend((start..=end).step_by(step as usize));
    }

    if values.is_empty() {
        return Err(ScheduleError::invalid_pattern(
            expression,
            format!("{name} field {field:?} selects no values"),
        ));
    }

    Ok(values)
}

/// Split a `term/step` suffix off a field term. The step defaults to 1.
fn split_step<'a>(expression: &str, term: &'a str, name: &str) -> Result<(&'a str, u32)> {
    match term.split_once('/') {
        None => Ok((term, 1)),
        Some((range, step_str)) => {
            let step: u32 = step_str.parse().map_err(|_| {
                ScheduleError::invalid_pattern(
                    expression,
                    format!("{name} step {step_str:?} is not a number"),
                )
            })?;
            if step == 0 {
                return Err(ScheduleError::invalid_pattern(
                    expression,
                    format!("{name} step must be positive"),
                ));
            }
            Ok((range, step))
        }
    }
}

fn parse_bound(expression: &str, text: &str, name: &str) -> Result<u32> {
    text.parse().map_err(|_| {
        ScheduleError::invalid_pattern(
            expression,
            format!("{name} value {text:?} is not a number"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcards_select_everything() {
        let expr = CronExpression::parse("* * * * *").unwrap();
        assert_eq!(expr.fields[0].len(), 60);
        assert_eq!(expr.fields[1].len(), 24);
        assert_eq!(expr.fields[2].len(), 31);
        assert_eq!(expr.fields[3].len(), 12);
        assert_eq!(expr.fields[4].len(), 7);
    }

    #[test]
    fn test_lists_ranges_steps() {
        let expr = CronExpression::parse("0-30/10 9-17 1 * 1,3,5").unwrap();
        assert_eq!(expr.fields[0], BTreeSet::from([0, 10, 20, 30]));
        assert_eq!(expr.fields[1], (9..=17).collect());
        assert_eq!(expr.fields[2], BTreeSet::from([1]));
        assert_eq!(expr.fields[4], BTreeSet::from([1, 3, 5]));
    }

    #[test]
    fn test_rejects_malformed_fields() {
        for bad in [
            "* * *",
            "60 * * * *",
            "* 24 * * *",
            "30-10 * * * *",
            "*/0 * * * *",
            "a * * * *",
            "1-b * * * *",
        ] {
            assert!(
                CronExpression::parse(bad).is_err(),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_is_valid() {
        assert!(CronExpression::is_valid("*/5 * * * *"));
        assert!(!CronExpression::is_valid("not a cron"));
    }

    #[test]
    fn test_matches_weekday() {
        // 2026-02-02 is a Monday.
        let expr = CronExpression::parse("30 14 * * 1").unwrap();
        let monday = Utc.with_ymd_and_hms(2026, 2, 2, 14, 30, 0).unwrap();
        let tuesday = Utc.with_ymd_and_hms(2026, 2, 3, 14, 30, 0).unwrap();
        assert!(expr.matches(monday));
        assert!(!expr.matches(tuesday));
    }

    #[test]
    fn test_next_after_rolls_forward() {
        let expr = CronExpression::parse("0 2 * * *").unwrap();
        let at = Utc.with_ymd_and_hms(2026, 2, 5, 10, 0, 0).unwrap();
        let next = expr.next_after(at).unwrap();
        assert_eq!((next.day(), next.hour(), next.minute()), (6, 2, 0));
    }

    #[test]
    fn test_next_after_is_strictly_after() {
        let expr = CronExpression::parse("30 14 * * *").unwrap();
        let exactly = Utc.with_ymd_and_hms(2026, 2, 5, 14, 30, 0).unwrap();
        let next = expr.next_after(exactly).unwrap();
        assert_eq!(next.day(), 6);
    }

    #[test]
    fn test_next_matching_times_sequence() {
        let expr = CronExpression::parse("*/15 * * * *").unwrap();
        let start = Utc.with_ymd_and_hms(2026, 2, 5, 10, 2, 0).unwrap();
        let times = expr.next_matching_times(start, 3);
        let minutes: Vec<u32> = times.iter().map(|t| t.minute()).collect();
        assert_eq!(minutes, vec![15, 30, 45]);
        assert!(times.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_unsatisfiable_expression_has_no_next() {
        // February 31st never exists.
        let expr = CronExpression::parse("0 0 31 2 *").unwrap();
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert!(expr.next_after(at).is_none());
    }
}
