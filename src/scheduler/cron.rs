//! CRON expression parsing.
//!
//! Both 5-field (standard) and 6-field (with seconds) expressions are
//! accepted, auto-detected by whitespace-separated token count. The
//! underlying [`cron`] crate's native format is 6/7-field, so a 5-field
//! expression is normalized by prepending a `0` seconds field -- the same
//! normalization this codebase already applies to user-supplied cron
//! strings elsewhere.

use std::str::FromStr;

use chrono::{DateTime, Local, Utc};

use crate::error::{Result, TaskError};

/// Parse a cron expression, auto-detecting 5- vs 6-field format.
///
/// Any other token count is a syntax error, surfaced as
/// [`TaskError::InvalidArgument`].
pub fn parse(expr: &str) -> Result<cron::Schedule> {
    let field_count = expr.split_whitespace().count();
    let normalized = match field_count {
        5 => format!("0 {expr}"),
        6 => expr.to_string(),
        other => {
            return Err(TaskError::InvalidArgument(format!(
                "cron expression `{expr}` has {other} whitespace-separated fields, expected 5 or 6"
            )));
        }
    };
    cron::Schedule::from_str(&normalized)
        .map_err(|e| TaskError::InvalidArgument(format!("invalid cron expression `{expr}`: {e}")))
}

/// Compute the next occurrence in UTC, then convert to local time -- the
/// contract observable to users.
#[must_use]
pub fn next_occurrence_local(schedule: &cron::Schedule, after_utc: DateTime<Utc>) -> Option<DateTime<Local>> {
    schedule.after(&after_utc).next().map(|dt| dt.with_timezone(&Local))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_field_expression_is_normalized() {
        // Every minute.
        let schedule = parse("* * * * *").expect("valid 5-field");
        let now = Utc::now();
        assert!(next_occurrence_local(&schedule, now).is_some());
    }

    #[test]
    fn six_field_expression_is_accepted_as_is() {
        let schedule = parse("0 * * * * *").expect("valid 6-field");
        let now = Utc::now();
        assert!(next_occurrence_local(&schedule, now).is_some());
    }

    #[test]
    fn wrong_field_count_is_invalid_argument() {
        let err = parse("* * *").unwrap_err();
        assert!(matches!(err, TaskError::InvalidArgument(_)));
    }
}
