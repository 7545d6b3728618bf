// Schedule parsing and next poll time calculation
//
// Poll schedules accept classic 5-field cron expressions (minute precision)
// as well as 6/7-field expressions with a leading seconds field.

use crate::errors::ScheduleError;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use std::str::FromStr;

/// PollSchedule decides when a trigger polls next
#[derive(Debug, Clone)]
pub struct PollSchedule {
    expression: String,
    timezone: Tz,
    schedule: CronSchedule,
}

impl PollSchedule {
    /// Parse a cron expression evaluated in the given timezone
    pub fn new(expression: &str, timezone: Tz) -> Result<Self, ScheduleError> {
        let schedule = parse_cron_expression(expression)?;
        Ok(Self {
            expression: expression.trim().to_string(),
            timezone,
            schedule,
        })
    }

    /// Parse an expression and an IANA timezone name
    pub fn parse(expression: &str, timezone: &str) -> Result<Self, ScheduleError> {
        Self::new(expression, parse_timezone(timezone)?)
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Next fire time strictly after `after`
    pub fn next_after(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
        let reference = after.with_timezone(&self.timezone);
        self.schedule
            .after(&reference)
            .next()
            .map(|next| next.with_timezone(&Utc))
            .ok_or_else(|| ScheduleError::NoNextExecution {
                expression: self.expression.clone(),
            })
    }
}

/// Parse and validate a cron expression
///
/// Five-field expressions get a `0` seconds field prepended.
pub fn parse_cron_expression(expression: &str) -> Result<CronSchedule, ScheduleError> {
    let normalized = normalize_expression(expression);
    CronSchedule::from_str(&normalized).map_err(|e| ScheduleError::InvalidCronExpression {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

fn normalize_expression(expression: &str) -> String {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() == 5 {
        format!("0 {}", fields.join(" "))
    } else {
        fields.join(" ")
    }
}

pub fn parse_timezone(name: &str) -> Result<Tz, ScheduleError> {
    name.parse::<Tz>()
        .map_err(|_| ScheduleError::InvalidTimezone(name.to_string()))
}
