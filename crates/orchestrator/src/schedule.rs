//! Recurring workflow schedules.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::{OrchestratorError, Result};

/// When a scheduled workflow fires.
#[derive(Debug, Clone)]
pub enum Schedule {
    /// A cron expression (5 or 6 fields).
    Cron(CronExpression),
    /// A fixed interval between runs.
    Interval(Duration),
    /// Explicit points in time.
    Times(Vec<DateTime<Utc>>),
}

impl Schedule {
    /// Parses a cron schedule.
    pub fn cron(expression: &str) -> Result<Self> {
        CronExpression::parse(expression).map(Schedule::Cron)
    }

    pub fn every(interval: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(OrchestratorError::InvalidSchedule(
                "interval must be greater than zero".to_string(),
            ));
        }
        Ok(Schedule::Interval(interval))
    }

    pub fn at(times: impl IntoIterator<Item = DateTime<Utc>>) -> Self {
        let mut times: Vec<_> = times.into_iter().collect();
        times.sort();
        Schedule::Times(times)
    }

    /// The first fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Schedule::Cron(expr) => expr.next_after(after),
            Schedule::Interval(interval) => {
                chrono::Duration::from_std(*interval)
                    .ok()
                    .and_then(|d| after.checked_add_signed(d))
            }
            Schedule::Times(times) => times.iter().find(|t| **t > after).copied(),
        }
    }
}

/// A parsed cron expression.
#[derive(Debug, Clone)]
pub struct CronExpression {
    expression: String,
    schedule: cron::Schedule,
}

impl CronExpression {
    /// Parses an expression; 5-field expressions get a leading seconds field.
    pub fn parse(expression: &str) -> Result<Self> {
        let normalized = normalize_cron_expression(expression);
        let schedule = cron::Schedule::from_str(&normalized)
            .map_err(|e| OrchestratorError::InvalidSchedule(format!("{expression}: {e}")))?;
        Ok(Self {
            expression: normalized,
            schedule,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }
}

fn normalize_cron_expression(expr: &str) -> String {
    let parts: Vec<&str> = expr.split_whitespace().collect();
    match parts.len() {
        5 => format!("0 {}", parts.join(" ")),
        _ => parts.join(" "),
    }
}

/// A schedule attached to a workflow, with the input each run receives.
#[derive(Debug, Clone)]
pub struct WorkflowSchedule {
    pub schedule: Schedule,
    pub input: Value,
    /// Stop after this many runs.
    pub max_runs: Option<u32>,
}

impl WorkflowSchedule {
    pub fn new(schedule: Schedule) -> Self {
        Self {
            schedule,
            input: Value::Null,
            max_runs: None,
        }
    }

    pub fn input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    pub fn max_runs(mut self, max_runs: u32) -> Self {
        self.max_runs = Some(max_runs);
        self
    }
}
