//! Per-endpoint results and display deduplication

use std::collections::HashSet;

use serde::Serialize;

use super::outcome::{CheckRecord, Classified, ExceptionRecord, Outcome};

/// Overall status of one endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointStatus {
    Success,
    Failure,
    Error,
}

/// All outcomes observed for one (method, path) pair, in execution order
#[derive(Debug, Clone, Serialize)]
pub struct EndpointResult {
    pub method: String,
    pub path: String,
    pub checks: Vec<CheckRecord>,
    pub errors: Vec<ExceptionRecord>,
    /// Seed the endpoint's cases were generated from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl EndpointResult {
    #[must_use]
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            checks: Vec::new(),
            errors: Vec::new(),
            seed: None,
        }
    }

    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn record(&mut self, classified: Classified) {
        match classified {
            Classified::Check(record) => self.checks.push(record),
            Classified::Exception(record) => self.errors.push(record),
        }
    }

    #[must_use]
    pub fn label(&self) -> String {
        format!("{} {}", self.method, self.path)
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Any failed assertion, warnings included
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.checks.iter().any(|c| c.outcome.is_failed_assertion())
    }

    #[must_use]
    pub fn status(&self) -> EndpointStatus {
        if self.has_errors() {
            EndpointStatus::Error
        } else if self.has_failures() {
            EndpointStatus::Failure
        } else {
            EndpointStatus::Success
        }
    }

    /// Every outcome is a success or a downgraded warning.
    #[must_use]
    pub fn warn_or_success(&self) -> bool {
        !self.has_errors()
            && self
                .checks
                .iter()
                .all(|c| matches!(c.outcome, Outcome::Success | Outcome::Warning))
    }

    #[must_use]
    pub fn contains_warning(&self) -> bool {
        self.checks.iter().any(|c| c.outcome == Outcome::Warning)
    }

    /// Whether a non-warning failure or an error was observed.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !self.warn_or_success()
    }

    /// Progress mark: `.` success, `W` only warnings, `F` failure, `E` error.
    #[must_use]
    pub fn mark(&self) -> char {
        match self.status() {
            EndpointStatus::Success => '.',
            _ if !self.checks.is_empty() && self.warn_or_success() => 'W',
            EndpointStatus::Failure => 'F',
            EndpointStatus::Error => 'E',
        }
    }

    /// Distinct failures to display, most recent first.
    #[must_use]
    pub fn unique_errors(&self) -> Vec<&CheckRecord> {
        unique_by_name_and_message(&self.checks, Outcome::Failure)
    }

    /// Distinct warnings to display, most recent first.
    #[must_use]
    pub fn unique_warnings(&self) -> Vec<&CheckRecord> {
        unique_by_name_and_message(&self.checks, Outcome::Warning)
    }
}

fn unique_by_name_and_message(checks: &[CheckRecord], outcome: Outcome) -> Vec<&CheckRecord> {
    let mut seen: HashSet<(&str, Option<&str>)> = HashSet::new();
    checks
        .iter()
        .rev()
        .filter(|c| c.outcome == outcome && c.case.is_some())
        .filter(|c| seen.insert((c.name.as_str(), c.message.as_deref())))
        .collect()
}
