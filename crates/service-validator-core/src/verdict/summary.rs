//! Session aggregation: per-rule totals, global counters and the exit code

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use super::endpoint::EndpointResult;
use super::outcome::Outcome;

/// Success/failure counts of one rule across the session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RuleTotals {
    pub success: u64,
    /// Failed assertions, including downgraded warnings
    pub failure: u64,
    pub total: u64,
}

/// Per-rule verdict shown in the summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RuleVerdict {
    Success,
    Warning,
    Error,
}

impl RuleVerdict {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for RuleVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleSummary {
    pub name: String,
    #[serde(flatten)]
    pub totals: RuleTotals,
    pub warning: bool,
    pub verdict: RuleVerdict,
}

/// Folds endpoint results into session totals.
///
/// Owned by a single collector; workers hand results over instead of
/// mutating it concurrently.
#[derive(Debug)]
pub struct SessionAggregator {
    warnings: BTreeSet<String>,
    totals: BTreeMap<String, RuleTotals>,
    errored: u64,
    results: Vec<EndpointResult>,
}

impl SessionAggregator {
    #[must_use]
    pub fn new(warnings: BTreeSet<String>) -> Self {
        Self {
            warnings,
            totals: BTreeMap::new(),
            errored: 0,
            results: Vec::new(),
        }
    }

    pub fn record(&mut self, result: EndpointResult) {
        for check in &result.checks {
            let totals = self.totals.entry(check.name.clone()).or_default();
            totals.total += 1;
            match check.outcome {
                Outcome::Success => totals.success += 1,
                Outcome::Warning | Outcome::Failure => totals.failure += 1,
                Outcome::Error => {}
            }
        }
        self.errored += result.errors.len() as u64;
        self.results.push(result);
    }

    #[must_use]
    pub fn results(&self) -> &[EndpointResult] {
        &self.results
    }

    /// Close the session.
    #[must_use]
    pub fn finalize(self, elapsed_secs: f64) -> SessionSummary {
        let mut passed = 0;
        let mut warned = 0;
        let mut all_failures = 0;

        let rules = self
            .totals
            .iter()
            .map(|(name, totals)| {
                let warning = self.warnings.contains(name);
                passed += totals.success;
                all_failures += totals.failure;
                if warning {
                    warned += totals.failure;
                }
                let verdict = match (totals.failure > 0, warning) {
                    (false, _) => RuleVerdict::Success,
                    (true, true) => RuleVerdict::Warning,
                    (true, false) => RuleVerdict::Error,
                };
                RuleSummary {
                    name: name.clone(),
                    totals: *totals,
                    warning,
                    verdict,
                }
            })
            .collect();

        let failed = all_failures - warned;
        let exit_code = exit_code(failed, self.errored);

        SessionSummary {
            rules,
            passed,
            warned,
            failed,
            errored: self.errored,
            elapsed_secs,
            exit_code,
            results: self.results,
        }
    }
}

/// 0 when nothing failed and nothing errored, 1 otherwise.
#[must_use]
pub const fn exit_code(failed: u64, errored: u64) -> i32 {
    if failed == 0 && errored == 0 { 0 } else { 1 }
}

/// Final, read-only view of a session
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub rules: Vec<RuleSummary>,
    pub passed: u64,
    pub warned: u64,
    pub failed: u64,
    /// Uncaught exceptions, including timeouts
    pub errored: u64,
    pub elapsed_secs: f64,
    pub exit_code: i32,
    #[serde(skip)]
    pub results: Vec<EndpointResult>,
}

/// Failure counts per rule, split by severity, highest first
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Statistics {
    pub total_warnings: u64,
    pub total_errors: u64,
    pub warnings: Vec<(String, u64)>,
    pub errors: Vec<(String, u64)>,
}

impl SessionSummary {
    /// No rule was invoked at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.iter().all(|r| r.totals.total == 0)
    }

    /// Uncaught exceptions; the same counter as `errored`.
    #[must_use]
    pub const fn exceptions(&self) -> u64 {
        self.errored
    }

    /// One-line result, e.g. `3 passed, 2 warned in 0.41s`.
    #[must_use]
    pub fn message(&self) -> String {
        let counts: Vec<String> = [
            (self.passed, "passed"),
            (self.warned, "warned"),
            (self.failed, "failed"),
            (self.errored, "errored"),
        ]
        .into_iter()
        .filter(|(n, _)| *n > 0)
        .map(|(n, label)| format!("{n} {label}"))
        .collect();

        if counts.is_empty() {
            "No checks performed.".to_string()
        } else {
            format!("{} in {:.2}s", counts.join(", "), self.elapsed_secs)
        }
    }

    pub fn warning_rules(&self) -> impl Iterator<Item = &RuleSummary> {
        self.rules.iter().filter(|r| r.warning)
    }

    pub fn regular_rules(&self) -> impl Iterator<Item = &RuleSummary> {
        self.rules.iter().filter(|r| !r.warning)
    }

    #[must_use]
    pub fn statistics(&self) -> Statistics {
        let mut stats = Statistics {
            total_warnings: self.warned,
            total_errors: self.failed,
            ..Statistics::default()
        };
        for rule in self.rules.iter().filter(|r| r.totals.failure > 0) {
            let entry = (rule.name.clone(), rule.totals.failure);
            if rule.warning {
                stats.warnings.push(entry);
            } else {
                stats.errors.push(entry);
            }
        }
        stats.warnings.sort_by(|a, b| b.1.cmp(&a.1));
        stats.errors.sort_by(|a, b| b.1.cmp(&a.1));
        stats
    }
}
