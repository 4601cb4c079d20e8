//! Check outcomes and the classifier that produces them

use std::collections::BTreeSet;

use serde::Serialize;

use crate::http::{Case, Request};

/// Classification of one check invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    /// Failure of a rule in the warning set
    Warning,
    Failure,
    /// The check or the request could not complete
    Error,
}

impl Outcome {
    /// Whether the underlying assertion failed (warnings included)
    #[must_use]
    pub const fn is_failed_assertion(self) -> bool {
        matches!(self, Self::Warning | Self::Failure)
    }

    /// Whether this outcome makes the session exit non-zero
    #[must_use]
    pub const fn is_fatal(self) -> bool {
        matches!(self, Self::Failure | Self::Error)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Failure => "failure",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw result of running one rule, or of failing to get that far
#[derive(Debug, Clone)]
pub enum CheckEvent {
    Success {
        rule: String,
    },
    Failure {
        rule: String,
        message: String,
        case: Case,
        request: Request,
    },
    Exception {
        /// Rule name, or the stage that failed (e.g. `request`)
        context: String,
        message: String,
        /// Causes, outermost first
        chain: Vec<String>,
        case: Option<Case>,
    },
}

/// A classified rule invocation
#[derive(Debug, Clone, Serialize)]
pub struct CheckRecord {
    pub name: String,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Offending case, kept for failures only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub case: Option<Case>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<Request>,
}

/// An uncaught error during generation, execution or evaluation
#[derive(Debug, Clone, Serialize)]
pub struct ExceptionRecord {
    pub context: String,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub chain: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub case: Option<Case>,
}

/// Output of the classifier
#[derive(Debug, Clone)]
pub enum Classified {
    Check(CheckRecord),
    Exception(ExceptionRecord),
}

impl Classified {
    #[must_use]
    pub fn outcome(&self) -> Outcome {
        match self {
            Self::Check(record) => record.outcome,
            Self::Exception(_) => Outcome::Error,
        }
    }
}

/// Tags raw events with severity according to the warning set.
#[derive(Debug, Clone, Copy)]
pub struct Classifier<'a> {
    warnings: &'a BTreeSet<String>,
}

impl<'a> Classifier<'a> {
    #[must_use]
    pub const fn new(warnings: &'a BTreeSet<String>) -> Self {
        Self { warnings }
    }

    /// Classify one event. Assertion failures of warning rules become
    /// `Warning`; exceptions are always `Error`.
    #[must_use]
    pub fn classify(&self, event: CheckEvent) -> Classified {
        match event {
            CheckEvent::Success { rule } => Classified::Check(CheckRecord {
                name: rule,
                outcome: Outcome::Success,
                message: None,
                case: None,
                request: None,
            }),
            CheckEvent::Failure {
                rule,
                message,
                case,
                request,
            } => {
                let outcome = if self.warnings.contains(&rule) {
                    Outcome::Warning
                } else {
                    Outcome::Failure
                };
                Classified::Check(CheckRecord {
                    name: rule,
                    outcome,
                    message: Some(message),
                    case: Some(case),
                    request: Some(request),
                })
            }
            CheckEvent::Exception {
                context,
                message,
                chain,
                case,
            } => Classified::Exception(ExceptionRecord {
                context,
                message,
                chain,
                case,
            }),
        }
    }
}
