//! Verdict module - outcome classification, per-endpoint results, session summary

mod endpoint;
mod outcome;
mod summary;

pub use endpoint::{EndpointResult, EndpointStatus};
pub use outcome::{CheckEvent, CheckRecord, Classified, Classifier, ExceptionRecord, Outcome};
pub use summary::{
    RuleSummary, RuleTotals, RuleVerdict, SessionAggregator, SessionSummary, Statistics, exit_code,
};
