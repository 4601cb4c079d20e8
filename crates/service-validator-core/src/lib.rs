//! service-validator-core: Rule model and verdict logic for API validation
//!
//! This crate provides the validation rules, the layered rule configuration,
//! check dispatch, outcome classification and the session verdict.

pub mod config;
pub mod dispatch;
pub mod dump;
pub mod handbook;
pub mod http;
pub mod registry;
pub mod reproduce;
pub mod schema;
pub mod verdict;

pub use config::{ConfigError, ConfigFormat, RuleConfig, RuleSelection, RuleState, WriteOutcome};
pub use dispatch::{DispatchError, DispatchOptions, Session};
pub use dump::{DumpError, MASK, RequestLogWriter, read_request_log};
pub use handbook::handbook_registry;
pub use http::{Case, Headers, Request, Response, ResponseContract};
pub use registry::{DefaultState, Evaluation, Registry, RegistryError, Rule, RuleError, RuleKind};
pub use reproduce::to_curl;
pub use schema::{LogRecord, LogStatus, LoggedCheck, LoggedRequest, LoggedResponse, generate_schema};
pub use verdict::{
    CheckEvent, CheckRecord, Classified, Classifier, EndpointResult, EndpointStatus,
    ExceptionRecord, Outcome, RuleSummary, RuleVerdict, SessionAggregator, SessionSummary,
    Statistics,
};
