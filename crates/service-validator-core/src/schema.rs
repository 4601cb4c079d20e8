//! Request log record: one line per executed case
//!
//! Written by `run --store-request-log`, read back by `replay`, and exported
//! as JSON Schema by the `schema` command.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::http::{Request, Response};
use crate::verdict::{Classified, Outcome};

/// Overall status of one logged case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogStatus {
    Success,
    Failure,
    Error,
}

impl LogStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::Error => "ERROR",
        }
    }

    /// Parse the on-disk spelling, ignoring case.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        [Self::Success, Self::Failure, Self::Error]
            .into_iter()
            .find(|s| s.as_str().eq_ignore_ascii_case(value))
    }
}

impl std::fmt::Display for LogStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The request as sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct LoggedRequest {
    pub method: String,
    /// Absolute URI including the query string
    pub uri: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// The response as received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LoggedResponse {
    pub status_code: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: String,
    /// Seconds
    #[serde(default)]
    pub elapsed: f64,
}

/// One check evaluated against the response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct LoggedCheck {
    pub name: String,
    /// `success`, `warning`, `failure` or `error`
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// One executed case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LogRecord {
    /// Position in execution order, starting at 1
    pub id: u64,
    pub status: LogStatus,
    /// Operation label, e.g. `GET /items/{id}`
    pub operation: String,
    pub request: LoggedRequest,
    /// Absent when no response was received
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<LoggedResponse>,
    #[serde(default)]
    pub checks: Vec<LoggedCheck>,
    /// Why the case could not complete
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LogRecord {
    /// Build a record for a case that received a response. The id is
    /// assigned by the log writer.
    #[must_use]
    pub fn completed(operation: impl Into<String>, response: &Response, outcomes: &[Classified]) -> Self {
        let checks: Vec<LoggedCheck> = outcomes
            .iter()
            .map(|c| match c {
                Classified::Check(record) => LoggedCheck {
                    name: record.name.clone(),
                    value: record.outcome.as_str().to_string(),
                    message: record.message.clone(),
                },
                Classified::Exception(record) => LoggedCheck {
                    name: record.context.clone(),
                    value: Outcome::Error.as_str().to_string(),
                    message: Some(record.message.clone()),
                },
            })
            .collect();

        let status = if outcomes.iter().any(|c| c.outcome() == Outcome::Error) {
            LogStatus::Error
        } else if outcomes.iter().any(|c| c.outcome() == Outcome::Failure) {
            LogStatus::Failure
        } else {
            LogStatus::Success
        };

        Self {
            id: 0,
            status,
            operation: operation.into(),
            request: LoggedRequest::from(&response.request),
            response: Some(LoggedResponse {
                status_code: response.status_code,
                headers: response.headers.clone().into(),
                body: response.body.clone(),
                elapsed: response.elapsed,
            }),
            checks,
            error: None,
        }
    }

    /// Build a record for a case whose request failed.
    #[must_use]
    pub fn failed(operation: impl Into<String>, request: &Request, error: impl Into<String>) -> Self {
        Self {
            id: 0,
            status: LogStatus::Error,
            operation: operation.into(),
            request: LoggedRequest::from(request),
            response: None,
            checks: Vec::new(),
            error: Some(error.into()),
        }
    }

    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        self.response.as_ref().map(|r| r.status_code)
    }
}

impl From<&Request> for LoggedRequest {
    fn from(request: &Request) -> Self {
        Self {
            method: request.method.clone(),
            uri: request.url.clone(),
            headers: request.headers.clone().into(),
            body: request.body.clone(),
        }
    }
}

/// JSON Schema of [`LogRecord`], pretty-printed.
///
/// # Errors
///
/// Returns error if the schema cannot be serialized.
pub fn generate_schema() -> Result<String, serde_json::Error> {
    let schema = schemars::schema_for!(LogRecord);
    serde_json::to_string_pretty(&schema)
}
