//! Re-send requests recorded in a request log

use std::time::Duration;

use regex::{Regex, RegexBuilder};

use service_validator_core::{Headers, LogRecord, LogStatus, MASK};

use crate::filter::FilterError;

/// Which log records to replay. Unset criteria match everything.
#[derive(Debug, Clone, Default)]
pub struct ReplayFilter {
    id: Option<u64>,
    status: Option<LogStatus>,
    uri: Option<Regex>,
    method: Option<Regex>,
}

impl ReplayFilter {
    /// Build a filter; `uri` and `method` are regular expressions, the method
    /// one ignoring case.
    ///
    /// # Errors
    ///
    /// Returns error if a pattern is not a valid regex.
    pub fn new(
        id: Option<u64>,
        status: Option<LogStatus>,
        uri: Option<&str>,
        method: Option<&str>,
    ) -> Result<Self, FilterError> {
        let compile = |pattern: &str, case_insensitive: bool| {
            RegexBuilder::new(pattern)
                .case_insensitive(case_insensitive)
                .build()
                .map_err(|e| FilterError::InvalidPattern {
                    pattern: pattern.to_string(),
                    message: e.to_string(),
                })
        };
        Ok(Self {
            id,
            status,
            uri: uri.map(|p| compile(p, false)).transpose()?,
            method: method.map(|p| compile(p, true)).transpose()?,
        })
    }

    #[must_use]
    pub fn matches(&self, record: &LogRecord) -> bool {
        self.id.is_none_or(|id| record.id == id)
            && self.status.is_none_or(|s| record.status == s)
            && self.uri.as_ref().is_none_or(|r| r.is_match(&record.request.uri))
            && self
                .method
                .as_ref()
                .is_none_or(|r| r.is_match(&record.request.method))
    }

    /// Records that pass the filter, in log order.
    #[must_use]
    pub fn select<'a>(&self, records: &'a [LogRecord]) -> Vec<&'a LogRecord> {
        records.iter().filter(|r| self.matches(r)).collect()
    }
}

/// Status codes before and after a replay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayOutcome {
    pub id: u64,
    pub method: String,
    pub uri: String,
    /// Absent when the logged request got no response
    pub old_status: Option<u16>,
    pub new_status: u16,
}

/// Sends logged requests again.
pub struct Replayer {
    client: reqwest::blocking::Client,
    overrides: Headers,
}

impl Replayer {
    /// Replayer with `overrides` applied over the logged headers. Masked
    /// headers are dropped unless an override supplies them.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built.
    pub fn new(overrides: Headers, timeout: Duration) -> Result<Self, crate::RunnerError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| crate::RunnerError::Http(e.to_string()))?;
        Ok(Self { client, overrides })
    }

    /// Headers the replayed request carries.
    #[must_use]
    pub fn headers_for(&self, record: &LogRecord) -> Headers {
        let mut headers: Headers = record
            .request
            .headers
            .iter()
            .filter(|(_, value)| value.as_str() != MASK)
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        for (name, value) in self.overrides.iter() {
            headers.set(name, value);
        }
        headers
    }

    /// Re-send one record.
    ///
    /// # Errors
    ///
    /// Returns error if the method is invalid or the request fails.
    pub fn replay(&self, record: &LogRecord) -> Result<ReplayOutcome, crate::RunnerError> {
        let method = reqwest::Method::from_bytes(record.request.method.as_bytes())
            .map_err(|e| crate::RunnerError::Http(format!("invalid method: {e}")))?;
        tracing::debug!(id = record.id, method = %method, uri = %record.request.uri, "replaying");

        let mut builder = self.client.request(method, &record.request.uri);
        for (name, value) in self.headers_for(record).iter() {
            builder = builder.header(name, value);
        }
        if let Some(body) = &record.request.body {
            builder = builder.body(body.clone());
        }
        let response = builder
            .send()
            .map_err(|e| crate::RunnerError::Http(e.to_string()))?;

        Ok(ReplayOutcome {
            id: record.id,
            method: record.request.method.clone(),
            uri: record.request.uri.clone(),
            old_status: record.status_code(),
            new_status: response.status().as_u16(),
        })
    }
}
