//! Validation engine
//!
//! Extracts operations from an OpenAPI document, builds cases per phase,
//! sends them with reqwest, runs the session's checks on every response and
//! folds the outcomes into a session summary.

pub mod checks;
pub mod phases;
pub mod spec;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use rand::SeedableRng;
use rand::rngs::SmallRng;
use serde_json::Value;

use service_validator_core::{
    Case, CheckEvent, Classified, DumpError, EndpointResult, Headers, LogRecord, Request,
    RequestLogWriter, Response, Session, SessionAggregator, SessionSummary,
};

use crate::auth::{AuthError, BasicAuth};
use crate::filter::OperationFilter;

use phases::{Phase, explicit_case, generated_case};
use spec::{Operation, extract_operations, is_json};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of one run
#[derive(Debug)]
pub struct RunReport {
    pub summary: SessionSummary,
    /// Seed every endpoint's generator was derived from
    pub seed: u64,
    /// Where the request log was written
    pub request_log: Option<PathBuf>,
    /// Operations selected by the filters
    pub operations: usize,
}

/// Everything a worker produced for one endpoint
struct EndpointOutput {
    result: EndpointResult,
    records: Vec<LogRecord>,
}

/// Runs a session's checks against a live service.
pub struct Runner {
    document: Value,
    base_url: String,
    headers: Headers,
    auth: Option<BasicAuth>,
    filter: OperationFilter,
    phases: Vec<Phase>,
    max_examples: u32,
    seed: Option<u64>,
    derandomize: bool,
    deadline: Option<Duration>,
    request_timeout: Option<Duration>,
    workers: usize,
    exit_first: bool,
    request_log: Option<PathBuf>,
}

impl Runner {
    /// Runner for `document`. Without `base_url`, the first absolute server
    /// URL declared in the document is used.
    ///
    /// # Errors
    ///
    /// Returns error if no base URL is given and none is declared.
    pub fn new(document: Value, base_url: Option<String>) -> Result<Self, RunnerError> {
        let base_url = base_url
            .or_else(|| declared_server(&document))
            .ok_or_else(|| {
                RunnerError::Config(
                    "no base URL given and the document declares no absolute server URL".into(),
                )
            })?;
        Ok(Self {
            document,
            base_url: base_url.trim_end_matches('/').to_string(),
            headers: Headers::new(),
            auth: None,
            filter: OperationFilter::default(),
            phases: vec![Phase::Explicit],
            max_examples: 1,
            seed: None,
            derandomize: false,
            deadline: None,
            request_timeout: None,
            workers: 1,
            exit_first: false,
            request_log: None,
        })
    }

    /// Headers sent with every request
    #[must_use]
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    #[must_use]
    pub fn with_basic_auth(mut self, auth: Option<BasicAuth>) -> Self {
        self.auth = auth;
        self
    }

    #[must_use]
    pub fn with_filter(mut self, filter: OperationFilter) -> Self {
        self.filter = filter;
        self
    }

    #[must_use]
    pub fn with_phases(mut self, phases: Vec<Phase>) -> Self {
        self.phases = phases;
        self
    }

    #[must_use]
    pub fn with_max_examples(mut self, max_examples: u32) -> Self {
        self.max_examples = max_examples.max(1);
        self
    }

    #[must_use]
    pub const fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    #[must_use]
    pub const fn with_derandomize(mut self, derandomize: bool) -> Self {
        self.derandomize = derandomize;
        self
    }

    /// Longest a single case may take before it counts as an error
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    #[must_use]
    pub const fn with_exit_first(mut self, exit_first: bool) -> Self {
        self.exit_first = exit_first;
        self
    }

    #[must_use]
    pub fn with_request_log(mut self, path: Option<PathBuf>) -> Self {
        self.request_log = path;
        self
    }

    /// Operations of the document that pass the filters. Empty when the
    /// document declares none; the run then reports no checks.
    #[must_use]
    pub fn operations(&self) -> Vec<Operation> {
        let all = extract_operations(&self.document);
        if all.is_empty() {
            tracing::warn!("no operations found in API document");
        }
        let total = all.len();
        let selected: Vec<Operation> = all.into_iter().filter(|op| self.filter.matches(op)).collect();
        tracing::debug!(total, selected = selected.len(), "operations filtered");
        selected
    }

    fn effective_seed(&self) -> u64 {
        match self.seed {
            Some(seed) => seed,
            None if self.derandomize => 0,
            None => rand::random(),
        }
    }

    /// Run every selected operation. `on_endpoint` is called once per
    /// endpoint, in completion order, as results arrive.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built or the request log
    /// cannot be written.
    pub fn run(
        &self,
        session: &Session,
        mut on_endpoint: impl FnMut(&EndpointResult),
    ) -> Result<RunReport, RunnerError> {
        let operations = self.operations();
        let client = reqwest::blocking::Client::builder()
            .timeout(self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT))
            .build()
            .map_err(|e| RunnerError::Http(e.to_string()))?;
        let seed = self.effective_seed();
        let mut log = self
            .request_log
            .as_deref()
            .map(RequestLogWriter::create)
            .transpose()?;

        tracing::info!(
            operations = operations.len(),
            workers = self.workers,
            seed,
            "starting run"
        );

        let started = Instant::now();
        let mut aggregator = SessionAggregator::new(session.warnings().clone());
        let mut log_error: Option<DumpError> = None;

        let next = AtomicUsize::new(0);
        let stop = AtomicBool::new(false);
        let (tx, rx) = mpsc::channel::<EndpointOutput>();

        std::thread::scope(|scope| {
            for _ in 0..self.workers.min(operations.len().max(1)) {
                let tx = tx.clone();
                let (next, stop, operations, client) = (&next, &stop, &operations, &client);
                scope.spawn(move || {
                    while !stop.load(Ordering::SeqCst) {
                        let index = next.fetch_add(1, Ordering::SeqCst);
                        let Some(op) = operations.get(index) else {
                            break;
                        };
                        let output = self.run_endpoint(op, index, seed, session, client, stop);
                        if self.exit_first && output.result.is_fatal() {
                            tracing::info!(endpoint = %output.result.label(), "stopping after first failure");
                            stop.store(true, Ordering::SeqCst);
                        }
                        if tx.send(output).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(tx);

            // Sole owner of the aggregator and the log
            for output in rx {
                if let (Some(writer), None) = (log.as_mut(), log_error.as_ref()) {
                    for record in output.records {
                        if let Err(e) = writer.append(record) {
                            log_error = Some(e);
                            break;
                        }
                    }
                }
                on_endpoint(&output.result);
                aggregator.record(output.result);
            }
        });

        if let Some(e) = log_error {
            return Err(e.into());
        }
        let request_log = log.map(RequestLogWriter::finish).transpose()?;

        Ok(RunReport {
            summary: aggregator.finalize(started.elapsed().as_secs_f64()),
            seed,
            request_log,
            operations: operations.len(),
        })
    }

    fn run_endpoint(
        &self,
        op: &Operation,
        index: usize,
        seed: u64,
        session: &Session,
        client: &reqwest::blocking::Client,
        stop: &AtomicBool,
    ) -> EndpointOutput {
        let mut rng = SmallRng::seed_from_u64(seed.wrapping_add(index as u64));
        let mut output = EndpointOutput {
            result: EndpointResult::new(&op.method, &op.path).with_seed(seed),
            records: Vec::new(),
        };

        let mut cases = Vec::new();
        for phase in &self.phases {
            match phase {
                Phase::Explicit => cases.extend(explicit_case(op, &self.document, &mut rng)),
                Phase::Generate => cases.extend(
                    (0..self.max_examples).map(|_| generated_case(op, &self.document, &mut rng)),
                ),
            }
        }
        tracing::debug!(endpoint = %op.label(), cases = cases.len(), "running endpoint");

        for case in cases {
            if self.exit_first && (stop.load(Ordering::SeqCst) || output.result.is_fatal()) {
                break;
            }
            let Some(response) = self.execute_case(&case, session, client, &mut output) else {
                continue;
            };
            for (rule, extra) in session.additional_cases(&case, &response) {
                tracing::debug!(rule, endpoint = %op.label(), "sending additional case");
                self.execute_case(&extra, session, client, &mut output);
            }
        }
        output
    }

    /// Send one case and record its outcomes. Returns the response when one
    /// was received.
    fn execute_case(
        &self,
        case: &Case,
        session: &Session,
        client: &reqwest::blocking::Client,
        output: &mut EndpointOutput,
    ) -> Option<Response> {
        let classifier = session.classifier();
        let operation = case.operation();

        let response = match self.send(client, case) {
            Ok(response) => response,
            Err(failure) => {
                tracing::debug!(operation = %operation, error = %failure.message, "request failed");
                output.records.push(LogRecord::failed(
                    operation,
                    &failure.request,
                    failure.message.clone(),
                ));
                output.result.record(classifier.classify(CheckEvent::Exception {
                    context: "request".into(),
                    message: failure.message,
                    chain: failure.chain,
                    case: Some(case.clone()),
                }));
                return None;
            }
        };

        let mut outcomes = session.run_checks(&response, case);
        if let Some(deadline) = self.deadline {
            if response.elapsed > deadline.as_secs_f64() {
                outcomes.push(classifier.classify(CheckEvent::Exception {
                    context: "deadline".into(),
                    message: format!(
                        "Deadline exceeded: {:.0}ms > {}ms",
                        response.elapsed * 1000.0,
                        deadline.as_millis()
                    ),
                    chain: Vec::new(),
                    case: Some(case.clone()),
                }));
            }
        }

        output
            .records
            .push(LogRecord::completed(operation, &response, &outcomes));
        for outcome in outcomes {
            if let Classified::Check(check) = &outcome {
                tracing::trace!(rule = %check.name, outcome = %check.outcome, "check evaluated");
            }
            output.result.record(outcome);
        }
        Some(response)
    }

    fn send(
        &self,
        client: &reqwest::blocking::Client,
        case: &Case,
    ) -> Result<Response, SendFailure> {
        let url = format!("{}{}", self.base_url, case.formatted_path());
        let mut snapshot = Request {
            method: case.method.clone(),
            url: url.clone(),
            headers: Headers::new(),
            body: None,
        };
        let method = reqwest::Method::from_bytes(case.method.as_bytes()).map_err(|e| SendFailure {
            request: snapshot.clone(),
            message: format!("invalid HTTP method '{}': {e}", case.method),
            chain: Vec::new(),
        })?;

        let mut headers = self.headers.clone();
        for (name, value) in case.headers.iter() {
            headers.set(name, value);
        }
        let body = case
            .body
            .as_ref()
            .map(|b| render_body(b, case.media_type.as_deref()));
        if body.is_some() && !headers.contains("Content-Type") {
            headers.set(
                "Content-Type",
                case.media_type.as_deref().unwrap_or("application/json"),
            );
        }

        let mut builder = client.request(method, &url);
        if !case.query.is_empty() {
            builder = builder.query(&case.query);
        }
        for (name, value) in headers.iter() {
            builder = builder.header(name, value);
        }
        if let Some(auth) = &self.auth {
            builder = builder.basic_auth(&auth.username, Some(&auth.password));
        }
        if let Some(body) = body {
            builder = builder.body(body);
        }

        let request = builder
            .build()
            .map_err(|e| SendFailure::new(&snapshot, &e))?;
        snapshot = Request {
            method: request.method().to_string(),
            url: request.url().to_string(),
            headers: header_map(request.headers()),
            body: request
                .body()
                .and_then(|b| b.as_bytes())
                .map(|b| String::from_utf8_lossy(b).into_owned()),
        };

        let started = Instant::now();
        let response = client
            .execute(request)
            .map_err(|e| SendFailure::new(&snapshot, &e))?;
        let status_code = response.status().as_u16();
        let headers = header_map(response.headers());
        let body = response
            .text()
            .map_err(|e| SendFailure::new(&snapshot, &e))?;

        Ok(Response {
            status_code,
            headers,
            body,
            elapsed: started.elapsed().as_secs_f64(),
            request: snapshot,
        })
    }
}

/// A request that never produced a response
struct SendFailure {
    request: Request,
    message: String,
    chain: Vec<String>,
}

impl SendFailure {
    fn new(request: &Request, error: &reqwest::Error) -> Self {
        Self {
            request: request.clone(),
            message: error.to_string(),
            chain: error_chain(error),
        }
    }
}

/// Body as sent: JSON media types get JSON, string values go out verbatim.
fn render_body(body: &Value, media_type: Option<&str>) -> String {
    match body {
        Value::String(s) if !media_type.is_some_and(is_json) => s.clone(),
        other => other.to_string(),
    }
}

/// Flatten a header map, joining repeated headers with `, `.
fn header_map(map: &reqwest::header::HeaderMap) -> Headers {
    let mut headers = Headers::new();
    for (name, value) in map {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        let joined = match headers.get(name.as_str()) {
            Some(existing) => format!("{existing}, {value}"),
            None => value,
        };
        headers.set(name.as_str(), joined);
    }
    headers
}

fn error_chain(error: &dyn std::error::Error) -> Vec<String> {
    let mut chain = Vec::new();
    let mut source = error.source();
    while let Some(cause) = source {
        chain.push(cause.to_string());
        source = cause.source();
    }
    chain
}

fn declared_server(document: &Value) -> Option<String> {
    document
        .get("servers")?
        .as_array()?
        .iter()
        .filter_map(|s| s.get("url").and_then(|u| u.as_str()))
        .find(|u| u.starts_with("http://") || u.starts_with("https://"))
        .map(str::to_string)
}

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Log(#[from] DumpError),
    #[error(transparent)]
    Auth(#[from] AuthError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn body_rendering_follows_media_type() {
        assert_eq!(render_body(&json!({"a": 1}), Some("application/json")), r#"{"a":1}"#);
        assert_eq!(render_body(&json!("raw"), Some("text/plain")), "raw");
        assert_eq!(render_body(&json!("raw"), Some("application/json")), r#""raw""#);
        assert_eq!(render_body(&json!("raw"), None), "raw");
    }

    #[test]
    fn repeated_headers_are_joined() {
        let mut map = reqwest::header::HeaderMap::new();
        map.append("set-cookie", "a=1".parse().unwrap());
        map.append("set-cookie", "b=2".parse().unwrap());
        map.insert("content-type", "application/json".parse().unwrap());
        let headers = header_map(&map);
        let rendered: Vec<String> = headers.iter().map(|(k, v)| format!("{k}: {v}")).collect();
        insta::assert_snapshot!(rendered.join("\n"), @r"
        set-cookie: a=1, b=2
        content-type: application/json
        ");
    }

    #[test]
    fn declared_server_skips_relative_urls() {
        let doc = json!({"servers": [{"url": "/api"}, {"url": "http://svc:8080/api"}]});
        assert_eq!(declared_server(&doc).as_deref(), Some("http://svc:8080/api"));
        assert_eq!(declared_server(&json!({})), None);
    }

    #[test]
    fn derandomize_pins_seed() {
        let runner = Runner::new(json!({"paths": {}}), Some("http://localhost/".into()))
            .unwrap()
            .with_derandomize(true);
        assert_eq!(runner.effective_seed(), 0);
        assert_eq!(runner.base_url, "http://localhost");
        assert_eq!(runner.with_seed(Some(9)).effective_seed(), 9);
    }

    #[test]
    fn empty_document_performs_no_checks() {
        let runner = Runner::new(json!({"paths": {}}), Some("http://localhost".into())).unwrap();
        assert!(runner.operations().is_empty());

        let registry = crate::builtin_registry().unwrap();
        let selection = service_validator_core::RuleSelection::defaults(&registry);
        let session = Session::new(&registry, &selection, &Default::default()).unwrap();
        let mut reported = 0;
        let report = runner.run(&session, |_| reported += 1).unwrap();

        assert_eq!(reported, 0);
        assert_eq!(report.operations, 0);
        assert!(report.summary.is_empty());
        assert_eq!(report.summary.message(), "No checks performed.");
        assert_eq!(report.summary.exit_code, 0);
    }
}
