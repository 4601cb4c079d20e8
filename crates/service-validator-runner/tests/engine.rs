//! Runs the engine against a mock service.
//!
//! The blocking runner goes through `spawn_blocking` while wiremock serves
//! on the test runtime.

use std::net::TcpListener;

use serde_json::{Value, json};
use wiremock::matchers::{any, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use service_validator_core::config::RuleConfig;
use service_validator_core::{
    DispatchOptions, LogStatus, RuleSelection, Session, read_request_log,
};
use service_validator_runner::{OperationFilter, Phase, RunReport, Runner, builtin_registry};

// ── Mock service ──

/// Mount the responses of a service that follows the handbook.
async fn well_behaved() -> MockServer {
    let server = MockServer::start().await;

    Mock::given(header("accept", "invalid/accept"))
        .respond_with(ResponseTemplate::new(406).set_body_json(json!({"error": "not acceptable"})))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(header("content-type", "invalid/content/type"))
        .respond_with(ResponseTemplate::new(415).set_body_json(json!({"error": "unsupported"})))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([1, 2])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([1, 2])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/items"))
        .respond_with(
            ResponseTemplate::new(201)
                .insert_header("Location", "/items/3")
                .insert_header("Content-Location", "/items/3"),
        )
        .mount(&server)
        .await;

    server
}

/// A service that answers everything with `status` and no body.
async fn always(status: u16) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(status))
        .mount(&server)
        .await;
    server
}

async fn received(server: &MockServer) -> Vec<wiremock::Request> {
    server.received_requests().await.unwrap_or_default()
}

fn header_value<'a>(request: &'a wiremock::Request, name: &str) -> Option<&'a str> {
    request.headers.get(name).and_then(|v| v.to_str().ok())
}

// ── Fixtures ──

fn document() -> Value {
    json!({
        "openapi": "3.0.3",
        "info": {"title": "items", "version": "1"},
        "paths": {
            "/items": {
                "get": {
                    "tags": ["items"],
                    "responses": {
                        "200": {
                            "description": "list",
                            "content": {"application/json": {"schema": {"type": "array", "items": {"type": "integer"}}}}
                        },
                        "4XX": {"description": "client error"}
                    }
                },
                "post": {
                    "tags": ["items"],
                    "requestBody": {
                        "required": true,
                        "content": {"application/json": {
                            "schema": {"type": "object", "properties": {"name": {"type": "string"}}},
                            "example": {"name": "widget"}
                        }}
                    },
                    "responses": {"201": {"description": "created"}, "4XX": {"description": "client error"}}
                }
            },
            "/health": {
                "get": {
                    "tags": ["ops"],
                    "responses": {"200": {"description": "ok"}, "4XX": {"description": "client error"}}
                }
            }
        }
    })
}

fn session(options: &DispatchOptions) -> Session {
    let registry = builtin_registry().unwrap();
    let selection = RuleSelection::defaults(&registry);
    Session::new(&registry, &selection, options).unwrap()
}

fn session_with_config(doc: &Value, options: &DispatchOptions) -> Session {
    let registry = builtin_registry().unwrap();
    let selection = RuleSelection::from_config(&RuleConfig::from_value(doc), &registry);
    Session::new(&registry, &selection, options).unwrap()
}

fn no_augmentation() -> DispatchOptions {
    DispatchOptions {
        no_additional_cases: true,
        ..DispatchOptions::default()
    }
}

fn runner_for(server: &MockServer) -> Runner {
    Runner::new(document(), Some(server.uri())).unwrap()
}

/// Run to completion off the async workers; returns the report and the
/// `(label, mark)` of each endpoint in reporting order.
async fn run(runner: Runner, session: Session) -> (RunReport, Vec<(String, char)>) {
    tokio::task::spawn_blocking(move || {
        let mut marks = Vec::new();
        let report = runner
            .run(&session, |r| marks.push((r.label(), r.mark())))
            .unwrap();
        (report, marks)
    })
    .await
    .unwrap()
}

// ── Runs ──

#[tokio::test(flavor = "multi_thread")]
async fn well_behaved_service_passes() {
    let server = well_behaved().await;

    let (report, marks) = run(runner_for(&server), session(&DispatchOptions::default())).await;

    assert_eq!(report.operations, 3);
    assert_eq!(marks.len(), 3);
    assert!(marks.iter().all(|(_, mark)| *mark == '.'), "{marks:?}");
    assert_eq!(report.summary.failed, 0);
    assert_eq!(report.summary.errored, 0);
    assert_eq!(report.summary.exit_code, 0);
    assert!(report.summary.passed > 0);

    // POST sends the declared example
    let requests = received(&server).await;
    let post = requests
        .iter()
        .find(|r| {
            r.method.as_str() == "POST"
                && header_value(r, "content-type") == Some("application/json")
        })
        .unwrap();
    assert_eq!(
        serde_json::from_slice::<Value>(&post.body).unwrap(),
        json!({"name": "widget"})
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn augmentations_send_one_additional_case_each() {
    let server = well_behaved().await;
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("requests.jsonl");
    let runner = runner_for(&server)
        .with_filter(OperationFilter::new(&["^/health$".into()], &["get".into()], &[]).unwrap())
        .with_request_log(Some(log_path.clone()));

    let (report, marks) = run(runner, session(&DispatchOptions::default())).await;
    assert_eq!(marks, vec![("GET /health".to_string(), '.')]);
    assert_eq!(report.summary.exit_code, 0);

    // original plus one case per augmentation
    let requests = received(&server).await;
    assert_eq!(requests.len(), 4);
    assert_eq!(
        requests
            .iter()
            .filter(|r| header_value(r, "accept") == Some("invalid/accept"))
            .count(),
        1
    );
    let with_body: Vec<_> = requests
        .iter()
        .filter(|r| r.method.as_str() == "GET" && r.url.path() == "/health" && !r.body.is_empty())
        .collect();
    assert_eq!(with_body.len(), 1);

    let records = read_request_log(&log_path).unwrap();
    let logged: Vec<_> = records
        .iter()
        .filter(|r| r.request.method == "GET" && r.request.body.is_some())
        .collect();
    assert_eq!(logged.len(), 1);
    let status = logged[0].status_code().unwrap();
    assert!((200..300).contains(&status), "{status}");
}

#[tokio::test(flavor = "multi_thread")]
async fn no_additional_cases_sends_only_the_original() {
    let server = well_behaved().await;
    let runner = runner_for(&server)
        .with_filter(OperationFilter::new(&["^/health$".into()], &[], &[]).unwrap());

    run(runner, session(&no_augmentation())).await;
    assert_eq!(received(&server).await.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn server_error_fails_the_run() {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;
    let runner = runner_for(&server)
        .with_filter(OperationFilter::new(&["health".into()], &[], &[]).unwrap());

    let (report, marks) = run(runner, session(&no_augmentation())).await;

    assert_eq!(marks, vec![("GET /health".to_string(), 'F')]);
    assert_eq!(report.summary.exit_code, 1);
    let failing = report.summary.statistics().errors;
    assert!(failing.iter().any(|(name, _)| name == "not_a_server_error"));
    assert!(failing.iter().any(|(name, _)| name == "status_code_conformance"));
}

#[test]
fn unreachable_service_is_an_error() {
    let closed = TcpListener::bind("127.0.0.1:0").unwrap();
    let base_url = format!("http://{}", closed.local_addr().unwrap());
    drop(closed);

    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("logs/requests.jsonl");
    let runner = Runner::new(document(), Some(base_url))
        .unwrap()
        .with_filter(OperationFilter::new(&["health".into()], &[], &[]).unwrap())
        .with_request_log(Some(log_path.clone()));

    let mut marks = Vec::new();
    let report = runner
        .run(&session(&no_augmentation()), |r| marks.push(r.mark()))
        .unwrap();

    assert_eq!(marks, vec!['E']);
    assert_eq!(report.summary.errored, 1);
    assert_eq!(report.summary.exit_code, 1);

    let records = read_request_log(&log_path).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, 1);
    assert_eq!(records[0].status, LogStatus::Error);
    assert!(records[0].response.is_none());
    assert!(records[0].error.is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn request_log_masks_credentials_and_numbers_records() {
    let server = well_behaved().await;
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("requests.jsonl");
    let runner = runner_for(&server)
        .with_basic_auth(Some("user:secret".parse().unwrap()))
        .with_workers(2)
        .with_request_log(Some(log_path.clone()));

    let (report, _) = run(runner, session(&no_augmentation())).await;
    assert_eq!(report.request_log.as_deref(), Some(log_path.as_path()));

    let records = read_request_log(&log_path).unwrap();
    assert_eq!(records.len(), 3);
    let ids: Vec<u64> = records.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    for record in &records {
        assert_eq!(record.status, LogStatus::Success);
        assert_eq!(
            record.request.headers.get("authorization").map(String::as_str),
            Some("***")
        );
    }
    // the service still got the real credentials
    assert!(received(&server).await.iter().all(|r| {
        header_value(r, "authorization").is_some_and(|v| v.starts_with("Basic "))
    }));
}

#[tokio::test(flavor = "multi_thread")]
async fn generate_phase_sends_max_examples() {
    let server = well_behaved().await;
    let runner = runner_for(&server)
        .with_filter(OperationFilter::new(&[], &["post".into()], &[]).unwrap())
        .with_phases(vec![Phase::Generate])
        .with_max_examples(4)
        .with_seed(Some(42));

    let (report, _) = run(runner, session(&no_augmentation())).await;
    assert_eq!(report.seed, 42);
    assert_eq!(received(&server).await.len(), 4);
}

// ── Exit first ──

#[tokio::test(flavor = "multi_thread")]
async fn exit_first_stops_remaining_endpoints() {
    let server = always(500).await;
    let runner = runner_for(&server).with_exit_first(true);

    let (report, marks) = run(runner, session(&no_augmentation())).await;
    assert_eq!(marks.len(), 1);
    assert_eq!(report.summary.exit_code, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn exit_first_ignores_warning_only_endpoints() {
    let server = always(500).await;
    let config = json!({
        "native_checks": {
            "not_a_server_error": "warn",
            "status_code_conformance": "warn"
        }
    });
    let runner = runner_for(&server).with_exit_first(true);

    let (report, marks) = run(runner, session_with_config(&config, &no_augmentation())).await;

    assert_eq!(marks.len(), 3, "{marks:?}");
    assert!(marks.iter().all(|(_, mark)| *mark == 'W'), "{marks:?}");
    // two warned rules on each endpoint
    assert_eq!(report.summary.warned, 6);
    assert_eq!(report.summary.failed, 0);
    assert_eq!(report.summary.exit_code, 0);
    assert_eq!(received(&server).await.len(), 3);
}

#[test]
fn base_url_from_servers() {
    let mut doc = document();
    doc["servers"] = json!([{"url": "/relative"}, {"url": "https://api.example.com/v1/"}]);
    assert!(Runner::new(doc, None).is_ok());
    assert!(Runner::new(document(), None).is_err());
}
