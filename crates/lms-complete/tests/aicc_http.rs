//! AICC/HACP over HTTP against a mock LMS endpoint.
//!
//! Success hinges on the `error=` field in the body, never on the HTTP
//! status alone.

use std::time::Duration;

use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use lms_complete::drivers::AiccDriver;
use lms_complete::host::memory::{MemoryContext, MemoryObject};
use lms_complete::http::HttpClient;
use lms_complete::*;

// ─────────────────────── helpers ───────────────────────

fn launch_url(server: &MockServer) -> String {
    format!(
        "https://lms.example/course/index.html?aicc_sid=S-1001&aicc_url={}/hacp",
        server.uri()
    )
}

/// A URL-launched AICC API with no in-page object.
fn url_only_api(server: &MockServer) -> DiscoveredApi {
    DiscoveredApi {
        kind: ProtocolKind::Aicc,
        location: "self.location".into(),
        object: MemoryObject::new("window"),
        methods: Vec::new(),
        functional: false,
        standalone: false,
        launch_urls: vec![launch_url(server)],
    }
}

fn driver() -> AiccDriver {
    AiccDriver::new(
        HttpClient::new(5_000),
        Duration::from_secs(1),
        Duration::from_secs(5),
    )
}

async fn mount(server: &MockServer, command: &str, body: &str) {
    Mock::given(method("POST"))
        .and(path("/hacp"))
        .and(body_string_contains(format!("command={command}")))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

// ─────────────────────── driver ───────────────────────

#[tokio::test]
async fn error_zero_is_success() {
    let server = MockServer::start().await;
    mount(&server, "PutParam", "error=0\r\nerror_text=Successful").await;

    let result = driver()
        .complete(&url_only_api(&server), &CompletionOptions::default())
        .await;
    assert!(result.success, "{:?}", result.errors);
    assert_eq!(result.assurance, Assurance::TransportAcknowledged);
    assert_eq!(result.operations.len(), 1);
    assert!(result.operations[0].success);
}

#[tokio::test]
async fn nonzero_error_fails_despite_http_200() {
    let server = MockServer::start().await;
    mount(&server, "PutParam", "error=105\r\nerror_text=Invalid session").await;

    let result = driver()
        .complete(&url_only_api(&server), &CompletionOptions::default())
        .await;
    assert!(!result.success);
    assert!(result.errors[0].contains("105"), "{:?}", result.errors);
    assert!(result.errors[0].contains("Invalid session"));
}

#[tokio::test]
async fn http_error_status_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("error=0"))
        .mount(&server)
        .await;

    let result = driver()
        .complete(&url_only_api(&server), &CompletionOptions::default())
        .await;
    assert!(!result.success);
    assert!(result.errors[0].contains("HTTP 503"));
}

#[tokio::test]
async fn put_param_carries_core_block() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hacp"))
        .and(body_string_contains("command=PutParam"))
        .and(body_string_contains("version=4.0"))
        .and(body_string_contains("session_id=S-1001"))
        .and(body_string_contains("Lesson_Status%3Dcompleted"))
        .respond_with(ResponseTemplate::new(200).set_body_string("error=0"))
        .expect(1)
        .mount(&server)
        .await;

    let opts = CompletionOptions {
        status: CompletionStatus::Completed,
        ..Default::default()
    };
    let result = driver().complete(&url_only_api(&server), &opts).await;
    assert!(result.success, "{:?}", result.errors);
}

// ─────────────────────── orchestrator ───────────────────────

#[tokio::test]
async fn url_launch_end_to_end() {
    let server = MockServer::start().await;
    mount(&server, "PutParam", "error=0\r\nerror_text=Successful").await;
    mount(
        &server,
        "GetParam",
        "error=0\r\nerror_text=Successful\r\naicc_data=[Core]\r\nLesson_Status=p\r\nScore=100",
    )
    .await;
    mount(&server, "ExitAU", "error=0").await;

    let course = MemoryContext::root(launch_url(&server));
    let mut orch = CompletionOrchestrator::new(
        course.handle(),
        CompletionConfig::default().without_delays(),
    );
    let result = orch
        .request_completion(&CompletionOptions {
            terminate: true,
            ..Default::default()
        })
        .await;

    assert!(result.success, "{:?}", result.errors);
    assert_eq!(result.api_type, Some(ProtocolKind::Aicc));
    assert_eq!(result.api_location.as_deref(), Some("self.location"));
    let verification = result.verification.as_ref().unwrap();
    assert!(verification.verified);
    assert!(!verification.assumed);
    assert_eq!(verification.status.as_deref(), Some("p"));

    let calls: Vec<String> = result
        .lms_api()
        .unwrap()
        .operations
        .iter()
        .map(|o| o.call.clone())
        .collect();
    assert!(calls[0].ends_with("command=PutParam"));
    assert!(calls.last().unwrap().ends_with("command=ExitAU"));
}
