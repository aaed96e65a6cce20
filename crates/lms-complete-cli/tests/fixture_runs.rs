//! Fixture files driven through the command surface, the way the binary
//! runs them.

use std::io::Write;

use serde_json::{json, Value};

use lms_complete::{handle_json, CompletionConfig, CompletionOrchestrator};
use lms_complete_cli::Fixture;

// ─────────────────────── helpers ───────────────────────

fn write_fixture(dir: &tempfile::TempDir, fixture: &Value) -> std::path::PathBuf {
    let path = dir.path().join("course.json");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(fixture.to_string().as_bytes()).unwrap();
    path
}

async fn run(fixture: &Fixture, command: Value) -> Value {
    let mut orch = CompletionOrchestrator::new(
        fixture.origin(),
        CompletionConfig::default().without_delays(),
    );
    handle_json(&mut orch, &command.to_string()).await
}

/// LMS player with the course one frame down.
fn framed_course(lms_globals: Value, course_globals: Value) -> Value {
    json!({
        "url": "https://lms.example/player",
        "globals": lms_globals,
        "frames": [{
            "url": "https://lms.example/content/index.html",
            "origin": true,
            "globals": course_globals
        }]
    })
}

// ─────────────────────── tests ───────────────────────

#[tokio::test]
async fn scorm2004_fixture_completes() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(
        &dir,
        &json!({
            "url": "https://lms.example/course",
            "globals": { "API_1484_11": { "kind": "scorm2004" } }
        }),
    );
    let fixture = Fixture::load(&path).unwrap();

    let result = run(
        &fixture,
        json!({ "command": "requestCompletion", "options": { "score": 90 } }),
    )
    .await;
    assert_eq!(result["success"], true, "{result}");
    assert_eq!(result["apiType"], "scorm2004");
    assert_eq!(result["apiLocation"], "self.API_1484_11");
    assert_eq!(result["verification"]["verified"], true);
}

#[tokio::test]
async fn cross_origin_frame_is_not_searched() {
    let fixture = Fixture::from_json(
        &json!({
            "url": "https://lms.example/player",
            "frames": [{
                "url": "https://other.example/sco",
                "accessible": false,
                "globals": { "API": { "kind": "scorm12" } }
            }]
        })
        .to_string(),
    )
    .unwrap();

    let apis = run(&fixture, json!({ "command": "requestDiscovery" })).await;
    assert_eq!(apis, json!([]));

    let result = run(&fixture, json!({ "command": "requestCompletion" })).await;
    assert_eq!(result["success"], false);
}

#[tokio::test]
async fn discovery_ranks_by_protocol() {
    let fixture = Fixture::from_json(
        &framed_course(
            json!({ "API": { "kind": "scorm12" } }),
            json!({ "API_1484_11": { "kind": "scorm2004" } }),
        )
        .to_string(),
    )
    .unwrap();

    let apis = run(&fixture, json!({ "command": "requestDiscovery" })).await;
    let kinds: Vec<&str> = apis
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["type"].as_str().unwrap())
        .collect();
    assert_eq!(kinds, vec!["scorm2004", "scorm12"]);
}

#[tokio::test]
async fn api_index_picks_second_api() {
    let fixture = Fixture::from_json(
        &framed_course(
            json!({ "API": { "kind": "scorm12" } }),
            json!({ "API_1484_11": { "kind": "scorm2004" } }),
        )
        .to_string(),
    )
    .unwrap();

    let result = run(
        &fixture,
        json!({ "command": "requestCompletion", "options": { "apiIndex": 1 } }),
    )
    .await;
    assert_eq!(result["success"], true, "{result}");
    assert_eq!(result["apiType"], "scorm12");
}

#[tokio::test]
async fn kitchen_sink_reaches_every_api() {
    let fixture = Fixture::from_json(
        &framed_course(
            json!({ "API": { "kind": "scorm12" } }),
            json!({ "API_1484_11": { "kind": "scorm2004" } }),
        )
        .to_string(),
    )
    .unwrap();

    let result = run(&fixture, json!({ "command": "requestKitchenSink" })).await;
    assert_eq!(result["success"], true, "{result}");
    assert_eq!(result["succeeded"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn rejected_status_fails_the_request() {
    let fixture = Fixture::from_json(
        &json!({
            "url": "https://lms.example/course",
            "globals": {
                "API": { "kind": "scorm12", "reject": ["cmi.core.lesson_status"] }
            }
        })
        .to_string(),
    )
    .unwrap();

    let result = run(&fixture, json!({ "command": "requestCompletion" })).await;
    assert_eq!(result["success"], false);
    assert!(!result["errors"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn xapi_fixture_with_configured_actor() {
    let fixture = Fixture::from_json(
        &json!({
            "url": "https://lms.example/course?activity_id=https%3A%2F%2Fcourse.example%2F42",
            "globals": {
                "ADL": {
                    "kind": "object",
                    "members": {
                        "XAPIWrapper": {
                            "kind": "xapi",
                            "style": "promise",
                            "actor": { "mbox": "mailto:learner@example.com", "name": "Learner" }
                        }
                    }
                }
            }
        })
        .to_string(),
    )
    .unwrap();

    let result = run(&fixture, json!({ "command": "requestCompletion" })).await;
    assert_eq!(result["apiType"], "xapi", "{result}");
    assert_eq!(result["success"], true, "{result}");
}
