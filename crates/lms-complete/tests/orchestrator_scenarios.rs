//! End-to-end scenarios for the completion orchestrator over the in-memory host.
//!
//! Covers the SCORM happy path, xAPI actor handling, discovery dedup across
//! a tangled context graph, driver idempotence, and the time/score laws.

use std::collections::HashSet;

use serde_json::json;

use lms_complete::drivers::timefmt::{
    iso_duration, parse_iso_duration, parse_scorm12_time, scorm12_time,
};
use lms_complete::drivers::xapi::build_statement;
use lms_complete::host::memory::{MemoryContext, MemoryObject};
use lms_complete::host::mocks::{ScormMock, XapiMock, XapiStyle};
use lms_complete::http::HttpClient;
use lms_complete::*;

// ─────────────────────── helpers ───────────────────────

fn config() -> CompletionConfig {
    CompletionConfig::default().without_delays()
}

/// An LMS top window with the course loaded one frame down.
fn lms_with_course() -> (std::sync::Arc<MemoryContext>, std::sync::Arc<MemoryContext>) {
    let lms = MemoryContext::root("https://lms.example/player?course=42");
    let course = lms.add_frame("https://lms.example/content/42/index.html");
    (lms, course)
}

fn install_xapi(ctx: &MemoryContext, mock: &XapiMock) {
    let adl = MemoryObject::new("ADL");
    adl.insert_object("XAPIWrapper", mock.object());
    ctx.scope().insert_object("ADL", adl);
}

// ─────────────────────── SCORM ───────────────────────

#[tokio::test]
async fn scorm12_end_to_end_commits_once_after_sets() {
    let (lms, course) = lms_with_course();
    let scorm = ScormMock::scorm12();
    lms.scope().insert_object("API", scorm.object());

    let mut orch = CompletionOrchestrator::new(course.handle(), config());
    let result = orch
        .request_completion(&CompletionOptions {
            status: CompletionStatus::Passed,
            score: 100.0,
            ..Default::default()
        })
        .await;

    assert!(result.success, "errors: {:?}", result.errors);
    assert!(result.verification.as_ref().unwrap().verified);
    assert_eq!(result.api_type, Some(ProtocolKind::Scorm12));
    assert_eq!(result.api_location.as_deref(), Some("parent[1].API"));

    let ops = &result.lms_api().unwrap().operations;
    let methods: Vec<&str> = ops.iter().map(|o| o.method()).collect();
    let commits: Vec<usize> = methods
        .iter()
        .enumerate()
        .filter(|(_, m)| **m == "LMSCommit")
        .map(|(i, _)| i)
        .collect();
    assert_eq!(commits.len(), 1, "{methods:?}");
    let last_set = methods.iter().rposition(|m| *m == "LMSSetValue").unwrap();
    assert!(commits[0] > last_set);

    assert_eq!(scorm.value("cmi.core.lesson_status").as_deref(), Some("passed"));
    assert_eq!(scorm.value("cmi.core.score.raw").as_deref(), Some("100"));
    assert_eq!(scorm.commit_count(), 1);
}

#[tokio::test]
async fn scorm_set_order_is_score_then_status_then_time() {
    let (lms, course) = lms_with_course();
    let scorm = ScormMock::scorm12();
    lms.scope().insert_object("API", scorm.object());

    let mut orch = CompletionOrchestrator::new(course.handle(), config());
    let result = orch
        .request_completion(&CompletionOptions {
            include_interaction: true,
            ..Default::default()
        })
        .await;
    assert!(result.success);

    let sets: Vec<String> = result
        .lms_api()
        .unwrap()
        .operations
        .iter()
        .filter(|o| o.method() == "LMSSetValue")
        .map(|o| o.call.split('"').nth(1).unwrap_or_default().to_string())
        .collect();
    assert_eq!(
        sets,
        vec![
            "cmi.core.score.raw",
            "cmi.core.score.min",
            "cmi.core.score.max",
            "cmi.core.lesson_status",
            "cmi.core.session_time",
            "cmi.interactions.0.id",
            "cmi.interactions.0.type",
            "cmi.interactions.0.result",
        ]
    );
}

#[tokio::test]
async fn silent_noop_host_is_caught_by_verification() {
    let (lms, course) = lms_with_course();
    let scorm = ScormMock::scorm12();
    scorm.ignore_sets_silently();
    lms.scope().insert_object("API", scorm.object());

    let mut orch = CompletionOrchestrator::new(course.handle(), config());
    let result = orch.request_completion(&CompletionOptions::default()).await;
    assert!(!result.success);
    assert!(result.fallback_used.is_none());
    assert!(!result.verification.unwrap().verified);
}

#[tokio::test]
async fn driver_complete_is_idempotent() {
    let scorm = ScormMock::scorm2004();
    let api = DiscoveredApi {
        kind: ProtocolKind::Scorm2004,
        location: "self.API_1484_11".into(),
        object: scorm.object(),
        methods: Vec::new(),
        functional: true,
        standalone: false,
        launch_urls: Vec::new(),
    };
    let drivers = DriverSet::new(&config(), HttpClient::new(1_000));
    let driver = drivers.for_kind(ProtocolKind::Scorm2004);
    let opts = CompletionOptions::default();

    let first = driver.complete(&api, &opts).await;
    let after_first = (
        scorm.value("cmi.completion_status"),
        scorm.value("cmi.success_status"),
    );
    let second = driver.complete(&api, &opts).await;
    let after_second = (
        scorm.value("cmi.completion_status"),
        scorm.value("cmi.success_status"),
    );

    assert!(first.success && second.success);
    assert_eq!(after_first, after_second);
    for result in [&first, &second] {
        let commits = result
            .operations
            .iter()
            .filter(|o| o.method() == "Commit")
            .count();
        assert_eq!(commits, 1);
    }
    assert_eq!(scorm.commit_count(), 2);
}

// ─────────────────────── xAPI ───────────────────────

#[tokio::test]
async fn xapi_without_actor_fails_and_sends_nothing() {
    let (_lms, course) = lms_with_course();
    let xapi = XapiMock::new(XapiStyle::Callback);
    install_xapi(&course, &xapi);

    let mut orch = CompletionOrchestrator::new(course.handle(), config());
    let result = orch.request_completion(&CompletionOptions::default()).await;

    assert!(!result.success);
    assert!(result
        .errors
        .iter()
        .any(|e| e.contains("no valid xAPI actor")));
    assert!(xapi.statements().is_empty());
}

#[tokio::test]
async fn xapi_actor_from_launch_url() {
    let actor = json!({"mbox": "mailto:learner@example.com", "name": "Learner"});
    let launch = format!(
        "https://lms.example/launch?actor={}&activity_id=https%3A%2F%2Fcourses.example%2Fc42",
        url_encode(&actor.to_string())
    );
    let lms = MemoryContext::root(launch);
    let course = lms.add_frame("https://lms.example/content/42/index.html");
    let xapi = XapiMock::new(XapiStyle::Promise);
    install_xapi(&course, &xapi);

    let mut orch = CompletionOrchestrator::new(course.handle(), config());
    let result = orch
        .request_completion(&CompletionOptions {
            score: 80.0,
            ..Default::default()
        })
        .await;

    assert!(result.success, "errors: {:?}", result.errors);
    let verification = result.verification.unwrap();
    assert!(verification.assumed);
    assert_eq!(verification.status.as_deref(), Some("assumed_success"));
    assert!(!result.warnings.is_empty());

    let statements = xapi.statements();
    assert_eq!(statements.len(), 1);
    let stmt = &statements[0];
    assert_eq!(stmt["actor"]["mbox"], "mailto:learner@example.com");
    assert_eq!(stmt["verb"]["id"], "http://adlnet.gov/expapi/verbs/passed");
    assert_eq!(stmt["object"]["id"], "https://courses.example/c42");
    assert_eq!(stmt["result"]["score"]["scaled"], json!(0.8));
}

fn url_encode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

// ─────────────────────── discovery ───────────────────────

#[tokio::test]
async fn discovery_dedups_across_tangled_graph() {
    let lms = MemoryContext::root("https://lms.example/");
    let scorm = ScormMock::scorm2004();
    lms.scope().insert_object("API_1484_11", scorm.object());

    let shell = lms.add_frame("https://lms.example/shell");
    let course = shell.add_frame("https://lms.example/course");
    let sibling = shell.add_frame("https://lms.example/nav");
    sibling.scope().insert_object("API_1484_11", scorm.object());
    let popup = course.open_popup("https://lms.example/popup");
    popup.add_context_property("courseWindows", &course);

    let foreign = shell.add_frame("https://ads.example/");
    foreign.set_accessible(false);

    let mut orch = CompletionOrchestrator::new(popup.handle(), config());
    let apis = orch.request_discovery().await;

    let locations: Vec<&str> = apis.iter().map(|a| a.location.as_str()).collect();
    let unique: HashSet<&str> = locations.iter().copied().collect();
    assert_eq!(unique.len(), locations.len(), "{locations:?}");
    assert_eq!(apis.len(), 1, "{locations:?}");
    assert_eq!(apis[0].kind, ProtocolKind::Scorm2004);
    assert!(apis[0].functional);

    let skipped = orch
        .decisions()
        .by_category(DecisionCategory::Discovery)
        .into_iter()
        .filter(|r| r.decision == "skip")
        .count();
    assert!(skipped >= 1);
}

#[tokio::test]
async fn api_index_selects_lower_priority_api() {
    let lms = MemoryContext::root("https://lms.example/");
    let s2004 = ScormMock::scorm2004();
    let s12 = ScormMock::scorm12();
    lms.scope().insert_object("API_1484_11", s2004.object());
    lms.scope().insert_object("API", s12.object());

    let mut orch = CompletionOrchestrator::new(lms.handle(), config());
    let result = orch
        .request_completion(&CompletionOptions {
            api_index: Some(1),
            ..Default::default()
        })
        .await;
    assert!(result.success);
    assert_eq!(result.api_type, Some(ProtocolKind::Scorm12));
    assert_eq!(s2004.commit_count(), 0);

    let result = orch
        .request_completion(&CompletionOptions {
            api_index: Some(7),
            ..Default::default()
        })
        .await;
    assert!(!result.success);
    assert!(result.errors[0].contains("out of range"));
}

#[tokio::test]
async fn kitchen_sink_unions_successes() {
    let lms = MemoryContext::root("https://lms.example/");
    let s2004 = ScormMock::scorm2004();
    let s12 = ScormMock::scorm12();
    lms.scope().insert_object("API_1484_11", s2004.object());
    let course = lms.add_frame("https://lms.example/c");
    course.scope().insert_object("API", s12.object());

    let mut orch = CompletionOrchestrator::new(course.handle(), config());
    let result = orch.request_kitchen_sink(&CompletionOptions::default()).await;
    assert!(result.success);
    assert_eq!(result.attempts.len(), 2);
    assert_eq!(result.succeeded.len(), 2);
    assert_eq!(result.winner.as_deref(), Some("parent[1].API_1484_11"));
    assert!(!result.stopped_early);
    assert_eq!(s12.value("cmi.core.lesson_status").as_deref(), Some("passed"));
    assert_eq!(s2004.value("cmi.completion_status").as_deref(), Some("completed"));
}

// ─────────────────────── laws ───────────────────────

#[test]
fn time_formats_round_trip() {
    for seconds in [0u64, 59, 3661, 360_000, 36_000_000] {
        assert_eq!(parse_scorm12_time(&scorm12_time(seconds)), Some(seconds));
        assert_eq!(parse_iso_duration(&iso_duration(seconds)), Some(seconds));
    }
    assert_eq!(scorm12_time(3661), "0001:01:01");
    assert_eq!(iso_duration(3661), "PT1H1M1S");
}

#[test]
fn scaled_score_always_in_range() {
    let actor = json!({"mbox": "mailto:a@example.com"});
    for (score, min, max) in [
        (250.0, 0.0, 100.0),
        (-40.0, 0.0, 100.0),
        (5.0, 10.0, 10.0),
        (50.0, 100.0, 0.0),
        (f64::INFINITY, 0.0, 100.0),
    ] {
        let opts = CompletionOptions {
            score,
            min_score: min,
            max_score: max,
            ..Default::default()
        };
        let stmt = build_statement(actor.clone(), "https://courses.example/c", &opts);
        let scaled = stmt["result"]["score"]["scaled"].as_f64().unwrap();
        assert!((0.0..=1.0).contains(&scaled), "{score} -> {scaled}");
    }
}
