// HTTP tests for the workflow routes
// Run with: cargo test -p waypoint-control-plane --test api_test
//
// The router is driven in-process with `oneshot`; the durable runtime runs
// with fast poll intervals and a shortened delay step.

use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use waypoint_control_plane::workflows::demo::steps_with_wait;
use waypoint_control_plane::workflows::WorkflowParams;
use waypoint_control_plane::{build_app_with, App};
use waypoint_durable::{RuntimeConfig, Step, StepWorkflow, TimerServiceConfig, WorkerPoolConfig};

/// The demo workflow with a 50ms delay instead of 10s
struct QuickDemo;

impl StepWorkflow for QuickDemo {
    const TYPE: &'static str = "demo_workflow";
    type Params = WorkflowParams;

    fn steps(params: &WorkflowParams) -> Vec<Step> {
        steps_with_wait(params, Duration::from_millis(50))
    }
}

async fn app(api_prefix: &str) -> App {
    let config = RuntimeConfig {
        worker: WorkerPoolConfig::default().with_poll_interval(Duration::from_millis(10)),
        timers: TimerServiceConfig::default().with_poll_interval(Duration::from_millis(10)),
        ..RuntimeConfig::default()
    };
    let app = build_app_with::<QuickDemo>(config, api_prefix);
    app.runtime.start().await.unwrap();
    app
}

async fn send(router: &Router, method: Method, uri: &str, body: &str) -> (StatusCode, Vec<u8>) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, bytes.to_vec())
}

async fn send_json(router: &Router, method: Method, uri: &str, body: &str) -> (StatusCode, Value) {
    let (status, bytes) = send(router, method, uri, body).await;
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn start(router: &Router, body: &str) -> String {
    let (status, body) = send_json(router, Method::POST, "/start-workflow", body).await;
    assert_eq!(status, StatusCode::OK);
    body["instanceId"].as_str().unwrap().to_string()
}

async fn wait_for_completion(router: &Router, id: &str) -> Value {
    let mut last = Value::Null;
    for _ in 0..300 {
        let (status, body) = send_json(
            router,
            Method::GET,
            &format!("/workflow-status?id={id}"),
            "",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        last = body;
        if last["status"]["status"] == "complete" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    last
}

#[tokio::test]
async fn test_start_workflow_returns_id_and_status() {
    let app = app("").await;

    let (status, body) = send_json(
        &app.router,
        Method::POST,
        "/start-workflow",
        r#"{"user":"alice","task":"t1"}"#,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(!body["instanceId"].as_str().unwrap().is_empty());
    let reported = body["status"]["status"].as_str().unwrap();
    assert!(["queued", "running"].contains(&reported), "{reported}");

    app.runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_identical_requests_create_distinct_instances() {
    let app = app("").await;
    let body = r#"{"user":"alice","task":"t1"}"#;

    let (a, b) = tokio::join!(start(&app.router, body), start(&app.router, body));
    let c = start(&app.router, body).await;

    assert_ne!(a, b);
    assert_ne!(a, c);
    assert_ne!(b, c);

    app.runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_full_run_result() {
    let app = app("").await;
    let id = start(&app.router, r#"{"user":"alice","task":"t1"}"#).await;

    let last = wait_for_completion(&app.router, &id).await;

    assert_eq!(
        last,
        json!({
            "status": {
                "status": "complete",
                "output": {
                    "started": { "startedBy": "alice", "task": "t1" },
                    "completed": { "status": "done", "finishedBy": "alice" }
                }
            }
        })
    );

    let output = last["status"]["output"].as_object().unwrap();
    let keys: Vec<_> = output.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["started", "completed"]);

    app.runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_non_string_fields_pass_through() {
    let app = app("").await;
    let id = start(&app.router, r#"{"user":42,"task":null}"#).await;

    let last = wait_for_completion(&app.router, &id).await;
    assert_eq!(
        last["status"]["output"],
        json!({
            "started": { "startedBy": 42, "task": null },
            "completed": { "status": "done", "finishedBy": 42 }
        })
    );

    app.runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_repeated_id_parameter() {
    let app = app("").await;
    let id = start(&app.router, "{}").await;

    let (status, body) = send_json(
        &app.router,
        Method::GET,
        &format!("/workflow-status?id={id}&id={id}"),
        "",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["status"]["status"].is_string());

    app.runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_missing_id_is_400() {
    let app = app("").await;

    for uri in [
        "/workflow-status",
        "/workflow-status?id=",
        "/workflow-status?instance=abc&verbose=1",
    ] {
        let (status, body) = send_json(&app.router, Method::GET, uri, "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(body, json!({ "error": "Missing id" }), "{uri}");
    }

    app.runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unknown_routes_are_404() {
    let app = app("").await;

    let cases = [
        (Method::GET, "/"),
        (Method::POST, "/workflows"),
        (Method::DELETE, "/start-workflow/extra"),
        (Method::GET, "/start-workflow"),
        (Method::PUT, "/start-workflow"),
        (Method::POST, "/workflow-status"),
        (Method::PATCH, "/health"),
    ];

    for (method, uri) in cases {
        let (status, body) = send_json(&app.router, method.clone(), uri, "").await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{method} {uri}");
        assert_eq!(body, json!({ "error": "Not found" }), "{method} {uri}");
    }

    app.runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_engine_failures_are_500() {
    let app = app("").await;

    let (status, body) = send(
        &app.router,
        Method::GET,
        "/workflow-status?id=does-not-exist",
        "",
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.is_empty());

    let (status, _) = send(&app.router, Method::POST, "/start-workflow", "{oops").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    app.runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_api_prefix() {
    let app = app("/api").await;

    let (status, body) = send_json(
        &app.router,
        Method::POST,
        "/api/start-workflow",
        r#"{"user":"bob","task":"t2"}"#,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let id = body["instanceId"].as_str().unwrap();

    let (status, _) = send_json(
        &app.router,
        Method::GET,
        &format!("/api/workflow-status?id={id}"),
        "",
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send_json(&app.router, Method::POST, "/start-workflow", "{}").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({ "error": "Not found" }));

    app.runtime.shutdown().await.unwrap();
}
