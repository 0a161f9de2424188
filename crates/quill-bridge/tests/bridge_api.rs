//! End-to-end tests for the bridge HTTP surface.
//!
//! Requests go straight into the router with `oneshot`; no socket is bound.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use quill_bridge::{maintenance, router, BridgeState, SharedState};
use quill_core::QuillConfig;
use quill_upstream::{MemoryBackupStore, MockDocumentApi};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

async fn plain_state() -> SharedState {
    BridgeState::builder(QuillConfig::default()).build().await
}

async fn upstream_state() -> (SharedState, Arc<MockDocumentApi>) {
    let mock = Arc::new(MockDocumentApi::new().with_file("abc", "Landing page"));
    let state = BridgeState::builder(QuillConfig::default())
        .upstream(mock.clone())
        .backup_store(Arc::new(MemoryBackupStore::new()))
        .build()
        .await;
    (state, mock)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    let request = match body {
        Some(body) => request.body(Body::from(body.to_string())).unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn send_raw(app: &Router, uri: &str, body: &'static str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_health() {
    let app = router(plain_state().await);
    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["protocolVersion"], "1.0");
}

#[tokio::test]
async fn test_submit_poll_respond_cycle() {
    let app = router(plain_state().await);

    let (status, submitted) = send(
        &app,
        "POST",
        "/commands",
        Some(json!({
            "fileKey": "abc",
            "command": "create_frame",
            "params": {"name": "Hero", "width": 1440}
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(submitted["status"], "pending");
    let id = submitted["commandId"].as_str().unwrap().to_string();

    let (_, polled) = send(&app, "GET", "/commands?file=abc", None).await;
    let commands = polled["commands"].as_array().unwrap();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0]["id"], id);
    assert_eq!(commands[0]["kind"], "command");
    assert_eq!(commands[0]["command"], "create_frame");
    assert_eq!(commands[0]["status"], "posted");

    let (status, resolved) = send(
        &app,
        "POST",
        &format!("/commands/{}/response", id),
        Some(json!({
            "kind": "response",
            "commandId": id,
            "status": "success",
            "result": {"nodeId": "5:1"},
            "executionTime": 42
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resolved["status"], "completed");

    let (_, polled) = send(&app, "GET", "/commands?file=abc", None).await;
    assert!(polled["commands"].as_array().unwrap().is_empty());

    let (status, fetched) = send(&app, "GET", &format!("/commands/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["response"]["result"]["nodeId"], "5:1");
}

#[tokio::test]
async fn test_waiting_submit_resolves_when_agent_responds() {
    let app = router(plain_state().await);

    let caller_app = app.clone();
    let caller = tokio::spawn(async move {
        send(
            &caller_app,
            "POST",
            "/commands",
            Some(json!({
                "fileKey": "abc",
                "command": "set_text",
                "params": {"nodeId": "1:2", "text": "Hello"},
                "wait": true,
                "waitTimeoutMs": 10_000
            })),
        )
        .await
    });

    let id = loop {
        let (_, polled) = send(&app, "GET", "/commands?file=abc", None).await;
        if let Some(first) = polled["commands"].as_array().and_then(|c| c.first()) {
            break first["id"].as_str().unwrap().to_string();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    };

    let (status, _) = send(
        &app,
        "POST",
        &format!("/commands/{}/response", id),
        Some(json!({"kind": "response", "commandId": id, "status": "success", "result": {}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, outcome) = caller.await.unwrap();
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(outcome["status"], "completed");
    assert_eq!(outcome["response"]["commandId"], id);
}

#[tokio::test]
async fn test_waiting_submit_surfaces_agent_error() {
    let app = router(plain_state().await);

    let caller_app = app.clone();
    let caller = tokio::spawn(async move {
        send(
            &caller_app,
            "POST",
            "/commands",
            Some(json!({
                "fileKey": "abc",
                "command": "rename",
                "params": {"nodeId": "9:9", "name": "x"},
                "wait": true
            })),
        )
        .await
    });

    let id = loop {
        let (_, polled) = send(&app, "GET", "/commands?file=abc", None).await;
        if let Some(first) = polled["commands"].as_array().and_then(|c| c.first()) {
            break first["id"].as_str().unwrap().to_string();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    };

    send(
        &app,
        "POST",
        &format!("/commands/{}/response", id),
        Some(json!({
            "kind": "response",
            "commandId": id,
            "status": "error",
            "error": {"code": "NODE_NOT_FOUND", "message": "No node 9:9"}
        })),
    )
    .await;

    let (status, body) = caller.await.unwrap();
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "NODE_NOT_FOUND");
    assert_eq!(body["error"]["details"]["commandId"], id);
}

#[tokio::test]
async fn test_wait_timeout_names_the_command() {
    let app = router(plain_state().await);
    let (status, body) = send(
        &app,
        "POST",
        "/commands",
        Some(json!({
            "fileKey": "abc",
            "command": "set_text",
            "params": {"nodeId": "1:2", "text": "Hello"},
            "wait": true,
            "waitTimeoutMs": 50
        })),
    )
    .await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["error"]["code"], "WAIT_TIMEOUT");

    let id = body["error"]["details"]["commandId"].as_str().unwrap();
    let (status, fetched) = send(&app, "GET", &format!("/commands/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["status"], "pending");
}

#[tokio::test]
async fn test_out_of_range_timeouts_rejected() {
    let app = router(plain_state().await);

    let (status, body) = send(
        &app,
        "POST",
        "/commands",
        Some(json!({
            "fileKey": "abc",
            "command": "create_frame",
            "timeoutMs": 10_000_000_000_000_000u64
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let (status, body) = send(
        &app,
        "POST",
        "/commands",
        Some(json!({
            "fileKey": "abc",
            "command": "create_frame",
            "wait": true,
            "waitTimeoutMs": 10_000_000_000_000_000u64
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let (_, stats) = send(&app, "GET", "/stats", None).await;
    assert_eq!(stats["queue"]["total"], 0);
}

#[tokio::test]
async fn test_dry_run_returns_preview_only() {
    let app = router(plain_state().await);
    let (status, body) = send(
        &app,
        "POST",
        "/commands",
        Some(json!({
            "fileKey": "abc",
            "command": "delete",
            "params": {"nodeId": "1:2"},
            "dryRun": true
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["queued"], false);
    assert_eq!(body["preview"]["changes"][0]["kind"], "delete");

    let (_, stats) = send(&app, "GET", "/stats", None).await;
    assert_eq!(stats["queue"]["total"], 0);
}

#[tokio::test]
async fn test_conflicting_submissions_are_flagged() {
    let app = router(plain_state().await);
    let body = json!({
        "fileKey": "abc",
        "command": "set_fill",
        "params": {"nodeId": "1:2", "color": "#000"}
    });

    let (_, first) = send(&app, "POST", "/commands", Some(body.clone())).await;
    let (status, second) = send(&app, "POST", "/commands", Some(body)).await;

    assert_eq!(status, StatusCode::CREATED);
    let conflicts = second["conflicts"].as_array().unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0]["type"], "node_overlap");
    assert_eq!(conflicts[0]["conflictingTaskId"], first["commandId"]);
}

#[tokio::test]
async fn test_boundary_errors() {
    let app = router(plain_state().await);

    let (status, body) = send(&app, "GET", "/commands/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    let (status, body) = send_raw(&app, "/commands", "{not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let (status, _) = send(
        &app,
        "POST",
        "/commands",
        Some(json!({"fileKey": "abc", "command": "explode"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        "POST",
        "/commands/missing/response",
        Some(json!({"kind": "response", "commandId": "missing", "status": "success"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "GET", "/commands", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_bad_query_string_gets_json_error() {
    let app = router(plain_state().await);
    let (status, body) = send(&app, "GET", "/document/nodes?file=abc", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert!(body["error"]["message"].as_str().unwrap().contains("ids"));
}

#[tokio::test]
async fn test_rejected_response_leaves_command_untouched() {
    let app = router(plain_state().await);
    let (_, submitted) = send(
        &app,
        "POST",
        "/commands",
        Some(json!({"fileKey": "abc", "command": "create_text"})),
    )
    .await;
    let id = submitted["commandId"].as_str().unwrap().to_string();
    let uri = format!("/commands/{}/response", id);

    let (status, body) = send_raw(&app, &uri, "{not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let wrong_kind = json!({"kind": "command", "commandId": id, "status": "success"});
    let (status, body) = send(&app, "POST", &uri, Some(wrong_kind)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let (_, fetched) = send(&app, "GET", &format!("/commands/{}", id), None).await;
    assert_eq!(fetched["status"], "pending");
    assert!(fetched.get("response").map_or(true, Value::is_null));
}

#[tokio::test]
async fn test_second_terminal_response_conflicts() {
    let app = router(plain_state().await);
    let (_, submitted) = send(
        &app,
        "POST",
        "/commands",
        Some(json!({"fileKey": "abc", "command": "create_text"})),
    )
    .await;
    let id = submitted["commandId"].as_str().unwrap().to_string();
    let uri = format!("/commands/{}/response", id);

    let ok = json!({"kind": "response", "commandId": id, "status": "success"});
    assert_eq!(send(&app, "POST", &uri, Some(ok)).await.0, StatusCode::OK);

    let err = json!({
        "kind": "response",
        "commandId": id,
        "status": "error",
        "error": {"code": "E", "message": "late"}
    });
    let (status, body) = send(&app, "POST", &uri, Some(err)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "INVALID_TRANSITION");
}

#[tokio::test]
async fn test_current_file_defaults_file_key() {
    let app = router(plain_state().await);

    let (status, _) = send(
        &app,
        "POST",
        "/current-file",
        Some(json!({"fileKey": "abc", "fileName": "Landing page"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, current) = send(&app, "GET", "/current-file", None).await;
    assert_eq!(current["currentFile"]["fileKey"], "abc");

    let (status, submitted) = send(
        &app,
        "POST",
        "/commands",
        Some(json!({"command": "create_ellipse"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(submitted["fileKey"], "abc");

    let (_, polled) = send(&app, "GET", "/commands", None).await;
    assert_eq!(polled["commands"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_comment_relay_completes_command() {
    let (state, mock) = upstream_state().await;
    let app = router(state.clone());

    send(&app, "POST", "/current-file", Some(json!({"fileKey": "abc"}))).await;
    let (_, submitted) = send(
        &app,
        "POST",
        "/commands",
        Some(json!({"command": "resize", "params": {"nodeId": "1:2", "width": 10}})),
    )
    .await;
    let id = submitted["commandId"].as_str().unwrap().to_string();
    assert!(submitted["backup"]["id"].is_string());

    let root = mock.add_comment("abc", &format!("quill {}", id), None);
    let (status, posted) = send(
        &app,
        "POST",
        &format!("/commands/{}/posted", id),
        Some(json!({"commentId": root})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(posted["commentId"], root);

    mock.add_comment(
        "abc",
        &format!(
            "Done!\n```json\n{}\n```",
            json!({"kind": "response", "commandId": id, "status": "success", "result": {}})
        ),
        Some(&root),
    );

    maintenance::reconcile(&state).await;

    let (_, fetched) = send(&app, "GET", &format!("/commands/{}", id), None).await;
    assert_eq!(fetched["status"], "completed");
}

#[tokio::test]
async fn test_backups_listed_per_file() {
    let (state, _) = upstream_state().await;
    let app = router(state);

    send(
        &app,
        "POST",
        "/commands",
        Some(json!({"fileKey": "abc", "command": "ungroup", "params": {"nodeId": "1:2"}})),
    )
    .await;

    let (status, backups) = send(&app, "GET", "/backups?file=abc", None).await;
    assert_eq!(status, StatusCode::OK);
    let backups = backups.as_array().unwrap();
    assert_eq!(backups.len(), 1);
    assert_eq!(backups[0]["fileName"], "Landing page");
}

#[tokio::test]
async fn test_document_reads_are_cached_and_invalidated() {
    let (state, mock) = upstream_state().await;
    let app = router(state);

    let (status, doc) = send(&app, "GET", "/document?file=abc", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(doc["name"], "Landing page");
    send(&app, "GET", "/document?file=abc", None).await;
    assert_eq!(mock.file_calls(), 1);

    let (_, removed) = send(
        &app,
        "POST",
        "/cache/events",
        Some(json!({"type": "file_modified", "fileKey": "abc"})),
    )
    .await;
    assert_eq!(removed["removed"], 1);

    send(&app, "GET", "/document?file=abc", None).await;
    assert_eq!(mock.file_calls(), 2);

    let (_, stats) = send(&app, "GET", "/cache/stats", None).await;
    assert_eq!(stats["hits"], 1);
}

#[tokio::test]
async fn test_document_without_upstream_is_unavailable() {
    let app = router(plain_state().await);
    let (status, body) = send(&app, "GET", "/document?file=abc", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "UPSTREAM_UNAVAILABLE");
}

#[tokio::test]
async fn test_preview_batch() {
    let app = router(plain_state().await);
    let (status, preview) = send(
        &app,
        "POST",
        "/preview",
        Some(json!({"commands": [
            {"command": "create_frame", "params": {"name": "A"}},
            {"command": "move", "params": {"nodeId": "1:2", "x": 5}},
            {"command": "delete", "params": {"nodeId": "1:3"}}
        ]})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(preview["changes"].as_array().unwrap().len(), 3);
    assert_eq!(preview["estimatedDurationMs"], 300);
    assert_eq!(preview["canExecute"], true);
}

#[tokio::test]
async fn test_cache_invalidate_requires_pattern() {
    let app = router(plain_state().await);
    let (status, _) = send(&app, "POST", "/cache/invalidate", Some(json!({"pattern": ""}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &app,
        "POST",
        "/cache/invalidate",
        Some(json!({"pattern": "file:abc:*"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], 0);
}
