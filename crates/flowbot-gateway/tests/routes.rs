use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use flowbot_core::config::EngineConfig;
use flowbot_core::AiReply;
use flowbot_engine::{ConversationService, Interpreter};
use flowbot_gateway::{router, AppState};
use flowbot_test_utils::{fixtures, MemoryFlowRepository, MemorySessionStore, ScriptedDelegate};

const MESSAGES: &str = "/api/owners/acme/flows/welcome/messages";

fn app() -> Router {
    let config = EngineConfig::default();
    let flows = Arc::new(MemoryFlowRepository::new().with_flow(
        "welcome",
        "acme",
        fixtures::welcome_buttons_graph(),
    ));
    let service = ConversationService::new(
        flows,
        Arc::new(MemorySessionStore::new()),
        Interpreter::new(Arc::new(ScriptedDelegate::always(AiReply::default())), &config),
        config.session_retries,
    );
    router(Arc::new(AppState::new(service)))
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => request.body(Body::empty()),
    }
    .unwrap();

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

#[tokio::test]
async fn health_reports_ok() {
    let (status, body) = send(&app(), "GET", "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn message_without_session_key_gets_generated_key() {
    let (status, body) = send(&app(), "POST", MESSAGES, Some(json!({"message": "hi"}))).await;

    assert_eq!(status, StatusCode::OK);
    let key = body["sessionKey"].as_str().unwrap();
    assert!(!key.is_empty());

    let reply: Value = serde_json::from_str(body["reply"].as_str().unwrap()).unwrap();
    assert_eq!(
        reply,
        json!({"type": "button", "text": "Pick one", "buttons": ["Yes", "No"]})
    );
}

#[tokio::test]
async fn conversation_continues_with_session_key() {
    let app = app();
    send(&app, "POST", MESSAGES, Some(json!({"message": "hi", "sessionKey": "visitor-1"}))).await;

    let (status, body) = send(
        &app,
        "POST",
        MESSAGES,
        Some(json!({"message": " yes ", "sessionKey": "visitor-1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reply"], "Great, let's go!");
    assert_eq!(body["sessionKey"], "visitor-1");
}

#[tokio::test]
async fn unknown_flow_is_not_found() {
    let (status, body) = send(
        &app(),
        "POST",
        "/api/owners/acme/flows/missing/messages",
        Some(json!({"message": "hi"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
    assert!(body["message"].as_str().unwrap().contains("missing"));
}

#[tokio::test]
async fn wrong_owner_is_not_found() {
    let (status, _) = send(
        &app(),
        "POST",
        "/api/owners/intruder/flows/welcome/messages",
        Some(json!({"message": "hi"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn malformed_body_is_rejected() {
    let request = Request::builder()
        .method("POST")
        .uri(MESSAGES)
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app().oneshot(request).await.unwrap();
    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn session_can_be_inspected_and_reset() {
    let app = app();
    let uri = "/api/owners/acme/flows/welcome/sessions/visitor-2";

    let (status, _) = send(&app, "GET", uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    send(&app, "POST", MESSAGES, Some(json!({"message": "hello", "sessionKey": "visitor-2"}))).await;

    let (status, body) = send(&app, "GET", uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"sessionKey": "visitor-2", "lastNodeId": "pick", "lastMessage": "hello"})
    );

    let (status, _) = send(&app, "DELETE", uri, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, body) = send(&app, "GET", uri, None).await;
    assert_eq!(body["lastNodeId"], Value::Null);

    let (status, _) = send(&app, "DELETE", "/api/owners/acme/flows/welcome/sessions/nobody", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
