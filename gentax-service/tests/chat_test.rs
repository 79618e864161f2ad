//! Chat API integration tests.

mod common;

use common::{TestApp, TestAppOptions};
use gentax_service::models::Role;
use gentax_service::services::providers::mock::MockBehavior;
use serde_json::{json, Value};

#[tokio::test]
async fn chat_returns_answer_with_citations() {
    let app = TestApp::spawn().await;

    let response = app
        .post_chat(json!({"question": "How much deduction does section 80C allow?"}))
        .await;
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(
        body["answer"],
        "Mock response for: How much deduction does section 80C allow?"
    );
    let session_id = body["session_id"].as_str().unwrap();
    assert!(uuid::Uuid::parse_str(session_id).is_ok());

    let citations = body["citations"].as_array().unwrap();
    assert!(!citations.is_empty());
    assert_eq!(citations[0]["id"], "1");
    assert_eq!(citations[0]["source"], "income_tax.md");
    assert_eq!(citations[0]["chunk_id"], "0");
}

#[tokio::test]
async fn chat_without_matching_knowledge_has_empty_citations() {
    let app = TestApp::spawn().await;

    let body: Value = app
        .post_chat(json!({"question": "Hello!"}))
        .await
        .json()
        .await
        .unwrap();

    assert_eq!(body["citations"], json!([]));
    let sent = &app.provider.calls()[0];
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].role, Role::System);
    assert_eq!(sent[1].content, "Hello!");
}

#[tokio::test]
async fn session_history_carries_across_requests() {
    let app = TestApp::spawn().await;

    let first: Value = app
        .post_chat(json!({"question": "Hello!"}))
        .await
        .json()
        .await
        .unwrap();
    let session_id = first["session_id"].as_str().unwrap().to_string();

    let second: Value = app
        .post_chat(json!({
            "question": "When is GST registration required?",
            "session_id": session_id,
        }))
        .await
        .json()
        .await
        .unwrap();

    assert_eq!(second["session_id"], session_id.as_str());
    assert_eq!(second["citations"][0]["source"], "GST Act s.22");
    assert_eq!(second["citations"][0]["chunk_id"], "s22");

    let calls = app.provider.calls();
    let history = &calls[1];
    assert_eq!(history[1].content, "Hello!");
    assert_eq!(history[2].role, Role::Assistant);
    assert!(history[3].content.starts_with("CONTEXT:\n[1] GST Act s.22#chunks22\n"));
    assert_eq!(history[4].content, "When is GST registration required?");

    let saved: Value =
        serde_json::from_slice(&std::fs::read(&app.sessions_file).unwrap()).unwrap();
    assert_eq!(saved[&session_id].as_array().unwrap().len(), 6);
}

#[tokio::test]
async fn blank_question_is_rejected() {
    let app = TestApp::spawn().await;

    let response = app.post_chat(json!({"question": "   "})).await;
    assert_eq!(response.status(), 400);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Empty question");
    assert!(app.provider.calls().is_empty());
}

#[tokio::test]
async fn malformed_body_is_rejected() {
    let app = TestApp::spawn().await;

    for body in [json!({"session_id": "abc"}), json!({"question": null})] {
        let response = app.post_chat(body).await;
        assert_eq!(response.status(), 422);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["error"], "Validation error");
    }

    let response = app
        .client()
        .post(format!("{}/api/chat", app.address))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn oversized_question_fails_validation() {
    let app = TestApp::spawn().await;

    let response = app
        .post_chat(json!({"question": "x".repeat(8001)}))
        .await;
    assert_eq!(response.status(), 422);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Validation error");
}

#[tokio::test]
async fn provider_failure_returns_llm_error() {
    let app = TestApp::spawn_with(TestAppOptions {
        behavior: MockBehavior::Fail("model unavailable".to_string()),
        ..Default::default()
    })
    .await;

    let response = app.post_chat(json!({"question": "GST rates?"})).await;
    assert_eq!(response.status(), 502);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "LLM error: API error: model unavailable");
}

#[tokio::test]
async fn new_session_returns_fresh_id() {
    let app = TestApp::spawn().await;
    let client = app.client();

    let mut ids = Vec::new();
    for _ in 0..2 {
        let response = client
            .post(format!("{}/api/new-session", app.address))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        let body: Value = response.json().await.unwrap();
        assert_eq!(body["message"], "New session created");
        ids.push(body["session_id"].as_str().unwrap().to_string());
    }

    assert_ne!(ids[0], ids[1]);
    // Sessions are only materialised by the first question.
    assert!(!app.sessions_file.exists());
}

#[tokio::test]
async fn chat_is_rate_limited_per_client() {
    let app = TestApp::spawn_with(TestAppOptions {
        chat_rate_limit_per_min: 2,
        ..Default::default()
    })
    .await;

    for _ in 0..2 {
        let response = app.post_chat(json!({"question": "Hi"})).await;
        assert_eq!(response.status(), 200);
    }

    let response = app.post_chat(json!({"question": "Hi"})).await;
    assert_eq!(response.status(), 429);
    assert!(response.headers().contains_key("retry-after"));

    let health = app
        .client()
        .get(format!("{}/api/health", app.address))
        .send()
        .await
        .unwrap();
    assert_eq!(health.status(), 200);
}

#[tokio::test]
async fn forwarded_for_header_does_not_reset_the_quota() {
    let app = TestApp::spawn_with(TestAppOptions {
        chat_rate_limit_per_min: 1,
        ..Default::default()
    })
    .await;

    let mut statuses = Vec::new();
    for hop in ["198.51.100.1", "198.51.100.2"] {
        let response = app
            .client()
            .post(format!("{}/api/chat", app.address))
            .header("x-forwarded-for", hop)
            .json(&json!({"question": "Hi"}))
            .send()
            .await
            .unwrap();
        statuses.push(response.status().as_u16());
    }

    assert_eq!(statuses, vec![200, 429]);
}
