//! Host Adapter Integration Tests
//!
//! The axum app over a router wired to fakes, exercised with reqwest.

mod common;

use common::{harness, FakeGraph, USER};
use labbybot::bot::FAILURE_MESSAGES;
use labbybot::server::{app, AppState};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

async fn spawn_app(graph: FakeGraph) -> (Arc<AppState>, String) {
    let h = harness(graph).await;
    let state = Arc::new(AppState::new(h.router));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (state, format!("http://{}", addr))
}

async fn post(url: &str, body: Value) -> Value {
    reqwest::Client::new()
        .post(url)
        .json(&body)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

fn texts(response: &Value) -> Vec<String> {
    response["activities"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|a| a["type"] == "text")
        .map(|a| a["text"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_health() {
    let (_state, url) = spawn_app(FakeGraph::default()).await;
    let body: Value = reqwest::get(format!("{}/health", url))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!({ "status": "ok" }));
}

#[tokio::test]
async fn test_message_round_trip() {
    let (state, url) = spawn_app(FakeGraph::default()).await;
    let response = post(
        &format!("{}/api/messages", url),
        json!({ "conversationId": "chat-1", "userId": USER, "text": "hello" }),
    )
    .await;

    assert_eq!(texts(&response), vec!["You asked: hello"]);
    assert_eq!(state.router().conversations().get("chat-1").message_count, 1);
}

#[tokio::test]
async fn test_card_activity_shape() {
    let (_state, url) = spawn_app(FakeGraph::default()).await;
    let response = post(
        &format!("{}/api/messages", url),
        json!({ "conversationId": "chat-1", "userId": USER, "text": "/graphme" }),
    )
    .await;

    let activity = &response["activities"][0];
    assert_eq!(activity["type"], "card");
    assert_eq!(
        activity["attachment"]["contentType"],
        "application/vnd.microsoft.card.adaptive"
    );
    assert_eq!(activity["attachment"]["content"]["type"], "AdaptiveCard");
    assert_eq!(activity["attachment"]["content"]["version"], "1.6");
}

#[tokio::test]
async fn test_concurrent_turns_in_one_conversation_all_count() {
    let (state, url) = spawn_app(FakeGraph::default()).await;
    let url = format!("{}/api/messages", url);

    let turns = (0..10).map(|i| {
        let url = url.clone();
        tokio::spawn(async move {
            post(
                &url,
                json!({ "conversationId": "chat-1", "userId": USER, "text": format!("q{}", i) }),
            )
            .await
        })
    });
    for turn in turns.collect::<Vec<_>>() {
        turn.await.unwrap();
    }

    assert_eq!(state.router().conversations().get("chat-1").message_count, 10);
}

#[tokio::test]
async fn test_panicking_turn_is_contained() {
    let graph = FakeGraph {
        panic_on_me: true,
        ..FakeGraph::default()
    };
    let (_state, url) = spawn_app(graph).await;
    let messages = format!("{}/api/messages", url);

    let response = post(
        &messages,
        json!({ "conversationId": "chat-1", "userId": USER, "text": "/graphme" }),
    )
    .await;
    assert_eq!(texts(&response), FAILURE_MESSAGES.to_vec());

    // The conversation lock was released and the server still answers
    let response = post(
        &messages,
        json!({ "conversationId": "chat-1", "userId": USER, "text": "still there?" }),
    )
    .await;
    assert_eq!(texts(&response), vec!["You asked: still there?"]);
}

#[tokio::test]
async fn test_sign_in_callbacks() {
    let (state, url) = spawn_app(FakeGraph::default()).await;

    let response = post(
        &format!("{}/api/auth/success", url),
        json!({
            "conversationId": "chat-9",
            "userId": "user-9",
            "displayName": "Grace",
            "refreshToken": "refresh-9"
        }),
    )
    .await;
    assert_eq!(texts(&response)[0], "Successfully logged in");
    assert!(state.router().credentials().is_signed_in("user-9"));

    let response = post(
        &format!("{}/api/auth/failure", url),
        json!({ "conversationId": "chat-9", "error": "user cancelled" }),
    )
    .await;
    assert_eq!(
        texts(&response),
        vec!["Failed to login", "Error message: user cancelled"]
    );
}

#[tokio::test]
async fn test_sign_in_callback_waits_for_running_turn() {
    let (state, url) = spawn_app(FakeGraph::default()).await;
    let permit = state.turn_locks().acquire("chat-9").await.unwrap();

    let failure_url = format!("{}/api/auth/failure", url);
    let failure = tokio::spawn(async move {
        post(
            &failure_url,
            json!({ "conversationId": "chat-9", "error": "user cancelled" }),
        )
        .await
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!failure.is_finished());

    drop(permit);
    let response = failure.await.unwrap();
    assert_eq!(
        texts(&response),
        vec!["Failed to login", "Error message: user cancelled"]
    );
}
