//! Chat Service Integration Tests
//!
//! Retry and edit truncation against a stored chat, the single-flight
//! guard, and chat management round trips.

use std::sync::Arc;

use serde_json::json;

use dockside::models::chat::{Chat, ChatMessage, TurnInput};
use dockside::services::chat_service::{ChatService, SubmitTurn};
use dockside::storage::chat_store::ChatStore;
use dockside::AppError;

use super::support::{route_to, text, tool_call, FakeInterpreter, FixtureBackend, Harness, SandboxMode};

fn returns_turn() -> Vec<Result<dockside_llm::LlmResponse, dockside_llm::LlmError>> {
    vec![
        Ok(route_to("returnsAgent", "returns last week")),
        Ok(tool_call("call_1", "return_details", json!({}))),
        Ok(text("No returns were logged last week.")),
    ]
}

fn service(harness: &Harness) -> ChatService {
    ChatService::new(harness.chats.clone(), Arc::clone(&harness.orchestrator))
}

fn submit(input: &str) -> SubmitTurn {
    SubmitTurn {
        chat_id: "chat-acme".into(),
        user_id: "user-1".into(),
        tenant_key: "acme_3pl".into(),
        org_type: "3pl".into(),
        brand_id: None,
        input: TurnInput::text(input),
        retry: false,
        edited: false,
    }
}

async fn seed_two_turns(harness: &Harness) {
    let mut chat = Chat::new("chat-acme", "user-1", "3pl");
    chat.set_messages(vec![
        ChatMessage::user("How many orders shipped yesterday?"),
        ChatMessage::answer("412 orders shipped yesterday."),
        ChatMessage::user("How many returns last week?"),
        ChatMessage::answer("I could not find that."),
    ]);
    harness.chats.save_chat(&chat).await.unwrap();
}

#[tokio::test]
async fn test_retry_resubmits_last_question() {
    let harness = Harness::new(
        returns_turn(),
        FixtureBackend::default(),
        FakeInterpreter::returning(""),
        SandboxMode::Succeed,
    );
    seed_two_turns(&harness).await;
    let chats = service(&harness);

    let mut request = submit("");
    request.retry = true;
    let handle = chats.submit_turn(request).await.unwrap();
    let summary = handle.done.await.unwrap();

    let texts: Vec<Option<&str>> = summary.messages.iter().map(ChatMessage::text).collect();
    assert_eq!(texts[0], Some("How many orders shipped yesterday?"));
    assert_eq!(texts[1], Some("412 orders shipped yesterday."));
    assert_eq!(texts[2], Some("How many returns last week?"));
    assert_eq!(
        summary.messages.last().unwrap().text(),
        Some("No returns were logged last week.")
    );
    assert_eq!(
        summary.messages.iter().filter(|m| m.is_user_input()).count(),
        2
    );
}

#[tokio::test]
async fn test_edit_replaces_last_question() {
    let harness = Harness::new(
        returns_turn(),
        FixtureBackend::default(),
        FakeInterpreter::returning(""),
        SandboxMode::Succeed,
    );
    seed_two_turns(&harness).await;
    let chats = service(&harness);

    let mut request = submit("How many returns this month?");
    request.edited = true;
    let summary = chats.submit_turn(request).await.unwrap().done.await.unwrap();

    let stored = chats.get_chat("chat-acme", "user-1").await.unwrap();
    assert_eq!(stored.messages, summary.messages);
    assert_eq!(stored.messages[2].text(), Some("How many returns this month?"));
    assert!(stored
        .messages
        .iter()
        .all(|m| m.text() != Some("How many returns last week?")));
}

#[tokio::test]
async fn test_second_submission_conflicts_while_running() {
    let harness = Harness::new(
        returns_turn(),
        FixtureBackend::default(),
        FakeInterpreter::returning(""),
        SandboxMode::Succeed,
    );
    let chats = service(&harness);

    let first = chats.submit_turn(submit("How many returns last week?")).await.unwrap();
    assert!(chats.is_busy("chat-acme"));

    let err = chats
        .submit_turn(submit("And the week before?"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
    assert!(matches!(
        chats.delete_chat("chat-acme", "user-1").await,
        Err(AppError::Conflict(_))
    ));

    first.done.await.unwrap();
    assert!(!chats.is_busy("chat-acme"));
    chats.delete_chat("chat-acme", "user-1").await.unwrap();
    assert!(matches!(
        chats.get_chat("chat-acme", "user-1").await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_chats_listed_per_user() {
    let harness = Harness::new(
        returns_turn(),
        FixtureBackend::default(),
        FakeInterpreter::returning(""),
        SandboxMode::Succeed,
    );
    let chats = service(&harness);
    chats
        .submit_turn(submit("How many returns last week?"))
        .await
        .unwrap()
        .done
        .await
        .unwrap();

    let mine = chats.list_chats("user-1").await.unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].title, "How many returns last week?");
    assert!(chats.list_chats("user-2").await.unwrap().is_empty());

    assert!(chats.toggle_favourite("user-1", "chat-acme").await.unwrap());
    assert_eq!(
        chats.get_chat("chat-acme", "user-1").await.unwrap().is_favourite,
        Some(true)
    );
}

#[tokio::test]
async fn test_other_user_cannot_take_over_chat() {
    let harness = Harness::new(
        returns_turn(),
        FixtureBackend::default(),
        FakeInterpreter::returning(""),
        SandboxMode::Succeed,
    );
    seed_two_turns(&harness).await;
    let chats = service(&harness);

    let mut request = submit("How many returns last week?");
    request.user_id = "user-2".into();
    assert!(matches!(
        chats.submit_turn(request).await,
        Err(AppError::NotFound(_))
    ));
    assert_eq!(harness.llm.calls(), 0);

    let stored = chats.get_chat("chat-acme", "user-1").await.unwrap();
    assert_eq!(stored.messages.len(), 4);
    assert!(chats.list_chats("user-2").await.unwrap().is_empty());
}
