//! Turn Pipeline Integration Tests
//!
//! Drives complete turns through `TurnOrchestrator` with scripted doubles:
//! - tenant scoping of every analytics query
//! - the zero-row scenario ending in a plain answer
//! - analysis, file check and file creation end to end
//! - exactly one terminal message on every failure path
//! - sandbox teardown and interpreter file cleanup

use serde_json::json;

use dockside::models::chat::{ChatMessage, MessageBody};
use dockside::services::conversation::tool_pairing_holds;
use dockside::services::pipeline::{TurnSummary, WRITER_FALLBACK};
use dockside::services::trace::TraceKind;
use dockside::services::ui_stream::{UiFragment, UiReceiver};
use dockside::storage::chat_store::ChatStore;
use dockside_llm::LlmError;
use dockside_tools::TENANT_PARAM;

use super::support::{
    acme_request, route_to, text, tool_call, FakeInterpreter, FixtureBackend, Harness,
    SandboxMode,
};

fn drain(rx: &mut UiReceiver) -> Vec<UiFragment> {
    let mut out = Vec::new();
    while let Ok(fragment) = rx.try_recv() {
        out.push(fragment);
    }
    out
}

async fn run_turn(harness: &Harness, question: &str) -> (TurnSummary, Vec<UiFragment>) {
    let mut handle = harness.orchestrator.start(acme_request(question));
    let summary = (&mut handle.done).await.expect("turn must resolve");
    let fragments = drain(&mut handle.fragments);
    (summary, fragments)
}

fn kinds(messages: &[ChatMessage]) -> Vec<&'static str> {
    messages.iter().map(ChatMessage::kind).collect()
}

fn low_stock_backend() -> FixtureBackend {
    FixtureBackend::default().with_rows(
        "low_stock_items",
        vec![
            json!({ "sku": "A-1", "on_hand": 2, "reorder_point": 10 }),
            json!({ "sku": "B-7", "on_hand": 0, "reorder_point": 5 }),
        ],
    )
}

fn file_flow_responses() -> Vec<Result<dockside_llm::LlmResponse, LlmError>> {
    vec![
        Ok(route_to("inventoryAgent", "list SKUs below their reorder point")),
        Ok(tool_call("call_1", "low_stock_items", json!({}))),
        Ok(tool_call(
            "fc_1",
            "file_check",
            json!({ "isFileDownloadRequired": true, "kindOfFile": "CSV of low stock SKUs" }),
        )),
        Ok(tool_call(
            "fp_1",
            "file_program",
            json!({
                "packages": ["pandas"],
                "code": "import pandas as pd\ndf = pd.read_csv('/data/input.csv')\nprint(df.to_csv())",
                "outputName": "low_stock"
            }),
        )),
        Ok(text("Your low stock export is ready.")),
    ]
}

// ============================================================================
// Zero-row scenario
// ============================================================================

#[tokio::test]
async fn test_orders_needing_attention_with_no_rows() {
    let harness = Harness::new(
        vec![
            Ok(route_to("orderAgent", "find orders that need attention")),
            Ok(tool_call(
                "call_1",
                "orders_requiring_attention",
                json!({ "company_url": "someone_else" }),
            )),
            Ok(text("done")),
            Ok(text("No orders currently require attention.")),
        ],
        FixtureBackend::default(),
        FakeInterpreter::returning(""),
        SandboxMode::Succeed,
    );

    let (summary, fragments) = run_turn(&harness, "What orders need attention?").await;

    assert!(!summary.is_error);
    assert!(summary.persisted);
    assert!(summary.file.is_none());
    assert_eq!(
        kinds(&summary.messages),
        vec!["text", "tool-call", "tool-result", "answer"]
    );
    assert!(summary
        .terminal
        .text()
        .unwrap()
        .to_lowercase()
        .contains("no orders currently require attention"));

    let queries = harness.backend.queries();
    assert_eq!(queries.len(), 1);
    assert_eq!(queries[0].pipe, "orders_requiring_attention");
    assert!(queries[0]
        .params
        .iter()
        .filter(|(k, _)| k == TENANT_PARAM)
        .all(|(_, v)| v == "acme_3pl"));
    assert_eq!(queries[0].tenant(), Some("acme_3pl"));

    assert_eq!(harness.interpreter.uploads(), 0);
    assert_eq!(harness.sandbox.created(), 0);
    assert_eq!(harness.llm.remaining(), 0);

    let saved = harness
        .chats
        .get_chat("chat-acme", "user-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(saved.messages, summary.messages);
    assert!(matches!(fragments.last(), Some(UiFragment::Answer { .. })));
}

// ============================================================================
// File flow
// ============================================================================

#[tokio::test]
async fn test_low_stock_export_produces_file() {
    let harness = Harness::new(
        file_flow_responses(),
        low_stock_backend(),
        FakeInterpreter::returning("sku,on_hand\nA-1,2\nB-7,0\n"),
        SandboxMode::Succeed,
    );

    let (summary, fragments) =
        run_turn(&harness, "Export the SKUs below reorder point as CSV").await;

    assert!(!summary.is_error, "{:?}", summary.terminal);
    let file = summary.file.as_ref().expect("file produced");
    assert!(file.key.starts_with("acme_3pl/chat-acme/"));
    assert_eq!(harness.blob.keys(), vec![file.key.clone()]);
    assert_eq!(harness.sandbox.created(), 1);
    assert_eq!(harness.sandbox.closed(), 1);

    let mut deleted = harness.interpreter.deleted();
    deleted.sort();
    assert_eq!(deleted, vec!["file-in-0".to_string(), "file-out-0".to_string()]);

    assert_eq!(
        kinds(&summary.messages),
        vec![
            "text",
            "tool-call",
            "tool-result",
            "tool-call",
            "tool-result",
            "tool-call",
            "tool-result",
            "answer"
        ]
    );
    assert!(tool_pairing_holds(&summary.messages));

    assert!(fragments
        .iter()
        .any(|f| matches!(f, UiFragment::AnalysisReady { tables } if tables == &vec!["result.csv".to_string()])));
    assert!(fragments
        .iter()
        .any(|f| matches!(f, UiFragment::FileReady { url, .. } if url == &file.url)));
}

#[tokio::test]
async fn test_sandbox_exception_still_tears_down() {
    let harness = Harness::new(
        file_flow_responses(),
        low_stock_backend(),
        FakeInterpreter::returning("sku,on_hand\nA-1,2\n"),
        SandboxMode::Throw,
    );

    let (summary, fragments) = run_turn(&harness, "Export low stock as CSV").await;

    assert!(summary.is_error);
    assert_eq!(harness.sandbox.created(), 1);
    assert_eq!(harness.sandbox.closed(), 1);
    assert!(harness.blob.keys().is_empty());
    // the writer never ran
    assert_eq!(harness.llm.remaining(), 1);
    assert!(matches!(
        summary.terminal.content,
        MessageBody::Error { retryable: true, .. }
    ));
    assert!(matches!(
        fragments.last(),
        Some(UiFragment::Error { retryable: true, .. })
    ));
    assert!(tool_pairing_holds(&summary.messages));
}

#[tokio::test]
async fn test_sandbox_code_error_reported() {
    let harness = Harness::new(
        file_flow_responses(),
        low_stock_backend(),
        FakeInterpreter::returning("sku,on_hand\nA-1,2\n"),
        SandboxMode::Raise,
    );

    let (summary, _) = run_turn(&harness, "Export low stock as CSV").await;

    assert!(summary.is_error);
    assert!(summary.terminal.text().unwrap().contains("KeyError"));
    assert_eq!(harness.sandbox.closed(), 1);
    let failed: Vec<_> = harness
        .trace
        .events()
        .into_iter()
        .filter(|e| e.is_error && e.name == "file_programmer")
        .collect();
    assert_eq!(failed.len(), 1);
}

// ============================================================================
// Degradation and terminal guarantee
// ============================================================================

#[tokio::test]
async fn test_analysis_failure_degrades_to_answer() {
    let harness = Harness::new(
        vec![
            Ok(route_to("inventoryAgent", "low stock")),
            Ok(tool_call("call_1", "low_stock_items", json!({}))),
            Ok(text("Two SKUs are below their reorder point.")),
        ],
        low_stock_backend(),
        FakeInterpreter::failing(),
        SandboxMode::Succeed,
    );

    let (summary, _) = run_turn(&harness, "Which SKUs are low?").await;

    assert!(!summary.is_error);
    assert_eq!(harness.interpreter.deleted(), vec!["file-in-0".to_string()]);
    assert_eq!(harness.llm.calls(), 3);
    assert_eq!(
        kinds(&summary.messages),
        vec!["text", "tool-call", "tool-result", "answer"]
    );
}

#[tokio::test]
async fn test_every_failure_point_ends_with_one_terminal() {
    let scripts: Vec<Vec<Result<dockside_llm::LlmResponse, LlmError>>> = vec![
        // router unavailable
        vec![Err(LlmError::NetworkError {
            message: "connection refused".into(),
        })],
        // router picks a manager that does not exist
        vec![Ok(route_to("weatherAgent", "forecast"))],
        // manager answers without choosing a tool
        vec![
            Ok(route_to("returnsAgent", "returns last week")),
            Ok(text("I would look at returns")),
        ],
        // writer fails
        vec![
            Ok(route_to("returnsAgent", "returns last week")),
            Ok(tool_call("call_1", "return_details", json!({}))),
            Err(LlmError::ServerError {
                message: "overloaded".into(),
                status: Some(529),
            }),
        ],
    ];

    for script in scripts {
        let harness = Harness::new(
            script,
            FixtureBackend::default(),
            FakeInterpreter::returning(""),
            SandboxMode::Succeed,
        );
        let (summary, fragments) = run_turn(&harness, "How many returns last week?").await;

        assert!(summary.is_error);
        assert!(summary.persisted);
        assert_eq!(summary.messages.iter().filter(|m| m.is_terminal()).count(), 1);
        assert!(summary.messages.last().unwrap().is_terminal());
        assert!(tool_pairing_holds(&summary.messages));
        assert_eq!(fragments.iter().filter(|f| f.is_terminal()).count(), 1);
        assert!(fragments.last().unwrap().is_terminal());
    }
}

#[tokio::test]
async fn test_writer_failure_shows_fallback() {
    let harness = Harness::new(
        vec![
            Ok(route_to("returnsAgent", "returns")),
            Ok(tool_call("call_1", "return_details", json!({}))),
            Err(LlmError::ServerError {
                message: "overloaded".into(),
                status: Some(529),
            }),
        ],
        FixtureBackend::default(),
        FakeInterpreter::returning(""),
        SandboxMode::Succeed,
    );
    let (summary, _) = run_turn(&harness, "returns?").await;
    assert_eq!(summary.terminal.text(), Some(WRITER_FALLBACK));
}

// ============================================================================
// Streaming and tracing
// ============================================================================

#[tokio::test]
async fn test_answer_streams_and_finishes() {
    let harness = Harness::new(
        vec![
            Ok(route_to("orderAgent", "orders")),
            Ok(tool_call("call_1", "orders_requiring_attention", json!({}))),
            Ok(text("done")),
            Ok(text("All orders are on track today.")),
        ],
        FixtureBackend::default(),
        FakeInterpreter::returning(""),
        SandboxMode::Succeed,
    );

    let mut handle = harness.orchestrator.start(acme_request("Any late orders?"));
    (&mut handle.done).await.unwrap();

    let snapshot = handle.answer.borrow().clone();
    assert!(snapshot.done);
    assert_eq!(snapshot.value.as_deref(), Some("All orders are on track today."));

    let fragments = drain(&mut handle.fragments);
    assert!(matches!(fragments.first(), Some(UiFragment::TurnStarted { turn_id, .. }) if turn_id == &handle.turn_id));
    let streamed: String = fragments
        .iter()
        .filter_map(|f| match f {
            UiFragment::TextDelta { content } => Some(content.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(streamed, "All orders are on track today.");
}

#[tokio::test]
async fn test_turn_start_flushed_before_any_stage() {
    let harness = Harness::new(
        vec![],
        FixtureBackend::default(),
        FakeInterpreter::returning(""),
        SandboxMode::Succeed,
    );
    run_turn(&harness, "hello").await;

    let flushed = harness.trace.flushed();
    assert_eq!(flushed[0].kind, TraceKind::TurnStart);
    assert_eq!(flushed.last().unwrap().kind, TraceKind::TurnEnd);
}
