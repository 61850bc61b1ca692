// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
/// End-to-end pipeline scenarios using the mock provider: no network, no
/// database — the repository is an in-memory stand-in for the Postgres store.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use conduit_config::{Settings, Verbosity};
use conduit_core::{Conduit, ConduitBatch, ConduitOptions, ConduitRuntime, Console, Prompt};
use conduit_model::clients::mock::{MockClient, MockReply};
use conduit_model::{
    ConduitError, Conversation, ExecutionMode, GenerationParams, Message, Role, SessionStore,
};
use conduit_storage::ConduitCache;
use conduit_tools::{Tool, ToolCall, ToolOutput, ToolRegistry};

// ─── Test fixtures ────────────────────────────────────────────────────────────

struct LsTool;

#[async_trait]
impl Tool for LsTool {
    fn name(&self) -> &str {
        "ls"
    }
    fn description(&self) -> &str {
        "list the files of a directory"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "path": { "type": "string" } },
            "required": ["path"]
        })
    }
    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        ToolOutput::ok(&call.id, "a.txt\nb.txt")
    }
}

#[derive(Default)]
struct MemoryStore {
    sessions: Mutex<Vec<(String, Conversation)>>,
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn last(&self, project: &str) -> Result<Option<Conversation>, ConduitError> {
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(p, _)| p == project)
            .map(|(_, c)| c.clone()))
    }

    async fn save_session(
        &self,
        project: &str,
        conversation: &Conversation,
        _name: Option<&str>,
    ) -> Result<(), ConduitError> {
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(slot) = sessions
            .iter_mut()
            .find(|(p, c)| p == project && c.id == conversation.id)
        {
            slot.1 = conversation.clone();
        } else {
            sessions.push((project.to_string(), conversation.clone()));
        }
        Ok(())
    }
}

fn harness() -> (Arc<ConduitRuntime>, Arc<MockClient>) {
    let runtime = Arc::new(ConduitRuntime::initialize(Settings::default()));
    let mock = Arc::new(MockClient::new());
    runtime
        .model_store()
        .register_client("mock-model", ExecutionMode::Async, mock.clone());
    (runtime, mock)
}

fn options() -> ConduitOptions {
    ConduitOptions {
        verbosity: Verbosity::Silent,
        console: Console::Null,
        ..ConduitOptions::new("pipeline-test")
    }
}

fn params() -> GenerationParams {
    GenerationParams::new("mock-model")
}

// ─── Scenarios ────────────────────────────────────────────────────────────────

/// Simple text completion, happy path: one provider call, one assistant
/// message with non-empty content, one token event.
#[tokio::test]
async fn simple_text_completion() {
    let (runtime, mock) = harness();
    let conduit = Conduit::new(Prompt::new("Name one mammal."), Arc::clone(&runtime));
    let conversation = conduit.run(None, &params(), &options()).await.unwrap();

    assert_eq!(mock.call_count(), 1);
    let last = conversation.last().unwrap();
    assert_eq!(last.role(), Role::Assistant);
    assert!(!last.text().is_empty());
    assert_eq!(runtime.odometer().with_session(|o| o.event_count()), 1);
}

/// Cache hit: the second identical run performs zero provider calls, returns
/// the identical text, and records no second token event.
#[tokio::test]
async fn second_identical_run_is_served_from_cache() {
    let (runtime, mock) = harness();
    let cache = Arc::new(ConduitCache::in_memory().unwrap());
    let mut opts = options();
    opts.cache = Some(cache);

    let conduit = Conduit::new(Prompt::new("Name one mammal."), Arc::clone(&runtime));
    let first = conduit.run(None, &params(), &opts).await.unwrap();
    let second = conduit.run(None, &params(), &opts).await.unwrap();

    assert_eq!(mock.call_count(), 1, "second run must not reach the provider");
    assert_eq!(first.last().unwrap().text(), second.last().unwrap().text());
    assert_eq!(runtime.odometer().with_session(|o| o.event_count()), 1);
}

/// Tool loop: USER → ASSISTANT(tool_call) → TOOL → ASSISTANT(final).
/// Two provider calls, one tool invocation.
#[tokio::test]
async fn tool_loop_round_trip() {
    let (runtime, mock) = harness();
    let mut args = serde_json::Map::new();
    args.insert("path".into(), serde_json::json!("/tmp"));
    mock.push_tool_call("ls", args);
    mock.push_text("The directory holds a.txt and b.txt.");

    let mut registry = ToolRegistry::new();
    registry.register(LsTool);
    let mut opts = options();
    opts.tool_registry = Some(Arc::new(registry));

    let conduit = Conduit::new(Prompt::new("What files are in /tmp?"), Arc::clone(&runtime));
    let conversation = conduit.run(None, &params(), &opts).await.unwrap();

    let roles: Vec<Role> = conversation.messages.iter().map(|m| m.role()).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]);
    assert_eq!(mock.call_count(), 2);
    match &conversation.messages[2] {
        Message::Tool { content, .. } => assert_eq!(content, "a.txt\nb.txt"),
        _ => panic!("expected a tool message"),
    }
}

/// Crash recovery: a stored session ending in a user turn is trimmed before
/// the new turn is appended; the finished conversation has five messages.
#[tokio::test]
async fn crash_recovery_replaces_dangling_user_turn() {
    let (runtime, _mock) = harness();
    let store = Arc::new(MemoryStore::default());

    let mut crashed = Conversation::new();
    crashed.add(Message::system("sys"));
    crashed.add(Message::user("hi"));
    crashed.add(Message::assistant("hello"));
    crashed.add(Message::user("what?"));
    store.save_session("pipeline-test", &crashed, None).await.unwrap();

    let mut opts = options();
    opts.repository = Some(store.clone());

    let conduit = Conduit::new(Prompt::new("how are you?"), Arc::clone(&runtime));
    let conversation = conduit.run(None, &params(), &opts).await.unwrap();

    assert_eq!(conversation.messages.len(), 5);
    assert_eq!(conversation.messages[3].text(), "how are you?");
    assert_eq!(conversation.last().unwrap().role(), Role::Assistant);

    // And the recovered session was persisted.
    let saved = store.last("pipeline-test").await.unwrap().unwrap();
    assert_eq!(saved.messages.len(), 5);
}

/// Bounded batch: 20 prompts at max_concurrent=4 — never more than 4
/// in-flight, all results in input order.
#[tokio::test]
async fn bounded_batch_preserves_order() {
    let runtime = Arc::new(ConduitRuntime::initialize(Settings::default()));
    let mock = Arc::new(MockClient::with_delay(std::time::Duration::from_millis(20)));
    runtime
        .model_store()
        .register_client("mock-model", ExecutionMode::Async, mock.clone());

    let prompts: Vec<String> = (0..20).map(|i| format!("prompt {i}")).collect();
    let batch = ConduitBatch::new(Arc::clone(&runtime));
    let results = batch
        .run(None, Some(prompts), &params(), &options(), Some(4))
        .await
        .unwrap();

    assert_eq!(results.len(), 20);
    assert!(mock.max_in_flight() <= 4, "saw {} in flight", mock.max_in_flight());
    for (i, conversation) in results.iter().enumerate() {
        assert_eq!(conversation.messages[0].text(), format!("prompt {i}"));
    }
    assert_eq!(runtime.odometer().with_session(|o| o.event_count()), 20);
}

/// Template rendering feeds the conversation verbatim.
#[tokio::test]
async fn template_variables_render_into_the_user_turn() {
    let (runtime, _mock) = harness();
    let conduit = Conduit::new(
        Prompt::new("Summarize {{topic}} in one line."),
        Arc::clone(&runtime),
    );
    let vars: HashMap<String, String> =
        [("topic".to_string(), "ownership".to_string())].into();
    let conversation = conduit.run(Some(&vars), &params(), &options()).await.unwrap();
    assert_eq!(
        conversation.messages[0].text(),
        "Summarize ownership in one line."
    );
}

/// Streaming early termination: the engine stops reading at the first
/// complete tool-call block, executes it, and finishes on the next turn.
#[tokio::test]
async fn streamed_tool_call_terminates_early_and_executes() {
    let (runtime, mock) = harness();
    let xml = "<function_calls><invoke name=\"ls\"><parameters><parameter name=\"path\">/tmp</parameter></parameters></invoke></function_calls>";
    let streamed = format!("Thinking... {xml} and more...");
    mock.push_reply(MockReply::Stream(
        streamed
            .as_bytes()
            .chunks(5)
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .collect(),
    ));
    mock.push_text("a.txt and b.txt.");

    let mut registry = ToolRegistry::new();
    registry.register(LsTool);
    let mut opts = options();
    opts.tool_registry = Some(Arc::new(registry));
    let mut p = params();
    p.stream = true;

    let conduit = Conduit::new(Prompt::new("What files are in /tmp?"), Arc::clone(&runtime));
    let conversation = conduit.run(None, &p, &opts).await.unwrap();

    let assistant = &conversation.messages[1];
    assert_eq!(assistant.text(), "Thinking...");
    assert!(!assistant.text().contains("and more"));
    assert_eq!(assistant.tool_calls()[0].function_name, "ls");
    assert_eq!(conversation.last().unwrap().text(), "a.txt and b.txt.");
}
