//! Integration test for the orchestration engine
//!
//! Drives all three protocols with a scripted model client and mock resource
//! providers.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use craftloop::orchestration::fulfillment::{RECOVERY_PROMPT, TRUNCATION_NOTE};
use craftloop::orchestration::{
    AbortSignal, CatalogEntry, ContextResourceProvider, DirectiveParser, EngineConfig,
    ExecutionEngine, ExecutionRequest, GuideLoader, LoadedResource, OrchestrationError,
    SessionStore, TagDirectiveParser,
};
use craftloop::provider::{
    ChatMessage, Completion, CompletionOptions, FinishReason, MessageRole, ModelClient, TokenUsage,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

enum Reply {
    Content(Completion),
    Fail(&'static str),
    Hang,
}

// Scripted model: pops one reply per call and records what it was sent
struct ScriptedModel {
    replies: Mutex<Vec<Reply>>,
    calls: Arc<Mutex<Vec<Vec<ChatMessage>>>>,
    options: Arc<Mutex<Vec<CompletionOptions>>>,
}

impl ScriptedModel {
    fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies),
            calls: Arc::new(Mutex::new(Vec::new())),
            options: Arc::new(Mutex::new(Vec::new())),
        })
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn call(&self, index: usize) -> Vec<ChatMessage> {
        self.calls.lock().unwrap()[index].clone()
    }

    fn last_user_message(&self, index: usize) -> String {
        self.call(index)
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        options: &CompletionOptions,
    ) -> Result<Completion> {
        self.calls.lock().unwrap().push(messages);
        self.options.lock().unwrap().push(options.clone());

        let reply = {
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                return Err(anyhow!("script exhausted"));
            }
            replies.remove(0)
        };

        match reply {
            Reply::Content(completion) => Ok(completion),
            Reply::Fail(message) => Err(anyhow!(message)),
            Reply::Hang => std::future::pending().await,
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

fn reply(text: &str, prompt_tokens: u64, completion_tokens: u64) -> Reply {
    Reply::Content(Completion::text(text).with_usage(TokenUsage::new(prompt_tokens, completion_tokens)))
}

fn guide_request(ids: &[&str]) -> String {
    format!("<guide-request>{}</guide-request>", serde_json::json!(ids))
}

fn context_request(ids: &[&str]) -> String {
    format!("<context-request>{}</context-request>", serde_json::json!(ids))
}

// Mock guide loader; ids without content fail to load
struct MockGuides {
    guides: HashMap<String, String>,
    catalog: Vec<String>,
}

impl MockGuides {
    fn new(guides: &[(&str, &str)], catalog: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            guides: guides
                .iter()
                .map(|(id, content)| (id.to_string(), content.to_string()))
                .collect(),
            catalog: catalog.iter().map(|id| id.to_string()).collect(),
        })
    }
}

#[async_trait]
impl GuideLoader for MockGuides {
    async fn load(&self, id: &str) -> Result<String> {
        self.guides
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow!("guide file missing: {}", id))
    }

    fn catalog(&self) -> Vec<String> {
        self.catalog.clone()
    }
}

// Mock context provider; unknown ids are omitted
struct MockContext {
    resources: Vec<LoadedResource>,
}

#[async_trait]
impl ContextResourceProvider for MockContext {
    async fn load_many(&self, ids: &[String]) -> Vec<LoadedResource> {
        ids.iter()
            .filter_map(|id| self.resources.iter().find(|r| &r.id == id).cloned())
            .collect()
    }

    fn catalog(&self) -> Vec<CatalogEntry> {
        self.resources
            .iter()
            .map(|r| CatalogEntry {
                id: r.id.clone(),
                group: r.group.clone(),
            })
            .collect()
    }
}

fn context_provider() -> Arc<MockContext> {
    Arc::new(MockContext {
        resources: vec![
            LoadedResource::new("mara", "Dockworker, 34, distrusts the harbor master.", "characters")
                .with_origin("notes/characters/mara.md"),
            LoadedResource::new("chapter-2", "The storm reaches the quay at dusk.", "chapters"),
        ],
    })
}

fn engine(model: Arc<ScriptedModel>, config: EngineConfig) -> ExecutionEngine {
    ExecutionEngine::new(model, config).unwrap()
}

fn guide_request_for(prompt: &str) -> ExecutionRequest {
    ExecutionRequest::new("analysis", prompt).with_system_prompt("You are a developmental editor.")
}

#[tokio::test]
async fn test_guide_loop_three_turns() {
    let model = ScriptedModel::new(vec![
        reply(&guide_request(&["pacing"]), 10, 5),
        Reply::Content(
            Completion::text(guide_request(&["voice"]))
                .with_usage(TokenUsage::new(20, 5).with_cost(0.01)),
        ),
        reply("The scene drags in the middle third.", 30, 10),
    ]);
    let guides = MockGuides::new(
        &[("pacing", "Vary sentence length."), ("voice", "Keep diction consistent.")],
        &["pacing", "voice", "dialogue"],
    );
    let engine = engine(model.clone(), EngineConfig::default()).with_guide_loader(guides);

    let result = engine
        .run_with_guides(guide_request_for("Review this scene."))
        .await
        .unwrap();

    assert_eq!(model.call_count(), 3);
    assert_eq!(result.turns, 3);
    assert_eq!(result.content, "The scene drags in the middle third.");
    assert_eq!(result.used_ids, vec!["pacing", "voice"]);
    assert!(!result.turn_ceiling_reached);

    let usage = result.usage.unwrap();
    assert_eq!(usage.prompt_tokens, 60);
    assert_eq!(usage.completion_tokens, 20);
    assert_eq!(usage.total_tokens, 80);
    assert_eq!(usage.cost_usd, Some(0.01));

    // Catalog is offered on the first turn only
    let first = model.call(0);
    assert_eq!(first[0].role, MessageRole::System);
    assert!(first[1].content.starts_with("Review this scene."));
    assert!(first[1].content.contains("## Available craft guides"));
    assert!(first[1].content.contains("- dialogue"));

    // system, then strictly alternating user/assistant
    let third = model.call(2);
    let roles: Vec<MessageRole> = third.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![
            MessageRole::System,
            MessageRole::User,
            MessageRole::Assistant,
            MessageRole::User,
            MessageRole::Assistant,
            MessageRole::User,
        ]
    );
    assert!(third[3].content.contains("### Guide: pacing\n\nVary sentence length."));
    assert!(third[5].content.contains("### Guide: voice"));

    assert!(engine.sessions().is_empty());
}

#[tokio::test]
async fn test_guide_loop_runaway_model_stops_at_ceiling() {
    let directive = guide_request(&["pacing"]);
    let model = ScriptedModel::new(vec![
        reply(&directive, 1, 1),
        reply(&directive, 1, 1),
        reply(&directive, 1, 1),
        reply("never reached", 1, 1),
    ]);
    let guides = MockGuides::new(&[("pacing", "Vary sentence length.")], &["pacing"]);
    let engine = engine(model.clone(), EngineConfig::default()).with_guide_loader(guides);

    let result = engine
        .run_with_guides(guide_request_for("Review this scene."))
        .await
        .unwrap();

    assert_eq!(model.call_count(), 3);
    assert_eq!(result.turns, 3);
    assert!(result.turn_ceiling_reached);
    assert_eq!(result.content, "");
    // The third request was never fulfilled
    assert_eq!(result.used_ids, vec!["pacing", "pacing"]);
    assert!(engine.sessions().is_empty());
}

#[tokio::test]
async fn test_configured_turn_ceiling() {
    let directive = guide_request(&["pacing"]);
    let model = ScriptedModel::new(vec![reply(&directive, 1, 1), reply(&directive, 1, 1)]);
    let guides = MockGuides::new(&[("pacing", "Vary sentence length.")], &["pacing"]);
    let engine = engine(model.clone(), EngineConfig::default().with_max_turns(1))
        .with_guide_loader(guides);

    let result = engine
        .run_with_guides(guide_request_for("Review this scene."))
        .await
        .unwrap();

    assert_eq!(model.call_count(), 1);
    assert!(result.turn_ceiling_reached);
    assert!(result.used_ids.is_empty());
}

#[tokio::test]
async fn test_immediate_completion() {
    let model = ScriptedModel::new(vec![reply("Tight and well paced.", 12, 4)]);
    let guides = MockGuides::new(&[("pacing", "Vary sentence length.")], &["pacing"]);
    let engine = engine(model.clone(), EngineConfig::default()).with_guide_loader(guides);

    let result = engine
        .run_with_guides(guide_request_for("Review this scene."))
        .await
        .unwrap();

    assert_eq!(model.call_count(), 1);
    assert_eq!(result.turns, 1);
    assert!(result.used_ids.is_empty());
    assert_eq!(result.content, "Tight and well paced.");
    assert_eq!(result.usage, Some(TokenUsage::new(12, 4)));
}

#[tokio::test]
async fn test_malformed_directive_is_not_fetched() {
    let model = ScriptedModel::new(vec![reply(
        "Looks fine. <guide-request>[\"pacing\",</guide-request>",
        1,
        1,
    )]);
    let guides = MockGuides::new(&[("pacing", "Vary sentence length.")], &["pacing"]);
    let engine = engine(model.clone(), EngineConfig::default()).with_guide_loader(guides);

    let result = engine
        .run_with_guides(guide_request_for("Review this scene."))
        .await
        .unwrap();

    assert_eq!(model.call_count(), 1);
    assert_eq!(result.content, "Looks fine.");
    assert!(result.used_ids.is_empty());
    assert!(!result.turn_ceiling_reached);
}

#[tokio::test]
async fn test_guides_disabled_degrades_to_single_turn() {
    let model = ScriptedModel::new(vec![reply("Plain answer.", 1, 1)]);
    let guides = MockGuides::new(&[("pacing", "Vary sentence length.")], &["pacing"]);
    let engine = engine(model.clone(), EngineConfig::default()).with_guide_loader(guides);

    let result = engine
        .run_with_guides(guide_request_for("Review this scene.").without_guides())
        .await
        .unwrap();

    assert_eq!(model.call_count(), 1);
    assert_eq!(model.call(0)[1].content, "Review this scene.");
    assert_eq!(result.content, "Plain answer.");
}

#[tokio::test]
async fn test_context_protocol_recovery_turn() {
    let model = ScriptedModel::new(vec![
        reply(&context_request(&["mara"]), 5, 5),
        reply(&context_request(&["harbor"]), 5, 5),
        reply(&context_request(&["mara", "chapter-2"]), 5, 5),
        reply("Briefing: Mara works the docks as the storm arrives.", 5, 5),
    ]);
    let engine = engine(model.clone(), EngineConfig::default())
        .with_context_provider(context_provider());

    let result = engine
        .run_with_context(ExecutionRequest::new("briefing", "Write a context briefing."))
        .await
        .unwrap();

    assert_eq!(model.call_count(), 4);
    assert_eq!(result.turns, 4);
    assert!(result.turn_ceiling_reached);
    assert!(result.recovered);
    assert_eq!(result.content, "Briefing: Mara works the docks as the storm arrives.");
    // Only the first request was fulfilled before the ceiling
    assert_eq!(result.used_ids, vec!["mara"]);
    assert_eq!(result.usage.unwrap().total_tokens, 40);

    assert!(model
        .last_user_message(1)
        .contains("### mara\nGroup: characters | Origin: notes/characters/mara.md"));
    assert!(model
        .last_user_message(2)
        .starts_with("None of the requested context resources were found (harbor)"));
    assert_eq!(model.last_user_message(3), RECOVERY_PROMPT);
    assert!(engine.sessions().is_empty());
}

#[tokio::test]
async fn test_context_lists_missing_ids() {
    let model = ScriptedModel::new(vec![
        reply(&context_request(&["mara", "harbor"]), 1, 1),
        reply("Briefing.", 1, 1),
    ]);
    let engine = engine(model.clone(), EngineConfig::default())
        .with_context_provider(context_provider());

    let result = engine
        .run_with_context(ExecutionRequest::new("briefing", "Write a context briefing."))
        .await
        .unwrap();

    assert!(!result.recovered);
    assert_eq!(result.used_ids, vec!["mara"]);
    assert!(model
        .last_user_message(1)
        .contains("Requested but not found: harbor."));
}

#[tokio::test]
async fn test_context_catalog_is_not_injected_into_prompt() {
    let model = ScriptedModel::new(vec![reply("Briefing.", 1, 1)]);
    let engine = engine(model.clone(), EngineConfig::default())
        .with_context_provider(context_provider());

    engine
        .run_with_context(
            ExecutionRequest::new("briefing", "Write a context briefing.")
                .with_system_prompt("You write briefings."),
        )
        .await
        .unwrap();

    let first = model.call(0);
    assert_eq!(first.len(), 2);
    assert_eq!(first[1].content, "Write a context briefing.");
    assert!(!first.iter().any(|m| m.content.contains("chapter-2")));
}

#[tokio::test]
async fn test_context_without_provider_is_rejected() {
    let model = ScriptedModel::new(vec![]);
    let engine = engine(model.clone(), EngineConfig::default());

    let err = engine
        .run_with_context(ExecutionRequest::new("briefing", "Write a context briefing."))
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestrationError::InvalidConfig { .. }));
    assert_eq!(model.call_count(), 0);
}

#[tokio::test]
async fn test_guide_content_trimmed_to_budget() {
    let long_guide = (0..120).map(|i| format!("word{}", i)).collect::<Vec<_>>().join(" ");
    let model = ScriptedModel::new(vec![
        reply(&guide_request(&["pacing"]), 1, 1),
        reply("Done.", 1, 1),
    ]);
    let guides = MockGuides::new(&[("pacing", long_guide.as_str())], &["pacing"]);
    let engine = engine(model.clone(), EngineConfig::default().with_word_budgets(40, 40))
        .with_guide_loader(guides);

    engine
        .run_with_guides(guide_request_for("Review this scene."))
        .await
        .unwrap();

    let turn = model.last_user_message(1);
    assert!(turn.contains("[Note: guide content was trimmed from 123 to 40 words to fit the 40-word budget.]"));
    assert!(turn.contains("word36"));
    assert!(!turn.contains("word37"));
}

#[tokio::test]
async fn test_context_content_trimmed_to_budget() {
    let long_chapter = (0..100).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ");
    let provider = Arc::new(MockContext {
        resources: vec![LoadedResource::new("chapter-9", long_chapter, "chapters")],
    });
    let model = ScriptedModel::new(vec![
        reply(&context_request(&["chapter-9"]), 1, 1),
        reply("Briefing.", 1, 1),
    ]);
    let engine = engine(model.clone(), EngineConfig::default().with_word_budgets(50_000, 30))
        .with_context_provider(provider);

    let result = engine
        .run_with_context(ExecutionRequest::new("briefing", "Write a context briefing."))
        .await
        .unwrap();
    assert_eq!(result.used_ids, vec!["chapter-9"]);

    // Header words count toward the budget: "### chapter-9", "Group: chapters"
    let turn = model.last_user_message(1);
    assert!(turn.contains(
        "[Note: context resource content was trimmed from 104 to 30 words to fit the 30-word budget.]"
    ));
    assert!(turn.contains("w25"));
    assert!(!turn.contains("w26"));
}

#[tokio::test]
async fn test_recovery_response_still_requesting_is_stripped() {
    let model = ScriptedModel::new(vec![
        reply(&context_request(&["mara"]), 1, 1),
        reply(
            &format!("Final briefing from what I have.\n{}", context_request(&["harbor"])),
            1,
            1,
        ),
    ]);
    let engine = engine(model.clone(), EngineConfig::default().with_max_turns(1))
        .with_context_provider(context_provider());

    let result = engine
        .run_with_context(ExecutionRequest::new("briefing", "Write a context briefing."))
        .await
        .unwrap();

    assert_eq!(model.call_count(), 2);
    assert_eq!(model.last_user_message(1), RECOVERY_PROMPT);
    assert_eq!(result.turns, 2);
    assert!(result.turn_ceiling_reached);
    assert!(result.recovered);
    assert!(result.used_ids.is_empty());
    assert_eq!(result.content, "Final briefing from what I have.");
    assert!(engine.sessions().is_empty());
}

// Loaders that never finish
struct StalledGuides;

#[async_trait]
impl GuideLoader for StalledGuides {
    async fn load(&self, _id: &str) -> Result<String> {
        std::future::pending().await
    }
}

struct StalledContext;

#[async_trait]
impl ContextResourceProvider for StalledContext {
    async fn load_many(&self, _ids: &[String]) -> Vec<LoadedResource> {
        std::future::pending().await
    }
}

#[tokio::test(start_paused = true)]
async fn test_abort_during_guide_load() {
    let model = ScriptedModel::new(vec![reply(&guide_request(&["pacing"]), 1, 1)]);
    let engine = engine(model.clone(), EngineConfig::default()).with_guide_loader(Arc::new(StalledGuides));
    let signal = AbortSignal::new();

    let request = guide_request_for("Review this scene.").with_cancel(signal.clone());
    let (outcome, _) = tokio::join!(engine.run_with_guides(request), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.abort("user cancelled");
    });

    let err = outcome.unwrap_err();
    assert!(matches!(&err, OrchestrationError::Cancelled { reason } if reason == "user cancelled"));
    assert_eq!(model.call_count(), 1);
    assert!(engine.sessions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_abort_during_context_load() {
    let model = ScriptedModel::new(vec![reply(&context_request(&["mara"]), 1, 1)]);
    let engine = engine(model.clone(), EngineConfig::default())
        .with_context_provider(Arc::new(StalledContext));
    let signal = AbortSignal::new();

    let request = ExecutionRequest::new("briefing", "Write a context briefing.").with_cancel(signal.clone());
    let (outcome, _) = tokio::join!(engine.run_with_context(request), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.abort("user cancelled");
    });

    let err = outcome.unwrap_err();
    assert!(matches!(&err, OrchestrationError::Cancelled { reason } if reason == "user cancelled"));
    assert_eq!(model.call_count(), 1);
    assert!(engine.sessions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_timeout_during_context_load() {
    let model = ScriptedModel::new(vec![reply(&context_request(&["mara"]), 1, 1)]);
    let engine = engine(model.clone(), EngineConfig::default())
        .with_context_provider(Arc::new(StalledContext));

    let err = engine
        .run_with_context(
            ExecutionRequest::new("briefing", "Write a context briefing.")
                .with_timeout(Duration::from_millis(250)),
        )
        .await
        .unwrap_err();

    assert!(matches!(&err, OrchestrationError::Cancelled { reason } if reason == "timed out after 250ms"));
    assert!(engine.sessions().is_empty());
}

#[test]
fn test_strip_is_idempotent() {
    let parser = TagDirectiveParser::guides();

    let plain = "  No directives here.\n\nJust prose.  ";
    assert_eq!(parser.strip(plain), plain);

    let with_directive = "Before. <guide-request>[\"pacing\"]</guide-request> After.";
    let once = parser.strip(with_directive);
    assert_eq!(parser.strip(&once), once);
}

#[tokio::test]
async fn test_pre_aborted_signal_makes_no_calls() {
    let model = ScriptedModel::new(vec![reply("unused", 1, 1)]);
    let store = SessionStore::new();
    let engine = engine(model.clone(), EngineConfig::default()).with_sessions(store.clone());

    let signal = AbortSignal::new();
    signal.abort("user closed the panel");

    let err = engine
        .run_single_turn(ExecutionRequest::new("summary", "Summarize.").with_cancel(signal))
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(err.to_string(), "Cancelled: user closed the panel");
    assert_eq!(model.call_count(), 0);
    assert!(store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_abort_during_pending_call() {
    let model = ScriptedModel::new(vec![Reply::Hang]);
    let guides = MockGuides::new(&[], &["pacing"]);
    let engine = engine(model.clone(), EngineConfig::default()).with_guide_loader(guides);
    let signal = AbortSignal::new();

    let request = guide_request_for("Review this scene.").with_cancel(signal.clone());
    let (outcome, _) = tokio::join!(engine.run_with_guides(request), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.abort("user cancelled");
    });

    let err = outcome.unwrap_err();
    assert!(matches!(&err, OrchestrationError::Cancelled { reason } if reason == "user cancelled"));
    assert_eq!(model.call_count(), 1);
    assert!(engine.sessions().is_empty());

    // The in-flight request saw the unified token fire
    let options = model.options.lock().unwrap();
    assert!(options[0].cancellation.as_ref().unwrap().is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn test_timeout_cancels_call() {
    let model = ScriptedModel::new(vec![Reply::Hang]);
    let engine = engine(model.clone(), EngineConfig::default());

    let err = engine
        .run_single_turn(
            ExecutionRequest::new("summary", "Summarize.").with_timeout(Duration::from_millis(250)),
        )
        .await
        .unwrap_err();

    assert!(matches!(&err, OrchestrationError::Cancelled { reason } if reason == "timed out after 250ms"));
    assert!(engine.sessions().is_empty());
}

#[tokio::test]
async fn test_partial_guide_failure() {
    let model = ScriptedModel::new(vec![
        reply(&guide_request(&["pacing", "broken"]), 1, 1),
        reply("Done.", 1, 1),
    ]);
    let guides = MockGuides::new(&[("pacing", "Vary sentence length.")], &["pacing", "broken"]);
    let engine = engine(model.clone(), EngineConfig::default()).with_guide_loader(guides);

    let result = engine
        .run_with_guides(guide_request_for("Review this scene."))
        .await
        .unwrap();

    assert_eq!(result.used_ids, vec!["pacing", "broken"]);
    assert_eq!(result.content, "Done.");

    let turn = model.last_user_message(1);
    assert!(turn.contains("### Guide: pacing\n\nVary sentence length."));
    assert!(turn.contains("[Guide \"broken\" could not be loaded: guide file missing: broken]"));
    assert!(!turn.contains("[Guide \"pacing\" could not be loaded"));
}

#[tokio::test]
async fn test_model_failure_propagates_and_cleans_up() {
    let model = ScriptedModel::new(vec![Reply::Fail("502 bad gateway")]);
    let engine = engine(model.clone(), EngineConfig::default());

    let err = engine
        .run_single_turn(ExecutionRequest::new("summary", "Summarize."))
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestrationError::Model(_)));
    assert!(err.to_string().contains("502 bad gateway"));
    assert_eq!(model.call_count(), 1);
    assert!(engine.sessions().is_empty());
}

#[tokio::test]
async fn test_truncation_note_appended() {
    let model = ScriptedModel::new(vec![Reply::Content(
        Completion::text("The chapter opens on").with_finish_reason(FinishReason::Length),
    )]);
    let engine = engine(model.clone(), EngineConfig::default());

    let result = engine
        .run_single_turn(ExecutionRequest::new("summary", "Summarize."))
        .await
        .unwrap();

    assert!(result.truncated);
    assert_eq!(result.content, format!("The chapter opens on\n\n{}", TRUNCATION_NOTE));
}

#[tokio::test]
async fn test_usage_and_status_callbacks() {
    let model = ScriptedModel::new(vec![
        reply(&guide_request(&["pacing"]), 10, 2),
        reply("Done.", 20, 3),
    ]);
    let guides = MockGuides::new(&[("pacing", "Vary sentence length.")], &["pacing"]);

    let deltas = Arc::new(Mutex::new(Vec::new()));
    let statuses = Arc::new(Mutex::new(Vec::new()));
    let deltas_sink = deltas.clone();
    let statuses_sink = statuses.clone();

    let engine = engine(model.clone(), EngineConfig::default())
        .with_guide_loader(guides)
        .with_usage_callback(Arc::new(move |delta: &TokenUsage| {
            deltas_sink.lock().unwrap().push(delta.clone());
        }))
        .with_status_callback(Arc::new(move |message: &str, ticker: Option<&str>| {
            statuses_sink
                .lock()
                .unwrap()
                .push((message.to_string(), ticker.map(str::to_string)));
        }));

    let result = engine
        .run_with_guides(guide_request_for("Review this scene."))
        .await
        .unwrap();

    let deltas = deltas.lock().unwrap();
    assert_eq!(*deltas, vec![TokenUsage::new(10, 2), TokenUsage::new(20, 3)]);
    assert_eq!(result.usage, Some(TokenUsage::new(30, 5)));

    let statuses = statuses.lock().unwrap();
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].1.as_deref(), Some("pacing"));
}

#[tokio::test]
async fn test_streaming_path_matches_complete() {
    let model = ScriptedModel::new(vec![
        reply(&guide_request(&["pacing"]), 1, 1),
        reply("Streamed answer.", 1, 1),
    ]);
    let guides = MockGuides::new(&[("pacing", "Vary sentence length.")], &["pacing"]);
    let engine = engine(model.clone(), EngineConfig::default().with_streaming(true))
        .with_guide_loader(guides);

    let result = engine
        .run_with_guides(guide_request_for("Review this scene."))
        .await
        .unwrap();

    assert_eq!(result.content, "Streamed answer.");
    assert_eq!(result.used_ids, vec!["pacing"]);
    assert_eq!(result.usage.unwrap().total_tokens, 4);
}

#[tokio::test]
async fn test_concurrent_calls_use_separate_sessions() {
    let model = ScriptedModel::new(vec![reply("first", 1, 1), reply("second", 1, 1)]);
    let engine = engine(model.clone(), EngineConfig::default());

    let (a, b) = tokio::join!(
        engine.run_single_turn(ExecutionRequest::new("a", "Prompt A")),
        engine.run_single_turn(ExecutionRequest::new("b", "Prompt B")),
    );

    let mut contents = vec![a.unwrap().content, b.unwrap().content];
    contents.sort();
    assert_eq!(contents, vec!["first", "second"]);
    for index in 0..2 {
        assert_eq!(model.call(index).len(), 1);
    }
    assert!(engine.sessions().is_empty());
}
