//! End-to-end stage runs over the in-memory store with scripted
//! providers. No network access.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use solace_domain::config::{Config, SpeechStrategy};
use solace_domain::error::{Error, Result};
use solace_domain::records::{
    ConversationRecord, MessageRecord, NewMessage, SenderRole, StageStatus,
};
use solace_domain::stream::{BoxStream, StreamEvent};
use solace_domain::tool::{Role, ToolCall};
use solace_gateway::cli::sweep;
use solace_gateway::runtime::dispatch::{self, Job, JobKind, Outcome};
use solace_gateway::runtime::speech::{self, PlaybackError};
use solace_gateway::runtime::{context, edit, prompts, reaper, reply, summarize};
use solace_gateway::state::AppState;
use solace_providers::{
    ChatRequest, ChatResponse, LlmProvider, ProviderRegistry, SpeechSynthesizer, SpeechToText,
};
use solace_store::{ChangeFeed, ChangeKind, MemoryStore, MessageFilter, RecordStore};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fakes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

type Script = dyn Fn(usize, &ChatRequest) -> ChatResponse + Send + Sync;

/// Registered as `openai` so the default model specs resolve to it.
struct FakeLlm {
    calls: AtomicUsize,
    requests: Mutex<Vec<ChatRequest>>,
    script: Box<Script>,
    delay: Duration,
    /// Ends every stream with this error instead of `Done`.
    stream_error: Option<&'static str>,
}

impl FakeLlm {
    fn new(script: impl Fn(usize, &ChatRequest) -> ChatResponse + Send + Sync + 'static) -> Arc<Self> {
        Self::slow(Duration::ZERO, script)
    }

    fn slow(
        delay: Duration,
        script: impl Fn(usize, &ChatRequest) -> ChatResponse + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            script: Box::new(script),
            delay,
            stream_error: None,
        })
    }

    /// Streams `text` token by token, then fails.
    fn cut_off(text: &'static str, error: &'static str) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            script: Box::new(move |_, _| text_response(text)),
            delay: Duration::ZERO,
            stream_error: Some(error),
        })
    }

    fn replying(text: &'static str) -> Arc<Self> {
        Self::new(move |_, _| text_response(text))
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait::async_trait]
impl LlmProvider for FakeLlm {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(req.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok((self.script)(n, req))
    }

    async fn chat_stream(&self, req: &ChatRequest) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let resp = self.chat(req).await?;
        let mut events: Vec<Result<StreamEvent>> = resp
            .content
            .split_inclusive(' ')
            .map(|t| Ok(StreamEvent::Token { text: t.to_owned() }))
            .collect();
        for call in resp.tool_calls {
            events.push(Ok(StreamEvent::ToolCallFinished {
                call_id: call.call_id,
                tool_name: call.tool_name,
                arguments: call.arguments,
            }));
        }
        events.push(Ok(match self.stream_error {
            Some(message) => StreamEvent::Error {
                message: message.into(),
            },
            None => StreamEvent::Done {
                usage: resp.usage,
                finish_reason: resp.finish_reason,
            },
        }));
        Ok(Box::pin(futures_util::stream::iter(events)))
    }

    fn provider_id(&self) -> &str {
        "openai"
    }
}

fn text_response(text: &str) -> ChatResponse {
    ChatResponse {
        content: text.into(),
        model: "fake".into(),
        finish_reason: Some("stop".into()),
        ..Default::default()
    }
}

fn tool_response(content: &str, tool: &str, arguments: serde_json::Value) -> ChatResponse {
    ChatResponse {
        content: content.into(),
        tool_calls: vec![ToolCall {
            call_id: "call_1".into(),
            tool_name: tool.into(),
            arguments,
        }],
        model: "fake".into(),
        finish_reason: Some("tool_calls".into()),
        ..Default::default()
    }
}

struct FakeStt(Option<&'static str>);

#[async_trait::async_trait]
impl SpeechToText for FakeStt {
    async fn transcribe(&self, audio: Vec<u8>, _file_name: &str) -> Result<String> {
        assert!(!audio.is_empty());
        self.0.map(str::to_owned).ok_or_else(|| Error::Provider {
            provider: "whisper".into(),
            message: "HTTP 500".into(),
        })
    }
}

#[derive(Default)]
struct FakeTts {
    fail: bool,
    voices: Mutex<Vec<String>>,
}

impl FakeTts {
    fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Default::default()
        })
    }

    fn check(&self, voice_id: &str) -> Result<()> {
        self.voices.lock().push(voice_id.to_owned());
        if self.fail {
            return Err(Error::Timeout("tts".into()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl SpeechSynthesizer for FakeTts {
    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<Vec<u8>> {
        self.check(voice_id)?;
        Ok(format!("mp3:{text}").into_bytes())
    }

    async fn synthesize_stream(
        &self,
        text: &str,
        voice_id: &str,
    ) -> Result<BoxStream<'static, Result<Vec<u8>>>> {
        self.check(voice_id)?;
        let chunks = vec![Ok(b"ID3".to_vec()), Ok(text.as_bytes().to_vec())];
        Ok(Box::pin(futures_util::stream::iter(chunks)))
    }

    fn default_voice(&self) -> Option<&str> {
        Some("default-voice")
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Harness
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Harness {
    state: AppState,
    store: Arc<MemoryStore>,
    llm: Arc<FakeLlm>,
    tts: Arc<FakeTts>,
    rx: mpsc::Receiver<Job>,
}

fn harness(llm: Arc<FakeLlm>) -> Harness {
    harness_with(llm, Arc::new(FakeTts::default()), |_| {})
}

fn harness_with(llm: Arc<FakeLlm>, tts: Arc<FakeTts>, tweak: impl FnOnce(&mut Config)) -> Harness {
    let mut config = Config::default();
    config.reply.stream_flush_ms = 0;
    tweak(&mut config);

    let store = Arc::new(MemoryStore::new());
    let registry = Arc::new(ProviderRegistry::from_providers(vec![
        llm.clone() as Arc<dyn LlmProvider>
    ]));
    let (mut state, rx) = AppState::new(
        Arc::new(config),
        store.clone(),
        store.clone(),
        registry,
        Arc::new(FakeStt(Some("I slept badly again"))),
        tts.clone(),
    );
    state.memory = Some(store.clone());
    Harness {
        state,
        store,
        llm,
        tts,
        rx,
    }
}

fn conversation(store: &MemoryStore, id: &str, voice: bool) -> ConversationRecord {
    let mut c = ConversationRecord::new(id);
    c.voice_enabled = voice;
    store.put_conversation(c.clone());
    c
}

fn blank_row(conversation_id: &str, id: &str, role: SenderRole, minutes_ago: i64) -> MessageRecord {
    MessageRecord {
        id: id.into(),
        conversation_id: conversation_id.into(),
        sender_role: role,
        audio_path: None,
        transcription: None,
        assistant_text: None,
        transcription_status: None,
        ai_status: None,
        tts_status: None,
        ai_started: false,
        invalidated: false,
        created_at: Utc::now() - chrono::Duration::minutes(minutes_ago),
        updated_at: None,
        edited_at: None,
        tts_path: None,
        snippet_url: None,
    }
}

/// A finished turn, as history.
fn history_row(conversation_id: &str, id: &str, role: SenderRole, text: &str, minutes_ago: i64) -> MessageRecord {
    let mut row = blank_row(conversation_id, id, role, minutes_ago);
    row.ai_status = Some(StageStatus::Done);
    row.ai_started = true;
    match role {
        SenderRole::User => {
            row.transcription = Some(text.into());
            row.transcription_status = Some(StageStatus::Done);
        }
        SenderRole::Assistant => {
            row.assistant_text = Some(text.into());
            row.tts_status = Some(StageStatus::Done);
        }
    }
    row
}

/// A typed user turn waiting for its reply.
fn pending_user(store: &MemoryStore, conversation_id: &str, id: &str, text: &str) -> MessageRecord {
    let mut row = blank_row(conversation_id, id, SenderRole::User, 1);
    row.transcription = Some(text.into());
    row.transcription_status = Some(StageStatus::Done);
    row.ai_status = Some(StageStatus::Pending);
    store.put_message(row.clone());
    row
}

async fn assistant_rows(store: &MemoryStore, conversation_id: &str) -> Vec<MessageRecord> {
    store
        .select_messages(&MessageFilter::conversation(conversation_id).role(SenderRole::Assistant))
        .await
        .unwrap()
}

async fn message(store: &MemoryStore, id: &str) -> MessageRecord {
    store.get_message(id).await.unwrap().unwrap()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Claim
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reply_runs_call_model_once() {
    let llm = FakeLlm::slow(Duration::from_millis(30), |_, _| {
        text_response("That sounds like a heavy week. What felt hardest?")
    });
    let h = harness(llm);
    conversation(&h.store, "c1", false);
    pending_user(&h.store, "c1", "u1", "Work has been a lot this week.");

    let runs: Vec<_> = (0..8)
        .map(|_| {
            let state = h.state.clone();
            tokio::spawn(async move { reply::run(&state, "u1").await })
        })
        .collect();
    let mut completed = 0;
    for run in runs {
        if matches!(run.await.unwrap(), Outcome::Completed(_)) {
            completed += 1;
        }
    }

    assert_eq!(completed, 1);
    assert_eq!(h.llm.calls(), 1);
    let replies = assistant_rows(&h.store, "c1").await;
    assert_eq!(replies.len(), 1);
    assert_eq!(
        replies[0].assistant_text.as_deref(),
        Some("That sounds like a heavy week. What felt hardest?")
    );
    assert_eq!(replies[0].ai_status, Some(StageStatus::Done));
    assert_eq!(message(&h.store, "u1").await.ai_status, Some(StageStatus::Done));
}

#[tokio::test]
async fn claimed_turn_is_not_reprocessed() {
    let h = harness(FakeLlm::replying("I'm here with you."));
    conversation(&h.store, "c1", false);
    pending_user(&h.store, "c1", "u1", "Hi.");

    assert!(matches!(reply::run(&h.state, "u1").await, Outcome::Completed(None)));
    assert_eq!(reply::run(&h.state, "u1").await, Outcome::Skipped("not awaiting reply"));
    assert_eq!(h.llm.calls(), 1);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context and summaries
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn long_history_is_rolled_into_one_summary_turn() {
    let h = harness(FakeLlm::replying("we talked about sleep and work stress"));
    let conv = conversation(&h.store, "c1", false);
    for i in 0..25 {
        let role = if i % 2 == 0 { SenderRole::User } else { SenderRole::Assistant };
        h.store
            .put_message(history_row("c1", &format!("m{i:02}"), role, &format!("turn {i}"), 100 - i));
    }

    let prompt = context::build(&h.state, &conv, false).await.unwrap();

    let preamble = prompts::preamble(false).len();
    assert_eq!(prompt.len(), preamble + 1 + 10);
    assert_eq!(
        prompt[preamble].text(),
        "Summary of earlier conversation: we talked about sleep and work stress"
    );
    assert_eq!(prompt[preamble + 1].text(), "turn 15");
    assert_eq!(prompt.last().unwrap().text(), "turn 24");

    assert_eq!(h.llm.calls(), 1);
    let summary_req = &h.llm.requests()[0];
    let last = summary_req.messages.last().unwrap();
    assert_eq!(last.role, Role::User);
    assert_eq!(last.text(), prompts::ROLLING_SUMMARY_REQUEST);
    // preamble + the 15 older turns + the request
    assert_eq!(summary_req.messages.len(), preamble + 15 + 1);
}

#[tokio::test]
async fn stale_memory_is_cleared_before_building() {
    let h = harness(FakeLlm::replying("unused"));
    let mut conv = ConversationRecord::new("c1");
    conv.memory_summary = Some("old topic".into());
    conv.needs_resummarization = true;
    h.store.put_conversation(conv.clone());

    let prompt = context::build(&h.state, &conv, false).await.unwrap();
    assert!(prompt.iter().all(|m| !m.text().contains("old topic")));

    let stored = h.store.get_conversation("c1").await.unwrap().unwrap();
    assert!(stored.memory_summary.is_none());
    assert!(!stored.needs_resummarization);
}

#[tokio::test]
async fn summary_needs_four_assistant_turns() {
    let h = harness(FakeLlm::replying("\"The grief after moving cities.\""));
    conversation(&h.store, "c1", false);
    for i in 0..3 {
        h.store
            .put_message(history_row("c1", &format!("u{i}"), SenderRole::User, "hello", 60 - 2 * i));
        h.store.put_message(history_row(
            "c1",
            &format!("a{i}"),
            SenderRole::Assistant,
            "I hear you.",
            59 - 2 * i,
        ));
    }

    let none = summarize::summarize_conversation(&h.state, "c1").await.unwrap();
    assert!(none.is_none());
    assert_eq!(h.llm.calls(), 0);

    h.store
        .put_message(history_row("c1", "a3", SenderRole::Assistant, "Take your time.", 1));
    let some = summarize::summarize_conversation(&h.state, "c1").await.unwrap();
    assert_eq!(some.as_deref(), Some("grief after moving cities"));
    assert_eq!(h.llm.calls(), 1);

    let stored = h.store.get_conversation("c1").await.unwrap().unwrap();
    assert_eq!(stored.memory_summary.as_deref(), Some("grief after moving cities"));
}

#[tokio::test]
async fn summarize_unknown_conversation_is_not_found() {
    let h = harness(FakeLlm::replying("unused"));
    let err = summarize::summarize_existing(&h.state, "nope").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Reaper
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn reaper_closes_only_idle_conversations() {
    let h = harness(FakeLlm::replying("work deadlines"));
    let now = Utc::now();

    let mut idle = ConversationRecord::new("idle");
    idle.updated_at = now - chrono::Duration::hours(2);
    h.store.put_conversation(idle);
    for i in 0..4 {
        h.store.put_message(history_row("idle", &format!("iu{i}"), SenderRole::User, "hi", 200 - 2 * i));
        h.store.put_message(history_row(
            "idle",
            &format!("ia{i}"),
            SenderRole::Assistant,
            "hello",
            199 - 2 * i,
        ));
    }

    let mut recent = ConversationRecord::new("recent");
    recent.updated_at = now - chrono::Duration::minutes(30);
    h.store.put_conversation(recent);

    assert_eq!(reaper::close_idle(&h.state, now).await.unwrap(), 1);

    let idle = h.store.get_conversation("idle").await.unwrap().unwrap();
    assert!(idle.ended);
    assert_eq!(idle.memory_summary.as_deref(), Some("work deadlines"));
    assert!(!h.store.get_conversation("recent").await.unwrap().unwrap().ended);

    // Already ended: not picked up again.
    assert_eq!(reaper::close_idle(&h.state, now).await.unwrap(), 0);
    assert_eq!(h.llm.calls(), 1);
}

#[tokio::test]
async fn reaper_closes_even_when_summary_fails() {
    // No provider is registered under the summarizer's spec.
    let llm = FakeLlm::replying("unused");
    let h = harness_with(llm, Arc::new(FakeTts::default()), |cfg| {
        cfg.summarizer.model = "missing/model".into();
        cfg.summarizer.min_assistant_turns = 0;
    });
    let mut idle = ConversationRecord::new("idle");
    idle.updated_at = Utc::now() - chrono::Duration::hours(3);
    h.store.put_conversation(idle);

    assert_eq!(reaper::close_idle(&h.state, Utc::now()).await.unwrap(), 1);
    assert!(h.store.get_conversation("idle").await.unwrap().unwrap().ended);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Reply generation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn tier_selects_model_and_budget() {
    let h = harness(FakeLlm::replying("Anxiety is the body's alarm system."));
    conversation(&h.store, "c1", false);
    pending_user(&h.store, "c1", "u1", "What is anxiety?");
    reply::run(&h.state, "u1").await;

    conversation(&h.store, "c2", false);
    pending_user(
        &h.store,
        "c2",
        "u2",
        "I feel like I'm falling apart and no one understands me, and I can't sleep.",
    );
    reply::run(&h.state, "u2").await;

    let reqs = h.llm.requests();
    assert_eq!(reqs.len(), 2);
    assert_eq!(reqs[0].model.as_deref(), Some("gpt-3.5-turbo"));
    assert_eq!(reqs[0].max_tokens, Some(h.state.config.reply.fast.max_tokens));
    assert_eq!(reqs[1].model.as_deref(), Some("gpt-4-turbo"));
    assert_eq!(reqs[1].max_tokens, Some(h.state.config.reply.deep.max_tokens));
}

#[tokio::test]
async fn crisis_tool_call_replaces_model_text() {
    let llm = FakeLlm::new(|_, _| {
        tool_response(
            "MODEL FREE TEXT",
            "handle_suicidal_mention",
            json!({
                "message": "everything feels pointless",
                "hotline_number": "988",
                "recommendation": "Please talk to a therapist in person soon."
            }),
        )
    });
    let h = harness(llm);
    conversation(&h.store, "c1", false);
    pending_user(&h.store, "c1", "u1", "Everything feels pointless lately.");

    reply::run(&h.state, "u1").await;

    let replies = assistant_rows(&h.store, "c1").await;
    assert_eq!(replies.len(), 1);
    let text = replies[0].assistant_text.clone().unwrap();
    assert!(text.contains("988"));
    assert!(text.starts_with("I'm so sorry you're feeling this way."));
    assert!(!text.contains("MODEL FREE TEXT"));
}

#[tokio::test]
async fn crisis_tool_is_always_offered() {
    let h = harness_with(FakeLlm::replying("Okay."), Arc::new(FakeTts::default()), |cfg| {
        cfg.reply.therapeutic_tools = false;
    });
    conversation(&h.store, "c1", false);
    pending_user(&h.store, "c1", "u1", "Hello.");
    reply::run(&h.state, "u1").await;

    let tools: Vec<String> = h.llm.requests()[0].tools.iter().map(|t| t.name.clone()).collect();
    assert_eq!(tools, vec!["handle_suicidal_mention".to_owned()]);
}

#[tokio::test]
async fn keyword_safety_net_forces_crisis_reply() {
    let h = harness(FakeLlm::replying("Tell me more about your day."));
    conversation(&h.store, "c1", false);
    pending_user(&h.store, "c1", "u1", "Some days I want to die.");

    reply::run(&h.state, "u1").await;

    let text = assistant_rows(&h.store, "c1").await[0].assistant_text.clone().unwrap();
    assert!(text.contains("988"));
    assert!(text.contains(&h.state.config.crisis.default_recommendation));
    assert!(!text.contains("Tell me more"));
}

#[tokio::test]
async fn exercise_tool_keeps_preface() {
    let llm = FakeLlm::new(|_, _| {
        tool_response(
            "Let's slow things down together.",
            "suggest_breathing_exercise",
            json!({ "exercise_type": "box-breathing", "duration": 3 }),
        )
    });
    let h = harness_with(llm, Arc::new(FakeTts::default()), |cfg| cfg.reply.stream_text = false);
    conversation(&h.store, "c1", false);
    pending_user(&h.store, "c1", "u1", "My heart is racing.");

    reply::run(&h.state, "u1").await;

    let text = assistant_rows(&h.store, "c1").await[0].assistant_text.clone().unwrap();
    assert!(text.starts_with("Let's slow things down together.\n\n"));
    assert!(text.len() > "Let's slow things down together.".len() + 2);
}

#[tokio::test]
async fn unfinished_reply_gets_exactly_one_continuation() {
    let llm = FakeLlm::new(|n, _| match n {
        0 => ChatResponse {
            finish_reason: Some("length".into()),
            ..text_response("I hear you, and")
        },
        _ => text_response("that sounds really hard."),
    });
    let h = harness_with(llm, Arc::new(FakeTts::default()), |cfg| cfg.reply.stream_text = false);
    conversation(&h.store, "c1", false);
    pending_user(&h.store, "c1", "u1", "I keep arguing with my sister.");

    reply::run(&h.state, "u1").await;

    assert_eq!(h.llm.calls(), 2);
    let text = assistant_rows(&h.store, "c1").await[0].assistant_text.clone().unwrap();
    assert_eq!(text, "I hear you, and that sounds really hard.");

    let follow_up = &h.llm.requests()[1];
    assert!(follow_up.tools.is_empty());
    assert_eq!(follow_up.messages.last().unwrap().text(), prompts::CONTINUATION_REQUEST);
}

#[tokio::test]
async fn progressive_stream_inserts_a_single_row() {
    let h = harness(FakeLlm::replying("One step at a time is enough. What would help tonight?"));
    conversation(&h.store, "c1", false);
    pending_user(&h.store, "c1", "u1", "I'm exhausted.");

    assert!(matches!(reply::run(&h.state, "u1").await, Outcome::Completed(None)));

    let replies = assistant_rows(&h.store, "c1").await;
    assert_eq!(replies.len(), 1);
    assert_eq!(
        replies[0].assistant_text.as_deref(),
        Some("One step at a time is enough. What would help tonight?")
    );
    assert_eq!(replies[0].ai_status, Some(StageStatus::Done));
    assert_eq!(replies[0].tts_status, Some(StageStatus::Done));
}

#[tokio::test]
async fn stream_error_retracts_partial_reply() {
    let h = harness(FakeLlm::cut_off("You are so ", "connection reset"));
    let conv = conversation(&h.store, "c1", false);
    pending_user(&h.store, "c1", "u1", "I'm tired.");

    let outcome = reply::run(&h.state, "u1").await;
    assert!(matches!(outcome, Outcome::Failed(ref m) if m.contains("connection reset")));
    assert_eq!(message(&h.store, "u1").await.ai_status, Some(StageStatus::Error));

    let replies = assistant_rows(&h.store, "c1").await;
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].assistant_text.as_deref(), Some("You are so"));
    assert!(replies[0].invalidated);
    assert_eq!(replies[0].ai_status, Some(StageStatus::Error));

    let prompt = context::build(&h.state, &conv, false).await.unwrap();
    assert_eq!(prompt.last().unwrap().text(), "I'm tired.");
    assert!(prompt.iter().all(|m| m.text() != "You are so"));
}

#[tokio::test]
async fn lazy_voice_reply_is_inserted_with_locator() {
    let h = harness(FakeLlm::replying("I'm glad you reached out. How are you feeling now?"));
    conversation(&h.store, "c1", true);
    pending_user(&h.store, "c1", "u1", "Hi, it's me again.");
    let mut feed = h.store.subscribe();

    assert!(matches!(reply::run(&h.state, "u1").await, Outcome::Completed(None)));

    let row = &assistant_rows(&h.store, "c1").await[0];
    let locator = format!("http://127.0.0.1:8001/v1/tts-stream/{}", row.id);
    assert_eq!(row.tts_status, Some(StageStatus::Pending));
    assert_eq!(row.snippet_url.as_deref(), Some(locator.as_str()));

    let mut seen = Vec::new();
    while let Ok(change) = feed.try_recv() {
        if change.record.id == row.id {
            seen.push(change);
        }
    }
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].kind, ChangeKind::Insert);
    assert_eq!(seen[0].record.snippet_url.as_deref(), Some(locator.as_str()));
}

#[tokio::test]
async fn ended_conversation_gets_no_reply() {
    let h = harness(FakeLlm::replying("unused"));
    let mut conv = ConversationRecord::new("c1");
    conv.ended = true;
    h.store.put_conversation(conv);
    pending_user(&h.store, "c1", "u1", "Are you there?");

    assert!(matches!(reply::run(&h.state, "u1").await, Outcome::Completed(None)));
    assert_eq!(h.llm.calls(), 0);
    assert_eq!(message(&h.store, "u1").await.ai_status, Some(StageStatus::NotApplicable));
    assert!(assistant_rows(&h.store, "c1").await.is_empty());
}

#[tokio::test]
async fn unresolvable_model_marks_error() {
    let h = harness_with(FakeLlm::replying("unused"), Arc::new(FakeTts::default()), |cfg| {
        cfg.reply.fast.model = "nobody/none".into();
        cfg.reply.deep.model = "nobody/none".into();
    });
    conversation(&h.store, "c1", false);
    pending_user(&h.store, "c1", "u1", "Hello?");

    assert!(matches!(reply::run(&h.state, "u1").await, Outcome::Failed(_)));
    assert_eq!(message(&h.store, "u1").await.ai_status, Some(StageStatus::Error));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Full pipeline
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Every status column only ever leaves `pending`, never returns to it.
fn assert_no_regression(history: &[MessageRecord]) {
    let mut seen: HashMap<(String, &'static str), StageStatus> = HashMap::new();
    for row in history {
        for (column, status) in [
            ("transcription", row.transcription_status),
            ("ai", row.ai_status),
            ("tts", row.tts_status),
        ] {
            let Some(status) = status else { continue };
            let key = (row.id.clone(), column);
            if let Some(prev) = seen.get(&key) {
                assert!(
                    !(prev.is_terminal() && status == StageStatus::Pending),
                    "{column} on {} went {prev:?} -> pending",
                    row.id
                );
            }
            seen.insert(key, status);
        }
    }
}

#[tokio::test]
async fn voice_turn_runs_all_three_stages_eagerly() {
    let h = harness_with(
        FakeLlm::replying("That sounds draining. What usually helps you rest?"),
        Arc::new(FakeTts::default()),
        |cfg| cfg.reply.speech = SpeechStrategy::Eager,
    );
    let mut conv = ConversationRecord::new("c1");
    conv.voice_enabled = true;
    conv.therapist_id = Some("t1".into());
    h.store.put_conversation(conv);
    h.store.set_persona_voice("t1", "voice-calm");
    let raw_bucket = h.state.config.store.raw_audio_bucket.clone();
    h.store.put_blob(&raw_bucket, "c1/rec-1.webm", b"OggS....".to_vec());

    let mut changes = h.store.subscribe();
    let user = h
        .store
        .insert_message(NewMessage::user_audio("c1", "c1/rec-1.webm"))
        .await
        .unwrap();

    let Outcome::Completed(Some(next)) =
        dispatch::run_job(&h.state, Job::new(JobKind::Transcribe, &user.id)).await
    else {
        panic!("transcription did not complete");
    };
    assert_eq!(next, Job::new(JobKind::Reply, &user.id));

    let Outcome::Completed(Some(next)) = dispatch::run_job(&h.state, next).await else {
        panic!("reply did not complete");
    };
    assert_eq!(next.kind, JobKind::Synthesize);

    assert_eq!(dispatch::run_job(&h.state, next.clone()).await, Outcome::Completed(None));

    let user = message(&h.store, &user.id).await;
    assert_eq!(user.transcription.as_deref(), Some("I slept badly again"));
    assert_eq!(user.ai_status, Some(StageStatus::Done));

    let reply = message(&h.store, &next.message_id).await;
    let path = format!("c1/{}.mp3", reply.id);
    assert_eq!(reply.tts_status, Some(StageStatus::Done));
    assert_eq!(reply.tts_path.as_deref(), Some(path.as_str()));
    let tts_bucket = h.state.config.store.tts_audio_bucket.clone();
    assert!(h.store.blob(&tts_bucket, &path).is_some());
    assert_eq!(h.tts.voices.lock().as_slice(), ["voice-calm".to_owned()]);

    let mut history = Vec::new();
    while let Ok(change) = changes.try_recv() {
        history.push(change.record);
    }
    assert!(history.len() >= 5);
    assert_no_regression(&history);
}

#[tokio::test]
async fn failed_transcription_marks_error_and_stops() {
    let mut h = harness(FakeLlm::replying("unused"));
    h.state.stt = Arc::new(FakeStt(None));
    conversation(&h.store, "c1", false);
    let raw_bucket = h.state.config.store.raw_audio_bucket.clone();
    h.store.put_blob(&raw_bucket, "c1/rec.webm", b"data".to_vec());
    let user = h
        .store
        .insert_message(NewMessage::user_audio("c1", "c1/rec.webm"))
        .await
        .unwrap();

    let outcome = dispatch::run_job(&h.state, Job::new(JobKind::Transcribe, &user.id)).await;
    assert!(matches!(outcome, Outcome::Failed(_)));
    let row = message(&h.store, &user.id).await;
    assert_eq!(row.transcription_status, Some(StageStatus::Error));
    assert_eq!(row.ai_status, Some(StageStatus::Pending));
    assert_eq!(h.llm.calls(), 0);
}

#[tokio::test]
async fn speech_failure_downgrades_to_done() {
    let h = harness_with(
        FakeLlm::replying("unused"),
        FakeTts::failing(),
        |cfg| cfg.reply.speech = SpeechStrategy::Eager,
    );
    conversation(&h.store, "c1", true);
    let mut row = history_row("c1", "a1", SenderRole::Assistant, "Breathe with me.", 1);
    row.tts_status = Some(StageStatus::Pending);
    h.store.put_message(row);

    assert_eq!(speech::run(&h.state, "a1").await, Outcome::Completed(None));

    let row = message(&h.store, "a1").await;
    assert_eq!(row.tts_status, Some(StageStatus::Done));
    assert!(row.tts_path.is_none());
}

#[tokio::test]
async fn sweep_drains_follow_up_stages() {
    let h = harness(FakeLlm::replying("Thank you for telling me. What happened next?"));
    conversation(&h.store, "c1", false);
    let raw_bucket = h.state.config.store.raw_audio_bucket.clone();
    h.store.put_blob(&raw_bucket, "c1/a.webm", b"data".to_vec());
    let user = h
        .store
        .insert_message(NewMessage::user_audio("c1", "c1/a.webm"))
        .await
        .unwrap();

    let report = sweep::sweep(&h.state).await.unwrap();

    assert_eq!(report.completed, 2);
    assert_eq!(report.failed, 0);
    assert_eq!(message(&h.store, &user.id).await.ai_status, Some(StageStatus::Done));
    assert_eq!(assistant_rows(&h.store, "c1").await.len(), 1);
}

#[tokio::test]
async fn push_trigger_enqueues_new_turns() {
    let mut h = harness(FakeLlm::replying("unused"));
    conversation(&h.store, "c1", false);
    let shutdown = CancellationToken::new();
    let feed: Arc<dyn ChangeFeed> = h.store.clone();
    let task = tokio::spawn(dispatch::run_push(h.state.clone(), feed, shutdown.clone()));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let row = h
        .store
        .insert_message(NewMessage::user_text("c1", "Can we talk?"))
        .await
        .unwrap();

    let job = tokio::time::timeout(Duration::from_secs(2), h.rx.recv())
        .await
        .expect("push trigger did not enqueue")
        .unwrap();
    assert_eq!(job, Job::new(JobKind::Reply, &row.id));

    shutdown.cancel();
    task.await.unwrap();
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Edit and regenerate
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn edit_clears_claim_and_replies_again() {
    let mut h = harness_with(
        FakeLlm::replying("I'm sorry the night was rough."),
        Arc::new(FakeTts::default()),
        |cfg| cfg.reply.stream_text = false,
    );
    conversation(&h.store, "c1", false);
    pending_user(&h.store, "c1", "u1", "I slept fine.");
    reply::run(&h.state, "u1").await;
    let first = assistant_rows(&h.store, "c1").await.remove(0);

    let edited = edit::edit_message(&h.state, "u1", "Actually, I barely slept.")
        .await
        .unwrap();
    assert!(!edited.ai_started);
    assert_eq!(edited.ai_status, Some(StageStatus::Pending));
    assert_eq!(edited.transcription.as_deref(), Some("Actually, I barely slept."));
    assert!(edited.edited_at.is_some());

    assert!(message(&h.store, &first.id).await.invalidated);
    let conv = h.store.get_conversation("c1").await.unwrap().unwrap();
    assert!(conv.needs_resummarization);
    assert_eq!(h.rx.try_recv().unwrap(), Job::new(JobKind::Reply, "u1"));

    assert!(matches!(reply::run(&h.state, "u1").await, Outcome::Completed(None)));
    assert_eq!(h.llm.calls(), 2);
    let visible = h
        .store
        .select_messages(&MessageFilter::conversation("c1").visible())
        .await
        .unwrap();
    assert_eq!(visible.len(), 2);
    assert_eq!(
        h.llm.requests()[1].messages.last().unwrap().text(),
        "Actually, I barely slept."
    );
}

#[tokio::test]
async fn edit_during_reply_drops_the_stale_answer() {
    let llm = FakeLlm::slow(Duration::from_millis(300), |_, req| {
        let last = req.messages.last().map(|m| m.text().to_owned()).unwrap_or_default();
        text_response(&format!("Reply to: {last}"))
    });
    let mut h = harness(llm);
    conversation(&h.store, "c1", false);
    pending_user(&h.store, "c1", "u1", "old text.");

    let state = h.state.clone();
    let first =
        tokio::spawn(async move { dispatch::run_job(&state, Job::new(JobKind::Reply, "u1")).await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    edit::edit_message(&h.state, "u1", "new text.").await.unwrap();

    // The edit's own job arrives while the old run still holds the row.
    let queued = h.rx.try_recv().unwrap();
    assert_eq!(dispatch::run_job(&h.state, queued).await, Outcome::Skipped("in flight"));

    let again = match first.await.unwrap() {
        Outcome::Requeued(job) => job,
        other => panic!("expected the old run to hand the turn back, got {other:?}"),
    };
    assert_eq!(again, Job::new(JobKind::Reply, "u1"));
    assert_eq!(message(&h.store, "u1").await.ai_status, Some(StageStatus::Pending));

    assert!(matches!(dispatch::run_job(&h.state, again).await, Outcome::Completed(None)));

    let user = message(&h.store, "u1").await;
    assert_eq!(user.ai_status, Some(StageStatus::Done));
    assert!(user.ai_started);

    let replies = assistant_rows(&h.store, "c1").await;
    let live: Vec<_> = replies.iter().filter(|r| !r.invalidated).collect();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].assistant_text.as_deref(), Some("Reply to: new text."));
    for stale in replies.iter().filter(|r| r.invalidated) {
        assert_eq!(stale.assistant_text.as_deref(), Some("Reply to: old text."));
        assert!(stale.ai_status.is_some_and(|s| s.is_terminal()));
    }
}

#[tokio::test]
async fn edit_rejects_assistant_and_missing_rows() {
    let h = harness(FakeLlm::replying("unused"));
    conversation(&h.store, "c1", false);
    h.store
        .put_message(history_row("c1", "a1", SenderRole::Assistant, "Hello.", 1));

    let err = edit::edit_message(&h.state, "a1", "x").await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    let err = edit::regenerate(&h.state, "missing").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn regenerate_keeps_memory_flag() {
    let mut h = harness(FakeLlm::replying("unused"));
    conversation(&h.store, "c1", false);
    h.store
        .put_message(history_row("c1", "u1", SenderRole::User, "Hi.", 5));
    h.store
        .put_message(history_row("c1", "a1", SenderRole::Assistant, "Hello.", 4));

    let row = edit::regenerate(&h.state, "u1").await.unwrap();
    assert!(!row.ai_started);
    assert!(message(&h.store, "a1").await.invalidated);
    assert!(!h.store.get_conversation("c1").await.unwrap().unwrap().needs_resummarization);
    assert_eq!(h.rx.try_recv().unwrap().message_id, "u1");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Lazy playback
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn spoken_reply(store: &MemoryStore, conversation_id: &str, id: &str) {
    let mut row = history_row(conversation_id, id, SenderRole::Assistant, "Hello there. How are you?", 1);
    row.tts_status = Some(StageStatus::Pending);
    store.put_message(row);
}

#[tokio::test]
async fn playback_rejects_out_of_range_snippet() {
    let h = harness(FakeLlm::replying("unused"));
    conversation(&h.store, "c1", true);
    spoken_reply(&h.store, "c1", "a1");

    let err = speech::prepare_snippet(&h.state, "a1", 5).await.unwrap_err();
    assert!(matches!(err, PlaybackError::OutOfRange { index: 5, count: 2 }));
}

#[tokio::test]
async fn playback_requires_voice_mode() {
    let h = harness(FakeLlm::replying("unused"));
    conversation(&h.store, "c1", false);
    spoken_reply(&h.store, "c1", "a1");

    let err = speech::prepare_snippet(&h.state, "a1", 0).await.unwrap_err();
    assert!(matches!(err, PlaybackError::VoiceDisabled));
}

#[tokio::test]
async fn playback_without_text_is_not_found() {
    let h = harness(FakeLlm::replying("unused"));
    conversation(&h.store, "c1", true);
    h.store
        .put_message(history_row("c1", "u1", SenderRole::User, "Hi.", 1));

    for id in ["u1", "missing"] {
        let err = speech::prepare_snippet(&h.state, id, 0).await.unwrap_err();
        assert!(matches!(err, PlaybackError::NotFound(_)));
    }
}

#[tokio::test]
async fn last_snippet_marks_speech_done() {
    let h = harness(FakeLlm::replying("unused"));
    conversation(&h.store, "c1", true);
    spoken_reply(&h.store, "c1", "a1");

    let first = speech::prepare_snippet(&h.state, "a1", 0).await.unwrap();
    assert_eq!(first.text, "Hello there.");
    assert_eq!(first.voice, "default-voice");
    let audio: Vec<_> = speech::stream_snippet(&h.state, first).await.unwrap().collect().await;
    assert!(audio.iter().all(|c| c.is_ok()));
    assert_eq!(message(&h.store, "a1").await.tts_status, Some(StageStatus::Pending));

    let last = speech::prepare_snippet(&h.state, "a1", 1).await.unwrap();
    assert_eq!(last.text, "How are you?");
    let audio: Vec<_> = speech::stream_snippet(&h.state, last).await.unwrap().collect().await;
    assert_eq!(audio.len(), 2);
    assert_eq!(message(&h.store, "a1").await.tts_status, Some(StageStatus::Done));
}
