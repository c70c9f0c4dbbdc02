use serde::Serialize;

/// Structured pipeline events emitted across all Solace crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    MessageClaimed {
        message_id: String,
        won: bool,
    },
    StageFinished {
        message_id: String,
        stage: String,
        status: String,
        duration_ms: u64,
    },
    ContextBuilt {
        conversation_id: String,
        history_turns: usize,
        rolled_up_turns: usize,
        prompt_messages: usize,
        memory_used: bool,
    },
    LlmRequest {
        provider: String,
        model: String,
        purpose: String,
        streaming: bool,
        duration_ms: u64,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
    },
    TierSelected {
        message_id: String,
        tier: String,
        model: String,
        max_tokens: u32,
    },
    CrisisResponse {
        message_id: String,
        via_tool: bool,
    },
    ContinuationIssued {
        message_id: String,
        reason: String,
    },
    SummaryStored {
        conversation_id: String,
        assistant_turns: usize,
        summary_chars: usize,
    },
    ConversationClosed {
        conversation_id: String,
        idle_secs: i64,
    },
    JobDropped {
        message_id: String,
        kind: String,
        reason: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "solace_event");
    }
}
