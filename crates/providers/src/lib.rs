pub mod openai_compat;
pub mod registry;
pub mod speech;
pub mod traits;
pub(crate) mod sse;
pub(crate) mod util;

// Re-exports for convenience.
pub use registry::ProviderRegistry;
pub use speech::{ElevenLabsTts, SpeechSynthesizer, SpeechToText, WhisperStt};
pub use traits::{ChatRequest, ChatResponse, LlmProvider};
pub use util::resolve_api_key;
