//! Capability contracts consumed by the core.
//!
//! Transcription, affect analysis, generation, synthesis, knowledge lookup
//! and persistence are external collaborators. The core only depends on the
//! traits below; transport, authentication and serialization belong to the
//! implementations.

use crate::error::Result;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde_json::Value;
use strum::{Display, EnumString};

use crate::audio::AudioChunk;

/// Stream of audio chunks handed to streaming ports.
pub type AudioStream = BoxStream<'static, AudioChunk>;

/// Stream of text pieces handed to synthesis.
pub type TextStream = BoxStream<'static, String>;

/// Incremental transcription output: partials as they stabilize, exactly one
/// final at the end.
#[derive(Debug, Clone)]
pub enum TranscriptUpdate {
    Partial(String),
    Final(String),
}

/// One-shot transcription result.
#[derive(Debug, Clone)]
pub struct Transcription {
    pub text: String,
    pub confidence: f32,
    pub latency_ms: f32,
}

/// Emotional state detected from the user's voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
pub enum EmotionalState {
    #[default]
    Neutral,
    Frustrated,
    Hurried,
    Cheerful,
}

/// A unit of generated output: plain text, or a tool invocation to intercept.
#[derive(Debug, Clone)]
pub enum GenUnit {
    Text(String),
    ToolCall(ToolInvocation),
}

#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub name: String,
    pub arguments: Value,
}

/// Request issued to the generation chain. Built fresh per utterance and
/// immutable once passed to a provider, so re-issuing it against another
/// provider after a failure is always safe.
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub user_message: String,
    pub conversation_history: String,
    pub knowledge_context: String,
    pub emotional_state: EmotionalState,
    pub knowledge_confidence: f32,
    pub upstream_latency_ms: u64,
    pub tools: Option<Vec<Value>>,
    pub system_prompt: Option<String>,
    pub language: String,
}

/// Ranked knowledge-base hit.
#[derive(Debug, Clone)]
pub struct KnowledgeHit {
    pub content: String,
    pub score: f32,
    pub source: String,
}

#[async_trait]
pub trait TranscriptionPort: Send + Sync {
    /// Transcribe a live audio stream, yielding partial transcripts as they
    /// stabilize and a final transcript once the stream ends.
    async fn transcribe_stream(
        &self,
        audio: AudioStream,
    ) -> Result<BoxStream<'static, TranscriptUpdate>>;

    /// One-shot transcription of a complete utterance.
    async fn transcribe(&self, samples: &[i16]) -> Result<Transcription>;
}

#[async_trait]
pub trait AffectPort: Send + Sync {
    /// Analyze a whole utterance; resolves once, after the stream ends.
    async fn analyze_stream(&self, audio: AudioStream) -> Result<EmotionalState>;
}

#[async_trait]
pub trait GenerationPort: Send + Sync {
    /// Provider identity used in failover logs.
    fn name(&self) -> &str;

    /// Stream generated units for the request. Requests are idempotent; a
    /// failed attempt may be re-issued against another provider.
    async fn generate_stream(
        &self,
        request: &GenerationRequest,
    ) -> Result<BoxStream<'static, Result<GenUnit>>>;

    async fn health_check(&self) -> bool;
}

#[async_trait]
pub trait SynthesisPort: Send + Sync {
    fn name(&self) -> &str;

    /// Synthesize a text stream into a stream of encoded audio bytes.
    async fn synthesize_stream(
        &self,
        text: TextStream,
    ) -> Result<BoxStream<'static, Result<Vec<u8>>>>;

    async fn health_check(&self) -> bool;
}

#[async_trait]
pub trait KnowledgePort: Send + Sync {
    /// Ranked semantic search over the knowledge base.
    async fn search(
        &self,
        query_text: &str,
        top_k: usize,
        min_score: f32,
    ) -> Result<Vec<KnowledgeHit>>;
}

#[async_trait]
pub trait RepositoryPort: Send + Sync {
    async fn save_booking(&self, data: Value) -> Result<bool>;

    /// Analytics logging; callers may fire and forget.
    async fn log_interaction(&self, user_text: &str, intent: &str, response: &str) -> Result<()>;
}

impl EmotionalState {
    /// Parse a label from an affect adapter, absorbing unknown labels to
    /// Neutral instead of failing the turn.
    pub fn from_label(label: &str) -> Self {
        label.parse().unwrap_or(EmotionalState::Neutral)
    }
}

impl TranscriptUpdate {
    pub fn text(&self) -> &str {
        match self {
            TranscriptUpdate::Partial(t) | TranscriptUpdate::Final(t) => t,
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, TranscriptUpdate::Final(_))
    }
}
