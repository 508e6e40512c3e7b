//! Scripted in-process port implementations.
//!
//! Used by the demo binary and the integration tests: the whole pipeline
//! runs end to end with deterministic transcripts, canned knowledge and
//! fake audio, no credentials or network required.

use crate::error::{AgentError, Result};
use crate::ports::{
    AffectPort, AudioStream, EmotionalState, GenUnit, GenerationPort, GenerationRequest,
    KnowledgeHit, KnowledgePort, RepositoryPort, SynthesisPort, TextStream, ToolInvocation,
    TranscriptUpdate, Transcription, TranscriptionPort,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Transcription that replays a scripted queue of guest lines, one per
/// utterance, emitting word-prefix partials before the final transcript.
pub struct ScriptedTranscription {
    lines: Mutex<VecDeque<String>>,
}

impl ScriptedTranscription {
    pub fn new(lines: Vec<&str>) -> Self {
        Self {
            lines: Mutex::new(lines.into_iter().map(str::to_string).collect()),
        }
    }

    async fn next_line(&self) -> String {
        self.lines.lock().await.pop_front().unwrap_or_default()
    }
}

#[async_trait]
impl TranscriptionPort for ScriptedTranscription {
    async fn transcribe_stream(
        &self,
        mut audio: AudioStream,
    ) -> Result<BoxStream<'static, TranscriptUpdate>> {
        while audio.next().await.is_some() {}
        let line = self.next_line().await;

        let mut updates = Vec::new();
        let words: Vec<&str> = line.split_whitespace().collect();
        for end in 1..words.len() {
            updates.push(TranscriptUpdate::Partial(words[..end].join(" ")));
        }
        updates.push(TranscriptUpdate::Final(line));
        Ok(Box::pin(futures_util::stream::iter(updates)))
    }

    async fn transcribe(&self, _samples: &[i16]) -> Result<Transcription> {
        Ok(Transcription {
            text: self.next_line().await,
            confidence: 0.95,
            latency_ms: 12.0,
        })
    }
}

/// Affect analysis that always reports the configured state.
pub struct FixedAffect(pub EmotionalState);

#[async_trait]
impl AffectPort for FixedAffect {
    async fn analyze_stream(&self, mut audio: AudioStream) -> Result<EmotionalState> {
        while audio.next().await.is_some() {}
        Ok(self.0)
    }
}

/// Deterministic generation provider. Answers from the knowledge context
/// when one is present, issues a booking tool call when tools are offered
/// and the guest asked to book, and can be scripted to fail its first N
/// calls to exercise the failover chain.
pub struct ScriptedGeneration {
    name: String,
    fail_first: u32,
    calls: AtomicU32,
}

impl ScriptedGeneration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fail_first: 0,
            calls: AtomicU32::new(0),
        }
    }

    pub fn failing_first(name: impl Into<String>, fail_first: u32) -> Self {
        Self {
            name: name.into(),
            fail_first,
            calls: AtomicU32::new(0),
        }
    }

    fn compose(&self, request: &GenerationRequest) -> Vec<GenUnit> {
        let asks_booking = {
            let lower = request.user_message.to_lowercase();
            lower.contains("book") || lower.contains("reserve")
        };

        if request.tools.is_some() && asks_booking {
            return vec![
                GenUnit::Text("Of course.".to_string()),
                GenUnit::ToolCall(ToolInvocation {
                    name: "save_booking".to_string(),
                    arguments: json!({ "service": "the spa", "time": "15:00" }),
                }),
            ];
        }

        let text = if !request.knowledge_context.is_empty() {
            // First context line, spoken as the answer.
            let fact = request.knowledge_context.lines().next().unwrap_or_default();
            fact.to_string()
        } else if asks_booking {
            // Fast tier has no tools; force an escalation by staying silent.
            return Vec::new();
        } else {
            "Happy to help with anything about the hotel.".to_string()
        };

        text.split_inclusive(' ')
            .map(|piece| GenUnit::Text(piece.to_string()))
            .collect()
    }
}

#[async_trait]
impl GenerationPort for ScriptedGeneration {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate_stream(
        &self,
        request: &GenerationRequest,
    ) -> Result<BoxStream<'static, Result<GenUnit>>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            return Err(AgentError::Generation(format!(
                "{}: scripted outage (call {})",
                self.name, call
            )));
        }

        let units = self.compose(request);
        Ok(Box::pin(futures_util::stream::iter(
            units.into_iter().map(Ok),
        )))
    }

    async fn health_check(&self) -> bool {
        true
    }
}

/// Synthesis that turns every text piece into a fixed-size block of fake
/// PCM bytes.
pub struct FakeSynthesis {
    name: String,
}

impl FakeSynthesis {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl SynthesisPort for FakeSynthesis {
    fn name(&self) -> &str {
        &self.name
    }

    async fn synthesize_stream(
        &self,
        mut text: TextStream,
    ) -> Result<BoxStream<'static, Result<Vec<u8>>>> {
        let mut blocks = Vec::new();
        while let Some(piece) = text.next().await {
            // 20ms of silence per character, enough to look like audio.
            blocks.push(Ok(vec![0u8; piece.chars().count() * 640]));
        }
        Ok(Box::pin(futures_util::stream::iter(blocks)))
    }

    async fn health_check(&self) -> bool {
        true
    }
}

/// Keyword-scored lookup over a small canned fact base.
pub struct CannedKnowledge {
    entries: Vec<(String, Vec<String>)>,
}

impl Default for CannedKnowledge {
    fn default() -> Self {
        let entries = [
            (
                "The pool is open daily from 7:00 to 22:00, towels at the front desk.",
                vec!["pool", "swim", "towel"],
            ),
            (
                "Breakfast is served in the ground-floor restaurant from 6:30 to 10:30.",
                vec!["breakfast", "restaurant", "dinner", "eat"],
            ),
            (
                "Wifi network is HotelGuest, the password is printed on your key card.",
                vec!["wifi", "password", "internet"],
            ),
            (
                "Check-out is at 11:00; late check-out until 14:00 can be booked at reception.",
                vec!["check-out", "checkout", "late"],
            ),
            (
                "The gym on floor 2 is open around the clock for guests.",
                vec!["gym", "fitness", "hours"],
            ),
        ];
        Self {
            entries: entries
                .into_iter()
                .map(|(content, words)| {
                    (
                        content.to_string(),
                        words.into_iter().map(str::to_string).collect(),
                    )
                })
                .collect(),
        }
    }
}

#[async_trait]
impl KnowledgePort for CannedKnowledge {
    async fn search(
        &self,
        query_text: &str,
        top_k: usize,
        min_score: f32,
    ) -> Result<Vec<KnowledgeHit>> {
        let lower = query_text.to_lowercase();
        let mut hits: Vec<KnowledgeHit> = self
            .entries
            .iter()
            .filter_map(|(content, keywords)| {
                let matched = keywords.iter().filter(|k| lower.contains(k.as_str())).count();
                if matched == 0 {
                    return None;
                }
                let score = 0.6 + 0.2 * matched.min(2) as f32;
                (score >= min_score).then(|| KnowledgeHit {
                    content: content.clone(),
                    score,
                    source: "canned".to_string(),
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);
        Ok(hits)
    }
}

/// One analytics row: what the guest said, what we classified it as, and
/// what the assistant answered.
#[derive(Debug, Clone, Serialize)]
pub struct InteractionRecord {
    pub user_text: String,
    pub intent: String,
    pub response: String,
    pub timestamp: DateTime<Utc>,
}

/// In-memory repository recording bookings and interaction logs.
#[derive(Default)]
pub struct MemoryRepository {
    bookings: Mutex<Vec<Value>>,
    interactions: Mutex<Vec<InteractionRecord>>,
}

impl MemoryRepository {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn bookings(&self) -> Vec<Value> {
        self.bookings.lock().await.clone()
    }

    pub async fn interactions(&self) -> Vec<InteractionRecord> {
        self.interactions.lock().await.clone()
    }

    pub async fn interaction_count(&self) -> usize {
        self.interactions.lock().await.len()
    }
}

#[async_trait]
impl RepositoryPort for MemoryRepository {
    async fn save_booking(&self, data: Value) -> Result<bool> {
        self.bookings.lock().await.push(data);
        Ok(true)
    }

    async fn log_interaction(&self, user_text: &str, intent: &str, response: &str) -> Result<()> {
        self.interactions.lock().await.push(InteractionRecord {
            user_text: user_text.to_string(),
            intent: intent.to_string(),
            response: response.to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }
}
