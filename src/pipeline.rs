//! Per-utterance orchestration: audio in, spoken answer out.
//!
//! One `UtteranceOrchestrator` owns one session's conversation state. For
//! each closed utterance it fans the audio out to transcription and affect
//! analysis, starts the knowledge lookup as soon as enough partial transcript
//! has stabilized, runs tiered generation over the joined results and streams
//! the assembled answer through the synthesis chain.

use crate::audio::{AudioChunk, StreamSplitter};
use crate::bus::CommandBus;
use crate::config::PipelineSettings;
use crate::conversation::Conversation;
use crate::error::Result;
use crate::intent::{detect_intent, Intent};
use crate::llm::TieredGeneration;
use crate::ports::{
    AffectPort, EmotionalState, GenerationRequest, KnowledgeHit, TranscriptionPort,
};
use crate::vad::Utterance;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Samples per chunk when replaying a closed utterance through the
/// streaming ports (100ms at 16kHz).
const TURN_CHUNK_SAMPLES: usize = 1600;

/// Everything the caller needs to respond: the assembled text and the
/// synthesized audio stream.
pub struct TurnResponse {
    pub text: String,
    pub intent: Intent,
    pub audio: BoxStream<'static, Result<Vec<u8>>>,
}

pub struct UtteranceOrchestrator {
    bus: Arc<CommandBus>,
    transcription: Arc<dyn TranscriptionPort>,
    affect: Arc<dyn AffectPort>,
    tiering: TieredGeneration,
    settings: PipelineSettings,
    conversation: Conversation,
}

impl UtteranceOrchestrator {
    pub fn new(
        bus: Arc<CommandBus>,
        transcription: Arc<dyn TranscriptionPort>,
        affect: Arc<dyn AffectPort>,
        tiering: TieredGeneration,
        settings: PipelineSettings,
    ) -> Self {
        let conversation = Conversation::new(settings.language.clone());
        log::info!("🎯 Orchestrator ready ({})", conversation.summary());
        Self {
            bus,
            transcription,
            affect,
            tiering,
            settings,
            conversation,
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Run one full turn for a closed utterance.
    pub async fn run_turn(
        &mut self,
        utterance: Utterance,
        cancel: CancellationToken,
    ) -> Result<TurnResponse> {
        let turn_started = Instant::now();
        log::info!(
            "🎤 Turn start: {} samples, closed by {}",
            utterance.samples.len(),
            if utterance.closed_by_silence { "silence" } else { "length cap" }
        );

        // Fan the utterance audio out to transcription and affect analysis.
        let source = chunked_stream(utterance.samples);
        let mut branches = StreamSplitter::split(source, 2, cancel.clone());
        let affect_branch: Option<crate::ports::AudioStream> =
            branches.pop().map(|b| Box::pin(b) as _);
        let transcription_branch: Option<crate::ports::AudioStream> =
            branches.pop().map(|b| Box::pin(b) as _);
        let (transcription_branch, affect_branch) = match (transcription_branch, affect_branch) {
            (Some(t), Some(a)) => (t, a),
            _ => unreachable!("splitter always yields the requested branch count"),
        };

        let affect_task: JoinHandle<Result<EmotionalState>> = tokio::spawn({
            let affect = self.affect.clone();
            async move { affect.analyze_stream(affect_branch).await }
        });

        // Consume transcript updates; kick off the knowledge lookup as soon
        // as the partial transcript is long enough to be a useful query.
        let mut updates = self.transcription.transcribe_stream(transcription_branch).await?;
        let mut lookup_task: Option<JoinHandle<Result<Vec<KnowledgeHit>>>> = None;
        let mut final_text = String::new();

        while let Some(update) = updates.next().await {
            let is_final = update.is_final();
            let text = update.text().trim().to_string();

            if is_final {
                final_text = text;
                continue;
            }

            if lookup_task.is_none()
                && text.split_whitespace().count() >= self.settings.proactive_min_words
            {
                log::debug!("🔎 Proactive knowledge lookup: '{}'", text);
                lookup_task = Some(self.spawn_lookup(text, cancel.clone()));
            }
        }

        // Affect analysis never blocks a response: failures degrade to Neutral.
        let emotional_state = match affect_task.await {
            Ok(Ok(state)) => state,
            Ok(Err(e)) => {
                log::warn!("⚠️ Affect analysis failed, assuming neutral: {}", e);
                EmotionalState::Neutral
            }
            Err(e) => {
                log::warn!("⚠️ Affect task panicked, assuming neutral: {}", e);
                EmotionalState::Neutral
            }
        };

        // An empty transcript short-circuits the turn: nothing to answer.
        if final_text.is_empty() {
            if let Some(task) = lookup_task {
                task.abort();
            }
            log::info!("🤷 Empty transcript, speaking fallback");
            let text = self.settings.fallback_text.clone();
            let audio = self.bus.synthesize_stream(text.clone());
            return Ok(TurnResponse {
                text,
                intent: Intent::Unknown,
                audio,
            });
        }

        log::info!("📝 Final transcript: '{}'", final_text);

        // Join the knowledge lookup, or run it now if no partial was long
        // enough to trigger it early.
        let hits = match lookup_task {
            Some(task) => match task.await {
                Ok(Ok(hits)) => hits,
                Ok(Err(e)) => {
                    log::warn!("⚠️ Knowledge lookup failed, answering without context: {}", e);
                    Vec::new()
                }
                Err(_) => Vec::new(),
            },
            None => self.lookup(&final_text).await,
        };
        let knowledge_confidence = hits.first().map(|h| h.score).unwrap_or(0.0);
        let knowledge_context = hits
            .iter()
            .map(|h| h.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        let intent = detect_intent(&final_text).intent;
        self.conversation.record_intent(intent);

        // History for the prompt excludes the message being answered.
        let conversation_history = self.conversation.recent_context(self.settings.history_window);
        self.conversation.add_user_message(final_text.clone());

        let request = GenerationRequest {
            user_message: final_text.clone(),
            conversation_history,
            knowledge_context,
            emotional_state,
            knowledge_confidence,
            upstream_latency_ms: turn_started.elapsed().as_millis() as u64,
            tools: None,
            system_prompt: None,
            language: self.settings.language.clone(),
        };

        // Generation failure fails the turn; the fallback text is reserved
        // for the empty-transcript case.
        let text = match self.tiering.generate(request).await {
            Ok(text) => text,
            Err(e) => {
                log::error!("❌ Generation failed, failing the turn: {}", e);
                return Err(e);
            }
        };
        self.conversation.add_assistant_message(text.clone());

        // Analytics logging never blocks the answer.
        let bus = self.bus.clone();
        let log_user = final_text;
        let log_response = text.clone();
        tokio::spawn(async move {
            if let Err(e) = bus
                .log_interaction(&log_user, &intent.to_string(), &log_response)
                .await
            {
                log::debug!("Interaction log dropped: {}", e);
            }
        });

        let audio = self.bus.synthesize_stream(text.clone());
        log::info!(
            "✅ Turn done in {}ms: '{}'",
            turn_started.elapsed().as_millis(),
            text
        );

        Ok(TurnResponse { text, intent, audio })
    }

    fn spawn_lookup(
        &self,
        query: String,
        cancel: CancellationToken,
    ) -> JoinHandle<Result<Vec<KnowledgeHit>>> {
        let bus = self.bus.clone();
        let top_k = self.settings.knowledge_top_k;
        let min_score = self.settings.knowledge_min_score;
        tokio::spawn(async move {
            tokio::select! {
                hits = bus.search_knowledge(&query, top_k, min_score) => hits,
                _ = cancel.cancelled() => Ok(Vec::new()),
            }
        })
    }

    async fn lookup(&self, query: &str) -> Vec<KnowledgeHit> {
        match self
            .bus
            .search_knowledge(query, self.settings.knowledge_top_k, self.settings.knowledge_min_score)
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                log::warn!("⚠️ Knowledge lookup failed, answering without context: {}", e);
                Vec::new()
            }
        }
    }
}

/// Replay a closed utterance's samples as a chunked audio stream.
fn chunked_stream(
    samples: Vec<i16>,
) -> impl futures_util::Stream<Item = AudioChunk> + Send + Unpin + 'static {
    let chunks: Vec<AudioChunk> = samples
        .chunks(TURN_CHUNK_SAMPLES)
        .map(|c| AudioChunk::new(c.to_vec()))
        .collect();
    futures_util::stream::iter(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::ProviderChain;
    use crate::config::{ResilienceSettings, TieringSettings};
    use crate::llm::{PromptFactory, ToolRegistry};
    use crate::ports::{
        AudioStream, GenUnit, GenerationPort, KnowledgePort, RepositoryPort, SynthesisPort,
        TextStream, TranscriptUpdate, Transcription,
    };
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedStt {
        partials: Vec<&'static str>,
        final_text: &'static str,
    }

    #[async_trait]
    impl TranscriptionPort for ScriptedStt {
        async fn transcribe_stream(
            &self,
            mut audio: AudioStream,
        ) -> Result<BoxStream<'static, TranscriptUpdate>> {
            // Drain the branch so the splitter relay is never blocked.
            while audio.next().await.is_some() {}
            let mut updates: Vec<TranscriptUpdate> = self
                .partials
                .iter()
                .map(|p| TranscriptUpdate::Partial(p.to_string()))
                .collect();
            updates.push(TranscriptUpdate::Final(self.final_text.to_string()));
            Ok(Box::pin(futures_util::stream::iter(updates)))
        }

        async fn transcribe(&self, _samples: &[i16]) -> Result<Transcription> {
            Ok(Transcription {
                text: self.final_text.to_string(),
                confidence: 1.0,
                latency_ms: 0.0,
            })
        }
    }

    struct NeutralAffect;

    #[async_trait]
    impl AffectPort for NeutralAffect {
        async fn analyze_stream(&self, mut audio: AudioStream) -> Result<EmotionalState> {
            while audio.next().await.is_some() {}
            Ok(EmotionalState::Neutral)
        }
    }

    struct CountingGen {
        calls: Arc<AtomicU32>,
        reply: &'static str,
    }

    #[async_trait]
    impl GenerationPort for CountingGen {
        fn name(&self) -> &str {
            "counting"
        }
        async fn generate_stream(
            &self,
            _request: &GenerationRequest,
        ) -> Result<BoxStream<'static, Result<GenUnit>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let reply = self.reply.to_string();
            Ok(Box::pin(futures_util::stream::iter(vec![Ok(
                GenUnit::Text(reply),
            )])))
        }
        async fn health_check(&self) -> bool {
            true
        }
    }

    struct SilentSynth;

    #[async_trait]
    impl SynthesisPort for SilentSynth {
        fn name(&self) -> &str {
            "silent"
        }
        async fn synthesize_stream(
            &self,
            mut text: TextStream,
        ) -> Result<BoxStream<'static, Result<Vec<u8>>>> {
            let mut out = Vec::new();
            while let Some(piece) = text.next().await {
                out.push(Ok(piece.into_bytes()));
            }
            Ok(Box::pin(futures_util::stream::iter(out)))
        }
        async fn health_check(&self) -> bool {
            true
        }
    }

    struct EmptyKnowledge;

    #[async_trait]
    impl KnowledgePort for EmptyKnowledge {
        async fn search(&self, _q: &str, _k: usize, _s: f32) -> Result<Vec<KnowledgeHit>> {
            Ok(Vec::new())
        }
    }

    struct NullRepo;

    #[async_trait]
    impl RepositoryPort for NullRepo {
        async fn save_booking(&self, _data: Value) -> Result<bool> {
            Ok(true)
        }
        async fn log_interaction(&self, _u: &str, _i: &str, _r: &str) -> Result<()> {
            Ok(())
        }
    }

    struct FailingGen;

    #[async_trait]
    impl GenerationPort for FailingGen {
        fn name(&self) -> &str {
            "failing"
        }
        async fn generate_stream(
            &self,
            _request: &GenerationRequest,
        ) -> Result<BoxStream<'static, Result<GenUnit>>> {
            Err(crate::error::AgentError::Generation("outage".to_string()))
        }
        async fn health_check(&self) -> bool {
            false
        }
    }

    fn orchestrator(
        stt: ScriptedStt,
        gen_calls: Arc<AtomicU32>,
        reply: &'static str,
    ) -> UtteranceOrchestrator {
        orchestrator_with_providers(
            stt,
            vec![(
                "counting".to_string(),
                Arc::new(CountingGen {
                    calls: gen_calls,
                    reply,
                }) as Arc<dyn GenerationPort>,
            )],
        )
    }

    fn orchestrator_with_providers(
        stt: ScriptedStt,
        providers: Vec<(String, Arc<dyn GenerationPort>)>,
    ) -> UtteranceOrchestrator {
        let resilience = ResilienceSettings {
            max_retries: 0,
            initial_delay: std::time::Duration::from_millis(1),
            ..Default::default()
        };
        let generation = ProviderChain::new("generation", providers, &resilience).unwrap();
        let synthesis = ProviderChain::new(
            "synthesis",
            vec![("silent".to_string(), Arc::new(SilentSynth) as Arc<dyn SynthesisPort>)],
            &resilience,
        )
        .unwrap();
        let bus = Arc::new(CommandBus::new(
            generation,
            synthesis,
            Arc::new(EmptyKnowledge),
            Arc::new(NullRepo),
            resilience,
        ));

        let tiering = TieredGeneration::new(
            bus.clone(),
            TieringSettings::default(),
            Arc::new(ToolRegistry::new()),
            PromptFactory::new("English"),
        );

        UtteranceOrchestrator::new(
            bus,
            Arc::new(stt),
            Arc::new(NeutralAffect),
            tiering,
            PipelineSettings::default(),
        )
    }

    fn utterance(samples: usize) -> Utterance {
        Utterance {
            samples: vec![0i16; samples],
            started_at: Instant::now(),
            closed_by_silence: true,
        }
    }

    #[tokio::test]
    async fn test_turn_produces_text_and_audio() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut orchestrator = orchestrator(
            ScriptedStt {
                partials: vec!["is the", "is the pool open"],
                final_text: "is the pool open",
            },
            calls.clone(),
            "Yes, until ten.",
        );

        let response = orchestrator
            .run_turn(utterance(16_000), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(response.text, "Yes, until ten.");
        assert_eq!(response.intent, Intent::Info);
        assert!(calls.load(Ordering::SeqCst) >= 1);

        let audio: Vec<_> = response.audio.collect().await;
        assert!(!audio.is_empty());
        assert_eq!(orchestrator.conversation().message_count(), 2);
    }

    #[tokio::test]
    async fn test_empty_transcript_speaks_fallback_without_generation() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut orchestrator = orchestrator(
            ScriptedStt {
                partials: vec![],
                final_text: "",
            },
            calls.clone(),
            "never spoken",
        );

        let response = orchestrator
            .run_turn(utterance(8_000), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(response.text, PipelineSettings::default().fallback_text);
        assert_eq!(response.intent, Intent::Unknown);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(orchestrator.conversation().message_count(), 0);
    }

    #[tokio::test]
    async fn test_history_accumulates_across_turns() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut orchestrator = orchestrator(
            ScriptedStt {
                partials: vec!["hello there"],
                final_text: "hello there",
            },
            calls,
            "Welcome in!",
        );

        for _ in 0..2 {
            orchestrator
                .run_turn(utterance(8_000), CancellationToken::new())
                .await
                .unwrap();
        }

        assert_eq!(orchestrator.conversation().message_count(), 4);
        assert_eq!(orchestrator.conversation().last_intent(), Some(Intent::Greeting));
    }

    #[tokio::test]
    async fn test_exhausted_generation_chain_fails_the_turn() {
        let mut orchestrator = orchestrator_with_providers(
            ScriptedStt {
                partials: vec!["when does breakfast"],
                final_text: "when does breakfast start",
            },
            vec![
                ("a".to_string(), Arc::new(FailingGen) as Arc<dyn GenerationPort>),
                ("b".to_string(), Arc::new(FailingGen) as Arc<dyn GenerationPort>),
            ],
        );

        let result = orchestrator
            .run_turn(utterance(8_000), CancellationToken::new())
            .await;

        match result {
            Err(crate::error::AgentError::ChainExhausted(failure)) => {
                assert_eq!(failure.errors.len(), 2);
            }
            other => panic!(
                "expected ChainExhausted, got {:?}",
                other.map(|response| response.text)
            ),
        }
        // The guest's words entered the history; no answer was invented.
        assert_eq!(orchestrator.conversation().message_count(), 1);
    }
}
