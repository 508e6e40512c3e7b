//! Two-tier generation: a cheap fast pass first, escalation when the fast
//! answer is unusable.
//!
//! The fast tier runs without tools and its output is only accepted when it
//! lands inside the short-response word range. Empty output, an over-long
//! answer or a failed fast pass all escalate to the full-capability tier,
//! where tool calls are intercepted and their confirmation text spliced into
//! the spoken response.

use crate::bus::CommandBus;
use crate::config::TieringSettings;
use crate::error::{AgentError, Result};
use crate::llm::prompts::PromptFactory;
use crate::llm::tools::{ToolRegistry, TOOL_APOLOGY};
use crate::ports::{GenUnit, GenerationRequest};
use futures_util::StreamExt;
use std::sync::Arc;

pub struct TieredGeneration {
    bus: Arc<CommandBus>,
    settings: TieringSettings,
    tools: Arc<ToolRegistry>,
    prompts: PromptFactory,
}

impl TieredGeneration {
    pub fn new(
        bus: Arc<CommandBus>,
        settings: TieringSettings,
        tools: Arc<ToolRegistry>,
        prompts: PromptFactory,
    ) -> Self {
        Self {
            bus,
            settings,
            tools,
            prompts,
        }
    }

    /// Produce the full response text for one utterance.
    pub async fn generate(&self, request: GenerationRequest) -> Result<String> {
        match self.fast_pass(&request).await {
            Ok(Some(text)) => return Ok(text),
            Ok(None) => {}
            Err(e) => {
                log::warn!("⚠️ Fast tier failed, escalating: {}", e);
            }
        }
        self.escalated_pass(&request).await
    }

    /// Fast tier: no tools. Returns `Ok(None)` when the answer must escalate.
    async fn fast_pass(&self, request: &GenerationRequest) -> Result<Option<String>> {
        let mut fast_request = request.clone();
        fast_request.tools = None;
        fast_request.system_prompt = Some(self.prompts.build_system_prompt(&fast_request));

        let mut stream = self.bus.generate_stream(fast_request);
        let mut text = String::new();
        let mut saw_tool_call = false;

        while let Some(unit) = stream.next().await {
            match unit? {
                GenUnit::Text(piece) => text.push_str(&piece),
                GenUnit::ToolCall(call) => {
                    // Tools are not offered in this tier; a call means the
                    // request needs the full tier anyway.
                    log::warn!("⚠️ Fast tier emitted tool call '{}', escalating", call.name);
                    saw_tool_call = true;
                }
            }
        }

        let text = text.trim().to_string();
        let words = text.split_whitespace().count();

        if saw_tool_call {
            return Ok(None);
        }
        if words < self.settings.short_response_min_words {
            log::info!("📈 Fast tier returned nothing usable, escalating");
            return Ok(None);
        }
        if words > self.settings.short_response_max_words {
            log::info!(
                "📈 Fast tier answer too long ({} words > {}), escalating",
                words,
                self.settings.short_response_max_words
            );
            return Ok(None);
        }

        log::info!("⚡ Fast tier accepted ({} words)", words);
        Ok(Some(text))
    }

    /// Escalated tier: tools offered, tool calls intercepted and executed.
    async fn escalated_pass(&self, request: &GenerationRequest) -> Result<String> {
        let mut full_request = request.clone();
        full_request.tools = if self.tools.is_empty() {
            None
        } else {
            Some(self.tools.definitions())
        };
        full_request.system_prompt = Some(self.prompts.build_system_prompt(&full_request));

        let mut stream = self.bus.generate_stream(full_request);
        let mut text = String::new();

        while let Some(unit) = stream.next().await {
            match unit? {
                GenUnit::Text(piece) => text.push_str(&piece),
                GenUnit::ToolCall(call) => match self.tools.execute(&call).await {
                    Ok(confirmation) => {
                        if !text.is_empty() && !text.ends_with(char::is_whitespace) {
                            text.push(' ');
                        }
                        text.push_str(&confirmation);
                    }
                    Err(e) => {
                        log::warn!("❌ Tool '{}' failed: {}", call.name, e);
                        if !text.is_empty() && !text.ends_with(char::is_whitespace) {
                            text.push(' ');
                        }
                        text.push_str(TOOL_APOLOGY);
                    }
                },
            }
        }

        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(AgentError::Generation(
                "escalated tier returned an empty response".to_string(),
            ));
        }

        log::info!(
            "🧠 Escalated tier answered ({} words)",
            text.split_whitespace().count()
        );
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::ProviderChain;
    use crate::config::ResilienceSettings;
    use crate::llm::tools::booking_tool;
    use crate::ports::{
        GenerationPort, KnowledgeHit, KnowledgePort, RepositoryPort, SynthesisPort, TextStream,
        ToolInvocation,
    };
    use async_trait::async_trait;
    use futures_util::stream::BoxStream;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Generation provider that answers differently depending on whether
    /// tools were offered (i.e. which tier is calling).
    struct TierAwareGen {
        fast: Vec<GenUnit>,
        escalated: Vec<GenUnit>,
        fast_calls: Arc<AtomicU32>,
        escalated_calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl GenerationPort for TierAwareGen {
        fn name(&self) -> &str {
            "tier-aware"
        }

        async fn generate_stream(
            &self,
            request: &GenerationRequest,
        ) -> Result<BoxStream<'static, Result<GenUnit>>> {
            let units = if request.tools.is_some() {
                self.escalated_calls.fetch_add(1, Ordering::SeqCst);
                self.escalated.clone()
            } else {
                self.fast_calls.fetch_add(1, Ordering::SeqCst);
                self.fast.clone()
            };
            Ok(Box::pin(futures_util::stream::iter(
                units.into_iter().map(Ok),
            )))
        }

        async fn health_check(&self) -> bool {
            true
        }
    }

    struct NoopSynth;

    #[async_trait]
    impl SynthesisPort for NoopSynth {
        fn name(&self) -> &str {
            "noop"
        }
        async fn synthesize_stream(
            &self,
            _text: TextStream,
        ) -> Result<BoxStream<'static, Result<Vec<u8>>>> {
            Ok(Box::pin(futures_util::stream::empty()))
        }
        async fn health_check(&self) -> bool {
            true
        }
    }

    struct NoopKnowledge;

    #[async_trait]
    impl KnowledgePort for NoopKnowledge {
        async fn search(&self, _q: &str, _k: usize, _s: f32) -> Result<Vec<KnowledgeHit>> {
            Ok(Vec::new())
        }
    }

    struct FlakyRepo {
        accept: bool,
    }

    #[async_trait]
    impl RepositoryPort for FlakyRepo {
        async fn save_booking(&self, _data: Value) -> Result<bool> {
            Ok(self.accept)
        }
        async fn log_interaction(&self, _u: &str, _i: &str, _r: &str) -> Result<()> {
            Ok(())
        }
    }

    struct Harness {
        tiering: TieredGeneration,
        fast_calls: Arc<AtomicU32>,
        escalated_calls: Arc<AtomicU32>,
    }

    fn harness(fast: Vec<GenUnit>, escalated: Vec<GenUnit>, repo_accepts: bool) -> Harness {
        let fast_calls = Arc::new(AtomicU32::new(0));
        let escalated_calls = Arc::new(AtomicU32::new(0));

        let provider: Arc<dyn GenerationPort> = Arc::new(TierAwareGen {
            fast,
            escalated,
            fast_calls: fast_calls.clone(),
            escalated_calls: escalated_calls.clone(),
        });

        let resilience = ResilienceSettings {
            max_retries: 0,
            initial_delay: Duration::from_millis(1),
            ..Default::default()
        };
        let generation =
            ProviderChain::new("generation", vec![("tier-aware".to_string(), provider)], &resilience)
                .unwrap();
        let synthesis = ProviderChain::new(
            "synthesis",
            vec![("noop".to_string(), Arc::new(NoopSynth) as Arc<dyn SynthesisPort>)],
            &resilience,
        )
        .unwrap();

        let repo: Arc<dyn RepositoryPort> = Arc::new(FlakyRepo {
            accept: repo_accepts,
        });
        let bus = Arc::new(CommandBus::new(
            generation,
            synthesis,
            Arc::new(NoopKnowledge),
            repo.clone(),
            resilience,
        ));

        let mut registry = ToolRegistry::new();
        registry.register(booking_tool(repo));

        Harness {
            tiering: TieredGeneration::new(
                bus,
                TieringSettings::default(),
                Arc::new(registry),
                PromptFactory::new("English"),
            ),
            fast_calls,
            escalated_calls,
        }
    }

    fn text(s: &str) -> GenUnit {
        GenUnit::Text(s.to_string())
    }

    fn booking_call() -> GenUnit {
        GenUnit::ToolCall(ToolInvocation {
            name: "save_booking".to_string(),
            arguments: json!({ "service": "the spa" }),
        })
    }

    #[tokio::test]
    async fn test_short_fast_answer_accepted_without_escalation() {
        let h = harness(
            vec![text("Yes, "), text("the pool is open.")],
            vec![text("unused")],
            true,
        );

        let answer = h.tiering.generate(GenerationRequest::default()).await.unwrap();
        assert_eq!(answer, "Yes, the pool is open.");
        assert_eq!(h.fast_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.escalated_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_fast_answer_escalates() {
        let h = harness(vec![], vec![text("Here is the full answer.")], true);

        let answer = h.tiering.generate(GenerationRequest::default()).await.unwrap();
        assert_eq!(answer, "Here is the full answer.");
        assert_eq!(h.escalated_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_overlong_fast_answer_escalates() {
        let long = (0..40).map(|i| format!("word{}", i)).collect::<Vec<_>>().join(" ");
        let h = harness(vec![text(&long)], vec![text("Short and fixed.")], true);

        let answer = h.tiering.generate(GenerationRequest::default()).await.unwrap();
        assert_eq!(answer, "Short and fixed.");
        assert_eq!(h.escalated_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_tool_call_confirmation_spliced_into_answer() {
        let h = harness(
            vec![],
            vec![text("Of course."), booking_call()],
            true,
        );

        let answer = h.tiering.generate(GenerationRequest::default()).await.unwrap();
        assert!(answer.starts_with("Of course."));
        assert!(answer.contains("booked the spa"));
    }

    #[tokio::test]
    async fn test_tool_failure_becomes_spoken_apology() {
        let h = harness(vec![], vec![booking_call()], false);

        let answer = h.tiering.generate(GenerationRequest::default()).await.unwrap();
        assert_eq!(answer, TOOL_APOLOGY);
    }

    #[tokio::test]
    async fn test_both_tiers_empty_is_an_error() {
        let h = harness(vec![], vec![], true);
        let result = h.tiering.generate(GenerationRequest::default()).await;
        assert!(matches!(result, Err(AgentError::Generation(_))));
    }
}
