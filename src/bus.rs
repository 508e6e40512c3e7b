//! Command bus: operations dispatched against ordered chains of
//! interchangeable providers with automatic failover.
//!
//! Each chain link is wrapped in its own `ProviderGuard` (circuit breaker +
//! retry). A failed link is skipped in favour of the next; only when every
//! link has failed does the caller see an `AggregateFailure` enumerating the
//! per-provider errors.
//!
//! Streaming failover restarts the whole request against the next provider.
//! Units from an attempt are buffered until that attempt's stream ends
//! cleanly (buffer-and-discard), so a provider that dies mid-stream never
//! leaks a partial prefix downstream.

use crate::config::ResilienceSettings;
use crate::error::{AgentError, Result};
use crate::ports::{
    GenUnit, GenerationPort, GenerationRequest, KnowledgeHit, KnowledgePort, RepositoryPort,
    SynthesisPort,
};
use crate::resilience::ProviderGuard;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

/// Failure raised when every provider in a chain has been exhausted.
#[derive(Debug, Error)]
pub struct AggregateFailure {
    pub capability: String,
    /// (provider name, failure cause) per attempted link, in chain order.
    pub errors: Vec<(String, String)>,
}

impl std::fmt::Display for AggregateFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "all {} providers exhausted ({} failures): ",
            self.capability,
            self.errors.len()
        )?;
        let causes = self
            .errors
            .iter()
            .map(|(name, cause)| format!("{}: {}", name, cause))
            .collect::<Vec<_>>()
            .join("; ");
        write!(f, "[{}]", causes)
    }
}

struct ChainLink<P: ?Sized> {
    name: String,
    provider: Arc<P>,
    guard: Mutex<ProviderGuard>,
}

/// Ordered, non-empty sequence of interchangeable providers for one
/// capability. Index 0 is the primary. Immutable after construction and
/// safely shared across concurrent turns.
pub struct ProviderChain<P: ?Sized> {
    capability: String,
    links: Vec<ChainLink<P>>,
}

impl<P: ?Sized + Send + Sync + 'static> ProviderChain<P> {
    /// Build a chain. An empty provider list is a configuration error and
    /// fatal at startup.
    pub fn new(
        capability: impl Into<String>,
        providers: Vec<(String, Arc<P>)>,
        settings: &ResilienceSettings,
    ) -> Result<Self> {
        let capability = capability.into();
        if providers.is_empty() {
            return Err(AgentError::Config(format!(
                "provider chain for '{}' is empty",
                capability
            )));
        }

        let links = providers
            .into_iter()
            .map(|(name, provider)| ChainLink {
                name,
                provider,
                guard: Mutex::new(ProviderGuard::new(settings)),
            })
            .collect();

        Ok(Self { capability, links })
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Execute a one-shot operation with failover.
    pub async fn invoke<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn(Arc<P>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut errors = Vec::new();

        for (i, link) in self.links.iter().enumerate() {
            let mut guard = link.guard.lock().await;
            let attempt = guard.guard(|| op(link.provider.clone())).await;
            drop(guard);

            match attempt {
                Ok(value) => return Ok(value),
                Err(e) => {
                    log::warn!(
                        "⚠️ {} provider '{}' failed: {}",
                        self.capability,
                        link.name,
                        e
                    );
                    errors.push((link.name.clone(), e.to_string()));
                    if i + 1 < self.links.len() {
                        log::info!("🔄 Failing over to next {} provider", self.capability);
                    }
                }
            }
        }

        Err(AggregateFailure {
            capability: self.capability.clone(),
            errors,
        }
        .into())
    }

    /// Execute a streaming operation with failover.
    ///
    /// Each attempt's units are buffered until the attempt's stream ends
    /// cleanly and only then flushed to the caller; a mid-stream failure
    /// discards the buffer and restarts the whole request against the next
    /// provider (requests are idempotent per attempt). `attempt_timeout`
    /// bounds each attempt's drain so a stalled provider feeds the same
    /// failover path as an erroring one.
    pub fn invoke_stream<T, F, Fut>(
        self: Arc<Self>,
        op: F,
        attempt_timeout: Duration,
    ) -> BoxStream<'static, Result<T>>
    where
        T: Send + 'static,
        F: Fn(Arc<P>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<BoxStream<'static, Result<T>>>> + Send,
    {
        let chain = self;
        Box::pin(async_stream::stream! {
            let mut errors: Vec<(String, String)> = Vec::new();
            let mut flushed = false;

            for (i, link) in chain.links.iter().enumerate() {
                let mut guard = link.guard.lock().await;
                let opened = guard.guard(|| op(link.provider.clone())).await;
                drop(guard);

                let stream = match opened {
                    Ok(stream) => stream,
                    Err(e) => {
                        log::warn!(
                            "⚠️ {} provider '{}' failed to start stream: {}",
                            chain.capability,
                            link.name,
                            e
                        );
                        errors.push((link.name.clone(), e.to_string()));
                        if i + 1 < chain.links.len() {
                            log::info!("🔄 Failing over to next {} provider", chain.capability);
                        }
                        continue;
                    }
                };

                match drain_attempt(stream, attempt_timeout).await {
                    Ok(buffered) => {
                        link.guard.lock().await.record_success();
                        for unit in buffered {
                            yield Ok(unit);
                        }
                        flushed = true;
                        break;
                    }
                    Err(e) => {
                        link.guard.lock().await.record_failure();
                        log::warn!(
                            "⚠️ {} provider '{}' failed mid-stream, discarding attempt: {}",
                            chain.capability,
                            link.name,
                            e
                        );
                        errors.push((link.name.clone(), e.to_string()));
                        if i + 1 < chain.links.len() {
                            log::info!(
                                "🔄 Restarting request on next {} provider",
                                chain.capability
                            );
                        }
                    }
                }
            }

            if !flushed {
                yield Err(AggregateFailure {
                    capability: chain.capability.clone(),
                    errors,
                }
                .into());
            }
        })
    }
}

/// Drain one attempt's stream fully, bounded by a deadline. Failures come
/// back as a plain cause string for the aggregate error.
async fn drain_attempt<T>(
    mut stream: BoxStream<'static, Result<T>>,
    attempt_timeout: Duration,
) -> std::result::Result<Vec<T>, String> {
    let drained = tokio::time::timeout(attempt_timeout, async {
        let mut buffered = Vec::new();
        while let Some(item) = stream.next().await {
            match item {
                Ok(unit) => buffered.push(unit),
                Err(e) => return Err(e.to_string()),
            }
        }
        Ok(buffered)
    })
    .await;

    match drained {
        Ok(result) => result,
        Err(_) => Err(format!(
            "stream attempt timed out (>{:.0}s)",
            attempt_timeout.as_secs_f64()
        )),
    }
}

/// Dispatch layer over the capability chains: one method per operation.
pub struct CommandBus {
    generation: Arc<ProviderChain<dyn GenerationPort>>,
    synthesis: Arc<ProviderChain<dyn SynthesisPort>>,
    knowledge: Arc<dyn KnowledgePort>,
    repository: Arc<dyn RepositoryPort>,
    resilience: ResilienceSettings,
}

impl CommandBus {
    pub fn new(
        generation: ProviderChain<dyn GenerationPort>,
        synthesis: ProviderChain<dyn SynthesisPort>,
        knowledge: Arc<dyn KnowledgePort>,
        repository: Arc<dyn RepositoryPort>,
        resilience: ResilienceSettings,
    ) -> Self {
        log::info!(
            "🚌 Command bus ready ({} generation providers, {} synthesis providers)",
            generation.len(),
            synthesis.len()
        );
        Self {
            generation: Arc::new(generation),
            synthesis: Arc::new(synthesis),
            knowledge,
            repository,
            resilience,
        }
    }

    /// Stream generated units for a request through the generation chain.
    pub fn generate_stream(
        &self,
        request: GenerationRequest,
    ) -> BoxStream<'static, Result<GenUnit>> {
        let timeout = self.resilience.generation_timeout;
        self.generation.clone().invoke_stream(
            move |provider| {
                let request = request.clone();
                async move {
                    match tokio::time::timeout(timeout, provider.generate_stream(&request)).await {
                        Ok(result) => result,
                        Err(_) => Err(AgentError::Generation(format!(
                            "provider did not start streaming within {:.0}s",
                            timeout.as_secs_f64()
                        ))),
                    }
                }
            },
            timeout,
        )
    }

    /// Synthesize assembled response text through the synthesis chain. The
    /// text is owned so each failover attempt can rebuild a fresh input
    /// stream from scratch.
    pub fn synthesize_stream(&self, text: String) -> BoxStream<'static, Result<Vec<u8>>> {
        let timeout = self.resilience.synthesis_timeout;
        self.synthesis.clone().invoke_stream(
            move |provider| {
                let text = text.clone();
                async move {
                    let pieces: Vec<String> =
                        text.split_inclusive(['.', '!', '?']).map(str::to_string).collect();
                    let text_stream = Box::pin(futures_util::stream::iter(pieces));
                    match tokio::time::timeout(timeout, provider.synthesize_stream(text_stream))
                        .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(AgentError::Synthesis(format!(
                            "provider did not start streaming within {:.0}s",
                            timeout.as_secs_f64()
                        ))),
                    }
                }
            },
            timeout,
        )
    }

    /// Ranked knowledge lookup. Single adapter today, so no chain.
    pub async fn search_knowledge(
        &self,
        query_text: &str,
        top_k: usize,
        min_score: f32,
    ) -> Result<Vec<KnowledgeHit>> {
        self.knowledge.search(query_text, top_k, min_score).await
    }

    pub async fn save_booking(&self, data: Value) -> Result<bool> {
        self.repository.save_booking(data).await
    }

    pub async fn log_interaction(
        &self,
        user_text: &str,
        intent: &str,
        response: &str,
    ) -> Result<()> {
        self.repository.log_interaction(user_text, intent, response).await
    }

    pub fn repository(&self) -> Arc<dyn RepositoryPort> {
        self.repository.clone()
    }
}
