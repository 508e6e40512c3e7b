//! System-prompt assembly.
//!
//! The prompt adapts per utterance: tone shifts with the caller's detected
//! emotional state, the assistant turns cautious when knowledge retrieval
//! scored poorly, and it switches to short answers when upstream latency
//! has already kept the guest waiting.

use crate::ports::{EmotionalState, GenerationRequest};

/// Knowledge context is trimmed to roughly this many characters before it
/// goes into the prompt.
const MAX_CONTEXT_CHARS: usize = 2500;

/// Retrieval below this confidence makes the assistant hedge instead of
/// asserting.
const LOW_CONFIDENCE: f32 = 0.5;

/// Upstream latency above this many milliseconds switches to brief answers.
const SLOW_TURN_MS: u64 = 6000;

pub struct PromptFactory {
    language: String,
}

impl PromptFactory {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
        }
    }

    /// Build the full system prompt for one generation request.
    pub fn build_system_prompt(&self, request: &GenerationRequest) -> String {
        let mut sections = vec![format!(
            "You are the front-desk voice assistant of a hotel. You help guests \
             with check-in, bookings, amenities and local information. Answer in \
             {}. Your replies are spoken aloud, so never use markup, lists or \
             emoji.",
            self.language
        )];

        sections.push(self.tone_for(request.emotional_state).to_string());

        if request.upstream_latency_ms > SLOW_TURN_MS {
            sections.push(
                "The guest has already been waiting. Answer in one short sentence.".to_string(),
            );
        }

        if !request.knowledge_context.is_empty() {
            let context = trim_context(&request.knowledge_context);
            if request.knowledge_confidence < LOW_CONFIDENCE {
                sections.push(format!(
                    "The following notes MAY be relevant but are low-confidence. \
                     Use them cautiously and say so when you are unsure:\n{}",
                    context
                ));
            } else {
                sections.push(format!("Relevant hotel information:\n{}", context));
            }
        } else {
            sections.push(
                "No hotel records matched this question. If it is about specifics \
                 you do not know, say so and offer to call reception."
                    .to_string(),
            );
        }

        if !request.conversation_history.is_empty() {
            sections.push(format!(
                "Conversation so far:\n{}",
                request.conversation_history
            ));
        }

        sections.join("\n\n")
    }

    fn tone_for(&self, state: EmotionalState) -> &'static str {
        match state {
            EmotionalState::Neutral => "Keep a friendly, professional tone.",
            EmotionalState::Frustrated => {
                "The guest sounds frustrated. Be extra patient, acknowledge the \
                 inconvenience, and get to a concrete resolution quickly."
            }
            EmotionalState::Hurried => {
                "The guest is in a hurry. Skip pleasantries and answer in as few \
                 words as possible."
            }
            EmotionalState::Cheerful => {
                "The guest sounds cheerful. Match their warmth while staying \
                 concise."
            }
        }
    }
}

/// Trim context at a char boundary; marks the cut so the model does not
/// treat a truncated sentence as complete.
fn trim_context(context: &str) -> String {
    if context.chars().count() <= MAX_CONTEXT_CHARS {
        return context.to_string();
    }
    let trimmed: String = context.chars().take(MAX_CONTEXT_CHARS).collect();
    format!("{}…", trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with(state: EmotionalState) -> GenerationRequest {
        GenerationRequest {
            user_message: "is the pool open".to_string(),
            knowledge_context: "Pool hours: 7:00-22:00.".to_string(),
            knowledge_confidence: 0.9,
            emotional_state: state,
            ..Default::default()
        }
    }

    #[test]
    fn test_tone_tracks_emotional_state() {
        let factory = PromptFactory::new("English");
        let neutral = factory.build_system_prompt(&request_with(EmotionalState::Neutral));
        let hurried = factory.build_system_prompt(&request_with(EmotionalState::Hurried));

        assert!(neutral.contains("friendly, professional"));
        assert!(hurried.contains("in a hurry"));
        assert!(hurried.contains("Pool hours"));
    }

    #[test]
    fn test_low_confidence_hedges() {
        let factory = PromptFactory::new("English");
        let mut request = request_with(EmotionalState::Neutral);
        request.knowledge_confidence = 0.3;

        let prompt = factory.build_system_prompt(&request);
        assert!(prompt.contains("low-confidence"));
    }

    #[test]
    fn test_slow_turn_requests_brevity() {
        let factory = PromptFactory::new("English");
        let mut request = request_with(EmotionalState::Neutral);
        request.upstream_latency_ms = 8000;

        let prompt = factory.build_system_prompt(&request);
        assert!(prompt.contains("one short sentence"));
    }

    #[test]
    fn test_long_context_is_trimmed() {
        let long = "x".repeat(6000);
        let trimmed = trim_context(&long);
        assert!(trimmed.chars().count() <= MAX_CONTEXT_CHARS + 1);
        assert!(trimmed.ends_with('…'));
    }

    #[test]
    fn test_empty_context_offers_reception() {
        let factory = PromptFactory::new("English");
        let mut request = request_with(EmotionalState::Neutral);
        request.knowledge_context.clear();

        let prompt = factory.build_system_prompt(&request);
        assert!(prompt.contains("call reception"));
    }
}
