use std::env;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {reason}")]
    InvalidValue { var: String, reason: String },
    #[error("Environment error: {0}")]
    EnvError(#[from] env::VarError),
}

/// Tuning for the voice segmenter state machine.
#[derive(Debug, Clone)]
pub struct SegmenterSettings {
    /// Sample rate in Hz. Classifier frames are sized from this.
    pub sample_rate: u32,
    /// Classifier frame duration in milliseconds (10, 20 or 30).
    pub frame_duration_ms: u32,
    /// Consecutive speech frames required before an utterance is armed.
    pub min_speech_frames: usize,
    /// Consecutive silence frames (after speech) that close an utterance.
    pub silence_stop_frames: usize,
    /// Hard cap on buffered utterance audio; force-closes when exceeded.
    pub max_utterance_secs: u32,
    /// Speech probability threshold for the Silero classifier.
    pub speech_threshold: f32,
}

impl Default for SegmenterSettings {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            frame_duration_ms: 30,
            min_speech_frames: 5,
            // 1500ms of silence at 30ms frames
            silence_stop_frames: 50,
            max_utterance_secs: 30,
            speech_threshold: 0.5,
        }
    }
}

impl SegmenterSettings {
    /// Classifier frame size in samples.
    pub fn frame_samples(&self) -> usize {
        (self.sample_rate as usize * self.frame_duration_ms as usize) / 1000
    }

    /// Maximum buffered samples before a force-close.
    pub fn max_utterance_samples(&self) -> usize {
        self.sample_rate as usize * self.max_utterance_secs as usize
    }
}

/// Per-provider failure-recovery tuning shared by every chain link.
#[derive(Debug, Clone)]
pub struct ResilienceSettings {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// Deadline wrapped around each generation attempt.
    pub generation_timeout: Duration,
    /// Deadline wrapped around each synthesis attempt.
    pub synthesis_timeout: Duration,
}

impl Default for ResilienceSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(30),
            max_retries: 2,
            initial_delay: Duration::from_millis(300),
            max_delay: Duration::from_secs(5),
            backoff_factor: 2.0,
            generation_timeout: Duration::from_secs(5),
            synthesis_timeout: Duration::from_secs(5),
        }
    }
}

/// Tuning for the fast/escalated generation tiers.
#[derive(Debug, Clone)]
pub struct TieringSettings {
    /// Inclusive word-count range accepted from the fast tier.
    pub short_response_min_words: usize,
    pub short_response_max_words: usize,
}

impl Default for TieringSettings {
    fn default() -> Self {
        Self {
            short_response_min_words: 1,
            short_response_max_words: 25,
        }
    }
}

/// Tuning for the per-utterance orchestrator.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Partial-transcript word count that triggers the proactive lookup.
    pub proactive_min_words: usize,
    pub knowledge_top_k: usize,
    pub knowledge_min_score: f32,
    /// Recent messages included as conversation history in prompts.
    pub history_window: usize,
    /// Spoken when the final transcript is empty or unintelligible.
    pub fallback_text: String,
    pub language: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            proactive_min_words: 3,
            knowledge_top_k: 3,
            knowledge_min_score: 0.5,
            history_window: 8,
            fallback_text: "I didn't quite catch that. Could you say it again?".to_string(),
            language: "en".to_string(),
        }
    }
}

/// Top-level settings, loaded from the environment.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub segmenter: SegmenterSettings,
    pub resilience: ResilienceSettings,
    pub tiering: TieringSettings,
    pub pipeline: PipelineSettings,
}

impl Settings {
    /// Load settings from environment variables, falling back to defaults.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env if present (development convenience)
        dotenvy::dotenv().ok();

        let mut settings = Settings::default();

        if let Some(rate) = read_env_parsed::<u32>("SAMPLE_RATE")? {
            settings.segmenter.sample_rate = rate;
        }
        if let Some(ms) = read_env_parsed::<u32>("FRAME_DURATION_MS")? {
            settings.segmenter.frame_duration_ms = ms;
        }
        if let Some(frames) = read_env_parsed::<usize>("MIN_SPEECH_FRAMES")? {
            settings.segmenter.min_speech_frames = frames;
        }
        if let Some(timeout_ms) = read_env_parsed::<u64>("SILENCE_TIMEOUT_MS")? {
            let frame_ms = settings.segmenter.frame_duration_ms as u64;
            settings.segmenter.silence_stop_frames = (timeout_ms / frame_ms).max(1) as usize;
        }
        if let Some(max_words) = read_env_parsed::<usize>("SHORT_RESPONSE_MAX_WORDS")? {
            settings.tiering.short_response_max_words = max_words;
        }
        if let Some(words) = read_env_parsed::<usize>("PROACTIVE_MIN_WORDS")? {
            settings.pipeline.proactive_min_words = words;
        }
        if let Ok(language) = env::var("ASSISTANT_LANGUAGE") {
            settings.pipeline.language = language;
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if ![8_000, 16_000, 32_000, 48_000].contains(&self.segmenter.sample_rate) {
            return Err(ConfigError::InvalidValue {
                var: "SAMPLE_RATE".to_string(),
                reason: format!(
                    "must be 8000, 16000, 32000 or 48000, got {}",
                    self.segmenter.sample_rate
                ),
            });
        }
        if ![10, 20, 30].contains(&self.segmenter.frame_duration_ms) {
            return Err(ConfigError::InvalidValue {
                var: "FRAME_DURATION_MS".to_string(),
                reason: format!("must be 10, 20 or 30, got {}", self.segmenter.frame_duration_ms),
            });
        }
        if self.segmenter.min_speech_frames == 0 {
            return Err(ConfigError::InvalidValue {
                var: "MIN_SPEECH_FRAMES".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.tiering.short_response_min_words > self.tiering.short_response_max_words {
            return Err(ConfigError::InvalidValue {
                var: "SHORT_RESPONSE_MAX_WORDS".to_string(),
                reason: "short-response range is inverted".to_string(),
            });
        }
        Ok(())
    }
}

fn read_env_parsed<T: std::str::FromStr>(var: &str) -> Result<Option<T>, ConfigError> {
    match env::var(var) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                var: var.to_string(),
                reason: format!("could not parse '{}'", raw),
            }),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Load settings with helpful error messages for development.
pub fn load_settings() -> Result<Settings, ConfigError> {
    match Settings::load() {
        Ok(settings) => {
            log::info!("Successfully loaded pipeline settings");
            Ok(settings)
        }
        Err(e) => {
            log::error!("Configuration error: {}", e);
            Err(e)
        }
    }
}
