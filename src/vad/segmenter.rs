//! Utterance boundary detection state machine.

use crate::audio::AudioChunk;
use crate::config::SegmenterSettings;
use crate::vad::{FrameClassifier, SegmenterEvent, SegmenterState, Utterance};
use std::time::Instant;

pub struct VoiceSegmenter {
    settings: SegmenterSettings,
    classifier: Box<dyn FrameClassifier>,
    state: SegmenterState,
    speech_run: usize,
    silence_run: usize,
    buffer: Vec<i16>,
    /// Frames seen while idle, kept so the utterance includes the arming
    /// run-up instead of clipping its first syllable.
    pre_speech: Vec<i16>,
    started_at: Option<Instant>,
}

impl VoiceSegmenter {
    pub fn new(settings: SegmenterSettings, classifier: Box<dyn FrameClassifier>) -> Self {
        log::info!(
            "🎙️ Segmenter ready (frame {}ms, arm after {} speech frames, close after {} silence frames)",
            settings.frame_duration_ms,
            settings.min_speech_frames,
            settings.silence_stop_frames
        );
        Self {
            settings,
            classifier,
            state: SegmenterState::Idle,
            speech_run: 0,
            silence_run: 0,
            buffer: Vec::new(),
            pre_speech: Vec::new(),
            started_at: None,
        }
    }

    pub fn state(&self) -> SegmenterState {
        self.state
    }

    /// Feed one captured chunk. Oversized chunks are sub-split into
    /// classifier frames; a short tail is zero-padded. Each frame contributes
    /// at most one boundary event, so a chunk spanning several transitions
    /// can return several events in frame order.
    pub fn feed(&mut self, chunk: &AudioChunk) -> Vec<SegmenterEvent> {
        let frame_size = self.settings.frame_samples();
        let mut events = Vec::new();

        for frame in chunk.samples.chunks(frame_size) {
            let event = if frame.len() == frame_size {
                self.feed_frame(frame)
            } else {
                let mut padded = frame.to_vec();
                padded.resize(frame_size, 0);
                self.feed_frame(&padded)
            };
            if let Some(event) = event {
                events.push(event);
            }
        }

        events
    }

    fn feed_frame(&mut self, frame: &[i16]) -> Option<SegmenterEvent> {
        // Classifier errors (malformed frame, model hiccup) count as silence.
        let is_speech = match self.classifier.classify(frame) {
            Ok(flag) => flag,
            Err(e) => {
                log::warn!("⚠️ Classifier error, counting frame as silence: {}", e);
                false
            }
        };

        match self.state {
            SegmenterState::Idle => {
                if is_speech {
                    self.speech_run += 1;
                    self.pre_speech.extend_from_slice(frame);

                    if self.speech_run >= self.settings.min_speech_frames {
                        self.state = SegmenterState::InSpeech;
                        self.silence_run = 0;
                        self.started_at = Some(Instant::now());
                        self.buffer = std::mem::take(&mut self.pre_speech);
                        log::debug!(
                            "🎙️ Speech started ({} arming frames buffered)",
                            self.speech_run
                        );
                        return Some(SegmenterEvent::SpeechStarted);
                    }
                } else {
                    // Pre-speech silence is inert: it breaks the arming run
                    // but never advances the close counter.
                    self.speech_run = 0;
                    self.pre_speech.clear();
                }
                None
            }
            SegmenterState::InSpeech => {
                self.buffer.extend_from_slice(frame);

                if is_speech {
                    self.silence_run = 0;
                } else {
                    self.silence_run += 1;
                    if self.silence_run >= self.settings.silence_stop_frames {
                        log::debug!(
                            "⏸️ Silence timeout ({} frames), closing utterance",
                            self.silence_run
                        );
                        return Some(self.close(true));
                    }
                }

                if self.buffer.len() >= self.settings.max_utterance_samples() {
                    log::warn!(
                        "⚠️ Utterance cap reached ({} samples), force-closing",
                        self.buffer.len()
                    );
                    return Some(self.close(false));
                }

                None
            }
        }
    }

    fn close(&mut self, closed_by_silence: bool) -> SegmenterEvent {
        let utterance = Utterance {
            samples: std::mem::take(&mut self.buffer),
            started_at: self.started_at.take().unwrap_or_else(Instant::now),
            closed_by_silence,
        };
        log::info!(
            "🎙️ Utterance closed ({:.0}ms of audio)",
            utterance.duration_ms(self.settings.sample_rate)
        );

        // Re-arm with fresh counters for the next utterance.
        self.state = SegmenterState::Idle;
        self.speech_run = 0;
        self.silence_run = 0;
        self.pre_speech.clear();
        self.classifier.reset();

        SegmenterEvent::UtteranceEnded(utterance)
    }
}
