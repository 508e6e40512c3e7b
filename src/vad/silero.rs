//! Silero-backed frame classifier.

use crate::config::SegmenterSettings;
use crate::error::{AgentError, Result};
use crate::vad::FrameClassifier;
use voice_activity_detector::VoiceActivityDetector;

/// Frame classifier backed by the Silero neural VAD.
pub struct SileroClassifier {
    vad: VoiceActivityDetector,
    sample_rate: u32,
    chunk_size: usize,
    threshold: f32,
}

impl SileroClassifier {
    pub fn new(settings: &SegmenterSettings) -> Result<Self> {
        let chunk_size = settings.frame_samples();
        let vad = build_detector(settings.sample_rate, chunk_size)?;

        log::info!(
            "🎤 Silero classifier initialized ({}Hz, {} samples/frame, threshold {:.2})",
            settings.sample_rate,
            chunk_size,
            settings.speech_threshold
        );

        Ok(Self {
            vad,
            sample_rate: settings.sample_rate,
            chunk_size,
            threshold: settings.speech_threshold,
        })
    }
}

fn build_detector(sample_rate: u32, chunk_size: usize) -> Result<VoiceActivityDetector> {
    VoiceActivityDetector::builder()
        .sample_rate(sample_rate as i64)
        .chunk_size(chunk_size)
        .build()
        .map_err(|e| AgentError::Segmenter(format!("failed to create Silero VAD: {}", e)))
}

impl FrameClassifier for SileroClassifier {
    fn classify(&mut self, frame: &[i16]) -> Result<bool> {
        if frame.len() != self.chunk_size {
            return Err(AgentError::Segmenter(format!(
                "frame size {} does not match classifier chunk size {}",
                frame.len(),
                self.chunk_size
            )));
        }
        let probability = self.vad.predict(frame.iter().copied());
        Ok(probability >= self.threshold)
    }

    fn reset(&mut self) {
        // The detector keeps recurrent state across frames and exposes no
        // reset, so rebuild it between utterances.
        match build_detector(self.sample_rate, self.chunk_size) {
            Ok(fresh) => self.vad = fresh,
            Err(e) => log::error!("Failed to reset Silero classifier: {}", e),
        }
    }
}
