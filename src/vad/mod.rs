//! Voice-activity segmentation.
//!
//! A frame-level speech classifier labels fixed-duration PCM frames, and the
//! segmenter state machine turns those labels into discrete utterances:
//! armed after a run of consecutive speech frames, closed after a run of
//! consecutive silence frames.

use crate::config::SegmenterSettings;
use crate::error::Result;
use std::time::Instant;
use strum::Display;

pub mod segmenter;
pub mod silero;

pub use segmenter::VoiceSegmenter;
pub use silero::SileroClassifier;

/// Segmenter state. Silence only counts toward a close once `InSpeech` has
/// been entered; pre-speech silence is inert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SegmenterState {
    Idle,
    InSpeech,
}

/// One contiguous span of detected speech, bounded by silence on both sides.
#[derive(Debug, Clone)]
pub struct Utterance {
    pub samples: Vec<i16>,
    pub started_at: Instant,
    /// True for a normal silence-timeout close, false for a force-close
    /// (utterance length cap).
    pub closed_by_silence: bool,
}

impl Utterance {
    pub fn duration_ms(&self, sample_rate: u32) -> f32 {
        (self.samples.len() as f32 / sample_rate as f32) * 1000.0
    }
}

/// Boundary events emitted by the segmenter.
#[derive(Debug, Clone)]
pub enum SegmenterEvent {
    /// The min-speech threshold was reached; buffering has begun.
    SpeechStarted,
    /// A buffered utterance closed by silence timeout (or force-close).
    UtteranceEnded(Utterance),
}

/// Frame-level speech classifier capability.
///
/// `frame` is always exactly the configured frame size. Implementations that
/// fail on a frame should return an error; the segmenter counts classifier
/// errors as silence rather than propagating them.
pub trait FrameClassifier: Send {
    fn classify(&mut self, frame: &[i16]) -> Result<bool>;

    /// Reset any internal classifier state between utterances.
    fn reset(&mut self) {}
}

/// Build the production segmenter backed by the Silero classifier.
pub fn create_segmenter(settings: SegmenterSettings) -> Result<VoiceSegmenter> {
    let classifier = SileroClassifier::new(&settings)?;
    Ok(VoiceSegmenter::new(settings, Box::new(classifier)))
}
