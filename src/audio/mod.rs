//! Audio data types and stream plumbing shared across the pipeline.

pub mod splitter;

pub use splitter::StreamSplitter;

use std::time::Instant;

/// A chunk of raw PCM audio moving through the pipeline.
///
/// Chunks are immutable after creation; arrival order is their sequence
/// position. They are cloned freely between the segmenter and splitter
/// branches.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub samples: Vec<i16>,
    pub timestamp: Instant,
}

impl AudioChunk {
    pub fn new(samples: Vec<i16>) -> Self {
        Self {
            samples,
            timestamp: Instant::now(),
        }
    }

    /// Duration of this chunk at the given sample rate.
    pub fn duration_ms(&self, sample_rate: u32) -> f32 {
        (self.samples.len() as f32 / sample_rate as f32) * 1000.0
    }
}
