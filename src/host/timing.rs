// Host sample clock - monotone frame counter advanced by the audio callback

use std::sync::atomic::{AtomicU64, Ordering};

/// Shared sample clock for sample-accurate scheduling.
///
/// The host driver advances it once per period from the realtime callback;
/// control threads read it to timestamp future events (e.g. timed note-offs).
#[derive(Debug)]
pub struct AudioTiming {
    sample_position: AtomicU64,
    sample_rate: u32,
}

impl AudioTiming {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_position: AtomicU64::new(0),
            sample_rate,
        }
    }

    /// Current frame count since the host started.
    pub fn current_sample(&self) -> u64 {
        self.sample_position.load(Ordering::Relaxed)
    }

    /// Advance by one period (called from the audio callback).
    pub fn advance(&self, frames: u32) {
        self.sample_position
            .fetch_add(frames as u64, Ordering::Relaxed);
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Convert a millisecond duration to frames at the host rate.
    pub fn ms_to_samples(&self, ms: u32) -> u64 {
        ms as u64 * self.sample_rate as u64 / 1000
    }
}
