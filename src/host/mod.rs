// Host layer - cpal period clock, midir ports, shared sample timing

pub mod driver;
pub mod timing;

pub use driver::HostDriver;
pub use timing::AudioTiming;

/// Host initialisation error types
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("No audio output device found")]
    NoAudioDevice,

    #[error("Audio stream error: {0}")]
    Stream(String),

    #[error("MIDI error: {0}")]
    Midi(String),
}
