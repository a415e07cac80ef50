// gridseq - realtime MIDI step sequencer and timebase engine

pub mod engine;
pub mod host;
pub mod messaging;
pub mod midi;
pub mod project;
pub mod sequencer;

// Re-export commonly used types for convenience
pub use engine::control::TransportControl;
pub use engine::position::{TransportPosition, TransportState};
pub use engine::scheduler::Scheduler;
pub use engine::transport::{TransportEngine, TICKS_PER_BEAT, TICKS_PER_CLOCK};
pub use engine::SequencerEngine;
pub use host::{AudioTiming, HostDriver, HostError};
pub use midi::{MidiMessage, MidiOutputBuffer, MidiSender};
pub use project::ProjectError;
pub use sequencer::{
    Pattern, PatternId, PatternManager, PlayMode, PlayState, Sequence, SequenceId, Song, SongId,
    StepEvent, Timebase,
};
