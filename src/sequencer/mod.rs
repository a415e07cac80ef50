// Sequencer module - patterns, sequences, songs and the timebase map

pub mod manager;
pub mod pattern;
pub mod sequence;
pub mod song;
pub mod step_event;
pub mod timebase;

pub use manager::PatternManager;
pub use pattern::{Pattern, PatternId, CLOCKS_PER_BEAT, VALID_STEPS_PER_BEAT};
pub use sequence::{PlayMode, PlayState, Placement, Sequence, SequenceId, NO_TRIGGER};
pub use song::{Song, SongId};
pub use step_event::StepEvent;
pub use timebase::{Timebase, TimebaseEvent, TimebaseEventKind, DEFAULT_TEMPO, DEFAULT_TIMESIG};
