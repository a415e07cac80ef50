// MIDI wire types and host port adapters

pub mod input;
pub mod message;
pub mod output;

pub use input::MidiInput;
pub use message::MidiMessage;
pub use output::{MidiOutputBuffer, MidiSender};
