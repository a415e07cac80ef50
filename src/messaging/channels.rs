// Communication channels lock-free

use crate::midi::message::MidiMessage;
use ringbuf::{traits::Split, HeapRb};

pub type MidiInProducer = ringbuf::HeapProd<MidiMessage>;
pub type MidiInConsumer = ringbuf::HeapCons<MidiMessage>;

/// SPSC channel carrying parsed host MIDI input from the midir callback
/// thread into the realtime cycle.
pub fn create_midi_in_channel(capacity: usize) -> (MidiInProducer, MidiInConsumer) {
    let rb = HeapRb::<MidiMessage>::new(capacity);
    rb.split()
}
