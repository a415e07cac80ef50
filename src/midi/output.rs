// MIDI output - host buffer abstraction and direct send interface

use crate::engine::scheduler::Scheduler;
use crate::host::timing::AudioTiming;
use crate::midi::message::{
    MidiMessage, MIDI_CLOCK, MIDI_CONTINUE, MIDI_START, MIDI_STOP,
};
use std::sync::Arc;

/// Per-period MIDI output buffer, the engine-side view of the host's port
/// buffer. Events carry a sample offset within the period. Capacity is fixed
/// up front so the realtime callback never allocates.
#[derive(Debug)]
pub struct MidiOutputBuffer {
    events: Vec<(u32, MidiMessage)>,
    capacity: usize,
}

impl MidiOutputBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Reserve a slot at `offset`. Returns false when the buffer is full,
    /// which stops the scheduler drain for this period.
    pub fn write(&mut self, offset: u32, msg: MidiMessage) -> bool {
        if self.events.len() >= self.capacity {
            return false;
        }
        self.events.push((offset, msg));
        true
    }

    /// Events written this period, in write order (ascending offsets).
    pub fn events(&self) -> &[(u32, MidiMessage)] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

/// Direct MIDI interface: immediate control messages and one-shot notes,
/// queued through the scheduler from any control thread.
pub struct MidiSender {
    scheduler: Arc<Scheduler>,
    timing: Arc<AudioTiming>,
}

impl MidiSender {
    pub fn new(scheduler: Arc<Scheduler>, timing: Arc<AudioTiming>) -> Self {
        Self { scheduler, timing }
    }

    /// Play a note now; the note-off is a scheduler entry `duration_ms`
    /// ahead, so delivery is sample-accurate and needs no timer thread.
    /// `duration_ms == 0` leaves the note hanging for the caller to release.
    pub fn play_note(&self, note: u8, velocity: u8, channel: u8, duration_ms: u32) {
        if note > 127 || velocity > 127 || channel > 15 || duration_ms > 60_000 {
            return;
        }
        self.scheduler
            .send_now(MidiMessage::note_on(channel, note, velocity));
        if duration_ms > 0 {
            let off_frame = self.timing.current_sample() + self.timing.ms_to_samples(duration_ms);
            self.scheduler
                .schedule(off_frame, MidiMessage::note_off(channel, note));
        }
    }

    pub fn send_start(&self) {
        self.scheduler.send_now(MidiMessage::realtime(MIDI_START));
    }

    pub fn send_stop(&self) {
        self.scheduler.send_now(MidiMessage::realtime(MIDI_STOP));
    }

    pub fn send_continue(&self) {
        self.scheduler.send_now(MidiMessage::realtime(MIDI_CONTINUE));
    }

    pub fn send_clock(&self) {
        self.scheduler.send_now(MidiMessage::realtime(MIDI_CLOCK));
    }

    /// `pos` is in MIDI beats (sixteenth notes), 14 bits.
    pub fn send_song_position(&self, pos: u16) {
        self.scheduler.send_now(MidiMessage::song_position(pos));
    }

    pub fn send_song_select(&self, song: u8) {
        if song > 127 {
            return;
        }
        self.scheduler.send_now(MidiMessage::song_select(song));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::message::MIDI_NOTE_ON;

    #[test]
    fn test_buffer_capacity() {
        let mut buffer = MidiOutputBuffer::new(2);
        assert!(buffer.write(0, MidiMessage::note_on(0, 60, 100)));
        assert!(buffer.write(1, MidiMessage::note_on(0, 62, 100)));
        assert!(!buffer.write(2, MidiMessage::note_on(0, 64, 100)));
        assert_eq!(buffer.len(), 2);
        buffer.clear();
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_play_note_schedules_note_off() {
        let scheduler = Arc::new(Scheduler::new());
        let timing = Arc::new(AudioTiming::new(48_000));
        timing.advance(1000);
        let sender = MidiSender::new(Arc::clone(&scheduler), timing);

        sender.play_note(60, 100, 0, 500);
        // 500 ms at 48 kHz = 24000 samples after "now"
        let queue = scheduler.lock_queue();
        let off = queue.get(&25_000).unwrap();
        assert_eq!(off[0], MidiMessage::note_off(0, 60));
        let on = queue.get(&0).unwrap();
        assert_eq!(on[0].status(), MIDI_NOTE_ON);
        assert_eq!(on[0].value2, 100);
    }

    #[test]
    fn test_play_note_validation() {
        let scheduler = Arc::new(Scheduler::new());
        let timing = Arc::new(AudioTiming::new(48_000));
        let sender = MidiSender::new(Arc::clone(&scheduler), timing);

        sender.play_note(128, 100, 0, 100);
        sender.play_note(60, 128, 0, 100);
        sender.play_note(60, 100, 16, 100);
        sender.play_note(60, 100, 0, 60_001);
        assert_eq!(scheduler.pending(), 0);
    }
}
