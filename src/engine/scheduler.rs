// Scheduler - sample-timestamped queue of pending MIDI messages
//
// Shared between control threads (direct sends, timed note-offs) and the
// realtime callback that drains it into the host output buffer.

use crate::midi::message::MidiMessage;
use crate::midi::output::MidiOutputBuffer;
use parking_lot::{Mutex, MutexGuard};
use std::collections::BTreeMap;
use std::time::Duration;

/// Pending messages keyed by absolute sample frame. Messages sharing a frame
/// keep insertion order.
pub type EventQueue = BTreeMap<u64, Vec<MidiMessage>>;

/// How long the realtime callback will wait for the queue lock before
/// skipping its drain for the period.
const RT_LOCK_TIMEOUT: Duration = Duration::from_micros(20);

/// Append a message at an absolute sample frame.
pub fn push_at(queue: &mut EventQueue, frame: u64, msg: MidiMessage) {
    queue.entry(frame).or_default().push(msg);
}

/// The shared schedule of outgoing MIDI.
///
/// Control threads take the blocking lock; the realtime callback only ever
/// uses the bounded try-lock and skips its work on contention, so it never
/// waits on a stalled writer.
#[derive(Default)]
pub struct Scheduler {
    queue: Mutex<EventQueue>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a message at an absolute sample frame.
    pub fn schedule(&self, frame: u64, msg: MidiMessage) {
        push_at(&mut self.queue.lock(), frame, msg);
    }

    /// Queue a message for delivery as soon as possible.
    ///
    /// Immediate messages are keyed from sample 0 upward at the first vacant
    /// slot; the drain treats past keys as "send now" and bumps their offsets
    /// monotonically.
    pub fn send_now(&self, msg: MidiMessage) {
        let mut queue = self.queue.lock();
        let mut frame = 0u64;
        while queue.contains_key(&frame) {
            frame += 1;
        }
        queue.insert(frame, vec![msg]);
    }

    /// Blocking access for the control side (tests, bulk edits).
    pub fn lock_queue(&self) -> MutexGuard<'_, EventQueue> {
        self.queue.lock()
    }

    /// Bounded-wait access for the realtime side. None on contention.
    pub fn try_lock_queue(&self) -> Option<MutexGuard<'_, EventQueue>> {
        self.queue.try_lock_for(RT_LOCK_TIMEOUT)
    }

    /// Quantity of pending (frame, message) entries.
    pub fn pending(&self) -> usize {
        self.queue.lock().values().map(Vec::len).sum()
    }

    pub fn clear(&self) {
        self.queue.lock().clear();
    }

    /// Drain every message scheduled inside `[now, now + frames)` into the
    /// host output buffer, in ascending frame order.
    ///
    /// Messages scheduled in the past are sent at the earliest free offset.
    /// Offsets are bumped to stay strictly increasing within the buffer; a
    /// message bumped past the period, or rejected by a full buffer, stays
    /// queued together with everything behind it.
    ///
    /// Returns false when the lock could not be acquired within the realtime
    /// budget and the drain was skipped.
    pub fn drain(&self, now: u64, frames: u32, out: &mut MidiOutputBuffer) -> bool {
        let mut queue = match self.try_lock_queue() {
            Some(queue) => queue,
            None => return false,
        };

        let horizon = now + frames as u64;
        let mut next_offset: u32 = 0;
        loop {
            let frame = match queue.keys().next().copied() {
                Some(frame) if frame < horizon => frame,
                _ => break,
            };
            let mut msgs = queue.remove(&frame).unwrap_or_default();
            let mut sent = 0usize;
            for msg in msgs.iter() {
                let mut offset = frame.saturating_sub(now) as u32;
                if offset < next_offset {
                    offset = next_offset;
                }
                if offset >= frames || !out.write(offset, *msg) {
                    break;
                }
                next_offset = offset + 1;
                sent += 1;
            }
            if sent < msgs.len() {
                // Buffer full or bumped past the period: requeue the rest
                msgs.drain(..sent);
                queue.insert(frame, msgs);
                break;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::message::MIDI_CLOCK;

    #[test]
    fn test_drain_window_and_order() {
        let scheduler = Scheduler::new();
        scheduler.schedule(150, MidiMessage::note_on(0, 64, 90));
        scheduler.schedule(100, MidiMessage::note_on(0, 60, 100));
        scheduler.schedule(500, MidiMessage::note_on(0, 67, 80));

        let mut out = MidiOutputBuffer::new(64);
        assert!(scheduler.drain(100, 256, &mut out));

        let offsets: Vec<u32> = out.events().iter().map(|(offset, _)| *offset).collect();
        assert_eq!(offsets, vec![0, 50]);
        assert_eq!(out.events()[0].1.value1, 60);
        // The message at 500 is beyond the period and stays queued
        assert_eq!(scheduler.pending(), 1);
    }

    #[test]
    fn test_past_messages_sent_first_with_bumped_offsets() {
        let scheduler = Scheduler::new();
        scheduler.send_now(MidiMessage::realtime(MIDI_CLOCK));
        scheduler.send_now(MidiMessage::realtime(MIDI_CLOCK));
        scheduler.schedule(1002, MidiMessage::note_on(0, 60, 100));

        let mut out = MidiOutputBuffer::new(64);
        assert!(scheduler.drain(1000, 128, &mut out));

        // Two past messages at offsets 0 and 1, scheduled one at its slot
        let offsets: Vec<u32> = out.events().iter().map(|(offset, _)| *offset).collect();
        assert_eq!(offsets, vec![0, 1, 2]);
    }

    #[test]
    fn test_offsets_strictly_increasing_on_ties() {
        let scheduler = Scheduler::new();
        for note in [60, 64, 67] {
            scheduler.schedule(2000, MidiMessage::note_on(0, note, 100));
        }

        let mut out = MidiOutputBuffer::new(64);
        scheduler.drain(2000, 64, &mut out);

        let offsets: Vec<u32> = out.events().iter().map(|(offset, _)| *offset).collect();
        assert_eq!(offsets, vec![0, 1, 2]);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_full_buffer_leaves_rest_queued() {
        let scheduler = Scheduler::new();
        for i in 0..10u64 {
            scheduler.schedule(100 + i, MidiMessage::note_on(0, 60 + i as u8, 100));
        }

        let mut out = MidiOutputBuffer::new(4);
        assert!(scheduler.drain(100, 256, &mut out));
        assert_eq!(out.len(), 4);
        assert_eq!(scheduler.pending(), 6);

        // Next period picks up where we left off
        let mut out2 = MidiOutputBuffer::new(64);
        assert!(scheduler.drain(100, 256, &mut out2));
        assert_eq!(out2.len(), 6);
        assert_eq!(out2.events()[0].1.value1, 64);
    }

    #[test]
    fn test_bump_past_period_end_requeues() {
        let scheduler = Scheduler::new();
        // Three messages tied at the last frame of the period
        for note in [60, 64, 67] {
            scheduler.schedule(63, MidiMessage::note_on(0, note, 100));
        }

        let mut out = MidiOutputBuffer::new(64);
        assert!(scheduler.drain(0, 64, &mut out));
        // Offsets 63 then bumped to 64 which is out of the period
        assert_eq!(out.len(), 1);
        assert_eq!(scheduler.pending(), 2);
    }

    #[test]
    fn test_send_now_finds_free_slot() {
        let scheduler = Scheduler::new();
        scheduler.send_now(MidiMessage::realtime(MIDI_CLOCK));
        scheduler.send_now(MidiMessage::realtime(MIDI_CLOCK));
        let queue = scheduler.lock_queue();
        assert!(queue.contains_key(&0));
        assert!(queue.contains_key(&1));
    }
}
