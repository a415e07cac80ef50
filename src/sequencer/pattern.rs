// Pattern - grid of step events over (beats x steps-per-beat)

use crate::midi::message::{MIDI_CONTROL, MIDI_NOTE_ON, MIDI_PROGRAM};
use crate::sequencer::step_event::StepEvent;
use serde::{Deserialize, Serialize};

/// Unique identifier for patterns
pub type PatternId = u32;

/// Steps-per-beat values that divide the 24 MIDI clocks of a beat evenly.
pub const VALID_STEPS_PER_BEAT: [u32; 8] = [1, 2, 3, 4, 6, 8, 12, 24];

/// MIDI clocks in one beat.
pub const CLOCKS_PER_BEAT: u32 = 24;

/// A pattern of MIDI events on a step grid.
///
/// Events are kept ordered by position. The grid is `beats x steps_per_beat`
/// steps; each step is `24 / steps_per_beat` MIDI clocks long, so a pattern
/// always spans `beats * 24` clocks regardless of its step resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    events: Vec<StepEvent>,
    beats: u32,
    steps_per_beat: u32,
    scale: u8,
    tonic: u8,
    ref_note: u8,
}

impl Pattern {
    /// Create an empty pattern. Invalid `steps_per_beat` falls back to 4.
    pub fn new(beats: u32, steps_per_beat: u32) -> Self {
        let mut pattern = Self {
            events: Vec::new(),
            beats: beats.max(1),
            steps_per_beat: 4,
            scale: 0,
            tonic: 0,
            ref_note: 60,
        };
        pattern.set_steps_per_beat(steps_per_beat);
        pattern
    }

    /// All events, ordered by position.
    pub fn events(&self) -> &[StepEvent] {
        &self.events
    }

    pub fn event_at(&self, index: usize) -> Option<&StepEvent> {
        self.events.get(index)
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Steps in the grid.
    pub fn steps(&self) -> u32 {
        self.beats * self.steps_per_beat
    }

    /// Pattern length in MIDI clocks.
    pub fn length(&self) -> u32 {
        self.beats * CLOCKS_PER_BEAT
    }

    /// MIDI clocks per step.
    pub fn clocks_per_step(&self) -> u32 {
        if self.steps_per_beat == 0 || self.steps_per_beat > CLOCKS_PER_BEAT {
            return 1;
        }
        CLOCKS_PER_BEAT / self.steps_per_beat
    }

    pub fn beats(&self) -> u32 {
        self.beats
    }

    pub fn steps_per_beat(&self) -> u32 {
        self.steps_per_beat
    }

    /// Insert an event in position order, displacing any event of the same
    /// (command, value1) whose live range overlaps the new one.
    ///
    /// Ranges are half-open over fractional steps: an existing event is
    /// displaced when its `[start, end)` range intersects
    /// `[position, position + duration)`, containment included.
    ///
    /// Returns the index of the inserted event.
    pub fn add_event(
        &mut self,
        position: u32,
        command: u8,
        value1: u8,
        value2: u8,
        duration: f32,
    ) -> usize {
        let new_start = position as f32;
        let new_end = position as f32 + duration;
        self.events.retain(|ev| {
            if ev.command() != command || ev.value1_start() != value1 {
                return true;
            }
            let start = ev.position() as f32;
            let end = ev.end();
            let overlap = start < new_end && end > new_start;
            !overlap
        });

        let index = self
            .events
            .iter()
            .position(|ev| ev.position() > position)
            .unwrap_or(self.events.len());
        self.events
            .insert(index, StepEvent::new(position, command, value1, value2, duration));
        index
    }

    /// Remove the first event matching (position, command, value1).
    fn delete_event(&mut self, position: u32, command: u8, value1: u8) -> bool {
        if let Some(index) = self.events.iter().position(|ev| {
            ev.position() == position && ev.command() == command && ev.value1_start() == value1
        }) {
            self.events.remove(index);
            true
        } else {
            false
        }
    }

    /// Add a note. Rejects out-of-grid steps and out-of-range note/velocity.
    pub fn add_note(&mut self, step: u32, note: u8, velocity: u8, duration: f32) -> bool {
        if step >= self.steps() || note > 127 || velocity > 127 {
            return false;
        }
        self.add_event(step, MIDI_NOTE_ON, note, velocity, duration);
        true
    }

    pub fn remove_note(&mut self, step: u32, note: u8) -> bool {
        self.delete_event(step, MIDI_NOTE_ON, note)
    }

    /// Step at which the note sounding at `step` starts, or None.
    ///
    /// A note is sounding at `step` when `position <= step < ceil(position + duration)`.
    pub fn note_start(&self, step: u32, note: u8) -> Option<u32> {
        self.events.iter().find_map(|ev| {
            if ev.command() == MIDI_NOTE_ON
                && ev.value1_start() == note
                && ev.position() <= step
                && (ev.end().ceil() as u32) > step
            {
                Some(ev.position())
            } else {
                None
            }
        })
    }

    /// Velocity of the note starting exactly at `step`, 0 if none.
    pub fn note_velocity(&self, step: u32, note: u8) -> u8 {
        self.events
            .iter()
            .find(|ev| {
                ev.position() == step && ev.command() == MIDI_NOTE_ON && ev.value1_start() == note
            })
            .map(|ev| ev.value2_start())
            .unwrap_or(0)
    }

    pub fn set_note_velocity(&mut self, step: u32, note: u8, velocity: u8) {
        if velocity > 127 {
            return;
        }
        if let Some(ev) = self.events.iter_mut().find(|ev| {
            ev.position() == step && ev.command() == MIDI_NOTE_ON && ev.value1_start() == note
        }) {
            ev.set_value2_start(velocity);
            ev.set_value2_end(velocity);
        }
    }

    /// Duration in steps of the note starting exactly at `step`, 0.0 if none.
    pub fn note_duration(&self, step: u32, note: u8) -> f32 {
        if step >= self.steps() {
            return 0.0;
        }
        self.events
            .iter()
            .find(|ev| {
                ev.position() == step && ev.command() == MIDI_NOTE_ON && ev.value1_start() == note
            })
            .map(|ev| ev.duration())
            .unwrap_or(0.0)
    }

    /// Add a program change. A step holds at most one program change.
    pub fn add_program_change(&mut self, step: u32, program: u8) -> bool {
        if step >= self.steps() || program > 127 {
            return false;
        }
        self.remove_program_change(step);
        self.add_event(step, MIDI_PROGRAM, program, 0, 0.0);
        true
    }

    pub fn remove_program_change(&mut self, step: u32) -> bool {
        if step >= self.steps() {
            return false;
        }
        match self.program_change(step) {
            Some(program) => self.delete_event(step, MIDI_PROGRAM, program),
            None => false,
        }
    }

    pub fn program_change(&self, step: u32) -> Option<u8> {
        if step >= self.steps() {
            return None;
        }
        self.events
            .iter()
            .find(|ev| ev.position() == step && ev.command() == MIDI_PROGRAM)
            .map(|ev| ev.value1_start())
    }

    /// Add a continuous controller event, optionally ramping from
    /// `value_start` to `value_end` across `duration` steps.
    pub fn add_control(
        &mut self,
        step: u32,
        control: u8,
        value_start: u8,
        value_end: u8,
        duration: f32,
    ) -> bool {
        if step >= self.steps()
            || control > 127
            || value_start > 127
            || value_end > 127
            || duration > self.steps() as f32
        {
            return false;
        }
        let index = self.add_event(step, MIDI_CONTROL, control, value_start, duration);
        self.events[index].set_value2_end(value_end);
        true
    }

    pub fn remove_control(&mut self, step: u32, control: u8) -> bool {
        self.delete_event(step, MIDI_CONTROL, control)
    }

    /// Change the step resolution, rescaling event positions and durations so
    /// musical time is preserved. Rejects values that do not divide a beat.
    pub fn set_steps_per_beat(&mut self, value: u32) -> bool {
        if !VALID_STEPS_PER_BEAT.contains(&value) {
            return false;
        }
        let scale = value as f32 / self.steps_per_beat as f32;
        self.steps_per_beat = value;
        for ev in self.events.iter_mut() {
            ev.set_position((ev.position() as f32 * scale) as u32);
            ev.set_duration(ev.duration() * scale);
        }
        true
    }

    /// Resize the grid. Events beyond the new grid are truncated away.
    pub fn set_beats_in_pattern(&mut self, beats: u32) {
        if beats > 0 {
            self.beats = beats;
        }
        // Events are position-ordered, so everything from the first
        // out-of-range entry onward goes.
        let steps = self.steps();
        let keep = self
            .events
            .iter()
            .position(|ev| ev.position() >= steps)
            .unwrap_or(self.events.len());
        self.events.truncate(keep);
    }

    /// Transpose all notes by `delta` semitones. Rejects the whole operation
    /// if any note would leave the MIDI range.
    pub fn transpose(&mut self, delta: i32) -> bool {
        for ev in self.events.iter() {
            if ev.command() != MIDI_NOTE_ON {
                continue;
            }
            let note = ev.value1_start() as i32 + delta;
            if !(0..=127).contains(&note) {
                return false;
            }
        }
        for ev in self.events.iter_mut() {
            if ev.command() != MIDI_NOTE_ON {
                continue;
            }
            let note = (ev.value1_start() as i32 + delta) as u8;
            ev.set_value1_start(note);
            ev.set_value1_end(note);
        }
        true
    }

    /// Offset every note velocity, clamped to [1, 127].
    pub fn change_velocity_all(&mut self, delta: i32) {
        for ev in self.events.iter_mut() {
            if ev.command() != MIDI_NOTE_ON {
                continue;
            }
            let velocity = (ev.value2_start() as i32 + delta).clamp(1, 127) as u8;
            ev.set_value2_start(velocity);
            ev.set_value2_end(velocity);
        }
    }

    /// Offset every note duration. Rejects the whole operation if any note
    /// would end up with a non-positive duration; results shorter than a
    /// tenth of a step are clamped up.
    pub fn change_duration_all(&mut self, delta: f32) -> bool {
        for ev in self.events.iter() {
            if ev.command() == MIDI_NOTE_ON && ev.duration() + delta <= 0.0 {
                return false;
            }
        }
        for ev in self.events.iter_mut() {
            if ev.command() != MIDI_NOTE_ON {
                continue;
            }
            let duration = (ev.duration() + delta).max(0.1);
            ev.set_duration(duration);
        }
        true
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn scale(&self) -> u8 {
        self.scale
    }

    pub fn set_scale(&mut self, scale: u8) {
        self.scale = scale;
    }

    pub fn tonic(&self) -> u8 {
        self.tonic
    }

    pub fn set_tonic(&mut self, tonic: u8) {
        self.tonic = tonic;
    }

    pub fn ref_note(&self) -> u8 {
        self.ref_note
    }

    pub fn set_ref_note(&mut self, note: u8) {
        if note < 128 {
            self.ref_note = note;
        }
    }

    /// Highest occupied step, or None for an empty pattern.
    pub fn last_step(&self) -> Option<u32> {
        self.events.iter().map(|ev| ev.position()).max()
    }

    /// Index of the first event at `step`, or None.
    pub fn first_event_at_step(&self, step: u32) -> Option<usize> {
        self.events.iter().position(|ev| ev.position() == step)
    }
}

impl Default for Pattern {
    fn default() -> Self {
        Self::new(4, 4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_geometry() {
        let pattern = Pattern::new(4, 4);
        assert_eq!(pattern.steps(), 16);
        assert_eq!(pattern.length(), 96); // 4 beats * 24 clocks
        assert_eq!(pattern.clocks_per_step(), 6);
    }

    #[test]
    fn test_add_note_and_queries() {
        let mut pattern = Pattern::new(4, 4);
        assert!(pattern.add_note(0, 60, 100, 1.0));
        assert_eq!(pattern.note_velocity(0, 60), 100);
        assert_eq!(pattern.note_start(0, 60), Some(0));
        assert_eq!(pattern.note_duration(0, 60), 1.0);
    }

    #[test]
    fn test_add_note_rejects_out_of_range() {
        let mut pattern = Pattern::new(4, 4);
        assert!(!pattern.add_note(16, 60, 100, 1.0)); // step beyond grid
        assert!(!pattern.add_note(0, 128, 100, 1.0));
        assert!(!pattern.add_note(0, 60, 128, 1.0));
        assert_eq!(pattern.event_count(), 0);
    }

    #[test]
    fn test_overlapping_note_displaced() {
        let mut pattern = Pattern::new(4, 4);
        assert!(pattern.add_note(0, 60, 100, 4.0));
        // Same note starting inside [0, 4) displaces the first
        assert!(pattern.add_note(2, 60, 80, 1.0));
        assert_eq!(pattern.event_count(), 1);
        assert_eq!(pattern.events()[0].position(), 2);
        assert_eq!(pattern.events()[0].value2_start(), 80);
    }

    #[test]
    fn test_different_notes_do_not_displace() {
        let mut pattern = Pattern::new(4, 4);
        assert!(pattern.add_note(0, 60, 100, 4.0));
        assert!(pattern.add_note(2, 62, 80, 1.0));
        assert_eq!(pattern.event_count(), 2);
    }

    #[test]
    fn test_events_stay_position_ordered() {
        let mut pattern = Pattern::new(4, 4);
        pattern.add_note(8, 60, 100, 1.0);
        pattern.add_note(0, 62, 100, 1.0);
        pattern.add_note(4, 64, 100, 1.0);
        let positions: Vec<u32> = pattern.events().iter().map(|ev| ev.position()).collect();
        assert_eq!(positions, vec![0, 4, 8]);
    }

    #[test]
    fn test_note_start_inside_live_range() {
        let mut pattern = Pattern::new(4, 4);
        pattern.add_note(2, 60, 100, 3.0);
        assert_eq!(pattern.note_start(4, 60), Some(2));
        assert_eq!(pattern.note_start(1, 60), None);
        assert_eq!(pattern.note_start(5, 60), None); // range is [2, 5)
    }

    #[test]
    fn test_set_note_velocity_mutates_stored_event() {
        let mut pattern = Pattern::new(4, 4);
        pattern.add_note(3, 60, 100, 1.0);
        pattern.set_note_velocity(3, 60, 64);
        assert_eq!(pattern.note_velocity(3, 60), 64);
        pattern.set_note_velocity(3, 60, 200); // rejected
        assert_eq!(pattern.note_velocity(3, 60), 64);
    }

    #[test]
    fn test_program_change_one_per_step() {
        let mut pattern = Pattern::new(4, 4);
        assert!(pattern.add_program_change(0, 10));
        assert!(pattern.add_program_change(0, 20));
        assert_eq!(pattern.program_change(0), Some(20));
        assert_eq!(pattern.event_count(), 1);
        assert!(pattern.remove_program_change(0));
        assert_eq!(pattern.program_change(0), None);
        assert!(!pattern.remove_program_change(0));
    }

    #[test]
    fn test_control_ramp() {
        let mut pattern = Pattern::new(4, 4);
        assert!(pattern.add_control(0, 7, 0, 127, 4.0));
        let ev = &pattern.events()[0];
        assert_eq!(ev.value2_start(), 0);
        assert_eq!(ev.value2_end(), 127);
        assert!(pattern.remove_control(0, 7));
        assert_eq!(pattern.event_count(), 0);
    }

    #[test]
    fn test_set_steps_per_beat_rescales() {
        let mut pattern = Pattern::new(4, 4);
        pattern.add_note(8, 60, 100, 2.0);
        assert!(pattern.set_steps_per_beat(8));
        // Position and duration double: same musical time at finer grid
        assert_eq!(pattern.events()[0].position(), 16);
        assert_eq!(pattern.events()[0].duration(), 4.0);
        assert_eq!(pattern.length(), 96); // clock length unchanged
    }

    #[test]
    fn test_set_steps_per_beat_rejects_invalid() {
        let mut pattern = Pattern::new(4, 4);
        pattern.add_note(8, 60, 100, 2.0);
        assert!(!pattern.set_steps_per_beat(5));
        assert_eq!(pattern.steps_per_beat(), 4);
        assert_eq!(pattern.events()[0].position(), 8);
    }

    #[test]
    fn test_set_beats_truncates() {
        let mut pattern = Pattern::new(4, 4);
        pattern.add_note(0, 60, 100, 1.0);
        pattern.add_note(7, 62, 100, 1.0);
        pattern.add_note(8, 64, 100, 1.0);
        pattern.set_beats_in_pattern(2); // 8 steps remain
        assert_eq!(pattern.event_count(), 2);
        assert!(pattern.events().iter().all(|ev| ev.position() < 8));
    }

    #[test]
    fn test_transpose_transactional() {
        let mut pattern = Pattern::new(4, 4);
        for (i, note) in (60..68).enumerate() {
            pattern.add_note(i as u32, note, 100, 1.0);
        }
        // Would push note 60 to -1: whole operation rejected
        assert!(!pattern.transpose(-61));
        let notes: Vec<u8> = pattern.events().iter().map(|ev| ev.value1_start()).collect();
        assert_eq!(notes, (60..68).collect::<Vec<u8>>());

        assert!(pattern.transpose(12));
        assert_eq!(pattern.events()[0].value1_start(), 72);
        assert_eq!(pattern.events()[0].value1_end(), 72);
    }

    #[test]
    fn test_change_velocity_all_clamps() {
        let mut pattern = Pattern::new(4, 4);
        pattern.add_note(0, 60, 100, 1.0);
        pattern.add_note(1, 62, 5, 1.0);
        pattern.change_velocity_all(40);
        assert_eq!(pattern.note_velocity(0, 60), 127);
        assert_eq!(pattern.note_velocity(1, 62), 45);
        pattern.change_velocity_all(-120);
        assert_eq!(pattern.note_velocity(0, 60), 7);
        assert_eq!(pattern.note_velocity(1, 62), 1);
    }

    #[test]
    fn test_change_duration_all() {
        let mut pattern = Pattern::new(4, 4);
        pattern.add_note(0, 60, 100, 1.0);
        pattern.add_note(1, 62, 100, 0.5);
        // Would take the second note to 0 or below: rejected entirely
        assert!(!pattern.change_duration_all(-0.5));
        assert_eq!(pattern.note_duration(0, 60), 1.0);

        assert!(pattern.change_duration_all(-0.45));
        assert!((pattern.note_duration(0, 60) - 0.55).abs() < 1e-6);
        // Clamped to the 0.1 step floor
        assert!((pattern.note_duration(1, 62) - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_clear_and_last_step() {
        let mut pattern = Pattern::new(4, 4);
        assert_eq!(pattern.last_step(), None);
        pattern.add_note(3, 60, 100, 1.0);
        pattern.add_note(9, 62, 100, 1.0);
        assert_eq!(pattern.last_step(), Some(9));
        assert_eq!(pattern.first_event_at_step(9), Some(1));
        pattern.clear();
        assert_eq!(pattern.event_count(), 0);
    }
}
