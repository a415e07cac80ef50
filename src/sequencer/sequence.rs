// Sequence - timeline of pattern placements with a play state machine

use crate::engine::scheduler::{push_at, EventQueue};
use crate::midi::message::{MidiMessage, MIDI_CONTROL, MIDI_NOTE_ON, MIDI_PROGRAM};
use crate::sequencer::pattern::{Pattern, PatternId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Unique identifier for sequences
pub type SequenceId = u32;

/// Trigger note value meaning "no trigger bound".
pub const NO_TRIGGER: u8 = 0xFF;

/// Playback state of a sequence.
///
/// Starting and Stopping are queued states: the transition to Playing
/// happens on the next sync pulse (beat 1 of a bar) while the transport
/// rolls, and the transition to Stopped happens at the boundary implied by
/// the play mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayState {
    Stopped,
    Starting,
    Playing,
    Stopping,
}

impl Default for PlayState {
    fn default() -> Self {
        PlayState::Stopped
    }
}

/// How a sequence treats pattern and sequence boundaries.
///
/// OneShot plays the current pattern once then stops; Loop wraps the current
/// pattern. The All variants treat the whole placement timeline as the unit
/// instead of the single pattern. A queued stop lands at the end of the
/// current pattern for the one-shot modes and at the next bar sync for the
/// looping modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayMode {
    OneShot,
    Loop,
    OneShotAll,
    LoopAll,
}

impl Default for PlayMode {
    fn default() -> Self {
        PlayMode::Loop
    }
}

/// A pattern placed on the sequence timeline. `clocks` caches the pattern's
/// clock length so overlap checks and playback need no pattern lookup; it is
/// refreshed whenever sequence lengths are recomputed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub pattern: PatternId,
    pub clocks: u32,
}

/// A playable timeline of patterns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Sequence {
    placements: BTreeMap<u32, Placement>,
    play_mode: PlayMode,
    channel: u8,
    output: u8,
    group: u8,
    tally_channel: u8,
    trigger_note: u8,
    length: u32,
    #[serde(skip)]
    play_state: PlayState,
    #[serde(skip)]
    play_position: u32,
    #[serde(skip)]
    step: u32,
    #[serde(skip)]
    solo: bool,
}

impl Sequence {
    pub fn new() -> Self {
        Self {
            trigger_note: NO_TRIGGER,
            ..Default::default()
        }
    }

    /// Place a pattern at `position` (in clocks). Without `force` the
    /// insertion is rejected when it would overlap an existing placement;
    /// with `force` overlapping placements are displaced.
    pub fn add_pattern(
        &mut self,
        position: u32,
        pattern: PatternId,
        clocks: u32,
        force: bool,
    ) -> bool {
        if clocks == 0 {
            return false;
        }
        let end = position + clocks;
        let overlapping: Vec<u32> = self
            .placements
            .iter()
            .filter(|(&start, p)| start < end && start + p.clocks > position)
            .map(|(&start, _)| start)
            .collect();
        if !overlapping.is_empty() {
            if !force {
                return false;
            }
            for start in overlapping {
                self.placements.remove(&start);
            }
        }
        self.placements.insert(position, Placement { pattern, clocks });
        self.recompute_length();
        true
    }

    pub fn remove_pattern(&mut self, position: u32) -> bool {
        let removed = self.placements.remove(&position).is_some();
        if removed {
            self.recompute_length();
        }
        removed
    }

    /// Pattern placed exactly at `position`, or None.
    pub fn pattern_at(&self, position: u32) -> Option<PatternId> {
        self.placements.get(&position).map(|p| p.pattern)
    }

    pub fn placements(&self) -> &BTreeMap<u32, Placement> {
        &self.placements
    }

    pub fn clear(&mut self) {
        self.placements.clear();
        self.length = 0;
        self.play_position = 0;
        self.step = 0;
    }

    /// Refresh cached placement lengths from the pattern arena and recompute
    /// the sequence length. Returns the new length in clocks.
    pub fn update_length(&mut self, patterns: &BTreeMap<PatternId, Pattern>) -> u32 {
        for placement in self.placements.values_mut() {
            if let Some(pattern) = patterns.get(&placement.pattern) {
                placement.clocks = pattern.length();
            }
        }
        self.recompute_length();
        self.length
    }

    fn recompute_length(&mut self) {
        self.length = self
            .placements
            .iter()
            .map(|(&start, p)| start + p.clocks)
            .max()
            .unwrap_or(0);
    }

    /// Length of the sequence in clocks.
    pub fn length(&self) -> u32 {
        self.length
    }

    pub fn play_state(&self) -> PlayState {
        self.play_state
    }

    /// Request a play state change. Only the documented transitions are
    /// honoured; anything else is ignored.
    pub fn set_play_state(&mut self, state: PlayState) {
        use PlayState::*;
        let accepted = matches!(
            (self.play_state, state),
            (Stopped, Starting)
                | (Stopped, Playing)
                | (Starting, Playing)
                | (Starting, Stopped)
                | (Playing, Stopping)
                | (Playing, Stopped)
                | (Stopping, Stopped)
                | (Stopping, Playing)
        );
        if !accepted {
            return;
        }
        if state == Playing && self.play_state != Stopping {
            self.play_position = 0;
            self.step = 0;
        }
        if state == Stopped {
            self.play_position = 0;
        }
        self.play_state = state;
    }

    /// Toggle between (queued) start and stop.
    pub fn toggle_play_state(&mut self) {
        match self.play_state {
            PlayState::Stopped | PlayState::Stopping => self.set_play_state(PlayState::Starting),
            PlayState::Starting => self.set_play_state(PlayState::Stopped),
            PlayState::Playing => self.set_play_state(PlayState::Stopping),
        }
    }

    pub fn play_mode(&self) -> PlayMode {
        self.play_mode
    }

    pub fn set_play_mode(&mut self, mode: PlayMode) {
        self.play_mode = mode;
    }

    pub fn play_position(&self) -> u32 {
        self.play_position
    }

    /// Set the play position in clocks, wrapped into the sequence.
    pub fn set_play_position(&mut self, clock: u32) {
        self.play_position = if self.length == 0 { 0 } else { clock % self.length };
    }

    /// Current step within the playing pattern (used by the MIDI programming path).
    pub fn step(&self) -> u32 {
        self.step
    }

    pub fn set_step(&mut self, step: u32) {
        self.step = step;
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn set_channel(&mut self, channel: u8) {
        if channel < 16 {
            self.channel = channel;
        }
    }

    pub fn output(&self) -> u8 {
        self.output
    }

    pub fn set_output(&mut self, output: u8) {
        self.output = output;
    }

    pub fn group(&self) -> u8 {
        self.group
    }

    pub fn set_group(&mut self, group: u8) {
        self.group = group;
    }

    pub fn tally_channel(&self) -> u8 {
        self.tally_channel
    }

    pub fn set_tally_channel(&mut self, channel: u8) {
        self.tally_channel = channel;
    }

    pub fn trigger_note(&self) -> u8 {
        self.trigger_note
    }

    pub fn set_trigger_note(&mut self, note: u8) {
        self.trigger_note = note;
    }

    pub fn solo(&self) -> bool {
        self.solo
    }

    pub fn set_solo(&mut self, solo: bool) {
        self.solo = solo;
    }

    /// Advance the sequence by one MIDI clock.
    ///
    /// `time` is the absolute sample of this clock pulse; `sync` marks the
    /// clock-zero of beat 1 of a bar. Events whose step starts on this clock
    /// are written into `queue`, note-offs at their sample-accurate end, and
    /// CC ramps are interpolated on every clock of their live range.
    ///
    /// Returns true when the sequence emitted something or is still in a
    /// non-stopped state, which the transport uses to decide auto-stop.
    pub fn clock(
        &mut self,
        time: u64,
        queue: &mut EventQueue,
        sync: bool,
        frames_per_clock: f64,
        patterns: &BTreeMap<PatternId, Pattern>,
    ) -> bool {
        if sync {
            match self.play_state {
                PlayState::Starting => {
                    self.play_state = PlayState::Playing;
                    self.play_position = 0;
                    self.step = 0;
                }
                PlayState::Stopping
                    if matches!(self.play_mode, PlayMode::Loop | PlayMode::LoopAll) =>
                {
                    // Looping modes stop on the bar
                    self.play_state = PlayState::Stopped;
                    self.play_position = 0;
                    return false;
                }
                _ => {}
            }
        }

        if !matches!(self.play_state, PlayState::Playing | PlayState::Stopping) {
            return self.play_state != PlayState::Stopped;
        }
        if self.length == 0 {
            self.play_state = PlayState::Stopped;
            return false;
        }

        let mut emitted = false;
        let mut placement_bounds = None;

        if let Some((&start, placement)) =
            self.placements.range(..=self.play_position).next_back()
        {
            if self.play_position < start + placement.clocks {
                placement_bounds = Some((start, start + placement.clocks));
                if let Some(pattern) = patterns.get(&placement.pattern) {
                    let pos_in_pattern = self.play_position - start;
                    let cps = pattern.clocks_per_step();
                    self.step = pos_in_pattern / cps;
                    emitted |= self.emit_events(
                        pattern,
                        pos_in_pattern,
                        cps,
                        time,
                        queue,
                        frames_per_clock,
                    );
                }
            }
        }

        self.play_position += 1;

        // Pattern boundary
        if let Some((start, end)) = placement_bounds {
            if self.play_position >= end {
                match self.play_mode {
                    PlayMode::OneShot => {
                        self.play_state = PlayState::Stopped;
                        self.play_position = 0;
                    }
                    PlayMode::Loop => {
                        self.play_position = start;
                    }
                    PlayMode::OneShotAll => {
                        if self.play_state == PlayState::Stopping {
                            // Queued stop lands at pattern end in one-shot modes
                            self.play_state = PlayState::Stopped;
                            self.play_position = 0;
                        }
                    }
                    PlayMode::LoopAll => {}
                }
            }
        }

        // Sequence boundary
        if self.play_position >= self.length
            && matches!(self.play_state, PlayState::Playing | PlayState::Stopping)
        {
            match self.play_mode {
                PlayMode::LoopAll => self.play_position = 0,
                _ => {
                    self.play_state = PlayState::Stopped;
                    self.play_position = 0;
                }
            }
        }

        emitted || self.play_state != PlayState::Stopped
    }

    fn emit_events(
        &self,
        pattern: &Pattern,
        pos_in_pattern: u32,
        cps: u32,
        time: u64,
        queue: &mut EventQueue,
        frames_per_clock: f64,
    ) -> bool {
        let mut emitted = false;
        for ev in pattern.events() {
            let start_clock = ev.position() * cps;
            let duration_clocks = ev.duration() * cps as f32;
            if pos_in_pattern == start_clock {
                emitted = true;
                match ev.command() {
                    MIDI_NOTE_ON => {
                        push_at(
                            queue,
                            time,
                            MidiMessage::note_on(self.channel, ev.value1_start(), ev.value2_start()),
                        );
                        // Note-off lands sample-accurately at the event end
                        let off_frames = (duration_clocks as f64 * frames_per_clock).max(1.0);
                        push_at(
                            queue,
                            time + off_frames as u64,
                            MidiMessage::note_off(self.channel, ev.value1_end()),
                        );
                    }
                    MIDI_CONTROL => {
                        push_at(
                            queue,
                            time,
                            MidiMessage::control(self.channel, ev.value1_start(), ev.value2_start()),
                        );
                    }
                    MIDI_PROGRAM => {
                        push_at(
                            queue,
                            time,
                            MidiMessage::program(self.channel, ev.value1_start()),
                        );
                    }
                    _ => {}
                }
            } else if ev.command() == MIDI_CONTROL
                && ev.value2_start() != ev.value2_end()
                && duration_clocks > 0.0
                && pos_in_pattern > start_clock
                && (pos_in_pattern as f32) < start_clock as f32 + duration_clocks
            {
                // Interpolate the ramp on each clock it spans
                let t = (pos_in_pattern - start_clock) as f32 / duration_clocks;
                let value = ev.value2_start() as f32
                    + (ev.value2_end() as f32 - ev.value2_start() as f32) * t;
                push_at(
                    queue,
                    time,
                    MidiMessage::control(self.channel, ev.value1_start(), value.round() as u8),
                );
                emitted = true;
            }
        }
        emitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_pattern_arena() -> BTreeMap<PatternId, Pattern> {
        let mut pattern = Pattern::new(1, 4); // 4 steps, 24 clocks, 6 clocks/step
        pattern.add_note(0, 60, 100, 1.0);
        pattern.add_note(2, 64, 90, 1.0);
        let mut patterns = BTreeMap::new();
        patterns.insert(1, pattern);
        patterns
    }

    fn playing_sequence(patterns: &BTreeMap<PatternId, Pattern>) -> Sequence {
        let mut seq = Sequence::new();
        assert!(seq.add_pattern(0, 1, patterns[&1].length(), false));
        seq.set_play_state(PlayState::Playing);
        seq
    }

    #[test]
    fn test_add_pattern_overlap_rules() {
        let mut seq = Sequence::new();
        assert!(seq.add_pattern(0, 1, 96, false));
        assert!(!seq.add_pattern(48, 2, 96, false)); // overlaps without force
        assert!(seq.add_pattern(96, 2, 96, false));
        assert_eq!(seq.length(), 192);

        // Force displaces both
        assert!(seq.add_pattern(50, 3, 200, true));
        assert_eq!(seq.placements().len(), 1);
        assert_eq!(seq.pattern_at(50), Some(3));
        assert_eq!(seq.length(), 250);
    }

    #[test]
    fn test_remove_pattern_updates_length() {
        let mut seq = Sequence::new();
        seq.add_pattern(0, 1, 96, false);
        seq.add_pattern(96, 2, 96, false);
        assert!(seq.remove_pattern(96));
        assert_eq!(seq.length(), 96);
        assert!(!seq.remove_pattern(96));
    }

    #[test]
    fn test_starting_waits_for_sync() {
        let patterns = one_pattern_arena();
        let mut seq = Sequence::new();
        seq.add_pattern(0, 1, 24, false);
        seq.set_play_state(PlayState::Starting);

        let mut queue = EventQueue::new();
        // Clocks without sync: still starting, nothing emitted
        assert!(seq.clock(0, &mut queue, false, 100.0, &patterns));
        assert_eq!(seq.play_state(), PlayState::Starting);
        assert!(queue.is_empty());

        // Sync pulse: transitions to playing and emits step 0
        assert!(seq.clock(1000, &mut queue, true, 100.0, &patterns));
        assert_eq!(seq.play_state(), PlayState::Playing);
        assert!(!queue.is_empty());
    }

    #[test]
    fn test_clock_emits_note_and_scheduled_off() {
        let patterns = one_pattern_arena();
        let mut seq = playing_sequence(&patterns);

        let mut queue = EventQueue::new();
        assert!(seq.clock(5000, &mut queue, true, 100.0, &patterns));

        // Note on at the clock sample, note off one step (6 clocks) later
        let on = queue.get(&5000).unwrap();
        assert_eq!(on[0], MidiMessage::note_on(0, 60, 100));
        let off = queue.get(&5600).unwrap();
        assert_eq!(off[0], MidiMessage::note_off(0, 60));
    }

    #[test]
    fn test_step_events_fire_on_step_boundaries() {
        let patterns = one_pattern_arena();
        let mut seq = playing_sequence(&patterns);
        let mut queue = EventQueue::new();

        // Walk one full pattern: 24 clocks
        let mut on_clocks = Vec::new();
        for clock in 0..24u64 {
            let before = queue.len();
            seq.clock(clock * 100, &mut queue, clock == 0, 100.0, &patterns);
            if queue.len() > before {
                on_clocks.push(clock);
            }
        }
        // Steps 0 and 2 -> clocks 0 and 12
        assert_eq!(on_clocks, vec![0, 12]);
    }

    #[test]
    fn test_loop_mode_wraps() {
        let patterns = one_pattern_arena();
        let mut seq = playing_sequence(&patterns);
        seq.set_play_mode(PlayMode::Loop);

        let mut queue = EventQueue::new();
        for clock in 0..24u64 {
            seq.clock(clock * 100, &mut queue, clock == 0, 100.0, &patterns);
        }
        assert_eq!(seq.play_state(), PlayState::Playing);
        assert_eq!(seq.play_position(), 0);
    }

    #[test]
    fn test_oneshot_stops_at_pattern_end() {
        let patterns = one_pattern_arena();
        let mut seq = playing_sequence(&patterns);
        seq.set_play_mode(PlayMode::OneShot);

        let mut queue = EventQueue::new();
        for clock in 0..24u64 {
            seq.clock(clock * 100, &mut queue, clock == 0, 100.0, &patterns);
        }
        assert_eq!(seq.play_state(), PlayState::Stopped);
    }

    #[test]
    fn test_stopping_loop_stops_on_sync() {
        let patterns = one_pattern_arena();
        let mut seq = playing_sequence(&patterns);
        seq.set_play_mode(PlayMode::Loop);

        let mut queue = EventQueue::new();
        for clock in 0..12u64 {
            seq.clock(clock * 100, &mut queue, clock == 0, 100.0, &patterns);
        }
        seq.set_play_state(PlayState::Stopping);
        // Still playing to the end of the bar
        for clock in 12..24u64 {
            seq.clock(clock * 100, &mut queue, false, 100.0, &patterns);
        }
        assert_eq!(seq.play_state(), PlayState::Stopping);
        // Next sync pulse lands the stop
        seq.clock(2400, &mut queue, true, 100.0, &patterns);
        assert_eq!(seq.play_state(), PlayState::Stopped);
        assert_eq!(seq.play_position(), 0);
    }

    #[test]
    fn test_control_ramp_interpolates() {
        let mut pattern = Pattern::new(1, 4);
        // CC 7 ramp 0 -> 120 over 2 steps (12 clocks)
        assert!(pattern.add_control(0, 7, 0, 120, 2.0));
        let mut patterns = BTreeMap::new();
        patterns.insert(1, pattern);

        let mut seq = Sequence::new();
        seq.add_pattern(0, 1, 24, false);
        seq.set_play_state(PlayState::Playing);

        let mut queue = EventQueue::new();
        for clock in 0..12u64 {
            seq.clock(clock * 10, &mut queue, clock == 0, 10.0, &patterns);
        }
        // One message per clock of the ramp
        assert_eq!(queue.len(), 12);
        let first = queue.get(&0).unwrap()[0];
        assert_eq!(first.value2, 0);
        let mid = queue.get(&60).unwrap()[0]; // clock 6 = halfway
        assert_eq!(mid.value2, 60);
    }

    #[test]
    fn test_set_play_position_wraps() {
        let mut seq = Sequence::new();
        seq.add_pattern(0, 1, 96, false);
        seq.set_play_position(100);
        assert_eq!(seq.play_position(), 4);
    }

    #[test]
    fn test_invalid_transitions_ignored() {
        let mut seq = Sequence::new();
        seq.set_play_state(PlayState::Stopping); // stopped -> stopping not allowed
        assert_eq!(seq.play_state(), PlayState::Stopped);
        seq.set_play_state(PlayState::Starting);
        seq.set_play_state(PlayState::Stopping); // starting -> stopping not allowed
        assert_eq!(seq.play_state(), PlayState::Starting);
    }
}
