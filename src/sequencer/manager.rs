// PatternManager - registry of patterns, sequences and songs

use crate::engine::scheduler::EventQueue;
use crate::sequencer::pattern::{Pattern, PatternId};
use crate::sequencer::sequence::{PlayState, Sequence, SequenceId, NO_TRIGGER};
use crate::sequencer::song::{Song, SongId};
use std::collections::{BTreeMap, BTreeSet};

/// Owns every pattern, sequence and song, and fans the transport's clock
/// pulses out to the sequences of the current song.
///
/// Objects are held in id-keyed maps and referenced by id everywhere else,
/// so there are no ownership cycles. Lookups by id create the object on
/// demand, which keeps the editor surface free of existence checks.
#[derive(Debug)]
pub struct PatternManager {
    patterns: BTreeMap<PatternId, Pattern>,
    sequences: BTreeMap<SequenceId, Sequence>,
    songs: BTreeMap<SongId, Song>,
    current_song: SongId,
    trigger_channel: u8,
}

impl PatternManager {
    pub fn new() -> Self {
        Self {
            patterns: BTreeMap::new(),
            sequences: BTreeMap::new(),
            songs: BTreeMap::new(),
            current_song: 1,
            trigger_channel: 15,
        }
    }

    pub fn pattern(&self, id: PatternId) -> Option<&Pattern> {
        self.patterns.get(&id)
    }

    /// Pattern by id, created with the default grid if absent.
    pub fn pattern_mut(&mut self, id: PatternId) -> &mut Pattern {
        self.patterns.entry(id).or_default()
    }

    pub fn sequence(&self, id: SequenceId) -> Option<&Sequence> {
        self.sequences.get(&id)
    }

    /// Sequence by id, created empty if absent.
    pub fn sequence_mut(&mut self, id: SequenceId) -> &mut Sequence {
        self.sequences.entry(id).or_insert_with(Sequence::new)
    }

    pub fn song(&self, id: SongId) -> Option<&Song> {
        self.songs.get(&id)
    }

    /// Song by id, created empty if absent.
    pub fn song_mut(&mut self, id: SongId) -> &mut Song {
        self.songs.entry(id).or_default()
    }

    pub fn current_song(&self) -> SongId {
        self.current_song
    }

    pub fn set_current_song(&mut self, song: SongId) {
        self.current_song = song;
        self.song_mut(song);
    }

    pub fn trigger_channel(&self) -> u8 {
        self.trigger_channel
    }

    pub fn set_trigger_channel(&mut self, channel: u8) {
        if channel < 16 {
            self.trigger_channel = channel;
        }
    }

    pub fn trigger_note(&self, sequence: SequenceId) -> u8 {
        self.sequence(sequence)
            .map(|seq| seq.trigger_note())
            .unwrap_or(NO_TRIGGER)
    }

    pub fn set_trigger_note(&mut self, sequence: SequenceId, note: u8) {
        self.sequence_mut(sequence).set_trigger_note(note);
    }

    /// Place `pattern` in `sequence` at the given clock position.
    pub fn add_pattern_to_sequence(
        &mut self,
        sequence: SequenceId,
        position: u32,
        pattern: PatternId,
        force: bool,
    ) -> bool {
        let clocks = self.pattern_mut(pattern).length();
        self.sequence_mut(sequence)
            .add_pattern(position, pattern, clocks, force)
    }

    pub fn copy_pattern(&mut self, source: PatternId, destination: PatternId) {
        if source == destination {
            return;
        }
        let copy = self.pattern_mut(source).clone();
        self.patterns.insert(destination, copy);
    }

    /// Fan one MIDI clock out to every sequence of the current song plus any
    /// trigger-armed or still-sounding sequence.
    ///
    /// Returns true while anything is playing or produced output; the
    /// transport auto-stops when this goes false on a bar boundary.
    pub fn clock(
        &mut self,
        time: u64,
        queue: &mut EventQueue,
        sync: bool,
        frames_per_clock: f64,
    ) -> bool {
        let mut ids: BTreeSet<SequenceId> = BTreeSet::new();
        if let Some(song) = self.songs.get(&self.current_song) {
            ids.extend(song.tracks().iter().copied());
        }
        for (&id, seq) in self.sequences.iter() {
            if seq.trigger_note() != NO_TRIGGER || seq.play_state() != PlayState::Stopped {
                ids.insert(id);
            }
        }

        let mut playing = false;
        for id in ids {
            if let Some(seq) = self.sequences.get_mut(&id) {
                playing |= seq.clock(time, queue, sync, frames_per_clock, &self.patterns);
            }
        }
        playing
    }

    /// Toggle the sequence bound to `note` on the trigger channel:
    /// stopped/stopping sequences are queued to start, anything else is
    /// queued to stop. Returns the affected sequence id.
    pub fn trigger(&mut self, note: u8) -> Option<SequenceId> {
        let id = self
            .sequences
            .iter()
            .find(|(_, seq)| seq.trigger_note() == note)
            .map(|(&id, _)| id)?;
        let seq = self.sequence_mut(id);
        match seq.play_state() {
            PlayState::Stopped | PlayState::Stopping => seq.set_play_state(PlayState::Starting),
            _ => seq.set_play_state(PlayState::Stopping),
        }
        Some(id)
    }

    /// Recompute the length of every sequence in `song` and return the song
    /// length (the max over its tracks) in clocks.
    pub fn update_sequence_lengths(&mut self, song: SongId) -> u32 {
        let tracks: Vec<SequenceId> = self
            .songs
            .get(&song)
            .map(|song| song.tracks().to_vec())
            .unwrap_or_default();
        let mut song_length = 0;
        for id in tracks {
            if let Some(seq) = self.sequences.get_mut(&id) {
                song_length = song_length.max(seq.update_length(&self.patterns));
            }
        }
        song_length
    }

    /// Recompute every sequence length; returns the current song's length.
    pub fn update_all_sequence_lengths(&mut self) -> u32 {
        let ids: Vec<SequenceId> = self.sequences.keys().copied().collect();
        for id in ids {
            if let Some(seq) = self.sequences.get_mut(&id) {
                seq.update_length(&self.patterns);
            }
        }
        self.update_sequence_lengths(self.current_song)
    }

    /// Add a track to `song`, backed by a freshly created sequence.
    /// Returns the new track index.
    pub fn add_track(&mut self, song: SongId) -> usize {
        let id = self.next_sequence_id();
        self.sequences.insert(id, Sequence::new());
        self.song_mut(song).add_track(id)
    }

    /// Remove a track and the sequence it references.
    pub fn remove_track(&mut self, song: SongId, track: usize) {
        if let Some(id) = self.song_mut(song).remove_track(track) {
            self.sequences.remove(&id);
        }
    }

    pub fn clear_song(&mut self, song: SongId) {
        let tracks: Vec<SequenceId> = self
            .songs
            .get(&song)
            .map(|song| song.tracks().to_vec())
            .unwrap_or_default();
        for id in tracks {
            self.sequences.remove(&id);
        }
        self.song_mut(song).clear();
    }

    /// Deep-copy a song: the timebase and a duplicate of every track's
    /// sequence under fresh ids.
    pub fn copy_song(&mut self, source: SongId, destination: SongId) {
        if source == destination {
            return;
        }
        let (tracks, timebase) = match self.songs.get(&source) {
            Some(song) => (song.tracks().to_vec(), song.timebase().clone()),
            None => return,
        };
        let mut copy = Song::new();
        *copy.timebase_mut() = timebase;
        for track in tracks {
            let id = self.next_sequence_id();
            let seq = self
                .sequences
                .get(&track)
                .cloned()
                .unwrap_or_else(Sequence::new);
            self.sequences.insert(id, seq);
            copy.add_track(id);
        }
        self.songs.insert(destination, copy);
    }

    /// Queue every track of the current song to start (immediately when
    /// `fast`, otherwise on the next bar sync).
    pub fn start_song(&mut self, fast: bool) {
        let state = if fast {
            PlayState::Playing
        } else {
            PlayState::Starting
        };
        for id in self.current_tracks() {
            self.sequence_mut(id).set_play_state(state);
        }
    }

    /// Stop every track of the current song immediately.
    pub fn stop_song(&mut self) {
        for id in self.current_tracks() {
            self.sequence_mut(id).set_play_state(PlayState::Stopped);
        }
    }

    /// Stop every sequence, song tracks or not.
    pub fn stop_all(&mut self) {
        for seq in self.sequences.values_mut() {
            seq.set_play_state(PlayState::Stopped);
        }
    }

    /// Set the play position of every track of the current song.
    pub fn set_song_position(&mut self, clock: u32) {
        for id in self.current_tracks() {
            self.sequence_mut(id).set_play_position(clock);
        }
    }

    /// Solo one track of a song: everything else is unsoloed and stopped.
    /// The caller decides whether the soloed track should start playing.
    pub fn solo(&mut self, song: SongId, track: usize, solo: bool) {
        let tracks: Vec<SequenceId> = self
            .songs
            .get(&song)
            .map(|song| song.tracks().to_vec())
            .unwrap_or_default();
        for &id in tracks.iter() {
            let seq = self.sequence_mut(id);
            seq.set_solo(false);
            seq.set_play_state(PlayState::Stopped);
        }
        if let Some(&id) = tracks.get(track) {
            self.sequence_mut(id).set_solo(solo);
        }
    }

    fn current_tracks(&self) -> Vec<SequenceId> {
        self.songs
            .get(&self.current_song)
            .map(|song| song.tracks().to_vec())
            .unwrap_or_default()
    }

    fn next_sequence_id(&self) -> SequenceId {
        self.sequences.keys().max().map(|&id| id + 1).unwrap_or(1)
    }

    // Persistence access

    pub(crate) fn patterns(&self) -> &BTreeMap<PatternId, Pattern> {
        &self.patterns
    }

    pub(crate) fn sequences(&self) -> &BTreeMap<SequenceId, Sequence> {
        &self.sequences
    }

    pub(crate) fn songs(&self) -> &BTreeMap<SongId, Song> {
        &self.songs
    }

    pub(crate) fn restore(
        &mut self,
        patterns: BTreeMap<PatternId, Pattern>,
        sequences: BTreeMap<SequenceId, Sequence>,
        songs: BTreeMap<SongId, Song>,
        current_song: SongId,
        trigger_channel: u8,
    ) {
        self.patterns = patterns;
        self.sequences = sequences;
        self.songs = songs;
        self.current_song = current_song;
        if trigger_channel < 16 {
            self.trigger_channel = trigger_channel;
        }
    }
}

impl Default for PatternManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_with_song() -> PatternManager {
        let mut manager = PatternManager::new();
        let pattern = manager.pattern_mut(1);
        pattern.add_note(0, 60, 100, 1.0);
        let track = manager.add_track(1);
        let seq = manager.song(1).unwrap().sequence(track).unwrap();
        assert!(manager.add_pattern_to_sequence(seq, 0, 1, false));
        manager.set_current_song(1);
        manager
    }

    #[test]
    fn test_add_track_creates_sequence() {
        let mut manager = PatternManager::new();
        let track0 = manager.add_track(1);
        let track1 = manager.add_track(1);
        assert_eq!((track0, track1), (0, 1));
        let id0 = manager.song(1).unwrap().sequence(0).unwrap();
        let id1 = manager.song(1).unwrap().sequence(1).unwrap();
        assert_ne!(id0, id1);
        assert!(manager.sequence(id0).is_some());

        manager.remove_track(1, 0);
        assert!(manager.sequence(id0).is_none());
        assert_eq!(manager.song(1).unwrap().track_count(), 1);
    }

    #[test]
    fn test_sequence_lengths_follow_pattern_edits() {
        let mut manager = manager_with_song();
        let seq = manager.song(1).unwrap().sequence(0).unwrap();
        assert_eq!(manager.update_sequence_lengths(1), 96);

        manager.pattern_mut(1).set_beats_in_pattern(8);
        assert_eq!(manager.update_sequence_lengths(1), 192);
        assert_eq!(manager.sequence(seq).unwrap().length(), 192);
    }

    #[test]
    fn test_clock_reports_playing() {
        let mut manager = manager_with_song();
        let seq = manager.song(1).unwrap().sequence(0).unwrap();

        let mut queue = EventQueue::new();
        // Nothing playing: clock reports silence
        assert!(!manager.clock(0, &mut queue, true, 100.0));
        assert!(queue.is_empty());

        manager.sequence_mut(seq).set_play_state(PlayState::Playing);
        assert!(manager.clock(0, &mut queue, true, 100.0));
        assert!(!queue.is_empty());
    }

    #[test]
    fn test_trigger_toggles() {
        let mut manager = manager_with_song();
        let seq = manager.song(1).unwrap().sequence(0).unwrap();
        manager.set_trigger_note(seq, 36);

        assert!(manager.trigger(99).is_none());
        assert_eq!(manager.trigger(36), Some(seq));
        assert_eq!(manager.sequence(seq).unwrap().play_state(), PlayState::Starting);

        // Triggering a starting sequence cancels it via stop
        let mut queue = EventQueue::new();
        manager.clock(0, &mut queue, true, 100.0); // sync: starting -> playing
        assert_eq!(manager.trigger(36), Some(seq));
        assert_eq!(manager.sequence(seq).unwrap().play_state(), PlayState::Stopping);
    }

    #[test]
    fn test_copy_pattern_and_song() {
        let mut manager = manager_with_song();
        manager.copy_pattern(1, 2);
        assert_eq!(manager.pattern(2).unwrap().event_count(), 1);

        manager.song_mut(1).timebase_mut().set_tempo(140, 1, 0);
        manager.copy_song(1, 2);
        let copy = manager.song(2).unwrap();
        assert_eq!(copy.track_count(), 1);
        assert_eq!(copy.timebase().tempo_at(1, 0), 140);
        // Tracks are duplicated sequences, not shared ids
        assert_ne!(copy.sequence(0), manager.song(1).unwrap().sequence(0));
    }

    #[test]
    fn test_song_start_stop_position() {
        let mut manager = manager_with_song();
        let seq = manager.song(1).unwrap().sequence(0).unwrap();
        manager.update_sequence_lengths(1);

        manager.start_song(false);
        assert_eq!(manager.sequence(seq).unwrap().play_state(), PlayState::Starting);
        manager.start_song(true);
        assert_eq!(manager.sequence(seq).unwrap().play_state(), PlayState::Playing);

        manager.set_song_position(24);
        assert_eq!(manager.sequence(seq).unwrap().play_position(), 24);

        manager.stop_song();
        assert_eq!(manager.sequence(seq).unwrap().play_state(), PlayState::Stopped);
    }

    #[test]
    fn test_clear_song_removes_track_sequences() {
        let mut manager = manager_with_song();
        let seq = manager.song(1).unwrap().sequence(0).unwrap();
        manager.clear_song(1);
        assert!(manager.sequence(seq).is_none());
        assert_eq!(manager.song(1).unwrap().track_count(), 0);
    }

    #[test]
    fn test_solo_stops_other_tracks() {
        let mut manager = manager_with_song();
        let track1 = manager.add_track(1);
        let seq0 = manager.song(1).unwrap().sequence(0).unwrap();
        let seq1 = manager.song(1).unwrap().sequence(track1).unwrap();
        manager.sequence_mut(seq0).set_play_state(PlayState::Playing);

        manager.solo(1, track1, true);
        assert_eq!(manager.sequence(seq0).unwrap().play_state(), PlayState::Stopped);
        assert!(manager.sequence(seq1).unwrap().solo());
        assert!(!manager.sequence(seq0).unwrap().solo());
    }
}
