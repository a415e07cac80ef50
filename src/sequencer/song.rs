// Song - ordered tracks of sequences plus a timebase

use crate::sequencer::sequence::SequenceId;
use crate::sequencer::timebase::Timebase;
use serde::{Deserialize, Serialize};

/// Unique identifier for songs
pub type SongId = u32;

/// A song: each track references a sequence by id, and the timebase carries
/// the song's tempo and meter changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Song {
    tracks: Vec<SequenceId>,
    timebase: Timebase,
}

impl Song {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a track referencing `sequence`. Returns the new track index.
    pub fn add_track(&mut self, sequence: SequenceId) -> usize {
        self.tracks.push(sequence);
        self.tracks.len() - 1
    }

    /// Remove a track by index. Returns the sequence it referenced.
    pub fn remove_track(&mut self, track: usize) -> Option<SequenceId> {
        if track < self.tracks.len() {
            Some(self.tracks.remove(track))
        } else {
            None
        }
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn sequence(&self, track: usize) -> Option<SequenceId> {
        self.tracks.get(track).copied()
    }

    pub fn tracks(&self) -> &[SequenceId] {
        &self.tracks
    }

    pub fn timebase(&self) -> &Timebase {
        &self.timebase
    }

    pub fn timebase_mut(&mut self) -> &mut Timebase {
        &mut self.timebase
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
        self.timebase.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_management() {
        let mut song = Song::new();
        assert_eq!(song.add_track(5), 0);
        assert_eq!(song.add_track(9), 1);
        assert_eq!(song.track_count(), 2);
        assert_eq!(song.sequence(1), Some(9));
        assert_eq!(song.sequence(2), None);

        assert_eq!(song.remove_track(0), Some(5));
        assert_eq!(song.sequence(0), Some(9));
        assert_eq!(song.remove_track(4), None);
    }

    #[test]
    fn test_clear() {
        let mut song = Song::new();
        song.add_track(1);
        song.timebase_mut().set_tempo(140, 1, 0);
        song.clear();
        assert_eq!(song.track_count(), 0);
        assert!(song.timebase().is_empty());
    }
}
