// Project persistence - round-trip of patterns, sequences, songs, timebase

use crate::sequencer::manager::PatternManager;
use crate::sequencer::pattern::{Pattern, PatternId};
use crate::sequencer::sequence::{Sequence, SequenceId};
use crate::sequencer::song::{Song, SongId};
use ron::{from_str as ron_from_str, to_string as ron_to_string};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// On-disk format version.
const FORMAT_VERSION: u32 = 1;

/// Project error types
#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unsupported project version {0}")]
    UnsupportedVersion(u32),
}

/// Serializable image of the whole data model.
///
/// Only persistent state is captured: play states, play positions and the
/// transport cursor are runtime-only and reset on load.
#[derive(Debug, Serialize, Deserialize)]
pub struct ProjectSnapshot {
    version: u32,
    patterns: BTreeMap<PatternId, Pattern>,
    sequences: BTreeMap<SequenceId, Sequence>,
    songs: BTreeMap<SongId, Song>,
    current_song: SongId,
    trigger_channel: u8,
}

impl ProjectSnapshot {
    pub fn capture(manager: &PatternManager) -> Self {
        Self {
            version: FORMAT_VERSION,
            patterns: manager.patterns().clone(),
            sequences: manager.sequences().clone(),
            songs: manager.songs().clone(),
            current_song: manager.current_song(),
            trigger_channel: manager.trigger_channel(),
        }
    }

    pub fn apply(self, manager: &mut PatternManager) {
        manager.restore(
            self.patterns,
            self.sequences,
            self.songs,
            self.current_song,
            self.trigger_channel,
        );
    }
}

/// Serialize the manager's state to RON.
pub fn to_ron(manager: &PatternManager) -> Result<String, ProjectError> {
    ron_to_string(&ProjectSnapshot::capture(manager))
        .map_err(|e| ProjectError::Serialization(format!("failed to serialize project: {}", e)))
}

/// Parse a snapshot from RON without touching any live state.
pub fn from_ron(data: &str) -> Result<ProjectSnapshot, ProjectError> {
    let snapshot: ProjectSnapshot = ron_from_str(data)
        .map_err(|e| ProjectError::Serialization(format!("failed to parse project: {}", e)))?;
    if snapshot.version > FORMAT_VERSION {
        return Err(ProjectError::UnsupportedVersion(snapshot.version));
    }
    Ok(snapshot)
}

/// Save the manager's state to `path`.
pub fn save<P: AsRef<Path>>(path: P, manager: &PatternManager) -> Result<(), ProjectError> {
    let data = to_ron(manager)?;
    std::fs::write(path, data)?;
    Ok(())
}

/// Load a snapshot from `path`. The caller applies it only on success, so a
/// failed load leaves the previous state intact.
pub fn load_snapshot<P: AsRef<Path>>(path: P) -> Result<ProjectSnapshot, ProjectError> {
    let data = std::fs::read_to_string(path)?;
    from_ron(&data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::sequence::{PlayMode, PlayState};

    fn populated_manager() -> PatternManager {
        let mut manager = PatternManager::new();
        let pattern = manager.pattern_mut(1);
        pattern.add_note(0, 60, 100, 1.0);
        pattern.add_note(4, 64, 90, 2.5);
        pattern.add_control(2, 7, 0, 127, 4.0);
        pattern.set_steps_per_beat(8);
        pattern.set_scale(2);
        pattern.set_tonic(5);

        let track = manager.add_track(1);
        let seq_id = manager.song(1).unwrap().sequence(track).unwrap();
        manager.add_pattern_to_sequence(seq_id, 0, 1, false);
        manager.sequence_mut(seq_id).set_channel(9);
        manager.sequence_mut(seq_id).set_play_mode(PlayMode::OneShotAll);
        manager.set_trigger_note(seq_id, 36);
        manager.song_mut(1).timebase_mut().set_tempo(140, 3, 12);
        manager.song_mut(1).timebase_mut().set_timesig((3 << 8) | 4, 5);
        manager.set_trigger_channel(10);
        manager.set_current_song(1);
        manager
    }

    #[test]
    fn test_round_trip() {
        let manager = populated_manager();
        let data = to_ron(&manager).unwrap();

        let mut restored = PatternManager::new();
        from_ron(&data).unwrap().apply(&mut restored);

        let pattern = restored.pattern(1).unwrap();
        assert_eq!(pattern.event_count(), 3);
        assert_eq!(pattern.steps_per_beat(), 8);
        assert_eq!(pattern.scale(), 2);
        assert_eq!(pattern.tonic(), 5);
        // Notes rescaled by the steps-per-beat change before capture
        assert_eq!(pattern.note_velocity(8, 64), 90);

        let seq_id = restored.song(1).unwrap().sequence(0).unwrap();
        let seq = restored.sequence(seq_id).unwrap();
        assert_eq!(seq.channel(), 9);
        assert_eq!(seq.play_mode(), PlayMode::OneShotAll);
        assert_eq!(seq.trigger_note(), 36);
        assert_eq!(seq.pattern_at(0), Some(1));
        // Runtime state does not survive the trip
        assert_eq!(seq.play_state(), PlayState::Stopped);
        assert_eq!(seq.play_position(), 0);

        let timebase = restored.song(1).unwrap().timebase();
        assert_eq!(timebase.tempo_at(3, 12), 140);
        assert_eq!(timebase.timesig_at(5), (3 << 8) | 4);
        assert_eq!(restored.trigger_channel(), 10);
    }

    #[test]
    fn test_save_and_load_file() {
        let manager = populated_manager();
        let path = std::env::temp_dir().join("gridseq_project_test.ron");
        save(&path, &manager).unwrap();

        let snapshot = load_snapshot(&path).unwrap();
        let mut restored = PatternManager::new();
        snapshot.apply(&mut restored);
        assert_eq!(restored.pattern(1).unwrap().event_count(), 3);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_malformed_input_is_an_error() {
        assert!(from_ron("not a project").is_err());
        assert!(from_ron("").is_err());
    }

    #[test]
    fn test_future_version_rejected() {
        let manager = PatternManager::new();
        let data = to_ron(&manager).unwrap();
        let bumped = data.replacen("version:1", "version:99", 1);
        match from_ron(&bumped) {
            Err(ProjectError::UnsupportedVersion(99)) => {}
            other => panic!("expected version error, got {:?}", other.map(|_| ())),
        }
    }
}
