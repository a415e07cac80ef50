// Sequencer engine - the owned engine value behind the host callbacks

pub mod control;
pub mod position;
pub mod scheduler;
pub mod transport;

use crate::engine::control::TransportControl;
use crate::engine::position::TransportPosition;
use crate::engine::scheduler::Scheduler;
use crate::engine::transport::TransportEngine;
use crate::host::timing::AudioTiming;
use crate::midi::message::{
    MidiMessage, MIDI_CLOCK, MIDI_CONTINUE, MIDI_NOTE_ON, MIDI_POSITION, MIDI_SONG, MIDI_START,
    MIDI_STOP,
};
use crate::midi::output::{MidiOutputBuffer, MidiSender};
use crate::project::{self, ProjectError};
use crate::sequencer::manager::PatternManager;
use crate::sequencer::pattern::{Pattern, PatternId};
use crate::sequencer::sequence::{PlayMode, PlayState, SequenceId};
use crate::sequencer::song::SongId;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Lock budget of the realtime cycle; on contention the affected work is
/// skipped for the period and resumes on the next one.
const RT_LOCK_TIMEOUT: Duration = Duration::from_micros(20);

/// State owned by the timebase callback between periods.
struct TransportCore {
    timebase: TransportEngine,
    position: TransportPosition,
}

/// The step sequencer engine.
///
/// One value owns the whole data model and the transport; host callbacks get
/// a stable `Arc` handle and drive `run_cycle` once per period. Every edit
/// operation is safe from any control thread.
pub struct SequencerEngine {
    manager: Mutex<PatternManager>,
    scheduler: Arc<Scheduler>,
    timing: Arc<AudioTiming>,
    transport: Arc<TransportControl>,
    core: Mutex<TransportCore>,
    sender: MidiSender,
    selected_pattern: AtomicU32,
    input_channel: AtomicU8,
    modified: AtomicBool,
}

impl SequencerEngine {
    pub fn new(sample_rate: u32) -> Self {
        let scheduler = Arc::new(Scheduler::new());
        let timing = Arc::new(AudioTiming::new(sample_rate));
        let transport = Arc::new(TransportControl::new());
        let sender = MidiSender::new(Arc::clone(&scheduler), Arc::clone(&timing));

        let engine = Self {
            manager: Mutex::new(PatternManager::new()),
            scheduler,
            timing,
            transport,
            core: Mutex::new(TransportCore {
                timebase: TransportEngine::new(sample_rate),
                position: TransportPosition::new(),
            }),
            sender,
            selected_pattern: AtomicU32::new(1),
            input_channel: AtomicU8::new(1),
            modified: AtomicBool::new(false),
        };
        engine.select_song(1);
        engine.transport.stop();
        engine.transport.locate(0); // First cycle recomputes the position
        engine
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn timing(&self) -> &Arc<AudioTiming> {
        &self.timing
    }

    pub fn midi(&self) -> &MidiSender {
        &self.sender
    }

    pub fn sample_rate(&self) -> u32 {
        self.timing.sample_rate()
    }

    // ------------------------------------------------------------------
    // Realtime cycle
    // ------------------------------------------------------------------

    /// Run one host period: timebase callback, MIDI input, scheduler drain.
    ///
    /// Called from the realtime thread. All locks are bounded try-locks;
    /// contention skips the affected stage for this period instead of
    /// blocking the callback.
    pub fn run_cycle(&self, frames: u32, input: &[MidiMessage], out: &mut MidiOutputBuffer) {
        let now = self.timing.current_sample();
        let state = self.transport.state();

        if let Some(mut core) = self.core.try_lock_for(RT_LOCK_TIMEOUT) {
            if let Some(mut manager) = self.manager.try_lock_for(RT_LOCK_TIMEOUT) {
                let update = match self.transport.take_reposition() {
                    Some(request) => {
                        core.position = request;
                        true
                    }
                    None => false,
                };

                let auto_stop = match self.scheduler.try_lock_queue() {
                    Some(mut queue) => {
                        let core = &mut *core;
                        core.timebase.timebase_callback(
                            state,
                            frames,
                            &mut core.position,
                            update,
                            now,
                            &mut manager,
                            &mut queue,
                        )
                    }
                    None => false,
                };
                if auto_stop {
                    self.transport.stop();
                    self.transport.locate(0);
                }

                self.handle_input(input, &mut manager, &mut core);

                // The host advances the transport frame while rolling
                if state.is_rolling() {
                    core.position.frame += frames as u64;
                }
            }
        }

        self.scheduler.drain(now, frames, out);
        self.timing.advance(frames);
    }

    /// Interpret host MIDI input (process callback step 1-3).
    fn handle_input(
        &self,
        input: &[MidiMessage],
        manager: &mut PatternManager,
        core: &mut TransportCore,
    ) {
        for msg in input {
            match msg.command {
                MIDI_STOP => Self::do_pause_song(manager, core),
                MIDI_START => {
                    Self::do_stop_song(manager, core);
                    Self::do_start_song(manager, core, false);
                }
                MIDI_CONTINUE => Self::do_start_song(manager, core, false),
                MIDI_POSITION => {
                    // Song position arrives in MIDI beats of 6 clocks
                    let pos = (msg.value1 as u32 | ((msg.value2 as u32) << 7)) * 6;
                    Self::do_set_song_position(manager, core, pos);
                }
                MIDI_SONG => Self::do_select_song(manager, core, msg.value1 as u32 + 1),
                MIDI_CLOCK => {} // We are the timebase authority
                _ => {}
            }

            if msg.status() == MIDI_NOTE_ON && msg.value2 > 0 {
                if msg.channel() == manager.trigger_channel() {
                    if let Some(seq) = manager.trigger(msg.value1) {
                        let state = manager.sequence(seq).map(|s| s.play_state());
                        if state != Some(PlayState::Stopped) && !self.transport.state().is_rolling()
                        {
                            self.transport.start();
                        }
                    }
                }
                let input_channel = self.input_channel.load(Ordering::Relaxed);
                if manager.current_song() == 0
                    && input_channel < 16
                    && msg.channel() == input_channel
                {
                    self.toggle_note_at_step(manager, msg.value1, msg.value2);
                }
            }
        }
    }

    /// Pattern programming from MIDI input: toggle `note` at the current
    /// step of the edit sequence, stepping forward while stopped.
    fn toggle_note_at_step(&self, manager: &mut PatternManager, note: u8, velocity: u8) {
        let pattern_id = self.selected_pattern.load(Ordering::Relaxed);
        let step = manager.sequence_mut(1).step();
        let pattern = manager.pattern_mut(pattern_id);
        if pattern.note_velocity(step, note) > 0 {
            pattern.remove_note(step, note);
        } else {
            pattern.add_note(step, note, velocity, 1.0);
        }
        let steps = pattern.steps();
        self.modified.store(true, Ordering::Relaxed);
        if !self.transport.state().is_rolling() {
            let next = (step + 1) % steps.max(1);
            manager.sequence_mut(1).set_step(next);
        }
    }

    // ------------------------------------------------------------------
    // Song helpers shared by the realtime and control paths
    // ------------------------------------------------------------------

    fn do_start_song(manager: &mut PatternManager, core: &mut TransportCore, fast: bool) {
        manager.start_song(fast);
        core.timebase.set_song_status(if fast {
            PlayState::Playing
        } else {
            PlayState::Starting
        });
    }

    fn do_pause_song(manager: &mut PatternManager, core: &mut TransportCore) {
        core.timebase.set_song_status(PlayState::Stopped);
        manager.stop_song();
    }

    fn do_stop_song(manager: &mut PatternManager, core: &mut TransportCore) {
        core.timebase.set_song_status(PlayState::Stopped);
        manager.stop_song();
        Self::do_set_song_position(manager, core, 0);
    }

    fn do_set_song_position(manager: &mut PatternManager, core: &mut TransportCore, clocks: u32) {
        manager.set_song_position(clocks);
        core.timebase.set_song_position(clocks);
    }

    fn do_select_song(manager: &mut PatternManager, core: &mut TransportCore, song: SongId) {
        manager.set_current_song(song);
        let length = manager.update_sequence_lengths(song);
        core.timebase.set_song_length(length);
        core.timebase.mark_timebase_changed();
        if let Some(song) = manager.song(song) {
            core.timebase.reset_timebase_cursor(song.timebase());
        }
    }

    fn refresh_song_length(&self, manager: &mut PatternManager) {
        let length = manager.update_sequence_lengths(manager.current_song());
        self.core.lock().timebase.set_song_length(length);
    }

    // ------------------------------------------------------------------
    // Pattern editing surface (operates on the selected pattern)
    // ------------------------------------------------------------------

    fn with_selected_pattern<R>(&self, f: impl FnOnce(&mut Pattern) -> R) -> R {
        let id = self.selected_pattern.load(Ordering::Relaxed);
        let mut manager = self.manager.lock();
        f(manager.pattern_mut(id))
    }

    /// Select the pattern subsequent pattern edits apply to, creating it on
    /// first use.
    pub fn select_pattern(&self, pattern: PatternId) {
        self.manager.lock().pattern_mut(pattern);
        self.selected_pattern.store(pattern, Ordering::Relaxed);
        self.modified.store(true, Ordering::Relaxed);
    }

    pub fn selected_pattern(&self) -> PatternId {
        self.selected_pattern.load(Ordering::Relaxed)
    }

    pub fn add_note(&self, step: u32, note: u8, velocity: u8, duration: f32) -> bool {
        let added = self.with_selected_pattern(|p| p.add_note(step, note, velocity, duration));
        if added {
            self.modified.store(true, Ordering::Relaxed);
        }
        added
    }

    pub fn remove_note(&self, step: u32, note: u8) -> bool {
        let removed = self.with_selected_pattern(|p| p.remove_note(step, note));
        if removed {
            self.modified.store(true, Ordering::Relaxed);
        }
        removed
    }

    pub fn get_note_velocity(&self, step: u32, note: u8) -> u8 {
        self.with_selected_pattern(|p| p.note_velocity(step, note))
    }

    pub fn set_note_velocity(&self, step: u32, note: u8, velocity: u8) {
        self.with_selected_pattern(|p| p.set_note_velocity(step, note, velocity));
        self.modified.store(true, Ordering::Relaxed);
    }

    pub fn get_note_duration(&self, step: u32, note: u8) -> f32 {
        self.with_selected_pattern(|p| p.note_duration(step, note))
    }

    /// Step at which the note sounding at `step` starts, -1 if none.
    pub fn get_note_start(&self, step: u32, note: u8) -> i32 {
        self.with_selected_pattern(|p| p.note_start(step, note))
            .map(|start| start as i32)
            .unwrap_or(-1)
    }

    pub fn add_program_change(&self, step: u32, program: u8) -> bool {
        let added = self.with_selected_pattern(|p| p.add_program_change(step, program));
        if added {
            self.modified.store(true, Ordering::Relaxed);
        }
        added
    }

    pub fn remove_program_change(&self, step: u32) -> bool {
        let removed = self.with_selected_pattern(|p| p.remove_program_change(step));
        if removed {
            self.modified.store(true, Ordering::Relaxed);
        }
        removed
    }

    /// Program number at `step`, 0xFF if none.
    pub fn get_program_change(&self, step: u32) -> u8 {
        self.with_selected_pattern(|p| p.program_change(step)).unwrap_or(0xFF)
    }

    pub fn add_control(
        &self,
        step: u32,
        control: u8,
        value_start: u8,
        value_end: u8,
        duration: f32,
    ) -> bool {
        let added = self
            .with_selected_pattern(|p| p.add_control(step, control, value_start, value_end, duration));
        if added {
            self.modified.store(true, Ordering::Relaxed);
        }
        added
    }

    pub fn remove_control(&self, step: u32, control: u8) -> bool {
        let removed = self.with_selected_pattern(|p| p.remove_control(step, control));
        if removed {
            self.modified.store(true, Ordering::Relaxed);
        }
        removed
    }

    pub fn transpose(&self, delta: i32) -> bool {
        let transposed = self.with_selected_pattern(|p| p.transpose(delta));
        if transposed {
            self.modified.store(true, Ordering::Relaxed);
        }
        transposed
    }

    pub fn change_velocity_all(&self, delta: i32) {
        self.with_selected_pattern(|p| p.change_velocity_all(delta));
        self.modified.store(true, Ordering::Relaxed);
    }

    pub fn change_duration_all(&self, delta: f32) -> bool {
        let changed = self.with_selected_pattern(|p| p.change_duration_all(delta));
        if changed {
            self.modified.store(true, Ordering::Relaxed);
        }
        changed
    }

    pub fn clear_pattern(&self) {
        self.with_selected_pattern(|p| p.clear());
        self.modified.store(true, Ordering::Relaxed);
    }

    pub fn get_steps(&self) -> u32 {
        self.with_selected_pattern(|p| p.steps())
    }

    pub fn get_beats_in_pattern(&self) -> u32 {
        self.with_selected_pattern(|p| p.beats())
    }

    pub fn set_beats_in_pattern(&self, beats: u32) {
        let mut manager = self.manager.lock();
        let id = self.selected_pattern.load(Ordering::Relaxed);
        manager.pattern_mut(id).set_beats_in_pattern(beats);
        self.refresh_song_length(&mut manager);
        self.modified.store(true, Ordering::Relaxed);
    }

    pub fn get_steps_per_beat(&self) -> u32 {
        self.with_selected_pattern(|p| p.steps_per_beat())
    }

    pub fn set_steps_per_beat(&self, steps_per_beat: u32) -> bool {
        let changed = self.with_selected_pattern(|p| p.set_steps_per_beat(steps_per_beat));
        if changed {
            self.modified.store(true, Ordering::Relaxed);
        }
        changed
    }

    pub fn get_clocks_per_step(&self) -> u32 {
        self.with_selected_pattern(|p| p.clocks_per_step())
    }

    pub fn get_pattern_length(&self, pattern: PatternId) -> u32 {
        self.manager
            .lock()
            .pattern(pattern)
            .map(|p| p.length())
            .unwrap_or(0)
    }

    pub fn copy_pattern(&self, source: PatternId, destination: PatternId) {
        self.manager.lock().copy_pattern(source, destination);
    }

    pub fn set_scale(&self, scale: u8) {
        self.with_selected_pattern(|p| p.set_scale(scale));
    }

    pub fn get_scale(&self) -> u8 {
        self.with_selected_pattern(|p| p.scale())
    }

    pub fn set_tonic(&self, tonic: u8) {
        self.with_selected_pattern(|p| p.set_tonic(tonic));
    }

    pub fn get_tonic(&self) -> u8 {
        self.with_selected_pattern(|p| p.tonic())
    }

    pub fn set_ref_note(&self, note: u8) {
        self.with_selected_pattern(|p| p.set_ref_note(note));
    }

    pub fn get_ref_note(&self) -> u8 {
        self.with_selected_pattern(|p| p.ref_note())
    }

    /// True once since the last call if any pattern edit happened.
    pub fn is_pattern_modified(&self) -> bool {
        self.modified.swap(false, Ordering::Relaxed)
    }

    pub fn set_input_channel(&self, channel: u8) {
        self.input_channel
            .store(if channel > 15 { 0xFF } else { channel }, Ordering::Relaxed);
    }

    pub fn get_input_channel(&self) -> u8 {
        self.input_channel.load(Ordering::Relaxed)
    }

    // ------------------------------------------------------------------
    // Sequence surface
    // ------------------------------------------------------------------

    pub fn add_pattern(
        &self,
        sequence: SequenceId,
        position: u32,
        pattern: PatternId,
        force: bool,
    ) -> bool {
        let mut manager = self.manager.lock();
        let added = manager.add_pattern_to_sequence(sequence, position, pattern, force);
        self.refresh_song_length(&mut manager);
        added
    }

    pub fn remove_pattern(&self, sequence: SequenceId, position: u32) {
        let mut manager = self.manager.lock();
        manager.sequence_mut(sequence).remove_pattern(position);
        self.refresh_song_length(&mut manager);
    }

    pub fn get_pattern_at(&self, sequence: SequenceId, position: u32) -> Option<PatternId> {
        self.manager
            .lock()
            .sequence(sequence)
            .and_then(|seq| seq.pattern_at(position))
    }

    pub fn clear_sequence(&self, sequence: SequenceId) {
        let mut manager = self.manager.lock();
        manager.sequence_mut(sequence).clear();
        self.refresh_song_length(&mut manager);
    }

    pub fn get_step(&self, sequence: SequenceId) -> u32 {
        self.manager.lock().sequence_mut(sequence).step()
    }

    pub fn set_channel(&self, sequence: SequenceId, channel: u8) {
        self.manager.lock().sequence_mut(sequence).set_channel(channel);
    }

    pub fn get_channel(&self, sequence: SequenceId) -> u8 {
        self.manager.lock().sequence_mut(sequence).channel()
    }

    pub fn set_output(&self, sequence: SequenceId, output: u8) {
        self.manager.lock().sequence_mut(sequence).set_output(output);
    }

    pub fn set_play_mode(&self, sequence: SequenceId, mode: PlayMode) {
        self.manager.lock().sequence_mut(sequence).set_play_mode(mode);
    }

    pub fn get_play_mode(&self, sequence: SequenceId) -> PlayMode {
        self.manager.lock().sequence_mut(sequence).play_mode()
    }

    /// Request a play state. While the transport is stopped a queued start
    /// also repositions to the bar start and rolls the transport, and a
    /// queued stop degrades to an immediate one (no clock will arrive to
    /// land it).
    pub fn set_play_state(&self, sequence: SequenceId, state: PlayState) {
        let mut state = state;
        if !self.transport.state().is_rolling() {
            match state {
                PlayState::Starting => {
                    self.manager
                        .lock()
                        .sequence_mut(sequence)
                        .set_play_state(PlayState::Starting);
                    self.set_transport_to_start_of_bar();
                    self.transport.start();
                    return;
                }
                PlayState::Stopping => state = PlayState::Stopped,
                _ => {}
            }
        }
        self.manager.lock().sequence_mut(sequence).set_play_state(state);
    }

    pub fn get_play_state(&self, sequence: SequenceId) -> PlayState {
        self.manager.lock().sequence_mut(sequence).play_state()
    }

    pub fn toggle_play_state(&self, sequence: SequenceId) {
        let state = {
            let mut manager = self.manager.lock();
            let seq = manager.sequence_mut(sequence);
            match seq.play_state() {
                PlayState::Stopped | PlayState::Stopping => PlayState::Starting,
                _ => PlayState::Stopping,
            }
        };
        self.set_play_state(sequence, state);
    }

    pub fn get_play_position(&self, sequence: SequenceId) -> u32 {
        self.manager.lock().sequence_mut(sequence).play_position()
    }

    pub fn set_play_position(&self, sequence: SequenceId, clock: u32) {
        self.manager.lock().sequence_mut(sequence).set_play_position(clock);
    }

    pub fn get_sequence_length(&self, sequence: SequenceId) -> u32 {
        self.manager.lock().sequence_mut(sequence).length()
    }

    pub fn set_group(&self, sequence: SequenceId, group: u8) {
        self.manager.lock().sequence_mut(sequence).set_group(group);
    }

    pub fn get_group(&self, sequence: SequenceId) -> u8 {
        self.manager.lock().sequence_mut(sequence).group()
    }

    pub fn set_tally_channel(&self, sequence: SequenceId, channel: u8) {
        self.manager
            .lock()
            .sequence_mut(sequence)
            .set_tally_channel(channel);
    }

    pub fn get_tally_channel(&self, sequence: SequenceId) -> u8 {
        self.manager.lock().sequence_mut(sequence).tally_channel()
    }

    pub fn set_trigger_note(&self, sequence: SequenceId, note: u8) {
        self.manager.lock().set_trigger_note(sequence, note);
    }

    pub fn get_trigger_note(&self, sequence: SequenceId) -> u8 {
        self.manager.lock().trigger_note(sequence)
    }

    pub fn set_trigger_channel(&self, channel: u8) {
        self.manager.lock().set_trigger_channel(channel);
    }

    pub fn get_trigger_channel(&self) -> u8 {
        self.manager.lock().trigger_channel()
    }

    /// Stop the song and every sequence.
    pub fn stop(&self) {
        {
            let mut manager = self.manager.lock();
            let mut core = self.core.lock();
            Self::do_stop_song(&mut manager, &mut core);
            manager.stop_all();
        }
    }

    // ------------------------------------------------------------------
    // Song surface
    // ------------------------------------------------------------------

    pub fn add_track(&self, song: SongId) -> usize {
        self.manager.lock().add_track(song)
    }

    pub fn remove_track(&self, song: SongId, track: usize) {
        let mut manager = self.manager.lock();
        manager.remove_track(song, track);
        self.refresh_song_length(&mut manager);
    }

    pub fn get_tracks(&self, song: SongId) -> usize {
        self.manager.lock().song_mut(song).track_count()
    }

    pub fn get_sequence(&self, song: SongId, track: usize) -> Option<SequenceId> {
        self.manager.lock().song_mut(song).sequence(track)
    }

    pub fn set_tempo(&self, song: SongId, bpm: u16, bar: u32, clock: u32) {
        let mut manager = self.manager.lock();
        manager.song_mut(song).timebase_mut().set_tempo(bpm, bar, clock);
        if song == manager.current_song() {
            let mut core = self.core.lock();
            core.timebase.mark_timebase_changed();
            if let Some(song) = manager.song(song) {
                core.timebase.reset_timebase_cursor(song.timebase());
            }
        }
    }

    pub fn get_tempo(&self, song: SongId, bar: u32, clock: u32) -> u16 {
        self.manager
            .lock()
            .song_mut(song)
            .timebase()
            .tempo_at(bar, clock)
    }

    pub fn set_timesig(&self, song: SongId, beats: u8, beat_type: u8, bar: u32) {
        let mut manager = self.manager.lock();
        manager
            .song_mut(song)
            .timebase_mut()
            .set_timesig(((beats as u16) << 8) | beat_type as u16, bar.max(1));
        if song == manager.current_song() {
            let mut core = self.core.lock();
            core.timebase.mark_timebase_changed();
            if let Some(song) = manager.song(song) {
                core.timebase.reset_timebase_cursor(song.timebase());
            }
        }
    }

    pub fn get_timesig(&self, song: SongId, bar: u32) -> u16 {
        self.manager.lock().song_mut(song).timebase().timesig_at(bar)
    }

    pub fn get_beats_per_bar(&self, song: SongId, bar: u32) -> u8 {
        (self.get_timesig(song, bar) >> 8) as u8
    }

    pub fn get_beat_type(&self, song: SongId, bar: u32) -> u8 {
        (self.get_timesig(song, bar) & 0xFF) as u8
    }

    pub fn clear_song(&self, song: SongId) {
        let mut manager = self.manager.lock();
        manager.clear_song(song);
        self.core.lock().timebase.set_song_length(0);
    }

    pub fn copy_song(&self, source: SongId, destination: SongId) {
        self.manager.lock().copy_song(source, destination);
    }

    pub fn select_song(&self, song: SongId) {
        let mut manager = self.manager.lock();
        let mut core = self.core.lock();
        Self::do_select_song(&mut manager, &mut core, song);
    }

    pub fn get_song(&self) -> SongId {
        self.manager.lock().current_song()
    }

    pub fn start_song(&self) {
        self.start_song_fast(false);
    }

    /// Start the song, immediately when `fast`, else on the next bar sync.
    pub fn start_song_fast(&self, fast: bool) {
        let mut manager = self.manager.lock();
        let mut core = self.core.lock();
        Self::do_start_song(&mut manager, &mut core, fast);
    }

    pub fn pause_song(&self) {
        let mut manager = self.manager.lock();
        let mut core = self.core.lock();
        Self::do_pause_song(&mut manager, &mut core);
    }

    pub fn stop_song(&self) {
        let mut manager = self.manager.lock();
        let mut core = self.core.lock();
        Self::do_stop_song(&mut manager, &mut core);
    }

    pub fn toggle_song(&self) {
        if self.is_song_playing() {
            self.pause_song();
        } else {
            self.start_song();
        }
    }

    pub fn is_song_playing(&self) -> bool {
        self.core.lock().timebase.song_status() == PlayState::Playing
    }

    pub fn set_song_position(&self, clocks: u32) {
        let mut manager = self.manager.lock();
        let mut core = self.core.lock();
        Self::do_set_song_position(&mut manager, &mut core, clocks);
    }

    pub fn get_song_position(&self) -> u32 {
        self.core.lock().timebase.song_position()
    }

    pub fn get_song_length(&self) -> u32 {
        self.core.lock().timebase.song_length()
    }

    /// Solo one track: every other track is unsoloed and stopped; the
    /// soloed track keeps playing if the song is.
    pub fn solo(&self, song: SongId, track: usize, solo: bool) {
        let playing = self.is_song_playing();
        let sequence = {
            let mut manager = self.manager.lock();
            manager.solo(song, track, solo);
            manager.song_mut(song).sequence(track)
        };
        if let Some(sequence) = sequence {
            if solo && playing {
                self.set_play_state(sequence, PlayState::Playing);
            }
        }
    }

    // ------------------------------------------------------------------
    // Transport surface
    // ------------------------------------------------------------------

    pub fn transport(&self) -> &Arc<TransportControl> {
        &self.transport
    }

    pub fn transport_start(&self) {
        self.transport.start();
    }

    pub fn transport_stop(&self) {
        self.transport.stop();
    }

    pub fn transport_toggle(&self) {
        self.transport.toggle();
    }

    pub fn transport_locate(&self, frame: u64) {
        self.transport.locate(frame);
    }

    pub fn transport_is_rolling(&self) -> bool {
        self.transport.state().is_rolling()
    }

    /// Reposition to beat 1 of the current bar.
    pub fn set_transport_to_start_of_bar(&self) {
        let bar = {
            let core = self.core.lock();
            let (bar, _, _) = core.timebase.bbt();
            bar
        };
        self.transport.locate_bbt(bar, 1, 0);
    }

    pub fn transport_set_tempo(&self, bpm: u16) {
        self.core.lock().timebase.set_tempo(bpm as f64);
    }

    pub fn transport_get_tempo(&self) -> u16 {
        self.core.lock().timebase.tempo() as u16
    }

    pub fn transport_request_timebase(&self) -> bool {
        self.transport.request_timebase()
    }

    pub fn transport_release_timebase(&self) {
        self.transport.release_timebase();
    }

    pub fn transport_set_sync_timeout(&self, timeout_ms: u32) {
        self.transport.set_sync_timeout(timeout_ms);
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Save the whole data model.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ProjectError> {
        let manager = self.manager.lock();
        project::save(path, &manager)
    }

    /// Load a data model, replacing the current one. A failed load leaves
    /// the previous state untouched.
    pub fn load<P: AsRef<Path>>(&self, path: P) -> Result<(), ProjectError> {
        let snapshot = project::load_snapshot(path)?;
        let mut manager = self.manager.lock();
        let mut core = self.core.lock();
        snapshot.apply(&mut manager);
        let song = manager.current_song();
        Self::do_select_song(&mut manager, &mut core, song);
        Ok(())
    }

    /// Direct read access for integration code that needs more than the
    /// control surface exposes.
    pub fn with_manager<R>(&self, f: impl FnOnce(&mut PatternManager) -> R) -> R {
        f(&mut self.manager.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_with_pattern() -> Arc<SequencerEngine> {
        let engine = Arc::new(SequencerEngine::new(44_100));
        engine.select_pattern(1);
        engine.add_note(0, 60, 100, 1.0);
        engine.add_note(4, 64, 90, 1.0);
        let track = engine.add_track(1);
        let sequence = engine.get_sequence(1, track).unwrap();
        assert!(engine.add_pattern(sequence, 0, 1, false));
        engine
    }

    fn run_periods(engine: &SequencerEngine, periods: usize, frames: u32) -> Vec<(u32, MidiMessage)> {
        let mut collected = Vec::new();
        let mut out = MidiOutputBuffer::new(256);
        for _ in 0..periods {
            out.clear();
            engine.run_cycle(frames, &[], &mut out);
            collected.extend_from_slice(out.events());
        }
        collected
    }

    #[test]
    fn test_engine_pattern_surface() {
        let engine = Arc::new(SequencerEngine::new(48_000));
        engine.select_pattern(7);
        assert!(engine.add_note(0, 60, 100, 1.0));
        assert_eq!(engine.get_note_velocity(0, 60), 100);
        assert_eq!(engine.get_note_start(0, 60), 0);
        assert_eq!(engine.get_note_start(3, 60), -1);
        assert_eq!(engine.get_steps(), 16);
        assert!(engine.is_pattern_modified());
        assert!(!engine.is_pattern_modified());
    }

    #[test]
    fn test_sequence_starts_and_emits() {
        let engine = engine_with_pattern();
        let sequence = engine.get_sequence(1, 0).unwrap();

        // Queued start while stopped rolls the transport from the bar start
        engine.set_play_state(sequence, PlayState::Starting);
        assert!(engine.transport_is_rolling());

        let events = run_periods(&engine, 8, 1024);
        assert!(!events.is_empty());
        // First event is the step-0 note on
        assert_eq!(events[0].1, MidiMessage::note_on(0, 60, 100));
        assert_eq!(engine.get_play_state(sequence), PlayState::Playing);
    }

    #[test]
    fn test_output_offsets_non_decreasing() {
        let engine = engine_with_pattern();
        let sequence = engine.get_sequence(1, 0).unwrap();
        engine.set_play_state(sequence, PlayState::Starting);

        let mut out = MidiOutputBuffer::new(256);
        for _ in 0..64 {
            out.clear();
            engine.run_cycle(256, &[], &mut out);
            let offsets: Vec<u32> = out.events().iter().map(|(offset, _)| *offset).collect();
            let mut sorted = offsets.clone();
            sorted.sort_unstable();
            assert_eq!(offsets, sorted);
        }
    }

    #[test]
    fn test_trigger_note_input_starts_transport() {
        let engine = engine_with_pattern();
        let sequence = engine.get_sequence(1, 0).unwrap();
        engine.set_trigger_channel(15);
        engine.set_trigger_note(sequence, 36);

        let trigger = MidiMessage::note_on(15, 36, 100);
        let mut out = MidiOutputBuffer::new(64);
        engine.run_cycle(256, &[trigger], &mut out);

        assert_eq!(engine.get_play_state(sequence), PlayState::Starting);
        assert!(engine.transport_is_rolling());
    }

    #[test]
    fn test_realtime_start_message_starts_song() {
        let engine = engine_with_pattern();
        let start = MidiMessage::realtime(MIDI_START);
        let mut out = MidiOutputBuffer::new(64);
        engine.run_cycle(256, &[start], &mut out);
        // Song queued; first sync pulse flips it to playing
        let sequence = engine.get_sequence(1, 0).unwrap();
        assert_ne!(engine.get_play_state(sequence), PlayState::Playing);
        assert_eq!(engine.get_play_state(sequence), PlayState::Starting);
    }

    #[test]
    fn test_song_position_message() {
        let engine = engine_with_pattern();
        let msg = MidiMessage::song_position(16); // 16 MIDI beats = 96 clocks
        let mut out = MidiOutputBuffer::new(64);
        engine.run_cycle(256, &[msg], &mut out);
        assert_eq!(engine.get_song_position(), 96);
    }

    #[test]
    fn test_auto_stop_when_nothing_plays() {
        let engine = Arc::new(SequencerEngine::new(44_100));
        engine.transport_start();
        // No sequences: the next bar boundary that closes a period walk
        // stops the transport (one 4/4 bar is ~88200 frames here)
        run_periods(&engine, 120, 1024);
        assert!(!engine.transport_is_rolling());
    }

    #[test]
    fn test_tempo_edit_marks_timebase() {
        let engine = engine_with_pattern();
        engine.set_tempo(1, 150, 1, 0);
        assert_eq!(engine.get_tempo(1, 1, 0), 150);
        run_periods(&engine, 1, 256);
        assert_eq!(engine.transport_get_tempo(), 150);
    }
}
