// Transport engine - frame <-> BBT mapping and the per-period clock walk
//
// Owns the musical-time cursor (bar, beat, tick, clock) and everything
// derived from the current song's timebase. Invoked once per period from the
// host timebase callback, before the process callback.

use crate::engine::position::{TransportPosition, TransportState};
use crate::engine::scheduler::EventQueue;
use crate::sequencer::manager::PatternManager;
use crate::sequencer::sequence::PlayState;
use crate::sequencer::timebase::{
    timesig_beat_type, timesig_beats, Timebase, TimebaseEvent, TimebaseEventKind, DEFAULT_TEMPO,
    DEFAULT_TIMESIG,
};
use log::debug;

/// Tick resolution of the musical timeline.
pub const TICKS_PER_BEAT: f64 = 1920.0;

/// Ticks per MIDI clock (24 clocks per beat).
pub const TICKS_PER_CLOCK: f64 = TICKS_PER_BEAT / 24.0;

/// The timebase core: coordinate math between audio frames and musical time,
/// and the per-period walk that turns clock pulses into scheduled events.
#[derive(Debug)]
pub struct TransportEngine {
    sample_rate: u32,
    tempo: f64,
    beats_per_bar: f32,
    beat_type: f32,
    frames_per_clock: f64,
    timebase_changed: bool,
    bar: u32,
    beat: u32,
    /// Tick within the current bar.
    tick: u32,
    /// MIDI clock within the current beat, 0..23.
    clock: u8,
    bar_start_tick: f64,
    /// Frames from the start of the next period to the next clock pulse.
    frames_to_next_clock: f64,
    transport_start_frame: u64,
    song_status: PlayState,
    song_position: u32,
    song_length: u32,
    next_timebase_event: Option<TimebaseEvent>,
    playing: bool,
}

impl TransportEngine {
    pub fn new(sample_rate: u32) -> Self {
        let mut engine = Self {
            sample_rate,
            tempo: DEFAULT_TEMPO as f64,
            beats_per_bar: timesig_beats(DEFAULT_TIMESIG) as f32,
            beat_type: timesig_beat_type(DEFAULT_TIMESIG) as f32,
            frames_per_clock: 0.0,
            timebase_changed: false,
            bar: 1,
            beat: 1,
            tick: 0,
            clock: 0,
            bar_start_tick: 0.0,
            frames_to_next_clock: 0.0,
            transport_start_frame: 0,
            song_status: PlayState::Stopped,
            song_position: 0,
            song_length: 0,
            next_timebase_event: None,
            playing: false,
        };
        engine.frames_per_clock = engine.frames_per_clock_for(engine.tempo);
        engine
    }

    /// Frames in one tick at the given tempo.
    pub fn frames_per_tick(&self, bpm: f64) -> f64 {
        60.0 * self.sample_rate as f64 / (bpm * TICKS_PER_BEAT)
    }

    /// Frames in one MIDI clock at the given tempo.
    pub fn frames_per_clock_for(&self, bpm: f64) -> f64 {
        self.frames_per_tick(bpm) * TICKS_PER_CLOCK
    }

    pub fn frames_per_clock(&self) -> f64 {
        self.frames_per_clock
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
        self.frames_per_clock = self.frames_per_clock_for(self.tempo);
    }

    pub fn tempo(&self) -> f64 {
        self.tempo
    }

    /// Override the running tempo until the next timebase event.
    pub fn set_tempo(&mut self, bpm: f64) {
        if bpm <= 0.0 {
            return;
        }
        self.tempo = bpm;
        self.frames_per_clock = self.frames_per_clock_for(bpm);
        self.timebase_changed = true;
    }

    /// Flag that the timebase must be re-read before the next walk.
    pub fn mark_timebase_changed(&mut self) {
        self.timebase_changed = true;
    }

    /// Point the event cursor at the start of `timebase`.
    pub fn reset_timebase_cursor(&mut self, timebase: &Timebase) {
        self.next_timebase_event = timebase.first_event();
    }

    pub fn song_status(&self) -> PlayState {
        self.song_status
    }

    pub fn set_song_status(&mut self, status: PlayState) {
        self.song_status = status;
    }

    pub fn song_position(&self) -> u32 {
        self.song_position
    }

    pub fn set_song_position(&mut self, clocks: u32) {
        self.song_position = clocks;
    }

    pub fn song_length(&self) -> u32 {
        self.song_length
    }

    pub fn set_song_length(&mut self, clocks: u32) {
        self.song_length = clocks;
    }

    pub fn bbt(&self) -> (u32, u32, u32) {
        (self.bar, self.beat, self.tick % TICKS_PER_BEAT as u32)
    }

    pub fn clock_in_beat(&self) -> u8 {
        self.clock
    }

    /// Frames from the start of the next period to the next clock pulse.
    pub fn frames_to_next_clock(&self) -> f64 {
        self.frames_to_next_clock
    }

    /// Whether the last clock walk found anything playing.
    pub fn is_playing(&self) -> bool {
        self.playing
    }

    fn current_timebase<'a>(manager: &'a PatternManager) -> Option<&'a Timebase> {
        manager.song(manager.current_song()).map(|song| song.timebase())
    }

    /// Convert 1-based (bar, beat) plus ticks to a transport frame by
    /// walking the timebase sections. The defaults apply before the first
    /// event.
    pub fn location_of(&self, bar: u32, beat: u32, tick: u32, timebase: &Timebase) -> u64 {
        let bar0 = bar.saturating_sub(1);
        let target_tick_in_bar = beat.saturating_sub(1) as f64 * TICKS_PER_BEAT + tick as f64;

        let mut frames = 0.0f64;
        let mut fpt = self.frames_per_tick(DEFAULT_TEMPO as f64);
        let mut bpb = timesig_beats(DEFAULT_TIMESIG) as f64;
        let mut cur_bar0 = 0u32;
        let mut cur_tick_in_bar = 0.0f64;

        for ev in timebase.events() {
            let ev_bar0 = ev.bar.saturating_sub(1);
            let ev_tick_in_bar = ev.clock as f64 * TICKS_PER_CLOCK;
            if ev_bar0 > bar0 || (ev_bar0 == bar0 && ev_tick_in_bar > target_tick_in_bar) {
                break; // Events beyond the requested position do not matter
            }
            let ticks_per_bar = TICKS_PER_BEAT * bpb;
            let ticks_in_section = (ev_bar0 - cur_bar0) as f64 * ticks_per_bar + ev_tick_in_bar
                - cur_tick_in_bar;
            frames += fpt * ticks_in_section.max(0.0);
            cur_bar0 = ev_bar0;
            cur_tick_in_bar = ev_tick_in_bar;
            match ev.kind {
                TimebaseEventKind::Tempo => fpt = self.frames_per_tick(ev.value as f64),
                TimebaseEventKind::TimeSig => bpb = timesig_beats(ev.value) as f64,
            }
        }

        let ticks_per_bar = TICKS_PER_BEAT * bpb;
        let remaining =
            (bar0 - cur_bar0) as f64 * ticks_per_bar + target_tick_in_bar - cur_tick_in_bar;
        frames += fpt * remaining.max(0.0);
        frames as u64
    }

    /// Derive BBT from `position.frame` by walking the timebase as sections
    /// between events, then resolving the remainder inside the last section.
    pub fn update_bbt(&mut self, position: &mut TransportPosition, timebase: &Timebase) {
        let target = position.frame as f64;

        let mut frames = 0.0f64;
        let mut ticks_from_start = 0.0f64;
        let mut tempo = DEFAULT_TEMPO as f64;
        let mut fpt = self.frames_per_tick(tempo);
        let mut bpb = timesig_beats(DEFAULT_TIMESIG) as f64;
        let mut beat_type = timesig_beat_type(DEFAULT_TIMESIG) as f64;
        let mut cur_bar0 = 0u32;
        let mut cur_tick_in_bar = 0.0f64;

        for ev in timebase.events() {
            let ev_bar0 = ev.bar.saturating_sub(1);
            let ev_tick_in_bar = ev.clock as f64 * TICKS_PER_CLOCK;
            let ticks_per_bar = TICKS_PER_BEAT * bpb;
            let ticks_in_section = ((ev_bar0 - cur_bar0) as f64 * ticks_per_bar + ev_tick_in_bar
                - cur_tick_in_bar)
                .max(0.0);
            let frames_in_section = ticks_in_section * fpt;
            if frames + frames_in_section > target {
                break;
            }
            frames += frames_in_section;
            ticks_from_start += ticks_in_section;
            cur_bar0 = ev_bar0;
            cur_tick_in_bar = ev_tick_in_bar;
            match ev.kind {
                TimebaseEventKind::Tempo => {
                    tempo = ev.value as f64;
                    fpt = self.frames_per_tick(tempo);
                }
                TimebaseEventKind::TimeSig => {
                    bpb = timesig_beats(ev.value) as f64;
                    beat_type = timesig_beat_type(ev.value) as f64;
                }
            }
        }

        let ticks_per_bar = TICKS_PER_BEAT * bpb;
        // Round to the tick so a floor-truncated frame maps back cleanly
        let remaining_ticks = ((target - frames) / fpt).round();
        let total_tick_in_bar = cur_tick_in_bar + remaining_ticks;
        let bars_in_section = (total_tick_in_bar / ticks_per_bar) as u32;
        let tick_in_last_bar = total_tick_in_bar % ticks_per_bar;
        ticks_from_start += remaining_ticks;

        position.bar = cur_bar0 + bars_in_section + 1;
        position.beat = (tick_in_last_bar / TICKS_PER_BEAT) as u32 + 1;
        position.tick = (tick_in_last_bar % TICKS_PER_BEAT) as u32;
        position.bar_start_tick = ticks_from_start - tick_in_last_bar;
        position.beats_per_bar = bpb as f32;
        position.beat_type = beat_type as f32;
        position.ticks_per_beat = TICKS_PER_BEAT;
        position.beats_per_minute = tempo;

        self.tempo = tempo;
        self.frames_per_clock = self.frames_per_clock_for(tempo);
        self.beats_per_bar = bpb as f32;
        self.beat_type = beat_type as f32;
        self.bar = position.bar;
        self.beat = position.beat;
        self.tick = (position.beat - 1) * TICKS_PER_BEAT as u32 + position.tick;
        self.bar_start_tick = position.bar_start_tick;
        self.clock = (position.tick as f64 / TICKS_PER_CLOCK) as u8;
        self.frames_to_next_clock = 0.0;
    }

    /// The host timebase callback. Runs once per period, before the process
    /// callback, possibly with the transport stopped.
    ///
    /// `position` describes the next cycle; with `update` set (or after a
    /// timebase change) it is recomputed — from its BBT fields when
    /// `bbt_valid`, from its frame otherwise. While the transport rolls, the
    /// clock pulses falling inside this period are walked in musical order
    /// and handed to the pattern manager, which schedules events into
    /// `queue`.
    ///
    /// Returns true when the engine wants the transport auto-stopped
    /// (bar boundary reached with nothing playing).
    #[allow(clippy::too_many_arguments)]
    pub fn timebase_callback(
        &mut self,
        state: TransportState,
        frames_in_period: u32,
        position: &mut TransportPosition,
        update: bool,
        now: u64,
        manager: &mut PatternManager,
        queue: &mut EventQueue,
    ) -> bool {
        let mut remaining = frames_in_period as f64;

        // Apply timebase events that the cursor has reached
        while let Some(ev) = self.next_timebase_event {
            if ev.bar > self.bar {
                break;
            }
            match ev.kind {
                TimebaseEventKind::Tempo => {
                    self.tempo = ev.value as f64;
                    self.frames_per_clock = self.frames_per_clock_for(self.tempo);
                    position.beats_per_minute = self.tempo;
                    self.timebase_changed = true;
                    debug!(
                        "tempo change to {} bpm, frames/clock {:.3}",
                        ev.value, self.frames_per_clock
                    );
                }
                TimebaseEventKind::TimeSig => {
                    self.beats_per_bar = timesig_beats(ev.value) as f32;
                    self.beat_type = timesig_beat_type(ev.value) as f32;
                    position.beats_per_bar = self.beats_per_bar;
                    self.timebase_changed = true;
                    debug!(
                        "time signature change to {}/{}",
                        self.beats_per_bar, self.beat_type
                    );
                }
            }
            self.next_timebase_event =
                Self::current_timebase(manager).and_then(|tb| tb.next_event(&ev));
        }

        if update || self.timebase_changed {
            if let Some(timebase) = Self::current_timebase(manager) {
                let clock_in_bar = self.beat.saturating_sub(1) * 24 + self.clock as u32;
                self.tempo = timebase.tempo_at(self.bar, clock_in_bar) as f64;
                let sig = timebase.timesig_at(self.bar);
                self.beats_per_bar = timesig_beats(sig) as f32;
                self.beat_type = timesig_beat_type(sig) as f32;
                self.frames_per_clock = self.frames_per_clock_for(self.tempo);
            }

            if position.bbt_valid {
                // BBT is authoritative: normalise overflows, derive the frame
                position.beat += position.tick / TICKS_PER_BEAT as u32;
                position.tick %= TICKS_PER_BEAT as u32;
                let bpb = (self.beats_per_bar.max(1.0)) as u32;
                position.bar += (position.beat - 1) / bpb;
                position.beat = (position.beat - 1) % bpb + 1;
                position.frame = match Self::current_timebase(manager) {
                    Some(timebase) => {
                        self.location_of(position.bar, position.beat, position.tick, timebase)
                    }
                    None => {
                        let empty = Timebase::new();
                        self.location_of(position.bar, position.beat, position.tick, &empty)
                    }
                };
                position.ticks_per_beat = TICKS_PER_BEAT;
                position.beats_per_minute = self.tempo;
                position.beats_per_bar = self.beats_per_bar;
                position.beat_type = self.beat_type;
                self.bar = position.bar;
                self.beat = position.beat;
                self.tick = (position.beat - 1) * TICKS_PER_BEAT as u32 + position.tick;
                self.clock = (position.tick as f64 / TICKS_PER_CLOCK) as u8;
                self.frames_to_next_clock = 0.0;
            } else {
                match Self::current_timebase(manager) {
                    Some(timebase) => self.update_bbt(position, timebase),
                    None => self.update_bbt(position, &Timebase::new()),
                }
            }
            self.transport_start_frame = now + position.frame;
            position.bbt_valid = true;
            self.timebase_changed = false;
            debug!(
                "repositioned to bar {} beat {} tick {} frame {}",
                position.bar, position.beat, position.tick, position.frame
            );
        } else {
            // Re-emit the values computed at the end of the previous period
            position.bar = self.bar;
            position.beat = self.beat;
            position.tick = self.tick % TICKS_PER_BEAT as u32;
            position.bar_start_tick = self.bar_start_tick;
            position.beats_per_bar = self.beats_per_bar;
            position.beat_type = self.beat_type;
            position.ticks_per_beat = TICKS_PER_BEAT;
            position.beats_per_minute = self.tempo;
            position.bbt_valid = true;
        }

        let mut auto_stop = false;
        if state.is_rolling() {
            let mut sync = false;
            while self.frames_to_next_clock < remaining {
                sync = false;
                let clock_pos = self.frames_to_next_clock as u64
                    + position.frame
                    + self.transport_start_frame
                    + frames_in_period as u64;
                if self.clock == 0 {
                    // Beat boundary; beat 1 is the bar sync pulse
                    sync = self.beat == 1;
                    self.tick = TICKS_PER_BEAT as u32 * (self.beat - 1);
                    if self.song_status == PlayState::Playing {
                        self.song_position += 1;
                        if self.song_position > self.song_length {
                            self.song_status = PlayState::Stopped;
                        }
                    }
                    if sync && self.song_status == PlayState::Starting {
                        self.song_status = PlayState::Playing; // Song starts on the bar
                    }
                }
                self.playing = manager.clock(clock_pos, queue, sync, self.frames_per_clock);
                remaining -= self.frames_to_next_clock;
                self.frames_to_next_clock = self.frames_per_clock;
                self.clock += 1;
                if self.clock > 23 {
                    self.clock = 0;
                    self.beat += 1;
                    if self.beat as f32 > self.beats_per_bar {
                        self.beat = 1;
                        if self.song_status == PlayState::Playing {
                            self.bar += 1;
                        }
                    }
                }
            }
            // Align the next period and track the partial clock as ticks.
            // The upcoming clock is at `clock * ticks_per_clock`; we sit
            // `frames_to_next_clock` short of it.
            self.frames_to_next_clock -= remaining;
            let ticks_to_next_clock =
                self.frames_to_next_clock / self.frames_per_tick(self.tempo);
            let tick_in_beat =
                (self.clock as f64 * TICKS_PER_CLOCK - ticks_to_next_clock).max(0.0);
            self.tick = (self.beat - 1) * TICKS_PER_BEAT as u32 + tick_in_beat as u32;

            if sync && !self.playing {
                debug!("nothing playing at bar boundary, requesting transport stop");
                auto_stop = true;
            }
        }
        auto_stop
    }
}
