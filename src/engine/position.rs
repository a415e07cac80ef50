// Transport position - the per-period record exchanged with the host

/// Host transport state as seen by the engine callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Stopped,
    Rolling,
}

impl TransportState {
    pub fn is_rolling(&self) -> bool {
        matches!(self, TransportState::Rolling)
    }
}

/// Position record describing the next cycle, filled in by the timebase
/// callback.
///
/// `frame` is the transport frame (samples since transport zero). When
/// `bbt_valid` is set on entry to the timebase callback the BBT fields are
/// authoritative and the frame is recomputed from them; otherwise BBT is
/// derived from the frame. Bars and beats are 1-based, ticks 0-based within
/// the beat.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransportPosition {
    pub frame: u64,
    pub bar: u32,
    pub beat: u32,
    pub tick: u32,
    pub bar_start_tick: f64,
    pub beats_per_bar: f32,
    pub beat_type: f32,
    pub ticks_per_beat: f64,
    pub beats_per_minute: f64,
    pub bbt_valid: bool,
}

impl TransportPosition {
    pub fn new() -> Self {
        Self::default()
    }

    /// A reposition request expressed in frames only; the timebase callback
    /// derives the BBT fields.
    pub fn at_frame(frame: u64) -> Self {
        Self {
            frame,
            bbt_valid: false,
            ..Self::default()
        }
    }

    /// A reposition request expressed in BBT; the timebase callback
    /// normalises overflows and computes the frame.
    pub fn at_bbt(bar: u32, beat: u32, tick: u32) -> Self {
        Self {
            bar,
            beat,
            tick,
            bbt_valid: true,
            ..Self::default()
        }
    }
}

impl Default for TransportPosition {
    fn default() -> Self {
        Self {
            frame: 0,
            bar: 1,
            beat: 1,
            tick: 0,
            bar_start_tick: 0.0,
            beats_per_bar: 4.0,
            beat_type: 4.0,
            ticks_per_beat: 1920.0,
            beats_per_minute: 120.0,
            bbt_valid: false,
        }
    }
}
