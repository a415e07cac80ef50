// Timebase - sparse map of tempo and time signature changes

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default tempo in BPM when no timebase event precedes a position.
pub const DEFAULT_TEMPO: u16 = 120;

/// Default time signature, packed `(beats << 8) | beat_type` = 4/4.
pub const DEFAULT_TIMESIG: u16 = (4 << 8) | 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TimebaseEventKind {
    Tempo,
    TimeSig,
}

/// One tempo or meter change, keyed by (bar, clock within bar).
///
/// `value` is BPM for Tempo events and `(beats << 8) | beat_type` for
/// TimeSig events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimebaseEvent {
    pub bar: u32,
    pub clock: u32,
    pub kind: TimebaseEventKind,
    pub value: u16,
}

/// Ordered set of timebase events. At most one event of each kind per
/// (bar, clock) key; setting again overwrites.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Timebase {
    events: BTreeMap<(u32, u32, TimebaseEventKind), u16>,
}

impl Timebase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the tempo from (bar, clock) onward. Bars are 1-based.
    pub fn set_tempo(&mut self, bpm: u16, bar: u32, clock: u32) {
        if bpm == 0 {
            return;
        }
        self.events
            .insert((bar.max(1), clock, TimebaseEventKind::Tempo), bpm);
    }

    /// Set the packed time signature from the start of `bar` onward.
    pub fn set_timesig(&mut self, value: u16, bar: u32) {
        if value >> 8 == 0 || value & 0xFF == 0 {
            return;
        }
        self.events
            .insert((bar.max(1), 0, TimebaseEventKind::TimeSig), value);
    }

    /// Tempo in effect at (bar, clock): the most recent preceding Tempo
    /// event, or the default.
    pub fn tempo_at(&self, bar: u32, clock: u32) -> u16 {
        self.events
            .range(..=(bar, clock, TimebaseEventKind::TimeSig))
            .rev()
            .find(|((_, _, kind), _)| *kind == TimebaseEventKind::Tempo)
            .map(|(_, value)| *value)
            .unwrap_or(DEFAULT_TEMPO)
    }

    /// Packed time signature in effect at `bar`.
    pub fn timesig_at(&self, bar: u32) -> u16 {
        self.events
            .range(..=(bar, u32::MAX, TimebaseEventKind::TimeSig))
            .rev()
            .find(|((_, _, kind), _)| *kind == TimebaseEventKind::TimeSig)
            .map(|(_, value)| *value)
            .unwrap_or(DEFAULT_TIMESIG)
    }

    pub fn first_event(&self) -> Option<TimebaseEvent> {
        self.events.iter().next().map(Self::to_event)
    }

    /// Next event strictly after `event` in (bar, clock, kind) order.
    pub fn next_event(&self, event: &TimebaseEvent) -> Option<TimebaseEvent> {
        use std::ops::Bound;
        self.events
            .range((
                Bound::Excluded((event.bar, event.clock, event.kind)),
                Bound::Unbounded,
            ))
            .next()
            .map(Self::to_event)
    }

    /// Most recent event at or before (bar, clock), optionally filtered by kind.
    pub fn previous_event(
        &self,
        bar: u32,
        clock: u32,
        kind: Option<TimebaseEventKind>,
    ) -> Option<TimebaseEvent> {
        self.events
            .range(..=(bar, clock, TimebaseEventKind::TimeSig))
            .rev()
            .find(|((_, _, k), _)| kind.map_or(true, |want| *k == want))
            .map(Self::to_event)
    }

    /// All events in (bar, clock) order.
    pub fn events(&self) -> impl Iterator<Item = TimebaseEvent> + '_ {
        self.events.iter().map(Self::to_event)
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    fn to_event(entry: (&(u32, u32, TimebaseEventKind), &u16)) -> TimebaseEvent {
        let ((bar, clock, kind), value) = entry;
        TimebaseEvent {
            bar: *bar,
            clock: *clock,
            kind: *kind,
            value: *value,
        }
    }
}

/// Beats per bar from a packed time signature.
pub fn timesig_beats(value: u16) -> u8 {
    (value >> 8) as u8
}

/// Beat type (denominator) from a packed time signature.
pub fn timesig_beat_type(value: u16) -> u8 {
    (value & 0xFF) as u8
}
