// StepEvent - one MIDI-like event on a pattern grid

use serde::{Deserialize, Serialize};

/// A single event in a pattern: a note, a continuous controller or a program
/// change, anchored to a step with a fractional duration in steps.
///
/// Start and end values allow ramped events (e.g. a CC sweep); for plain
/// events the end values equal the start values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepEvent {
    position: u32,
    command: u8,
    value1_start: u8,
    value1_end: u8,
    value2_start: u8,
    value2_end: u8,
    duration: f32,
}

impl StepEvent {
    /// Creates an event with end values defaulting to the start values.
    pub fn new(position: u32, command: u8, value1: u8, value2: u8, duration: f32) -> Self {
        Self {
            position,
            command,
            value1_start: value1,
            value1_end: value1,
            value2_start: value2,
            value2_end: value2,
            duration: duration.max(0.0),
        }
    }

    pub fn position(&self) -> u32 {
        self.position
    }

    pub fn command(&self) -> u8 {
        self.command
    }

    pub fn value1_start(&self) -> u8 {
        self.value1_start
    }

    pub fn value1_end(&self) -> u8 {
        self.value1_end
    }

    pub fn value2_start(&self) -> u8 {
        self.value2_start
    }

    pub fn value2_end(&self) -> u8 {
        self.value2_end
    }

    /// Duration in steps. May be fractional and spans `[position, position + duration)`.
    pub fn duration(&self) -> f32 {
        self.duration
    }

    pub fn set_position(&mut self, position: u32) {
        self.position = position;
    }

    pub fn set_value1_start(&mut self, value: u8) {
        self.value1_start = value;
    }

    pub fn set_value1_end(&mut self, value: u8) {
        self.value1_end = value;
    }

    pub fn set_value2_start(&mut self, value: u8) {
        self.value2_start = value;
    }

    pub fn set_value2_end(&mut self, value: u8) {
        self.value2_end = value;
    }

    pub fn set_duration(&mut self, duration: f32) {
        self.duration = duration.max(0.0);
    }

    /// End of the live range, in fractional steps.
    pub fn end(&self) -> f32 {
        self.position as f32 + self.duration
    }
}
