// MIDI wire types - status bytes and raw 3-byte messages

use serde::{Deserialize, Serialize};

/// Channel voice status bytes (channel nibble zero).
pub const MIDI_NOTE_ON: u8 = 0x90;
pub const MIDI_CONTROL: u8 = 0xB0;
pub const MIDI_PROGRAM: u8 = 0xC0;

/// System common / realtime status bytes.
pub const MIDI_POSITION: u8 = 0xF2;
pub const MIDI_SONG: u8 = 0xF3;
pub const MIDI_CLOCK: u8 = 0xF8;
pub const MIDI_START: u8 = 0xFA;
pub const MIDI_CONTINUE: u8 = 0xFB;
pub const MIDI_STOP: u8 = 0xFC;

/// A raw MIDI message as it sits in the schedule and in host buffers.
///
/// `command` carries the full status byte (channel included for voice
/// messages). Unused data bytes are zero. NOTE_ON with `value2 == 0` is a
/// note-off, as on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MidiMessage {
    pub command: u8,
    pub value1: u8,
    pub value2: u8,
}

impl MidiMessage {
    pub fn note_on(channel: u8, note: u8, velocity: u8) -> Self {
        Self {
            command: MIDI_NOTE_ON | (channel & 0x0F),
            value1: note,
            value2: velocity,
        }
    }

    /// Note-off is sent as NOTE_ON with velocity 0.
    pub fn note_off(channel: u8, note: u8) -> Self {
        Self::note_on(channel, note, 0)
    }

    pub fn control(channel: u8, controller: u8, value: u8) -> Self {
        Self {
            command: MIDI_CONTROL | (channel & 0x0F),
            value1: controller,
            value2: value,
        }
    }

    pub fn program(channel: u8, program: u8) -> Self {
        Self {
            command: MIDI_PROGRAM | (channel & 0x0F),
            value1: program,
            value2: 0,
        }
    }

    /// Single-byte realtime message (CLOCK, START, CONTINUE, STOP).
    pub fn realtime(status: u8) -> Self {
        Self {
            command: status,
            value1: 0,
            value2: 0,
        }
    }

    /// Song position pointer. `pos` is a 14-bit count of MIDI beats
    /// (sixteenth notes, 6 clocks each).
    pub fn song_position(pos: u16) -> Self {
        Self {
            command: MIDI_POSITION,
            value1: (pos & 0x7F) as u8,
            value2: ((pos >> 7) & 0x7F) as u8,
        }
    }

    pub fn song_select(song: u8) -> Self {
        Self {
            command: MIDI_SONG,
            value1: song & 0x7F,
            value2: 0,
        }
    }

    /// Status byte with the channel nibble masked off, for voice messages.
    pub fn status(&self) -> u8 {
        if self.command >= 0xF0 {
            self.command
        } else {
            self.command & 0xF0
        }
    }

    /// Channel of a voice message (meaningless for system messages).
    pub fn channel(&self) -> u8 {
        self.command & 0x0F
    }

    pub fn is_realtime(&self) -> bool {
        self.command >= 0xF8
    }

    /// Quantity of bytes this message occupies on the wire.
    pub fn len(&self) -> usize {
        match self.status() {
            MIDI_PROGRAM | MIDI_SONG => 2,
            s if s >= 0xF8 => 1,
            _ => 3,
        }
    }

    pub fn as_bytes(&self) -> [u8; 3] {
        [self.command, self.value1, self.value2]
    }

    /// Parse a raw MIDI message from host input bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.is_empty() {
            return None;
        }

        let status = bytes[0];
        if status < 0x80 {
            return None; // Running status not supported
        }

        match status {
            MIDI_CLOCK | MIDI_START | MIDI_CONTINUE | MIDI_STOP => {
                Some(Self::realtime(status))
            }
            MIDI_POSITION => {
                if bytes.len() >= 3 {
                    Some(Self {
                        command: status,
                        value1: bytes[1],
                        value2: bytes[2],
                    })
                } else {
                    None
                }
            }
            MIDI_SONG => {
                if bytes.len() >= 2 {
                    Some(Self {
                        command: status,
                        value1: bytes[1],
                        value2: 0,
                    })
                } else {
                    None
                }
            }
            _ => match status & 0xF0 {
                MIDI_PROGRAM => {
                    if bytes.len() >= 2 {
                        Some(Self {
                            command: status,
                            value1: bytes[1],
                            value2: 0,
                        })
                    } else {
                        None
                    }
                }
                MIDI_NOTE_ON | 0x80 | MIDI_CONTROL => {
                    if bytes.len() >= 3 {
                        Some(Self {
                            command: status,
                            value1: bytes[1],
                            value2: bytes[2],
                        })
                    } else {
                        None
                    }
                }
                _ => None,
            },
        }
    }
}
