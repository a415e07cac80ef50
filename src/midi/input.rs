// MIDI Input - host MIDI port feeding the realtime cycle

use crate::host::HostError;
use crate::messaging::channels::MidiInProducer;
use crate::midi::message::MidiMessage;
use midir::{Ignore, MidiInput as MidirInput, MidiInputConnection};

pub struct MidiInput {
    _connection: Option<MidiInputConnection<()>>,
}

impl MidiInput {
    /// Connect to the first available MIDI input port. Running without any
    /// port is not an error; the engine just sees no input.
    pub fn new(mut producer: MidiInProducer) -> Result<Self, HostError> {
        let mut midi_in = MidirInput::new("gridseq input")
            .map_err(|e| HostError::Midi(format!("failed to initialize MIDI input: {}", e)))?;
        midi_in.ignore(Ignore::SysexAndTime);

        let ports = midi_in.ports();
        if ports.is_empty() {
            println!("No MIDI input port detected, running without MIDI input");
            return Ok(Self { _connection: None });
        }

        let port = &ports[0];
        let port_name = midi_in
            .port_name(port)
            .unwrap_or_else(|_| "Unknown".to_string());

        let connection = midi_in
            .connect(
                port,
                "gridseq-input",
                move |_timestamp, bytes, _| {
                    // Callback MIDI - runs on the midir thread, try_push only
                    if let Some(msg) = MidiMessage::from_bytes(bytes) {
                        if ringbuf::traits::Producer::try_push(&mut producer, msg).is_err() {
                            eprintln!("Warning: MIDI input buffer full, event dropped");
                        }
                    }
                },
                (),
            )
            .map_err(|e| HostError::Midi(format!("failed to connect MIDI input: {}", e)))?;

        println!("MIDI input connected: {}", port_name);
        Ok(Self {
            _connection: Some(connection),
        })
    }
}
