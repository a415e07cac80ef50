// Host driver - cpal stream driving the engine cycle, midir output

use crate::engine::SequencerEngine;
use crate::host::HostError;
use crate::messaging::channels::{create_midi_in_channel, MidiInConsumer};
use crate::midi::input::MidiInput;
use crate::midi::message::MidiMessage;
use crate::midi::output::MidiOutputBuffer;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use midir::{MidiOutput as MidirOutput, MidiOutputConnection};
use std::sync::Arc;

/// Capacity of the per-period output buffer and of the input ring.
const MIDI_BUFFER_CAPACITY: usize = 256;

/// Runs the engine against the default audio device and MIDI ports.
///
/// The audio stream only provides the period clock and the sample-accurate
/// timeline; its buffer is silenced. MIDI output goes to the first available
/// midir port, input comes from the first input port through the lock-free
/// channel.
pub struct HostDriver {
    engine: Arc<SequencerEngine>,
    _stream: cpal::Stream,
    _midi_input: Option<MidiInput>,
}

impl HostDriver {
    /// Open the default output device, create the engine at the device rate
    /// and start the realtime cycle.
    pub fn start() -> Result<Self, HostError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(HostError::NoAudioDevice)?;
        let config = device
            .default_output_config()
            .map_err(|e| HostError::Stream(format!("no output config: {}", e)))?;

        let sample_rate = config.sample_rate().0;
        let channels = config.channels() as usize;
        let config: StreamConfig = config.into();

        println!(
            "Device audio: {} @ {} Hz",
            device.name().unwrap_or_else(|_| "Unknown".to_string()),
            sample_rate
        );

        let engine = Arc::new(SequencerEngine::new(sample_rate));

        // Entrée MIDI -> ringbuffer (non-bloquant côté callback)
        let (producer, consumer) = create_midi_in_channel(MIDI_BUFFER_CAPACITY);
        let midi_input = match MidiInput::new(producer) {
            Ok(input) => Some(input),
            Err(e) => {
                eprintln!("{} - continuing without MIDI input", e);
                None
            }
        };

        let midi_output = Self::connect_output();
        let stream = Self::build_stream(
            &device,
            &config,
            channels,
            Arc::clone(&engine),
            consumer,
            midi_output,
        )?;
        stream
            .play()
            .map_err(|e| HostError::Stream(format!("failed to start stream: {}", e)))?;

        Ok(Self {
            engine,
            _stream: stream,
            _midi_input: midi_input,
        })
    }

    pub fn engine(&self) -> &Arc<SequencerEngine> {
        &self.engine
    }

    fn connect_output() -> Option<MidiOutputConnection> {
        let midi_out = match MidirOutput::new("gridseq output") {
            Ok(out) => out,
            Err(e) => {
                eprintln!("Failed to initialize MIDI output: {}", e);
                return None;
            }
        };
        let ports = midi_out.ports();
        let port = match ports.first() {
            Some(port) => port,
            None => {
                println!("No MIDI output port detected, running without MIDI output");
                return None;
            }
        };
        let name = midi_out
            .port_name(port)
            .unwrap_or_else(|_| "Unknown".to_string());
        match midi_out.connect(port, "gridseq-output") {
            Ok(connection) => {
                println!("MIDI output connected: {}", name);
                Some(connection)
            }
            Err(e) => {
                eprintln!("Failed to connect MIDI output: {}", e);
                None
            }
        }
    }

    fn build_stream(
        device: &cpal::Device,
        config: &StreamConfig,
        channels: usize,
        engine: Arc<SequencerEngine>,
        mut consumer: MidiInConsumer,
        mut midi_output: Option<MidiOutputConnection>,
    ) -> Result<cpal::Stream, HostError> {
        // Pre-allocated buffers, reused every period
        let mut input_buf: Vec<MidiMessage> = Vec::with_capacity(MIDI_BUFFER_CAPACITY);
        let mut out_buf = MidiOutputBuffer::new(MIDI_BUFFER_CAPACITY);

        let stream = device
            .build_output_stream(
                config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    // ========== SACRED ZONE ==========
                    // No allocations, no I/O, no blocking locks

                    // We only use the stream as a period clock
                    for sample in data.iter_mut() {
                        *sample = 0.0;
                    }
                    let frames = (data.len() / channels) as u32;

                    input_buf.clear();
                    while input_buf.len() < input_buf.capacity() {
                        match ringbuf::traits::Consumer::try_pop(&mut consumer) {
                            Some(msg) => input_buf.push(msg),
                            None => break,
                        }
                    }

                    out_buf.clear();
                    engine.run_cycle(frames, &input_buf, &mut out_buf);

                    // Events leave already ordered by offset; midir delivers
                    // them back to back at period start
                    if let Some(connection) = midi_output.as_mut() {
                        for (_, msg) in out_buf.events() {
                            let bytes = msg.as_bytes();
                            let _ = connection.send(&bytes[..msg.len()]);
                        }
                    }
                },
                |err| eprintln!("Audio stream error: {}", err),
                None,
            )
            .map_err(|e| HostError::Stream(format!("failed to build stream: {}", e)))?;
        Ok(stream)
    }
}
