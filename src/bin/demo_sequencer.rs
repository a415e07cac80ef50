// Quick demonstration of the sequencer engine, no audio device required
// Run with: cargo run --bin demo_sequencer

use gridseq::midi::MidiOutputBuffer;
use gridseq::sequencer::PlayState;
use gridseq::SequencerEngine;
use std::sync::Arc;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("🥁 gridseq - Step Sequencer Engine Demo");
    println!("=======================================");

    let sample_rate = 44_100;
    let engine = Arc::new(SequencerEngine::new(sample_rate));

    // Program a one-bar pattern: four on-the-floor kicks plus an off-beat hat
    engine.select_pattern(1);
    for step in [0u32, 4, 8, 12] {
        engine.add_note(step, 36, 110, 1.0);
    }
    for step in [2u32, 6, 10, 14] {
        engine.add_note(step, 42, 70, 0.5);
    }

    println!("✅ Programmed pattern 1:");
    println!("   - Steps: {}", engine.get_steps());
    println!("   - Steps per beat: {}", engine.get_steps_per_beat());
    println!("   - Kick velocity at step 0: {}", engine.get_note_velocity(0, 36));

    // Put it on a track of song 1 and start
    let track = engine.add_track(1);
    let sequence = engine.get_sequence(1, track).expect("track just added");
    engine.add_pattern(sequence, 0, 1, false);
    engine.set_channel(sequence, 9); // GM drums
    engine.set_play_state(sequence, PlayState::Starting);

    println!("\n▶ Transport rolling at {} bpm", engine.transport_get_tempo());

    // Drive the host cycle by hand: 2 seconds of 256-frame periods
    let frames = 256u32;
    let periods = 2 * sample_rate / frames;
    let mut out = MidiOutputBuffer::new(128);
    let mut total = 0usize;

    for period in 0..periods {
        out.clear();
        engine.run_cycle(frames, &[], &mut out);
        for (offset, msg) in out.events() {
            let frame = period as u64 * frames as u64 + *offset as u64;
            println!(
                "   frame {:>7} (+{:>3}) -> {:02X} {:3} {:3}",
                frame, offset, msg.command, msg.value1, msg.value2
            );
            total += 1;
        }
    }

    println!("\n📊 {} MIDI events over {} periods", total, periods);

    // Round-trip the project for good measure
    let path = std::env::temp_dir().join("gridseq_demo.ron");
    engine.save(&path)?;
    println!("💾 Saved project to {}", path.display());
    engine.load(&path)?;
    println!("📂 Reloaded, pattern still has {} steps", engine.get_steps());
    std::fs::remove_file(&path).ok();

    Ok(())
}
