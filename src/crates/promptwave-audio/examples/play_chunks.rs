//! Example: stream a test tone through the scheduler in small chunks

use promptwave_audio::{
    decode_chunk, encode_chunk, CpalDevice, OutputDevice, PlaybackQueue, Scheduler, SAMPLE_RATE,
};
use std::thread;
use std::time::Duration;

/// Frames per chunk, roughly what a network generator delivers
const CHUNK_FRAMES: usize = 2205;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Chunked Playback Example");
    println!("========================\n");

    let device = CpalDevice::default_output();
    let mut sink = match device.open() {
        Ok(sink) => sink,
        Err(e) => {
            println!("Note: no audio output available");
            println!("Error: {}", e);
            return Ok(());
        }
    };
    sink.set_gain(0.5);

    let mut scheduler = Scheduler::new(PlaybackQueue::new());
    scheduler.set_active(true);

    println!(
        "Playing a 440 Hz tone in {} ms chunks...",
        CHUNK_FRAMES * 1000 / SAMPLE_RATE as usize
    );

    let mut phase = 0.0f64;
    for _ in 0..40 {
        let mut interleaved = Vec::with_capacity(CHUNK_FRAMES * 2);
        for _ in 0..CHUNK_FRAMES {
            let value = ((phase * std::f64::consts::TAU).sin() * 0.3 * i16::MAX as f64) as i16;
            interleaved.push(value);
            interleaved.push(value);
            phase = (phase + 440.0 / SAMPLE_RATE as f64).fract();
        }

        // Round-trip through the wire format, as a network chunk would arrive
        let block = decode_chunk(&encode_chunk(&interleaved))?;
        scheduler.enqueue(block);
        scheduler.schedule(sink.as_mut())?;

        thread::sleep(Duration::from_millis(40));
    }

    let remaining = scheduler.cursor() - sink.now();
    thread::sleep(Duration::from_secs_f64(remaining.max(0.0)));
    sink.close()?;
    println!("\nPlayback finished.");

    Ok(())
}
