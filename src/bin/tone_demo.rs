//! Plays a sine tone through the default output device, exercising the
//! whole pipeline: generator thread -> chunker -> playback loop.

use ansi_term::Color::{Blue, Cyan, Green, Red, Yellow};
use audiopump::control::StreamController;
use audiopump::manager::{AudioStream, ProfileFrame, StreamConfig};
use audiopump::Sample;
use log::{info, Level, LevelFilter, Log, Metadata, Record};
use std::sync::Arc;
use std::time::Duration;

const SAMPLE_RATE: usize = 44100;
const TONE_HZ: f32 = 440.0;
const AMPLITUDE: f32 = 0.3;
const PLAY_FOR: Duration = Duration::from_secs(10);

struct DemoLogger;

impl Log for DemoLogger {
    fn enabled(&self, _: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            fn colored_level(level: Level) -> ansi_term::Colour {
                match level {
                    Level::Error => Red,
                    Level::Warn => Yellow,
                    Level::Info => Green,
                    Level::Debug => Blue,
                    Level::Trace => Cyan,
                }
            }

            println!(
                "[{:>9}][{:>14}]: {} [{}:{}]",
                Yellow
                    .paint(std::thread::current().name().unwrap_or("main"))
                    .to_string(),
                colored_level(record.level())
                    .paint(record.level().to_string())
                    .to_string(),
                record.args(),
                Green.paint(record.file().unwrap_or("unknown")),
                Green.paint(record.line().unwrap_or(0).to_string())
            );
        }
    }

    fn flush(&self) {}
}

static LOGGER: DemoLogger = DemoLogger;

fn profiler_handler(frame: &ProfileFrame) {
    info!(
        "chunks: {:.1}/{:.1}/{:.1} tps, refills: {:.1}/{:.1}/{:.1} tps, \
         poll: {:.2}/{:.2}/{:.2} ms, resyncs: {}",
        frame.chunk_tps_min,
        frame.chunk_tps_av,
        frame.chunk_tps_max,
        frame.refill_tps_min,
        frame.refill_tps_av,
        frame.refill_tps_max,
        frame.poll_min,
        frame.poll_av,
        frame.poll_max,
        frame.resyncs
    );
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(LevelFilter::Debug);

    let controller = Arc::new(StreamController::new());
    let config = StreamConfig {
        sample_rate: SAMPLE_RATE,
        controller: Arc::clone(&controller),
        profiler_handler: Some(profiler_handler),
        ..Default::default()
    };

    let (mut stream, samples) = AudioStream::new(Default::default(), config)?;
    info!(
        "Buffer duration: {:.2} ms",
        stream.buffer_duration().as_secs_f32() * 1000.0
    );

    let generator = std::thread::Builder::new()
        .name("aud_tone".to_string())
        .spawn(move || {
            let step = TONE_HZ * std::f32::consts::TAU / SAMPLE_RATE as f32;
            let mut phase = 0.0_f32;
            loop {
                let value = (phase.sin() * AMPLITUDE * Sample::MAX as f32) as Sample;
                phase = (phase + step) % std::f32::consts::TAU;
                // The stream owns the other end; a failed send means it
                // was stopped and the generator is done.
                if samples.send(value).is_err() {
                    break;
                }
            }
        })?;

    let timer_controller = Arc::clone(&controller);
    std::thread::Builder::new()
        .name("aud_timer".to_string())
        .spawn(move || {
            std::thread::sleep(PLAY_FOR);
            info!("Demo time is up, stopping the stream");
            timer_controller.stop();
        })?;

    stream.start()?;
    stream.run()?;

    stream.stop()?;
    generator
        .join()
        .map_err(|_| "tone generator thread panicked")?;
    Ok(())
}
