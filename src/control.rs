use log::warn;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Shared control block of a running stream.
///
/// Speed and pause are advisory playback parameters: they are mutated
/// by external control calls and read by the coordinator on each
/// refill cycle with no stronger guarantee than eventual visibility.
/// The running flag is the cooperative shutdown signal, checked once
/// per loop iteration.
pub struct StreamController {
    paused: AtomicBool,
    speed_bits: AtomicU32,
    running: AtomicBool,
}

impl Default for StreamController {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamController {
    pub fn new() -> Self {
        StreamController {
            paused: AtomicBool::new(false),
            speed_bits: AtomicU32::new(1.0_f32.to_bits()),
            running: AtomicBool::new(true),
        }
    }

    /// Flips the pause flag and returns the new value. The flag is
    /// caller-observable only; the coordinator does not enforce it.
    pub fn toggle_paused(&self) -> bool {
        !self.paused.fetch_xor(true, Ordering::Relaxed)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    /// Sets the playback speed multiplier. Negative values are clamped
    /// to zero.
    pub fn set_speed(&self, speed: f32) {
        let speed = if speed < 0.0 {
            warn!("Negative playback speed {} clamped to 0", speed);
            0.0
        } else {
            speed
        };
        self.speed_bits.store(speed.to_bits(), Ordering::Relaxed);
    }

    pub fn speed(&self) -> f32 {
        f32::from_bits(self.speed_bits.load(Ordering::Relaxed))
    }

    /// Requests a cooperative stop of the playback loop.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}
