use std::sync::atomic::Ordering::Relaxed;
use std::sync::atomic::{AtomicU32, AtomicU64};
use std::time::SystemTime;

fn current_us() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

/// Counts events across threads and converts them into a smoothed
/// events-per-second figure on each `update` call.
pub struct TickProfiler {
    last_update_us: AtomicU64,
    ticks: AtomicU32,
    min_tps: AtomicU32,
    average_tps: AtomicU32,
    max_tps: AtomicU32,
    smooth_factor: f32,
}

impl Default for TickProfiler {
    fn default() -> Self {
        Self::new(0.5)
    }
}

impl TickProfiler {
    pub fn new(smooth_factor: f32) -> Self {
        Self {
            last_update_us: AtomicU64::new(current_us()),
            ticks: AtomicU32::new(0),
            min_tps: AtomicU32::new(f32::MAX.to_bits()),
            average_tps: AtomicU32::new(0.0_f32.to_bits()),
            max_tps: AtomicU32::new(0.0_f32.to_bits()),
            smooth_factor,
        }
    }

    pub fn tick(&self, amount: u32) {
        self.ticks.fetch_add(amount, Relaxed);
    }

    /// Folds the ticks accumulated since the previous update into the
    /// min/average/max rates. Meant to be called periodically from the
    /// statistics thread.
    pub fn update(&self) {
        let now = current_us();
        let last = self.last_update_us.swap(now, Relaxed);
        let elapsed_us = now.saturating_sub(last);
        if elapsed_us == 0 {
            return;
        }

        let ticks = self.ticks.swap(0, Relaxed);
        let tps = ticks as f32 * 1_000_000.0 / elapsed_us as f32;

        let mut min = f32::from_bits(self.min_tps.load(Relaxed));
        let mut average = f32::from_bits(self.average_tps.load(Relaxed));
        let mut max = f32::from_bits(self.max_tps.load(Relaxed));

        average = tps * self.smooth_factor + average * (1.0 - self.smooth_factor);
        if tps < min {
            min = tps;
        }
        if tps > max {
            max = tps;
        }

        self.min_tps.store(min.to_bits(), Relaxed);
        self.average_tps.store(average.to_bits(), Relaxed);
        self.max_tps.store(max.to_bits(), Relaxed);
    }

    pub fn get_stat(&self) -> (f32, f32, f32) {
        let min = f32::from_bits(self.min_tps.load(Relaxed));
        let average = f32::from_bits(self.average_tps.load(Relaxed));
        let max = f32::from_bits(self.max_tps.load(Relaxed));
        (if min == f32::MAX { 0.0 } else { min }, average, max)
    }
}

/// Measures the wall time of a repeated operation between `start` and
/// `end` calls, keeping a smoothed average alongside the extremes.
pub struct PeriodProfiler {
    start_us: AtomicU64,
    min_us: AtomicU64,
    current_us: AtomicU64,
    max_us: AtomicU64,
    smooth_factor: f32,
}

impl Default for PeriodProfiler {
    fn default() -> Self {
        Self::new(0.5)
    }
}

impl PeriodProfiler {
    pub fn new(smooth_factor: f32) -> Self {
        Self {
            start_us: AtomicU64::new(0),
            min_us: AtomicU64::new(u64::MAX),
            current_us: AtomicU64::new(0),
            max_us: AtomicU64::new(0),
            smooth_factor,
        }
    }

    pub fn start(&self) {
        self.start_us.store(current_us(), Relaxed);
    }

    pub fn end(&self) {
        let start_us = self.start_us.load(Relaxed);
        let elapsed_us = current_us().saturating_sub(start_us);

        let (mut min, mut current, mut max) = (
            self.min_us.load(Relaxed),
            self.current_us.load(Relaxed),
            self.max_us.load(Relaxed),
        );

        current = (elapsed_us as f32 * self.smooth_factor
            + current as f32 * (1.0 - self.smooth_factor)) as u64;

        if elapsed_us < min {
            min = elapsed_us;
        }
        if elapsed_us > max {
            max = elapsed_us;
        }

        self.min_us.store(min, Relaxed);
        self.current_us.store(current, Relaxed);
        self.max_us.store(max, Relaxed);
    }

    /* In milliseconds */
    pub fn get_stat(&self) -> (f32, f32, f32) {
        let min = self.min_us.load(Relaxed);
        let current = self.current_us.load(Relaxed);
        let max = self.max_us.load(Relaxed);

        (
            if min == u64::MAX {
                0.0
            } else {
                min as f32 / 1000.0
            },
            current as f32 / 1000.0,
            max as f32 / 1000.0,
        )
    }
}
