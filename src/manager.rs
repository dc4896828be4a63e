use crate::backend::{BufferId, PlaybackBackend, SourceId};
use crate::chunker::run_chunker;
use crate::control::StreamController;
use crate::coordinator::Coordinator;
use crate::error::{PlaybackError, StreamCreationError, StreamStopError};
use crate::pool::BufferPool;
use crate::profile::{PeriodProfiler, TickProfiler};
use crate::{Chunk, Sample, SampleRate, SamplesCount};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::{Builder, JoinHandle};
use std::time::Duration;

const CHUNKER_THREAD_NAME: &str = "aud_chunk";
const STATISTICS_THREAD_NAME: &str = "aud_stats";

pub struct StreamConfig {
    /// Sample rate of the produced audio, in samples per second.
    pub sample_rate: SampleRate,
    /// Device buffer granularity: every chunk and every device buffer
    /// holds exactly this many samples.
    pub chunk_size: SamplesCount,
    /// Size of the rotating device buffer pool. Two is the minimum
    /// that lets one buffer play while the other refills.
    pub buffer_count: usize,
    /// Sleep between device polls while waiting for a buffer to finish.
    pub poll_interval: Duration,
    /// Upper bound on any device wait; expiry surfaces a playback error.
    pub stall_timeout: Duration,
    /// Shared control block (pause, speed, stop).
    pub controller: Arc<StreamController>,
    /// Optional handler that receives a statistics frame once a second.
    pub profiler_handler: Option<fn(&ProfileFrame)>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        StreamConfig {
            sample_rate: 44100,
            // 1/25 s of audio per buffer.
            chunk_size: 44100 / 25,
            buffer_count: 2,
            poll_interval: Duration::from_micros(500),
            stall_timeout: Duration::from_secs(2),
            controller: Arc::new(StreamController::new()),
            profiler_handler: None,
        }
    }
}

pub(crate) struct StreamProfilers {
    // Chunks consumed by the coordinator
    pub chunk_tps: TickProfiler,
    // Buffer refill-and-resubmit operations
    pub refill_tps: TickProfiler,
    // Time spent polling for a finished buffer
    pub poll_time: PeriodProfiler,
    pub resyncs: AtomicU64,
}

impl Default for StreamProfilers {
    fn default() -> Self {
        StreamProfilers {
            chunk_tps: TickProfiler::new(1.0),
            refill_tps: TickProfiler::new(1.0),
            poll_time: PeriodProfiler::new(0.2),
            resyncs: AtomicU64::new(0),
        }
    }
}

pub struct ProfileFrame {
    // Chunks consumed per second
    pub chunk_tps_min: f32,
    pub chunk_tps_av: f32,
    pub chunk_tps_max: f32,

    // Buffer refills per second
    pub refill_tps_min: f32,
    pub refill_tps_av: f32,
    pub refill_tps_max: f32,

    // Time spent waiting for the device to free a buffer (in milliseconds)
    pub poll_min: f32,
    pub poll_av: f32,
    pub poll_max: f32,

    // Total starvation recoveries since the stream started
    pub resyncs: u64,

    // Stream parameters
    pub sample_rate: SampleRate,
    pub chunk_size: SamplesCount,
    pub buffer_count: usize,
}

/// Owning facade of one playback stream: the device backend, the
/// chunker thread feeding it and the coordinator loop draining it.
///
/// The producer pushes single samples into the handle returned by
/// `with_backend`; `run` drives the playback loop on the calling
/// thread until the controller stops it or the producer hangs up.
pub struct AudioStream<B: PlaybackBackend> {
    pub(crate) backend: B,
    source: SourceId,
    buffers: Vec<BufferId>,

    // Handed to the chunker thread on start()
    samples_rx: Option<Receiver<Sample>>,
    chunks_tx: Option<SyncSender<Chunk>>,
    // Handed to the coordinator on run()
    chunks_rx: Option<Receiver<Chunk>>,

    controller: Arc<StreamController>,
    stop_signal: Arc<AtomicBool>,
    profilers: Arc<StreamProfilers>,
    profiler_handler: Option<fn(&ProfileFrame)>,

    sample_rate: SampleRate,
    chunk_size: SamplesCount,
    buffer_count: usize,
    poll_interval: Duration,
    stall_timeout: Duration,

    chunker_thread: Option<JoinHandle<()>>,
    statistics_thread: Option<JoinHandle<()>>,
    closed: bool,
}

impl<B: PlaybackBackend> Drop for AudioStream<B> {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Failed to stop audio stream: {}", e);
        }
    }
}

impl<B: PlaybackBackend> AudioStream<B> {
    /// Allocates the buffer pool and source on the given backend and
    /// wires the two bounded handoff channels. Returns the stream and
    /// the producer-side sample sender; the stream shuts down cleanly
    /// when every sender handle is dropped.
    pub fn with_backend(
        mut backend: B,
        config: StreamConfig,
    ) -> Result<(Self, SyncSender<Sample>), StreamCreationError> {
        if config.sample_rate == 0 {
            return Err(StreamCreationError::InvalidSampleRate(config.sample_rate));
        }
        if config.chunk_size == 0 {
            return Err(StreamCreationError::InvalidChunkSize(config.chunk_size));
        }
        if config.buffer_count == 0 {
            return Err(StreamCreationError::InvalidBufferCount(config.buffer_count));
        }

        let buffers = backend
            .create_buffers(config.buffer_count)
            .map_err(StreamCreationError::Backend)?;
        let source = backend
            .create_source()
            .map_err(StreamCreationError::Backend)?;

        // Source -> chunker: one chunk's worth of single samples.
        let (samples_tx, samples_rx) = sync_channel(config.chunk_size);
        // Chunker -> coordinator: one chunk per pool buffer.
        let (chunks_tx, chunks_rx) = sync_channel(config.buffer_count);

        Ok((
            AudioStream {
                backend,
                source,
                buffers,
                samples_rx: Some(samples_rx),
                chunks_tx: Some(chunks_tx),
                chunks_rx: Some(chunks_rx),
                controller: Arc::clone(&config.controller),
                stop_signal: Arc::new(AtomicBool::new(false)),
                profilers: Arc::new(StreamProfilers::default()),
                profiler_handler: config.profiler_handler,
                sample_rate: config.sample_rate,
                chunk_size: config.chunk_size,
                buffer_count: config.buffer_count,
                poll_interval: config.poll_interval,
                stall_timeout: config.stall_timeout,
                chunker_thread: None,
                statistics_thread: None,
                closed: false,
            },
            samples_tx,
        ))
    }

    pub fn controller(&self) -> Arc<StreamController> {
        Arc::clone(&self.controller)
    }

    /// Wall-clock duration of one buffer at the current speed.
    pub fn buffer_duration(&self) -> Duration {
        let speed = self.controller.speed().max(f32::EPSILON);
        Duration::from_secs_f32(self.chunk_size as f32 / (self.sample_rate as f32 * speed))
    }

    /// Spawns the chunker thread and, if a profiler handler is
    /// configured, the statistics thread.
    pub fn start(&mut self) -> Result<(), StreamCreationError> {
        self.spawn_chunker_thread()?;
        self.spawn_statistics_thread()?;
        Ok(())
    }

    fn spawn_chunker_thread(&mut self) -> Result<(), StreamCreationError> {
        let samples_rx = match self.samples_rx.take() {
            Some(rx) => rx,
            None => {
                warn!("Chunker thread already started");
                return Ok(());
            }
        };
        let chunks_tx = match self.chunks_tx.take() {
            Some(tx) => tx,
            None => return Ok(()),
        };

        let chunk_size = self.chunk_size;
        let stop_signal = Arc::clone(&self.stop_signal);
        self.chunker_thread = Some(
            Builder::new()
                .name(CHUNKER_THREAD_NAME.into())
                .spawn(move || run_chunker(samples_rx, chunks_tx, chunk_size, stop_signal))
                .map_err(|e| StreamCreationError::ChunkerThreadSpawn(e.to_string()))?,
        );

        Ok(())
    }

    fn spawn_statistics_thread(&mut self) -> Result<(), StreamCreationError> {
        let handler = match self.profiler_handler {
            Some(handler) => handler,
            None => {
                debug!("Profiler handler is not set, statistics thread will not be spawned");
                return Ok(());
            }
        };

        let profilers = Arc::clone(&self.profilers);
        let stop_signal = Arc::clone(&self.stop_signal);
        let sample_rate = self.sample_rate;
        let chunk_size = self.chunk_size;
        let buffer_count = self.buffer_count;

        self.statistics_thread = Some(
            Builder::new()
                .name(STATISTICS_THREAD_NAME.into())
                .spawn(move || {
                    loop {
                        // Check if the stop signal is set
                        if stop_signal.load(Ordering::Relaxed) {
                            debug!("Received stop signal");
                            break;
                        }

                        profilers.chunk_tps.update();
                        profilers.refill_tps.update();

                        let (chunk_tps_min, chunk_tps_av, chunk_tps_max) =
                            profilers.chunk_tps.get_stat();
                        let (refill_tps_min, refill_tps_av, refill_tps_max) =
                            profilers.refill_tps.get_stat();
                        let (poll_min, poll_av, poll_max) = profilers.poll_time.get_stat();

                        let frame = ProfileFrame {
                            chunk_tps_min,
                            chunk_tps_av,
                            chunk_tps_max,
                            refill_tps_min,
                            refill_tps_av,
                            refill_tps_max,
                            poll_min,
                            poll_av,
                            poll_max,
                            resyncs: profilers.resyncs.load(Ordering::Relaxed),
                            sample_rate,
                            chunk_size,
                            buffer_count,
                        };

                        handler(&frame);

                        // Sleep for a short duration to avoid busy-waiting
                        std::thread::sleep(Duration::from_millis(1000));
                    }
                })
                .map_err(|e| StreamCreationError::StatisticsThreadSpawn(e.to_string()))?,
        );

        Ok(())
    }

    /// Runs the playback loop on the calling thread. Returns when the
    /// controller stops the stream, the producer hangs up, or a device
    /// error makes the session unrecoverable.
    pub fn run(&mut self) -> Result<(), PlaybackError> {
        let chunks_rx = match self.chunks_rx.take() {
            Some(rx) => rx,
            None => {
                warn!("Playback loop already ran");
                return Ok(());
            }
        };

        info!(
            "Starting playback loop: {} Hz, {} samples/chunk, {} buffers",
            self.sample_rate, self.chunk_size, self.buffer_count
        );

        let mut coordinator = Coordinator::new(
            &mut self.backend,
            self.source,
            BufferPool::new(self.buffers.clone()),
            chunks_rx,
            Arc::clone(&self.controller),
            Arc::clone(&self.profilers),
            self.sample_rate,
            self.poll_interval,
            self.stall_timeout,
        );

        let result = coordinator.run();
        if let Err(ref e) = result {
            error!("Playback loop failed: {}", e);
        }
        result
    }

    /// Stops the worker threads and closes the device. Called by Drop;
    /// safe to call more than once.
    pub fn stop(&mut self) -> Result<(), StreamStopError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        info!("Closing audio stream");

        self.controller.stop();
        self.stop_signal.store(true, Ordering::Relaxed);
        // Unblock a chunker stuck on a full chunk channel.
        drop(self.chunks_rx.take());

        if let Some(thread) = self.chunker_thread.take() {
            if let Err(e) = thread.join() {
                warn!("Failed to join chunker thread: {:?}", e);
            }
        }
        if let Some(thread) = self.statistics_thread.take() {
            if let Err(e) = thread.join() {
                warn!("Failed to join statistics thread: {:?}", e);
            }
        }

        self.backend.close().map_err(StreamStopError::Backend)?;
        Ok(())
    }
}

#[cfg(feature = "cpal")]
impl AudioStream<crate::backend::AudioBackend> {
    /// Opens the default cpal-backed device for the given configuration.
    pub fn new(
        backend_config: crate::backend::BackendSpecificConfig,
        config: StreamConfig,
    ) -> Result<(Self, SyncSender<Sample>), StreamCreationError> {
        let backend = crate::backend::AudioBackend::new(
            backend_config,
            config.sample_rate,
            config.chunk_size,
            config.buffer_count,
        )
        .map_err(StreamCreationError::Backend)?;
        Self::with_backend(backend, config)
    }
}
