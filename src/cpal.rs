use crate::backend::{BackendError, BufferId, PlaybackBackend, PlaybackState, SourceId};
use crate::{Sample, SampleRate, SamplesCount};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_queue::ArrayQueue;
use log::{debug, info, warn};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const SOURCE: SourceId = 1;

/// Upper bound on a single ring push. The callback stops draining once
/// the source stops, so a chunk that does not fit into the remaining
/// capacity would otherwise wedge the submitter forever.
const SUBMIT_TIMEOUT: Duration = Duration::from_secs(2);

/// Headroom over the nominal pool size: slow playback speeds stretch a
/// chunk into more device-rate samples, and the ring must hold a full
/// pool's worth without blocking the submitter for long.
const RING_HEADROOM: usize = 4;

#[derive(Debug, Default)]
pub struct DeviceConfig {
    /// Output device to open; `None` selects the host default.
    pub device_name: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct Slot {
    /// Device-rate samples, already stepped for the playback rate.
    data: Vec<Sample>,
    queued: bool,
}

/// cpal-backed playback device that emulates the queued-buffer model
/// on top of cpal's pull callback.
///
/// `write` stores rate-converted samples in a slot; `submit` copies the
/// slot into a lock-free SPSC ring and registers the id with its sample
/// count. The output callback drains the ring, moves finished ids to
/// the processed queue and stops the source when it runs dry, which is
/// exactly the starvation surface the coordinator watches for.
///
/// Holds a `cpal::Stream`, so the device is not `Send`: it stays on the
/// thread that created it, which is also the thread driving the
/// playback loop.
pub struct Device {
    stream: cpal::Stream,
    stream_rate: SampleRate,

    producer: HeapProd<Sample>,
    in_flight: Arc<ArrayQueue<(BufferId, usize)>>,
    finished: Arc<ArrayQueue<BufferId>>,
    playing: Arc<AtomicBool>,
    processed: Arc<AtomicUsize>,

    slots: Vec<Slot>,
    queued: usize,
    source_created: bool,
    closed: bool,
}

impl Device {
    pub fn new(
        config: DeviceConfig,
        sample_rate: SampleRate,
        chunk_size: SamplesCount,
        buffer_count: usize,
    ) -> Result<Self, BackendError> {
        let host = cpal::default_host();
        let device = match &config.device_name {
            Some(name) => host
                .output_devices()
                .map_err(|e| BackendError::Stream(e.to_string()))?
                .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
                .ok_or(BackendError::DeviceUnavailable)?,
            None => host
                .default_output_device()
                .ok_or(BackendError::DeviceUnavailable)?,
        };

        let supported_configs = device
            .supported_output_configs()
            .map_err(|e| BackendError::Stream(e.to_string()))?;

        let mut selected_config: Option<cpal::StreamConfig> = None;
        for config in supported_configs {
            debug!(
                "Supported config: sample_format: {:?}, sample_rate: {}-{}, channels: {}",
                config.sample_format(),
                config.min_sample_rate().0,
                config.max_sample_rate().0,
                config.channels()
            );

            let sample_format_ok = config.sample_format() == cpal::SampleFormat::F32;
            let sample_rate_ok = config.min_sample_rate() <= cpal::SampleRate(sample_rate as u32)
                && cpal::SampleRate(sample_rate as u32) <= config.max_sample_rate();

            if sample_format_ok && sample_rate_ok {
                selected_config = Some(cpal::StreamConfig {
                    channels: config.channels(),
                    sample_rate: cpal::SampleRate(sample_rate as u32),
                    buffer_size: cpal::BufferSize::Default,
                });
                break;
            }
        }
        let stream_config =
            selected_config.ok_or(BackendError::UnsupportedConfig(sample_rate))?;
        let channels = stream_config.channels as usize;

        let ring = HeapRb::<Sample>::new(chunk_size * buffer_count * RING_HEADROOM);
        let (producer, mut consumer) = ring.split();

        let in_flight = Arc::new(ArrayQueue::<(BufferId, usize)>::new(buffer_count.max(1)));
        let finished = Arc::new(ArrayQueue::<BufferId>::new(buffer_count.max(1)));
        let playing = Arc::new(AtomicBool::new(false));
        let processed = Arc::new(AtomicUsize::new(0));

        let cb_in_flight = Arc::clone(&in_flight);
        let cb_finished = Arc::clone(&finished);
        let cb_playing = Arc::clone(&playing);
        let cb_processed = Arc::clone(&processed);
        // Which buffer the playhead is inside, and how many of its
        // samples remain in the ring.
        let mut current: Option<(BufferId, usize)> = None;

        let data_fn = move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            for frame in data.chunks_mut(channels) {
                let value = if !cb_playing.load(Ordering::Acquire) {
                    0.0
                } else {
                    let mut sample = None;
                    loop {
                        if current.is_none() {
                            current = cb_in_flight.pop();
                        }
                        let (id, remaining) = match current.as_mut() {
                            Some(entry) => entry,
                            None => break,
                        };
                        if *remaining == 0 {
                            // Finished the whole buffer; report it and
                            // move on to the next queued one.
                            let _ = cb_finished.push(*id);
                            cb_processed.fetch_add(1, Ordering::Release);
                            current = None;
                            continue;
                        }
                        if let Some(s) = consumer.try_pop() {
                            *remaining -= 1;
                            sample = Some(s);
                        }
                        break;
                    }

                    match sample {
                        Some(s) => s as f32 / Sample::MAX as f32,
                        None => {
                            // Ran dry: the device stops the source, as
                            // a hardware queue would.
                            cb_playing.store(false, Ordering::Release);
                            0.0
                        }
                    }
                };

                for out in frame.iter_mut() {
                    *out = value;
                }
            }
        };

        let err_fn = |err| warn!("Output stream error: {}", err);
        let stream = device
            .build_output_stream(&stream_config, data_fn, err_fn, None)
            .map_err(|e| BackendError::Stream(e.to_string()))?;
        stream
            .play()
            .map_err(|e| BackendError::Stream(e.to_string()))?;

        info!(
            "Opened output device: {} Hz, {} channels",
            sample_rate, channels
        );

        Ok(Device {
            stream,
            stream_rate: sample_rate,
            producer,
            in_flight,
            finished,
            playing,
            processed,
            slots: Vec::new(),
            queued: 0,
            source_created: false,
            closed: false,
        })
    }

    fn check_source(&self, source: SourceId) -> Result<(), BackendError> {
        if self.source_created && source == SOURCE {
            Ok(())
        } else {
            Err(BackendError::InvalidSource(source))
        }
    }

    /// Nearest-neighbor step through the chunk so that `rate` input
    /// samples cover one second of device output. This is how the
    /// speed multiplier reaches the device without a real resampler.
    fn convert_rate(&self, samples: &[Sample], rate: SampleRate) -> Vec<Sample> {
        if rate == 0 || samples.is_empty() {
            return Vec::new();
        }
        if rate == self.stream_rate {
            return samples.to_vec();
        }

        let out_len =
            ((samples.len() as f64 * self.stream_rate as f64) / rate as f64).round() as usize;
        let step = rate as f64 / self.stream_rate as f64;
        (0..out_len)
            .map(|i| {
                let index = ((i as f64 * step) as usize).min(samples.len() - 1);
                samples[index]
            })
            .collect()
    }
}

/// Pushes the whole slice into the ring, yielding while it is full.
/// Gives up once the deadline passes instead of waiting on a callback
/// that may never drain again.
fn push_with_deadline(
    producer: &mut HeapProd<Sample>,
    data: &[Sample],
    timeout: Duration,
) -> Result<(), BackendError> {
    let started = Instant::now();
    let mut offset = 0;
    while offset < data.len() {
        offset += producer.push_slice(&data[offset..]);
        if offset < data.len() {
            if started.elapsed() >= timeout {
                return Err(BackendError::Stream(format!(
                    "ring full, pushed {} of {} samples within {:?}",
                    offset,
                    data.len(),
                    timeout
                )));
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }
    Ok(())
}

impl PlaybackBackend for Device {
    fn create_buffers(&mut self, count: usize) -> Result<Vec<BufferId>, BackendError> {
        self.slots = vec![Slot::default(); count];
        Ok((0..count as BufferId).collect())
    }

    fn create_source(&mut self) -> Result<SourceId, BackendError> {
        self.source_created = true;
        Ok(SOURCE)
    }

    fn write(
        &mut self,
        buffer: BufferId,
        samples: &[Sample],
        rate: SampleRate,
    ) -> Result<(), BackendError> {
        let converted = self.convert_rate(samples, rate);
        let slot = self
            .slots
            .get_mut(buffer as usize)
            .ok_or(BackendError::InvalidBuffer(buffer))?;
        if slot.queued {
            return Err(BackendError::BufferBusy(buffer));
        }
        slot.data = converted;
        Ok(())
    }

    fn submit(&mut self, source: SourceId, buffers: &[BufferId]) -> Result<(), BackendError> {
        self.check_source(source)?;

        for &id in buffers {
            let slot = self
                .slots
                .get_mut(id as usize)
                .ok_or(BackendError::InvalidBuffer(id))?;
            if slot.queued {
                return Err(BackendError::BufferBusy(id));
            }
            slot.queued = true;
            let data = std::mem::take(&mut slot.data);

            push_with_deadline(&mut self.producer, &data, SUBMIT_TIMEOUT)?;

            self.in_flight
                .push((id, data.len()))
                .map_err(|_| BackendError::Stream("buffer queue overflow".into()))?;
            self.queued += 1;
        }

        Ok(())
    }

    fn dequeue_processed(&mut self, source: SourceId) -> Result<Vec<BufferId>, BackendError> {
        self.check_source(source)?;

        let mut detached = Vec::new();
        while let Some(id) = self.finished.pop() {
            self.processed.fetch_sub(1, Ordering::AcqRel);
            if let Some(slot) = self.slots.get_mut(id as usize) {
                slot.queued = false;
            }
            self.queued -= 1;
            detached.push(id);
        }
        Ok(detached)
    }

    fn state(&mut self, source: SourceId) -> Result<PlaybackState, BackendError> {
        self.check_source(source)?;
        Ok(if self.playing.load(Ordering::Acquire) {
            PlaybackState::Playing
        } else {
            PlaybackState::Stopped
        })
    }

    fn queued_count(&mut self, source: SourceId) -> Result<usize, BackendError> {
        self.check_source(source)?;
        Ok(self.queued)
    }

    fn processed_count(&mut self, source: SourceId) -> Result<usize, BackendError> {
        self.check_source(source)?;
        Ok(self.processed.load(Ordering::Acquire))
    }

    fn play(&mut self, source: SourceId) -> Result<(), BackendError> {
        self.check_source(source)?;
        self.playing.store(true, Ordering::Release);
        Ok(())
    }

    fn close(&mut self) -> Result<(), BackendError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.playing.store(false, Ordering::Release);
        self.stream
            .pause()
            .map_err(|e| BackendError::Stream(e.to_string()))?;
        info!("Closed output device");
        Ok(())
    }
}
