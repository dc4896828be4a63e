use crate::{Sample, SampleRate};
use std::fmt::{Display, Formatter};

#[cfg(feature = "cpal")]
pub mod backend_impl {
    pub type BackendSpecificConfig = crate::cpal::DeviceConfig;
    pub type AudioBackend = crate::cpal::Device;
}

#[cfg(feature = "cpal")]
pub use backend_impl::*;

/// Opaque handle of a device-owned buffer. Each buffer holds exactly
/// one chunk's worth of samples once filled.
pub type BufferId = u32;

/// Opaque handle of the device's logical output channel that buffers
/// are queued against.
pub type SourceId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Playing,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    DeviceUnavailable,
    UnsupportedConfig(SampleRate),
    InvalidBuffer(BufferId),
    InvalidSource(SourceId),
    BufferBusy(BufferId),
    Stream(String),
}

impl Display for BackendError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::DeviceUnavailable => {
                write!(f, "No usable output device")
            }
            BackendError::UnsupportedConfig(rate) => {
                write!(f, "Stream parameters not supported: sample_rate: {}", rate)
            }
            BackendError::InvalidBuffer(id) => write!(f, "Unknown buffer id: {}", id),
            BackendError::InvalidSource(id) => write!(f, "Unknown source id: {}", id),
            BackendError::BufferBusy(id) => {
                write!(f, "Buffer {} is queued for playback and cannot be written", id)
            }
            BackendError::Stream(err) => write!(f, "Stream error: {}", err),
        }
    }
}

impl std::error::Error for BackendError {}

/// Narrow interface over the native playback backend. The coordinator
/// is the only caller; it owns the buffer rotation and expects every
/// operation to report failure before the next dependent call is made.
pub trait PlaybackBackend {
    /// Allocates the fixed pool of device buffers, returning their ids
    /// in rotation order.
    fn create_buffers(&mut self, count: usize) -> Result<Vec<BufferId>, BackendError>;

    fn create_source(&mut self) -> Result<SourceId, BackendError>;

    /// Writes one chunk into a buffer. `rate` is the playback rate of
    /// the data (the stream sample rate scaled by the speed multiplier).
    /// Writing a buffer that is still queued must be rejected.
    fn write(
        &mut self,
        buffer: BufferId,
        samples: &[Sample],
        rate: SampleRate,
    ) -> Result<(), BackendError>;

    /// Appends buffers to the source's playback queue in order.
    fn submit(&mut self, source: SourceId, buffers: &[BufferId]) -> Result<(), BackendError>;

    /// Detaches every buffer the device has finished playing, in the
    /// order they were submitted.
    fn dequeue_processed(&mut self, source: SourceId) -> Result<Vec<BufferId>, BackendError>;

    fn state(&mut self, source: SourceId) -> Result<PlaybackState, BackendError>;

    /// Number of buffers submitted and not yet dequeued (finished
    /// buffers stay counted until `dequeue_processed` detaches them).
    fn queued_count(&mut self, source: SourceId) -> Result<usize, BackendError>;

    /// Number of queued buffers the device has finished playing.
    fn processed_count(&mut self, source: SourceId) -> Result<usize, BackendError>;

    fn play(&mut self, source: SourceId) -> Result<(), BackendError>;

    fn close(&mut self) -> Result<(), BackendError>;
}
