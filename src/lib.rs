pub mod backend;
mod chunker;
pub mod control;
mod coordinator;
#[cfg(feature = "cpal")]
pub mod cpal;
pub mod error;
pub mod manager;
#[cfg(test)]
mod mock;
mod pool;
pub mod profile;

pub type SamplesCount = usize;
pub type SampleRate = usize;

/// Hardcoded sample type of the data fed into the stream.
/// The device may convert it internally, but the producer-facing
/// format is always signed 16-bit mono.
pub type Sample = i16;

/// A completed group of samples sized to exactly one device buffer.
/// Chunks are assembled by the chunker and consumed by the playback
/// coordinator; once emitted they are never modified.
pub type Chunk = Vec<Sample>;
