use crate::backend::BackendError;
use std::fmt::{Display, Formatter};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamCreationError {
    InvalidSampleRate(usize),
    InvalidChunkSize(usize),
    InvalidBufferCount(usize),
    ChunkerThreadSpawn(String),
    StatisticsThreadSpawn(String),
    Backend(BackendError),
}

impl Display for StreamCreationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamCreationError::InvalidSampleRate(rate) => {
                write!(f, "Invalid sample rate: {}", rate)
            }
            StreamCreationError::InvalidChunkSize(size) => {
                write!(f, "Invalid chunk size: {}", size)
            }
            StreamCreationError::InvalidBufferCount(count) => {
                write!(f, "Invalid buffer count: {}", count)
            }
            StreamCreationError::ChunkerThreadSpawn(err) => {
                write!(f, "Failed to spawn chunker thread: {}", err)
            }
            StreamCreationError::StatisticsThreadSpawn(err) => {
                write!(f, "Failed to spawn statistics thread: {}", err)
            }
            StreamCreationError::Backend(err) => {
                write!(f, "Device allocation failed: {}", err)
            }
        }
    }
}

impl std::error::Error for StreamCreationError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackError {
    Backend(BackendError),
    /// The device never reported a finished buffer within the
    /// configured stall timeout.
    StallTimeout(Duration),
    /// The device stopped playing but never drained its queue within
    /// the configured stall timeout.
    ResyncTimeout(Duration),
}

impl Display for PlaybackError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackError::Backend(err) => write!(f, "Device operation failed: {}", err),
            PlaybackError::StallTimeout(timeout) => {
                write!(f, "No buffer finished playing within {:?}", timeout)
            }
            PlaybackError::ResyncTimeout(timeout) => {
                write!(f, "Queued buffers did not drain within {:?}", timeout)
            }
        }
    }
}

impl std::error::Error for PlaybackError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamStopError {
    Backend(BackendError),
}

impl Display for StreamStopError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamStopError::Backend(err) => write!(f, "Failed to close device: {}", err),
        }
    }
}

impl std::error::Error for StreamStopError {}
