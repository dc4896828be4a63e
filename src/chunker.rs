use crate::{Chunk, Sample, SamplesCount};
use log::debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::time::Duration;

/// How long the chunker blocks on the sample channel before
/// re-checking the stop signal.
const RECV_POLL: Duration = Duration::from_millis(100);

/// Collects single samples into fixed-size chunks.
/// Samples are kept in arrival order; a partial chunk stays in the
/// accumulator until enough samples arrive to complete it.
pub(crate) struct Chunker {
    chunk_size: SamplesCount,
    pending: Vec<Sample>,
}

impl Chunker {
    pub fn new(chunk_size: SamplesCount) -> Self {
        Chunker {
            chunk_size,
            pending: Vec::with_capacity(chunk_size),
        }
    }

    /// Appends one sample. Returns the completed chunk once exactly
    /// `chunk_size` samples have been collected.
    pub fn push(&mut self, sample: Sample) -> Option<Chunk> {
        self.pending.push(sample);
        if self.pending.len() == self.chunk_size {
            let full = std::mem::replace(&mut self.pending, Vec::with_capacity(self.chunk_size));
            Some(full)
        } else {
            None
        }
    }

    #[cfg(test)]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Thread body of the chunker. Blocks on the sample channel, forwards
/// completed chunks downstream and blocks there while the coordinator
/// has not consumed the previous chunk. Both blocking points are the
/// stream's only backpressure mechanism.
pub(crate) fn run_chunker(
    samples: Receiver<Sample>,
    chunks: SyncSender<Chunk>,
    chunk_size: SamplesCount,
    stop_signal: Arc<AtomicBool>,
) {
    let mut chunker = Chunker::new(chunk_size);

    loop {
        if stop_signal.load(Ordering::Relaxed) {
            debug!("Received stop signal");
            break;
        }

        let sample = match samples.recv_timeout(RECV_POLL) {
            Ok(sample) => sample,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Sample input disconnected, chunker stopping");
                break;
            }
        };

        if let Some(chunk) = chunker.push(sample) {
            if chunks.send(chunk).is_err() {
                debug!("Chunk consumer gone, chunker stopping");
                break;
            }
        }
    }
}
