//! Scripted in-memory backend used by the coordinator and manager
//! tests. Models the device's queued/processed bookkeeping and rejects
//! writes to buffers that are still queued.

use crate::backend::{BackendError, BufferId, PlaybackBackend, PlaybackState, SourceId};
use crate::{Sample, SampleRate};
use std::collections::VecDeque;

const SOURCE: SourceId = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Op {
    Write(BufferId),
    Submit(BufferId),
    Dequeue(Vec<BufferId>),
    Play,
    Close,
}

#[derive(Debug, Clone, Default)]
struct Slot {
    queued: bool,
    processed: bool,
}

pub(crate) struct MockBackend {
    slots: Vec<Slot>,
    /// Submission order, including finished buffers until dequeued.
    queue: VecDeque<BufferId>,
    playing: bool,
    source_created: bool,
    polls: usize,
    writes: usize,

    /// Finish the oldest unfinished queued buffer on every
    /// processed-count poll while playing.
    pub auto_process: bool,
    /// After this many polls, finish every queued buffer at once and
    /// stop the source (a starvation stop). One-shot.
    pub stop_after_polls: Option<usize>,
    /// Never report any progress.
    pub frozen: bool,
    /// Fail every write after this many successful ones.
    pub fail_write_after: Option<usize>,

    pub ops: Vec<Op>,
    /// Every chunk accepted by `write`, in order.
    pub written: Vec<Vec<Sample>>,
    pub rates: Vec<SampleRate>,
}

impl MockBackend {
    pub fn new() -> Self {
        MockBackend {
            slots: Vec::new(),
            queue: VecDeque::new(),
            playing: false,
            source_created: false,
            polls: 0,
            writes: 0,
            auto_process: false,
            stop_after_polls: None,
            frozen: false,
            fail_write_after: None,
            ops: Vec::new(),
            written: Vec::new(),
            rates: Vec::new(),
        }
    }

    fn check_source(&self, source: SourceId) -> Result<(), BackendError> {
        if self.source_created && source == SOURCE {
            Ok(())
        } else {
            Err(BackendError::InvalidSource(source))
        }
    }

    fn slot_mut(&mut self, id: BufferId) -> Result<&mut Slot, BackendError> {
        self.slots
            .get_mut(id as usize)
            .ok_or(BackendError::InvalidBuffer(id))
    }

    fn processed_total(&self) -> usize {
        self.queue
            .iter()
            .filter(|id| self.slots[**id as usize].processed)
            .count()
    }
}

impl PlaybackBackend for MockBackend {
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
        if let Some(limit) = self.fail_write_after {
            if self.writes >= limit {
                return Err(BackendError::Stream("simulated write failure".into()));
            }
        }
        let slot = self.slot_mut(buffer)?;
        if slot.queued {
            return Err(BackendError::BufferBusy(buffer));
        }
        self.writes += 1;
        self.ops.push(Op::Write(buffer));
        self.written.push(samples.to_vec());
        self.rates.push(rate);
        Ok(())
    }

    fn submit(&mut self, source: SourceId, buffers: &[BufferId]) -> Result<(), BackendError> {
        self.check_source(source)?;
        for &id in buffers {
            let slot = self.slot_mut(id)?;
            if slot.queued {
                return Err(BackendError::BufferBusy(id));
            }
            slot.queued = true;
            slot.processed = false;
            self.queue.push_back(id);
            self.ops.push(Op::Submit(id));
        }
        Ok(())
    }

    fn dequeue_processed(&mut self, source: SourceId) -> Result<Vec<BufferId>, BackendError> {
        self.check_source(source)?;
        let mut detached = Vec::new();
        while let Some(&front) = self.queue.front() {
            if !self.slots[front as usize].processed {
                break;
            }
            self.queue.pop_front();
            let slot = &mut self.slots[front as usize];
            slot.queued = false;
            slot.processed = false;
            detached.push(front);
        }
        if !detached.is_empty() {
            self.ops.push(Op::Dequeue(detached.clone()));
        }
        Ok(detached)
    }

    fn state(&mut self, source: SourceId) -> Result<PlaybackState, BackendError> {
        self.check_source(source)?;
        Ok(if self.playing {
            PlaybackState::Playing
        } else {
            PlaybackState::Stopped
        })
    }

    fn queued_count(&mut self, source: SourceId) -> Result<usize, BackendError> {
        self.check_source(source)?;
        Ok(self.queue.len())
    }

    fn processed_count(&mut self, source: SourceId) -> Result<usize, BackendError> {
        self.check_source(source)?;
        if self.frozen {
            return Ok(0);
        }

        self.polls += 1;

        if let Some(at) = self.stop_after_polls {
            if self.polls >= at {
                for &id in &self.queue {
                    self.slots[id as usize].processed = true;
                }
                self.playing = false;
                self.stop_after_polls = None;
                self.auto_process = true;
                return Ok(self.processed_total());
            }
        }

        if self.auto_process && self.playing {
            if let Some(&id) = self
                .queue
                .iter()
                .find(|id| !self.slots[**id as usize].processed)
            {
                self.slots[id as usize].processed = true;
            }
        }

        Ok(self.processed_total())
    }

    fn play(&mut self, source: SourceId) -> Result<(), BackendError> {
        self.check_source(source)?;
        self.playing = true;
        self.ops.push(Op::Play);
        Ok(())
    }

    fn close(&mut self) -> Result<(), BackendError> {
        self.playing = false;
        self.ops.push(Op::Close);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_write_while_queued() {
        let mut backend = MockBackend::new();
        let ids = backend.create_buffers(2).unwrap();
        let source = backend.create_source().unwrap();

        backend.write(ids[0], &[1, 2], 44100).unwrap();
        backend.submit(source, &[ids[0]]).unwrap();

        assert_eq!(
            backend.write(ids[0], &[3, 4], 44100),
            Err(BackendError::BufferBusy(ids[0]))
        );
    }

    #[test]
    fn dequeue_respects_submission_order() {
        let mut backend = MockBackend::new();
        let ids = backend.create_buffers(2).unwrap();
        let source = backend.create_source().unwrap();
        backend.auto_process = true;

        backend.submit(source, &ids).unwrap();
        backend.play(source).unwrap();

        // One buffer finishes per poll, oldest first.
        assert_eq!(backend.processed_count(source).unwrap(), 1);
        assert_eq!(backend.dequeue_processed(source).unwrap(), vec![ids[0]]);
        assert_eq!(backend.queued_count(source).unwrap(), 1);

        assert_eq!(backend.processed_count(source).unwrap(), 1);
        assert_eq!(backend.dequeue_processed(source).unwrap(), vec![ids[1]]);
        assert_eq!(backend.queued_count(source).unwrap(), 0);
    }

    #[test]
    fn unknown_handles_are_rejected() {
        let mut backend = MockBackend::new();
        backend.create_buffers(1).unwrap();

        assert_eq!(
            backend.write(9, &[0], 44100),
            Err(BackendError::InvalidBuffer(9))
        );
        assert_eq!(backend.play(7), Err(BackendError::InvalidSource(7)));
    }
}
