use crate::backend::BufferId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BufferState {
    /// Not yet filled, or refilled and awaiting submission.
    Free,
    /// Submitted to the device for playback. Never written in this state.
    Queued,
    /// Finished playing and detached from the device, awaiting refill.
    Processed,
}

/// The coordinator's view of the fixed buffer rotation. The device
/// owns the memory; this tracks which lifecycle state each buffer is
/// in so writes never race with playback.
pub(crate) struct BufferPool {
    entries: Vec<(BufferId, BufferState)>,
}

impl BufferPool {
    pub fn new(ids: Vec<BufferId>) -> Self {
        BufferPool {
            entries: ids.into_iter().map(|id| (id, BufferState::Free)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn ids(&self) -> Vec<BufferId> {
        self.entries.iter().map(|(id, _)| *id).collect()
    }

    pub fn queued_len(&self) -> usize {
        self.entries
            .iter()
            .filter(|(_, state)| *state == BufferState::Queued)
            .count()
    }

    pub fn state(&self, id: BufferId) -> Option<BufferState> {
        self.entries
            .iter()
            .find(|(entry_id, _)| *entry_id == id)
            .map(|(_, state)| *state)
    }

    pub fn is_writable(&self, id: BufferId) -> bool {
        self.state(id).is_some_and(|state| state != BufferState::Queued)
    }

    pub fn mark_queued(&mut self, id: BufferId) -> bool {
        self.set(id, BufferState::Queued)
    }

    pub fn mark_processed(&mut self, id: BufferId) -> bool {
        self.set(id, BufferState::Processed)
    }

    fn set(&mut self, id: BufferId, state: BufferState) -> bool {
        match self.entries.iter_mut().find(|(entry_id, _)| *entry_id == id) {
            Some(entry) => {
                entry.1 = state;
                true
            }
            None => false,
        }
    }
}
