use crate::backend::{PlaybackBackend, PlaybackState, SourceId};
use crate::control::StreamController;
use crate::error::PlaybackError;
use crate::manager::StreamProfilers;
use crate::pool::BufferPool;
use crate::{Chunk, SampleRate};
use log::{debug, info, warn};
use std::sync::atomic::Ordering;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How long the coordinator blocks on the chunk channel before
/// re-checking the stop flag.
const RECV_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CoordinatorState {
    /// Initial fill of every buffer before playback starts.
    Priming,
    /// Steady-state rotation: one buffer plays while another refills.
    Playing,
    /// The device exhausted its queue and stopped the source.
    Starved,
    /// Waiting for every queued buffer to finish so the rotation
    /// restarts aligned at the first buffer.
    Resyncing,
    Closed,
}

/// The playback loop. Pulls completed chunks, waits for the device to
/// free a buffer, refills it and hands it back, recovering from device
/// starvation by draining the whole queue before resuming.
pub(crate) struct Coordinator<'a, B: PlaybackBackend> {
    backend: &'a mut B,
    source: SourceId,
    pool: BufferPool,
    chunks: Receiver<Chunk>,
    controller: Arc<StreamController>,
    profilers: Arc<StreamProfilers>,
    sample_rate: SampleRate,
    poll_interval: Duration,
    stall_timeout: Duration,
    state: CoordinatorState,
}

impl<'a, B: PlaybackBackend> Coordinator<'a, B> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        backend: &'a mut B,
        source: SourceId,
        pool: BufferPool,
        chunks: Receiver<Chunk>,
        controller: Arc<StreamController>,
        profilers: Arc<StreamProfilers>,
        sample_rate: SampleRate,
        poll_interval: Duration,
        stall_timeout: Duration,
    ) -> Self {
        Coordinator {
            backend,
            source,
            pool,
            chunks,
            controller,
            profilers,
            sample_rate,
            poll_interval,
            stall_timeout,
            state: CoordinatorState::Priming,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    pub fn run(&mut self) -> Result<(), PlaybackError> {
        match self.prime() {
            Ok(true) => {}
            Ok(false) => {
                // Stopped or ran out of chunks before playback started.
                self.state = CoordinatorState::Closed;
                return Ok(());
            }
            Err(e) => {
                self.controller.stop();
                self.state = CoordinatorState::Closed;
                return Err(e);
            }
        }

        while self.controller.is_running() {
            let chunk = match self.recv_chunk() {
                Some(chunk) => chunk,
                None => break,
            };

            if let Err(e) = self.turn(chunk) {
                self.controller.stop();
                self.state = CoordinatorState::Closed;
                return Err(e);
            }

            if self.state == CoordinatorState::Closed {
                break;
            }
        }

        self.state = CoordinatorState::Closed;
        info!("Playback loop finished");
        Ok(())
    }

    /// Fills every buffer in the pool, queues them all at once and
    /// starts playback. Returns false if the stream stopped before the
    /// pool could be filled.
    fn prime(&mut self) -> Result<bool, PlaybackError> {
        let ids = self.pool.ids();
        debug!("Priming {} buffers", self.pool.len());

        for &id in &ids {
            let chunk = match self.recv_chunk() {
                Some(chunk) => chunk,
                None => return Ok(false),
            };
            let rate = self.effective_rate();
            self.backend
                .write(id, &chunk, rate)
                .map_err(PlaybackError::Backend)?;
        }

        self.backend
            .submit(self.source, &ids)
            .map_err(PlaybackError::Backend)?;
        for &id in &ids {
            self.pool.mark_queued(id);
        }

        self.backend.play(self.source).map_err(PlaybackError::Backend)?;
        self.state = CoordinatorState::Playing;
        info!("Primed {} buffers, playback started", self.pool.queued_len());
        Ok(true)
    }

    /// One pass of the steady-state loop, entered with the next chunk
    /// already in hand.
    fn turn(&mut self, chunk: Chunk) -> Result<(), PlaybackError> {
        let mut pending = Some(chunk);

        // Wait until the device has finished playing at least one
        // buffer, so there is something to refill.
        self.wait_processed()?;

        // If the refill lagged long enough for the device to run out
        // of queued buffers, it stops the source on its own. Drain the
        // remaining buffers before touching the queue so the rotation
        // realigns to the first buffer instead of drifting out of
        // phase with our ordering.
        let state = self.backend.state(self.source).map_err(PlaybackError::Backend)?;
        if state != PlaybackState::Playing {
            self.state = CoordinatorState::Starved;
            self.resync()?;
        }

        // Detach everything the device is done with.
        let finished = self
            .backend
            .dequeue_processed(self.source)
            .map_err(PlaybackError::Backend)?;
        for &id in &finished {
            self.pool.mark_processed(id);
        }

        // Refill each freed buffer in dequeue order and hand it back.
        for id in finished {
            let chunk = match pending.take() {
                Some(chunk) => chunk,
                None => match self.recv_chunk() {
                    Some(chunk) => chunk,
                    None => {
                        debug!("Chunk source exhausted during refill");
                        self.state = CoordinatorState::Closed;
                        return Ok(());
                    }
                },
            };

            debug_assert!(self.pool.is_writable(id));
            let rate = self.effective_rate();
            self.backend
                .write(id, &chunk, rate)
                .map_err(PlaybackError::Backend)?;
            self.backend
                .submit(self.source, &[id])
                .map_err(PlaybackError::Backend)?;
            self.pool.mark_queued(id);
            self.profilers.refill_tps.tick(1);
        }

        // The source does not restart on its own after a starvation
        // stop; resume it now that the queue is refilled.
        let state = self.backend.state(self.source).map_err(PlaybackError::Backend)?;
        if state != PlaybackState::Playing {
            self.backend.play(self.source).map_err(PlaybackError::Backend)?;
            info!("Playback restarted after refill");
        }

        self.state = CoordinatorState::Playing;
        Ok(())
    }

    /// Polls the device until at least one buffer is reported finished.
    /// Bounded: a device that never makes progress surfaces a stall
    /// error instead of spinning forever.
    fn wait_processed(&mut self) -> Result<(), PlaybackError> {
        let started = Instant::now();
        self.profilers.poll_time.start();

        loop {
            let processed = self
                .backend
                .processed_count(self.source)
                .map_err(PlaybackError::Backend)?;
            if processed > 0 {
                self.profilers.poll_time.end();
                return Ok(());
            }
            if started.elapsed() >= self.stall_timeout {
                // Record the aborted poll too, so the stall shows up in
                // the reported poll times.
                self.profilers.poll_time.end();
                return Err(PlaybackError::StallTimeout(self.stall_timeout));
            }
            std::thread::sleep(self.poll_interval);
        }
    }

    /// Waits until every queued buffer is reported processed, with the
    /// same bound as the stall poll.
    fn resync(&mut self) -> Result<(), PlaybackError> {
        self.state = CoordinatorState::Resyncing;
        self.profilers.resyncs.fetch_add(1, Ordering::Relaxed);
        warn!("Device starved; draining queued buffers to resync");

        let queued = self
            .backend
            .queued_count(self.source)
            .map_err(PlaybackError::Backend)?;
        let started = Instant::now();

        loop {
            let processed = self
                .backend
                .processed_count(self.source)
                .map_err(PlaybackError::Backend)?;
            if processed == queued {
                return Ok(());
            }
            if started.elapsed() >= self.stall_timeout {
                return Err(PlaybackError::ResyncTimeout(self.stall_timeout));
            }
            std::thread::sleep(self.poll_interval);
        }
    }

    /// Blocking chunk receive that stays responsive to the stop flag.
    /// Returns None on stop or when the producer is gone.
    fn recv_chunk(&mut self) -> Option<Chunk> {
        loop {
            if !self.controller.is_running() {
                return None;
            }
            match self.chunks.recv_timeout(RECV_POLL) {
                Ok(chunk) => {
                    self.profilers.chunk_tps.tick(1);
                    return Some(chunk);
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("Chunk producer disconnected");
                    return None;
                }
            }
        }
    }

    /// Playback rate of the data currently being written, scaled by
    /// the advisory speed multiplier.
    fn effective_rate(&self) -> SampleRate {
        (self.sample_rate as f32 * self.controller.speed()).round() as SampleRate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockBackend, Op};
    use std::sync::mpsc::sync_channel;

    fn chunk(base: i16) -> Chunk {
        (base..base + 4).collect()
    }

    struct Fixture {
        backend: MockBackend,
        source: SourceId,
        pool_ids: Vec<u32>,
    }

    fn fixture(buffer_count: usize) -> Fixture {
        let mut backend = MockBackend::new();
        let pool_ids = backend.create_buffers(buffer_count).unwrap();
        let source = backend.create_source().unwrap();
        Fixture {
            backend,
            source,
            pool_ids,
        }
    }

    fn run_with_chunks(
        fixture: &mut Fixture,
        chunks: Vec<Chunk>,
        poll_interval: Duration,
        stall_timeout: Duration,
    ) -> (
        Result<(), PlaybackError>,
        CoordinatorState,
        Arc<StreamProfilers>,
    ) {
        let (tx, rx) = sync_channel(chunks.len().max(1));
        for chunk in chunks {
            tx.send(chunk).unwrap();
        }
        drop(tx);

        let controller = Arc::new(StreamController::new());
        let profilers = Arc::new(StreamProfilers::default());
        let mut coordinator = Coordinator::new(
            &mut fixture.backend,
            fixture.source,
            BufferPool::new(fixture.pool_ids.clone()),
            rx,
            controller,
            Arc::clone(&profilers),
            44100,
            poll_interval,
            stall_timeout,
        );

        let result = coordinator.run();
        let state = coordinator.state();
        (result, state, profilers)
    }

    /// Replays the op log, tracking how many buffers are submitted and
    /// not yet dequeued, and returns the count after every submit.
    fn queued_after_each_submit(ops: &[Op]) -> Vec<usize> {
        let mut queued = 0;
        let mut counts = Vec::new();
        for op in ops {
            match op {
                Op::Submit(_) => {
                    queued += 1;
                    counts.push(queued);
                }
                Op::Dequeue(ids) => queued -= ids.len(),
                _ => {}
            }
        }
        counts
    }

    #[test]
    fn steady_state_refills_in_round_robin_order() {
        let mut fixture = fixture(2);
        fixture.backend.auto_process = true;

        let input = vec![chunk(1), chunk(5), chunk(9), chunk(13)];
        let (result, state, profilers) = run_with_chunks(
            &mut fixture,
            input,
            Duration::ZERO,
            Duration::from_secs(1),
        );

        assert_eq!(result, Ok(()));
        assert_eq!(state, CoordinatorState::Closed);
        assert_eq!(profilers.resyncs.load(Ordering::Relaxed), 0);

        // Priming writes 0 and 1, then refills alternate strictly.
        let writes: Vec<_> = fixture
            .backend
            .ops
            .iter()
            .filter_map(|op| match op {
                Op::Write(id) => Some(*id),
                _ => None,
            })
            .collect();
        assert_eq!(writes, vec![0, 1, 0, 1]);

        // No chunk lost, duplicated or reordered.
        let played: Vec<i16> = fixture.backend.written.concat();
        assert_eq!(played, (1..=16).collect::<Vec<i16>>());
    }

    #[test]
    fn starvation_triggers_resync_and_restart() {
        let mut fixture = fixture(2);
        // The device finishes everything and stops before the first
        // steady-state poll, simulating a refill that lagged.
        fixture.backend.stop_after_polls = Some(1);

        let input = vec![chunk(1), chunk(5), chunk(9), chunk(13)];
        let (result, state, profilers) = run_with_chunks(
            &mut fixture,
            input,
            Duration::ZERO,
            Duration::from_secs(1),
        );

        assert_eq!(result, Ok(()));
        assert_eq!(state, CoordinatorState::Closed);
        assert_eq!(profilers.resyncs.load(Ordering::Relaxed), 1);

        // Both buffers were dequeued together, refilled and the source
        // explicitly restarted.
        assert!(fixture.backend.ops.contains(&Op::Dequeue(vec![0, 1])));
        let plays = fixture
            .backend
            .ops
            .iter()
            .filter(|op| **op == Op::Play)
            .count();
        assert_eq!(plays, 2);

        // Recovery loses and duplicates nothing.
        let played: Vec<i16> = fixture.backend.written.concat();
        assert_eq!(played, (1..=16).collect::<Vec<i16>>());
    }

    #[test]
    fn frozen_device_surfaces_stall_timeout() {
        let mut fixture = fixture(2);
        fixture.backend.frozen = true;

        let timeout = Duration::from_millis(20);
        let (result, state, profilers) = run_with_chunks(
            &mut fixture,
            vec![chunk(1), chunk(5), chunk(9)],
            Duration::from_millis(1),
            timeout,
        );

        assert_eq!(result, Err(PlaybackError::StallTimeout(timeout)));
        assert_eq!(state, CoordinatorState::Closed);

        // The aborted poll is still recorded.
        let (_, _, poll_max) = profilers.poll_time.get_stat();
        assert!(poll_max > 0.0);
    }

    #[test]
    fn queued_count_recovers_after_every_refill() {
        let mut fixture = fixture(2);
        fixture.backend.auto_process = true;

        let input = vec![chunk(1), chunk(5), chunk(9), chunk(13)];
        let (result, _, _) = run_with_chunks(
            &mut fixture,
            input,
            Duration::ZERO,
            Duration::from_secs(1),
        );
        assert_eq!(result, Ok(()));

        // The rotation never over- or under-fills: every submit outside
        // priming brings the queue back to the full pool size.
        let counts = queued_after_each_submit(&fixture.backend.ops);
        assert_eq!(counts, vec![1, 2, 2, 2]);
    }

    #[test]
    fn backend_error_stops_the_loop() {
        let mut fixture = fixture(2);
        fixture.backend.auto_process = true;
        fixture.backend.fail_write_after = Some(2);

        let (result, state, _) = run_with_chunks(
            &mut fixture,
            vec![chunk(1), chunk(5), chunk(9), chunk(13)],
            Duration::ZERO,
            Duration::from_secs(1),
        );

        assert!(matches!(result, Err(PlaybackError::Backend(_))));
        assert_eq!(state, CoordinatorState::Closed);
    }

    #[test]
    fn stopping_before_any_chunk_closes_cleanly() {
        let mut fixture = fixture(2);

        let (tx, rx) = sync_channel::<Chunk>(1);
        let controller = Arc::new(StreamController::new());
        controller.stop();

        let profilers = Arc::new(StreamProfilers::default());
        let mut coordinator = Coordinator::new(
            &mut fixture.backend,
            fixture.source,
            BufferPool::new(fixture.pool_ids.clone()),
            rx,
            controller,
            profilers,
            44100,
            Duration::ZERO,
            Duration::from_secs(1),
        );

        assert_eq!(coordinator.run(), Ok(()));
        assert_eq!(coordinator.state(), CoordinatorState::Closed);
        drop(tx);
    }
}
