//! Streaming buffer scheduler
//!
//! Feeds a playback source from an in-memory sample source using a fixed pool
//! of buffers. Each poll cycle reclaims the buffers the device has finished
//! playing, refills every free buffer with the next chunk of samples and
//! queues it, then re-reads the source state.
//!
//! The scheduler is a small state machine:
//!
//! ```text
//! Filling ──all samples queued──▶ Draining ──source Stopped──▶ Done
//!    │                               │
//!    └────────device error───────────┴──▶ Stopping ──source Stopped──▶ Done
//! ```
//!
//! Device errors never abort the process. They are reported once on the
//! diagnostics stream and move the scheduler to `Stopping`, which requests a
//! stop and waits for the source to report it.

use super::{FreeBufferQueue, StreamConfig};
use crate::backend::{AudioBackend, BufferId, DeviceError, SampleFormat, SourceId, SourceState};
use crate::diagnostics;
use crate::Result;
use std::io::Write;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Context reported when the processed-buffer query fails
pub const GETTING_PROCESSED_BUFFERS: &str = "getting number of processed buffers";
/// Context reported when unqueueing processed buffers fails
pub const UNQUEUEING_BUFFERS: &str = "unqueueing processed buffers";
/// Context reported when filling a buffer fails
pub const BUFFERING_AUDIO_DATA: &str = "buffering audio data";
/// Context reported when queueing a buffer fails
pub const QUEUEING_BUFFERS: &str = "queueing buffers";
/// Context reported when the play command fails
pub const PLAYING_AUDIO: &str = "playing audio from source";
/// Context reported when the state query fails
pub const GETTING_SOURCE_STATE: &str = "getting source state";
/// Context reported when the stop command fails
pub const STOPPING_SOURCE: &str = "stopping source";
/// Context reported when the stall timeout expires
pub const STREAMING_AUDIO: &str = "streaming audio";

/// Where the scheduler is in its run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    /// Samples remain to be queued
    Filling,
    /// Everything is queued; waiting for the source to play it out
    Draining,
    /// A failure occurred; waiting for the requested stop to land
    Stopping,
    /// Finished
    Done,
}

/// Summary of a streaming run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamReport {
    /// Samples in the sample source
    pub total_samples: usize,
    /// Samples handed to the device
    pub samples_queued: usize,
    /// Bytes handed to the device
    pub bytes_buffered: usize,
    /// Successful buffer fills
    pub fills: usize,
    /// Buffers reclaimed from the source
    pub reclaimed: usize,
    /// Play commands issued
    pub plays: usize,
    /// Play commands issued after the source ran dry
    pub restarts: usize,
    /// Stop commands issued
    pub stops: usize,
    /// Failures reported on the diagnostics stream
    pub errors: usize,
    /// Poll cycles run
    pub polls: usize,
    /// Last source state observed
    pub final_state: SourceState,
    /// Every sample was played and the source stopped on its own
    pub completed: bool,
}

#[derive(Debug, Clone, Copy)]
struct StepFailure {
    context: &'static str,
    error: DeviceError,
}

impl StepFailure {
    fn new(context: &'static str, error: DeviceError) -> Self {
        StepFailure { context, error }
    }
}

/// Keeps a source fed from a pool of buffers
///
/// The scheduler borrows the backend, the buffer pool and the samples for one
/// playback run. Drive it with [`run`](Self::run), or call
/// [`step`](Self::step) repeatedly to observe it between poll cycles.
pub struct StreamScheduler<'a, B: AudioBackend + ?Sized, W: Write> {
    backend: &'a mut B,
    source: SourceId,
    pool: &'a [BufferId],
    free: FreeBufferQueue<BufferId>,
    samples: &'a [i16],
    cursor: usize,
    config: StreamConfig,
    state: SourceState,
    phase: StreamPhase,
    stop_issued: bool,
    report: StreamReport,
    diagnostics: W,
    last_progress: Instant,
}

impl<'a, B: AudioBackend + ?Sized, W: Write> StreamScheduler<'a, B, W> {
    /// Create a scheduler with every buffer of `pool` free.
    ///
    /// Queries the source state once; anything other than Initial is logged
    /// and tolerated. If the query itself fails the sample source is treated
    /// as empty.
    ///
    /// # Arguments
    /// * `backend` - Device the source and buffers live on
    /// * `source` - Source to feed
    /// * `pool` - Buffers owned by this run; none may be queued
    /// * `samples` - Complete 16-bit mono sample source
    /// * `config` - Chunk size, sample rate and polling behavior
    /// * `diagnostics` - Stream receiving one line per reported failure
    pub fn new(
        backend: &'a mut B,
        source: SourceId,
        pool: &'a [BufferId],
        samples: &'a [i16],
        config: StreamConfig,
        diagnostics: W,
    ) -> Result<Self> {
        config.validate()?;
        let free = FreeBufferQueue::from_items(pool)?;

        let mut scheduler = StreamScheduler {
            backend,
            source,
            pool,
            free,
            samples,
            cursor: 0,
            config,
            state: SourceState::Initial,
            phase: StreamPhase::Filling,
            stop_issued: false,
            report: StreamReport::default(),
            diagnostics,
            last_progress: Instant::now(),
        };
        scheduler.initialize();
        Ok(scheduler)
    }

    fn initialize(&mut self) {
        match self.backend.source_state(self.source) {
            Ok(SourceState::Initial) => {}
            Ok(state) => {
                warn!(source = %self.source, ?state, "source is not in its initial state");
                self.state = state;
            }
            Err(error) => {
                self.report_failure(StepFailure::new(GETTING_SOURCE_STATE, error));
                self.samples = &self.samples[..0];
            }
        }

        if self.samples.is_empty() {
            debug!("nothing to play");
            self.phase = StreamPhase::Done;
        }
    }

    /// Run poll cycles until the scheduler is done
    pub fn run(mut self) -> StreamReport {
        let backoff = self.config.poll_backoff();
        info!(
            samples = self.samples.len(),
            buffers = self.pool.len(),
            chunk = self.config.chunk_size,
            "streaming started"
        );

        while self.step() != StreamPhase::Done {
            if let Some(backoff) = backoff {
                std::thread::sleep(backoff);
            }
        }

        let report = self.report();
        info!(
            fills = report.fills,
            polls = report.polls,
            errors = report.errors,
            completed = report.completed,
            "streaming finished"
        );
        report
    }

    /// Run one poll cycle and return the phase it left the scheduler in
    pub fn step(&mut self) -> StreamPhase {
        if self.phase == StreamPhase::Done {
            return StreamPhase::Done;
        }
        self.report.polls += 1;
        let before = self.progress_marker();

        let outcome = match self.phase {
            StreamPhase::Filling => self.fill_cycle(),
            StreamPhase::Draining => self.drain_cycle(),
            StreamPhase::Stopping => self.stop_cycle(),
            StreamPhase::Done => Ok(StreamPhase::Done),
        };

        self.phase = match outcome {
            Ok(next) => next,
            Err(failure) => {
                self.report_failure(failure);
                if self.phase == StreamPhase::Stopping {
                    warn!(source = %self.source, "device keeps failing while stopping, giving up");
                    StreamPhase::Done
                } else {
                    StreamPhase::Stopping
                }
            }
        };

        if self.progress_marker() != before {
            self.last_progress = Instant::now();
        } else {
            self.check_stall();
        }

        self.phase
    }

    fn fill_cycle(&mut self) -> std::result::Result<StreamPhase, StepFailure> {
        self.reclaim()?;
        while !self.free.is_empty() && self.cursor < self.samples.len() {
            self.queue_next_chunk()?;
        }
        self.refresh_state()?;
        self.recover_underrun()?;

        if self.cursor == self.samples.len() {
            debug!(samples = self.cursor, "all samples queued");
            Ok(StreamPhase::Draining)
        } else {
            Ok(StreamPhase::Filling)
        }
    }

    fn drain_cycle(&mut self) -> std::result::Result<StreamPhase, StepFailure> {
        self.reclaim()?;
        self.refresh_state()?;
        self.recover_underrun()?;
        Ok(if self.state == SourceState::Stopped {
            StreamPhase::Done
        } else {
            StreamPhase::Draining
        })
    }

    fn stop_cycle(&mut self) -> std::result::Result<StreamPhase, StepFailure> {
        if !self.stop_issued {
            self.stop_issued = true;
            self.backend
                .stop(self.source)
                .map_err(|error| StepFailure::new(STOPPING_SOURCE, error))?;
            self.report.stops += 1;
            info!(source = %self.source, "stop requested");
        }
        self.reclaim()?;
        self.refresh_state()?;
        Ok(if self.state == SourceState::Stopped {
            StreamPhase::Done
        } else {
            StreamPhase::Stopping
        })
    }

    /// Move processed buffers from the source back into the free queue
    fn reclaim(&mut self) -> std::result::Result<usize, StepFailure> {
        let processed = self
            .backend
            .processed_buffer_count(self.source)
            .map_err(|error| StepFailure::new(GETTING_PROCESSED_BUFFERS, error))?;
        if processed == 0 {
            return Ok(0);
        }

        let reclaimed = self
            .backend
            .unqueue_buffers(self.source, processed)
            .map_err(|error| StepFailure::new(UNQUEUEING_BUFFERS, error))?;

        for buffer in &reclaimed {
            if !self.pool.contains(buffer) {
                return Err(StepFailure::new(UNQUEUEING_BUFFERS, DeviceError::InvalidName));
            }
            if self.free.push(*buffer).is_err() {
                return Err(StepFailure::new(
                    UNQUEUEING_BUFFERS,
                    DeviceError::InvalidOperation,
                ));
            }
        }
        self.report.reclaimed += reclaimed.len();

        if reclaimed.len() != processed {
            return Err(StepFailure::new(UNQUEUEING_BUFFERS, DeviceError::InvalidValue));
        }
        Ok(processed)
    }

    /// Fill the head free buffer with the next chunk and queue it
    fn queue_next_chunk(&mut self) -> std::result::Result<(), StepFailure> {
        let Some(buffer) = self.free.pop() else {
            return Ok(());
        };
        let samples = self.samples;
        let end = (self.cursor + self.config.chunk_size).min(samples.len());
        let chunk = &samples[self.cursor..end];

        if let Err(error) =
            self.backend
                .fill_buffer(buffer, SampleFormat::Mono16, chunk, self.config.sample_rate)
        {
            self.return_to_pool(buffer);
            return Err(StepFailure::new(BUFFERING_AUDIO_DATA, error));
        }
        if let Err(error) = self.backend.queue_buffers(self.source, &[buffer]) {
            self.return_to_pool(buffer);
            return Err(StepFailure::new(QUEUEING_BUFFERS, error));
        }

        self.cursor = end;
        self.report.fills += 1;
        self.report.bytes_buffered += chunk.len() * std::mem::size_of::<i16>();
        debug!(%buffer, samples = chunk.len(), cursor = self.cursor, "queued chunk");

        // Queueing alone never starts an idle source
        match self.state {
            SourceState::Initial => self.start_playback(false),
            SourceState::Stopped => self.start_playback(true),
            SourceState::Playing | SourceState::Paused => Ok(()),
        }
    }

    fn start_playback(&mut self, restart: bool) -> std::result::Result<(), StepFailure> {
        self.backend
            .play(self.source)
            .map_err(|error| StepFailure::new(PLAYING_AUDIO, error))?;
        self.report.plays += 1;
        if restart {
            self.report.restarts += 1;
            warn!(source = %self.source, cursor = self.cursor, "source ran dry, restarting playback");
        } else {
            info!(source = %self.source, "playback started");
        }
        self.state = SourceState::Playing;
        Ok(())
    }

    /// Restart a source that ran dry while buffers it never played were
    /// still queued on it
    fn recover_underrun(&mut self) -> std::result::Result<(), StepFailure> {
        if self.state != SourceState::Stopped {
            return Ok(());
        }
        // Restarting replays from the head of the queue, so drop what already played
        self.reclaim()?;
        if self.free.len() < self.pool.len() {
            self.start_playback(true)?;
        }
        Ok(())
    }

    fn refresh_state(&mut self) -> std::result::Result<(), StepFailure> {
        let state = self
            .backend
            .source_state(self.source)
            .map_err(|error| StepFailure::new(GETTING_SOURCE_STATE, error))?;
        if state != self.state {
            debug!(from = ?self.state, to = ?state, "source state changed");
        }
        self.state = state;
        Ok(())
    }

    fn return_to_pool(&mut self, buffer: BufferId) {
        if let Err(error) = self.free.push(buffer) {
            warn!(%buffer, %error, "could not return buffer to the free queue");
        }
    }

    fn report_failure(&mut self, failure: StepFailure) {
        self.report.errors += 1;
        warn!(context = failure.context, error = %failure.error, "device error while streaming");
        diagnostics::report_device_error(&mut self.diagnostics, Some(failure.error), failure.context);
    }

    fn progress_marker(&self) -> (usize, usize, SourceState, StreamPhase) {
        (self.cursor, self.report.reclaimed, self.state, self.phase)
    }

    fn check_stall(&mut self) {
        let Some(timeout) = self.config.stall_timeout() else {
            return;
        };
        if self.phase == StreamPhase::Done || self.last_progress.elapsed() < timeout {
            return;
        }

        self.report.errors += 1;
        let detail = format!("no progress for {} ms", timeout.as_millis());
        warn!(phase = ?self.phase, %detail, "playback stalled");
        diagnostics::print_error_message(
            &mut self.diagnostics,
            Some("Playback stalled"),
            Some(STREAMING_AUDIO),
            Some(&detail),
        )
        .ok();

        self.phase = match self.phase {
            StreamPhase::Stopping => StreamPhase::Done,
            _ => StreamPhase::Stopping,
        };
        self.last_progress = Instant::now();
    }

    /// Current phase
    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    /// Last source state observed
    pub fn source_state(&self) -> SourceState {
        self.state
    }

    /// Samples handed to the device so far
    pub fn samples_queued(&self) -> usize {
        self.cursor
    }

    /// Buffers currently free, head first
    pub fn free_buffers(&self) -> &FreeBufferQueue<BufferId> {
        &self.free
    }

    /// Snapshot of the run so far
    pub fn report(&self) -> StreamReport {
        let total_samples = self.samples.len();
        StreamReport {
            total_samples,
            samples_queued: self.cursor,
            final_state: self.state,
            completed: self.phase == StreamPhase::Done
                && self.report.errors == 0
                && self.cursor == total_samples
                && (self.state == SourceState::Stopped || total_samples == 0),
            ..self.report
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Fault, Operation, SimulatedDevice};

    fn setup(device: &mut SimulatedDevice, buffers: usize) -> (SourceId, Vec<BufferId>) {
        let id = device.open_device(None).unwrap();
        let context = device.create_context(id, None).unwrap();
        device.make_context_current(Some(context)).unwrap();
        let source = device.create_source().unwrap();
        let pool = device.create_buffers(buffers).unwrap();
        (source, pool)
    }

    #[test]
    fn test_short_source_plays_through() {
        let mut device = SimulatedDevice::new().with_tick(16);
        let journal = device.journal();
        let (source, pool) = setup(&mut device, 2);
        let samples: Vec<i16> = (0..100).collect();

        let report = StreamScheduler::new(
            &mut device,
            source,
            &pool,
            &samples,
            StreamConfig::new(2, 32, 8000),
            std::io::sink(),
        )
        .unwrap()
        .run();

        assert!(report.completed, "{report:?}");
        assert_eq!(report.fills, 4);
        assert_eq!(report.plays, 1);
        assert_eq!(journal.lock().fill_sizes(), vec![32, 32, 32, 4]);
        assert_eq!(journal.lock().played, samples);
    }

    #[test]
    fn test_empty_source_is_done_immediately() {
        let mut device = SimulatedDevice::new();
        let journal = device.journal();
        let (source, pool) = setup(&mut device, 3);

        let mut scheduler = StreamScheduler::new(
            &mut device,
            source,
            &pool,
            &[],
            StreamConfig::default(),
            std::io::sink(),
        )
        .unwrap();
        assert_eq!(scheduler.phase(), StreamPhase::Done);
        assert_eq!(scheduler.step(), StreamPhase::Done);

        let report = scheduler.report();
        assert!(report.completed);
        assert_eq!(report.polls, 0);
        assert_eq!(journal.lock().plays(), 0);
    }

    #[test]
    fn test_failed_initial_query_means_nothing_to_play() {
        let mut device =
            SimulatedDevice::new().with_fault(Fault::on(Operation::SourceState, 1));
        let (source, pool) = setup(&mut device, 3);
        let samples = vec![1i16; 10_000];
        let mut diag = Vec::new();

        let report = StreamScheduler::new(
            &mut device,
            source,
            &pool,
            &samples,
            StreamConfig::default(),
            &mut diag,
        )
        .unwrap()
        .run();

        assert_eq!(report.total_samples, 0);
        assert_eq!(report.fills, 0);
        assert!(!report.completed);
        assert_eq!(
            String::from_utf8(diag).unwrap(),
            "Device error in getting source state: Invalid operation!\n"
        );
    }

    #[test]
    fn test_all_buffers_start_free() {
        let mut device = SimulatedDevice::new();
        let (source, pool) = setup(&mut device, 3);
        let samples = vec![0i16; 10];
        let scheduler = StreamScheduler::new(
            &mut device,
            source,
            &pool,
            &samples,
            StreamConfig::default(),
            std::io::sink(),
        )
        .unwrap();

        assert!(scheduler.free_buffers().is_full());
        assert_eq!(scheduler.free_buffers().iter().collect::<Vec<_>>(), pool);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut device = SimulatedDevice::new();
        let (source, pool) = setup(&mut device, 3);
        let result = StreamScheduler::new(
            &mut device,
            source,
            &pool,
            &[0i16; 4],
            StreamConfig::new(3, 0, 44100),
            std::io::sink(),
        );
        assert!(result.is_err());
    }
}
