//! Audio device session
//!
//! A [`PlaybackSession`] owns everything a playback run needs on the device:
//! the opened device, a context made current on it, one source and a pool of
//! buffers. Acquisition is ordered; when a step fails, the steps that already
//! succeeded are undone in reverse order. Closing or dropping the session
//! releases everything the same way.

use crate::backend::{
    AudioBackend, BufferId, ContextError, ContextId, DeviceError, DeviceId, SampleFormat,
    SourceId, SourceState,
};
use crate::config::SessionConfig;
use crate::diagnostics::{print_error_message, report_context_error, report_device_error};
use crate::streaming::scheduler::{
    BUFFERING_AUDIO_DATA, GETTING_SOURCE_STATE, PLAYING_AUDIO, STOPPING_SOURCE,
    STREAMING_AUDIO, UNQUEUEING_BUFFERS,
};
use crate::streaming::{StreamConfig, StreamReport, StreamScheduler};
use crate::Result;
use std::io::Write;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Context reported when the context cannot be created
pub const CREATING_CONTEXT: &str = "creating context";
/// Context reported when the context cannot be made current
pub const MAKING_CONTEXT_CURRENT: &str = "making context current";
/// Context reported when the source cannot be created
pub const CREATING_SOURCES: &str = "creating audio sources";
/// Context reported when the buffer pool cannot be created
pub const CREATING_BUFFERS: &str = "creating audio buffers";
/// Context reported when a static buffer cannot be queued on the source
pub const ATTACHING_BUFFER: &str = "attaching buffer to source";

/// Setup failures of a [`PlaybackSession`]
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    /// The output device could not be opened
    #[error("Error opening output device: {0}")]
    OpenDevice(#[source] ContextError),
    /// The context could not be created
    #[error("Context error in creating context: {0}")]
    CreateContext(#[source] ContextError),
    /// The context could not be made current
    #[error("Context error in making context current: {0}")]
    MakeCurrent(#[source] ContextError),
    /// The source could not be created
    #[error("Device error in creating audio sources: {0}")]
    CreateSource(#[source] DeviceError),
    /// The buffer pool could not be created
    #[error("Device error in creating audio buffers: {0}")]
    CreateBuffers(#[source] DeviceError),
    /// The session was already closed
    #[error("Playback session is closed")]
    Closed,
}

/// Handles held by a session, released in reverse acquisition order
#[derive(Debug, Default)]
struct Resources {
    device: Option<DeviceId>,
    context: Option<ContextId>,
    current: bool,
    source: Option<SourceId>,
    buffers: Vec<BufferId>,
}

impl Resources {
    fn release<B: AudioBackend + ?Sized>(&mut self, backend: &mut B) {
        if let Some(source) = self.source {
            detach_source(backend, source);
        }
        let mut pending = None;
        if !self.buffers.is_empty() {
            let buffers = std::mem::take(&mut self.buffers);
            if let Err(error) = backend.delete_buffers(&buffers) {
                debug!(%error, count = buffers.len(), "buffers still attached, retrying after source");
                pending = Some(buffers);
            }
        }
        if let Some(source) = self.source.take() {
            if let Err(error) = backend.delete_source(source) {
                warn!(%source, %error, "failed to delete source");
            }
        }
        // Deleting the source detaches its queue
        if let Some(buffers) = pending {
            if let Err(error) = backend.delete_buffers(&buffers) {
                warn!(%error, count = buffers.len(), "failed to delete buffers");
            }
        }
        if std::mem::take(&mut self.current) {
            if let Err(error) = backend.make_context_current(None) {
                warn!(%error, "failed to clear current context");
            }
        }
        if let Some(context) = self.context.take() {
            if let Err(error) = backend.destroy_context(context) {
                warn!(%context, %error, "failed to destroy context");
            }
        }
        if let Some(device) = self.device.take() {
            match backend.close_device(device) {
                Ok(()) => debug!(%device, "device closed"),
                Err(error) => warn!(%device, %error, "failed to close device"),
            }
        }
    }
}

/// Stop the source if it is still running and unqueue everything it holds
fn detach_source<B: AudioBackend + ?Sized>(backend: &mut B, source: SourceId) {
    if let Ok(SourceState::Playing | SourceState::Paused) = backend.source_state(source) {
        if let Err(error) = backend.stop(source) {
            warn!(%source, %error, "failed to stop source");
        }
    }
    match backend.processed_buffer_count(source) {
        Ok(0) => {}
        Ok(processed) => {
            if let Err(error) = backend.unqueue_buffers(source, processed) {
                warn!(%source, %error, "failed to unqueue buffers");
            }
        }
        Err(error) => warn!(%source, %error, "failed to query processed buffers"),
    }
}

/// Device, context, source and buffer pool for one playback run
pub struct PlaybackSession<B: AudioBackend> {
    backend: B,
    resources: Resources,
}

impl<B: AudioBackend> PlaybackSession<B> {
    /// Acquire device, context, source and `config.stream.buffer_count`
    /// buffers, in that order.
    ///
    /// Each failure writes one diagnostic line, releases whatever was
    /// already acquired and returns the step that failed.
    pub fn open<W: Write + ?Sized>(
        backend: B,
        config: &SessionConfig,
        diagnostics: &mut W,
    ) -> std::result::Result<Self, SessionError> {
        let mut session = PlaybackSession {
            backend,
            resources: Resources::default(),
        };
        // Any early return drops `session`, which releases in reverse order

        let device = session
            .backend
            .open_device(config.device.as_deref())
            .map_err(|error| {
                print_error_message(diagnostics, Some("Error opening output device"), None, None)
                    .ok();
                SessionError::OpenDevice(error)
            })?;
        session.resources.device = Some(device);

        let context = session
            .backend
            .create_context(device, Some(config.stream.sample_rate))
            .map_err(|error| {
                report_context_error(diagnostics, Some(error), CREATING_CONTEXT);
                SessionError::CreateContext(error)
            })?;
        session.resources.context = Some(context);

        session
            .backend
            .make_context_current(Some(context))
            .map_err(|error| {
                report_context_error(diagnostics, Some(error), MAKING_CONTEXT_CURRENT);
                SessionError::MakeCurrent(error)
            })?;
        session.resources.current = true;

        let source = session.backend.create_source().map_err(|error| {
            report_device_error(diagnostics, Some(error), CREATING_SOURCES);
            SessionError::CreateSource(error)
        })?;
        session.resources.source = Some(source);

        let buffers = session
            .backend
            .create_buffers(config.stream.buffer_count)
            .map_err(|error| {
                report_device_error(diagnostics, Some(error), CREATING_BUFFERS);
                SessionError::CreateBuffers(error)
            })?;
        session.resources.buffers = buffers;

        info!(
            %device,
            %context,
            %source,
            buffers = session.resources.buffers.len(),
            "playback session opened"
        );
        Ok(session)
    }

    /// Source owned by the session
    pub fn source(&self) -> Option<SourceId> {
        self.resources.source
    }

    /// Buffer pool owned by the session
    pub fn buffers(&self) -> &[BufferId] {
        &self.resources.buffers
    }

    /// Borrow the backend
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Stream `samples` through the buffer pool until playback stops
    ///
    /// Device errors during playback are reported on `diagnostics` and end
    /// the run early; they show up in the returned report, not as `Err`.
    pub fn stream<W: Write>(
        &mut self,
        samples: &[i16],
        config: &StreamConfig,
        diagnostics: W,
    ) -> Result<StreamReport> {
        let source = self.resources.source.ok_or(SessionError::Closed)?;
        if config.buffer_count != self.resources.buffers.len() {
            debug!(
                requested = config.buffer_count,
                pool = self.resources.buffers.len(),
                "streaming with the session's buffer pool"
            );
        }

        let scheduler = StreamScheduler::new(
            &mut self.backend,
            source,
            &self.resources.buffers,
            samples,
            *config,
            diagnostics,
        )?;
        Ok(scheduler.run())
    }

    /// Play `samples` from the first buffer of the pool in one go
    ///
    /// The whole sample source goes into a single buffer, which is attached
    /// to the source and played; the source state is then polled until it
    /// reads Stopped. Uses `config` for the sample rate, poll backoff and
    /// stall timeout.
    pub fn play_static<W: Write>(
        &mut self,
        samples: &[i16],
        config: &StreamConfig,
        mut diagnostics: W,
    ) -> Result<StreamReport> {
        let source = self.resources.source.ok_or(SessionError::Closed)?;
        let buffer = *self.resources.buffers.first().ok_or(SessionError::Closed)?;
        config.validate()?;

        let mut report = StreamReport {
            total_samples: samples.len(),
            ..StreamReport::default()
        };
        if samples.is_empty() {
            report.completed = true;
            return Ok(report);
        }

        let outcome = self.play_buffer(source, buffer, samples, config, &mut report);
        if let Err((context, error)) = outcome {
            report.errors += 1;
            warn!(context, %error, "device error during static playback");
            report_device_error(&mut diagnostics, Some(error), context);
            if report.plays > 0 && self.backend.stop(source).is_ok() {
                report.stops += 1;
            }
        }

        match self.stall_or_state(source, samples.len(), config, &mut report, &mut diagnostics) {
            Ok(state) => report.final_state = state,
            Err(error) => {
                report.errors += 1;
                report_device_error(&mut diagnostics, Some(error), GETTING_SOURCE_STATE);
            }
        }

        // Give the buffer back so the pool can be reused
        match self.backend.processed_buffer_count(source) {
            Ok(0) => {}
            Ok(processed) => match self.backend.unqueue_buffers(source, processed) {
                Ok(reclaimed) => report.reclaimed += reclaimed.len(),
                Err(error) => {
                    report.errors += 1;
                    report_device_error(&mut diagnostics, Some(error), UNQUEUEING_BUFFERS);
                }
            },
            Err(error) => warn!(%source, %error, "failed to query processed buffers"),
        }

        report.completed = report.errors == 0 && report.final_state == SourceState::Stopped;
        info!(
            samples = samples.len(),
            completed = report.completed,
            "static playback finished"
        );
        Ok(report)
    }

    fn play_buffer(
        &mut self,
        source: SourceId,
        buffer: BufferId,
        samples: &[i16],
        config: &StreamConfig,
        report: &mut StreamReport,
    ) -> std::result::Result<(), (&'static str, DeviceError)> {
        self.backend
            .fill_buffer(buffer, SampleFormat::Mono16, samples, config.sample_rate)
            .map_err(|error| (BUFFERING_AUDIO_DATA, error))?;
        report.fills += 1;
        report.bytes_buffered += samples.len() * std::mem::size_of::<i16>();

        self.backend
            .queue_buffers(source, &[buffer])
            .map_err(|error| (ATTACHING_BUFFER, error))?;
        report.samples_queued = samples.len();

        self.backend
            .play(source)
            .map_err(|error| (PLAYING_AUDIO, error))?;
        report.plays += 1;
        debug!(%source, %buffer, samples = samples.len(), "static buffer playing");
        Ok(())
    }

    /// Poll the source until it stops, or until the stall timeout expires
    /// past the end of the audio
    fn stall_or_state<W: Write>(
        &mut self,
        source: SourceId,
        sample_count: usize,
        config: &StreamConfig,
        report: &mut StreamReport,
        diagnostics: &mut W,
    ) -> std::result::Result<SourceState, DeviceError> {
        let audio = Duration::from_secs_f64(sample_count as f64 / config.sample_rate as f64);
        let deadline = config.stall_timeout().map(|timeout| Instant::now() + audio + timeout);

        loop {
            report.polls += 1;
            let state = self.backend.source_state(source)?;
            if state != SourceState::Playing {
                return Ok(state);
            }

            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                report.errors += 1;
                warn!(%source, "static playback stalled");
                print_error_message(
                    diagnostics,
                    Some("Playback stalled"),
                    Some(STREAMING_AUDIO),
                    Some("source never stopped"),
                )
                .ok();
                if let Err(error) = self.backend.stop(source) {
                    report_device_error(diagnostics, Some(error), STOPPING_SOURCE);
                } else {
                    report.stops += 1;
                }
                return self.backend.source_state(source);
            }

            if let Some(backoff) = config.poll_backoff() {
                std::thread::sleep(backoff);
            }
        }
    }

    /// Release buffers, source, context and device in that order
    pub fn close(mut self) {
        self.resources.release(&mut self.backend);
        info!("playback session closed");
    }
}

impl<B: AudioBackend> Drop for PlaybackSession<B> {
    fn drop(&mut self) {
        self.resources.release(&mut self.backend);
    }
}
