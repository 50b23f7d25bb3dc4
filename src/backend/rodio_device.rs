//! Audio device integration using rodio
//!
//! Maps the queue-based [`AudioBackend`] model onto rodio: an opened device
//! is an output stream, each source is a [`Sink`] and each queued buffer is
//! appended to that sink as a [`SamplesBuffer`]. Playback runs on rodio's
//! mixer thread; progress is observed through the number of sources the
//! sink still holds.

use super::{
    AudioBackend, BufferId, ContextError, ContextId, DeviceError, DeviceId, SampleFormat,
    SourceId, SourceState,
};
use rodio::buffer::SamplesBuffer;
use rodio::cpal::traits::{DeviceTrait, HostTrait};
use rodio::{OutputStream, OutputStreamHandle, Sink};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, warn};

struct OpenStream {
    // Keeps the output stream alive; sinks go silent once it is dropped
    _stream: OutputStream,
    handle: OutputStreamHandle,
}

#[derive(Default)]
struct BufferData {
    samples: Vec<i16>,
    channels: u16,
    sample_rate: u32,
}

struct SinkSource {
    context: ContextId,
    sink: Sink,
    queue: VecDeque<BufferId>,
    state: SourceState,
}

impl SinkSource {
    /// Leading entries of `queue` the sink has finished
    fn processed(&self) -> usize {
        self.queue.len().saturating_sub(self.sink.len())
    }

    fn refresh(&mut self) -> SourceState {
        if self.state == SourceState::Playing && self.sink.empty() {
            self.state = SourceState::Stopped;
        }
        self.state
    }
}

/// Audio playback device using rodio
pub struct RodioDevice {
    next_handle: u32,
    streams: HashMap<DeviceId, OpenStream>,
    contexts: HashMap<ContextId, DeviceId>,
    current: Option<ContextId>,
    sources: HashMap<SourceId, SinkSource>,
    buffers: HashMap<BufferId, BufferData>,
    last_error: Option<DeviceError>,
}

impl RodioDevice {
    /// Create a device with nothing opened yet
    pub fn new() -> Self {
        RodioDevice {
            next_handle: 1,
            streams: HashMap::new(),
            contexts: HashMap::new(),
            current: None,
            sources: HashMap::new(),
            buffers: HashMap::new(),
            last_error: None,
        }
    }

    /// Names of the output devices of the default host
    pub fn output_device_names() -> Vec<String> {
        match rodio::cpal::default_host().output_devices() {
            Ok(devices) => devices.filter_map(|device| device.name().ok()).collect(),
            Err(e) => {
                warn!(error = %e, "failed to enumerate output devices");
                Vec::new()
            }
        }
    }

    fn next_handle(&mut self) -> u32 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn fail<T>(&mut self, error: DeviceError) -> Result<T, DeviceError> {
        self.last_error = Some(error);
        Err(error)
    }

    fn current_handle(&self) -> Option<&OutputStreamHandle> {
        let device = self.contexts.get(&self.current?)?;
        self.streams.get(device).map(|stream| &stream.handle)
    }

    fn new_paused_sink(&mut self) -> Result<Sink, DeviceError> {
        let Some(handle) = self.current_handle() else {
            return self.fail(DeviceError::InvalidOperation);
        };
        match Sink::try_new(handle) {
            Ok(sink) => {
                sink.pause();
                Ok(sink)
            }
            Err(e) => {
                warn!(error = %e, "failed to create audio sink");
                self.fail(DeviceError::OutOfMemory)
            }
        }
    }

    fn is_queued(&self, buffer: BufferId) -> bool {
        self.sources
            .values()
            .any(|source| source.queue.contains(&buffer))
    }
}

impl Default for RodioDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for RodioDevice {
    fn open_device(&mut self, name: Option<&str>) -> Result<DeviceId, ContextError> {
        let opened = match name {
            None => OutputStream::try_default(),
            Some(name) => {
                let host = rodio::cpal::default_host();
                let device = host
                    .output_devices()
                    .map_err(|e| {
                        warn!(error = %e, "failed to enumerate output devices");
                        ContextError::InvalidDevice
                    })?
                    .find(|device| device.name().map(|n| n == name).unwrap_or(false))
                    .ok_or_else(|| {
                        warn!(name, "no output device with this name");
                        ContextError::InvalidDevice
                    })?;
                OutputStream::try_from_device(&device)
            }
        };

        let (stream, handle) = opened.map_err(|e| {
            warn!(error = %e, "failed to create audio stream");
            ContextError::InvalidDevice
        })?;

        let device = DeviceId(self.next_handle());
        self.streams.insert(
            device,
            OpenStream {
                _stream: stream,
                handle,
            },
        );
        debug!(%device, name = name.unwrap_or("default"), "output stream opened");
        Ok(device)
    }

    fn create_context(
        &mut self,
        device: DeviceId,
        sample_rate_hint: Option<u32>,
    ) -> Result<ContextId, ContextError> {
        if !self.streams.contains_key(&device) {
            return Err(ContextError::InvalidDevice);
        }
        if sample_rate_hint == Some(0) {
            return Err(ContextError::InvalidValue);
        }
        // rodio resamples every source to the stream rate, so the hint is only advisory
        let context = ContextId(self.next_handle());
        self.contexts.insert(context, device);
        Ok(context)
    }

    fn make_context_current(&mut self, context: Option<ContextId>) -> Result<(), ContextError> {
        if let Some(context) = context {
            if !self.contexts.contains_key(&context) {
                return Err(ContextError::InvalidContext);
            }
        }
        self.current = context;
        Ok(())
    }

    fn create_source(&mut self) -> Result<SourceId, DeviceError> {
        let Some(context) = self.current else {
            return self.fail(DeviceError::InvalidOperation);
        };
        let sink = self.new_paused_sink()?;
        let source = SourceId(self.next_handle());
        self.sources.insert(
            source,
            SinkSource {
                context,
                sink,
                queue: VecDeque::new(),
                state: SourceState::Initial,
            },
        );
        Ok(source)
    }

    fn create_buffers(&mut self, count: usize) -> Result<Vec<BufferId>, DeviceError> {
        if self.current.is_none() {
            return self.fail(DeviceError::InvalidOperation);
        }
        let buffers: Vec<BufferId> = (0..count).map(|_| BufferId(self.next_handle())).collect();
        for buffer in &buffers {
            self.buffers.insert(*buffer, BufferData::default());
        }
        Ok(buffers)
    }

    fn processed_buffer_count(&mut self, source: SourceId) -> Result<usize, DeviceError> {
        match self.sources.get(&source) {
            Some(slot) => Ok(slot.processed()),
            None => self.fail(DeviceError::InvalidName),
        }
    }

    fn unqueue_buffers(
        &mut self,
        source: SourceId,
        count: usize,
    ) -> Result<Vec<BufferId>, DeviceError> {
        let processed = match self.sources.get(&source) {
            Some(slot) => slot.processed(),
            None => return self.fail(DeviceError::InvalidName),
        };
        if count > processed {
            return self.fail(DeviceError::InvalidValue);
        }
        match self.sources.get_mut(&source) {
            Some(slot) => Ok(slot.queue.drain(..count).collect()),
            None => self.fail(DeviceError::InvalidName),
        }
    }

    fn fill_buffer(
        &mut self,
        buffer: BufferId,
        format: SampleFormat,
        data: &[i16],
        sample_rate: u32,
    ) -> Result<(), DeviceError> {
        if !self.buffers.contains_key(&buffer) {
            return self.fail(DeviceError::InvalidName);
        }
        if format.bytes_per_sample() != 2 {
            return self.fail(DeviceError::InvalidEnum);
        }
        if sample_rate == 0 || data.len() % format.channels() as usize != 0 {
            return self.fail(DeviceError::InvalidValue);
        }
        if self.is_queued(buffer) {
            return self.fail(DeviceError::InvalidOperation);
        }

        if let Some(storage) = self.buffers.get_mut(&buffer) {
            storage.samples.clear();
            storage.samples.extend_from_slice(data);
            storage.channels = format.channels();
            storage.sample_rate = sample_rate;
        }
        Ok(())
    }

    fn queue_buffers(&mut self, source: SourceId, buffers: &[BufferId]) -> Result<(), DeviceError> {
        if !self.sources.contains_key(&source)
            || buffers.iter().any(|b| !self.buffers.contains_key(b))
        {
            return self.fail(DeviceError::InvalidName);
        }
        if buffers.iter().any(|b| self.is_queued(*b)) {
            return self.fail(DeviceError::InvalidOperation);
        }

        let Some(slot) = self.sources.get_mut(&source) else {
            return self.fail(DeviceError::InvalidName);
        };
        for buffer in buffers {
            if let Some(data) = self.buffers.get(buffer) {
                slot.sink.append(SamplesBuffer::new(
                    data.channels.max(1),
                    data.sample_rate.max(1),
                    data.samples.clone(),
                ));
            }
            slot.queue.push_back(*buffer);
        }
        Ok(())
    }

    fn play(&mut self, source: SourceId) -> Result<(), DeviceError> {
        let Some(slot) = self.sources.get_mut(&source) else {
            return self.fail(DeviceError::InvalidName);
        };
        // Buffers already played are not replayed on restart; the sink only
        // holds what it has not finished yet
        slot.state = if slot.sink.empty() {
            SourceState::Stopped
        } else {
            slot.sink.play();
            SourceState::Playing
        };
        Ok(())
    }

    fn stop(&mut self, source: SourceId) -> Result<(), DeviceError> {
        let context = match self.sources.get(&source) {
            Some(slot) => slot.context,
            None => return self.fail(DeviceError::InvalidName),
        };
        if self.current != Some(context) {
            return self.fail(DeviceError::InvalidOperation);
        }
        // A fresh sink drops everything pending, so every queued buffer reads processed
        let fresh = self.new_paused_sink()?;
        if let Some(slot) = self.sources.get_mut(&source) {
            let old = std::mem::replace(&mut slot.sink, fresh);
            old.stop();
            slot.state = SourceState::Stopped;
        }
        Ok(())
    }

    fn source_state(&mut self, source: SourceId) -> Result<SourceState, DeviceError> {
        match self.sources.get_mut(&source) {
            Some(slot) => Ok(slot.refresh()),
            None => self.fail(DeviceError::InvalidName),
        }
    }

    fn delete_buffers(&mut self, buffers: &[BufferId]) -> Result<(), DeviceError> {
        if buffers.iter().any(|b| !self.buffers.contains_key(b)) {
            return self.fail(DeviceError::InvalidName);
        }
        if buffers.iter().any(|b| self.is_queued(*b)) {
            return self.fail(DeviceError::InvalidOperation);
        }
        for buffer in buffers {
            self.buffers.remove(buffer);
        }
        Ok(())
    }

    fn delete_source(&mut self, source: SourceId) -> Result<(), DeviceError> {
        match self.sources.remove(&source) {
            Some(slot) => {
                slot.sink.stop();
                Ok(())
            }
            None => self.fail(DeviceError::InvalidName),
        }
    }

    fn destroy_context(&mut self, context: ContextId) -> Result<(), ContextError> {
        if self.current == Some(context) {
            return Err(ContextError::InvalidContext);
        }
        if self.contexts.remove(&context).is_none() {
            return Err(ContextError::InvalidContext);
        }
        self.sources.retain(|_, slot| slot.context != context);
        Ok(())
    }

    fn close_device(&mut self, device: DeviceId) -> Result<(), ContextError> {
        if self.contexts.values().any(|d| *d == device) {
            return Err(ContextError::InvalidDevice);
        }
        match self.streams.remove(&device) {
            Some(_) => Ok(()),
            None => Err(ContextError::InvalidDevice),
        }
    }

    fn last_error(&mut self) -> Option<DeviceError> {
        self.last_error.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn try_rodio_device() -> Option<(RodioDevice, SourceId, Vec<BufferId>)> {
        let mut device = RodioDevice::new();
        let id = match device.open_device(None) {
            Ok(id) => id,
            Err(err) => {
                eprintln!(
                    "Skipping backend::rodio_device test (audio backend unavailable): {}",
                    err
                );
                return None;
            }
        };
        let context = device.create_context(id, Some(44_100)).ok()?;
        device.make_context_current(Some(context)).ok()?;
        let source = device.create_source().ok()?;
        let buffers = device.create_buffers(2).ok()?;
        Some((device, source, buffers))
    }

    #[test]
    fn test_requires_current_context() {
        let mut device = RodioDevice::new();
        assert_eq!(device.create_buffers(1), Err(DeviceError::InvalidOperation));
        assert_eq!(device.last_error(), Some(DeviceError::InvalidOperation));
        assert_eq!(device.last_error(), None);
    }

    #[test]
    fn test_unknown_handles() {
        let mut device = RodioDevice::new();
        assert_eq!(device.source_state(SourceId(7)), Err(DeviceError::InvalidName));
        assert_eq!(device.close_device(DeviceId(7)), Err(ContextError::InvalidDevice));
    }

    #[test]
    fn test_queued_buffers_wait_for_play() {
        let Some((mut device, source, buffers)) = try_rodio_device() else {
            return;
        };
        device
            .fill_buffer(buffers[0], SampleFormat::Mono16, &[0; 441], 44_100)
            .unwrap();
        device.queue_buffers(source, &buffers[..1]).unwrap();

        assert_eq!(device.source_state(source).unwrap(), SourceState::Initial);
        assert_eq!(device.processed_buffer_count(source).unwrap(), 0);
        assert_eq!(
            device.fill_buffer(buffers[0], SampleFormat::Mono16, &[0; 4], 44_100),
            Err(DeviceError::InvalidOperation)
        );
    }

    #[test]
    fn test_stop_releases_queue() {
        let Some((mut device, source, buffers)) = try_rodio_device() else {
            return;
        };
        for buffer in &buffers {
            device
                .fill_buffer(*buffer, SampleFormat::Mono16, &[0; 44_100], 44_100)
                .unwrap();
        }
        device.queue_buffers(source, &buffers).unwrap();
        device.play(source).unwrap();
        device.stop(source).unwrap();

        assert_eq!(device.source_state(source).unwrap(), SourceState::Stopped);
        assert_eq!(device.processed_buffer_count(source).unwrap(), 2);
        assert_eq!(device.unqueue_buffers(source, 2).unwrap(), buffers);
    }
}
