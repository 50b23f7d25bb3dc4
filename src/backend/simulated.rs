//! Software audio device on a virtual clock
//!
//! [`SimulatedDevice`] implements [`AudioBackend`] without touching real
//! hardware. Playback time only advances when the device is polled: every
//! `processed_buffer_count` or `source_state` call on a playing source
//! consumes `samples_per_tick` samples from its queue. That makes streaming
//! runs fully deterministic, which the tests and `--backend simulated` rely on.
//!
//! Faults can be injected per operation and call number, and a shared
//! [`Journal`] records every successful call, the samples actually played and
//! the current queue contents so they can be inspected while the device is
//! borrowed by a session or scheduler.

use super::{
    AudioBackend, BufferId, ContextError, ContextId, DeviceError, DeviceId, SampleFormat,
    SourceId, SourceState,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Samples consumed per poll when nothing else is configured
pub const DEFAULT_SAMPLES_PER_TICK: usize = 512;

/// Device operations that can be counted and faulted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `open_device`
    OpenDevice,
    /// `create_context`
    CreateContext,
    /// `make_context_current`
    MakeContextCurrent,
    /// `create_source`
    CreateSource,
    /// `create_buffers`
    CreateBuffers,
    /// `processed_buffer_count`
    ProcessedQuery,
    /// `unqueue_buffers`
    Unqueue,
    /// `fill_buffer`
    Fill,
    /// `queue_buffers`
    Queue,
    /// `play`
    Play,
    /// `stop`
    Stop,
    /// `source_state`
    SourceState,
}

/// Injected failure
///
/// Fires on the `nth` call (1-based) of `operation`, and on every later call
/// when `persistent` is set. Context level operations (`OpenDevice`,
/// `CreateContext`, `MakeContextCurrent`) fail with `InvalidDevice`,
/// `InvalidValue` and `InvalidContext` respectively; the others with `error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fault {
    /// Operation to fail
    pub operation: Operation,
    /// 1-based call number that fails
    pub nth: usize,
    /// Error code returned by source/buffer level operations
    pub error: DeviceError,
    /// Keep failing after the first hit
    pub persistent: bool,
}

impl Fault {
    /// Fail the `nth` call of `operation` once
    pub fn on(operation: Operation, nth: usize) -> Self {
        Fault {
            operation,
            nth,
            error: DeviceError::InvalidOperation,
            persistent: false,
        }
    }

    /// Fail every call of `operation` from the `nth` on
    pub fn always_from(operation: Operation, nth: usize) -> Self {
        Fault {
            persistent: true,
            ..Fault::on(operation, nth)
        }
    }

    /// Use `error` as the returned code
    pub fn with_error(mut self, error: DeviceError) -> Self {
        self.error = error;
        self
    }

    fn fires(&self, operation: Operation, call: usize) -> bool {
        self.operation == operation
            && (call == self.nth || (self.persistent && call > self.nth))
    }
}

/// Successful call recorded by the simulated device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCall {
    /// Device opened
    OpenDevice(DeviceId),
    /// Context created
    CreateContext(ContextId),
    /// Current context changed
    MakeContextCurrent(Option<ContextId>),
    /// Source created
    CreateSource(SourceId),
    /// Buffers created
    CreateBuffers(Vec<BufferId>),
    /// Processed buffers removed from a source
    Unqueue(Vec<BufferId>),
    /// Buffer filled with `samples` samples
    Fill {
        /// Target buffer
        buffer: BufferId,
        /// Sample count
        samples: usize,
    },
    /// Buffer appended to a source queue
    Queue(BufferId),
    /// Play issued
    Play(SourceId),
    /// Stop issued
    Stop(SourceId),
    /// Buffers deleted
    DeleteBuffers(Vec<BufferId>),
    /// Source deleted
    DeleteSource(SourceId),
    /// Context destroyed
    DestroyContext(ContextId),
    /// Device closed
    CloseDevice(DeviceId),
}

/// Observable history of a [`SimulatedDevice`]
#[derive(Debug, Default)]
pub struct Journal {
    /// Successful calls in order
    pub calls: Vec<DeviceCall>,
    /// Failed calls in order
    pub failures: Vec<(Operation, DeviceError)>,
    /// Buffers currently queued on any source, head first
    pub queued: Vec<BufferId>,
    /// Samples that finished playing, in playback order
    pub played: Vec<i16>,
    /// Number of polls (processed count and state queries)
    pub polls: usize,
}

impl Journal {
    /// Sizes of all successful fills, in order
    pub fn fill_sizes(&self) -> Vec<usize> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                DeviceCall::Fill { samples, .. } => Some(*samples),
                _ => None,
            })
            .collect()
    }

    /// Number of successful play commands
    pub fn plays(&self) -> usize {
        self.count(|call| matches!(call, DeviceCall::Play(_)))
    }

    /// Number of successful stop commands
    pub fn stops(&self) -> usize {
        self.count(|call| matches!(call, DeviceCall::Stop(_)))
    }

    /// Number of calls matching `predicate`
    pub fn count<F: Fn(&DeviceCall) -> bool>(&self, predicate: F) -> usize {
        self.calls.iter().filter(|call| predicate(call)).count()
    }
}

#[derive(Debug, Default)]
struct SimSource {
    queue: VecDeque<BufferId>,
    /// Leading entries of `queue` that finished playing
    processed: usize,
    /// Samples already consumed from the first unprocessed buffer
    offset: usize,
    state: SourceState,
}

/// Deterministic in-memory audio device
#[derive(Debug)]
pub struct SimulatedDevice {
    samples_per_tick: usize,
    stalled: bool,
    faults: Vec<Fault>,
    calls: HashMap<Operation, usize>,
    next_handle: u32,
    devices: Vec<DeviceId>,
    contexts: Vec<(ContextId, DeviceId)>,
    current: Option<ContextId>,
    sources: HashMap<SourceId, SimSource>,
    buffers: HashMap<BufferId, Vec<i16>>,
    last_error: Option<DeviceError>,
    journal: Arc<Mutex<Journal>>,
}

impl SimulatedDevice {
    /// Create a device consuming [`DEFAULT_SAMPLES_PER_TICK`] samples per poll
    pub fn new() -> Self {
        SimulatedDevice {
            samples_per_tick: DEFAULT_SAMPLES_PER_TICK,
            stalled: false,
            faults: Vec::new(),
            calls: HashMap::new(),
            next_handle: 1,
            devices: Vec::new(),
            contexts: Vec::new(),
            current: None,
            sources: HashMap::new(),
            buffers: HashMap::new(),
            last_error: None,
            journal: Arc::new(Mutex::new(Journal::default())),
        }
    }

    /// Consume `samples` per poll instead of the default
    pub fn with_tick(mut self, samples: usize) -> Self {
        self.samples_per_tick = samples;
        self
    }

    /// Inject a failure
    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.faults.push(fault);
        self
    }

    /// Never advance playback, as a hung device would
    pub fn stalled(mut self) -> Self {
        self.stalled = true;
        self
    }

    /// Shared handle to the call journal
    pub fn journal(&self) -> Arc<Mutex<Journal>> {
        Arc::clone(&self.journal)
    }

    fn next_handle(&mut self) -> u32 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    /// Count a call of `operation` and return the injected fault, if any
    fn injected(&mut self, operation: Operation) -> Option<Fault> {
        let call = self.calls.entry(operation).or_insert(0);
        *call += 1;
        let call = *call;
        self.faults
            .iter()
            .find(|fault| fault.fires(operation, call))
            .copied()
    }

    fn fail<T>(&mut self, operation: Operation, error: DeviceError) -> Result<T, DeviceError> {
        self.last_error = Some(error);
        self.journal.lock().failures.push((operation, error));
        Err(error)
    }

    fn check(&mut self, operation: Operation) -> Result<(), DeviceError> {
        match self.injected(operation) {
            Some(fault) => self.fail(operation, fault.error),
            None => Ok(()),
        }
    }

    fn record(&self, call: DeviceCall) {
        self.journal.lock().calls.push(call);
    }

    fn require_context(&mut self, operation: Operation) -> Result<(), DeviceError> {
        if self.current.is_none() {
            return self.fail(operation, DeviceError::InvalidOperation);
        }
        Ok(())
    }

    fn is_queued(&self, buffer: BufferId) -> bool {
        self.sources
            .values()
            .any(|source| source.queue.contains(&buffer))
    }

    /// Let the source play for one tick of virtual time
    fn advance(&mut self, id: SourceId) {
        if self.stalled {
            return;
        }
        let buffers = &self.buffers;
        let Some(source) = self.sources.get_mut(&id) else {
            return;
        };
        if source.state != SourceState::Playing {
            return;
        }

        let mut journal = self.journal.lock();
        let mut budget = self.samples_per_tick;
        while source.processed < source.queue.len() {
            let data = buffers
                .get(&source.queue[source.processed])
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            let left = data.len() - source.offset;
            let take = budget.min(left);
            journal
                .played
                .extend_from_slice(&data[source.offset..source.offset + take]);
            budget -= take;
            if take < left {
                source.offset += take;
                break;
            }
            source.processed += 1;
            source.offset = 0;
        }

        if source.processed == source.queue.len() {
            source.state = SourceState::Stopped;
        }
    }

    fn sync_queued(&self) {
        let queued = self
            .sources
            .values()
            .flat_map(|source| source.queue.iter().copied())
            .collect();
        self.journal.lock().queued = queued;
    }
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for SimulatedDevice {
    fn open_device(&mut self, _name: Option<&str>) -> Result<DeviceId, ContextError> {
        if self.injected(Operation::OpenDevice).is_some() {
            return Err(ContextError::InvalidDevice);
        }
        let device = DeviceId(self.next_handle());
        self.devices.push(device);
        self.record(DeviceCall::OpenDevice(device));
        Ok(device)
    }

    fn create_context(
        &mut self,
        device: DeviceId,
        _sample_rate_hint: Option<u32>,
    ) -> Result<ContextId, ContextError> {
        if self.injected(Operation::CreateContext).is_some() {
            return Err(ContextError::InvalidValue);
        }
        if !self.devices.contains(&device) {
            return Err(ContextError::InvalidDevice);
        }
        let context = ContextId(self.next_handle());
        self.contexts.push((context, device));
        self.record(DeviceCall::CreateContext(context));
        Ok(context)
    }

    fn make_context_current(&mut self, context: Option<ContextId>) -> Result<(), ContextError> {
        if self.injected(Operation::MakeContextCurrent).is_some() {
            return Err(ContextError::InvalidContext);
        }
        if let Some(context) = context {
            if !self.contexts.iter().any(|(id, _)| *id == context) {
                return Err(ContextError::InvalidContext);
            }
        }
        self.current = context;
        self.record(DeviceCall::MakeContextCurrent(context));
        Ok(())
    }

    fn create_source(&mut self) -> Result<SourceId, DeviceError> {
        self.check(Operation::CreateSource)?;
        self.require_context(Operation::CreateSource)?;
        let source = SourceId(self.next_handle());
        self.sources.insert(source, SimSource::default());
        self.record(DeviceCall::CreateSource(source));
        Ok(source)
    }

    fn create_buffers(&mut self, count: usize) -> Result<Vec<BufferId>, DeviceError> {
        self.check(Operation::CreateBuffers)?;
        self.require_context(Operation::CreateBuffers)?;
        let buffers: Vec<BufferId> = (0..count).map(|_| BufferId(self.next_handle())).collect();
        for buffer in &buffers {
            self.buffers.insert(*buffer, Vec::new());
        }
        self.record(DeviceCall::CreateBuffers(buffers.clone()));
        Ok(buffers)
    }

    fn processed_buffer_count(&mut self, source: SourceId) -> Result<usize, DeviceError> {
        self.check(Operation::ProcessedQuery)?;
        if !self.sources.contains_key(&source) {
            return self.fail(Operation::ProcessedQuery, DeviceError::InvalidName);
        }
        self.journal.lock().polls += 1;
        self.advance(source);
        Ok(self.sources[&source].processed)
    }

    fn unqueue_buffers(
        &mut self,
        source: SourceId,
        count: usize,
    ) -> Result<Vec<BufferId>, DeviceError> {
        self.check(Operation::Unqueue)?;
        let processed = match self.sources.get(&source) {
            Some(slot) => slot.processed,
            None => return self.fail(Operation::Unqueue, DeviceError::InvalidName),
        };
        if count > processed {
            return self.fail(Operation::Unqueue, DeviceError::InvalidValue);
        }

        let slot = self
            .sources
            .get_mut(&source)
            .ok_or(DeviceError::InvalidName)?;
        let unqueued: Vec<BufferId> = slot.queue.drain(..count).collect();
        slot.processed -= count;

        self.sync_queued();
        self.record(DeviceCall::Unqueue(unqueued.clone()));
        Ok(unqueued)
    }

    fn fill_buffer(
        &mut self,
        buffer: BufferId,
        format: SampleFormat,
        data: &[i16],
        sample_rate: u32,
    ) -> Result<(), DeviceError> {
        self.check(Operation::Fill)?;
        if !self.buffers.contains_key(&buffer) {
            return self.fail(Operation::Fill, DeviceError::InvalidName);
        }
        if format.bytes_per_sample() != 2 {
            return self.fail(Operation::Fill, DeviceError::InvalidEnum);
        }
        if sample_rate == 0 {
            return self.fail(Operation::Fill, DeviceError::InvalidValue);
        }
        if self.is_queued(buffer) {
            return self.fail(Operation::Fill, DeviceError::InvalidOperation);
        }

        if let Some(storage) = self.buffers.get_mut(&buffer) {
            storage.clear();
            storage.extend_from_slice(data);
        }
        self.record(DeviceCall::Fill {
            buffer,
            samples: data.len(),
        });
        Ok(())
    }

    fn queue_buffers(&mut self, source: SourceId, buffers: &[BufferId]) -> Result<(), DeviceError> {
        self.check(Operation::Queue)?;
        if !self.sources.contains_key(&source)
            || buffers.iter().any(|b| !self.buffers.contains_key(b))
        {
            return self.fail(Operation::Queue, DeviceError::InvalidName);
        }
        if buffers.iter().any(|b| self.is_queued(*b)) {
            return self.fail(Operation::Queue, DeviceError::InvalidOperation);
        }

        if let Some(slot) = self.sources.get_mut(&source) {
            slot.queue.extend(buffers.iter().copied());
        }
        self.sync_queued();
        for buffer in buffers {
            self.record(DeviceCall::Queue(*buffer));
        }
        Ok(())
    }

    fn play(&mut self, source: SourceId) -> Result<(), DeviceError> {
        self.check(Operation::Play)?;
        let Some(slot) = self.sources.get_mut(&source) else {
            return self.fail(Operation::Play, DeviceError::InvalidName);
        };
        match slot.state {
            SourceState::Playing => {}
            SourceState::Paused => slot.state = SourceState::Playing,
            SourceState::Initial | SourceState::Stopped => {
                // Restarting rewinds to the head of the queue
                slot.processed = 0;
                slot.offset = 0;
                slot.state = if slot.queue.is_empty() {
                    SourceState::Stopped
                } else {
                    SourceState::Playing
                };
            }
        }
        self.record(DeviceCall::Play(source));
        Ok(())
    }

    fn stop(&mut self, source: SourceId) -> Result<(), DeviceError> {
        self.check(Operation::Stop)?;
        let Some(slot) = self.sources.get_mut(&source) else {
            return self.fail(Operation::Stop, DeviceError::InvalidName);
        };
        // Stopping from any state marks the whole queue processed
        slot.processed = slot.queue.len();
        slot.offset = 0;
        slot.state = SourceState::Stopped;
        self.record(DeviceCall::Stop(source));
        Ok(())
    }

    fn source_state(&mut self, source: SourceId) -> Result<SourceState, DeviceError> {
        self.check(Operation::SourceState)?;
        if !self.sources.contains_key(&source) {
            return self.fail(Operation::SourceState, DeviceError::InvalidName);
        }
        self.journal.lock().polls += 1;
        self.advance(source);
        Ok(self.sources[&source].state)
    }

    fn delete_buffers(&mut self, buffers: &[BufferId]) -> Result<(), DeviceError> {
        if buffers.iter().any(|b| !self.buffers.contains_key(b)) {
            return Err(DeviceError::InvalidName);
        }
        if buffers.iter().any(|b| self.is_queued(*b)) {
            return Err(DeviceError::InvalidOperation);
        }
        for buffer in buffers {
            self.buffers.remove(buffer);
        }
        self.record(DeviceCall::DeleteBuffers(buffers.to_vec()));
        Ok(())
    }

    fn delete_source(&mut self, source: SourceId) -> Result<(), DeviceError> {
        if self.sources.remove(&source).is_none() {
            return Err(DeviceError::InvalidName);
        }
        self.sync_queued();
        self.record(DeviceCall::DeleteSource(source));
        Ok(())
    }

    fn destroy_context(&mut self, context: ContextId) -> Result<(), ContextError> {
        if self.current == Some(context) {
            return Err(ContextError::InvalidContext);
        }
        let before = self.contexts.len();
        self.contexts.retain(|(id, _)| *id != context);
        if self.contexts.len() == before {
            return Err(ContextError::InvalidContext);
        }
        self.record(DeviceCall::DestroyContext(context));
        Ok(())
    }

    fn close_device(&mut self, device: DeviceId) -> Result<(), ContextError> {
        if !self.devices.contains(&device) || self.contexts.iter().any(|(_, d)| *d == device) {
            return Err(ContextError::InvalidDevice);
        }
        self.devices.retain(|d| *d != device);
        self.record(DeviceCall::CloseDevice(device));
        Ok(())
    }

    fn last_error(&mut self) -> Option<DeviceError> {
        self.last_error.take()
    }
}
