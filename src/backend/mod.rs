//! Audio device abstraction
//!
//! The [`AudioBackend`] trait is the seam between the streaming logic and an
//! actual output device. It models a queue-based playback API: a device is
//! opened, a context is created on it and made current, then sources and
//! buffers are created inside that context. Buffers are filled with sample
//! data and queued on a source, which plays them in order on the device's own
//! clock and reports how many it has finished ("processed").
//!
//! Two implementations ship with the crate:
//! - [`SimulatedDevice`]: deterministic software device on a virtual clock,
//!   with fault injection
//! - `RodioDevice` (feature `streaming`): plays through the system output

pub mod simulated;

#[cfg(feature = "streaming")]
pub mod rodio_device;

#[cfg(feature = "streaming")]
pub use rodio_device::RodioDevice;
pub use simulated::{DeviceCall, Fault, Journal, Operation, SimulatedDevice};

use std::fmt;

macro_rules! handle_type {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "#{}"), self.0)
            }
        }
    };
}

handle_type!(
    /// Opaque handle of an opened output device
    DeviceId,
    "device"
);
handle_type!(
    /// Opaque handle of a processing context bound to a device
    ContextId,
    "context"
);
handle_type!(
    /// Opaque handle of a playback source
    SourceId,
    "source"
);
handle_type!(
    /// Opaque handle of a sample buffer
    BufferId,
    "buffer"
);

/// Playback state of a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceState {
    /// Created, never played
    #[default]
    Initial,
    /// Consuming queued buffers
    Playing,
    /// Paused by request (keeps position)
    Paused,
    /// Ran out of queued audio or was stopped
    Stopped,
}

/// Layout of sample data handed to a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// 8-bit mono
    Mono8,
    /// 16-bit signed mono
    Mono16,
    /// 8-bit interleaved stereo
    Stereo8,
    /// 16-bit signed interleaved stereo
    Stereo16,
}

impl SampleFormat {
    /// Number of interleaved channels
    pub fn channels(self) -> u16 {
        match self {
            SampleFormat::Mono8 | SampleFormat::Mono16 => 1,
            SampleFormat::Stereo8 | SampleFormat::Stereo16 => 2,
        }
    }

    /// Size of one sample of one channel in bytes
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::Mono8 | SampleFormat::Stereo8 => 1,
            SampleFormat::Mono16 | SampleFormat::Stereo16 => 2,
        }
    }
}

/// Source/buffer level error codes
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceError {
    /// A handle does not name a live object
    #[error("Invalid object ID")]
    InvalidName,
    /// An enumerated argument is not accepted
    #[error("Invalid enumeration value")]
    InvalidEnum,
    /// A numeric argument is out of range
    #[error("Invalid value")]
    InvalidValue,
    /// The request is not allowed in the current state
    #[error("Invalid operation")]
    InvalidOperation,
    /// The device could not allocate storage
    #[error("Not enough memory for the audio device")]
    OutOfMemory,
    /// A code this crate does not know about
    #[error("Unrecognized error code {0:#06x}")]
    Unknown(i32),
}

/// Device/context level error codes
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    /// An enumerated argument is not accepted
    #[error("Invalid enumeration value")]
    InvalidEnum,
    /// A numeric argument is out of range
    #[error("Invalid value")]
    InvalidValue,
    /// The device handle is not usable
    #[error("Invalid device")]
    InvalidDevice,
    /// The context handle is not usable
    #[error("Invalid context")]
    InvalidContext,
    /// The device could not allocate storage
    #[error("Not enough memory for the audio device")]
    OutOfMemory,
    /// A code this crate does not know about
    #[error("Unrecognized error code {0:#06x}")]
    Unknown(i32),
}

/// Queue-based audio output device
///
/// Operations that act on sources and buffers require a current context.
/// Every failure is returned directly and also remembered as the sticky
/// [`last_error`](AudioBackend::last_error) until it is read.
pub trait AudioBackend {
    /// Open an output device, the default one when `name` is `None`
    fn open_device(&mut self, name: Option<&str>) -> Result<DeviceId, ContextError>;

    /// Create a context on `device`, optionally requesting an output rate
    fn create_context(
        &mut self,
        device: DeviceId,
        sample_rate_hint: Option<u32>,
    ) -> Result<ContextId, ContextError>;

    /// Make `context` current, or clear the current context with `None`
    fn make_context_current(&mut self, context: Option<ContextId>) -> Result<(), ContextError>;

    /// Create a playback source in the current context
    fn create_source(&mut self) -> Result<SourceId, DeviceError>;

    /// Create `count` empty buffers in the current context
    fn create_buffers(&mut self, count: usize) -> Result<Vec<BufferId>, DeviceError>;

    /// Number of queued buffers the source has finished playing
    fn processed_buffer_count(&mut self, source: SourceId) -> Result<usize, DeviceError>;

    /// Remove `count` processed buffers from the head of the source's queue
    fn unqueue_buffers(
        &mut self,
        source: SourceId,
        count: usize,
    ) -> Result<Vec<BufferId>, DeviceError>;

    /// Replace the contents of `buffer`; the buffer must not be queued
    fn fill_buffer(
        &mut self,
        buffer: BufferId,
        format: SampleFormat,
        data: &[i16],
        sample_rate: u32,
    ) -> Result<(), DeviceError>;

    /// Append buffers to the tail of the source's queue
    fn queue_buffers(&mut self, source: SourceId, buffers: &[BufferId]) -> Result<(), DeviceError>;

    /// Start or resume playback
    fn play(&mut self, source: SourceId) -> Result<(), DeviceError>;

    /// Stop playback; every queued buffer becomes processed
    fn stop(&mut self, source: SourceId) -> Result<(), DeviceError>;

    /// Current playback state of the source
    fn source_state(&mut self, source: SourceId) -> Result<SourceState, DeviceError>;

    /// Delete buffers that are not queued anywhere
    fn delete_buffers(&mut self, buffers: &[BufferId]) -> Result<(), DeviceError>;

    /// Delete a source, detaching whatever it still holds
    fn delete_source(&mut self, source: SourceId) -> Result<(), DeviceError>;

    /// Destroy a context that is not current
    fn destroy_context(&mut self, context: ContextId) -> Result<(), ContextError>;

    /// Close an opened device
    fn close_device(&mut self, device: DeviceId) -> Result<(), ContextError>;

    /// Return and clear the most recent source/buffer level error
    fn last_error(&mut self) -> Option<DeviceError>;
}

impl<B: AudioBackend + ?Sized> AudioBackend for &mut B {
    fn open_device(&mut self, name: Option<&str>) -> Result<DeviceId, ContextError> {
        (**self).open_device(name)
    }

    fn create_context(
        &mut self,
        device: DeviceId,
        sample_rate_hint: Option<u32>,
    ) -> Result<ContextId, ContextError> {
        (**self).create_context(device, sample_rate_hint)
    }

    fn make_context_current(&mut self, context: Option<ContextId>) -> Result<(), ContextError> {
        (**self).make_context_current(context)
    }

    fn create_source(&mut self) -> Result<SourceId, DeviceError> {
        (**self).create_source()
    }

    fn create_buffers(&mut self, count: usize) -> Result<Vec<BufferId>, DeviceError> {
        (**self).create_buffers(count)
    }

    fn processed_buffer_count(&mut self, source: SourceId) -> Result<usize, DeviceError> {
        (**self).processed_buffer_count(source)
    }

    fn unqueue_buffers(
        &mut self,
        source: SourceId,
        count: usize,
    ) -> Result<Vec<BufferId>, DeviceError> {
        (**self).unqueue_buffers(source, count)
    }

    fn fill_buffer(
        &mut self,
        buffer: BufferId,
        format: SampleFormat,
        data: &[i16],
        sample_rate: u32,
    ) -> Result<(), DeviceError> {
        (**self).fill_buffer(buffer, format, data, sample_rate)
    }

    fn queue_buffers(&mut self, source: SourceId, buffers: &[BufferId]) -> Result<(), DeviceError> {
        (**self).queue_buffers(source, buffers)
    }

    fn play(&mut self, source: SourceId) -> Result<(), DeviceError> {
        (**self).play(source)
    }

    fn stop(&mut self, source: SourceId) -> Result<(), DeviceError> {
        (**self).stop(source)
    }

    fn source_state(&mut self, source: SourceId) -> Result<SourceState, DeviceError> {
        (**self).source_state(source)
    }

    fn delete_buffers(&mut self, buffers: &[BufferId]) -> Result<(), DeviceError> {
        (**self).delete_buffers(buffers)
    }

    fn delete_source(&mut self, source: SourceId) -> Result<(), DeviceError> {
        (**self).delete_source(source)
    }

    fn destroy_context(&mut self, context: ContextId) -> Result<(), ContextError> {
        (**self).destroy_context(context)
    }

    fn close_device(&mut self, device: DeviceId) -> Result<(), ContextError> {
        (**self).close_device(device)
    }

    fn last_error(&mut self) -> Option<DeviceError> {
        (**self).last_error()
    }
}
