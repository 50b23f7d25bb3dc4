//! Buffered streaming playback
//!
//! A small pool of device buffers is cycled between three places: the free
//! queue, the scheduler (while a buffer is being filled) and the source's
//! playback queue. The [`StreamScheduler`] keeps the source fed from an
//! in-memory sample source until every sample has been played.

pub mod free_queue;
pub mod scheduler;

pub use free_queue::{FreeBufferQueue, QueueError};
pub use scheduler::{StreamPhase, StreamReport, StreamScheduler};

use crate::{Result, ToneStreamError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default sample rate (44.1 kHz)
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Default number of buffers cycled through the source
pub const DEFAULT_BUFFER_COUNT: usize = 3;

/// Default samples per buffer fill
pub const DEFAULT_CHUNK_SIZE: usize = 2048;

/// Configuration for streaming playback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Number of buffers in the pool
    pub buffer_count: usize,

    /// Samples written into a buffer per fill
    /// Typical: 1024-4096 samples (23ms-93ms at 44.1kHz)
    pub chunk_size: usize,

    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Sleep between polls in microseconds; 0 polls as fast as the loop spins
    pub poll_backoff_micros: u64,

    /// Give up after this many milliseconds without any progress
    pub stall_timeout_ms: Option<u64>,
}

impl StreamConfig {
    /// Create a configuration with no backoff and no stall timeout
    pub fn new(buffer_count: usize, chunk_size: usize, sample_rate: u32) -> Self {
        StreamConfig {
            buffer_count,
            chunk_size,
            sample_rate,
            poll_backoff_micros: 0,
            stall_timeout_ms: None,
        }
    }

    /// Two buffers: one playing while the other is refilled
    pub fn double_buffered(sample_rate: u32) -> Self {
        Self::new(2, DEFAULT_CHUNK_SIZE, sample_rate)
    }

    /// Three buffers, one extra in flight to ride out slow polls
    pub fn triple_buffered(sample_rate: u32) -> Self {
        Self::new(DEFAULT_BUFFER_COUNT, DEFAULT_CHUNK_SIZE, sample_rate)
    }

    /// Sleep `backoff` between polls
    pub fn with_poll_backoff(mut self, backoff: Duration) -> Self {
        self.poll_backoff_micros = backoff.as_micros().min(u64::MAX as u128) as u64;
        self
    }

    /// Stop playback after `timeout` without progress
    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout_ms = Some(timeout.as_millis().min(u64::MAX as u128) as u64);
        self
    }

    /// Poll backoff, if any
    pub fn poll_backoff(&self) -> Option<Duration> {
        (self.poll_backoff_micros > 0).then(|| Duration::from_micros(self.poll_backoff_micros))
    }

    /// Stall timeout, if any
    pub fn stall_timeout(&self) -> Option<Duration> {
        self.stall_timeout_ms.map(Duration::from_millis)
    }

    /// Audio held by the whole pool in milliseconds
    pub fn latency_ms(&self) -> f32 {
        ((self.buffer_count * self.chunk_size) as f32 / self.sample_rate as f32) * 1000.0
    }

    /// Check that the configuration can drive a scheduler
    pub fn validate(&self) -> Result<()> {
        if self.buffer_count == 0 {
            return Err(ToneStreamError::ConfigError(
                "buffer count must be greater than 0".into(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(ToneStreamError::ConfigError(
                "chunk size must be greater than 0".into(),
            ));
        }
        if self.sample_rate == 0 {
            return Err(ToneStreamError::ConfigError(
                "sample rate must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::triple_buffered(DEFAULT_SAMPLE_RATE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_config_latency() {
        let config = StreamConfig::triple_buffered(44100);
        let latency = config.latency_ms();
        assert!(latency > 139.0 && latency < 140.0, "latency {latency}");
    }

    #[test]
    fn test_defaults() {
        let config = StreamConfig::default();
        assert_eq!(config.buffer_count, 3);
        assert_eq!(config.chunk_size, 2048);
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.poll_backoff(), None);
        assert_eq!(config.stall_timeout(), None);
    }

    #[test]
    fn test_builders() {
        let config = StreamConfig::double_buffered(48000)
            .with_poll_backoff(Duration::from_micros(250))
            .with_stall_timeout(Duration::from_secs(2));
        assert_eq!(config.buffer_count, 2);
        assert_eq!(config.poll_backoff(), Some(Duration::from_micros(250)));
        assert_eq!(config.stall_timeout(), Some(Duration::from_millis(2000)));
    }

    #[test]
    fn test_validate() {
        assert!(StreamConfig::default().validate().is_ok());
        assert!(StreamConfig::new(0, 2048, 44100).validate().is_err());
        assert!(StreamConfig::new(3, 0, 44100).validate().is_err());
        assert!(StreamConfig::new(3, 2048, 0).validate().is_err());
    }
}
