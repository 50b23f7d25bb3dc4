//! Sine tone generation and buffered streaming playback
//!
//! Generates a sine tone and plays it through a small pool of device buffers
//! that are cycled between "being filled", "queued on the source" and
//! "processed" while the device plays on its own clock.
//!
//! # Features
//! - Deterministic sine generation into 16-bit samples
//! - Streaming scheduler that keeps a source fed from a fixed buffer pool
//! - Device sessions with ordered setup and reverse-order teardown
//! - One-line diagnostics for device and context errors
//! - Simulated device with a virtual clock and fault injection
//!
//! # Crate feature flags
//! - `streaming` (opt-in): Real-time audio output (enables optional `rodio` dep)
//! - `export-wav` (opt-in): WAV export of generated tones (enables optional `hound` dep)
//!
//! # Quick start
//! ```no_run
//! use tone_stream::backend::SimulatedDevice;
//! use tone_stream::{PlaybackSession, SessionConfig};
//!
//! let config = SessionConfig::default();
//! let samples = config.tone.render();
//! let mut diagnostics = std::io::stderr();
//! let mut session = PlaybackSession::open(SimulatedDevice::new(), &config, &mut diagnostics)?;
//! let report = session.stream(&samples, &config.stream, std::io::stderr())?;
//! assert!(report.completed);
//! # Ok::<(), tone_stream::ToneStreamError>(())
//! ```

#![warn(missing_docs)]

pub mod backend; // Device abstraction and implementations
pub mod config; // Session configuration
pub mod diagnostics; // Error reporting
#[cfg(feature = "export-wav")]
pub mod export; // WAV export
pub mod session; // Device session lifecycle
pub mod streaming; // Buffered streaming playback
pub mod tone; // Sine generation

use backend::{ContextError, DeviceError};
use session::SessionError;
use streaming::QueueError;

/// Error types for tone generation and playback
#[derive(thiserror::Error, Debug)]
pub enum ToneStreamError {
    /// Source/buffer level device error
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    /// Device/context level error
    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    /// Free buffer queue misuse
    #[error("Buffer queue error: {0}")]
    Queue(#[from] QueueError),

    /// Session setup failure
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// IO error from filesystem or device
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed configuration file
    #[error("Configuration parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error writing audio file
    #[cfg(feature = "export-wav")]
    #[error("Audio file write error: {0}")]
    Export(#[from] hound::Error),
}

/// Result type for tone generation and playback
pub type Result<T> = std::result::Result<T, ToneStreamError>;

// Public API exports
pub use backend::{AudioBackend, SimulatedDevice};
#[cfg(feature = "streaming")]
pub use backend::RodioDevice;
pub use config::SessionConfig;
pub use session::PlaybackSession;
pub use streaming::{StreamConfig, StreamReport, StreamScheduler};
pub use tone::{generate_sine, ToneConfig};
