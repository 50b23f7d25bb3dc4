//! Session configuration
//!
//! A [`SessionConfig`] gathers the output device name, the tone to render
//! and the streaming parameters. It can be loaded from a JSON file; every
//! field is optional and falls back to its default.
//!
//! ```json
//! {
//!   "device": null,
//!   "tone": { "pitch_hz": 440.0, "duration_secs": 5.0, "sample_rate": 44100 },
//!   "stream": { "buffer_count": 3, "chunk_size": 2048, "sample_rate": 44100 }
//! }
//! ```

use crate::streaming::StreamConfig;
use crate::tone::ToneConfig;
use crate::{Result, ToneStreamError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Everything needed to open a session and play a tone through it
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Output device name; `None` opens the default device
    pub device: Option<String>,
    /// Tone to render
    pub tone: ToneConfig,
    /// Streaming parameters
    pub stream: StreamConfig,
}

impl SessionConfig {
    /// Parse a configuration from JSON text
    pub fn from_json(text: &str) -> Result<Self> {
        let config: SessionConfig = serde_json::from_str(text)?;
        Ok(config)
    }

    /// Read and parse a JSON configuration file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_json(&text)?;
        tracing::debug!(path = %path.as_ref().display(), "configuration loaded");
        Ok(config)
    }

    /// Serialize to pretty-printed JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Use `sample_rate` for both the tone and the stream
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.tone.sample_rate = sample_rate;
        self.stream.sample_rate = sample_rate;
        self
    }

    /// Check the tone and stream settings and that they agree on the rate
    pub fn validate(&self) -> Result<()> {
        self.tone.validate()?;
        self.stream.validate()?;
        if self.tone.sample_rate != self.stream.sample_rate {
            return Err(ToneStreamError::ConfigError(format!(
                "tone is rendered at {} Hz but streamed at {} Hz",
                self.tone.sample_rate, self.stream.sample_rate
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_empty_json_gives_defaults() {
        let config = SessionConfig::from_json("{}").unwrap();
        assert_eq!(config, SessionConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json() {
        let config = SessionConfig::from_json(
            r#"{ "device": "USB Audio", "tone": { "pitch_hz": 880.0 }, "stream": { "chunk_size": 1024 } }"#,
        )
        .unwrap();
        assert_eq!(config.device.as_deref(), Some("USB Audio"));
        assert_relative_eq!(config.tone.pitch_hz, 880.0);
        assert_relative_eq!(config.tone.duration_secs, 5.0);
        assert_eq!(config.stream.chunk_size, 1024);
        assert_eq!(config.stream.buffer_count, 3);
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        let err = SessionConfig::from_json("{ \"stream\": 3 }").unwrap_err();
        assert!(matches!(err, ToneStreamError::Json(_)));
    }

    #[test]
    fn test_rate_mismatch_rejected() {
        let mut config = SessionConfig::default();
        config.stream.sample_rate = 48_000;
        assert!(config.validate().is_err());
        assert!(config.with_sample_rate(48_000).validate().is_ok());
    }

    #[test]
    fn test_oversized_tone_rejected() {
        let mut config = SessionConfig::default();
        config.tone.duration_secs = 1e12;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let config = SessionConfig {
            device: Some("default".into()),
            ..SessionConfig::default()
        }
        .with_sample_rate(22_050);
        std::fs::write(&path, config.to_json().unwrap()).unwrap();

        assert_eq!(SessionConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = SessionConfig::load("/nonexistent/session.json").unwrap_err();
        assert!(matches!(err, ToneStreamError::Io(_)));
    }
}
