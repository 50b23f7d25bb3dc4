//! Sine tone generation
//!
//! Produces quantized 16-bit mono samples for a single-frequency tone. The
//! generator writes into caller-provided storage and never allocates, so the
//! same routine serves both whole-tone rendering and fixed-capacity buffers.

use crate::{Result, ToneStreamError};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::io::Write;

/// Default tone pitch (A4)
pub const DEFAULT_PITCH_HZ: f32 = 440.0;

/// Default tone length in seconds
pub const DEFAULT_DURATION_SECS: f32 = 5.0;

/// Longest tone that will be rendered, in samples (about 100 minutes at 44.1 kHz)
pub const MAX_TONE_SAMPLES: usize = 1 << 28;

/// Number of samples needed for `duration` seconds at `sample_rate`.
///
/// Negative, NaN and infinite durations yield zero.
pub fn samples_for_duration(sample_rate: u32, duration: f32) -> usize {
    let count = (duration as f64 * sample_rate as f64).round();
    if count.is_finite() && count > 0.0 {
        count as usize
    } else {
        0
    }
}

/// Fill `buffer` with a sine wave of the given pitch.
///
/// Writes `min(round(duration * sample_rate), buffer.len())` samples, where
/// sample `i` is `i16::MAX * sin(2π · pitch · i / sample_rate)` rounded to the
/// nearest integer, and returns the number written. A request longer than the
/// buffer is clamped to its capacity. Without a buffer nothing is written and
/// the result is 0.
///
/// # Arguments
///
/// * `buffer` - Destination samples; its length is the capacity
/// * `sample_rate` - Output sample rate in Hz
/// * `pitch` - Tone frequency in Hz
/// * `duration` - Tone length in seconds
///
/// # Example
///
/// ```
/// use tone_stream::tone::generate_sine;
///
/// let mut samples = vec![0i16; 44_100];
/// assert_eq!(generate_sine(Some(&mut samples), 44_100, 440.0, 2.0), 44_100);
/// assert_eq!(generate_sine(None, 44_100, 440.0, 1.0), 0);
/// ```
pub fn generate_sine(
    buffer: Option<&mut [i16]>,
    sample_rate: u32,
    pitch: f32,
    duration: f32,
) -> usize {
    let Some(buffer) = buffer else {
        return 0;
    };
    if sample_rate == 0 {
        return 0;
    }

    let count = samples_for_duration(sample_rate, duration).min(buffer.len());
    let angular = 2.0 * PI * pitch as f64;
    let peak = i16::MAX as f64;

    for (i, sample) in buffer[..count].iter_mut().enumerate() {
        let t = i as f64 / sample_rate as f64;
        *sample = (peak * (angular * t).sin()).round() as i16;
    }

    count
}

/// Parameters of a generated tone
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToneConfig {
    /// Tone frequency in Hz
    pub pitch_hz: f32,
    /// Tone length in seconds
    pub duration_secs: f32,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl ToneConfig {
    /// Create a tone description
    pub fn new(pitch_hz: f32, duration_secs: f32, sample_rate: u32) -> Self {
        ToneConfig {
            pitch_hz,
            duration_secs,
            sample_rate,
        }
    }

    /// Total samples this tone occupies
    pub fn sample_count(&self) -> usize {
        samples_for_duration(self.sample_rate, self.duration_secs)
    }

    /// Check that the tone can be rendered
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(ToneStreamError::ConfigError(
                "tone sample rate must be greater than 0".into(),
            ));
        }
        if !self.pitch_hz.is_finite() || self.pitch_hz < 0.0 {
            return Err(ToneStreamError::ConfigError(format!(
                "tone pitch {} Hz is not a usable frequency",
                self.pitch_hz
            )));
        }
        if !self.duration_secs.is_finite() || self.duration_secs < 0.0 {
            return Err(ToneStreamError::ConfigError(format!(
                "tone duration {} s is not a usable length",
                self.duration_secs
            )));
        }
        if self.sample_count() > MAX_TONE_SAMPLES {
            return Err(ToneStreamError::ConfigError(format!(
                "tone of {} s at {} Hz exceeds {} samples",
                self.duration_secs, self.sample_rate, MAX_TONE_SAMPLES
            )));
        }
        Ok(())
    }

    /// Render the whole tone into a new vector
    pub fn render(&self) -> Vec<i16> {
        let mut samples = vec![0i16; self.sample_count()];
        let written = generate_sine(
            Some(&mut samples),
            self.sample_rate,
            self.pitch_hz,
            self.duration_secs,
        );
        samples.truncate(written);
        samples
    }
}

impl Default for ToneConfig {
    fn default() -> Self {
        ToneConfig {
            pitch_hz: DEFAULT_PITCH_HZ,
            duration_secs: DEFAULT_DURATION_SECS,
            sample_rate: crate::streaming::DEFAULT_SAMPLE_RATE,
        }
    }
}

/// Generate `tone` into a sample source of exactly `capacity` samples.
///
/// A generator shortfall (fewer samples than `capacity`) means the source
/// cannot be trusted: one diagnostic line is written to `diagnostics` and an
/// empty source is returned, so nothing gets played.
pub fn prepare_samples<W: Write + ?Sized>(
    tone: &ToneConfig,
    capacity: usize,
    diagnostics: &mut W,
) -> Vec<i16> {
    let mut samples = vec![0i16; capacity];
    let written = generate_sine(
        Some(&mut samples),
        tone.sample_rate,
        tone.pitch_hz,
        tone.duration_secs,
    );

    if written < capacity {
        tracing::warn!(written, capacity, "sine generation fell short");
        crate::diagnostics::print_error_message(
            diagnostics,
            Some("Error generating sine wave for sample buffer"),
            None,
            None,
        )
        .ok();
        return Vec::new();
    }

    samples
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_one_second_fits_exactly() {
        let mut buffer = vec![0i16; 44_100];
        let written = generate_sine(Some(&mut buffer), 44_100, 440.0, 1.0);
        assert_eq!(written, 44_100);
    }

    #[test]
    fn test_long_request_is_clamped() {
        let mut buffer = vec![0i16; 44_100];
        let written = generate_sine(Some(&mut buffer), 44_100, 440.0, 2.0);
        assert_eq!(written, 44_100, "two seconds must clamp to capacity");
    }

    #[test]
    fn test_missing_buffer_writes_nothing() {
        assert_eq!(generate_sine(None, 44_100, 440.0, 1.0), 0);
    }

    #[test]
    fn test_samples_follow_sine() {
        let rate = 8_000;
        let pitch = 440.0;
        let mut buffer = vec![0i16; 800];
        let written = generate_sine(Some(&mut buffer), rate, pitch, 0.1);
        assert_eq!(written, 800);

        for (i, &sample) in buffer.iter().enumerate() {
            let expected =
                (i16::MAX as f64 * (2.0 * std::f64::consts::PI * 440.0 * i as f64 / rate as f64).sin())
                    .round();
            assert!(
                (sample as f64 - expected).abs() <= 1.0,
                "sample {i}: {sample} vs {expected}"
            );
        }
    }

    #[test]
    fn test_peak_uses_full_range() {
        // 11025 Hz at 44.1 kHz puts sample 1 exactly on the crest
        let mut buffer = vec![0i16; 4];
        generate_sine(Some(&mut buffer), 44_100, 11_025.0, 1.0);
        assert_eq!(buffer[0], 0);
        assert!(buffer[1] >= i16::MAX - 1);
        assert!(buffer[3] <= -(i16::MAX - 1));
    }

    #[test]
    fn test_short_request_leaves_tail_untouched() {
        let mut buffer = vec![7i16; 100];
        let written = generate_sine(Some(&mut buffer), 1_000, 50.0, 0.01);
        assert_eq!(written, 10);
        assert!(buffer[10..].iter().all(|&s| s == 7));
    }

    #[test]
    fn test_deterministic() {
        let tone = ToneConfig::new(523.25, 0.25, 22_050);
        assert_eq!(tone.render(), tone.render());
    }

    #[test]
    fn test_sample_count_rounds() {
        let tone = ToneConfig::new(440.0, 0.5, 44_100);
        assert_eq!(tone.sample_count(), 22_050);
        assert_eq!(samples_for_duration(44_100, -1.0), 0);
        assert_eq!(samples_for_duration(44_100, f32::NAN), 0);
    }

    #[test]
    fn test_render_matches_generator() {
        let tone = ToneConfig::new(440.0, 0.01, 44_100);
        let rendered = tone.render();
        assert_eq!(rendered.len(), 441);
        let peak = rendered.iter().map(|s| s.unsigned_abs()).max().unwrap();
        assert_relative_eq!(peak as f32 / i16::MAX as f32, 1.0, epsilon = 0.01);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(ToneConfig::new(440.0, 1.0, 0).validate().is_err());
        assert!(ToneConfig::new(f32::INFINITY, 1.0, 44_100).validate().is_err());
        assert!(ToneConfig::new(440.0, -2.0, 44_100).validate().is_err());
        assert!(ToneConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_oversized_tone() {
        let err = ToneConfig::new(440.0, 1e12, 44_100).validate().unwrap_err();
        assert!(matches!(err, ToneStreamError::ConfigError(_)));

        let limit = MAX_TONE_SAMPLES as f32 / 44_100.0;
        assert!(ToneConfig::new(440.0, limit * 0.99, 44_100).validate().is_ok());
        assert!(ToneConfig::new(440.0, limit * 1.01, 44_100).validate().is_err());
    }

    #[test]
    fn test_prepare_samples_shortfall_gives_empty_source() {
        let tone = ToneConfig::new(440.0, 0.5, 1_000);
        let mut diag = Vec::new();
        let samples = prepare_samples(&tone, 1_000, &mut diag);
        assert!(samples.is_empty());
        let text = String::from_utf8(diag).unwrap();
        assert_eq!(text, "Error generating sine wave for sample buffer!\n");
    }

    #[test]
    fn test_prepare_samples_exact_fit() {
        let tone = ToneConfig::new(440.0, 0.5, 1_000);
        let mut diag = Vec::new();
        let samples = prepare_samples(&tone, 500, &mut diag);
        assert_eq!(samples.len(), 500);
        assert!(diag.is_empty());
    }
}
