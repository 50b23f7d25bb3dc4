//! WAV export of generated tones
//!
//! Writes the same 16-bit samples that would be streamed to the device, so a
//! run can be checked by ear or in an editor without an output device.

use crate::Result;
use std::path::Path;

/// Write 16-bit samples as a WAV file
///
/// Mono samples can be duplicated into both channels of a stereo file with
/// `channels = 2`.
pub fn write_wav<P: AsRef<Path>>(
    path: P,
    samples: &[i16],
    sample_rate: u32,
    channels: u16,
) -> Result<()> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path.as_ref(), spec)?;
    for &sample in samples {
        for _ in 0..channels {
            writer.write_sample(sample)?;
        }
    }
    writer.finalize()?;

    tracing::info!(
        path = %path.as_ref().display(),
        samples = samples.len(),
        sample_rate,
        "tone written to WAV"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tone::ToneConfig;

    #[test]
    fn test_mono_export_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let samples = ToneConfig::new(440.0, 0.1, 8000).render();

        write_wav(&path, &samples, 8000, 1).unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 8000);
        assert_eq!(reader.spec().channels, 1);
        let read: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(read, samples);
    }

    #[test]
    fn test_stereo_duplicates_samples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");

        write_wav(&path, &[1, -2, 3], 44_100, 2).unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        let read: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(read, vec![1, 1, -2, -2, 3, 3]);
    }
}
