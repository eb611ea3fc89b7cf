use std::path::Path;

use serde::Serialize;

/// Header facts of a generated WAV file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AudioSummary {
    pub sample_rate: u32,
    pub channels: u16,
    pub duration_ms: u64,
}

/// Read the WAV header at `path`.
pub fn inspect(path: &Path) -> Result<AudioSummary, hound::Error> {
    let reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let frames = reader.duration() as u64;
    let duration_ms = if spec.sample_rate == 0 {
        0
    } else {
        frames * 1000 / spec.sample_rate as u64
    };
    Ok(AudioSummary {
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        duration_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inspect_reports_duration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..8_000 {
            writer.write_sample(((i % 100) as i16) * 100).unwrap();
        }
        writer.finalize().unwrap();

        let summary = inspect(&path).unwrap();
        assert_eq!(summary.sample_rate, 16_000);
        assert_eq!(summary.channels, 1);
        assert_eq!(summary.duration_ms, 500);
    }

    #[test]
    fn test_inspect_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.wav");
        std::fs::write(&path, b"definitely not audio").unwrap();
        assert!(inspect(&path).is_err());
    }

    #[test]
    fn test_fake_artifact_is_valid_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("silence.wav");
        std::fs::write(&path, crate::remote::fake::silent_wav()).unwrap();
        assert_eq!(inspect(&path).unwrap().duration_ms, 10);
    }
}
