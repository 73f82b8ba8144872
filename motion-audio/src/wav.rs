//! PCM16 WAV output

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use hound::{SampleFormat, WavSpec, WavWriter};

use crate::types::{AudioConfig, AudioError};

/// Write interleaved PCM16 samples to `path`
pub fn write_wav(path: impl AsRef<Path>, samples: &[i16], config: AudioConfig) -> Result<(), AudioError> {
    write_wav_file(File::create(path.as_ref()).map_err(hound::Error::IoError)?, samples, config)
}

/// Write interleaved PCM16 samples into an open file
pub fn write_wav_file(file: File, samples: &[i16], config: AudioConfig) -> Result<(), AudioError> {
    config.validate()?;
    let spec = WavSpec {
        channels: config.channels,
        sample_rate: config.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut writer = WavWriter::new(BufWriter::new(file), spec)?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;

    log::debug!(
        "Wrote {} samples of audio at {} Hz",
        samples.len(),
        config.sample_rate
    );
    Ok(())
}
