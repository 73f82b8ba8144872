//! Float to PCM16 conversion
//!
//! Samples are clamped to [-1.0, 1.0] with NaN mapped to silence before
//! scaling to i16.

use rayon::prelude::*;

/// Below this many samples conversion stays on the calling thread
const PARALLEL_THRESHOLD: usize = 16 * 1024;
const CHUNK_SAMPLES: usize = 4096;

#[inline]
pub fn clamp_sample(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(-1.0, 1.0)
    }
}

#[inline]
pub fn sample_to_pcm16(value: f32) -> i16 {
    (clamp_sample(value) * i16::MAX as f32).round() as i16
}

/// Clamp a float buffer in place
pub fn clamp_audio(buffer: &mut [f32]) {
    if buffer.len() < PARALLEL_THRESHOLD {
        buffer.iter_mut().for_each(|s| *s = clamp_sample(*s));
    } else {
        buffer
            .par_chunks_mut(CHUNK_SAMPLES)
            .for_each(|chunk| chunk.iter_mut().for_each(|s| *s = clamp_sample(*s)));
    }
}

/// Convert float samples to PCM16
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<i16> {
    let mut out = vec![0i16; samples.len()];
    if samples.len() < PARALLEL_THRESHOLD {
        for (dst, &src) in out.iter_mut().zip(samples) {
            *dst = sample_to_pcm16(src);
        }
    } else {
        out.par_chunks_mut(CHUNK_SAMPLES)
            .zip(samples.par_chunks(CHUNK_SAMPLES))
            .for_each(|(dst, src)| {
                for (d, &s) in dst.iter_mut().zip(src) {
                    *d = sample_to_pcm16(s);
                }
            });
    }
    out
}

/// Average interleaved channels down to mono
pub fn downmix_to_mono(interleaved: &[i16], channels: u16) -> Vec<i16> {
    let channels = channels.max(1) as usize;
    if channels == 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}
