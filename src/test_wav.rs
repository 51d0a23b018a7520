//! Procedural WAV fixtures for unit tests.
//!
//! Synthesizes a sine tone and writes it as a 16-bit PCM RIFF file so
//! tests never depend on binary assets in the repository.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

/// Write a 440 Hz sine tone as 16-bit PCM WAV.
pub(crate) fn write_tone(
    path: &Path,
    sample_rate: u32,
    channels: u16,
    duration_ms: u64,
) -> io::Result<()> {
    let frames = (sample_rate as u64 * duration_ms).div_ceil(1000);
    let mut samples = Vec::with_capacity((frames * channels as u64 * 2) as usize);

    for n in 0..frames {
        let theta = (n as f32 / sample_rate as f32) * 2.0 * std::f32::consts::PI * 440.0;
        let sample = (theta.sin() * 0.8 * i16::MAX as f32) as i16;
        for _ in 0..channels {
            samples.extend_from_slice(&sample.to_le_bytes());
        }
    }

    let mut file = File::create(path)?;
    let data_len = samples.len() as u32;
    let chunk_size = 36u32 + data_len;
    let block_align = channels * 2;
    let byte_rate = sample_rate * block_align as u32;

    file.write_all(b"RIFF")?;
    file.write_all(&chunk_size.to_le_bytes())?;
    file.write_all(b"WAVE")?;
    file.write_all(b"fmt ")?;
    file.write_all(&16u32.to_le_bytes())?;
    file.write_all(&1u16.to_le_bytes())?;
    file.write_all(&channels.to_le_bytes())?;
    file.write_all(&sample_rate.to_le_bytes())?;
    file.write_all(&byte_rate.to_le_bytes())?;
    file.write_all(&block_align.to_le_bytes())?;
    file.write_all(&16u16.to_le_bytes())?;
    file.write_all(b"data")?;
    file.write_all(&data_len.to_le_bytes())?;
    file.write_all(&samples)?;
    Ok(())
}
