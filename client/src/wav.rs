use std::io::Cursor;
use std::path::Path;

use anyhow::Result;
use hound::{WavSpec, WavWriter};
use soundboard_protocol::{BITS_PER_SAMPLE, CHANNELS};

/// Wraps raw PCM16LE mono bytes in a WAV container.
pub fn encode_pcm16(pcm: &[u8], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = WavSpec {
        channels: CHANNELS,
        sample_rate,
        bits_per_sample: BITS_PER_SAMPLE,
        sample_format: hound::SampleFormat::Int,
    };

    let mut wav_buffer = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut wav_buffer, spec)?;
        // a trailing odd byte is not a sample
        for pair in pcm.chunks_exact(2) {
            writer.write_sample(i16::from_le_bytes([pair[0], pair[1]]))?;
        }
        writer.finalize()?;
    }

    Ok(wav_buffer.into_inner())
}

pub fn write_pcm16(path: &Path, pcm: &[u8], sample_rate: u32) -> Result<()> {
    std::fs::write(path, encode_pcm16(pcm, sample_rate)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_little_endian_samples() {
        let samples: [i16; 4] = [0, 1, -1, i16::MAX];
        let pcm: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();

        let wav = encode_pcm16(&pcm, 24000).unwrap();
        let mut reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
        assert_eq!(reader.spec().sample_rate, 24000);
        assert_eq!(reader.spec().channels, 1);
        let decoded: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(decoded, samples);
    }

    #[test]
    fn drops_trailing_odd_byte() {
        let wav = encode_pcm16(&[1, 0, 7], 24000).unwrap();
        let reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
        assert_eq!(reader.len(), 1);
    }
}
