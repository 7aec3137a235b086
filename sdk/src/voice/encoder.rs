use opus::{Application, Bitrate, Channels};

use crate::error::SdkError;
use crate::voice::audio::{duration_of_pcm, MAX_FRAME_DURATION_MS, MAX_OPUS_PACKET_SIZE, SAMPLE_RATE};

const ENCODING_BITRATE: i32 = 128_000;

/// Opus encoder for 48 kHz stereo PCM frames queued by callers.
pub struct OpusCodec {
    encoder: opus::Encoder,
}

impl OpusCodec {
    /// # Errors
    /// `Codec` if libopus refuses the configuration.
    pub fn new() -> Result<Self, SdkError> {
        let mut encoder = opus::Encoder::new(SAMPLE_RATE, Channels::Stereo, Application::Audio)?;
        encoder.set_bitrate(Bitrate::Bits(ENCODING_BITRATE))?;
        Ok(Self { encoder })
    }

    /// Encode one frame of interleaved stereo samples into `out`, replacing
    /// its contents. Returns the encoded length.
    ///
    /// # Errors
    /// `InvalidFrameDuration` if the sample count is not a frame size Opus
    /// accepts, `Codec` if encoding fails.
    pub fn encode(&mut self, pcm: &[i16], out: &mut Vec<u8>) -> Result<usize, SdkError> {
        let duration = duration_of_pcm(pcm.len()).unwrap_or(0);
        if duration == 0 || duration > MAX_FRAME_DURATION_MS {
            return Err(SdkError::InvalidFrameDuration(duration));
        }

        out.resize(MAX_OPUS_PACKET_SIZE, 0);
        let encoded_size = self.encoder.encode(pcm, out)?;
        out.truncate(encoded_size);
        Ok(encoded_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::audio::pcm_len;

    #[test]
    fn encodes_a_twenty_ms_frame() {
        let mut codec = OpusCodec::new().unwrap();
        let mut frame = Vec::new();
        let len = codec.encode(&vec![0i16; pcm_len(20)], &mut frame).unwrap();
        assert_eq!(frame.len(), len);
        assert!(len > 0 && len <= MAX_OPUS_PACKET_SIZE);
    }

    #[test]
    fn rejects_ragged_buffers() {
        let mut codec = OpusCodec::new().unwrap();
        assert!(matches!(
            codec.encode(&[0i16; 7], &mut Vec::new()),
            Err(SdkError::InvalidFrameDuration(0))
        ));
    }
}
