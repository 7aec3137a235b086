//! Audio frame model and sample arithmetic for 48 kHz stereo Opus.

use crate::error::SdkError;

/// Opus sample rate the remote expects.
pub const SAMPLE_RATE: u32 = 48_000;

/// Interleaved stereo.
pub const CHANNELS: u32 = 2;

/// Base frame duration; every frame is a whole number of these.
pub const FRAME_DURATION_MS: u32 = 20;

/// Largest Opus frame the encoder can produce in one call (120ms).
pub const MAX_FRAME_DURATION_MS: u32 = 120;

/// Upper bound for one encoded Opus frame.
pub const MAX_OPUS_PACKET_SIZE: usize = 4000;

/// Opus packet for 20ms of silence. Sent after a talk burst so the receiver
/// fades out instead of cutting off.
pub const SILENCE_FRAME: [u8; 3] = [0xF8, 0xFF, 0xFE];

/// Number of silence frames appended after a talk burst.
pub const SILENCE_TAIL_FRAMES: usize = 3;

const SAMPLES_PER_MS: u32 = SAMPLE_RATE / 1000;

/// Samples per channel covered by `duration_ms`; this is the RTP timestamp step.
#[must_use]
pub const fn samples_per_frame(duration_ms: u32) -> u32 {
    duration_ms * SAMPLES_PER_MS
}

/// Interleaved `i16` values needed for `duration_ms` of PCM.
#[must_use]
pub const fn pcm_len(duration_ms: u32) -> usize {
    (duration_ms * SAMPLES_PER_MS * CHANNELS) as usize
}

/// Duration of an interleaved PCM buffer, if it is a whole number of milliseconds.
#[must_use]
pub fn duration_of_pcm(len: usize) -> Option<u32> {
    let per_ms = (SAMPLES_PER_MS * CHANNELS) as usize;
    (len % per_ms == 0)
        .then(|| u32::try_from(len / per_ms).ok())
        .flatten()
}

/// Frame contents as handed to the pacer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioPayload {
    /// Already-encoded Opus packet, sent as is.
    Opus(Vec<u8>),
    /// Raw interleaved stereo PCM, encoded by the pacer.
    Pcm(Vec<i16>),
}

/// One entry of the frame queue, consumed exactly once by the pacer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioPacket {
    payload: AudioPayload,
    duration_ms: u32,
    is_silence: bool,
}

impl AudioPacket {
    /// An encoded Opus frame of the given duration.
    ///
    /// # Errors
    /// `InvalidFrameDuration` unless `duration_ms` is a positive multiple of 20.
    pub fn opus(payload: Vec<u8>, duration_ms: u32) -> Result<Self, SdkError> {
        validate_duration(duration_ms)?;
        Ok(Self {
            payload: AudioPayload::Opus(payload),
            duration_ms,
            is_silence: false,
        })
    }

    /// A raw PCM frame; its duration is derived from the sample count.
    ///
    /// # Errors
    /// `InvalidFrameDuration` if the buffer is not a whole number of 20ms frames
    /// or is longer than one Opus frame can carry.
    pub fn pcm(samples: Vec<i16>) -> Result<Self, SdkError> {
        let duration_ms = duration_of_pcm(samples.len()).unwrap_or(0);
        validate_duration(duration_ms)?;
        if duration_ms > MAX_FRAME_DURATION_MS {
            return Err(SdkError::InvalidFrameDuration(duration_ms));
        }
        Ok(Self {
            payload: AudioPayload::Pcm(samples),
            duration_ms,
            is_silence: false,
        })
    }

    /// One 20ms Opus silence frame.
    #[must_use]
    pub fn silence() -> Self {
        Self {
            payload: AudioPayload::Opus(SILENCE_FRAME.to_vec()),
            duration_ms: FRAME_DURATION_MS,
            is_silence: true,
        }
    }

    #[must_use]
    pub fn payload(&self) -> &AudioPayload {
        &self.payload
    }

    #[must_use]
    pub fn duration_ms(&self) -> u32 {
        self.duration_ms
    }

    #[must_use]
    pub fn is_silence(&self) -> bool {
        self.is_silence
    }

    /// RTP timestamp increment for this frame.
    #[must_use]
    pub fn sample_count(&self) -> u32 {
        samples_per_frame(self.duration_ms)
    }
}

fn validate_duration(duration_ms: u32) -> Result<(), SdkError> {
    if duration_ms == 0 || duration_ms % FRAME_DURATION_MS != 0 {
        return Err(SdkError::InvalidFrameDuration(duration_ms));
    }
    Ok(())
}
