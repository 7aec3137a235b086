use voicerelay_protocol::RtpHeader;

/// Sequence and timestamp counters for one outbound stream.
///
/// Both counters wrap; they are only ever advanced by the pacer.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RtpFramer {
    sequence: u16,
    timestamp: u32,
}

impl RtpFramer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts the counters at arbitrary values, e.g. to exercise wraparound.
    #[must_use]
    pub fn starting_at(sequence: u16, timestamp: u32) -> Self {
        Self { sequence, timestamp }
    }

    /// Header for the next frame, then steps the counters past it.
    pub fn advance(&mut self, ssrc: u32, samples: u32) -> RtpHeader {
        let header = RtpHeader::new(self.sequence, self.timestamp, ssrc);
        self.sequence = self.sequence.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(samples);
        header
    }

    #[must_use]
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    #[must_use]
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }
}
