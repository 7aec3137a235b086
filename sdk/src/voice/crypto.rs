//! XSalsa20-Poly1305 sealing of RTP payloads.

use std::sync::Arc;

use crypto_secretbox::aead::{AeadInPlace, KeyInit};
use crypto_secretbox::{Nonce, Tag, XSalsa20Poly1305};
use voicerelay_protocol::{RtpHeader, RTP_HEADER_SIZE};

use crate::error::SdkError;

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 24;
pub const TAG_SIZE: usize = 16;

/// Seals audio payloads under the session's shared secret.
#[derive(Clone)]
pub struct SecretBoxCodec {
    cipher: Arc<XSalsa20Poly1305>,
}

impl std::fmt::Debug for SecretBoxCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretBoxCodec").finish_non_exhaustive()
    }
}

impl SecretBoxCodec {
    /// # Errors
    /// `InvalidKeyLength` unless the key is exactly 32 bytes.
    pub fn new(key: &[u8]) -> Result<Self, SdkError> {
        let cipher = XSalsa20Poly1305::new_from_slice(key)
            .map_err(|_| SdkError::InvalidKeyLength(key.len()))?;
        Ok(Self { cipher: Arc::new(cipher) })
    }

    /// The header bytes zero-padded to the nonce width. Unique per frame
    /// because the header carries the sequence and timestamp.
    #[must_use]
    pub fn nonce_for(header: &RtpHeader) -> [u8; NONCE_SIZE] {
        let mut nonce = [0u8; NONCE_SIZE];
        nonce[..RTP_HEADER_SIZE].copy_from_slice(&header.to_bytes());
        nonce
    }

    /// Writes `header ++ tag ++ ciphertext` into `out`, replacing its contents.
    ///
    /// # Errors
    /// `Encryption` if the cipher rejects the buffer.
    pub fn seal(&self, header: &RtpHeader, payload: &[u8], out: &mut Vec<u8>) -> Result<(), SdkError> {
        let nonce = Self::nonce_for(header);

        out.clear();
        out.reserve(RTP_HEADER_SIZE + TAG_SIZE + payload.len());
        out.extend_from_slice(&nonce[..RTP_HEADER_SIZE]);
        out.extend_from_slice(&[0u8; TAG_SIZE]);
        out.extend_from_slice(payload);

        let (head, body) = out.split_at_mut(RTP_HEADER_SIZE + TAG_SIZE);
        let tag = self
            .cipher
            .encrypt_in_place_detached(Nonce::from_slice(&nonce), b"", body)
            .map_err(|_| SdkError::Encryption)?;
        head[RTP_HEADER_SIZE..].copy_from_slice(&tag);
        Ok(())
    }

    /// Verifies and decrypts a packet produced by [`seal`](Self::seal).
    ///
    /// # Errors
    /// `Protocol` for a truncated packet, `Decryption` if authentication fails.
    pub fn open(&self, packet: &[u8]) -> Result<(RtpHeader, Vec<u8>), SdkError> {
        let header = RtpHeader::parse(packet)?;
        if packet.len() < RTP_HEADER_SIZE + TAG_SIZE {
            return Err(voicerelay_protocol::ProtocolError::PacketTooShort {
                expected: RTP_HEADER_SIZE + TAG_SIZE,
                got: packet.len(),
            }
            .into());
        }

        let nonce = Self::nonce_for(&header);
        let tag = Tag::from_slice(&packet[RTP_HEADER_SIZE..RTP_HEADER_SIZE + TAG_SIZE]);
        let mut body = packet[RTP_HEADER_SIZE + TAG_SIZE..].to_vec();
        self.cipher
            .decrypt_in_place_detached(Nonce::from_slice(&nonce), b"", &mut body, tag)
            .map_err(|_| SdkError::Decryption)?;
        Ok((header, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> SecretBoxCodec {
        SecretBoxCodec::new(&[7u8; KEY_SIZE]).unwrap()
    }

    #[test]
    fn rejects_short_keys() {
        assert!(matches!(
            SecretBoxCodec::new(&[0u8; 16]),
            Err(SdkError::InvalidKeyLength(16))
        ));
    }

    #[test]
    fn nonce_is_padded_header() {
        let header = RtpHeader::new(1, 2, 3);
        let nonce = SecretBoxCodec::nonce_for(&header);
        assert_eq!(&nonce[..RTP_HEADER_SIZE], &header.to_bytes());
        assert!(nonce[RTP_HEADER_SIZE..].iter().all(|b| *b == 0));
    }

    #[test]
    fn nonces_differ_between_frames() {
        let a = SecretBoxCodec::nonce_for(&RtpHeader::new(1, 960, 9));
        let b = SecretBoxCodec::nonce_for(&RtpHeader::new(2, 1920, 9));
        assert_ne!(a, b);
    }

    #[test]
    fn sealed_packet_layout() {
        let header = RtpHeader::new(10, 9600, 1234);
        let payload = [0xF8, 0xFF, 0xFE, 0x01, 0x02];
        let mut out = Vec::new();
        codec().seal(&header, &payload, &mut out).unwrap();

        assert_eq!(out.len(), RTP_HEADER_SIZE + payload.len() + TAG_SIZE);
        assert_eq!(&out[..RTP_HEADER_SIZE], &header.to_bytes());
        assert_ne!(&out[RTP_HEADER_SIZE + TAG_SIZE..], &payload);

        let (parsed, plain) = codec().open(&out).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(plain, payload);
    }

    #[test]
    fn tampering_is_detected() {
        let mut out = Vec::new();
        codec().seal(&RtpHeader::new(1, 1, 1), b"opus", &mut out).unwrap();
        let last = out.len() - 1;
        out[last] ^= 1;
        assert!(matches!(codec().open(&out), Err(SdkError::Decryption)));
    }

    #[test]
    fn wrong_key_fails_to_open() {
        let mut out = Vec::new();
        codec().seal(&RtpHeader::new(1, 1, 1), b"opus", &mut out).unwrap();
        let other = SecretBoxCodec::new(&[8u8; KEY_SIZE]).unwrap();
        assert!(matches!(other.open(&out), Err(SdkError::Decryption)));
    }
}
