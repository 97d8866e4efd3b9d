//! Crypt packet header codec.
//!
//! Parses and builds the fixed 14-byte header that precedes every
//! ciphertext payload. Field order, widths, and big-endian byte order are
//! dictated by the client binary and must not change. No field *values*
//! are validated here (`data_size` in particular): that is the caller's
//! responsibility.

use crate::core::crypto::Checksums;
use crate::error::{constants, ProtocolError, Result};

/// Byte length of an encrypted packet header.
pub const CRYPT_HEADER_LEN: usize = 14;

/// Parsed form of an encrypted packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CryptHeader {
    /// Packs the ciphertext length's high bits with a fixed flag pattern.
    pub pf0: u8,
    /// Multiplier applied to the rolling key for this packet; 0 means "do not rotate".
    pub key_rot_delta: u8,
    /// Low 16 bits of the sender's running packet counter.
    pub packet_num: u16,
    /// Ciphertext length in bytes; must equal the number of bytes that follow.
    pub data_size: u16,
    /// Combined checksum of the previous packet sent in this direction.
    pub prev_packet_combined_check: u16,
    pub check0: u16,
    pub check1: u16,
    pub check2: u16,
}

impl CryptHeader {
    /// Parse raw bytes into a `CryptHeader`.
    ///
    /// # Errors
    /// Returns `ProtocolError::MalformedHeader` unless `data` is exactly
    /// [`CRYPT_HEADER_LEN`] bytes.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() != CRYPT_HEADER_LEN {
            return Err(ProtocolError::MalformedHeader(constants::ERR_SHORT_HEADER));
        }

        Ok(Self {
            pf0: data[0],
            key_rot_delta: data[1],
            packet_num: u16::from_be_bytes([data[2], data[3]]),
            data_size: u16::from_be_bytes([data[4], data[5]]),
            prev_packet_combined_check: u16::from_be_bytes([data[6], data[7]]),
            check0: u16::from_be_bytes([data[8], data[9]]),
            check1: u16::from_be_bytes([data[10], data[11]]),
            check2: u16::from_be_bytes([data[12], data[13]]),
        })
    }

    /// Encode the header into raw bytes.
    pub fn encode(&self) -> [u8; CRYPT_HEADER_LEN] {
        let mut out = [0u8; CRYPT_HEADER_LEN];
        out[0] = self.pf0;
        out[1] = self.key_rot_delta;
        out[2..4].copy_from_slice(&self.packet_num.to_be_bytes());
        out[4..6].copy_from_slice(&self.data_size.to_be_bytes());
        out[6..8].copy_from_slice(&self.prev_packet_combined_check.to_be_bytes());
        out[8..10].copy_from_slice(&self.check0.to_be_bytes());
        out[10..12].copy_from_slice(&self.check1.to_be_bytes());
        out[12..14].copy_from_slice(&self.check2.to_be_bytes());
        out
    }

    /// Pack a ciphertext length into the `pf0` flag byte.
    pub fn pack_pf0(ciphertext_len: usize) -> u8 {
        (((ciphertext_len >> 12) & 0xF3) | 3) as u8
    }

    /// Whether the three payload checksums in this header agree with `checks`.
    pub fn matches(&self, checks: &Checksums) -> bool {
        self.check0 == checks.check0
            && self.check1 == checks.check1
            && self.check2 == checks.check2
    }
}
