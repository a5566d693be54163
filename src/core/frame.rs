//! # Frame Format
//!
//! Wire layout of a single message:
//!
//! ```text
//! [Serialization(1)] [Compression(1)] [Encryption(1)] [Length(3)] [Payload(N)]
//! ```
//!
//! The length is written in base 255, least significant digit first:
//! `value = d[0] + d[1] * 255 + d[2] * 255^2`. Digits stay in `0..=254` for every
//! value below `255^3`; above that the codec saturates digits at 255, which is what
//! lets the ceiling reach `255 * (1 + 255 + 255^2) = 16_646_655`.
//!
//! ## Security
//! - Length ceiling is a protocol limit, enforced on encode and decode
//! - Id `0` is the "unknown" sentinel of every transform family and never valid on the wire

use crate::core::serialization::SerializationKind;
use crate::error::{constants, ProtocolError, Result};
use crate::utils::compression::CompressionKind;
use crate::utils::crypto::EncryptionKind;
use bytes::{BufMut, BytesMut};

/// Number of transform id bytes leading every frame
pub const META_LEN: usize = 3;

/// Number of length digits following the transform ids
pub const LENGTH_LEN: usize = 3;

/// Total fixed overhead per frame
pub const HEADER_LEN: usize = META_LEN + LENGTH_LEN;

/// Radix of the length prefix
pub const LENGTH_RADIX: usize = 255;

/// Largest payload length a frame can carry
pub const MAX_FRAME_LENGTH: usize = 16_646_655;

/// Reserved "unknown" id shared by all transform families
pub const UNKNOWN_TRANSFORM_ID: u8 = 0;

const PLACE_VALUES: [usize; LENGTH_LEN] = [1, LENGTH_RADIX, LENGTH_RADIX * LENGTH_RADIX];

/// Encode a payload length into its 3-digit base-255 prefix.
///
/// # Errors
/// Returns `ProtocolError::InvalidLength` above [`MAX_FRAME_LENGTH`].
pub fn encode_length(n: usize) -> Result<[u8; LENGTH_LEN]> {
    if n > MAX_FRAME_LENGTH {
        return Err(ProtocolError::InvalidLength(n));
    }

    let mut digits = [0u8; LENGTH_LEN];
    let mut rest = n;
    for i in (0..LENGTH_LEN).rev() {
        let digit = (rest / PLACE_VALUES[i]).min(u8::MAX as usize);
        digits[i] = digit as u8;
        rest -= digit * PLACE_VALUES[i];
    }
    debug_assert_eq!(rest, 0);

    Ok(digits)
}

/// Decode a 3-digit base-255 length prefix.
#[inline]
pub fn decode_length(digits: [u8; LENGTH_LEN]) -> usize {
    digits
        .iter()
        .zip(PLACE_VALUES)
        .map(|(&digit, place)| digit as usize * place)
        .sum()
}

/// The three transform ids that describe how a payload was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameHeader {
    pub serialization: SerializationKind,
    pub compression: CompressionKind,
    pub encryption: EncryptionKind,
}

impl FrameHeader {
    pub fn new(
        serialization: SerializationKind,
        compression: CompressionKind,
        encryption: EncryptionKind,
    ) -> Self {
        Self {
            serialization,
            compression,
            encryption,
        }
    }

    pub fn to_bytes(self) -> [u8; META_LEN] {
        [
            self.serialization.id(),
            self.compression.id(),
            self.encryption.id(),
        ]
    }

    /// Parse the meta bytes of a frame.
    ///
    /// # Errors
    /// A sentinel id is a framing error; any other unrecognized id is reported
    /// as `ProtocolError::UnknownTransform`.
    pub fn from_bytes(bytes: [u8; META_LEN]) -> Result<Self> {
        if bytes.contains(&UNKNOWN_TRANSFORM_ID) {
            return Err(ProtocolError::Framing(constants::ERR_CRITICAL_READ.into()));
        }

        let serialization =
            SerializationKind::from_id(bytes[0]).ok_or(ProtocolError::UnknownTransform {
                family: "serialization",
                id: bytes[0],
            })?;
        let compression =
            CompressionKind::from_id(bytes[1]).ok_or(ProtocolError::UnknownTransform {
                family: "compression",
                id: bytes[1],
            })?;
        let encryption =
            EncryptionKind::from_id(bytes[2]).ok_or(ProtocolError::UnknownTransform {
                family: "encryption",
                id: bytes[2],
            })?;

        Ok(Self::new(serialization, compression, encryption))
    }
}

/// A fully received, still transformed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub header: FrameHeader,
    pub payload: Vec<u8>,
}

impl RawFrame {
    pub fn new(header: FrameHeader, payload: Vec<u8>) -> Self {
        Self { header, payload }
    }

    /// Bytes this frame occupies on the wire
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// Append the wire form of this frame to `dst`.
    ///
    /// # Errors
    /// Empty payloads are rejected since the receiver treats a zero length as corruption.
    pub fn encode_into(&self, dst: &mut BytesMut) -> Result<()> {
        if self.payload.is_empty() {
            return Err(ProtocolError::InvalidLength(0));
        }
        let length = encode_length(self.payload.len())?;

        dst.reserve(self.encoded_len());
        dst.put_slice(&self.header.to_bytes());
        dst.put_slice(&length);
        dst.put_slice(&self.payload);
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf)?;
        Ok(buf.to_vec())
    }
}
