//! Client-facing progress update message.
//!
//! The only wire format the engine owns. Encoded with bincode's fixed-width
//! little-endian layout: `u64 | f32 | f32 | u32 | u8`, 21 bytes in total.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Snapshot of a commodity's visible state, sent whenever it changes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub commodity_id: u64,
    pub current_value: f32,
    pub rate_of_change: f32,
    pub commodity_state_index: u32,
    pub is_rate_change: bool,
}

impl ProgressUpdate {
    pub const ENCODED_LEN: usize = 8 + 4 + 4 + 4 + 1;

    pub fn encode(&self) -> Result<Vec<u8>, MessageError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, MessageError> {
        if bytes.len() != Self::ENCODED_LEN {
            return Err(MessageError::Length {
                expected: Self::ENCODED_LEN,
                found: bytes.len(),
            });
        }
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Errors from encoding or decoding a progress update.
#[derive(Debug)]
pub enum MessageError {
    Bincode(Box<bincode::ErrorKind>),
    Length { expected: usize, found: usize },
}

impl From<Box<bincode::ErrorKind>> for MessageError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        MessageError::Bincode(e)
    }
}

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageError::Bincode(e) => write!(f, "Serialization error: {}", e),
            MessageError::Length { expected, found } => {
                write!(
                    f,
                    "Progress update length mismatch: expected {}, found {}",
                    expected, found
                )
            }
        }
    }
}

impl std::error::Error for MessageError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ProgressUpdate {
        ProgressUpdate {
            commodity_id: 0x0102_0304_0506_0708,
            current_value: -50.0,
            rate_of_change: -1.0,
            commodity_state_index: 1,
            is_rate_change: true,
        }
    }

    #[test]
    fn test_encoded_layout() {
        let bytes = sample().encode().unwrap();
        assert_eq!(bytes.len(), ProgressUpdate::ENCODED_LEN);
        // Little-endian id first, flag byte last
        assert_eq!(&bytes[..8], &[8, 7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(&bytes[8..12], &(-50.0_f32).to_le_bytes());
        assert_eq!(bytes[20], 1);
    }

    #[test]
    fn test_decode_rejects_truncated() {
        let bytes = sample().encode().unwrap();
        assert!(matches!(
            ProgressUpdate::decode(&bytes[..20]),
            Err(MessageError::Length { expected: 21, found: 20 })
        ));
        assert_eq!(ProgressUpdate::decode(&bytes).unwrap(), sample());
    }
}
