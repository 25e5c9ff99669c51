//! Extended CAN frame with J1939 identifier accessors

use std::fmt;

use serde::{Deserialize, Serialize};

/// Mask for a 29-bit extended identifier
pub const EFF_MASK: u32 = 0x1FFF_FFFF;

/// An 8-byte CAN frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanFrame {
    pub arbitration_id: u32,
    pub extended: bool,
    pub data: [u8; 8],
}

impl CanFrame {
    /// Create an extended-format frame
    pub fn new_extended(arbitration_id: u32, data: [u8; 8]) -> Self {
        Self {
            arbitration_id: arbitration_id & EFF_MASK,
            extended: true,
            data,
        }
    }

    /// Build a frame from a variable-length payload; only 8-byte payloads qualify
    pub fn from_slice(arbitration_id: u32, extended: bool, data: &[u8]) -> Option<Self> {
        let data: [u8; 8] = data.try_into().ok()?;
        Some(Self {
            arbitration_id: if extended {
                arbitration_id & EFF_MASK
            } else {
                arbitration_id & 0x7FF
            },
            extended,
            data,
        })
    }

    /// Parameter group number carried in bits 8..24 of the identifier
    pub fn pgn(&self) -> u32 {
        (self.arbitration_id >> 8) & 0xFFFF
    }

    pub fn source_address(&self) -> u8 {
        (self.arbitration_id & 0xFF) as u8
    }

    pub fn priority(&self) -> u8 {
        ((self.arbitration_id >> 26) & 0x7) as u8
    }

    /// Payload as an uppercase hex string
    pub fn data_hex(&self) -> String {
        hex::encode_upper(self.data)
    }
}

impl fmt::Display for CanFrame {
    /// candump-style `18FECA00#04FF...`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.extended {
            write!(f, "{:08X}#{}", self.arbitration_id, self.data_hex())
        } else {
            write!(f, "{:03X}#{}", self.arbitration_id, self.data_hex())
        }
    }
}
