//! J1939 DM1 and FF99 frame codec
//!
//! DM1 (PGN 0xFECA) announces one active fault code with its lamp state.
//! FF99 (PGN 0xFF99) echoes a recognized fault code back onto the bus.
//!
//! The DM1 diagnostic-code field is the 24-bit composite
//! `SPN low ‖ SPN mid ‖ (SPN high:3 ‖ FMI:5)` shifted left by 8, so its
//! least-significant byte (payload byte 5) is always zero. Receivers on the
//! bench decode that layout, so no occurrence count is written there.

use serde::Serialize;

use crate::error::{CodecError, CodecResult};
use crate::models::{fmi_in_range, spn_in_range, CanFrame, Lamp, RecognitionResult};

/// Parameter group numbers
pub mod pgn {
    /// Active diagnostic trouble codes
    pub const DM1: u32 = 0xFECA;
    /// Recognition response
    pub const FF99: u32 = 0xFF99;
}

/// DM1 lamp status bits in payload byte 0
pub mod lamp_bit {
    /// Amber warning lamp
    pub const AMBER: u8 = 1 << 2;
    /// Red stop lamp
    pub const RED: u8 = 1 << 4;
}

/// Priority used for every frame the bench emits
pub const DEFAULT_PRIORITY: u8 = 6;

/// Filler for reserved payload bytes
pub const RESERVED: u8 = 0xFF;

/// Build a 29-bit identifier from priority, PGN and source address
pub fn arbitration_id(priority: u8, pgn: u32, source_address: u8) -> u32 {
    ((priority as u32 & 0x7) << 26) | ((pgn & 0xFFFF) << 8) | source_address as u32
}

/// Pack SPN and FMI into the 4-byte DM1 diagnostic-code field
pub fn diagnostic_code(spn: u32, fmi: u8) -> u32 {
    let low = spn & 0xFF;
    let mid = (spn >> 8) & 0xFF;
    let high = (spn >> 16) & 0x07;
    let composite = (low << 16) | (mid << 8) | (high << 5) | (fmi as u32 & 0x1F);
    composite << 8
}

/// Unpack a DM1 diagnostic-code field into (SPN, FMI)
pub fn split_diagnostic_code(code: u32) -> (u32, u8) {
    let composite = code >> 8;
    let low = (composite >> 16) & 0xFF;
    let mid = (composite >> 8) & 0xFF;
    let last = composite & 0xFF;
    let spn = ((last >> 5) << 16) | (mid << 8) | low;
    (spn, (last & 0x1F) as u8)
}

/// Encode a DM1 frame. SPN and FMI must already be in range.
pub fn encode_dm1(spn: u32, fmi: u8, lamp: Lamp, source_address: u8) -> CanFrame {
    let lamp_bits = match lamp {
        Lamp::Amber => lamp_bit::AMBER,
        Lamp::Red => lamp_bit::RED,
        Lamp::None => 0,
    };
    let code = diagnostic_code(spn, fmi).to_be_bytes();

    let data = [
        lamp_bits,
        RESERVED,
        code[0],
        code[1],
        code[2],
        code[3],
        source_address,
        RESERVED,
    ];

    CanFrame::new_extended(
        arbitration_id(DEFAULT_PRIORITY, pgn::DM1, source_address),
        data,
    )
}

/// Range-checked variant of [`encode_dm1`]
pub fn checked_encode_dm1(
    spn: u32,
    fmi: u32,
    lamp: Lamp,
    source_address: u8,
) -> CodecResult<CanFrame> {
    check_ranges(spn, fmi)?;
    Ok(encode_dm1(spn, fmi as u8, lamp, source_address))
}

/// Encode an FF99 response frame sent from `source_address`
pub fn encode_ff99(spn: u32, fmi: u16, amber_on: bool, red_on: bool, source_address: u8) -> CanFrame {
    let spn = spn.to_be_bytes();
    let fmi = fmi.to_be_bytes();

    let data = [
        spn[1],
        spn[2],
        spn[3],
        0,
        fmi[0],
        fmi[1],
        amber_on as u8,
        red_on as u8,
    ];

    CanFrame::new_extended(
        arbitration_id(DEFAULT_PRIORITY, pgn::FF99, source_address),
        data,
    )
}

/// Range-checked variant of [`encode_ff99`]
pub fn checked_encode_ff99(
    spn: u32,
    fmi: u32,
    amber_on: bool,
    red_on: bool,
    source_address: u8,
) -> CodecResult<CanFrame> {
    check_ranges(spn, fmi)?;
    Ok(encode_ff99(spn, fmi as u16, amber_on, red_on, source_address))
}

/// Encode a recognition result as an FF99 response.
///
/// Unrecognized fields go out as 0, which no legal SPN uses.
pub fn encode_response(result: &RecognitionResult, source_address: u8) -> CanFrame {
    let spn = result.spn.filter(|spn| spn_in_range(*spn)).unwrap_or(0);
    let fmi = result
        .fmi
        .filter(|fmi| fmi_in_range(*fmi as u32))
        .unwrap_or(0);
    encode_ff99(
        spn,
        fmi as u16,
        result.lamp_amber_on,
        result.lamp_red_on,
        source_address,
    )
}

/// Decoded FF99 payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Ff99Reading {
    pub spn: u32,
    pub fmi: u16,
    pub lamp: Lamp,
}

/// Decode an FF99 payload
pub fn decode_ff99(data: &[u8; 8]) -> Ff99Reading {
    let spn = u32::from_be_bytes([0, data[0], data[1], data[2]]);
    let fmi = u16::from_be_bytes([data[4], data[5]]);
    let lamp = Lamp::from_flags(data[6] & 0x01 != 0, data[7] & 0x01 != 0);
    Ff99Reading { spn, fmi, lamp }
}

/// Decode an FF99 frame, checking its parameter group
pub fn decode_ff99_frame(frame: &CanFrame) -> CodecResult<Ff99Reading> {
    expect_pgn(frame, pgn::FF99)?;
    Ok(decode_ff99(&frame.data))
}

/// Decoded DM1 payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Dm1Reading {
    pub spn: u32,
    pub fmi: u8,
    pub lamp: Lamp,
    pub source_address: u8,
}

/// Decode a DM1 frame produced by [`encode_dm1`]
pub fn decode_dm1(frame: &CanFrame) -> CodecResult<Dm1Reading> {
    expect_pgn(frame, pgn::DM1)?;
    let data = &frame.data;
    let code = u32::from_be_bytes([data[2], data[3], data[4], data[5]]);
    let (spn, fmi) = split_diagnostic_code(code);
    let lamp = Lamp::from_flags(data[0] & lamp_bit::AMBER != 0, data[0] & lamp_bit::RED != 0);

    Ok(Dm1Reading {
        spn,
        fmi,
        lamp,
        source_address: frame.source_address(),
    })
}

/// Parse a payload given as hex text (spaces allowed)
pub fn parse_payload(s: &str) -> CodecResult<[u8; 8]> {
    let cleaned: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = hex::decode(&cleaned).map_err(|_| CodecError::InvalidLength(cleaned.len() / 2))?;
    let len = bytes.len();
    bytes.try_into().map_err(|_| CodecError::InvalidLength(len))
}

fn check_ranges(spn: u32, fmi: u32) -> CodecResult<()> {
    if !spn_in_range(spn) {
        return Err(CodecError::SpnOutOfRange(spn));
    }
    if !fmi_in_range(fmi) {
        return Err(CodecError::FmiOutOfRange(fmi));
    }
    Ok(())
}

fn expect_pgn(frame: &CanFrame, expected: u32) -> CodecResult<()> {
    let actual = frame.pgn();
    if actual != expected {
        return Err(CodecError::UnexpectedPgn { expected, actual });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FMI_MAX, SPN_MAX, SPN_MIN};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_dm1_layout() {
        // 520313 = 0x07F079: low 0x79, mid 0xF0, high 0b111
        let frame = encode_dm1(520313, 14, Lamp::Amber, 0x00);
        assert_eq!(frame.arbitration_id, 0x18FECA00);
        assert!(frame.extended);
        assert_eq!(
            frame.data,
            [0x04, 0xFF, 0x79, 0xF0, 0xEE, 0x00, 0x00, 0xFF]
        );
    }

    #[test]
    fn test_dm1_red_lamp_and_source_address() {
        let frame = encode_dm1(100, 1, Lamp::Red, 0x27);
        assert_eq!(frame.arbitration_id, 0x18FECA27);
        assert_eq!(frame.data[0], 0x10);
        assert_eq!(frame.data[6], 0x27);
        assert_eq!(&frame.data[2..6], &[0x64, 0x00, 0x01, 0x00]);
    }

    #[test]
    fn test_dm1_byte5_always_zero() {
        for spn in SPN_MIN..=SPN_MAX {
            let fmi = (spn % (FMI_MAX + 1)) as u8;
            let frame = encode_dm1(spn, fmi, Lamp::None, 0);
            assert_eq!(frame.data[5], 0x00, "spn={} fmi={}", spn, fmi);
        }
    }

    #[test]
    fn test_dm1_decode_inverts_encode() {
        for (spn, fmi, lamp) in [
            (1, 0, Lamp::None),
            (520313, 14, Lamp::Amber),
            (SPN_MAX, 31, Lamp::Red),
            (0x10000, 7, Lamp::Amber),
        ] {
            let reading = decode_dm1(&encode_dm1(spn, fmi, lamp, 0x11)).unwrap();
            assert_eq!(
                reading,
                Dm1Reading {
                    spn,
                    fmi,
                    lamp,
                    source_address: 0x11
                }
            );
        }
    }

    #[test]
    fn test_ff99_layout() {
        let frame = encode_ff99(520313, 14, true, false, 0);
        assert_eq!(frame.arbitration_id, 0x18FF9900);
        assert_eq!(
            frame.data,
            [0x07, 0xF0, 0x79, 0x00, 0x00, 0x0E, 0x01, 0x00]
        );
    }

    #[test]
    fn test_ff99_round_trip() {
        let lamps = [Lamp::None, Lamp::Amber, Lamp::Red];
        for spn in SPN_MIN..=SPN_MAX {
            let fmi = spn % (FMI_MAX + 1);
            let lamp = lamps[(spn % 3) as usize];
            let frame = encode_ff99(
                spn,
                fmi as u16,
                lamp == Lamp::Amber,
                lamp == Lamp::Red,
                0,
            );
            let reading = decode_ff99(&frame.data);
            assert_eq!((reading.spn, reading.fmi as u32, reading.lamp), (spn, fmi, lamp));
        }
        for fmi in 0..=FMI_MAX as u16 {
            let reading = decode_ff99(&encode_ff99(SPN_MAX, fmi, false, true, 0).data);
            assert_eq!(reading.fmi, fmi);
            assert_eq!(reading.lamp, Lamp::Red);
        }
    }

    #[test]
    fn test_ff99_both_lamps_decode_amber() {
        let reading = decode_ff99(&[0, 0, 100, 0, 0, 1, 1, 1]);
        assert_eq!(reading.lamp, Lamp::Amber);
    }

    #[test]
    fn test_response_encodes_absent_as_zero() {
        let result = RecognitionResult::new(None, Some(14), false, true);
        let frame = encode_response(&result, 0);
        assert_eq!(frame.data, [0, 0, 0, 0, 0, 14, 0, 1]);
    }

    #[test]
    fn test_checked_encoders() {
        assert_eq!(
            checked_encode_dm1(0, 1, Lamp::None, 0),
            Err(CodecError::SpnOutOfRange(0))
        );
        assert_eq!(
            checked_encode_ff99(100, 32, false, false, 0),
            Err(CodecError::FmiOutOfRange(32))
        );
        assert!(checked_encode_dm1(SPN_MAX, 31, Lamp::Red, 0xFF).is_ok());
    }

    #[test]
    fn test_decode_checks_pgn() {
        let dm1 = encode_dm1(100, 1, Lamp::None, 0);
        assert_eq!(
            decode_ff99_frame(&dm1),
            Err(CodecError::UnexpectedPgn {
                expected: pgn::FF99,
                actual: pgn::DM1
            })
        );
    }

    #[test]
    fn test_parse_payload() {
        assert_eq!(
            parse_payload("04 FF 79 F0 EE 00 00 FF").unwrap(),
            [0x04, 0xFF, 0x79, 0xF0, 0xEE, 0x00, 0x00, 0xFF]
        );
        assert_eq!(parse_payload("0102"), Err(CodecError::InvalidLength(2)));
    }
}
