//! Encode and decode commands - offline DM1/FF99 frame tools

use anyhow::{bail, Context, Result};
use dtcv_bench::build_manual_frame;
use dtcv_core::codec::{checked_encode_ff99, decode_ff99_frame, parse_payload, pgn};
use dtcv_core::{decode_dm1, CanFrame, Lamp};

use crate::output::{DecodedRow, FrameRow, OutputContext};

/// Encode a DTC as a DM1 frame, or as an FF99 display reading
pub fn encode(
    spn: u32,
    fmi: u32,
    lamp: Lamp,
    sa: u32,
    ff99: bool,
    ctx: &OutputContext,
) -> Result<()> {
    let frame = if ff99 {
        let sa = u8::try_from(sa)
            .map_err(|_| anyhow::anyhow!("source address {} is outside 0..=255", sa))?;
        checked_encode_ff99(spn, fmi, lamp == Lamp::Amber, lamp == Lamp::Red, sa)?
    } else {
        build_manual_frame(spn, fmi, lamp, sa)?
    };

    ctx.print_one(&FrameRow::from(&frame));
    ctx.info(&format!("candump: {}", frame));
    Ok(())
}

/// Decode a frame written as `ID#DATA`
pub fn decode(text: &str, ctx: &OutputContext) -> Result<()> {
    let frame = parse_frame(text)?;
    ctx.print_one(&decode_frame(&frame)?);
    Ok(())
}

fn parse_frame(text: &str) -> Result<CanFrame> {
    let (id, data) = text
        .trim()
        .split_once('#')
        .context("Expected a frame written as ID#DATA")?;
    if id.len() <= 3 {
        bail!("DM1 and FF99 use 29-bit identifiers, got '{}'", id);
    }
    let arbitration_id =
        u32::from_str_radix(id, 16).with_context(|| format!("Invalid CAN identifier '{}'", id))?;
    let data = parse_payload(data)?;
    Ok(CanFrame::new_extended(arbitration_id, data))
}

fn decode_frame(frame: &CanFrame) -> Result<DecodedRow> {
    let row = match frame.pgn() {
        pgn::DM1 => {
            let reading = decode_dm1(frame)?;
            DecodedRow {
                kind: "DM1".to_string(),
                spn: reading.spn,
                fmi: reading.fmi.into(),
                lamp: reading.lamp.to_string(),
                source_address: format!("0x{:02X}", reading.source_address),
            }
        }
        pgn::FF99 => {
            let reading = decode_ff99_frame(frame)?;
            DecodedRow {
                kind: "FF99".to_string(),
                spn: reading.spn,
                fmi: reading.fmi.into(),
                lamp: reading.lamp.to_string(),
                source_address: format!("0x{:02X}", frame.source_address()),
            }
        }
        other => bail!("PGN {:04X} is neither DM1 (FECA) nor FF99", other),
    };
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dtcv_core::encode_dm1;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_decode_dm1_text() {
        let frame = encode_dm1(520313, 14, Lamp::Amber, 0x10);
        let row = decode_frame(&parse_frame(&frame.to_string()).unwrap()).unwrap();
        assert_eq!(row.kind, "DM1");
        assert_eq!((row.spn, row.fmi), (520313, 14));
        assert_eq!(row.lamp, "AMBER");
        assert_eq!(row.source_address, "0x10");
    }

    #[test]
    fn test_decode_ff99_text() {
        let frame = parse_frame("18FF9900#07 F0 79 00 00 0E 01 00").unwrap();
        let row = decode_frame(&frame).unwrap();
        assert_eq!(row.kind, "FF99");
        assert_eq!((row.spn, row.fmi), (520313, 14));
        assert_eq!(row.lamp, "AMBER");
    }

    #[test]
    fn test_rejects_other_frames() {
        assert!(parse_frame("18FECA00").is_err());
        assert!(parse_frame("123#0011223344556677").is_err());
        assert!(parse_frame("18FECA00#0011").is_err());
        let other = parse_frame("0CF00400#0011223344556677").unwrap();
        assert!(decode_frame(&other).is_err());
    }
}
