//! Expected fault-code entries and lamp states

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CodecError, CodecResult, LoadError};

/// Lowest legal Suspect Parameter Number
pub const SPN_MIN: u32 = 1;
/// Highest legal Suspect Parameter Number (19 bits)
pub const SPN_MAX: u32 = 524_287;
/// Highest legal Failure Mode Identifier (5 bits)
pub const FMI_MAX: u32 = 31;

/// Check an SPN against its legal range
pub fn spn_in_range(spn: u32) -> bool {
    (SPN_MIN..=SPN_MAX).contains(&spn)
}

/// Check an FMI against its legal range
pub fn fmi_in_range(fmi: u32) -> bool {
    fmi <= FMI_MAX
}

/// Warning lamp shown next to a fault code
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE", try_from = "LampValue")]
pub enum Lamp {
    #[default]
    None,
    Amber,
    Red,
}

impl Lamp {
    /// Derive the lamp label from two lit/unlit flags (amber wins when both are lit)
    pub fn from_flags(amber_on: bool, red_on: bool) -> Self {
        match (amber_on, red_on) {
            (true, _) => Lamp::Amber,
            (false, true) => Lamp::Red,
            (false, false) => Lamp::None,
        }
    }

    /// Numeric code used in entry files (0 = none, 1 = amber, 2 = red)
    pub fn code(&self) -> u8 {
        match self {
            Lamp::None => 0,
            Lamp::Amber => 1,
            Lamp::Red => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Lamp::None),
            1 => Some(Lamp::Amber),
            2 => Some(Lamp::Red),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Lamp::None => "NONE",
            Lamp::Amber => "AMBER",
            Lamp::Red => "RED",
        }
    }
}

impl fmt::Display for Lamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Lamp {
    type Err = LoadError;

    /// Accepts `NONE`/`AMBER`/`RED` (any case) or `0`/`1`/`2`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.to_ascii_uppercase().as_str() {
            "NONE" | "0" => Ok(Lamp::None),
            "AMBER" | "1" => Ok(Lamp::Amber),
            "RED" | "2" => Ok(Lamp::Red),
            _ => Err(LoadError::InvalidLamp(trimmed.to_string())),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LampValue {
    Code(u8),
    Label(String),
}

impl TryFrom<LampValue> for Lamp {
    type Error = LoadError;

    fn try_from(value: LampValue) -> Result<Self, Self::Error> {
        match value {
            LampValue::Code(code) => {
                Lamp::from_code(code).ok_or_else(|| LoadError::InvalidLamp(code.to_string()))
            }
            LampValue::Label(label) => label.parse(),
        }
    }
}

/// One fault code the cluster is expected to display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtcEntry {
    pub spn: u32,
    pub fmi: u8,
    #[serde(default)]
    pub lamp: Lamp,
    #[serde(default)]
    pub source_address: u8,
    #[serde(default)]
    pub description: String,
    /// Set by the verification engine only
    #[serde(default, skip_deserializing)]
    pub error_found: bool,
}

impl DtcEntry {
    /// Create an entry, rejecting out-of-range SPN/FMI
    pub fn new(spn: u32, fmi: u8, lamp: Lamp, source_address: u8) -> CodecResult<Self> {
        if !spn_in_range(spn) {
            return Err(CodecError::SpnOutOfRange(spn));
        }
        if !fmi_in_range(fmi as u32) {
            return Err(CodecError::FmiOutOfRange(fmi as u32));
        }
        Ok(Self {
            spn,
            fmi,
            lamp,
            source_address,
            description: default_description(spn, fmi),
            error_found: false,
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Whether SPN and FMI lie in their legal ranges
    pub fn is_valid(&self) -> bool {
        spn_in_range(self.spn) && fmi_in_range(self.fmi as u32)
    }

    /// Code as rendered on the cluster: SPN low byte, SPN mid byte, FMI
    pub fn display_code(&self) -> u32 {
        ((self.spn & 0xFF) << 16) | (((self.spn >> 8) & 0xFF) << 8) | self.fmi as u32
    }

    pub fn display_code_hex(&self) -> String {
        format!("{:06X}", self.display_code())
    }
}

/// Description used when a source omits one
pub fn default_description(spn: u32, fmi: u8) -> String {
    format!("DTC {}-{}", spn, fmi)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(false, false, Lamp::None)]
    #[case(true, false, Lamp::Amber)]
    #[case(false, true, Lamp::Red)]
    #[case(true, true, Lamp::Amber)]
    fn test_lamp_from_flags(#[case] amber: bool, #[case] red: bool, #[case] expected: Lamp) {
        assert_eq!(Lamp::from_flags(amber, red), expected);
    }

    #[test]
    fn test_lamp_parse() {
        assert_eq!("amber".parse::<Lamp>().unwrap(), Lamp::Amber);
        assert_eq!(" RED ".parse::<Lamp>().unwrap(), Lamp::Red);
        assert_eq!("0".parse::<Lamp>().unwrap(), Lamp::None);
        assert_eq!("2".parse::<Lamp>().unwrap(), Lamp::Red);
        assert!("green".parse::<Lamp>().is_err());
        assert!("3".parse::<Lamp>().is_err());
    }

    #[test]
    fn test_entry_range_checks() {
        assert!(DtcEntry::new(520313, 14, Lamp::Amber, 0).is_ok());
        assert_eq!(
            DtcEntry::new(0, 1, Lamp::None, 0),
            Err(CodecError::SpnOutOfRange(0))
        );
        assert_eq!(
            DtcEntry::new(524288, 1, Lamp::None, 0),
            Err(CodecError::SpnOutOfRange(524288))
        );
        assert_eq!(
            DtcEntry::new(100, 32, Lamp::None, 0),
            Err(CodecError::FmiOutOfRange(32))
        );
    }

    #[test]
    fn test_display_code() {
        // 520313 = 0x07F079 -> low 0x79, mid 0xF0
        let entry = DtcEntry::new(520313, 14, Lamp::Amber, 0).unwrap();
        assert_eq!(entry.display_code(), 0x79F00E);
        assert_eq!(entry.display_code_hex(), "79F00E");
        assert_eq!(entry.description, "DTC 520313-14");
    }

    #[test]
    fn test_entry_deserialize_lamp_forms() {
        #[derive(Deserialize)]
        struct Doc {
            entry: Vec<DtcEntry>,
        }

        let doc: Doc = toml::from_str(
            r#"
            [[entry]]
            spn = 100
            fmi = 1
            lamp = "red"

            [[entry]]
            spn = 200
            fmi = 2
            lamp = 1
            source_address = 3
            "#,
        )
        .unwrap();

        assert_eq!(doc.entry[0].lamp, Lamp::Red);
        assert_eq!(doc.entry[1].lamp, Lamp::Amber);
        assert_eq!(doc.entry[1].source_address, 3);
        assert!(!doc.entry[0].error_found);
    }
}
