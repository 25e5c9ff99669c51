//! Range validation and correction of recognized SPN/FMI text
//!
//! Recognizers regularly misread the cluster font in a few recurring ways
//! (a spurious leading "1", an extra digit in front of the FMI). Each field
//! kind has a fixed, ordered rule list; the first rule producing an in-range
//! value wins and the reading's confidence is scaled by the correction
//! penalty.

use serde::Serialize;
use tracing::debug;

use crate::models::{fmi_in_range, spn_in_range};

/// Confidence multiplier applied to corrected readings
pub const DEFAULT_CORRECTION_PENALTY: f32 = 0.8;

/// SPN bands seen on the bench; a stripped leading "1" must land inside one
pub const KNOWN_SPN_BANDS: &[(u32, u32)] = &[
    (100, 200),
    (500, 600),
    (1000, 2000),
    (3000, 4000),
    (5000, 6000),
    (7000, 8000),
    (520000, 525000),
];

/// Which display field a reading belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldKind {
    Spn,
    Fmi,
}

impl FieldKind {
    pub fn in_range(&self, value: u64) -> bool {
        match u32::try_from(value) {
            Ok(v) => match self {
                FieldKind::Spn => spn_in_range(v),
                FieldKind::Fmi => fmi_in_range(v),
            },
            Err(_) => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Spn => "SPN",
            FieldKind::Fmi => "FMI",
        }
    }
}

/// Correction that turned an out-of-range reading into a legal one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Correction {
    /// Dropped a spurious leading "1"
    LeadingOne,
    /// Kept the last digit
    LastDigit,
}

/// An accepted reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Validated {
    pub value: u32,
    pub confidence: f32,
    pub correction: Option<Correction>,
}

struct Rule {
    correction: Correction,
    apply: fn(&str, Option<u64>) -> Option<u64>,
}

const SPN_RULES: &[Rule] = &[Rule {
    correction: Correction::LeadingOne,
    apply: spn_leading_one,
}];

const FMI_RULES: &[Rule] = &[
    Rule {
        correction: Correction::LeadingOne,
        apply: fmi_leading_one,
    },
    Rule {
        correction: Correction::LastDigit,
        apply: last_digit,
    },
];

fn spn_leading_one(digits: &str, _value: Option<u64>) -> Option<u64> {
    if digits.len() <= 3 {
        return None;
    }
    let candidate: u32 = digits.strip_prefix('1')?.parse().ok()?;
    KNOWN_SPN_BANDS
        .iter()
        .any(|(lo, hi)| (*lo..=*hi).contains(&candidate))
        .then_some(candidate as u64)
}

fn fmi_leading_one(digits: &str, _value: Option<u64>) -> Option<u64> {
    if digits.len() != 3 {
        return None;
    }
    digits.strip_prefix('1')?.parse().ok()
}

fn last_digit(_digits: &str, value: Option<u64>) -> Option<u64> {
    value.filter(|v| *v > 31).map(|v| v % 10)
}

/// Validates recognized text into an in-range field value
#[derive(Debug, Clone, Copy)]
pub struct Validator {
    penalty: f32,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(DEFAULT_CORRECTION_PENALTY)
    }
}

impl Validator {
    pub fn new(penalty: f32) -> Self {
        Self { penalty }
    }

    pub fn penalty(&self) -> f32 {
        self.penalty
    }

    /// Validate `text` as `kind`; `None` means rejected
    pub fn validate(&self, text: &str, kind: FieldKind, confidence: f32) -> Option<Validated> {
        let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            return None;
        }

        // Overlong strings overflow u64; only text-based rules can still apply
        let value = digits.parse::<u64>().ok();
        if let Some(v) = value.filter(|v| kind.in_range(*v)) {
            return Some(Validated {
                value: v as u32,
                confidence,
                correction: None,
            });
        }

        let rules = match kind {
            FieldKind::Spn => SPN_RULES,
            FieldKind::Fmi => FMI_RULES,
        };

        for rule in rules {
            let Some(corrected) = (rule.apply)(&digits, value) else {
                continue;
            };
            if kind.in_range(corrected) {
                debug!(
                    field = kind.as_str(),
                    raw = %digits,
                    corrected,
                    correction = ?rule.correction,
                    "Corrected recognized value"
                );
                return Some(Validated {
                    value: corrected as u32,
                    confidence: confidence * self.penalty,
                    correction: Some(rule.correction),
                });
            }
        }

        debug!(field = kind.as_str(), raw = %digits, "Rejected recognized value");
        None
    }
}

/// Validate with the default correction penalty
pub fn validate(text: &str, kind: FieldKind, confidence: f32) -> Option<Validated> {
    Validator::default().validate(text, kind, confidence)
}
