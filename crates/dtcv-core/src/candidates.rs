//! Candidate extraction and best-candidate selection for recognizer output

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::validate::{FieldKind, Validated, Validator};

/// Default floor below which recognizer candidates are discarded
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.3;

/// One `(text, confidence)` pair returned by a text recognizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub text: String,
    pub confidence: f32,
}

impl Candidate {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
        }
    }
}

/// Score of one distinct digit string
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateScore {
    pub digits: String,
    pub score: f32,
    pub frequency: usize,
    pub avg_confidence: f32,
    pub max_confidence: f32,
}

/// Group candidates by their digit content, dropping low-confidence ones
pub fn extract_candidates(
    candidates: &[Candidate],
    min_confidence: f32,
) -> BTreeMap<String, Vec<f32>> {
    let mut grouped: BTreeMap<String, Vec<f32>> = BTreeMap::new();
    for candidate in candidates {
        let digits: String = candidate
            .text
            .chars()
            .filter(|c| c.is_ascii_digit())
            .collect();
        if digits.is_empty() || candidate.confidence <= min_confidence {
            continue;
        }
        grouped.entry(digits).or_default().push(candidate.confidence);
    }
    grouped
}

/// Favor lengths typical for the display fields
fn length_factor(len: usize) -> f32 {
    match len {
        1 => 1.2,
        3 | 4 => 1.5,
        n if n > 6 => 0.5,
        _ => 1.0,
    }
}

/// Score every distinct digit string, highest first
///
/// Ties keep the digit strings in ascending order.
pub fn rank_candidates(grouped: &BTreeMap<String, Vec<f32>>) -> Vec<CandidateScore> {
    let mut ranked: Vec<CandidateScore> = grouped
        .iter()
        .filter(|(_, confidences)| !confidences.is_empty())
        .map(|(digits, confidences)| {
            let frequency = confidences.len();
            let avg_confidence = confidences.iter().sum::<f32>() / frequency as f32;
            let max_confidence = confidences.iter().copied().fold(f32::MIN, f32::max);
            let score = (frequency as f32 * 0.3 + avg_confidence * 0.4 + max_confidence * 0.3)
                * length_factor(digits.len());
            CandidateScore {
                digits: digits.clone(),
                score,
                frequency,
                avg_confidence,
                max_confidence,
            }
        })
        .collect();
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    ranked
}

/// Pick the highest-scoring digit string
pub fn best_candidate(grouped: &BTreeMap<String, Vec<f32>>) -> Option<CandidateScore> {
    rank_candidates(grouped).into_iter().next()
}

/// Reduce raw recognizer output for one field to a validated value
///
/// Candidates are tried in rank order and the first one the validator
/// accepts wins. The field is absent only when every candidate is rejected.
pub fn read_field(
    candidates: &[Candidate],
    kind: FieldKind,
    validator: &Validator,
    min_confidence: f32,
) -> Option<Validated> {
    let grouped = extract_candidates(candidates, min_confidence);
    rank_candidates(&grouped)
        .into_iter()
        .find_map(|c| validator.validate(&c.digits, kind, c.max_confidence))
}
