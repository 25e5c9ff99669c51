//! Validate command - check how a recognized string would be read

use anyhow::{bail, Result};
use dtcv_bench::BenchConfig;
use dtcv_core::{FieldKind, Validator};

use crate::output::{OutputContext, ValidationRow};

pub fn validate(
    text: &str,
    kind: FieldKind,
    confidence: f32,
    bench: &BenchConfig,
    ctx: &OutputContext,
) -> Result<()> {
    let validator = Validator::new(bench.recognition.correction_penalty);
    let Some(validated) = validator.validate(text, kind, confidence) else {
        bail!("'{}' is not a valid {} reading", text, kind.as_str());
    };

    ctx.print_one(&ValidationRow {
        input: text.to_string(),
        field: kind.as_str().to_string(),
        value: validated.value.to_string(),
        confidence: format!("{:.2}", validated.confidence),
        correction: validated
            .correction
            .map_or_else(|| "-".to_string(), |c| format!("{:?}", c)),
    });
    Ok(())
}
