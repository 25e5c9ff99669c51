//! Entries command - load and list an entry file

use anyhow::{Context, Result};
use dtcv_core::load_entries;
use std::path::Path;

use crate::output::{EntryRow, OutputContext};

pub fn entries(file: &Path, ctx: &OutputContext) -> Result<()> {
    let set = load_entries(file)
        .with_context(|| format!("Failed to load entries: {}", file.display()))?;

    for diag in &set.diagnostics {
        ctx.warn(&format!("line {}: {}", diag.line, diag.message));
    }

    let rows: Vec<EntryRow> = set
        .entries
        .iter()
        .enumerate()
        .map(|(i, entry)| EntryRow::new(i, entry))
        .collect();
    ctx.print(&rows);

    ctx.info(&format!(
        "\n{} entries loaded, {} rows skipped",
        set.len(),
        set.diagnostics.len()
    ));
    Ok(())
}
