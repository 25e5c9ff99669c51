//! Config command - print the effective bench configuration

use anyhow::{Context, Result};
use dtcv_bench::BenchConfig;

use crate::output::{OutputContext, OutputFormat};

pub fn show_config(bench: &BenchConfig, ctx: &OutputContext) -> Result<()> {
    let text = match ctx.format {
        OutputFormat::Json => serde_json::to_string_pretty(bench)?,
        OutputFormat::Table | OutputFormat::Csv => {
            toml::to_string_pretty(bench).context("Failed to render bench config")?
        }
    };
    println!("{}", text);
    Ok(())
}
