//! Replay command - play an ASC trace onto the bus

use anyhow::{bail, Context, Result};
use dtcv_bench::{load_asc, BenchConfig, TracePlayer};
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use super::{interrupt_flag, open_transport, INTERRUPT_POLL};
use crate::output::OutputContext;

pub async fn replay(
    bench: &BenchConfig,
    file: &Path,
    looped: bool,
    ctx: &OutputContext,
) -> Result<()> {
    let trace =
        load_asc(file).with_context(|| format!("Failed to read trace: {}", file.display()))?;
    if trace.is_empty() {
        bail!("No 8-byte frames in {}", file.display());
    }
    ctx.info(&format!(
        "Replaying {} frames over {:.1}s ({} skipped)",
        trace.len(),
        trace.duration(),
        trace.skipped
    ));
    if looped {
        ctx.info("Looping, press Ctrl+C to stop");
    }

    let interrupted = interrupt_flag()?;
    let transport = open_transport(bench).await?;
    let player = Arc::new(TracePlayer::new(transport.clone()));

    let runner = player.clone();
    let mut task = tokio::spawn(async move { runner.play(&trace, looped).await });

    let summary = loop {
        tokio::select! {
            summary = &mut task => break summary.context("Playback task failed")?,
            _ = tokio::time::sleep(INTERRUPT_POLL) => {
                if interrupted.load(Ordering::SeqCst) {
                    player.stop();
                }
            }
        }
    };
    transport.close().await;

    ctx.print_kv(&[
        ("Sent", summary.sent.to_string()),
        ("Failed", summary.failed.to_string()),
        ("Passes", summary.passes.to_string()),
        ("Stopped", summary.stopped.to_string()),
    ]);
    if summary.failed > 0 {
        ctx.warn(&format!("{} frames could not be sent", summary.failed));
    }
    Ok(())
}
