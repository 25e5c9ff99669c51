//! Listen command - answer DM1 traffic with FF99 readings

use anyhow::{bail, Context, Result};
use dtcv_bench::{
    create_transport, AcquisitionPipeline, AcquisitionScheduler, BenchConfig, ScriptedDisplay,
    SchedulerEvent, StopReason,
};
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use super::{interrupt_flag, read_script, INTERRUPT_POLL};
use crate::output::OutputContext;

/// Run listen mode with a scripted display until Ctrl+C
pub async fn listen(bench: BenchConfig, script: &Path, ctx: &OutputContext) -> Result<()> {
    let readings = read_script(script)?;
    let display = Arc::new(ScriptedDisplay::new(&bench.recognition).cycling());
    display.extend(readings);

    let pipeline = Arc::new(AcquisitionPipeline::new(
        display.clone(),
        display,
        bench.recognition.clone(),
    ));
    let transport = create_transport(&bench.transport).context("Failed to create CAN transport")?;
    let scheduler = AcquisitionScheduler::new(bench, transport, pipeline);

    let mut events = scheduler.subscribe();
    let interrupted = interrupt_flag()?;
    scheduler
        .start_listen()
        .await
        .context("Failed to start listen mode")?;
    ctx.info("Listening for DM1 frames, press Ctrl+C to stop");

    let mut failure = None;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    if let Some(line) = ctx.event_line(&event) {
                        println!("{}", line);
                    }
                    if let SchedulerEvent::Stopped { reason } = event {
                        if let StopReason::TransportFailure(e) = reason {
                            failure = Some(e);
                        }
                        break;
                    }
                }
                Err(RecvError::Lagged(missed)) => warn!(missed, "Event output fell behind"),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::time::sleep(INTERRUPT_POLL) => {
                if interrupted.load(Ordering::SeqCst) {
                    break;
                }
            }
        }
    }

    scheduler.stop().await;
    if let Some(e) = failure {
        bail!("Listen mode stopped: transport failure: {}", e);
    }
    ctx.success(&format!(
        "Stopped after {} FF99 responses",
        scheduler.snapshot().message_counter
    ));
    Ok(())
}
