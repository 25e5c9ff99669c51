//! Send command - manual DTC transmission

use anyhow::Result;
use dtcv_bench::{build_manual_frame, send_manual, BenchConfig, Repeat};
use dtcv_core::Lamp;

use super::open_transport;
use crate::output::{FrameRow, OutputContext};

#[allow(clippy::too_many_arguments)]
pub async fn send(
    bench: &BenchConfig,
    spn: u32,
    fmi: u32,
    lamp: Lamp,
    sa: u32,
    repeat: bool,
    count: Option<u32>,
    ctx: &OutputContext,
) -> Result<()> {
    // Validate before touching the bus
    let frame = build_manual_frame(spn, fmi, lamp, sa)?;
    let mode = match (repeat, count) {
        (false, _) => Repeat::Once,
        (true, None) => Repeat::from_config(&bench.manual, &bench.timing),
        (true, Some(count)) => Repeat::Times {
            count,
            interval: bench.timing.units(bench.manual.repeat_interval_units),
        },
    };

    let transport = open_transport(bench).await?;
    let result = send_manual(transport.as_ref(), &frame, mode).await;
    transport.close().await;
    let sent = result?;

    ctx.print_one(&FrameRow::from(&frame));
    ctx.success(&format!("Sent {} frame(s)", sent));
    Ok(())
}
