//! Command implementations for dtcv

pub mod codec;
pub mod entries;
pub mod listen;
pub mod replay;
pub mod send;
pub mod sequence;
pub mod show;
pub mod validate;

pub use codec::{decode, encode};
pub use entries::entries;
pub use listen::listen;
pub use replay::replay;
pub use send::send;
pub use sequence::sequence;
pub use show::show_config;
pub use validate::validate;

use anyhow::{Context, Result};
use dtcv_bench::{create_transport, CanTransport, ScriptedReading};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How often long-running commands check for Ctrl+C
const INTERRUPT_POLL: Duration = Duration::from_millis(100);

/// Flag set by Ctrl+C
fn interrupt_flag() -> Result<Arc<AtomicBool>> {
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = interrupted.clone();
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .context("Failed to install Ctrl+C handler")?;
    Ok(interrupted)
}

/// Create the configured transport and open it
async fn open_transport(config: &dtcv_bench::BenchConfig) -> Result<Arc<dyn CanTransport>> {
    let transport = create_transport(&config.transport).context("Failed to create CAN transport")?;
    transport
        .open()
        .await
        .context("Failed to open CAN transport")?;
    Ok(transport)
}

/// Load a JSON array of scripted display readings
fn read_script(path: &Path) -> Result<Vec<ScriptedReading>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read script: {}", path.display()))?;
    ScriptedReading::parse_script(&content)
        .with_context(|| format!("Failed to parse script: {}", path.display()))
}
