//! dtcv - instrument-cluster DTC display verification from the command line
//!
//! Encodes and decodes DM1/FF99 frames, checks entry files, and runs the
//! bench: manual sends, ASC trace replay, listen mode and DTC sequences.

mod artifacts;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use dtcv_core::{FieldKind, Lamp};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::Config;
use crate::output::{OutputContext, OutputFormat};

const DEFAULT_FILTER: &str = "dtcv=info,dtcv_bench=info,dtcv_core=info";

#[derive(Parser)]
#[command(name = "dtcv")]
#[command(author, version, about = "Instrument-cluster DTC display verification")]
#[command(propagate_version = true)]
struct Cli {
    /// CLI configuration file path
    #[arg(short, long, env = "DTCV_CONFIG")]
    config: Option<PathBuf>,

    /// Bench configuration (TOML)
    #[arg(short, long, env = "DTCV_BENCH")]
    bench: Option<PathBuf>,

    /// Use this SocketCAN interface instead of the configured transport
    #[arg(short, long, env = "DTCV_INTERFACE")]
    interface: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    output: OutputFormat,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Minimal output (for scripting)
    #[arg(short, long)]
    quiet: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Display field selector for `validate`
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Field {
    Spn,
    Fmi,
}

impl From<Field> for FieldKind {
    fn from(field: Field) -> Self {
        match field {
            Field::Spn => FieldKind::Spn,
            Field::Fmi => FieldKind::Fmi,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Encode a DM1 (or FF99) frame
    Encode {
        /// Suspect parameter number (1..524287)
        spn: u32,

        /// Failure mode identifier (0..31)
        fmi: u32,

        /// Lamp: none, amber, red (or 0/1/2)
        #[arg(long, default_value = "none")]
        lamp: Lamp,

        /// Source address (decimal or 0x-prefixed hex)
        #[arg(long, default_value = "0", value_parser = parse_number)]
        sa: u32,

        /// Encode an FF99 display reading instead of a DM1
        #[arg(long)]
        ff99: bool,
    },

    /// Decode a DM1 or FF99 frame given as ID#DATA
    Decode {
        /// Frame in candump notation, e.g. 18FECA00#04FF79F0EE0000FF
        frame: String,
    },

    /// Run recognized text through the SPN/FMI validator
    Validate {
        /// Recognized text
        text: String,

        /// Field the text was read from
        #[arg(value_enum)]
        field: Field,

        /// Recognizer confidence
        #[arg(long, default_value = "1.0")]
        confidence: f32,
    },

    /// Load an entry file and list its DTCs
    Entries {
        /// Entry file (.csv, .txt or .toml)
        file: PathBuf,
    },

    /// Send one DTC on the bus
    Send {
        /// Suspect parameter number (1..524287)
        spn: u32,

        /// Failure mode identifier (0..31)
        fmi: u32,

        /// Lamp: none, amber, red (or 0/1/2)
        #[arg(long, default_value = "none")]
        lamp: Lamp,

        /// Source address (decimal or 0x-prefixed hex)
        #[arg(long, default_value = "0", value_parser = parse_number)]
        sa: u32,

        /// Send repeatedly using the configured count and spacing
        #[arg(long)]
        repeat: bool,

        /// Override the configured repeat count
        #[arg(long, requires = "repeat")]
        count: Option<u32>,
    },

    /// Replay a Vector ASC trace
    Replay {
        /// Trace file
        file: PathBuf,

        /// Restart the trace when it ends
        #[arg(long = "loop")]
        looped: bool,
    },

    /// Answer DM1 traffic with FF99 display readings
    Listen {
        /// Scripted display readings (JSON array)
        #[arg(long)]
        script: PathBuf,
    },

    /// Run a DTC verification sequence
    Sequence {
        /// Entry file (.csv, .txt or .toml)
        file: PathBuf,

        /// Scripted display readings (JSON array); the display echoes
        /// each expected entry when omitted
        #[arg(long)]
        script: Option<PathBuf>,

        /// Write the JSON run report here
        #[arg(long)]
        report: Option<PathBuf>,

        /// Save failure snapshots to this directory
        #[arg(long)]
        artifacts: Option<PathBuf>,
    },

    /// Print the effective bench configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    };

    tracing_subscriber::registry()
        .with(
            cli.log_json
                .then(|| fmt::layer().json().with_writer(std::io::stderr)),
        )
        .with(
            (!cli.log_json).then(|| {
                fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr)
            }),
        )
        .with(filter)
        .init();

    // Load config file
    let config = if let Some(config_path) = &cli.config {
        Config::load_from(config_path)?
    } else {
        Config::load().unwrap_or_default()
    };

    let merged = config.merge_with_args(
        cli.bench.as_deref(),
        cli.interface.as_deref(),
        cli.no_color,
    );

    let ctx = OutputContext::new(cli.output, merged.no_color, cli.quiet);

    match &cli.command {
        Commands::Encode {
            spn,
            fmi,
            lamp,
            sa,
            ff99,
        } => {
            commands::encode(*spn, *fmi, *lamp, *sa, *ff99, &ctx)?;
        }

        Commands::Decode { frame } => {
            commands::decode(frame, &ctx)?;
        }

        Commands::Validate {
            text,
            field,
            confidence,
        } => {
            let bench = merged.bench_config()?;
            commands::validate(text, (*field).into(), *confidence, &bench, &ctx)?;
        }

        Commands::Entries { file } => {
            commands::entries(file, &ctx)?;
        }

        Commands::Send {
            spn,
            fmi,
            lamp,
            sa,
            repeat,
            count,
        } => {
            let bench = merged.bench_config()?;
            commands::send(&bench, *spn, *fmi, *lamp, *sa, *repeat, *count, &ctx).await?;
        }

        Commands::Replay { file, looped } => {
            let bench = merged.bench_config()?;
            commands::replay(&bench, file, *looped, &ctx).await?;
        }

        Commands::Listen { script } => {
            let bench = merged.bench_config()?;
            commands::listen(bench, script, &ctx).await?;
        }

        Commands::Sequence {
            file,
            script,
            report,
            artifacts,
        } => {
            let bench = merged.bench_config()?;
            commands::sequence(
                bench,
                file,
                script.as_deref(),
                report.as_deref(),
                artifacts.as_deref(),
                &ctx,
            )
            .await?;
        }

        Commands::Config => {
            let bench = merged.bench_config()?;
            commands::show_config(&bench, &ctx)?;
        }
    }

    Ok(())
}

/// Parse a decimal or 0x-prefixed hex number
fn parse_number(s: &str) -> Result<u32, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number '{}': {}", s, e))
}
