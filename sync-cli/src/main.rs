//! # wist-cli
//!
//! CLI tool for exercising the WIST sync protocol.
//!
//! ## Commands
//!
//! - `demo`: Run two in-process devices over the mock transport
//! - `inspect`: Decode a hex-encoded wire frame
//!
//! ## Example
//!
//! ```bash
//! # Connect two devices, start at 128 BPM, stop, disconnect
//! wist-cli demo --tempo 128
//!
//! # Same, with settings from a file
//! wist-cli demo --config wist.toml
//!
//! # Decode a captured frame
//! wist-cli inspect 8ba7766572...
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{demo, inspect};

/// CLI tool for exercising the WIST sync protocol.
#[derive(Parser, Debug)]
#[command(name = "wist-cli")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Connect two in-process devices, then start and stop them
    Demo {
        /// Tempo for the start command (BPM)
        #[arg(long, default_value_t = 120.0)]
        tempo: f32,

        /// TOML configuration shared by both devices
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// How long to let beacons sample the clock before starting (ms)
        #[arg(long, default_value_t = 1000)]
        settle_ms: u64,
    },

    /// Decode a hex-encoded wire frame and print it as JSON
    Inspect {
        /// Frame bytes as hex
        frame: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Demo {
            tempo,
            config,
            settle_ms,
        } => {
            demo::run(tempo, config.as_deref(), settle_ms).await?;
        }
        Commands::Inspect { frame } => {
            inspect::run(&frame)?;
        }
    }

    Ok(())
}
