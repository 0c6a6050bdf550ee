//! Clipreel CLI: inspect, validate, preview, and export clip projects.
//!
//! Usage:
//!   clipreel init <NAME>                 Create an empty project file
//!   clipreel info <PROJECT>              Show sources and clips
//!   clipreel validate <PROJECT>          Report problems blocking playback
//!   clipreel check                       Check media backend capabilities
//!   clipreel export <PROJECT> --clip ID  Export a clip to a video file
//!   clipreel preview <PROJECT> --clip ID Play a clip headlessly

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clipreel_common::config::AppConfig;

mod backend;
mod commands;

#[derive(Parser)]
#[command(
    name = "clipreel",
    about = "Preview and export multi-source video clips",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new project file
    Init {
        /// Project name
        name: String,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Import a source as ID=PATH[:DURATION_SECS] (repeatable)
        #[arg(long = "source")]
        sources: Vec<String>,
    },

    /// Show project information
    Info {
        /// Path to the project file
        path: PathBuf,
    },

    /// Validate a project file
    Validate {
        /// Path to the project file
        path: PathBuf,
    },

    /// Check media backend capabilities
    Check,

    /// Export a clip to video
    Export {
        /// Path to the project file
        path: PathBuf,

        /// Clip id or name
        #[arg(short, long)]
        clip: String,

        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Capture frame rate (defaults to the configured rate)
        #[arg(long)]
        fps: Option<u32>,

        /// Do not burn the text overlay into the output
        #[arg(long)]
        no_overlay: bool,
    },

    /// Play a clip without a display, reporting segment changes
    Preview {
        /// Path to the project file
        path: PathBuf,

        /// Clip id or name
        #[arg(short, long)]
        clip: String,

        /// Stop after this many seconds (default: one full loop)
        #[arg(long)]
        seconds: Option<f64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load();
    clipreel_common::logging::init_logging(&clipreel_common::logging::logging_for_verbosity(
        &config.logging,
        cli.verbose,
    ));

    match cli.command {
        Commands::Init {
            name,
            output,
            sources,
        } => commands::init::run(name, output, sources),
        Commands::Info { path } => commands::info::run(path),
        Commands::Validate { path } => commands::validate::run(path),
        Commands::Check => commands::check::run(&config),
        Commands::Export {
            path,
            clip,
            output,
            fps,
            no_overlay,
        } => commands::export::run(&config, path, clip, output, fps, !no_overlay).await,
        Commands::Preview {
            path,
            clip,
            seconds,
        } => commands::preview::run(&config, path, clip, seconds).await,
    }
}
