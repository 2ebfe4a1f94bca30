//! trackmux CLI: command-line interface for multiplexed track export.
//!
//! Usage:
//!   trackmux init <DIR>          Synthesize a source bundle
//!   trackmux export <INPUT>      Export a bundle with extra metadata/image tracks
//!   trackmux info <BUNDLE>       Show bundle information
//!   trackmux metadata <BUNDLE>   Print the timed metadata tracks of a bundle

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "trackmux",
    about = "Multiplex media, timed metadata, and image tracks into one export",
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
    /// Synthesize a source bundle with audio and/or video tracks
    Init {
        /// Bundle directory to create
        dir: PathBuf,

        /// Track duration in seconds
        #[arg(long, default_value = "5.0")]
        duration: f64,

        /// Include an audio track
        #[arg(long)]
        audio: bool,

        /// Include a video track
        #[arg(long)]
        video: bool,
    },

    /// Export a source bundle, adding metadata and image tracks
    Export {
        /// Source bundle directory
        input: PathBuf,

        /// Output bundle directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Container kind: mov|mp4|bundle
        #[arg(long)]
        container: Option<String>,

        /// JSON file holding an array of metadata groups (one track per file)
        #[arg(long = "metadata", value_name = "FILE")]
        metadata: Vec<PathBuf>,

        /// PNG image for the synthetic video track (repeat, paired with --range)
        #[arg(long = "image", value_name = "PNG")]
        images: Vec<PathBuf>,

        /// Time range START:DURATION in seconds for each --image
        #[arg(long = "range", value_name = "START:DUR")]
        ranges: Vec<String>,

        /// Keep source video tracks when an image track is given
        #[arg(long)]
        keep_source_video: bool,

        /// Give up if the export has not completed after this many seconds
        #[arg(long)]
        timeout: Option<f64>,

        /// Worker threads for the export runtime
        #[arg(long)]
        workers: Option<usize>,

        /// Units buffered per track before a pipe waits
        #[arg(long)]
        capacity: Option<usize>,
    },

    /// Show bundle information
    Info {
        /// Bundle directory
        path: PathBuf,
    },

    /// Print the timed metadata tracks of a bundle
    Metadata {
        /// Bundle directory
        path: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = trackmux_common::AppConfig::load();

    // Initialize logging
    let mut logging = config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    trackmux_common::logging::init_logging(&logging);

    match cli.command {
        Commands::Init {
            dir,
            duration,
            audio,
            video,
        } => commands::init::run(dir, duration, audio, video),
        Commands::Export {
            input,
            output,
            container,
            metadata,
            images,
            ranges,
            keep_source_video,
            timeout,
            workers,
            capacity,
        } => commands::export::run(
            &config,
            commands::export::ExportOptions {
                input,
                output,
                container,
                metadata,
                images,
                ranges,
                keep_source_video,
                timeout,
                workers,
                capacity,
            },
        ),
        Commands::Info { path } => commands::info::run(path),
        Commands::Metadata { path } => commands::metadata::run(path),
    }
}
