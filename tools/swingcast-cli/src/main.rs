//! Swingcast CLI: record, compress, and upload swing analyses.
//!
//! Usage:
//!   swingcast record [OPTIONS]        Record one take of the configured capture source
//!   swingcast compress <INPUT>        Bring a recording under the upload limit
//!   swingcast upload <FILE> -p <ID>   Upload a finished analysis
//!   swingcast select <SUBMISSION>     Store the submission being analyzed
//!   swingcast packages                List workout packages
//!   swingcast check                   Check system capabilities

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use swingcast_common::config::AppConfig;

mod commands;

#[derive(Parser)]
#[command(
    name = "swingcast",
    about = "Screen-and-voice swing analysis recorder",
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
    /// Record one take; stops on Ctrl+C or at the duration ceiling
    Record {
        /// Segment output directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Duration ceiling in seconds
        #[arg(long)]
        max_secs: Option<u64>,

        /// Target FPS
        #[arg(long)]
        fps: Option<u32>,

        /// Crop height in logical pixels (width follows 16:9)
        #[arg(long)]
        crop_height: Option<u32>,

        /// Horizontal crop position, normalized: -1 left edge, 0 centered, 1 right edge
        #[arg(long, default_value = "0", allow_negative_numbers = true, value_parser = parse_offset)]
        offset_x: f64,

        /// Vertical crop position, normalized: -1 top edge, 0 centered, 1 bottom edge
        #[arg(long, default_value = "0", allow_negative_numbers = true, value_parser = parse_offset)]
        offset_y: f64,

        /// Disable microphone capture
        #[arg(long)]
        no_mic: bool,

        /// Compress the finished take when it exceeds the upload limit
        #[arg(long)]
        compress: bool,

        /// Record compositor snapshots and print the last one
        #[arg(long)]
        debug_compositor: bool,
    },

    /// Re-encode a recording so it fits the upload limit
    Compress {
        /// Recorded WebM file
        input: PathBuf,

        /// Directory for the re-encoded file (defaults to the input's)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Duration to assume when the container has none (seconds)
        #[arg(long)]
        duration: Option<f64>,
    },

    /// Upload a finished analysis for the selected submission
    Upload {
        /// Final WebM file
        file: PathBuf,

        /// Workout package id (see `swingcast packages`)
        #[arg(short, long)]
        package: Option<String>,

        /// Recording duration in seconds
        #[arg(long, default_value = "0")]
        duration: f64,

        /// Return to the coach queue instead of the admin queue
        #[arg(long)]
        coach: bool,

        /// Override the configured API base URL
        #[arg(long)]
        api_base: Option<String>,

        /// Remove the file once the upload succeeds
        #[arg(long)]
        delete_after: bool,
    },

    /// Store the submission and video being analyzed
    Select {
        /// Submission id
        submission: String,

        /// Player name shown in logs
        #[arg(long)]
        player: Option<String>,

        /// Stream URL of the player's video
        #[arg(long)]
        video: Option<String>,
    },

    /// List workout packages
    Packages {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check system capabilities
    Check {
        /// Also meter the microphone for a few seconds
        #[arg(long)]
        mic: bool,
    },
}

fn parse_offset(value: &str) -> Result<f64, String> {
    let offset: f64 = value
        .parse()
        .map_err(|_| format!("`{value}` is not a number"))?;
    if (-1.0..=1.0).contains(&offset) {
        Ok(offset)
    } else {
        Err(format!("`{value}` is outside [-1, 1]"))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load();

    let mut logging = config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    swingcast_common::logging::init_logging(&logging);

    match cli.command {
        Commands::Record {
            output,
            max_secs,
            fps,
            crop_height,
            offset_x,
            offset_y,
            no_mic,
            compress,
            debug_compositor,
        } => {
            commands::record::run(
                config,
                commands::record::RecordArgs {
                    output,
                    max_secs,
                    fps,
                    crop_height,
                    offset: (offset_x, offset_y),
                    microphone: !no_mic,
                    compress,
                    debug_compositor,
                },
            )
            .await
        }
        Commands::Compress {
            input,
            output,
            duration,
        } => commands::compress::run(config, input, output, duration).await,
        Commands::Upload {
            file,
            package,
            duration,
            coach,
            api_base,
            delete_after,
        } => {
            commands::upload::run(
                config,
                commands::upload::UploadArgs {
                    file,
                    package,
                    duration,
                    coach,
                    api_base,
                    delete_after,
                },
            )
            .await
        }
        Commands::Select {
            submission,
            player,
            video,
        } => commands::select::run(config, submission, player, video),
        Commands::Packages { json } => commands::packages::run(json),
        Commands::Check { mic } => commands::check::run(config, mic).await,
    }
}
