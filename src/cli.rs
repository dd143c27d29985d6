use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};
use mediagrab::{types::OutputFormat, types::Selector, wire::WireVersion};
use tracing::Level;

macro_rules! arg_env {
    ($v:literal) => {
        concat!("MEDIAGRAB_", $v)
    };
}

/// Resolve web videos, download the selected streams and convert them with ffmpeg.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Args {
    /// Path to a TOML configuration file.
    /// Defaults to `mediagrab.toml` in the current directory, if it exists.
    #[arg(long, global = true, env = arg_env!("CONFIG"))]
    pub config: Option<PathBuf>,

    /// Log level: error, warn, info, debug or trace
    #[arg(long, global = true, default_value_t = Level::INFO, env = arg_env!("LOG"))]
    pub log_level: Level,

    /// Log more. Can be repeated.
    #[arg(short, long, global = true, action = ArgAction::Count, conflicts_with = "quiet")]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check that the encoder (ffmpeg) is installed
    CheckFfmpeg,

    /// Print the metadata of a video as JSON
    Info {
        url: String,

        /// Version of the JSON document
        #[arg(long, default_value_t = WireVersion::V2)]
        wire: WireVersion,
    },

    /// Download a video
    Download {
        url: String,

        /// The streams to download: a stream key (`137`), a pair of keys (`137+140`)
        /// or labels written `<quality>/<audio>/<container>` (`720p/aac/mp4`).
        /// An empty quality downloads the audio only.
        #[arg(long, short = 's', env = arg_env!("QUALITY"))]
        quality: Selector,

        /// Format of the output file
        #[arg(long, short, value_enum, default_value_t = OutputFormat::Mp4, env = arg_env!("FORMAT"))]
        format: OutputFormat,

        /// The path to the output directory
        #[arg(long, short, default_value = ".", env = arg_env!("OUT"))]
        out: PathBuf,
    },
}

impl Args {
    pub fn level(&self) -> Level {
        if self.quiet {
            return Level::ERROR;
        }

        let levels = [Level::ERROR, Level::WARN, Level::INFO, Level::DEBUG, Level::TRACE];
        let base = levels
            .iter()
            .position(|l| *l == self.log_level)
            .unwrap_or(2);
        levels[(base + usize::from(self.verbose)).min(levels.len() - 1)]
    }
}
