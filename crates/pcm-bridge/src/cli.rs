use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "pcm-bridge", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// TOML config file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Use a specific output device by substring match
    #[arg(long, global = true)]
    pub device: Option<String>,

    /// Initial volume in [0, 1]
    #[arg(long, global = true)]
    pub volume: Option<f64>,

    /// Log format negotiation, graph topology and dropped preset filters
    #[arg(long, global = true)]
    pub debug: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Accept framed PCM streams over TCP, one client at a time
    Listen {
        /// Bind address, e.g. 0.0.0.0:5560
        #[arg(long, default_value = "0.0.0.0:5560")]
        bind: SocketAddr,

        /// EQ preset applied before the first stream
        #[arg(long)]
        preset: Option<String>,
    },

    /// Play raw interleaved little-endian PCM from a file or stdin
    PlayRaw(PlayRawArgs),

    /// List output devices and their supported (rate, depth) pairs
    Devices,

    /// Browse the EQ preset database
    #[command(subcommand)]
    Presets(PresetsCommand),
}

#[derive(ClapArgs, Debug, Clone)]
pub struct PlayRawArgs {
    /// Input path, or `-` for stdin
    pub path: PathBuf,

    /// Sample rate (Hz)
    #[arg(long, default_value_t = 44_100)]
    pub rate: u32,

    /// Bits per sample (16, 24 packed, or 32)
    #[arg(long, default_value_t = 16)]
    pub bits: u16,

    #[arg(long, default_value_t = 2)]
    pub channels: u16,

    /// Chunk length in milliseconds
    #[arg(long, default_value_t = 20)]
    pub chunk_ms: u32,

    /// EQ preset applied before playback
    #[arg(long)]
    pub preset: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum PresetsCommand {
    /// List presets
    List {
        #[arg(long)]
        manufacturer: Option<String>,

        #[arg(long)]
        creator: Option<String>,

        /// name, manufacturer or popularity
        #[arg(long, default_value = "name")]
        sort: String,

        #[arg(long)]
        reverse: bool,

        #[arg(long)]
        limit: Option<usize>,

        /// Only read the local cache, never download
        #[arg(long)]
        offline: bool,
    },

    /// Search display name, name and model
    Search {
        keyword: String,

        #[arg(long)]
        limit: Option<usize>,

        #[arg(long)]
        offline: bool,
    },

    /// Show a preset and what conversion keeps or drops
    Show {
        /// Preset id or name
        name: String,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,

        #[arg(long)]
        offline: bool,
    },

    /// Print the band layout a preset converts to, as an [equalizer] config table
    Apply {
        /// Preset id or name
        name: String,

        #[arg(long)]
        offline: bool,
    },
}
