//! PCM Bridge: plays timestamped PCM streams through a negotiated processing graph.
//!
//! ## Pipeline
//! 1. **Ingest**: framed PCM arrives over TCP (`listen`) or from a raw file (`play-raw`).
//! 2. **Control**: one controller thread owns the graph manager; stream start builds a graph
//!    for the negotiated output format, stream end tears it down after a grace period.
//! 3. **Graph**: convert, volume, equalizer, resample and format fix stages feed a CPAL sink.
//!
//! EQ presets come from the OPRA database (`presets`), cached locally.

mod cli;
mod config;
mod net;
mod presets;
mod runtime;

use anyhow::Result;
use clap::Parser;
use pcm_output::device;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    let settings = config::Settings::from_args(&args)?;

    let default_filter = if settings.debug {
        "info,pcm_bridge=debug,pcm_output=debug,eq_presets=debug"
    } else {
        "info,pcm_bridge=info,pcm_output=info,eq_presets=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .init();
    if settings.debug {
        pcm_output::config::set_debug(true);
    }

    match args.cmd {
        cli::Command::Listen { bind, preset } => runtime::run_listen(&settings, bind, preset.as_deref()),
        cli::Command::PlayRaw(raw) => runtime::run_play_raw(&settings, &raw),
        cli::Command::Devices => print_devices(),
        cli::Command::Presets(cmd) => presets::run(cmd, &settings.presets),
    }
}

fn print_devices() -> Result<()> {
    let host = cpal::default_host();
    for info in device::list_devices(&host)? {
        let marker = if info.is_default { "*" } else { " " };
        println!("{marker} {}", info.name);
        let mut rates: Vec<u32> = info.formats.iter().map(|f| f.sample_rate).collect();
        rates.dedup();
        for rate in rates {
            let depths: Vec<String> = info
                .formats
                .iter()
                .filter(|f| f.sample_rate == rate)
                .map(|f| f.bit_depth.to_string())
                .collect();
            println!("    {rate} Hz: {} bit", depths.join(", "));
        }
    }
    Ok(())
}
