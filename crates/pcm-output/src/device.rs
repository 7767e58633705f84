//! CPAL device queries behind the output target: which devices exist, which
//! (rate, depth) pairs they accept, and which stream config serves a negotiated format.

use std::collections::BTreeSet;

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};
use pcm_types::SupportedFormat;

/// Rates probed when building the supported-format list.
pub const CANDIDATE_RATES: [u32; 8] = [
    44_100, 48_000, 88_200, 96_000, 176_400, 192_000, 352_800, 384_000,
];

/// Resolve the configured output device: a case-insensitive substring match on the
/// device name, or the host default when no name is configured.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    let Some(needle) = needle else {
        return host
            .default_output_device()
            .ok_or_else(|| anyhow!("host has no default output device"));
    };
    host.output_devices()
        .context("enumerate output devices")?
        .find(|d| device_name(d).is_some_and(|n| matches_device_name(&n, needle)))
        .ok_or_else(|| anyhow!("no output device matches {needle:?}"))
}

pub fn device_name(device: &cpal::Device) -> Option<String> {
    device.description().ok().map(|d| d.name().to_string())
}

/// Bit depth a CPAL sample format can carry.
pub fn format_depth(format: cpal::SampleFormat) -> u16 {
    match format.sample_size() {
        1 => 8,
        2 => 16,
        3 => 24,
        _ => 32,
    }
}

/// (rate, depth) pairs the device accepts, restricted to [`CANDIDATE_RATES`], sorted.
pub fn supported_formats(device: &cpal::Device) -> Result<Vec<SupportedFormat>> {
    let mut out = BTreeSet::new();
    for range in device.supported_output_configs()? {
        let depth = format_depth(range.sample_format());
        if !matches!(depth, 16 | 24 | 32) {
            continue;
        }
        let (min, max) = (range.min_sample_rate(), range.max_sample_rate());
        for rate in CANDIDATE_RATES.iter().copied().filter(|r| (min..=max).contains(r)) {
            out.insert(SupportedFormat::new(rate, depth));
        }
    }
    Ok(out.into_iter().collect())
}

/// Choose the output config for `rate` and `bit_depth`.
///
/// Only ranges containing `rate` qualify. Among those, an exact depth match wins, then a
/// deeper format, then the usual sample-format preference (float first).
pub fn pick_output_config(
    device: &cpal::Device,
    rate: u32,
    bit_depth: u16,
) -> Result<cpal::SupportedStreamConfig> {
    device
        .supported_output_configs()
        .context("query output configs")?
        .filter(|r| (r.min_sample_rate()..=r.max_sample_rate()).contains(&rate))
        .min_by_key(|r| config_rank(r.sample_format(), bit_depth))
        .map(|r| r.with_sample_rate(rate))
        .ok_or_else(|| anyhow!("no output config supports {rate} Hz"))
}

fn config_rank(format: cpal::SampleFormat, bit_depth: u16) -> (bool, bool, u8) {
    let depth = format_depth(format);
    (depth != bit_depth, depth < bit_depth, sample_format_rank(format))
}

/// Largest hardware period requested, in frames.
const MAX_PERIOD_FRAMES: u32 = 16_384;

/// Fixed hardware period for the sink: the device maximum, capped at
/// [`MAX_PERIOD_FRAMES`] but never below the device minimum. `None` leaves the host default.
pub fn pick_buffer_size(config: &cpal::SupportedStreamConfig) -> Option<cpal::BufferSize> {
    let cpal::SupportedBufferSize::Range { min, max } = config.buffer_size() else {
        return None;
    };
    Some(cpal::BufferSize::Fixed((*max).min(MAX_PERIOD_FRAMES).max(*min)))
}

/// Callback sample formats in order of preference; float first since the graph runs in f32.
fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    use cpal::SampleFormat::*;
    [F32, I32, I16, U16]
        .iter()
        .position(|f| *f == format)
        .map_or(u8::MAX, |i| i as u8)
}

/// Output device metadata for the CLI.
#[derive(Clone, Debug)]
pub struct DeviceInfo {
    pub name: String,
    pub is_default: bool,
    pub formats: Vec<SupportedFormat>,
}

/// Enumerate output devices with their supported formats.
///
/// Devices that fail to report configs are listed with no formats.
pub fn list_devices(host: &cpal::Host) -> Result<Vec<DeviceInfo>> {
    let default_name = host.default_output_device().as_ref().and_then(device_name);
    let devices = host.output_devices().context("enumerate output devices")?;
    let mut out = Vec::new();
    for d in devices {
        let Some(name) = device_name(&d) else {
            continue;
        };
        let formats = supported_formats(&d).unwrap_or_else(|e| {
            tracing::warn!(device = %name, "failed to query output configs: {e:#}");
            Vec::new()
        });
        out.push(DeviceInfo {
            is_default: default_name.as_deref() == Some(name.as_str()),
            name,
            formats,
        });
    }
    Ok(out)
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}
