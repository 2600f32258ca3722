//! Output device discovery and selection.

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

/// Pick a CPAL output device.
///
/// With a `needle`, the first output device whose name contains it
/// (case-insensitive); otherwise the host default.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    if let Some(needle) = needle {
        let needle_lc = needle.to_lowercase();
        let found = host
            .output_devices()
            .context("No output devices")?
            .find(|d| {
                d.description()
                    .ok()
                    .map(|n| n.name().to_lowercase().contains(&needle_lc))
                    .unwrap_or(false)
            });
        return found.ok_or_else(|| anyhow!("No output device matched: {needle}"));
    }

    host.default_output_device()
        .ok_or_else(|| anyhow!("No default output device"))
}

/// Choose the output config closest to the pipeline's PCM rate.
///
/// Prefers a rate at or below `target_rate`, then the higher rate, then the
/// sample format that needs the least conversion.
pub fn pick_output_config(
    device: &cpal::Device,
    target_rate: u32,
) -> Result<cpal::SupportedStreamConfig> {
    let mut best: Option<(CandidateRank, cpal::SupportedStreamConfig)> = None;

    for range in device.supported_output_configs()? {
        let rate = rate_for_range(range.min_sample_rate(), range.max_sample_rate(), target_rate);
        let rank = CandidateRank {
            at_or_below: rate <= target_rate,
            rate,
            format_cost: std::cmp::Reverse(format_cost(range.sample_format())),
        };
        if best.as_ref().is_none_or(|(b, _)| rank > *b) {
            best = Some((rank, range.with_sample_rate(rate)));
        }
    }

    best.map(|(_, cfg)| cfg)
        .ok_or_else(|| anyhow!("No supported output configs"))
}

/// Prefer a fixed buffer size when the device reports a range.
pub fn pick_buffer_size(config: &cpal::SupportedStreamConfig) -> Option<cpal::BufferSize> {
    const MAX_FRAMES: u32 = 16_384;
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            Some(cpal::BufferSize::Fixed((*max).min(MAX_FRAMES).max(*min)))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

/// Print available output devices to stdout.
pub fn list_devices(host: &cpal::Host) -> Result<()> {
    let devices = host.output_devices().context("No output devices")?;
    for (i, d) in devices.enumerate() {
        println!("#{i}: {}", d.description()?);
    }
    Ok(())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct CandidateRank {
    at_or_below: bool,
    rate: u32,
    format_cost: std::cmp::Reverse<u8>,
}

fn rate_for_range(min: u32, max: u32, target: u32) -> u32 {
    target.clamp(min, max.max(min))
}

fn format_cost(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I16 => 1,
        cpal::SampleFormat::I32 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}
