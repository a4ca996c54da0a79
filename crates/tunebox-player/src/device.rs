//! Output device discovery and stream configuration.

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

/// Pick the first output device whose name contains `needle` (case-insensitive),
/// or the host default when no needle is given.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    let Some(needle) = needle.filter(|n| !n.trim().is_empty()) else {
        return host
            .default_output_device()
            .ok_or_else(|| anyhow!("No default output device"));
    };

    host.output_devices()
        .context("No output devices")?
        .find(|d| {
            d.description()
                .map(|desc| matches_device_name(&desc.name(), needle))
                .unwrap_or(false)
        })
        .ok_or_else(|| anyhow!("No output device matched: {needle}"))
}

/// Choose an output config able to run at `target_rate`.
///
/// Candidates are ranked by: exact rate support, stereo channel layout, sample format.
/// When no range contains the target, the closest supported rate is used and the caller
/// is expected to resample.
pub fn pick_output_config(
    device: &cpal::Device,
    target_rate: u32,
) -> Result<cpal::SupportedStreamConfig> {
    let mut best: Option<(Rank, cpal::SupportedStreamConfig)> = None;

    for range in device
        .supported_output_configs()
        .context("query supported output configs")?
    {
        let rate = clamp_rate(range.min_sample_rate(), range.max_sample_rate(), target_rate);
        let rank = Rank {
            exact: rate == target_rate,
            stereo: range.channels() == 2,
            distance: rate.abs_diff(target_rate),
            format: sample_format_rank(range.sample_format()),
        };
        if best.as_ref().is_none_or(|(b, _)| rank.beats(b)) {
            best = Some((rank, range.with_sample_rate(rate)));
        }
    }

    best.map(|(_, cfg)| cfg)
        .ok_or_else(|| anyhow!("No supported output configs"))
}

/// Prefer a fixed buffer size if the device advertises a range, capped to keep latency sane.
pub fn pick_buffer_size(config: &cpal::SupportedStreamConfig) -> cpal::BufferSize {
    const MAX_FRAMES: u32 = 4096;
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            cpal::BufferSize::Fixed((*max).min(MAX_FRAMES).max(*min))
        }
        cpal::SupportedBufferSize::Unknown => cpal::BufferSize::Default,
    }
}

/// Print available output devices to stdout (`--list-devices`).
pub fn list_devices(host: &cpal::Host) -> Result<()> {
    let devices = host.output_devices().context("No output devices")?;
    for (i, d) in devices.enumerate() {
        println!("#{i}: {}", d.description()?);
    }
    Ok(())
}

#[derive(Clone, Copy, Debug)]
struct Rank {
    exact: bool,
    stereo: bool,
    distance: u32,
    format: u8,
}

impl Rank {
    fn beats(&self, other: &Rank) -> bool {
        if self.exact != other.exact {
            return self.exact;
        }
        if self.stereo != other.stereo {
            return self.stereo;
        }
        if self.distance != other.distance {
            return self.distance < other.distance;
        }
        self.format < other.format
    }
}

fn clamp_rate(min: u32, max: u32, target: u32) -> u32 {
    target.clamp(min, max.max(min))
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I32 => 1,
        cpal::SampleFormat::I16 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    !needle.is_empty() && name.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rank(exact: bool, stereo: bool, distance: u32, format: u8) -> Rank {
        Rank {
            exact,
            stereo,
            distance,
            format,
        }
    }

    #[test]
    fn matches_device_name_is_case_insensitive() {
        assert!(matches_device_name("USB DAC", "dac"));
        assert!(matches_device_name("usb dac", "USB"));
        assert!(!matches_device_name("USB DAC", "speaker"));
        assert!(!matches_device_name("USB DAC", "  "));
    }

    #[test]
    fn clamp_rate_stays_in_range() {
        assert_eq!(clamp_rate(44_100, 96_000, 48_000), 48_000);
        assert_eq!(clamp_rate(44_100, 96_000, 22_050), 44_100);
        assert_eq!(clamp_rate(44_100, 96_000, 192_000), 96_000);
    }

    #[test]
    fn exact_rate_beats_everything() {
        assert!(rank(true, false, 0, 3).beats(&rank(false, true, 100, 0)));
    }

    #[test]
    fn stereo_beats_other_layouts_at_same_rate() {
        assert!(rank(true, true, 0, 2).beats(&rank(true, false, 0, 0)));
    }

    #[test]
    fn closer_rate_then_format_break_ties() {
        assert!(rank(false, true, 100, 2).beats(&rank(false, true, 4_000, 0)));
        assert!(rank(true, true, 0, 0).beats(&rank(true, true, 0, 2)));
        assert!(!rank(true, true, 0, 2).beats(&rank(true, true, 0, 2)));
    }
}
