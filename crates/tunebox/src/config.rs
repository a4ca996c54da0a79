//! Configuration loading and resolution.
//!
//! An optional TOML file supplies defaults; command-line flags override it.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tunebox_player::config::PlaybackConfig;

use crate::cli::Args;

pub const DEFAULT_BIND: &str = "127.0.0.1:1337";

/// Config file schema. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Bind address (host:port).
    pub bind: Option<String>,
    /// Output device substring.
    pub device: Option<String>,
    /// Shared directories.
    pub share: Option<Vec<PathBuf>>,
    /// Advertise over mDNS (default: true).
    pub mdns: Option<bool>,
    /// Name advertised over mDNS (default: host name).
    pub name: Option<String>,
    /// Ring buffer capacity in samples.
    pub ring_capacity: Option<usize>,
    /// Decoder chunk size in frames.
    pub chunk_frames: Option<usize>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        toml::from_str::<FileConfig>(&raw).with_context(|| format!("parse config {:?}", path))
    }
}

/// Fully resolved daemon settings.
#[derive(Clone, Debug)]
pub struct DaemonConfig {
    pub bind: SocketAddr,
    pub device: Option<String>,
    pub shared_dirs: Vec<PathBuf>,
    pub mdns: bool,
    pub name: Option<String>,
    pub playback: PlaybackConfig,
}

impl DaemonConfig {
    /// Read the config file named by `--config` (if any) and merge the flags over it.
    pub fn from_args(args: &Args) -> Result<Self> {
        let file = match args.config.as_deref() {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::resolve(args, file)
    }

    pub fn resolve(args: &Args, file: FileConfig) -> Result<Self> {
        let bind = match (args.bind, file.bind.as_deref()) {
            (Some(bind), _) => bind,
            (None, Some(raw)) => raw.parse().with_context(|| format!("parse bind {raw}"))?,
            (None, None) => DEFAULT_BIND.parse().context("parse default bind")?,
        };

        let shared_dirs = if args.shared_dirs.is_empty() {
            file.share.unwrap_or_default()
        } else {
            args.shared_dirs.clone()
        };

        let mut playback = PlaybackConfig::default();
        if let Some(capacity) = file.ring_capacity {
            anyhow::ensure!(capacity >= 2, "ring_capacity must hold at least one frame");
            playback.ring_capacity = capacity;
        }
        if let Some(frames) = file.chunk_frames {
            anyhow::ensure!(frames > 0, "chunk_frames must be positive");
            playback.chunk_frames = frames;
        }

        Ok(Self {
            bind,
            device: normalize_device_name(args.device.clone().or(file.device)),
            shared_dirs,
            mdns: !args.no_mdns && file.mdns.unwrap_or(true),
            name: file.name.filter(|n| !n.trim().is_empty()),
            playback,
        })
    }
}

fn normalize_device_name(device: Option<String>) -> Option<String> {
    device.and_then(|name| {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_without_file_or_flags() {
        let cfg = DaemonConfig::resolve(&Args::default(), FileConfig::default()).unwrap();
        assert_eq!(cfg.bind, DEFAULT_BIND.parse().unwrap());
        assert!(cfg.shared_dirs.is_empty());
        assert!(cfg.mdns);
        assert_eq!(cfg.device, None);
        assert_eq!(cfg.playback.ring_capacity, 8192);
    }

    #[test]
    fn load_parses_all_keys() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
bind = "0.0.0.0:9000"
device = "USB"
share = ["/music"]
mdns = false
name = "kitchen"
ring_capacity = 16384
chunk_frames = 512
"#
        )
        .unwrap();

        let parsed = FileConfig::load(file.path()).unwrap();
        let cfg = DaemonConfig::resolve(&Args::default(), parsed).unwrap();
        assert_eq!(cfg.bind, "0.0.0.0:9000".parse().unwrap());
        assert_eq!(cfg.device.as_deref(), Some("USB"));
        assert_eq!(cfg.shared_dirs, vec![PathBuf::from("/music")]);
        assert!(!cfg.mdns);
        assert_eq!(cfg.name.as_deref(), Some("kitchen"));
        assert_eq!(cfg.playback.ring_capacity, 16384);
        assert_eq!(cfg.playback.chunk_frames, 512);
    }

    #[test]
    fn flags_override_file() {
        let args = Args {
            bind: Some("127.0.0.1:2000".parse().unwrap()),
            device: Some("  DAC ".into()),
            shared_dirs: vec![PathBuf::from("/flag")],
            no_mdns: true,
            ..Args::default()
        };
        let file = FileConfig {
            bind: Some("0.0.0.0:9000".into()),
            device: Some("speaker".into()),
            share: Some(vec![PathBuf::from("/file")]),
            mdns: Some(true),
            ..FileConfig::default()
        };
        let cfg = DaemonConfig::resolve(&args, file).unwrap();
        assert_eq!(cfg.bind, "127.0.0.1:2000".parse().unwrap());
        assert_eq!(cfg.device.as_deref(), Some("DAC"));
        assert_eq!(cfg.shared_dirs, vec![PathBuf::from("/flag")]);
        assert!(!cfg.mdns);
    }

    #[test]
    fn unknown_keys_and_bad_values_are_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "volume = 3").unwrap();
        assert!(FileConfig::load(file.path()).is_err());

        let bad_bind = FileConfig {
            bind: Some("localhost".into()),
            ..FileConfig::default()
        };
        assert!(DaemonConfig::resolve(&Args::default(), bad_bind).is_err());

        let zero_chunk = FileConfig {
            chunk_frames: Some(0),
            ..FileConfig::default()
        };
        assert!(DaemonConfig::resolve(&Args::default(), zero_chunk).is_err());
    }

    #[test]
    fn blank_device_means_default() {
        assert_eq!(normalize_device_name(Some("   ".into())), None);
        assert_eq!(normalize_device_name(None), None);
    }
}
