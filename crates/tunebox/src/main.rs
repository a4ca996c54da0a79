//! tunebox: a networked music playback daemon.
//!
//! Clients connect over TCP and send one JSON command per line to queue songs (local files or
//! HTTP URLs), browse shared directories, control the transport and poll the event log.
//! Playback runs on a single decode thread feeding a lock-free ring buffer that the output
//! device callback drains.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tunebox::cli::Args;
use tunebox::config::DaemonConfig;
use tunebox::runtime;

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,tunebox=info,tunebox_player=info")
        }))
        .init();

    if args.list_devices {
        return runtime::list_devices();
    }

    let config = DaemonConfig::from_args(&args)?;
    tracing::info!(
        bind = %config.bind,
        shared_dirs = config.shared_dirs.len(),
        device = config.device.as_deref().unwrap_or("default"),
        "starting"
    );
    runtime::run(config)
}
