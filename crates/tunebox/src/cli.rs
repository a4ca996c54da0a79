use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Default)]
#[command(name = "tunebox", version, about = "Networked music playback daemon")]
pub struct Args {
    /// TOML config file; flags given here override its values
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Command server bind address, e.g. 127.0.0.1:1337
    #[arg(long)]
    pub bind: Option<SocketAddr>,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Directory clients may browse and queue songs from (repeatable)
    #[arg(long = "share", value_name = "DIR")]
    pub shared_dirs: Vec<PathBuf>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Do not advertise the command server over mDNS
    #[arg(long)]
    pub no_mdns: bool,
}
