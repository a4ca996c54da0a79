//! Daemon wiring: output device, player, command server and discovery.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use tunebox_player::decode::SymphoniaDecoder;
use tunebox_player::output::CpalOutput;
use tunebox_player::playlist::Playlist;
use tunebox_player::ring::SampleRing;
use tunebox_player::stream::DefaultOpener;
use tunebox_player::{Player, PlayerParts, device};

use crate::commands::Commands;
use crate::config::DaemonConfig;
use crate::library::SharedLibrary;
use crate::mdns;
use crate::server::CommandServer;
use crate::song_info::{SongInfoCache, SymphoniaTags};

/// List output devices and print them to stdout.
pub fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    device::list_devices(&host)
}

/// Run the daemon until the process is interrupted.
pub fn run(config: DaemonConfig) -> Result<()> {
    let playback = config.playback.clone();
    let ring = Arc::new(SampleRing::new(
        playback.ring_capacity,
        playback.producer_backoff,
    ));
    let output = Arc::new(CpalOutput::open(
        config.device.clone(),
        ring.clone(),
        playback.initial_sample_rate,
    )?);

    let opener = DefaultOpener::new(playback.http.clone());
    let player = Arc::new(Player::start(PlayerParts {
        ring,
        output: output.clone(),
        decoder: Box::new(SymphoniaDecoder),
        opener: Arc::new(opener.clone()),
        playlist: Playlist::new(),
        config: playback,
    })?);

    for dir in &config.shared_dirs {
        if !dir.is_dir() {
            tracing::warn!(dir = ?dir, "shared directory is not a directory");
        }
    }
    let commands = Arc::new(Commands::new(
        player.clone(),
        SharedLibrary::new(&config.shared_dirs),
        SongInfoCache::new(Box::new(SymphoniaTags::new(opener))),
    ));
    let server = CommandServer::bind(config.bind, commands)?;

    let advertiser: Arc<Mutex<Option<mdns::MdnsAdvertiser>>> = Arc::new(Mutex::new(None));
    if config.mdns {
        let bind = server.local_addr()?;
        if let Ok(mut g) = advertiser.lock() {
            *g = mdns::spawn_mdns_advertiser(bind, config.name.as_deref());
        }
    }

    {
        let advertiser = advertiser.clone();
        let player = player.clone();
        let output = output.clone();
        let _ = ctrlc::set_handler(move || {
            tracing::info!("shutting down");
            if let Ok(mut g) = advertiser.lock() {
                if let Some(ad) = g.take() {
                    ad.shutdown();
                }
            }
            player.shutdown();
            output.shutdown();
            std::process::exit(130);
        });
    }

    server.serve()
}
