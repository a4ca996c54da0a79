//! Control plane.
//!
//! [`Player`] owns the playlist lock, the event log, the ring buffer and the decode thread,
//! and exposes one method per command. Playlist mutations check staleness, apply the change
//! and record their event while holding the playlist lock, then release it and wake the
//! decode loop. Lock order is playlist, then event log; nothing takes them the other way.

use std::sync::Arc;
use std::sync::Mutex;
use std::thread::JoinHandle;

use anyhow::{Context, Result};
use tunebox_types::{
    EventPayload, EventsPage, PlaybackState, PlayerStatus, PlaylistMode, PlaylistView, Timestamp,
};

use crate::config::PlaybackConfig;
use crate::decode::Decoder;
use crate::error::PlayerError;
use crate::events::EventLog;
use crate::output::AudioSink;
use crate::playlist::Playlist;
use crate::ring::SampleRing;
use crate::song::Song;
use crate::stream::StreamOpener;
use crate::transport::{Shared, Transport, TransportAction};

/// Pieces the player is assembled from.
pub struct PlayerParts {
    pub ring: Arc<SampleRing>,
    pub output: Arc<dyn AudioSink>,
    pub decoder: Box<dyn Decoder>,
    pub opener: Arc<dyn StreamOpener>,
    pub playlist: Playlist,
    pub config: PlaybackConfig,
}

pub struct Player {
    shared: Arc<Shared>,
    events: Arc<EventLog>,
    ring: Arc<SampleRing>,
    output: Arc<dyn AudioSink>,
    transport: Mutex<Option<JoinHandle<()>>>,
}

impl Player {
    /// Start the decode thread and return the control handle.
    pub fn start(parts: PlayerParts) -> Result<Self> {
        let shared = Arc::new(Shared::new(parts.playlist));
        let events = Arc::new(EventLog::new());

        let transport = Transport {
            shared: shared.clone(),
            events: events.clone(),
            ring: parts.ring.clone(),
            output: parts.output.clone(),
            decoder: parts.decoder,
            opener: parts.opener,
            chunk_frames: parts.config.chunk_frames,
        };
        let handle = std::thread::Builder::new()
            .name("tunebox-decode".into())
            .spawn(move || transport.run())
            .context("spawn decode thread")?;

        Ok(Self {
            shared,
            events,
            ring: parts.ring,
            output: parts.output,
            transport: Mutex::new(Some(handle)),
        })
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Queue songs; returns their playlist indexes.
    pub fn add_songs(&self, songs: Vec<Song>) -> Result<Vec<usize>, PlayerError> {
        if songs.is_empty() {
            return Err(PlayerError::NothingToAdd);
        }
        let locations: Vec<String> = songs.iter().map(|s| s.location().to_string()).collect();
        let indexes = {
            let mut state = self.shared.lock();
            let indexes = songs
                .into_iter()
                .map(|song| state.playlist.add(song))
                .collect::<Vec<_>>();
            self.events.record(EventPayload::AddSongs { songs: locations });
            indexes
        };
        tracing::info!(count = indexes.len(), "songs added");
        self.shared.notify();
        Ok(indexes)
    }

    pub fn next(&self) {
        self.transport_action(TransportAction::Next);
    }

    pub fn previous(&self) {
        self.transport_action(TransportAction::Prev);
    }

    fn transport_action(&self, action: TransportAction) {
        {
            let mut state = self.shared.lock();
            state.action = action;
            state.stop_decode();
        }
        tracing::debug!(?action, "transport action");
        self.interrupt();
    }

    /// Jump to `index` as seen by a client at `seen_at`.
    pub fn set_current(&self, seen_at: Timestamp, index: usize) -> Result<(), PlayerError> {
        {
            let mut state = self.shared.lock();
            if self.events.is_index_stale(seen_at, index) {
                return Err(PlayerError::StaleIndex);
            }
            let len = state.playlist.len();
            if index >= len {
                return Err(PlayerError::IndexOutOfRange { index, len });
            }
            if !state.playlist.set_current(index) {
                return Err(PlayerError::AlreadyCurrent(index));
            }
            state.action = TransportAction::None;
            state.stop_decode();
        }
        tracing::info!(index, "current song set");
        self.interrupt();
        Ok(())
    }

    /// Remove songs addressed by a client that listed the playlist at `seen_at`.
    ///
    /// All indexes are validated before anything is removed.
    pub fn delete_songs(&self, seen_at: Timestamp, indexes: &[usize]) -> Result<(), PlayerError> {
        if indexes.is_empty() {
            return Ok(());
        }
        let mut doomed = indexes.to_vec();
        doomed.sort_unstable();
        doomed.dedup();

        let removed_current = {
            let mut state = self.shared.lock();
            // A deletion that invalidates any index also invalidates every larger one.
            if self.events.is_index_stale(seen_at, doomed[doomed.len() - 1]) {
                return Err(PlayerError::StaleIndex);
            }
            let len = state.playlist.len();
            if let Some(&index) = doomed.iter().find(|&&i| i >= len) {
                return Err(PlayerError::IndexOutOfRange { index, len });
            }

            let removed_current = state
                .playlist
                .current_index()
                .is_some_and(|current| doomed.binary_search(&current).is_ok());
            if removed_current {
                // The cursor lands on the successor; play that rather than skipping it.
                state.action = TransportAction::None;
                state.stop_decode();
            }
            for &index in doomed.iter().rev() {
                state.playlist.delete(index);
            }
            state.decoding = state.decoding.and_then(|d| shift_after_delete(d, &doomed));
            self.events.record(EventPayload::DeleteSongs {
                indexes: doomed.clone(),
            });
            removed_current
        };

        if removed_current {
            self.interrupt();
        }
        tracing::info!(count = doomed.len(), removed_current, "songs deleted");
        self.shared.notify();
        Ok(())
    }

    pub fn clear(&self) {
        {
            let mut state = self.shared.lock();
            state.playlist.clear();
            state.action = TransportAction::None;
            state.stop_decode();
            self.events.record(EventPayload::ClearPlaylist);
        }
        self.interrupt();
        tracing::info!("playlist cleared");
        self.shared.notify();
    }

    /// Returns `true` if playback was running.
    pub fn pause(&self) -> bool {
        let changed = self.output.pause();
        if changed {
            self.events.record(EventPayload::Pause);
        }
        changed
    }

    /// Returns `true` if playback was paused.
    pub fn resume(&self) -> bool {
        let changed = self.output.resume();
        if changed {
            self.events.record(EventPayload::Play);
        }
        changed
    }

    pub fn set_mode(&self, mode: PlaylistMode) {
        self.shared.lock().playlist.set_mode(mode);
        tracing::info!(%mode, "playlist mode changed");
        self.events
            .record(EventPayload::PlaylistModeChanged { mode });
    }

    pub fn mode(&self) -> PlaylistMode {
        self.shared.lock().playlist.mode()
    }

    /// Playlist snapshot stamped with a watermark taken under the same lock.
    pub fn playlist(&self) -> PlaylistView {
        let state = self.shared.lock();
        let timestamp = self.events.watermark();
        PlaylistView {
            songs: state.playlist.songs().iter().map(Song::display_name).collect(),
            current: state
                .playlist
                .current_index()
                .map(|i| i as i64)
                .unwrap_or(-1),
            timestamp,
        }
    }

    pub fn song(&self, index: usize) -> Option<Song> {
        self.shared.lock().playlist.songs().get(index).cloned()
    }

    pub fn poll_events(&self, since: Timestamp) -> EventsPage {
        self.events.poll(since)
    }

    pub fn is_index_stale(&self, seen_at: Timestamp, index: usize) -> bool {
        self.events.is_index_stale(seen_at, index)
    }

    /// Share of the current song consumed by the decoder.
    pub fn percent_so_far(&self) -> Option<f32> {
        self.shared
            .lock()
            .progress
            .as_ref()
            .and_then(|p| p.percent())
    }

    pub fn status(&self) -> PlayerStatus {
        let (current, percent) = {
            let state = self.shared.lock();
            (
                state.decoding.map(|i| i as i64).unwrap_or(-1),
                state.progress.as_ref().and_then(|p| p.percent()),
            )
        };
        PlayerStatus {
            status: if self.output.is_playing() {
                PlaybackState::Playing
            } else {
                PlaybackState::Paused
            },
            current,
            percent,
            underruns: self.ring.underruns(),
            sample_rate: self.output.sample_rate(),
        }
    }

    /// Stop the decode thread and wait for it.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.lock();
            state.shutdown = true;
            state.stop_decode();
        }
        self.ring.wake_producer();
        self.shared.notify();
        let handle = self
            .transport
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    /// Make a stop request take effect now: drop buffered audio and unpark the decoder.
    fn interrupt(&self) {
        self.ring.clear();
        self.ring.wake_producer();
        self.shared.notify();
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// New index of `index` after removing the sorted `removed` set, or `None` if it was removed.
fn shift_after_delete(index: usize, removed: &[usize]) -> Option<usize> {
    match removed.binary_search(&index) {
        Ok(_) => None,
        Err(below) => Some(index - below),
    }
}
