//! Decode/transport loop.
//!
//! One background thread cycles through three states:
//! 1. resolving: under the playlist lock, consume the pending [`TransportAction`] and apply it
//! 2. awaiting: no current song, so announce "nothing playing" and sleep on the condvar until
//!    the playlist gains a current song or a new action is queued
//! 3. streaming: open the song's byte stream and drive the decoder into the ring buffer
//!
//! Each resolved song gets a fresh cancel flag, swapped in under the playlist lock, so a stop
//! request always targets the song that is actually decoding. Cancellation, a finished song
//! and a failed song all lead back to state 1.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use anyhow::Result;
use tunebox_types::EventPayload;

use crate::decode::{DecodeContext, DecodeOutcome, Decoder};
use crate::events::EventLog;
use crate::output::AudioSink;
use crate::playlist::Playlist;
use crate::ring::SampleRing;
use crate::song::Song;
use crate::stream::{StreamOpener, StreamProgress};

/// Pending intent the decode loop applies before picking the next song.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TransportAction {
    #[default]
    None,
    Next,
    Prev,
}

impl TransportAction {
    fn take(&mut self) -> TransportAction {
        std::mem::take(self)
    }
}

/// Everything guarded by the playlist lock.
pub(crate) struct PlayerState {
    pub(crate) playlist: Playlist,
    pub(crate) action: TransportAction,
    /// Cancel flag of the song currently being streamed.
    pub(crate) cancel: Arc<AtomicBool>,
    /// Index of the song being streamed.
    pub(crate) decoding: Option<usize>,
    pub(crate) progress: Option<Arc<StreamProgress>>,
    pub(crate) shutdown: bool,
}

impl PlayerState {
    pub(crate) fn new(playlist: Playlist) -> Self {
        Self {
            playlist,
            action: TransportAction::None,
            cancel: Arc::new(AtomicBool::new(false)),
            decoding: None,
            progress: None,
            shutdown: false,
        }
    }

    /// Ask the running decode to stop. Callers must wake the ring's producer afterwards.
    pub(crate) fn stop_decode(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    fn ready(&self) -> bool {
        self.shutdown || self.playlist.has_current() || self.action != TransportAction::None
    }
}

/// Playlist lock plus the condvar the decode loop sleeps on.
pub(crate) struct Shared {
    state: Mutex<PlayerState>,
    wake: Condvar,
}

impl Shared {
    pub(crate) fn new(playlist: Playlist) -> Self {
        Self {
            state: Mutex::new(PlayerState::new(playlist)),
            wake: Condvar::new(),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, PlayerState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub(crate) fn notify(&self) {
        self.wake.notify_all();
    }
}

struct Job {
    index: usize,
    song: Song,
    cancel: Arc<AtomicBool>,
}

pub(crate) struct Transport {
    pub(crate) shared: Arc<Shared>,
    pub(crate) events: Arc<EventLog>,
    pub(crate) ring: Arc<SampleRing>,
    pub(crate) output: Arc<dyn AudioSink>,
    pub(crate) decoder: Box<dyn Decoder>,
    pub(crate) opener: Arc<dyn StreamOpener>,
    pub(crate) chunk_frames: usize,
}

impl Transport {
    pub(crate) fn run(mut self) {
        let mut idle_announced = false;
        while let Some(job) = self.next_job(&mut idle_announced) {
            idle_announced = false;
            self.events.record(EventPayload::PlaySong {
                index: job.index as i64,
            });
            tracing::info!(index = job.index, song = %job.song, "now playing");

            match self.stream(&job) {
                Ok(DecodeOutcome::Finished) => {
                    tracing::debug!(index = job.index, "song finished");
                }
                Ok(DecodeOutcome::Cancelled) => {
                    tracing::debug!(index = job.index, "song cancelled");
                    self.ring.clear();
                }
                Err(e) => {
                    tracing::warn!(index = job.index, song = %job.song, "song failed: {e:#}");
                }
            }

            let mut state = self.shared.lock();
            if Arc::ptr_eq(&state.cancel, &job.cancel) {
                state.decoding = None;
                state.progress = None;
            }
        }
        tracing::debug!("decode loop stopped");
    }

    /// Resolve the pending action and return the song to stream, sleeping while there is none.
    ///
    /// Returns `None` once shutdown is requested.
    fn next_job(&self, idle_announced: &mut bool) -> Option<Job> {
        loop {
            {
                let mut state = self.shared.lock();
                if state.shutdown {
                    return None;
                }
                match state.action.take() {
                    TransportAction::Next => state.playlist.next(),
                    TransportAction::Prev => state.playlist.prev(),
                    TransportAction::None => {}
                }
                if let (Some(index), Some(song)) =
                    (state.playlist.current_index(), state.playlist.current().cloned())
                {
                    // A natural end of this song advances to the next one.
                    state.action = TransportAction::Next;
                    let cancel = Arc::new(AtomicBool::new(false));
                    state.cancel = cancel.clone();
                    state.decoding = Some(index);
                    state.progress = None;
                    return Some(Job {
                        index,
                        song,
                        cancel,
                    });
                }
            }

            if !*idle_announced {
                self.events.record(EventPayload::PlaySong { index: -1 });
                tracing::info!("nothing left to play; waiting for songs");
                *idle_announced = true;
            }

            let mut state = self.shared.lock();
            while !state.ready() {
                state = self
                    .shared
                    .wake
                    .wait(state)
                    .unwrap_or_else(|p| p.into_inner());
            }
        }
    }

    fn stream(&mut self, job: &Job) -> Result<DecodeOutcome> {
        if job.cancel.load(Ordering::Acquire) {
            return Ok(DecodeOutcome::Cancelled);
        }
        let stream = self.opener.open(&job.song, job.cancel.clone())?;
        {
            let mut state = self.shared.lock();
            if Arc::ptr_eq(&state.cancel, &job.cancel) {
                state.progress = Some(stream.progress());
            }
        }

        let output = self.output.clone();
        let on_sample_rate = move |rate: u32| output.set_sample_rate(rate);
        let ctx = DecodeContext {
            ring: &self.ring,
            cancel: &job.cancel,
            on_sample_rate: &on_sample_rate,
            hint: job.song.extension(),
            chunk_frames: self.chunk_frames,
        };
        self.decoder.decode(stream, &ctx)
    }
}
