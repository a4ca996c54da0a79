//! Playlist state machine.
//!
//! `songs` keeps insertion order and is what clients index into. `order` is a permutation of
//! `0..songs.len()` giving the traversal sequence, and `current` is a cursor into `order`
//! ranging over `0..=order.len()`; `order.len()` means "no current song".
//!
//! The playlist itself is not synchronized. The player keeps it, together with the pending
//! transport action, behind a single mutex so the control plane and the decode loop always
//! observe both consistently.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tunebox_types::PlaylistMode;

use crate::song::Song;

pub struct Playlist {
    songs: Vec<Song>,
    order: Vec<usize>,
    current: usize,
    mode: PlaylistMode,
    rng: StdRng,
}

impl Default for Playlist {
    fn default() -> Self {
        Self::new()
    }
}

impl Playlist {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_os_rng())
    }

    /// Playlist with a deterministic shuffle source.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            songs: Vec::new(),
            order: Vec::new(),
            current: 0,
            mode: PlaylistMode::Default,
            rng,
        }
    }

    pub fn len(&self) -> usize {
        self.songs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.songs.is_empty()
    }

    pub fn songs(&self) -> &[Song] {
        &self.songs
    }

    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn mode(&self) -> PlaylistMode {
        self.mode
    }

    /// Append a song and return its index.
    ///
    /// In shuffle mode the new entry is swapped into a uniformly chosen play-order slot after
    /// the cursor, so history and the current song stay where they are.
    pub fn add(&mut self, song: Song) -> usize {
        let index = self.songs.len();
        self.songs.push(song);
        self.order.push(index);

        if self.mode == PlaylistMode::Shuffle {
            let last = self.order.len() - 1;
            let first_free = self.current + 1;
            if first_free < last {
                let slot = self.rng.random_range(first_free..=last);
                self.order.swap(slot, last);
            }
        }
        index
    }

    /// Remove the song at `index` (insertion order). Returns `false` if out of range.
    pub fn delete(&mut self, index: usize) -> bool {
        if index >= self.songs.len() {
            return false;
        }
        let Some(slot) = self.order.iter().position(|&i| i == index) else {
            return false;
        };
        self.songs.remove(index);
        self.order.remove(slot);
        for entry in self.order.iter_mut() {
            if *entry > index {
                *entry -= 1;
            }
        }

        if slot < self.current && self.current > 0 {
            self.current -= 1;
        }
        // Removing the current entry leaves the cursor on its successor.
        self.current = self.current.min(self.order.len());
        true
    }

    pub fn current(&self) -> Option<&Song> {
        self.current_index().map(|i| &self.songs[i])
    }

    /// Index (insertion order) of the current song.
    pub fn current_index(&self) -> Option<usize> {
        self.order.get(self.current).copied()
    }

    pub fn has_current(&self) -> bool {
        self.current < self.order.len()
    }

    /// Advance the cursor; past the last song the playlist becomes terminal.
    pub fn next(&mut self) {
        if self.current < self.order.len() {
            self.current += 1;
        }
    }

    pub fn prev(&mut self) {
        if self.current > 0 {
            self.current -= 1;
        }
    }

    pub fn clear(&mut self) {
        self.songs.clear();
        self.order.clear();
        self.current = 0;
    }

    /// Move the cursor to the play-order slot holding `index`.
    ///
    /// Fails if `index` is out of range or already current.
    pub fn set_current(&mut self, index: usize) -> bool {
        if index >= self.songs.len() || self.current_index() == Some(index) {
            return false;
        }
        match self.order.iter().position(|&i| i == index) {
            Some(slot) => {
                self.current = slot;
                true
            }
            None => false,
        }
    }

    /// Switch traversal mode. Only songs after the cursor are reordered.
    pub fn set_mode(&mut self, mode: PlaylistMode) {
        self.mode = mode;
        let first_free = (self.current + 1).min(self.order.len());
        let upcoming = &mut self.order[first_free..];
        match mode {
            PlaylistMode::Shuffle => upcoming.shuffle(&mut self.rng),
            PlaylistMode::Default => upcoming.sort_unstable(),
        }
    }
}
