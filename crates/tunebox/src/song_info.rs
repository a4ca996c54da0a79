//! Song tag lookup with a per-location cache.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use base64::Engine;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, MetadataRevision, StandardTagKey, StandardVisualKey};
use symphonia::core::probe::Hint;
use tunebox_player::Song;
use tunebox_player::stream::{DefaultOpener, StreamOpener};
use tunebox_types::SongInfo;

const UNKNOWN: &str = "Unknown";
const MAX_COVER_ART_BYTES: usize = 5_000_000;

/// Raw tags read from a song. `None` fields are reported as unknown.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SongTags {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub duration_ms: Option<u64>,
    pub cover_art: Option<CoverArt>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoverArt {
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// Reads tags for a song.
pub trait TagSource: Send + Sync {
    fn read_tags(&self, song: &Song) -> Result<SongTags>;
}

/// Probes the song's container with Symphonia.
pub struct SymphoniaTags {
    opener: DefaultOpener,
}

impl SymphoniaTags {
    pub fn new(opener: DefaultOpener) -> Self {
        Self { opener }
    }
}

impl TagSource for SymphoniaTags {
    fn read_tags(&self, song: &Song) -> Result<SongTags> {
        let stream = self
            .opener
            .open(song, Arc::new(AtomicBool::new(false)))
            .with_context(|| format!("open {song}"))?;
        let mut hint = Hint::new();
        if let Some(ext) = song.extension() {
            hint.with_extension(&ext);
        }

        let mss = MediaSourceStream::new(Box::new(stream), Default::default());
        let mut probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .with_context(|| format!("probe {song}"))?;

        let mut tags = SongTags::default();
        if let Some(track) = probed.format.default_track() {
            let params = &track.codec_params;
            if let (Some(frames), Some(rate)) = (params.n_frames, params.sample_rate) {
                if rate > 0 {
                    tags.duration_ms = Some(frames.saturating_mul(1000) / rate as u64);
                }
            }
        }

        // Container-level tags first, then tags found ahead of the container (ID3v2).
        if let Some(rev) = probed.format.metadata().current() {
            merge_revision(&mut tags, rev);
        }
        if let Some(metadata) = probed.metadata.get() {
            if let Some(rev) = metadata.current() {
                merge_revision(&mut tags, rev);
            }
        }
        Ok(tags)
    }
}

fn merge_revision(tags: &mut SongTags, rev: &MetadataRevision) {
    for tag in rev.tags() {
        let slot = match tag.std_key {
            Some(StandardTagKey::TrackTitle) => &mut tags.title,
            Some(StandardTagKey::Artist) => &mut tags.artist,
            Some(StandardTagKey::Album) => &mut tags.album,
            _ => continue,
        };
        if slot.is_none() {
            let value = tag.value.to_string();
            if !value.trim().is_empty() {
                *slot = Some(value);
            }
        }
    }
    if tags.cover_art.is_none() {
        tags.cover_art = select_cover_art(rev);
    }
}

fn select_cover_art(rev: &MetadataRevision) -> Option<CoverArt> {
    let visual = rev
        .visuals()
        .iter()
        .find(|visual| visual.usage == Some(StandardVisualKey::FrontCover))
        .or_else(|| rev.visuals().first())?;
    if visual.data.len() > MAX_COVER_ART_BYTES {
        return None;
    }
    Some(CoverArt {
        mime_type: visual.media_type.clone(),
        data: visual.data.to_vec(),
    })
}

/// Caches [`SongInfo`] by song location.
pub struct SongInfoCache {
    source: Box<dyn TagSource>,
    entries: Mutex<HashMap<String, SongInfo>>,
}

impl SongInfoCache {
    pub fn new(source: Box<dyn TagSource>) -> Self {
        Self {
            source,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Tag info for `song`, read on first request.
    ///
    /// A song whose tags cannot be read reports every field as unknown; that answer is
    /// cached too.
    pub fn info(&self, song: &Song) -> SongInfo {
        if let Some(info) = self.lock().get(song.location()) {
            return info.clone();
        }

        // Read without the lock held; a racing reader just repeats the work.
        let tags = self.source.read_tags(song).unwrap_or_else(|e| {
            tracing::warn!(song = %song, "reading tags failed: {e:#}");
            SongTags::default()
        });
        let info = to_song_info(tags);
        self.lock()
            .entry(song.location().to_string())
            .or_insert(info)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, SongInfo>> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }
}

fn to_song_info(tags: SongTags) -> SongInfo {
    let or_unknown = |value: Option<String>| value.unwrap_or_else(|| UNKNOWN.to_string());
    let (picture, picture_mime) = match tags.cover_art {
        Some(art) => (
            Some(base64::engine::general_purpose::STANDARD.encode(&art.data)),
            Some(art.mime_type),
        ),
        None => (None, None),
    };
    SongInfo {
        title: or_unknown(tags.title),
        artist: or_unknown(tags.artist),
        album: or_unknown(tags.album),
        length_secs: tags.duration_ms.map(|ms| ms / 1000),
        picture,
        picture_mime,
    }
}
