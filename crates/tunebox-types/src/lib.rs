//! Wire payloads shared by the tunebox player core and the command daemon.
//!
//! Everything here is plain data: serde derives, a few conversions, no behavior.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Event-log ordering key.
///
/// Nanoseconds on the daemon's monotonic clock since the log was created. Keys are unique:
/// two events recorded within the same clock tick get consecutive values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// The beginning of time; polling from here returns the whole log.
    pub const ZERO: Timestamp = Timestamp(0);

    pub fn as_nanos(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Traversal order used when new songs are queued.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaylistMode {
    /// Songs play in insertion order.
    #[default]
    Default,
    /// Upcoming songs play in random order.
    Shuffle,
}

impl PlaylistMode {
    pub fn as_str(self) -> &'static str {
        match self {
            PlaylistMode::Default => "default",
            PlaylistMode::Shuffle => "shuffle",
        }
    }
}

impl fmt::Display for PlaylistMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a mode name is neither `default` nor `shuffle`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnknownMode(pub String);

impl fmt::Display for UnknownMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown playlist mode: {}", self.0)
    }
}

impl std::error::Error for UnknownMode {}

impl FromStr for PlaylistMode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "default" => Ok(PlaylistMode::Default),
            "shuffle" | "random" => Ok(PlaylistMode::Shuffle),
            other => Err(UnknownMode(other.to_string())),
        }
    }
}

/// State transition recorded in the event log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// Songs were appended to the playlist (full locations, in insertion order).
    AddSongs { songs: Vec<String> },
    /// The decode loop switched songs. `-1` means nothing is playing.
    PlaySong { index: i64 },
    /// Songs were removed. Indexes refer to the playlist as it was before the removal.
    DeleteSongs { indexes: Vec<usize> },
    Pause,
    Play,
    PlaylistModeChanged { mode: PlaylistMode },
    ClearPlaylist,
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::AddSongs { .. } => EventKind::AddSongs,
            EventPayload::PlaySong { .. } => EventKind::PlaySong,
            EventPayload::DeleteSongs { .. } => EventKind::DeleteSongs,
            EventPayload::Pause => EventKind::Pause,
            EventPayload::Play => EventKind::Play,
            EventPayload::PlaylistModeChanged { .. } => EventKind::PlaylistModeChanged,
            EventPayload::ClearPlaylist => EventKind::ClearPlaylist,
        }
    }
}

/// Payload discriminant, used for typed event-log queries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    AddSongs,
    PlaySong,
    DeleteSongs,
    Pause,
    Play,
    PlaylistModeChanged,
    ClearPlaylist,
}

/// One timestamped entry of the event log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: Timestamp,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

/// Snapshot of the playlist handed to clients.
///
/// `timestamp` is the event-log watermark taken before the snapshot; clients send it back
/// with index-based commands so stale references can be detected.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistView {
    pub songs: Vec<String>,
    /// Index into `songs` of the current song, `-1` when there is none.
    pub current: i64,
    pub timestamp: Timestamp,
}

/// Result of an incremental event-log poll.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventsPage {
    pub events: Vec<Event>,
    /// Pass this back on the next poll to continue without gaps or duplicates.
    pub timestamp: Timestamp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    Playing,
    Paused,
}

/// Transport-level status of the player.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlayerStatus {
    pub status: PlaybackState,
    /// Index of the song being decoded, `-1` when idle.
    pub current: i64,
    /// Share of the current song's bytes consumed so far, when its size is known.
    pub percent: Option<f32>,
    /// Number of output callbacks that had to emit silence.
    pub underruns: u64,
    /// Sample rate the output device is running at.
    pub sample_rate: u32,
}

/// Contents of one shared directory.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryListing {
    pub directories: Vec<String>,
    pub files: Vec<String>,
}

/// Tag information for one song.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SongInfo {
    pub title: String,
    pub artist: String,
    pub album: String,
    /// Duration in whole seconds, when the container reports it.
    pub length_secs: Option<u64>,
    /// Base64-encoded cover art.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picture_mime: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serializes_flat_with_type_tag() {
        let event = Event {
            timestamp: Timestamp(42),
            payload: EventPayload::PlaySong { index: -1 },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "play_song");
        assert_eq!(json["index"], -1);
        assert_eq!(json["timestamp"], 42);
    }

    #[test]
    fn unit_events_carry_only_type_and_timestamp() {
        let event = Event {
            timestamp: Timestamp(7),
            payload: EventPayload::Pause,
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
        assert!(json.contains("\"type\":\"pause\""));
    }

    #[test]
    fn playlist_mode_parses_known_names() {
        assert_eq!("shuffle".parse::<PlaylistMode>(), Ok(PlaylistMode::Shuffle));
        assert_eq!("random".parse::<PlaylistMode>(), Ok(PlaylistMode::Shuffle));
        assert_eq!(" default ".parse::<PlaylistMode>(), Ok(PlaylistMode::Default));
        assert!("loop".parse::<PlaylistMode>().is_err());
    }

    #[test]
    fn mode_changed_event_uses_wire_names() {
        let payload = EventPayload::PlaylistModeChanged {
            mode: PlaylistMode::Shuffle,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "playlist_mode_changed");
        assert_eq!(json["mode"], "shuffle");
        assert_eq!(payload.kind(), EventKind::PlaylistModeChanged);
    }

    #[test]
    fn song_info_omits_missing_picture() {
        let info = SongInfo {
            title: "t".into(),
            artist: "a".into(),
            album: "b".into(),
            length_secs: None,
            picture: None,
            picture_mime: None,
        };
        let json = serde_json::to_value(&info).unwrap();
        assert!(json.get("picture").is_none());
        assert!(json.get("picture_mime").is_none());
    }
}
