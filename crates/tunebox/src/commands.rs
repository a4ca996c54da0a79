//! Command table.
//!
//! A request is one JSON object `{"type": <name>, "params": <any>}`. Every request gets one
//! JSON object back: `{"result": true, ...}` on success or `{"result": false, "message": ...}`
//! when the command was rejected. A request that is not a JSON object with a `type` is a
//! [`FatalRequest`] and ends the client's session.

use std::sync::Arc;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use thiserror::Error;
use tunebox_player::{Player, PlayerError, Song};
use tunebox_types::{PlaylistMode, Timestamp};

use crate::library::SharedLibrary;
use crate::song_info::SongInfoCache;

/// Why a command was rejected. The `Display` text is sent to the client.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Invalid command type: {0}")]
    UnknownCommand(String),
    #[error("missing parameter: {0}")]
    MissingParam(&'static str),
    #[error("invalid parameter: {0}")]
    InvalidParam(String),
    #[error("path not found: {0}")]
    PathNotFound(String),
    #[error(transparent)]
    Player(#[from] PlayerError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// The request could not be understood at all.
#[derive(Debug, Error)]
#[error("malformed request: {0}")]
pub struct FatalRequest(String);

#[derive(Debug, Deserialize)]
struct Request {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Deserialize)]
struct IndexedParams {
    timestamp: Timestamp,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct DeleteParams {
    timestamp: Timestamp,
    indexes: Vec<usize>,
}

#[derive(Debug, Deserialize)]
struct SharedSongsParams {
    base_path: String,
    songs: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SongInfoParams {
    index: usize,
    #[serde(default)]
    timestamp: Option<Timestamp>,
}

/// Everything command handlers act on.
pub struct Commands {
    player: Arc<Player>,
    library: SharedLibrary,
    song_info: SongInfoCache,
}

impl Commands {
    pub fn new(player: Arc<Player>, library: SharedLibrary, song_info: SongInfoCache) -> Self {
        Self {
            player,
            library,
            song_info,
        }
    }

    /// Handle one request line and build its response.
    pub fn handle_line(&self, line: &str) -> Result<Value, FatalRequest> {
        let request: Request =
            serde_json::from_str(line).map_err(|e| FatalRequest(e.to_string()))?;
        tracing::debug!(command = %request.kind, "request");
        Ok(match self.dispatch(&request.kind, request.params) {
            Ok(fields) => success(fields),
            Err(e) => {
                tracing::debug!(command = %request.kind, error = %e, "command rejected");
                json!({ "result": false, "message": e.to_string() })
            }
        })
    }

    fn dispatch(&self, kind: &str, params: Value) -> Result<Value, CommandError> {
        let player = &self.player;
        match kind {
            "add_songs" => {
                let locations: Vec<String> = parse("songs", params)?;
                let songs = locations.iter().map(|l| Song::parse(l)).collect();
                let indexes = player.add_songs(songs)?;
                Ok(json!({ "indexes": indexes }))
            }
            "add_shared_songs" => {
                let params: SharedSongsParams = parse("params", params)?;
                let songs = params
                    .songs
                    .iter()
                    .map(|name| {
                        self.library
                            .file_path(&params.base_path, name)
                            .map(Song::file)
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                let indexes = player.add_songs(songs)?;
                Ok(json!({ "indexes": indexes }))
            }
            "next_song" => {
                player.next();
                Ok(Value::Null)
            }
            "previous_song" => {
                player.previous();
                Ok(Value::Null)
            }
            "playlist_mode" => Ok(json!({ "mode": player.mode() })),
            "set_playlist_mode" => {
                let name: String = parse("mode", params)?;
                let mode: PlaylistMode = name.parse().map_err(|_| {
                    CommandError::InvalidParam("Valid modes are 'shuffle' and 'default'".into())
                })?;
                player.set_mode(mode);
                Ok(Value::Null)
            }
            "show_playlist" => to_fields(&player.playlist()),
            "clear_playlist" => {
                player.clear();
                Ok(Value::Null)
            }
            "pause" => {
                player.pause();
                Ok(Value::Null)
            }
            "play" => {
                player.resume();
                Ok(Value::Null)
            }
            "player_status" => to_fields(&player.status()),
            "new_events" => {
                let since: Timestamp = if params.is_null() {
                    Timestamp::ZERO
                } else {
                    parse("timestamp", params)?
                };
                to_fields(&player.poll_events(since))
            }
            "delete_songs" => {
                let params: DeleteParams = parse("params", params)?;
                player.delete_songs(params.timestamp, &params.indexes)?;
                Ok(Value::Null)
            }
            "set_current_song" => {
                let params: IndexedParams = parse("params", params)?;
                player.set_current(params.timestamp, params.index)?;
                Ok(Value::Null)
            }
            "list_shared_dirs" => Ok(json!({ "directories": self.library.shared_dirs() })),
            "list_directory" => {
                let path: String = if params.is_null() {
                    String::new()
                } else {
                    parse("path", params)?
                };
                to_fields(&self.library.list(&path)?)
            }
            "song_info" => {
                let params: SongInfoParams = parse("params", params)?;
                if let Some(seen_at) = params.timestamp {
                    if player.is_index_stale(seen_at, params.index) {
                        return Err(PlayerError::StaleIndex.into());
                    }
                }
                let song = player.song(params.index).ok_or_else(|| {
                    PlayerError::IndexOutOfRange {
                        index: params.index,
                        len: player.playlist().songs.len(),
                    }
                })?;
                to_fields(&self.song_info.info(&song))
            }
            other => Err(CommandError::UnknownCommand(other.to_string())),
        }
    }
}

fn parse<T: DeserializeOwned>(name: &'static str, params: Value) -> Result<T, CommandError> {
    if params.is_null() {
        return Err(CommandError::MissingParam(name));
    }
    serde_json::from_value(params).map_err(|e| CommandError::InvalidParam(format!("{name}: {e}")))
}

fn to_fields<T: serde::Serialize>(payload: &T) -> Result<Value, CommandError> {
    serde_json::to_value(payload).map_err(|e| CommandError::InvalidParam(e.to_string()))
}

fn success(fields: Value) -> Value {
    let mut out = match fields {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    out.insert("result".into(), Value::Bool(true));
    Value::Object(out)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Read;
    use std::sync::atomic::AtomicBool;
    use std::time::{Duration, Instant};
    use tunebox_player::config::PlaybackConfig;
    use tunebox_player::decode::{DecodeContext, DecodeOutcome, Decoder};
    use tunebox_player::output::NullOutput;
    use tunebox_player::playlist::Playlist;
    use tunebox_player::ring::SampleRing;
    use tunebox_player::stream::{SongStream, StreamOpener};
    use tunebox_player::PlayerParts;

    use crate::song_info::{SongTags, TagSource};

    struct EchoOpener;

    impl StreamOpener for EchoOpener {
        fn open(&self, song: &Song, cancel: Arc<AtomicBool>) -> anyhow::Result<SongStream> {
            Ok(SongStream::memory(song.location().as_bytes().to_vec(), cancel))
        }
    }

    /// Plays every song until it is cancelled.
    struct EndlessDecoder;

    impl Decoder for EndlessDecoder {
        fn decode(
            &mut self,
            mut stream: SongStream,
            ctx: &DecodeContext<'_>,
        ) -> anyhow::Result<DecodeOutcome> {
            let mut sink_name = Vec::new();
            stream.read_to_end(&mut sink_name)?;
            let mut sink = ctx.sink();
            loop {
                if !sink.write(&[0.0; 64], 2, 44_100)? {
                    return Ok(DecodeOutcome::Cancelled);
                }
            }
        }
    }

    struct TitleFromName;

    impl TagSource for TitleFromName {
        fn read_tags(&self, song: &Song) -> anyhow::Result<SongTags> {
            Ok(SongTags {
                title: Some(song.display_name()),
                ..SongTags::default()
            })
        }
    }

    pub(crate) fn test_player() -> Arc<Player> {
        let player = Player::start(PlayerParts {
            ring: Arc::new(SampleRing::new(512, Duration::from_millis(1))),
            output: Arc::new(NullOutput::new(44_100)),
            decoder: Box::new(EndlessDecoder),
            opener: Arc::new(EchoOpener),
            playlist: Playlist::with_seed(7),
            config: PlaybackConfig::default(),
        })
        .unwrap();
        Arc::new(player)
    }

    pub(crate) fn test_commands(shared: &[std::path::PathBuf]) -> Commands {
        Commands::new(
            test_player(),
            SharedLibrary::new(shared),
            SongInfoCache::new(Box::new(TitleFromName)),
        )
    }

    fn call(commands: &Commands, request: Value) -> Value {
        commands.handle_line(&request.to_string()).unwrap()
    }

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn add_and_show_playlist() {
        let commands = test_commands(&[]);
        let added = call(
            &commands,
            json!({ "type": "add_songs", "params": ["/music/a.mp3", "http://host/b.ogg?x=1"] }),
        );
        assert_eq!(added["result"], true);
        assert_eq!(added["indexes"], json!([0, 1]));

        let shown = call(&commands, json!({ "type": "show_playlist" }));
        assert_eq!(shown["result"], true);
        assert_eq!(shown["songs"], json!(["a.mp3", "b.ogg"]));
        assert_eq!(shown["current"], 0);
        assert!(shown["timestamp"].as_u64().unwrap() > 0);
    }

    #[test]
    fn unknown_command_is_rejected_without_closing() {
        let commands = test_commands(&[]);
        let out = call(&commands, json!({ "type": "dance" }));
        assert_eq!(out["result"], false);
        assert_eq!(out["message"], "Invalid command type: dance");
    }

    #[test]
    fn malformed_requests_are_fatal() {
        let commands = test_commands(&[]);
        assert!(commands.handle_line("not json").is_err());
        assert!(commands.handle_line(r#"{"params": 1}"#).is_err());
        assert!(commands.handle_line("[1, 2]").is_err());
    }

    #[test]
    fn stale_delete_reports_altered_index() {
        let commands = test_commands(&[]);
        call(
            &commands,
            json!({ "type": "add_songs", "params": ["a", "b", "c", "d"] }),
        );
        let ts = call(&commands, json!({ "type": "show_playlist" }))["timestamp"].clone();

        let first = call(
            &commands,
            json!({ "type": "delete_songs", "params": { "timestamp": ts, "indexes": [2] } }),
        );
        assert_eq!(first["result"], true);
        let again = call(
            &commands,
            json!({ "type": "delete_songs", "params": { "timestamp": ts, "indexes": [3] } }),
        );
        assert_eq!(again["result"], false);
        assert_eq!(again["message"], "index has been altered");

        let shown = call(&commands, json!({ "type": "show_playlist" }));
        assert_eq!(shown["songs"], json!(["a", "b", "d"]));
    }

    #[test]
    fn set_current_song_and_status() {
        let commands = test_commands(&[]);
        call(&commands, json!({ "type": "add_songs", "params": ["a", "b"] }));
        let ts = call(&commands, json!({ "type": "show_playlist" }))["timestamp"].clone();
        let out = call(
            &commands,
            json!({ "type": "set_current_song", "params": { "timestamp": ts, "index": 1 } }),
        );
        assert_eq!(out["result"], true);
        wait_until(|| call(&commands, json!({ "type": "player_status" }))["current"] == 1);

        let status = call(&commands, json!({ "type": "player_status" }));
        assert_eq!(status["status"], "playing");
        call(&commands, json!({ "type": "pause" }));
        let status = call(&commands, json!({ "type": "player_status" }));
        assert_eq!(status["status"], "paused");
    }

    #[test]
    fn events_are_polled_incrementally() {
        let commands = test_commands(&[]);
        call(&commands, json!({ "type": "add_songs", "params": ["a"] }));
        let page = call(&commands, json!({ "type": "new_events", "params": 0 }));
        let events = page["events"].as_array().unwrap();
        assert!(events.iter().any(|e| e["type"] == "add_songs" && e["songs"] == json!(["a"])));

        let ts = page["timestamp"].clone();
        call(&commands, json!({ "type": "pause" }));
        let next = call(&commands, json!({ "type": "new_events", "params": ts }));
        let types: Vec<&str> = next["events"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|e| e["type"].as_str())
            .filter(|t| *t != "play_song")
            .collect();
        assert_eq!(types, vec!["pause"]);
    }

    #[test]
    fn playlist_mode_round_trip() {
        let commands = test_commands(&[]);
        assert_eq!(call(&commands, json!({ "type": "playlist_mode" }))["mode"], "default");
        let set = call(&commands, json!({ "type": "set_playlist_mode", "params": "shuffle" }));
        assert_eq!(set["result"], true);
        assert_eq!(call(&commands, json!({ "type": "playlist_mode" }))["mode"], "shuffle");
        let bad = call(&commands, json!({ "type": "set_playlist_mode", "params": "loop" }));
        assert_eq!(bad["result"], false);
        assert_eq!(bad["message"], "invalid parameter: Valid modes are 'shuffle' and 'default'");
    }

    #[test]
    fn missing_and_bad_params_are_rejected() {
        let commands = test_commands(&[]);
        let missing = call(&commands, json!({ "type": "add_songs" }));
        assert_eq!(missing["message"], "missing parameter: songs");
        let bad = call(
            &commands,
            json!({ "type": "delete_songs", "params": { "indexes": [0] } }),
        );
        assert_eq!(bad["result"], false);
        let empty = call(&commands, json!({ "type": "add_songs", "params": [] }));
        assert_eq!(empty["result"], false);
    }

    #[test]
    fn shared_directories_can_be_browsed_and_queued() {
        let tmp = tempfile::tempdir().unwrap();
        let music = tmp.path().join("music");
        std::fs::create_dir_all(music.join("live")).unwrap();
        std::fs::write(music.join("one.flac"), b"x").unwrap();
        let commands = test_commands(&[music.clone()]);

        let dirs = call(&commands, json!({ "type": "list_shared_dirs" }));
        assert_eq!(dirs["directories"], json!(["music"]));
        let listing = call(&commands, json!({ "type": "list_directory", "params": "music" }));
        assert_eq!(listing["directories"], json!(["live"]));
        assert_eq!(listing["files"], json!(["one.flac"]));

        let added = call(
            &commands,
            json!({ "type": "add_shared_songs", "params": { "base_path": "music", "songs": ["one.flac"] } }),
        );
        assert_eq!(added["result"], true);
        let song = commands.player.song(0).unwrap();
        assert_eq!(song.location(), music.join("one.flac").to_string_lossy());

        let escape = call(&commands, json!({ "type": "list_directory", "params": "music/.." }));
        assert_eq!(escape["result"], false);
    }

    #[test]
    fn song_info_uses_tags_and_checks_staleness() {
        let commands = test_commands(&[]);
        call(&commands, json!({ "type": "add_songs", "params": ["/x/first.mp3", "/x/second.mp3"] }));
        let ts = call(&commands, json!({ "type": "show_playlist" }))["timestamp"].clone();

        let info = call(&commands, json!({ "type": "song_info", "params": { "index": 1, "timestamp": ts } }));
        assert_eq!(info["result"], true);
        assert_eq!(info["title"], "second.mp3");
        assert_eq!(info["artist"], "Unknown");
        assert!(info.get("picture").is_none());

        call(
            &commands,
            json!({ "type": "delete_songs", "params": { "timestamp": ts, "indexes": [0] } }),
        );
        let stale = call(&commands, json!({ "type": "song_info", "params": { "index": 1, "timestamp": ts } }));
        assert_eq!(stale["message"], "index has been altered");
        let missing = call(&commands, json!({ "type": "song_info", "params": { "index": 9 } }));
        assert_eq!(missing["result"], false);
    }

    #[test]
    fn clear_playlist_empties_and_records_event() {
        let commands = test_commands(&[]);
        call(&commands, json!({ "type": "add_songs", "params": ["a", "b"] }));
        let out = call(&commands, json!({ "type": "clear_playlist" }));
        assert_eq!(out["result"], true);
        let shown = call(&commands, json!({ "type": "show_playlist" }));
        assert_eq!(shown["songs"], json!([]));
        assert_eq!(shown["current"], -1);
        let page = call(&commands, json!({ "type": "new_events", "params": 0 }));
        assert!(page["events"]
            .as_array()
            .unwrap()
            .iter()
            .any(|e| e["type"] == "clear_playlist"));
    }

    #[test]
    fn next_and_previous_succeed() {
        let commands = test_commands(&[]);
        call(&commands, json!({ "type": "add_songs", "params": ["a", "b"] }));
        assert_eq!(call(&commands, json!({ "type": "next_song" }))["result"], true);
        wait_until(|| call(&commands, json!({ "type": "player_status" }))["current"] == 1);
        assert_eq!(call(&commands, json!({ "type": "previous_song" }))["result"], true);
        wait_until(|| call(&commands, json!({ "type": "player_status" }))["current"] == 0);
    }
}
