//! Song location descriptors.

use std::fmt;
use std::path::Path;

/// Where a song's bytes come from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Schema {
    /// Local filesystem path.
    File,
    /// `http://` or `https://` URL, fetched with range requests.
    Http,
}

/// Immutable song descriptor held by the playlist.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Song {
    schema: Schema,
    location: String,
}

impl Song {
    pub fn new(schema: Schema, location: impl Into<String>) -> Self {
        Self {
            schema,
            location: location.into(),
        }
    }

    pub fn file(path: impl AsRef<Path>) -> Self {
        Self::new(Schema::File, path.as_ref().to_string_lossy().into_owned())
    }

    /// Classify a client-supplied location: URLs become [`Schema::Http`], anything else a file.
    pub fn parse(location: &str) -> Self {
        let trimmed = location.trim();
        let lower = trimmed.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            Self::new(Schema::Http, trimmed)
        } else {
            Self::new(Schema::File, trimmed)
        }
    }

    pub fn schema(&self) -> Schema {
        self.schema
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Short name shown to clients: the last path or URL segment.
    pub fn display_name(&self) -> String {
        let trimmed = self.location.trim_end_matches(['/', '\\']);
        let without_query = match self.schema {
            Schema::Http => trimmed.split(['?', '#']).next().unwrap_or(trimmed),
            Schema::File => trimmed,
        };
        without_query
            .rsplit(['/', '\\'])
            .next()
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.location)
            .to_string()
    }

    /// Lower-cased file extension, used as a container hint for the decoder.
    pub fn extension(&self) -> Option<String> {
        let name = self.display_name();
        let (_, ext) = name.rsplit_once('.')?;
        if ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }
}

impl fmt::Display for Song {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_detects_urls() {
        assert_eq!(Song::parse("https://host/a.mp3").schema(), Schema::Http);
        assert_eq!(Song::parse("HTTP://host/a.mp3").schema(), Schema::Http);
        assert_eq!(Song::parse("/music/a.mp3").schema(), Schema::File);
        assert_eq!(Song::parse("a.mp3").schema(), Schema::File);
    }

    #[test]
    fn display_name_is_last_segment() {
        assert_eq!(Song::parse("/music/album/01 intro.flac").display_name(), "01 intro.flac");
        assert_eq!(Song::parse("http://host/x/track.mp3?token=1").display_name(), "track.mp3");
        assert_eq!(Song::parse("b.mp3").display_name(), "b.mp3");
    }

    #[test]
    fn extension_is_lowercased() {
        assert_eq!(Song::parse("/m/A.FLAC").extension().as_deref(), Some("flac"));
        assert_eq!(Song::parse("/m/noext").extension(), None);
    }
}
