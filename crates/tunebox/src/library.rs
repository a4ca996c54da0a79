//! Shared directory browsing.
//!
//! The configured directories hang off a virtual root, each under its final path component.
//! A directory's listing is read from disk the first time it is needed and cached after that.
//! Only subdirectories and audio files are listed.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use tunebox_types::DirectoryListing;

use crate::commands::CommandError;

const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "wav", "ogg", "oga", "m4a", "aac", "aiff", "aif", "opus",
];

pub(crate) fn is_supported_extension(ext: &str) -> bool {
    AUDIO_EXTENSIONS.contains(&ext)
}

/// Browsable view over the shared directories.
pub struct SharedLibrary {
    /// Virtual name -> real directory, sorted by name.
    roots: Vec<(String, PathBuf)>,
    listings: Mutex<HashMap<PathBuf, DirectoryListing>>,
}

impl SharedLibrary {
    pub fn new(dirs: &[PathBuf]) -> Self {
        let mut roots: Vec<(String, PathBuf)> = Vec::new();
        for dir in dirs {
            let Some(name) = dir.file_name().and_then(OsStr::to_str) else {
                tracing::warn!(dir = ?dir, "shared directory has no usable name; skipped");
                continue;
            };
            if roots.iter().any(|(existing, _)| existing == name) {
                tracing::warn!(dir = ?dir, name, "duplicate shared directory name; skipped");
                continue;
            }
            roots.push((name.to_string(), dir.clone()));
        }
        roots.sort_by(|a, b| a.0.cmp(&b.0));
        Self {
            roots,
            listings: Mutex::new(HashMap::new()),
        }
    }

    /// Names of the shared directories (the children of the virtual root).
    pub fn shared_dirs(&self) -> Vec<String> {
        self.roots.iter().map(|(name, _)| name.clone()).collect()
    }

    /// List a virtual path such as `music/albums`. The empty path (or `/`) is the virtual root.
    pub fn list(&self, virtual_path: &str) -> Result<DirectoryListing, CommandError> {
        match self.resolve(virtual_path)? {
            None => Ok(DirectoryListing {
                directories: self.shared_dirs(),
                files: Vec::new(),
            }),
            Some(dir) => self.listing(&dir),
        }
    }

    /// Real path of `file` inside the virtual directory `base`.
    pub fn file_path(&self, base: &str, file: &str) -> Result<PathBuf, CommandError> {
        let dir = self
            .resolve(base)?
            .ok_or_else(|| CommandError::PathNotFound(base.to_string()))?;
        let mut parts = Path::new(file).components();
        match (parts.next(), parts.next()) {
            (Some(Component::Normal(name)), None) => Ok(dir.join(name)),
            _ => Err(CommandError::InvalidParam(format!("bad file name: {file}"))),
        }
    }

    /// Map a virtual path to a real directory. `None` is the virtual root.
    fn resolve(&self, virtual_path: &str) -> Result<Option<PathBuf>, CommandError> {
        let mut segments = Vec::new();
        for component in Path::new(virtual_path).components() {
            match component {
                Component::Normal(part) => segments.push(part),
                Component::RootDir | Component::CurDir => {}
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(CommandError::InvalidParam(format!(
                        "path may not leave the shared directories: {virtual_path}"
                    )));
                }
            }
        }

        let Some((first, rest)) = segments.split_first() else {
            return Ok(None);
        };
        let mut dir = self
            .roots
            .iter()
            .find(|(name, _)| OsStr::new(name) == *first)
            .map(|(_, path)| path.clone())
            .ok_or_else(|| CommandError::PathNotFound(virtual_path.to_string()))?;

        for part in rest {
            let listing = self.listing(&dir)?;
            let name = part.to_string_lossy();
            if listing.directories.binary_search(&name.to_string()).is_err() {
                return Err(CommandError::PathNotFound(virtual_path.to_string()));
            }
            dir.push(part);
        }
        Ok(Some(dir))
    }

    fn listing(&self, dir: &Path) -> Result<DirectoryListing, CommandError> {
        let mut cache = self.listings.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(listing) = cache.get(dir) {
            return Ok(listing.clone());
        }
        let listing = read_listing(dir)?;
        tracing::debug!(
            dir = ?dir,
            directories = listing.directories.len(),
            files = listing.files.len(),
            "directory loaded"
        );
        cache.insert(dir.to_path_buf(), listing.clone());
        Ok(listing)
    }
}

fn read_listing(dir: &Path) -> Result<DirectoryListing, CommandError> {
    let mut listing = DirectoryListing::default();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if file_type.is_dir() {
            listing.directories.push(name);
        } else if file_type.is_file() {
            let ext = Path::new(&name)
                .extension()
                .and_then(OsStr::to_str)
                .unwrap_or("")
                .to_ascii_lowercase();
            if is_supported_extension(&ext) {
                listing.files.push(name);
            }
        }
    }
    listing.directories.sort();
    listing.files.sort();
    Ok(listing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn fixture() -> (tempfile::TempDir, SharedLibrary) {
        let tmp = tempfile::tempdir().unwrap();
        let music = tmp.path().join("music");
        fs::create_dir_all(music.join("albums/live")).unwrap();
        fs::write(music.join("b.flac"), b"x").unwrap();
        fs::write(music.join("a.MP3"), b"x").unwrap();
        fs::write(music.join("cover.jpg"), b"x").unwrap();
        fs::write(music.join("albums/track.ogg"), b"x").unwrap();
        let podcasts = tmp.path().join("podcasts");
        fs::create_dir_all(&podcasts).unwrap();
        let library = SharedLibrary::new(&[podcasts, music]);
        (tmp, library)
    }

    #[test]
    fn virtual_root_lists_shared_dirs() {
        let (_tmp, library) = fixture();
        assert_eq!(library.shared_dirs(), vec!["music", "podcasts"]);
        let root = library.list("").unwrap();
        assert_eq!(root.directories, vec!["music", "podcasts"]);
        assert!(root.files.is_empty());
        assert_eq!(library.list("/").unwrap(), root);
    }

    #[test]
    fn lists_audio_files_and_subdirectories() {
        let (_tmp, library) = fixture();
        let music = library.list("music").unwrap();
        assert_eq!(music.directories, vec!["albums"]);
        assert_eq!(music.files, vec!["a.MP3", "b.flac"]);
        let albums = library.list("music/albums").unwrap();
        assert_eq!(albums.directories, vec!["live"]);
        assert_eq!(albums.files, vec!["track.ogg"]);
    }

    #[test]
    fn listings_are_cached() {
        let (tmp, library) = fixture();
        assert_eq!(library.list("music").unwrap().files.len(), 2);
        fs::write(tmp.path().join("music/new.wav"), b"x").unwrap();
        assert_eq!(library.list("music").unwrap().files.len(), 2);
    }

    #[test]
    fn rejects_escapes_and_unknown_paths() {
        let (_tmp, library) = fixture();
        assert!(matches!(
            library.list("music/../.."),
            Err(CommandError::InvalidParam(_))
        ));
        assert!(matches!(
            library.list("nowhere"),
            Err(CommandError::PathNotFound(_))
        ));
        assert!(matches!(
            library.list("music/missing"),
            Err(CommandError::PathNotFound(_))
        ));
        assert!(matches!(
            library.file_path("music", "../secret.mp3"),
            Err(CommandError::InvalidParam(_))
        ));
    }

    #[test]
    fn file_path_joins_real_directory() {
        let (tmp, library) = fixture();
        let path = library.file_path("music/albums", "track.ogg").unwrap();
        assert_eq!(path, tmp.path().join("music/albums/track.ogg"));
        assert!(matches!(
            library.file_path("", "x.mp3"),
            Err(CommandError::PathNotFound(_))
        ));
    }
}
