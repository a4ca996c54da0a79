//! Byte streams feeding the decoder.
//!
//! [`SongStream`] is the one interface the decode loop sees, whatever the song's origin:
//! buffered access ([`BufRead::fill_buf`] / [`BufRead::consume`]), seeking, size and offset
//! queries, and a cancellable [`SongStream::stop`]. The origin is a closed set of variants.

use std::fs::File;
use std::io::{self, BufRead, Cursor, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use anyhow::{Context, Result};
use symphonia::core::io::MediaSource;

use crate::config::HttpConfig;
use crate::http_stream::{HttpRangeSource, add_signed};
use crate::song::{Schema, Song};

const BUFFER_BYTES: usize = 64 * 1024;

enum Origin {
    File { file: File, len: u64 },
    Http(HttpRangeSource),
    Memory(Cursor<Vec<u8>>),
}

impl Origin {
    fn len(&self) -> Option<u64> {
        match self {
            Origin::File { len, .. } => Some(*len),
            Origin::Http(src) => src.len(),
            Origin::Memory(cursor) => Some(cursor.get_ref().len() as u64),
        }
    }

    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        match self {
            Origin::File { file, .. } => file.read(out),
            Origin::Http(src) => src.read(out),
            Origin::Memory(cursor) => cursor.read(out),
        }
    }

    fn seek_to(&mut self, pos: u64) -> io::Result<u64> {
        match self {
            Origin::File { file, .. } => file.seek(SeekFrom::Start(pos)),
            Origin::Http(src) => src.seek(SeekFrom::Start(pos)),
            Origin::Memory(cursor) => cursor.seek(SeekFrom::Start(pos)),
        }
    }
}

/// How far the decoder has read into the current song.
#[derive(Debug, Default)]
pub struct StreamProgress {
    offset: AtomicU64,
    size: AtomicU64,
}

impl StreamProgress {
    /// Percentage of the stream consumed, when its size is known.
    pub fn percent(&self) -> Option<f32> {
        let size = self.size.load(Ordering::Relaxed);
        if size == 0 {
            return None;
        }
        let offset = self.offset.load(Ordering::Relaxed).min(size);
        Some(offset as f32 * 100.0 / size as f32)
    }

    fn update(&self, offset: u64, size: Option<u64>) {
        self.offset.store(offset, Ordering::Relaxed);
        self.size.store(size.unwrap_or(0), Ordering::Relaxed);
    }
}

/// Buffered, seekable, cancellable byte stream for one song.
pub struct SongStream {
    origin: Origin,
    buf: Box<[u8]>,
    start: usize,
    end: usize,
    /// Stream offset of `buf[0]`.
    buf_offset: u64,
    cancel: Arc<AtomicBool>,
    progress: Arc<StreamProgress>,
}

impl SongStream {
    fn with_origin(origin: Origin, cancel: Arc<AtomicBool>) -> Self {
        let progress = Arc::new(StreamProgress::default());
        progress.update(0, origin.len());
        Self {
            origin,
            buf: vec![0u8; BUFFER_BYTES].into_boxed_slice(),
            start: 0,
            end: 0,
            buf_offset: 0,
            cancel,
            progress,
        }
    }

    pub fn file(path: &Path, cancel: Arc<AtomicBool>) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("open {:?}", path))?;
        let len = file
            .metadata()
            .with_context(|| format!("stat {:?}", path))?
            .len();
        Ok(Self::with_origin(Origin::File { file, len }, cancel))
    }

    pub fn http(url: &str, config: HttpConfig, cancel: Arc<AtomicBool>) -> Self {
        let source = HttpRangeSource::new(url.to_string(), config, cancel.clone());
        Self::with_origin(Origin::Http(source), cancel)
    }

    pub fn memory(bytes: Vec<u8>, cancel: Arc<AtomicBool>) -> Self {
        Self::with_origin(Origin::Memory(Cursor::new(bytes)), cancel)
    }

    /// Total size in bytes, if known.
    pub fn size(&self) -> Option<u64> {
        self.origin.len()
    }

    pub fn current_offset(&self) -> u64 {
        self.buf_offset + self.start as u64
    }

    /// Whether unread bytes remain. Unknown sizes count as "more to come".
    pub fn bytes_left(&self) -> bool {
        if self.stopped() {
            return false;
        }
        self.size().is_none_or(|size| self.current_offset() < size)
    }

    /// Cancel the stream; subsequent reads report end of stream.
    pub fn stop(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    pub fn stopped(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    pub fn progress(&self) -> Arc<StreamProgress> {
        self.progress.clone()
    }

    fn publish_progress(&self) {
        self.progress.update(self.current_offset(), self.size());
    }
}

impl BufRead for SongStream {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        if self.stopped() {
            return Ok(&[]);
        }
        if self.start == self.end {
            let offset = self.current_offset();
            let n = self.origin.read(&mut self.buf)?;
            self.buf_offset = offset;
            self.start = 0;
            self.end = n;
        }
        Ok(&self.buf[self.start..self.end])
    }

    fn consume(&mut self, amt: usize) {
        self.start = (self.start + amt).min(self.end);
        self.publish_progress();
    }
}

impl Read for SongStream {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let n = available.len().min(out.len());
        out[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Ok(n)
    }
}

impl Seek for SongStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(x) => x,
            SeekFrom::Current(d) => add_signed(self.current_offset(), d),
            SeekFrom::End(d) => {
                let size = self.size().ok_or_else(|| {
                    io::Error::new(io::ErrorKind::Unsupported, "stream size unknown")
                })?;
                add_signed(size, d)
            }
        };

        let buf_end = self.buf_offset + self.end as u64;
        if target >= self.buf_offset && target <= buf_end {
            self.start = (target - self.buf_offset) as usize;
        } else {
            self.origin.seek_to(target)?;
            self.buf_offset = target;
            self.start = 0;
            self.end = 0;
        }
        self.publish_progress();
        Ok(target)
    }
}

impl MediaSource for SongStream {
    fn is_seekable(&self) -> bool {
        true
    }

    fn byte_len(&self) -> Option<u64> {
        self.size()
    }
}

/// Opens the byte stream for a song. Swappable so the decode loop can run without I/O.
pub trait StreamOpener: Send + Sync {
    fn open(&self, song: &Song, cancel: Arc<AtomicBool>) -> Result<SongStream>;
}

/// Opens local files directly and fetches URLs with HTTP range requests.
#[derive(Clone, Debug, Default)]
pub struct DefaultOpener {
    http: HttpConfig,
}

impl DefaultOpener {
    pub fn new(http: HttpConfig) -> Self {
        Self { http }
    }
}

impl StreamOpener for DefaultOpener {
    fn open(&self, song: &Song, cancel: Arc<AtomicBool>) -> Result<SongStream> {
        match song.schema() {
            Schema::File => SongStream::file(Path::new(song.location()), cancel),
            Schema::Http => Ok(SongStream::http(song.location(), self.http.clone(), cancel)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn cancel() -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(false))
    }

    #[test]
    fn fill_buf_and_consume_walk_the_stream() {
        let mut s = SongStream::memory((0u8..32).collect(), cancel());
        assert_eq!(s.size(), Some(32));
        let chunk = s.fill_buf().unwrap();
        assert_eq!(chunk.len(), 32);
        s.consume(10);
        assert_eq!(s.current_offset(), 10);
        assert_eq!(s.fill_buf().unwrap()[0], 10);
        s.consume(22);
        assert!(!s.bytes_left());
    }

    #[test]
    fn seek_inside_and_outside_buffer() {
        let mut s = SongStream::memory((0u8..200).collect(), cancel());
        s.fill_buf().unwrap();
        assert_eq!(s.seek(SeekFrom::Start(150)).unwrap(), 150);
        assert_eq!(s.fill_buf().unwrap()[0], 150);
        assert_eq!(s.seek(SeekFrom::Current(-100)).unwrap(), 50);
        assert_eq!(s.fill_buf().unwrap()[0], 50);
        assert_eq!(s.seek(SeekFrom::End(-1)).unwrap(), 199);
        let mut last = [0u8; 4];
        assert_eq!(s.read(&mut last).unwrap(), 1);
        assert_eq!(last[0], 199);
    }

    #[test]
    fn stop_ends_the_stream() {
        let mut s = SongStream::memory(vec![1, 2, 3], cancel());
        s.stop();
        let mut out = [0u8; 3];
        assert_eq!(s.read(&mut out).unwrap(), 0);
        assert!(!s.bytes_left());
    }

    #[test]
    fn progress_tracks_consumption() {
        let mut s = SongStream::memory(vec![0u8; 100], cancel());
        let progress = s.progress();
        assert_eq!(progress.percent(), Some(0.0));
        let mut out = [0u8; 25];
        s.read_exact(&mut out).unwrap();
        assert_eq!(progress.percent(), Some(25.0));
    }

    #[test]
    fn default_opener_reads_local_files() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"abcdef").unwrap();
        let song = Song::file(file.path());

        let mut s = DefaultOpener::default().open(&song, cancel()).unwrap();
        let mut text = String::new();
        s.read_to_string(&mut text).unwrap();
        assert_eq!(text, "abcdef");
        assert_eq!(s.size(), Some(6));
    }

    #[test]
    fn default_opener_reports_missing_files() {
        let song = Song::file("/definitely/not/here.mp3");
        assert!(DefaultOpener::default().open(&song, cancel()).is_err());
    }
}
