//! HTTP range reader backing network songs.
//!
//! Fetches fixed-size blocks with `Range` requests and serves reads from the last block.
//! Servers that ignore `Range` and answer `200 OK` are handled by keeping the whole body.

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::config::HttpConfig;

const SLOW_FETCH: Duration = Duration::from_millis(250);

pub(crate) struct HttpRangeSource {
    url: String,
    config: HttpConfig,
    pos: u64,
    len: Option<u64>,
    block: Vec<u8>,
    block_start: u64,
    cancel: Arc<AtomicBool>,
}

/// One range response: the bytes received, where they start, and the resource size if known.
struct Fetched {
    body: Vec<u8>,
    start: u64,
    total: Option<u64>,
}

impl HttpRangeSource {
    pub(crate) fn new(url: String, config: HttpConfig, cancel: Arc<AtomicBool>) -> Self {
        Self {
            url,
            config,
            pos: 0,
            len: None,
            block: Vec::new(),
            block_start: 0,
            cancel,
        }
    }

    /// Total resource size, once a response has reported it.
    pub(crate) fn len(&self) -> Option<u64> {
        self.len
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    fn block_contains(&self, pos: u64) -> bool {
        pos >= self.block_start && pos < self.block_start + self.block.len() as u64
    }

    fn probe_len(&mut self) -> io::Result<u64> {
        if let Some(len) = self.len {
            return Ok(len);
        }
        self.load_block(0)?;
        self.len
            .ok_or_else(|| io::Error::other("content length unavailable"))
    }

    fn load_block(&mut self, start: u64) -> io::Result<()> {
        let mut end = start.saturating_add(self.config.block_size.max(1) as u64 - 1);
        if let Some(len) = self.len.filter(|len| *len > 0) {
            end = end.min(len - 1);
        }
        let fetched = fetch_range(&self.url, self.config.timeout, start, end)?;
        if fetched.total.is_some() {
            self.len = fetched.total;
        }
        self.block = fetched.body;
        self.block_start = fetched.start;
        Ok(())
    }
}

fn fetch_range(url: &str, timeout: Duration, start: u64, end: u64) -> io::Result<Fetched> {
    let range = format!("bytes={start}-{end}");
    let began = Instant::now();
    let resp = ureq::get(url)
        .config()
        .timeout_per_call(Some(timeout))
        .build()
        .header("Range", &range)
        .call()
        .map_err(|e| io::Error::other(format!("http range request failed: {e}")))?;

    let status = resp.status();
    let header = |name: &str| {
        resp.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let content_range = header("Content-Range");
    let content_length = header("Content-Length").and_then(|s| s.parse::<u64>().ok());

    let mut body = Vec::new();
    let (_, reader) = resp.into_parts();
    reader
        .into_reader()
        .read_to_end(&mut body)
        .map_err(|e| io::Error::other(format!("http read failed: {e}")))?;

    let took = began.elapsed();
    if took > SLOW_FETCH {
        tracing::warn!(
            took_ms = took.as_millis() as u64,
            bytes = body.len(),
            range = range.as_str(),
            "http range fetch slow"
        );
    }

    match status {
        ureq::http::StatusCode::PARTIAL_CONTENT => Ok(Fetched {
            body,
            start,
            total: content_range.as_deref().and_then(parse_content_range_total),
        }),
        ureq::http::StatusCode::OK => Ok(Fetched {
            total: content_length.or(Some(body.len() as u64)),
            body,
            start: 0,
        }),
        other => Err(io::Error::other(format!("unexpected http status {other}"))),
    }
}

impl Read for HttpRangeSource {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() || self.cancelled() {
            return Ok(0);
        }
        if self.len.is_some_and(|len| self.pos >= len) {
            return Ok(0);
        }
        if !self.block_contains(self.pos) {
            self.load_block(self.pos)?;
            if !self.block_contains(self.pos) {
                return Ok(0);
            }
        }

        let offset = (self.pos - self.block_start) as usize;
        let n = (self.block.len() - offset).min(out.len());
        out[..n].copy_from_slice(&self.block[offset..offset + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for HttpRangeSource {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.pos = match pos {
            SeekFrom::Start(x) => x,
            SeekFrom::Current(d) => add_signed(self.pos, d),
            SeekFrom::End(d) => add_signed(self.probe_len()?, d),
        };
        Ok(self.pos)
    }
}

/// Total size from a `Content-Range: bytes start-end/total` header.
fn parse_content_range_total(header: &str) -> Option<u64> {
    let (_, total) = header.split_once('/')?;
    total.trim().parse::<u64>().ok()
}

pub(crate) fn add_signed(base: u64, delta: i64) -> u64 {
    if delta >= 0 {
        base.saturating_add(delta as u64)
    } else {
        base.saturating_sub(delta.unsigned_abs())
    }
}
