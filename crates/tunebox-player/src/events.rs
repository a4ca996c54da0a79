//! Append-only, timestamp-keyed event log.
//!
//! Clients poll it with the watermark returned by their previous poll and receive every
//! event exactly once, in order. The same log backs the optimistic-concurrency check for
//! index-based commands ([`EventLog::is_index_stale`]).
//!
//! Stamps come from a monotonic clock but are forced to be strictly increasing, and strictly
//! greater than any watermark already handed out, so two events never share a key and an
//! event recorded after a watermark was issued always sorts after it.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Instant;

use tunebox_types::{Event, EventKind, EventPayload, EventsPage, Timestamp};

pub struct EventLog {
    epoch: Instant,
    inner: Mutex<LogInner>,
}

#[derive(Default)]
struct LogInner {
    events: BTreeMap<Timestamp, EventPayload>,
    last_stamp: u64,
    last_watermark: u64,
}

impl LogInner {
    fn watermark(&mut self, now: u64) -> Timestamp {
        let mark = now.max(self.last_stamp + 1).max(self.last_watermark);
        self.last_watermark = mark;
        Timestamp(mark)
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            inner: Mutex::new(LogInner::default()),
        }
    }

    fn now(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    /// Append an event stamped with the current time and return its key.
    pub fn record(&self, payload: EventPayload) -> Timestamp {
        let now = self.now();
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let stamp = now
            .max(inner.last_stamp + 1)
            .max(inner.last_watermark + 1);
        inner.last_stamp = stamp;
        tracing::debug!(timestamp = stamp, kind = ?payload.kind(), "event recorded");
        inner.events.insert(Timestamp(stamp), payload);
        Timestamp(stamp)
    }

    /// Every event with key `>= since`, plus the watermark to pass to the next poll.
    pub fn poll(&self, since: Timestamp) -> EventsPage {
        let now = self.now();
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let events = collect(&inner.events, since, None);
        let timestamp = inner.watermark(now);
        EventsPage { events, timestamp }
    }

    /// Events of one kind with key `>= since`.
    pub fn find(&self, since: Timestamp, kind: EventKind) -> Vec<Event> {
        let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        collect(&inner.events, since, Some(kind))
    }

    /// A timestamp that sorts after every event recorded so far and before any later one.
    ///
    /// Handed to clients alongside playlist snapshots.
    pub fn watermark(&self) -> Timestamp {
        let now = self.now();
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.watermark(now)
    }

    /// Whether a client that saw the playlist at `seen_at` may no longer address `index`.
    ///
    /// The reference is stale when a later deletion removed `index` or anything before it,
    /// or when the playlist was cleared.
    pub fn is_index_stale(&self, seen_at: Timestamp, index: usize) -> bool {
        let after = Timestamp(seen_at.0.saturating_add(1));
        let cleared = !self.find(after, EventKind::ClearPlaylist).is_empty();
        cleared
            || self
                .find(after, EventKind::DeleteSongs)
                .iter()
                .any(|event| match &event.payload {
                    EventPayload::DeleteSongs { indexes } => indexes.iter().any(|&i| i <= index),
                    _ => false,
                })
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .events
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn collect(
    events: &BTreeMap<Timestamp, EventPayload>,
    since: Timestamp,
    kind: Option<EventKind>,
) -> Vec<Event> {
    events
        .range(since..)
        .filter(|(_, payload)| kind.is_none_or(|k| payload.kind() == k))
        .map(|(timestamp, payload)| Event {
            timestamp: *timestamp,
            payload: payload.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn rapid_events_never_collide() {
        let log = EventLog::new();
        for _ in 0..1_000 {
            log.record(EventPayload::Pause);
        }
        assert_eq!(log.len(), 1_000);
    }

    #[test]
    fn sequential_polls_are_disjoint_and_complete() {
        let log = EventLog::new();
        log.record(EventPayload::Pause);
        log.record(EventPayload::Play);

        let first = log.poll(Timestamp::ZERO);
        assert_eq!(first.events.len(), 2);

        log.record(EventPayload::PlaySong { index: 3 });
        let second = log.poll(first.timestamp);
        assert_eq!(second.events.len(), 1);
        assert_eq!(second.events[0].payload, EventPayload::PlaySong { index: 3 });

        let third = log.poll(second.timestamp);
        assert!(third.events.is_empty());
        assert!(third.timestamp >= second.timestamp);
    }

    #[test]
    fn concurrent_recorders_and_poller_see_everything_once() {
        let log = Arc::new(EventLog::new());
        let writers: Vec<_> = (0..4)
            .map(|w| {
                let log = log.clone();
                thread::spawn(move || {
                    for i in 0..250 {
                        log.record(EventPayload::PlaySong { index: w * 1_000 + i });
                    }
                })
            })
            .collect();

        let mut seen = Vec::new();
        let mut mark = Timestamp::ZERO;
        while writers.iter().any(|w| !w.is_finished()) {
            let page = log.poll(mark);
            seen.extend(page.events);
            mark = page.timestamp;
        }
        for w in writers {
            w.join().unwrap();
        }
        seen.extend(log.poll(mark).events);

        assert_eq!(seen.len(), 1_000);
        assert!(seen.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn find_filters_by_kind() {
        let log = EventLog::new();
        log.record(EventPayload::Pause);
        log.record(EventPayload::DeleteSongs { indexes: vec![1] });
        log.record(EventPayload::Play);
        let found = log.find(Timestamp::ZERO, EventKind::DeleteSongs);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind(), EventKind::DeleteSongs);
    }

    #[test]
    fn deletion_at_or_before_index_makes_it_stale() {
        let log = EventLog::new();
        let before = log.watermark();
        let deleted_at = log.record(EventPayload::DeleteSongs { indexes: vec![3] });

        assert!(log.is_index_stale(before, 3));
        assert!(log.is_index_stale(before, 7));
        assert!(!log.is_index_stale(before, 2));
        assert!(!log.is_index_stale(deleted_at, 3));
        assert!(!log.is_index_stale(log.watermark(), 3));
    }

    #[test]
    fn events_recorded_after_a_watermark_sort_after_it() {
        let log = EventLog::new();
        let mark = log.watermark();
        let stamp = log.record(EventPayload::Pause);
        assert!(stamp > mark);
    }

    #[test]
    fn clearing_invalidates_every_index() {
        let log = EventLog::new();
        let seen = log.watermark();
        log.record(EventPayload::ClearPlaylist);
        assert!(log.is_index_stale(seen, 0));
    }
}
