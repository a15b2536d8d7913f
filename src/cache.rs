//! In-memory packet cache (C4, §4.4): removes disk I/O from the hot path on replay loops after
//! the first.
//!
//! Grounded on `capture/replay.rs`'s `ReplayCapture`, which preloads an entire pcap into a
//! `Vec<RawPacket>` up front; here the same idea is generalized into an explicit
//! `{Absent, Filling, Filled}` state machine per source, since in this spec caching is optional and
//! fills lazily on the first loop rather than unconditionally at open time.

use crate::types::PacketRecord;

/// Lifecycle of a per-source cache (§4.4 "Transitions").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Absent,
    Filling,
    Filled,
}

/// Ordered list of decoded records for one source, plus a read cursor. Conceptually the spec's
/// singly linked cache-entry list (§3 "Packet cache entry"); a `Vec` realizes the same "append
/// during filling, immutable once filled, order preserved" contract without an unidiomatic
/// hand-rolled list, matching how the teacher's own `ReplayCapture` stores its preloaded packets.
pub struct PacketCache {
    state: CacheState,
    entries: Vec<PacketRecord>,
    cursor: usize,
}

impl PacketCache {
    pub fn new() -> Self {
        PacketCache {
            state: CacheState::Absent,
            entries: Vec::new(),
            cursor: 0,
        }
    }

    pub fn state(&self) -> CacheState {
        self.state
    }

    /// absent -> filling, only valid on the first loop iteration when `enable_file_cache` is set.
    pub fn begin_filling(&mut self) {
        debug_assert_eq!(self.state, CacheState::Absent);
        log::debug!("packet cache: absent -> filling");
        self.state = CacheState::Filling;
    }

    /// Append a record while filling. No-op (and debug-asserts) once filled, since the list is
    /// immutable for the lifetime of the context after that point.
    pub fn push(&mut self, record: PacketRecord) {
        debug_assert_eq!(self.state, CacheState::Filling);
        self.entries.push(record);
    }

    /// filling -> filled, at source EOF.
    pub fn finish_filling(&mut self) {
        debug_assert_eq!(self.state, CacheState::Filling);
        log::debug!("packet cache: filling -> filled ({} entries)", self.entries.len());
        self.state = CacheState::Filled;
        self.cursor = 0;
    }

    /// Rewind the read cursor to the start of the cached list. Called between loops; the cache
    /// state itself is preserved (§4.6 "Reset between loops").
    pub fn reset_cursor(&mut self) {
        self.cursor = 0;
    }

    /// Pull the next cached record, cloning it out (the cache itself keeps ownership).
    pub fn next(&mut self) -> Option<PacketRecord> {
        let record = self.entries.get(self.cursor).cloned();
        if record.is_some() {
            self.cursor += 1;
        }
        record
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for PacketCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(n: i64) -> PacketRecord {
        PacketRecord {
            capture_time_us: n,
            captured_length: 4,
            original_length: 4,
            data: vec![n as u8; 4],
        }
    }

    #[test]
    fn lifecycle_transitions() {
        let mut cache = PacketCache::new();
        assert_eq!(cache.state(), CacheState::Absent);
        cache.begin_filling();
        assert_eq!(cache.state(), CacheState::Filling);
        cache.push(record(1));
        cache.push(record(2));
        cache.finish_filling();
        assert_eq!(cache.state(), CacheState::Filled);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn filled_cache_replays_same_sequence_every_loop() {
        let mut cache = PacketCache::new();
        cache.begin_filling();
        cache.push(record(1));
        cache.push(record(2));
        cache.push(record(3));
        cache.finish_filling();

        let first_loop: Vec<_> = std::iter::from_fn(|| cache.next()).collect();
        cache.reset_cursor();
        let second_loop: Vec<_> = std::iter::from_fn(|| cache.next()).collect();

        assert_eq!(first_loop.len(), 3);
        assert_eq!(
            first_loop.iter().map(|r| r.capture_time_us).collect::<Vec<_>>(),
            second_loop.iter().map(|r| r.capture_time_us).collect::<Vec<_>>(),
        );
    }

    #[test]
    fn empty_cache_is_noop() {
        let mut cache = PacketCache::new();
        cache.begin_filling();
        cache.finish_filling();
        assert!(cache.is_empty());
        assert!(cache.next().is_none());
    }
}
