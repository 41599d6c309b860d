use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Clock seam so cache aging is deterministic under test.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Result of one cache lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup<T> {
    Hit(T),
    Miss,
    /// Entry existed but was younger than the recent-write guard: it may have
    /// been populated right around a write, so it is dropped instead of served.
    EvictedTooFresh,
}

struct Entry<T> {
    data: T,
    inserted_at: Instant,
}

/// In-process snapshot cache for enriched ticket lists, keyed by
/// `(contact_id, company_id)`.
///
/// Two windows govern a lookup:
/// - `ttl`: entries older than this are expired (prod: 60 minutes);
/// - `recent_write_guard`: entries younger than this are evicted rather than
///   served, forcing a refetch right after a write race (prod: 30 seconds).
///
/// Concurrent lookups racing an invalidate are tolerated: the worst case is
/// one extra upstream round trip, never data older than the TTL.
pub struct TicketCache<T> {
    entries: Mutex<HashMap<(i64, i64), Entry<T>>>,
    ttl: Duration,
    recent_write_guard: Duration,
    clock: Box<dyn Clock>,
}

impl<T: Clone> TicketCache<T> {
    pub fn new(ttl: Duration, recent_write_guard: Duration) -> Self {
        Self::with_clock(ttl, recent_write_guard, Box::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, recent_write_guard: Duration, clock: Box<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            recent_write_guard,
            clock,
        }
    }

    pub fn get(&self, contact_id: i64, company_id: i64) -> CacheLookup<T> {
        let key = (contact_id, company_id);
        let now = self.clock.now();
        let mut entries = self.entries.lock().expect("cache mutex poisoned");

        let Some(entry) = entries.get(&key) else {
            return CacheLookup::Miss;
        };

        let age = now.saturating_duration_since(entry.inserted_at);
        if age >= self.ttl {
            entries.remove(&key);
            return CacheLookup::Miss;
        }
        if age < self.recent_write_guard {
            entries.remove(&key);
            return CacheLookup::EvictedTooFresh;
        }

        CacheLookup::Hit(entry.data.clone())
    }

    pub fn set(&self, contact_id: i64, company_id: i64, data: T) {
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        entries.insert(
            (contact_id, company_id),
            Entry {
                data,
                inserted_at: self.clock.now(),
            },
        );
    }

    pub fn invalidate(&self, contact_id: i64, company_id: i64) {
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        entries.remove(&(contact_id, company_id));
    }
}
