//! Transaction document-id generation
//!
//! Transaction ids are `YYYY-MM-DD_HHMMSS_nnn` in the tenant zone, sortable
//! lexicographically by time. `nnn` is the millisecond component for the
//! first id issued at a given second; on collision within the process the
//! generator retries with a random 000–999 suffix. Cross-process uniqueness
//! is the store's job (write-if-absent semantics on create).
//!
//! The generator is an explicit value owned by the process rather than an
//! ambient global, with an injectable clock and seeded RNG so the id stream
//! is reproducible under test.

use chrono::{DateTime, Duration, FixedOffset, Timelike, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Time source for id generation
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time source used in deployments
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable time source for tests and replay tooling
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().expect("clock mutex poisoned") = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().expect("clock mutex poisoned");
        *guard += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock mutex poisoned")
    }
}

/// How many in-process collision retries before accepting a random suffix
const MAX_RETRIES: usize = 8;

/// How long an issued id stays in the recently-issued set
const RECENT_TTL_MS: i64 = 1_000;

/// Issues transaction document ids, unique within the process.
pub struct IdGenerator {
    clock: Arc<dyn Clock>,
    tz: FixedOffset,
    rng: Mutex<StdRng>,
    recent: Mutex<VecDeque<(String, DateTime<Utc>)>>,
}

impl IdGenerator {
    pub fn new(tz: FixedOffset) -> Self {
        Self {
            clock: Arc::new(SystemClock),
            tz,
            rng: Mutex::new(StdRng::from_entropy()),
            recent: Mutex::new(VecDeque::new()),
        }
    }

    /// Generator with an injected clock and RNG seed, for tests
    pub fn with_parts(clock: Arc<dyn Clock>, tz: FixedOffset, seed: u64) -> Self {
        Self {
            clock,
            tz,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            recent: Mutex::new(VecDeque::new()),
        }
    }

    /// Issue a transaction id for `at`, or for the current instant.
    ///
    /// Never fails: after the in-process retry budget is spent the last
    /// random candidate is returned and the store's write-if-absent create
    /// is the final arbiter.
    pub fn transaction_id(&self, at: Option<DateTime<FixedOffset>>) -> String {
        let now = self.clock.now();
        let local = at.unwrap_or_else(|| now.with_timezone(&self.tz));
        let stem = local.format("%Y-%m-%d_%H%M%S").to_string();

        let mut candidate = format!("{stem}_{:03}", local.nanosecond() / 1_000_000);
        for _ in 0..MAX_RETRIES {
            if self.remember(&candidate, now) {
                return candidate;
            }
            let suffix: u32 = self.rng.lock().expect("rng mutex poisoned").gen_range(0..1000);
            candidate = format!("{stem}_{suffix:03}");
        }
        // Retry budget exhausted: keep the last random suffix
        self.remember(&candidate, now);
        candidate
    }

    /// Record a candidate in the TTL'd recently-issued set.
    /// Returns false when the candidate was issued within the TTL window.
    fn remember(&self, candidate: &str, now: DateTime<Utc>) -> bool {
        let mut recent = self.recent.lock().expect("recent-id mutex poisoned");
        while let Some((_, issued_at)) = recent.front() {
            if (now - *issued_at) > Duration::milliseconds(RECENT_TTL_MS) {
                recent.pop_front();
            } else {
                break;
            }
        }
        if recent.iter().any(|(id, _)| id == candidate) {
            return false;
        }
        recent.push_back((candidate.to_string(), now));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_generator() -> (Arc<FixedClock>, IdGenerator) {
        let tz = crate::calendar::default_offset();
        let instant = Utc.with_ymd_and_hms(2025, 2, 1, 17, 30, 45).unwrap()
            + Duration::milliseconds(123);
        let clock = Arc::new(FixedClock::new(instant));
        let generator = IdGenerator::with_parts(clock.clone(), tz, 42);
        (clock, generator)
    }

    #[test]
    fn test_id_format_in_tenant_zone() {
        let (_, generator) = fixed_generator();
        // 17:30:45 UTC is 12:30:45 at UTC-5
        assert_eq!(generator.transaction_id(None), "2025-02-01_123045_123");
    }

    #[test]
    fn test_collision_falls_back_to_random_suffix() {
        let (_, generator) = fixed_generator();
        let first = generator.transaction_id(None);
        let second = generator.transaction_id(None);
        assert_ne!(first, second);
        assert_eq!(&second[..18], &first[..18]);
        assert_eq!(second.len(), first.len());
    }

    #[test]
    fn test_recent_set_expires_after_ttl() {
        let (clock, generator) = fixed_generator();
        let origin = clock.now();
        let first = generator.transaction_id(None);

        // A later issue evicts entries older than the TTL
        clock.advance(Duration::milliseconds(1500));
        let _ = generator.transaction_id(None);

        // Replaying the original instant no longer collides in-process
        clock.set(origin);
        assert_eq!(generator.transaction_id(None), first);
    }

    #[test]
    fn test_backdated_ids_use_provided_instant() {
        let (_, generator) = fixed_generator();
        let tz = crate::calendar::default_offset();
        let at = tz.with_ymd_and_hms(2024, 12, 31, 8, 0, 0).unwrap();
        let id = generator.transaction_id(Some(at));
        assert!(id.starts_with("2024-12-31_080000_"));
    }

    #[test]
    fn test_ids_sort_chronologically() {
        let (clock, generator) = fixed_generator();
        let a = generator.transaction_id(None);
        clock.advance(Duration::seconds(2));
        let b = generator.transaction_id(None);
        assert!(a < b);
    }
}
