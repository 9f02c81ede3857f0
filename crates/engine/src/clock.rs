#![forbid(unsafe_code)]

//! Wall clock with an injectable override.
//!
//! Runtime rows store epoch milliseconds; envelopes and the YAML spec show
//! RFC 3339. Lease expiry is decided by comparing milliseconds against the
//! engine clock, so tests swap in [`FixedClock`] to cross expiry boundaries
//! without sleeping.

use std::sync::atomic::{AtomicI64, Ordering};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// The real clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
        let ms = nanos / 1_000_000i128;
        if ms <= 0 {
            0
        } else if ms >= i64::MAX as i128 {
            i64::MAX
        } else {
            ms as i64
        }
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct FixedClock {
    now_ms: AtomicI64,
}

impl FixedClock {
    pub fn at(now_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance_secs(&self, secs: i64) {
        self.now_ms.fetch_add(secs * 1000, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

pub fn ms_to_rfc3339(ts_ms: i64) -> String {
    let nanos = (ts_ms as i128) * 1_000_000i128;
    let dt = OffsetDateTime::from_unix_timestamp_nanos(nanos).unwrap_or(OffsetDateTime::UNIX_EPOCH);
    dt.format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

pub fn rfc3339_to_ms(value: &str) -> Option<i64> {
    let dt = OffsetDateTime::parse(value, &Rfc3339).ok()?;
    let ms = dt.unix_timestamp_nanos() / 1_000_000i128;
    i64::try_from(ms).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc3339_round_trips_milliseconds() {
        for ms in [0i64, 1, 1_700_000_000_123, 4_102_444_800_000] {
            let text = ms_to_rfc3339(ms);
            assert_eq!(rfc3339_to_ms(&text), Some(ms), "via {text}");
        }
    }

    #[test]
    fn fixed_clock_advances_on_demand() {
        let clock = FixedClock::at(1_000);
        assert_eq!(clock.now_ms(), 1_000);
        clock.advance_secs(61);
        assert_eq!(clock.now_ms(), 62_000);
        clock.set(5);
        assert_eq!(clock.now_ms(), 5);
    }

    #[test]
    fn rejects_unparseable_timestamps() {
        assert_eq!(rfc3339_to_ms("yesterday"), None);
        assert_eq!(rfc3339_to_ms(""), None);
    }
}
