//! Per-sender hourly send limiting
//!
//! Each sender has one counter per clock hour (UTC). A unit is admitted while
//! the counter for the current hour is below the campaign's hourly limit, and
//! admission increments the counter. Once the limit is reached the unit is
//! deferred to the start of the next hour plus a small buffer.
//!
//! # Example
//!
//! ```text
//! Hourly limit: 2, sender: a@x.com, current time 10:15
//! - 1st unit: admitted (count 1)
//! - 2nd unit: admitted (count 2)
//! - 3rd unit: deferred until 11:00:10
//! ```
//!
//! A limit of zero means unlimited and never touches a counter.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Configuration for hourly rate limiting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Seconds past the next hour boundary that deferred units are released at
    #[serde(default = "default_defer_buffer_secs")]
    pub defer_buffer_secs: u64,

    /// How long an hour's counter is kept before it may be pruned
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            defer_buffer_secs: default_defer_buffer_secs(),
            retention_secs: default_retention_secs(),
        }
    }
}

const fn default_defer_buffer_secs() -> u64 {
    10
}

const fn default_retention_secs() -> u64 {
    2 * 60 * 60
}

/// The outcome of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The unit may be sent now; the counter has been incremented
    Admitted,
    /// The hour's quota is spent; try again at `until`
    Deferred { until: DateTime<Utc> },
}

impl Admission {
    pub const fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted)
    }
}

/// Counter for a single (sender, hour) pair
#[derive(Debug)]
struct HourBucket {
    count: u32,
    created_at: DateTime<Utc>,
}

type BucketKey = (String, DateTime<Utc>);

/// Per-sender hourly counters
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: DashMap<BucketKey, Arc<parking_lot::Mutex<HourBucket>>>,
}

/// Truncate a timestamp to the start of its UTC hour
pub fn hour_bucket(at: DateTime<Utc>) -> DateTime<Utc> {
    let secs = at.timestamp();
    DateTime::from_timestamp(secs - secs.rem_euclid(3600), 0).unwrap_or(at)
}

fn seconds(secs: u64) -> TimeDelta {
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::MAX)
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: DashMap::new(),
        }
    }

    fn bucket(
        &self,
        sender: &str,
        hour: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Arc<parking_lot::Mutex<HourBucket>> {
        self.buckets
            .entry((sender.to_owned(), hour))
            .or_insert_with(|| {
                Arc::new(parking_lot::Mutex::new(HourBucket {
                    count: 0,
                    created_at: now,
                }))
            })
            .clone()
    }

    /// Check and consume one send from `sender`'s quota for the current hour
    pub fn try_admit(&self, sender: &str, hourly_limit: u32) -> Admission {
        self.try_admit_at(sender, hourly_limit, Utc::now())
    }

    /// As [`Self::try_admit`], evaluated at `now`
    ///
    /// The check and the increment happen under the bucket's lock, so
    /// concurrent callers can never push a counter past `hourly_limit`.
    pub fn try_admit_at(&self, sender: &str, hourly_limit: u32, now: DateTime<Utc>) -> Admission {
        if hourly_limit == 0 {
            return Admission::Admitted;
        }

        let hour = hour_bucket(now);
        let bucket = self.bucket(sender, hour, now);
        let mut bucket = bucket.lock();

        if bucket.count < hourly_limit {
            bucket.count += 1;
            return Admission::Admitted;
        }

        let count = bucket.count;
        drop(bucket);

        let until = TimeDelta::hours(1)
            .checked_add(&seconds(self.config.defer_buffer_secs))
            .and_then(|offset| hour.checked_add_signed(offset))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        tracing::debug!(
            sender,
            count,
            hourly_limit,
            until = %until,
            "Hourly limit reached, deferring"
        );

        Admission::Deferred { until }
    }

    /// Current counter for `sender` in the hour containing `at`
    pub fn stats(&self, sender: &str, at: DateTime<Utc>) -> Option<RateLimitStats> {
        let hour = hour_bucket(at);
        self.buckets.get(&(sender.to_owned(), hour)).map(|bucket| {
            let bucket = bucket.lock();
            RateLimitStats {
                hour,
                count: bucket.count,
                created_at: bucket.created_at,
            }
        })
    }

    /// Drop counters older than the retention window
    ///
    /// The counter for the current hour is always kept. Returns the number
    /// of counters removed.
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let retention = seconds(self.config.retention_secs);
        let current = hour_bucket(now);
        let before = self.buckets.len();

        self.buckets.retain(|(_, hour), bucket| {
            *hour >= current
                || bucket
                    .lock()
                    .created_at
                    .checked_add_signed(retention)
                    .is_none_or(|expiry| expiry > now)
        });

        let removed = before.saturating_sub(self.buckets.len());
        if removed > 0 {
            tracing::debug!(removed, "Pruned expired rate limit counters");
        }
        removed
    }

    /// Number of live counters
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

/// Snapshot of one sender's counter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitStats {
    /// Start of the hour this counter covers
    pub hour: DateTime<Utc>,
    /// Sends admitted so far in the hour
    pub count: u32,
    /// When the counter was first touched
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, reason = "tests")]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, h, m, s).unwrap()
    }

    #[test]
    fn test_hour_bucket() {
        assert_eq!(hour_bucket(at(10, 15, 42)), at(10, 0, 0));
        assert_eq!(hour_bucket(at(10, 0, 0)), at(10, 0, 0));
        assert_eq!(hour_bucket(at(23, 59, 59)), at(23, 0, 0));
    }

    #[test]
    fn test_limit_defers_to_next_hour() {
        let limiter = RateLimiter::new(RateLimitConfig::default());
        let now = at(10, 15, 0);

        assert_eq!(limiter.try_admit_at("a@x.com", 2, now), Admission::Admitted);
        assert_eq!(limiter.try_admit_at("a@x.com", 2, now), Admission::Admitted);
        assert_eq!(
            limiter.try_admit_at("a@x.com", 2, now),
            Admission::Deferred {
                until: at(11, 0, 10)
            }
        );

        // Deferral does not consume quota
        assert_eq!(limiter.stats("a@x.com", now).unwrap().count, 2);
    }

    #[test]
    fn test_new_hour_resets_quota() {
        let limiter = RateLimiter::new(RateLimitConfig::default());

        assert!(limiter.try_admit_at("a@x.com", 1, at(10, 59, 59)).is_admitted());
        assert!(!limiter.try_admit_at("a@x.com", 1, at(10, 59, 59)).is_admitted());
        assert!(limiter.try_admit_at("a@x.com", 1, at(11, 0, 10)).is_admitted());
    }

    #[test]
    fn test_senders_are_independent() {
        let limiter = RateLimiter::new(RateLimitConfig::default());
        let now = at(9, 0, 0);

        assert!(limiter.try_admit_at("a@x.com", 1, now).is_admitted());
        assert!(limiter.try_admit_at("b@x.com", 1, now).is_admitted());
        assert!(!limiter.try_admit_at("a@x.com", 1, now).is_admitted());
    }

    #[test]
    fn test_zero_limit_is_unlimited() {
        let limiter = RateLimiter::new(RateLimitConfig::default());
        let now = at(9, 0, 0);

        for _ in 0..1000 {
            assert!(limiter.try_admit_at("a@x.com", 0, now).is_admitted());
        }
        assert!(limiter.is_empty());
    }

    #[test]
    fn test_custom_defer_buffer() {
        let limiter = RateLimiter::new(RateLimitConfig {
            defer_buffer_secs: 0,
            ..RateLimitConfig::default()
        });
        let now = at(9, 30, 0);

        limiter.try_admit_at("a@x.com", 1, now);
        assert_eq!(
            limiter.try_admit_at("a@x.com", 1, now),
            Admission::Deferred {
                until: at(10, 0, 0)
            }
        );
    }

    #[test]
    fn test_concurrent_admissions_never_exceed_limit() {
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig::default()));
        let now = at(12, 0, 0);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || {
                    (0..50)
                        .filter(|_| limiter.try_admit_at("a@x.com", 100, now).is_admitted())
                        .count()
                })
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 100);
        assert_eq!(limiter.stats("a@x.com", now).unwrap().count, 100);
    }

    #[test]
    fn test_prune_keeps_current_hour() {
        let limiter = RateLimiter::new(RateLimitConfig {
            retention_secs: 60,
            ..RateLimitConfig::default()
        });

        limiter.try_admit_at("a@x.com", 5, at(8, 0, 0));
        limiter.try_admit_at("a@x.com", 5, at(10, 0, 0));
        assert_eq!(limiter.len(), 2);

        let removed = limiter.prune(at(10, 30, 0));
        assert_eq!(removed, 1);
        assert!(limiter.stats("a@x.com", at(10, 30, 0)).is_some());
        assert!(limiter.stats("a@x.com", at(8, 0, 0)).is_none());
    }

    #[test]
    fn test_config_defaults_from_ron() {
        let config: RateLimitConfig = ron::from_str("()").unwrap();
        assert_eq!(config.defer_buffer_secs, 10);
        assert_eq!(config.retention_secs, 7200);
    }
}
