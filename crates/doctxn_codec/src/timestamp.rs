//! Wall-clock timestamps stored inside documents.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
///
/// Lock markers and transaction records carry timestamps produced by the
/// writer's clock. Comparisons between timestamps from different processes
/// are only as good as the clocks involved.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// The Unix epoch.
    pub const EPOCH: Self = Self(0);

    /// Creates a timestamp from milliseconds since the epoch.
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(i64::try_from(since_epoch.as_millis()).unwrap_or(i64::MAX))
    }

    /// Returns milliseconds since the epoch.
    #[must_use]
    pub const fn as_millis(self) -> i64 {
        self.0
    }

    /// Time elapsed between `self` and `now`.
    ///
    /// Returns zero if `self` lies in the future relative to `now`.
    #[must_use]
    pub fn age_at(self, now: Timestamp) -> Duration {
        let millis = now.0.saturating_sub(self.0).max(0);
        Duration::from_millis(u64::try_from(millis).unwrap_or(0))
    }

    /// Returns the timestamp `duration` earlier, saturating at the epoch range.
    #[must_use]
    pub fn saturating_sub(self, duration: Duration) -> Self {
        let millis = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
        Self(self.0.saturating_sub(millis))
    }

    /// Returns the timestamp `duration` later.
    #[must_use]
    pub fn saturating_add(self, duration: Duration) -> Self {
        let millis = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
        Self(self.0.saturating_add(millis))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ts:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn age_is_saturating() {
        let earlier = Timestamp::from_millis(1_000);
        let later = Timestamp::from_millis(3_500);
        assert_eq!(earlier.age_at(later), Duration::from_millis(2_500));
        assert_eq!(later.age_at(earlier), Duration::ZERO);
    }

    #[test]
    fn arithmetic() {
        let ts = Timestamp::from_millis(10_000);
        assert_eq!(
            ts.saturating_sub(Duration::from_secs(4)),
            Timestamp::from_millis(6_000)
        );
        assert_eq!(
            ts.saturating_add(Duration::from_millis(5)),
            Timestamp::from_millis(10_005)
        );
    }

    #[test]
    fn now_is_after_epoch() {
        assert!(Timestamp::now() > Timestamp::EPOCH);
    }
}
