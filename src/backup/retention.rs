// dbbackup/src/backup/retention.rs
use chrono::{DateTime, TimeDelta, Utc};

/// How long backups are kept before `clean_old_backups` removes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_age: TimeDelta,
}

impl RetentionPolicy {
    pub fn new(max_age: TimeDelta) -> Self {
        RetentionPolicy { max_age }
    }

    pub fn from_days(days: u32) -> Self {
        RetentionPolicy::new(TimeDelta::days(i64::from(days)))
    }

    /// A policy under which nothing ever expires.
    pub fn keep_forever() -> Self {
        RetentionPolicy::new(TimeDelta::MAX)
    }

    /// Backups created at or before the returned instant are expired.
    ///
    /// `None` when the cutoff lies before the representable range, i.e. nothing expires.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        now.checked_sub_signed(self.max_age)
    }

    pub fn is_expired(&self, created_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        self.cutoff(now).is_some_and(|cutoff| created_at <= cutoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 11, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_cutoff_from_days() {
        let policy = RetentionPolicy::from_days(7);
        assert_eq!(
            policy.cutoff(now()),
            Some(Utc.with_ymd_and_hms(2024, 1, 4, 12, 0, 0).unwrap())
        );
        assert!(policy.is_expired(now() - TimeDelta::days(10), now()));
        assert!(!policy.is_expired(now() - TimeDelta::days(2), now()));
    }

    #[test]
    fn test_zero_age_expires_everything_up_to_now() {
        let policy = RetentionPolicy::from_days(0);
        assert!(policy.is_expired(now(), now()));
        assert!(policy.is_expired(now() - TimeDelta::seconds(1), now()));
    }

    #[test]
    fn test_keep_forever_expires_nothing() {
        let policy = RetentionPolicy::keep_forever();
        assert_eq!(policy.cutoff(now()), None);
        assert!(!policy.is_expired(DateTime::<Utc>::MIN_UTC, now()));
    }
}
