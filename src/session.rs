//! Session records
//!
//! A [`SessionRecord`] is the unit every backend stores: an opaque JSON payload
//! plus the absolute instant after which it must no longer be served.

use crate::types::SessionId;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// A stored session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Unique identifier for the session
    pub session_id: SessionId,
    /// Caller-defined session data
    pub payload: serde_json::Value,
    /// When the session expires
    pub live_until: DateTime<Utc>,
}

impl SessionRecord {
    /// Create a record that expires `ttl` from now
    pub fn new(session_id: SessionId, payload: serde_json::Value, ttl: TimeDelta) -> Self {
        Self {
            session_id,
            payload,
            live_until: deadline_after(ttl),
        }
    }

    /// Check if the record is still readable
    pub fn is_live(&self) -> bool {
        self.live_until > Utc::now()
    }

    /// Time left before expiry, `None` once expired
    pub fn remaining(&self) -> Option<TimeDelta> {
        let left = self.live_until - Utc::now();
        (left > TimeDelta::zero()).then_some(left)
    }

    /// Remaining lifetime truncated to whole milliseconds, at least 1
    pub fn remaining_millis(&self) -> Option<u64> {
        self.remaining()
            .map(|left| u64::try_from(left.num_milliseconds()).unwrap_or(0).max(1))
    }

    /// Remaining lifetime rounded up to whole seconds
    pub fn remaining_secs(&self) -> Option<u64> {
        self.remaining_millis().map(|ms| ms.div_ceil(1000))
    }

    /// Replace the payload, optionally pushing expiry to `now + ttl`
    pub fn refresh(&mut self, payload: serde_json::Value, ttl: Option<TimeDelta>) {
        self.payload = payload;
        if let Some(ttl) = ttl {
            self.live_until = deadline_after(ttl);
        }
    }

    /// Push expiry to `now + ttl` without touching the payload
    pub fn extend(&mut self, ttl: TimeDelta) {
        self.live_until = deadline_after(ttl);
    }
}

/// `now + ttl`, clamped to the latest representable instant
fn deadline_after(ttl: TimeDelta) -> DateTime<Utc> {
    Utc::now()
        .checked_add_signed(ttl)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_record_is_live() {
        let record = SessionRecord::new(SessionId::from("s1"), json!({"a": 1}), TimeDelta::seconds(60));
        assert!(record.is_live());
        assert!(record.remaining_secs().unwrap() <= 60);
        assert!(record.remaining_secs().unwrap() >= 59);
    }

    #[test]
    fn test_past_record_is_not_live() {
        let mut record = SessionRecord::new(SessionId::from("s1"), json!(null), TimeDelta::seconds(60));
        record.live_until = Utc::now() - TimeDelta::seconds(1);
        assert!(!record.is_live());
        assert!(record.remaining().is_none());
        assert!(record.remaining_secs().is_none());
    }

    #[test]
    fn test_refresh_without_ttl_keeps_expiry() {
        let mut record = SessionRecord::new(SessionId::from("s1"), json!(1), TimeDelta::seconds(60));
        let before = record.live_until;
        record.refresh(json!(2), None);
        assert_eq!(record.payload, json!(2));
        assert_eq!(record.live_until, before);
    }

    #[test]
    fn test_extend_moves_expiry() {
        let mut record = SessionRecord::new(SessionId::from("s1"), json!(1), TimeDelta::seconds(5));
        let before = record.live_until;
        record.extend(TimeDelta::seconds(600));
        assert!(record.live_until > before);
        assert_eq!(record.payload, json!(1));
    }

    #[test]
    fn test_record_serialization() {
        let record = SessionRecord::new(SessionId::from("s1"), json!({"user": "alice"}), TimeDelta::seconds(60));
        let json = serde_json::to_string(&record).unwrap();
        let deserialized: SessionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, deserialized);
    }

    #[test]
    fn test_huge_ttl_clamps_instead_of_overflowing() {
        let huge = TimeDelta::MAX;
        let mut record = SessionRecord::new(SessionId::from("s1"), json!(1), huge);
        assert_eq!(record.live_until, DateTime::<Utc>::MAX_UTC);
        record.extend(huge);
        record.refresh(json!(2), Some(huge));
        assert!(record.is_live());
    }

    #[test]
    fn test_remaining_millis_never_rounds_up() {
        let mut record = SessionRecord::new(SessionId::from("s1"), json!(1), TimeDelta::seconds(60));
        record.live_until = Utc::now() + TimeDelta::microseconds(1_500);
        assert_eq!(record.remaining_millis(), Some(1));
    }
}
