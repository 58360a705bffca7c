use serde::{Deserialize, Serialize};

/// The on-disk shape of a `lock` control file: whoever holds `writer_id` owns the lease as long
/// as `written_at_unix_ms + ttl_seconds` is in the future.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub writer_id: String,
    pub written_at_unix_ms: i64,
    pub ttl_seconds: i64,
}

impl LeaseRecord {
    pub fn new(writer_id: impl Into<String>, now_unix_ms: i64, ttl_seconds: i64) -> LeaseRecord {
        LeaseRecord {
            writer_id: writer_id.into(),
            written_at_unix_ms: now_unix_ms,
            ttl_seconds,
        }
    }

    /// A lease is fresh iff `now - written_at < ttl`; a non-positive `ttl_seconds` (leasing
    /// disabled) is never fresh, since callers that disable leasing never consult this.
    pub fn is_fresh(&self, now_unix_ms: i64) -> bool {
        if self.ttl_seconds <= 0 {
            return false;
        }
        let age_ms = now_unix_ms - self.written_at_unix_ms;
        age_ms >= 0 && age_ms < self.ttl_seconds * 1000
    }
}
