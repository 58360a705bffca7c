use chrono::{DateTime, Utc};

use crate::human::two_word_token;

/// A fresh `run_id`: `YYMMDDHHmm-TwoWords`. Shared by `remote_entry` (naming a `result/<run_id>`)
/// and `summary` (naming a run's log directory) so the two use one format.
pub fn new_run_id(now: DateTime<Utc>) -> String {
    format!("{}-{}", now.format("%y%m%d%H%M"), two_word_token())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_has_the_expected_shape() {
        let now = DateTime::parse_from_rfc3339("2026-07-26T10:05:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let run_id = new_run_id(now);
        assert!(run_id.starts_with("2607261005-"));
    }

    #[test]
    fn consecutive_run_ids_carry_the_same_timestamp_prefix() {
        let now = DateTime::parse_from_rfc3339("2026-07-26T10:05:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let a = new_run_id(now);
        let b = new_run_id(now);
        assert_eq!(&a[..11], &b[..11]);
    }
}
