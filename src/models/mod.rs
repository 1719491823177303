pub mod capture;
pub mod review;
pub mod summary;
pub mod task;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Build a record identifier from a prefix and creation time.
///
/// The timestamp is ISO-8601 with `:` and `.` replaced so the id is safe as a
/// filename, e.g. `verification-2026-10-18T09-30-12-123Z-1a2b3c4d`. The short
/// random suffix keeps ids unique within the same millisecond.
pub fn record_id(prefix: &str, at: DateTime<Utc>) -> String {
    let stamp = at.format("%Y-%m-%dT%H-%M-%S-%3fZ");
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{prefix}-{stamp}-{}", &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_record_id_is_filename_safe() {
        let at = Utc.with_ymd_and_hms(2026, 10, 18, 9, 30, 12).unwrap();
        let id = record_id("verification", at);
        assert!(id.starts_with("verification-2026-10-18T09-30-12-000Z-"));
        assert!(!id.contains(':'));
        assert!(!id.contains('.'));
        assert!(!id.contains('/'));
    }

    #[test]
    fn test_record_ids_unique_within_same_instant() {
        let at = Utc::now();
        assert_ne!(record_id("human-review", at), record_id("human-review", at));
    }
}
