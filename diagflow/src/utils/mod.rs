//! Identifier helpers.

use crate::core::BundleId;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Prefix of every generated bundle identifier.
pub const BUNDLE_ID_PREFIX: &str = "bundle";

/// Generates a fresh bundle identifier.
///
/// The format is `bundle-<yyyy-mm-dd-HHMMSS>-<uuid>`; the timestamp keeps
/// identifiers roughly sortable, the UUID keeps them unique.
#[must_use]
pub fn generate_bundle_id() -> BundleId {
    bundle_id_at(Utc::now(), Uuid::new_v4())
}

fn bundle_id_at(at: DateTime<Utc>, uuid: Uuid) -> BundleId {
    BundleId::new(format!(
        "{BUNDLE_ID_PREFIX}-{}-{}",
        at.format("%Y-%m-%d-%H%M%S"),
        uuid.simple()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashSet;

    #[test]
    fn test_bundle_id_format() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        let id = bundle_id_at(at, Uuid::nil());
        assert_eq!(
            id.as_str(),
            "bundle-2024-03-09-070501-00000000000000000000000000000000"
        );
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let ids: HashSet<_> = (0..1000).map(|_| generate_bundle_id()).collect();
        assert_eq!(ids.len(), 1000);
    }
}
