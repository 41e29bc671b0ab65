// crates/types/src/version.rs
//! Content snapshot of a file after a specific pass.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stored content snapshot.
///
/// Pass 0 is the original content; passes 1..N are post-pass. At most one
/// snapshot exists per (`file_id`, `pass_number`) and snapshots are
/// immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Version {
    pub file_id: String,
    pub pass_number: u32,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_serializes_camel_case() {
        let v = Version {
            file_id: "f1".into(),
            pass_number: 0,
            content: "original".into(),
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&v).unwrap();
        assert!(json.contains("\"fileId\":\"f1\""));
        assert!(json.contains("\"passNumber\":0"));
    }
}
