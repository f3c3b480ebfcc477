use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An 8-character snapshot identifier: the prefix of a fresh UUIDv4's
/// hex form. Short enough to type, random enough to never collide within
/// one repository.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(String);

impl SnapshotId {
    /// Generate a new random snapshot ID.
    pub fn generate() -> Self {
        let uuid = Uuid::new_v4().simple().to_string();
        SnapshotId(uuid[..8].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SnapshotId {
    fn from(s: &str) -> Self {
        SnapshotId(s.to_string())
    }
}

impl fmt::Debug for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SnapshotId({})", self.0)
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
