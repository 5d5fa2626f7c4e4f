//! Per-process election identity.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// A value unique to one process instance, stored as the *value* of the
/// process's ephemeral election node.
///
/// Identity equality, not path equality, decides "is this node mine":
/// after a create whose reply was lost, a blind retry can leave two nodes
/// behind for one process, and only the stored value still identifies
/// them reliably.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElectionIdentity(String);

impl ElectionIdentity {
    /// Generate a fresh identity from wall-clock time, process id, and
    /// randomness. Called once at election startup; never regenerated.
    pub fn generate() -> Self {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis())
            .unwrap_or_default();
        let pid = std::process::id();
        let nonce: u32 = rand::random();
        Self(format!("{now_ms:x}-{pid:x}-{nonce:08x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for ElectionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ElectionIdentity {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ElectionIdentity {
    fn from(value: String) -> Self {
        Self(value)
    }
}
