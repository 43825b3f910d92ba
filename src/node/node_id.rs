use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// Unique identifier for a peer in the mutual-exclusion group.
///
/// Ordering is plain lexicographic byte order of the name. Every peer
/// breaks timestamp ties with this order, so it must never depend on
/// locale or on anything local to a process.
#[derive(
    Clone,
    Debug,
    Default,
    Deserialize,
    Serialize,
    PartialEq,
    PartialOrd,
    Ord,
    Eq,
    Hash,
    Encode,
    Decode,
)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: String) -> Self {
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        PeerId::new(id.to_string())
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        PeerId::new(id)
    }
}

impl std::str::FromStr for PeerId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err("peer id can not be empty".to_string());
        }
        Ok(PeerId::from(trimmed))
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
