//! Typed ID wrappers.
//!
//! Conversion jobs are keyed by their source path in storage, but every job
//! also carries an opaque id so that worker callbacks can be matched against
//! the job that is *currently* active. A re-enqueued path gets a fresh id,
//! which is what lets late callbacks from a cancelled run be told apart.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a conversion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversionJobId(Uuid);

impl ConversionJobId {
    /// Generate a new random conversion job ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConversionJobId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ConversionJobId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<ConversionJobId> for Uuid {
    fn from(id: ConversionJobId) -> Self {
        id.0
    }
}

impl FromStr for ConversionJobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl std::fmt::Display for ConversionJobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(ConversionJobId::new(), ConversionJobId::new());
    }

    #[test]
    fn test_parse_display() {
        let id = ConversionJobId::new();
        let parsed: ConversionJobId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<ConversionJobId>().is_err());
    }

    #[test]
    fn test_serializes_transparently() {
        let uuid = Uuid::new_v4();
        let id = ConversionJobId::from(uuid);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", uuid));
    }
}
