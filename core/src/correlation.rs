//! Correlation identity for asynchronous writes.
//!
//! Every mutation intent carries a [`CorrelationId`]. It is the idempotency key
//! the store enforces as unique per entity kind, and the handle a caller uses to
//! discover the outcome of a write that was accepted but not yet applied.
//!
//! Identities generated by the producing edge are UUIDv7, so the creation time
//! is embedded in the identifier itself. Caller-supplied identities may be any
//! non-nil UUID; those without a timestamp simply report no creation time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Error type for [`CorrelationId`] parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid correlation ID: {0}")]
pub struct ParseCorrelationIdError(String);

/// Caller-visible token linking an asynchronous write to its eventual record.
///
/// # Examples
///
/// ```
/// use marquee_core::correlation::CorrelationId;
///
/// let id = CorrelationId::generate();
/// assert!(!id.is_nil());
/// assert!(id.created_at().is_some());
///
/// let parsed: CorrelationId = id.to_string().parse().unwrap();
/// assert_eq!(parsed, id);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generate a fresh, time-ordered correlation identity (UUIDv7).
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    /// Wrap an existing UUID without validation.
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// The nil identity. Never valid on an intent.
    #[must_use]
    pub const fn nil() -> Self {
        Self(Uuid::nil())
    }

    /// Returns `true` for the all-zero UUID.
    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    /// Get the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Creation time embedded in the identity, if it carries one (v1, v6, v7).
    #[must_use]
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        let (secs, nanos) = self.0.get_timestamp()?.to_unix();
        let secs = i64::try_from(secs).ok()?;
        DateTime::from_timestamp(secs, nanos)
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::nil()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CorrelationId {
    type Err = ParseCorrelationIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = Uuid::parse_str(s.trim()).map_err(|e| ParseCorrelationIdError(e.to_string()))?;
        if id.is_nil() {
            return Err(ParseCorrelationIdError(
                "correlation ID cannot be nil".to_string(),
            ));
        }
        Ok(Self(id))
    }
}

impl From<Uuid> for CorrelationId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl From<CorrelationId> for Uuid {
    fn from(id: CorrelationId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique_and_timestamped() {
        let a = CorrelationId::generate();
        let b = CorrelationId::generate();
        assert_ne!(a, b);

        let created = a.created_at().unwrap();
        let age = Utc::now() - created;
        assert!(age.num_seconds().abs() < 5);
    }

    #[test]
    fn random_ids_have_no_timestamp() {
        let id = CorrelationId::from_uuid(Uuid::new_v4());
        assert!(id.created_at().is_none());
    }

    #[test]
    fn parse_rejects_nil_and_garbage() {
        assert!("00000000-0000-0000-0000-000000000000"
            .parse::<CorrelationId>()
            .is_err());
        assert!("not-a-uuid".parse::<CorrelationId>().is_err());
    }

    #[test]
    fn serializes_as_bare_uuid() {
        let id = CorrelationId::generate();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
    }
}
