//! The mutation intent envelope carried on the message channel.
//!
//! On the wire an intent is a flat JSON object: the entity kind tag, the
//! correlation identity, and the entity's domain fields side by side.
//!
//! ```json
//! {"kind":"movie","correlation_id":"0190...","title":"Moana","year":2016,"runtime":107,"genres":["animation"]}
//! ```

use crate::correlation::CorrelationId;
use crate::movie::MovieDraft;
use crate::record::EntityKind;
use crate::review::ReviewDraft;
use crate::validator::{FieldErrors, ValidationContext, Validate, Validator};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A payload that can travel inside a [`MutationIntent`].
pub trait IntentPayload: Validate + Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Kind tag written into the envelope.
    const KIND: EntityKind;

    /// Partition key for the channel.
    ///
    /// Intents sharing a key are delivered in publish order.
    fn partition_key(&self, correlation_id: CorrelationId) -> String;
}

impl IntentPayload for MovieDraft {
    const KIND: EntityKind = EntityKind::Movie;

    fn partition_key(&self, correlation_id: CorrelationId) -> String {
        correlation_id.to_string()
    }
}

impl IntentPayload for ReviewDraft {
    const KIND: EntityKind = EntityKind::Review;

    // Reviews of the same movie stay ordered.
    fn partition_key(&self, _correlation_id: CorrelationId) -> String {
        self.movie_id.to_string()
    }
}

/// Why a channel payload could not be turned into an intent.
#[derive(Error, Debug)]
pub enum IntentError {
    /// Not valid JSON for this payload type.
    #[error("Malformed intent: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Valid JSON, but tagged for another entity kind.
    #[error("Wrong intent kind: expected {expected}, found {found}")]
    WrongKind {
        /// Kind the consumer handles.
        expected: EntityKind,
        /// Kind found in the envelope.
        found: EntityKind,
    },
}

/// A create request in flight between the producer gateway and a consumer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MutationIntent<T> {
    /// Entity kind tag.
    pub kind: EntityKind,
    /// Idempotency and lookup key.
    #[serde(default)]
    pub correlation_id: CorrelationId,
    /// Domain fields.
    #[serde(flatten)]
    pub payload: T,
}

impl<T: IntentPayload> MutationIntent<T> {
    /// Wrap a payload under a correlation identity.
    #[must_use]
    pub const fn new(correlation_id: CorrelationId, payload: T) -> Self {
        Self {
            kind: T::KIND,
            correlation_id,
            payload,
        }
    }

    /// Channel key for this intent.
    #[must_use]
    pub fn partition_key(&self) -> String {
        self.payload.partition_key(self.correlation_id)
    }

    /// Serialize for publication.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be represented as JSON.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parse a channel payload.
    ///
    /// # Errors
    ///
    /// Returns [`IntentError::Malformed`] for undecodable bytes and
    /// [`IntentError::WrongKind`] for an intent of another kind.
    pub fn decode(bytes: &[u8]) -> Result<Self, IntentError> {
        let intent: Self = serde_json::from_slice(bytes)?;
        if intent.kind != T::KIND {
            return Err(IntentError::WrongKind {
                expected: T::KIND,
                found: intent.kind,
            });
        }
        Ok(intent)
    }

    /// Run the payload's business rules plus the envelope's own.
    ///
    /// # Errors
    ///
    /// Returns every field violation found.
    pub fn validated(&self, ctx: &ValidationContext) -> Result<(), FieldErrors> {
        let mut v = Validator::new();
        v.check(
            !self.correlation_id.is_nil(),
            "correlation_id",
            "must be a valid UUID",
        );
        self.payload.validate(&mut v, ctx);
        v.finish()
    }
}
