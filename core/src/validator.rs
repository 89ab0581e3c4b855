//! Field-level business rule evaluation.
//!
//! A [`Validator`] collects `field → message` violations. The first violation
//! recorded for a field wins; later checks on the same field are ignored so the
//! caller sees the most basic problem first ("must be provided" before "must be
//! positive"). A candidate is valid when the map is empty.
//!
//! Validation is pure and deterministic: everything time-dependent (the current
//! year for release dates) arrives through [`ValidationContext`], so the request
//! path and the consumer worker evaluate exactly the same rules.
//!
//! # Example
//!
//! ```
//! use marquee_core::validator::Validator;
//!
//! let mut v = Validator::new();
//! v.check(false, "title", "must be provided");
//! v.check(false, "title", "must not be more than 500 bytes long");
//! assert!(!v.is_valid());
//! assert_eq!(&v.errors()["title"], "must be provided");
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::hash::Hash;

/// Field name → human-readable violation.
///
/// Ordered so that serialized error bodies and log lines are stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, String>);

impl FieldErrors {
    /// Returns `true` if no violations were recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of fields with a violation.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Look up the violation for a field.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    /// Iterate over `(field, message)` pairs in field order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl std::ops::Index<&str> for FieldErrors {
    type Output = str;

    fn index(&self, field: &str) -> &str {
        self.0.get(field).map_or("", String::as_str)
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, message) in &self.0 {
            if !first {
                write!(f, "; ")?;
            }
            write!(f, "{field}: {message}")?;
            first = false;
        }
        Ok(())
    }
}

/// Inputs to validation that are not part of the candidate itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationContext {
    /// The current calendar year (UTC), upper bound for release years.
    pub current_year: i32,
}

impl ValidationContext {
    /// Build a context from the current time of a clock.
    #[must_use]
    pub fn from_clock(clock: &dyn crate::environment::Clock) -> Self {
        use chrono::Datelike;
        Self {
            current_year: clock.now().year(),
        }
    }
}

/// Accumulates rule violations for one candidate entity.
#[derive(Debug, Clone, Default)]
pub struct Validator {
    errors: FieldErrors,
}

impl Validator {
    /// Create an empty validator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if no rule has failed.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Record `message` for `field` unless the field already has a violation.
    pub fn add_error(&mut self, field: &str, message: &str) {
        self.errors
            .0
            .entry(field.to_string())
            .or_insert_with(|| message.to_string());
    }

    /// Record `message` for `field` when `ok` is false.
    pub fn check(&mut self, ok: bool, field: &str, message: &str) {
        if !ok {
            self.add_error(field, message);
        }
    }

    /// Borrow the collected violations.
    #[must_use]
    pub const fn errors(&self) -> &FieldErrors {
        &self.errors
    }

    /// Finish validation.
    ///
    /// # Errors
    ///
    /// Returns the collected [`FieldErrors`] if any rule failed.
    pub fn finish(self) -> Result<(), FieldErrors> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }
}

/// Returns `true` if every value in the slice is distinct.
#[must_use]
pub fn unique<T: Eq + Hash>(values: &[T]) -> bool {
    let mut seen = HashSet::with_capacity(values.len());
    values.iter().all(|v| seen.insert(v))
}

/// A candidate that knows its own business rules.
pub trait Validate {
    /// Evaluate every rule, recording violations on `v`.
    fn validate(&self, v: &mut Validator, ctx: &ValidationContext);

    /// Convenience wrapper running [`Validate::validate`] on a fresh validator.
    ///
    /// # Errors
    ///
    /// Returns the violations if the candidate is invalid.
    fn validated(&self, ctx: &ValidationContext) -> Result<(), FieldErrors> {
        let mut v = Validator::new();
        self.validate(&mut v, ctx);
        v.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_error_per_field_wins() {
        let mut v = Validator::new();
        v.check(false, "year", "must be provided");
        v.check(false, "year", "must be greater than 1888");
        v.check(true, "title", "must be provided");

        let errors = v.finish().unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors.get("year"), Some("must be provided"));
        assert_eq!(errors.get("title"), None);
    }

    #[test]
    fn unique_detects_duplicates() {
        assert!(unique(&["drama", "comedy"]));
        assert!(!unique(&["drama", "drama"]));
        assert!(unique::<String>(&[]));
    }

    #[test]
    fn display_lists_fields_in_order() {
        let mut v = Validator::new();
        v.add_error("year", "must be provided");
        v.add_error("genres", "must not contain duplicate values");
        assert_eq!(
            v.errors().to_string(),
            "genres: must not contain duplicate values; year: must be provided"
        );
    }

    #[test]
    fn serializes_as_flat_object() {
        let mut v = Validator::new();
        v.add_error("rating", "must be between 0.5 and 5.0");
        let json = serde_json::to_value(v.errors()).unwrap();
        assert_eq!(json["rating"], "must be between 0.5 and 5.0");
    }
}
