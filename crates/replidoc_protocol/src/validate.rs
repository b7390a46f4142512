//! Boundary validation applied before any conflict logic runs.

use thiserror::Error;

use crate::document::Document;

/// Upper bound for the `age` field, inclusive.
pub const MAX_AGE: u32 = 150;

/// A document rejected at the schema boundary.
///
/// Validation failures are not conflicts: they are surfaced synchronously to
/// local callers and skip the offending entry in pushed batches.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The primary key is empty or whitespace.
    #[error("document is missing a passport id")]
    MissingPassportId,
    /// The age field is outside the allowed range.
    #[error("age {age} is outside the allowed range 0..={max}", max = MAX_AGE)]
    AgeOutOfRange {
        /// The rejected value.
        age: u32,
    },
}

/// Checks the field-level contract: non-empty primary key, age within range.
///
/// Required business fields and integer types are enforced earlier, when the
/// wire body is deserialized into a [`Document`].
pub fn validate_document(document: &Document) -> Result<(), ValidationError> {
    if document.passport_id.trim().is_empty() {
        return Err(ValidationError::MissingPassportId);
    }
    if document.age > MAX_AGE {
        return Err(ValidationError::AgeOutOfRange { age: document.age });
    }
    Ok(())
}
