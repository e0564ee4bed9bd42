//! Store Error Categories
//!
//! Failures raised by store operations fall into a small set of categories
//! that both sides of the wire agree on. The handler serializes a failure as
//! `i16 code | utf message`; the [`ErrorCodeMapper`] owns the category-to-
//! code table, and the codes are stable - peers decode responses written by
//! any node version.

use thiserror::Error;

/// A categorized store failure.
///
/// The `Display` text is exactly what goes into the error response's
/// message field.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store exists but cannot serve requests right now.
    #[error("{0}")]
    Unavailable(String),

    /// A put carried a version that an existing version already descends.
    #[error("{0}")]
    ObsoleteVersion(String),

    /// The request's version metadata (vector clock) failed to decode.
    #[error("{0}")]
    InvalidMetadata(String),

    /// The store detected internally contradictory data.
    #[error("{0}")]
    InconsistentData(String),

    /// A remote store could not be reached.
    #[error("{0}")]
    Unreachable(String),

    /// Anything that fits no specific category.
    #[error("{0}")]
    Unknown(String),
}

impl StoreError {
    /// Convenience for the generic category.
    pub fn unknown(message: impl Into<String>) -> Self {
        StoreError::Unknown(message.into())
    }
}

/// Maps error categories to the stable `i16` codes used on the wire.
///
/// Code 0 is reserved for success and is never returned here.
#[derive(Debug, Default, Clone, Copy)]
pub struct ErrorCodeMapper;

impl ErrorCodeMapper {
    pub fn new() -> Self {
        Self
    }

    /// The wire code for an error category. Unknown failures get the
    /// generic code 1.
    pub fn code(&self, error: &StoreError) -> i16 {
        match error {
            StoreError::Unknown(_) => 1,
            StoreError::Unavailable(_) => 2,
            StoreError::ObsoleteVersion(_) => 3,
            StoreError::InvalidMetadata(_) => 4,
            StoreError::InconsistentData(_) => 5,
            StoreError::Unreachable(_) => 6,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        let mapper = ErrorCodeMapper::new();
        assert_eq!(mapper.code(&StoreError::unknown("x")), 1);
        assert_eq!(mapper.code(&StoreError::Unavailable("x".into())), 2);
        assert_eq!(mapper.code(&StoreError::ObsoleteVersion("x".into())), 3);
        assert_eq!(mapper.code(&StoreError::InvalidMetadata("x".into())), 4);
        assert_eq!(mapper.code(&StoreError::InconsistentData("x".into())), 5);
        assert_eq!(mapper.code(&StoreError::Unreachable("x".into())), 6);
    }

    #[test]
    fn test_display_is_the_bare_message() {
        let err = StoreError::unknown("No store named 's'.");
        assert_eq!(err.to_string(), "No store named 's'.");
    }
}
