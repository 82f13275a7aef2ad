//! Error types for the value crate.

use thiserror::Error;

/// Result type for value conversions.
pub type ValueResult<T> = Result<T, ValueError>;

/// Errors that can occur while converting foreign data into [`crate::Value`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValueError {
    /// An attribute map was expected but something else was supplied.
    #[error("expected an object of attributes, got {found}")]
    NotAnObject {
        /// Kind of value that was found instead.
        found: &'static str,
    },

    /// A number could not be represented.
    #[error("number out of range: {text}")]
    NumberOutOfRange {
        /// Textual form of the offending number.
        text: String,
    },
}

impl ValueError {
    /// Creates a not-an-object error.
    pub fn not_an_object(found: &'static str) -> Self {
        Self::NotAnObject { found }
    }

    /// Creates a number-out-of-range error.
    pub fn number_out_of_range(text: impl Into<String>) -> Self {
        Self::NumberOutOfRange { text: text.into() }
    }
}
