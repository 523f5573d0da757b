//! Error types for the claims model.

/// Errors raised while building or validating model values.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClaimsError {
    /// Label was empty after trimming
    #[error("Label is empty")]
    EmptyLabel,

    /// Label exceeds the maximum length
    #[error("Label exceeds {max} characters (got {len})")]
    LabelTooLong { max: usize, len: usize },

    /// A weight is negative or not finite
    #[error("Invalid weight for {what}: {value}")]
    InvalidWeight { what: String, value: f64 },

    /// Freshness horizon must be positive
    #[error("Maximum data age must be greater than zero")]
    InvalidMaxAge,

    /// Desirability table could not be parsed
    #[error("Desirability table parse error: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, ClaimsError>;
