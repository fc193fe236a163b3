//! Error types for ApproxQL

use thiserror::Error;

/// ApproxQL error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A model with the same warehouse key already exists
    #[error("model '{0}' already exists in the warehouse, use another model name")]
    ModelAlreadyExists(String),

    /// The query shape is outside what the engine supports
    #[error("unsupported query: {0}")]
    UnsupportedQuery(String),

    /// No catalog entry under the given key
    #[error("no model registered under key '{0}'")]
    KeyNotFound(String),

    /// AVG requested where the COUNT estimate is zero
    #[error("average is undefined: the count estimate over the range is zero")]
    UndefinedAverage,

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Computation error
    #[error("Computation error: {0}")]
    Computation(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_key() {
        let e = Error::KeyNotFound("sales_model.model.json".to_string());
        assert!(e.to_string().contains("sales_model.model.json"));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let e: Error = io.into();
        assert!(matches!(e, Error::Io(_)));
    }
}
