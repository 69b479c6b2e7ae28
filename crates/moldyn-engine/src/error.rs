//! Error types for the graph engine.

use thiserror::Error;

/// Failures surfaced by graph construction, evaluation, and queries.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Unknown node prefix, duplicate name, missing argument, arity or
    /// width mismatch during construction.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Buffer-size or dimension disagreement.
    #[error("shape error: {0}")]
    Shape(String),

    /// Non-finite value in forces, positions, or the potential.
    #[error("numerical error: {0}")]
    Numerical(String),

    /// Double registration of a factory prefix.
    #[error("registry error: {0}")]
    Registry(String),

    /// `get_value_by_name` for a name the node does not expose.
    #[error("no value named '{0}' exposed by this node")]
    Query(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
