/// Errors that can occur while building or running response validators.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// The schema file could not be loaded.
    #[error("failed to load schema: {0}")]
    LoadFailed(String),

    /// The schema could not be compiled.
    #[error("failed to compile schema: {0}")]
    CompileFailed(String),

    /// The payload failed validation.
    #[error("validation failed for action {action}: {message}")]
    ValidationFailed { action: String, message: String },

    /// The schema or payload is not valid JSON.
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// No validator is registered for the action.
    #[error("no validator registered for action '{0}'")]
    NoValidator(String),

    /// A type expression names a primitive that does not exist.
    #[error("unknown type '{0}'")]
    UnknownType(String),
}

pub type Result<T> = std::result::Result<T, SchemaError>;
