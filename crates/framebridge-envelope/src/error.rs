/// Errors that can occur during envelope encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// The message is not valid JSON or has mistyped fields.
    #[error("malformed envelope JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// The message is JSON but not an object.
    #[error("envelope is not a JSON object")]
    NotAnObject,

    /// The envelope declares a protocol version this build does not speak.
    #[error("unsupported envelope version {found} (expected {expected})")]
    UnsupportedVersion { found: u64, expected: u32 },

    /// A required field is absent.
    #[error("envelope is missing required field '{0}'")]
    MissingField(&'static str),

    /// A field is present but has the wrong shape.
    #[error("envelope field '{field}' is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// The envelope carries both `action` and `response_uuid`.
    #[error("envelope carries both action and response_uuid")]
    Ambiguous,

    /// A reply that names no `request_uuid` cannot be matched to a request.
    #[error("reply {response_uuid} has no request_uuid")]
    Uncorrelated { response_uuid: String },

    /// The encoded envelope exceeds the configured maximum size.
    #[error("envelope too large ({size} bytes, max {max})")]
    TooLarge { size: usize, max: usize },

    /// The message came from an origin this zone does not trust.
    #[error("message from origin '{actual}' rejected (expected '{expected}')")]
    OriginRejected { expected: String, actual: String },

    /// Posting the encoded envelope failed.
    #[error("transport error: {0}")]
    Transport(#[from] framebridge_transport::TransportError),
}

pub type Result<T> = std::result::Result<T, EnvelopeError>;
