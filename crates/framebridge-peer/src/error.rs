use framebridge_envelope::{
    Payload, ERROR_ACTION_NOT_FOUND, ERROR_INVALID_DATA, ERROR_SEND_FAILED,
    ERROR_SESSION_UNAVAILABLE, ERROR_TIMEOUT,
};
use serde_json::Value;

/// Errors raised while wiring or running a zone.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] framebridge_transport::TransportError),

    /// Envelope encoding, decoding or posting failed.
    #[error("envelope error: {0}")]
    Envelope(#[from] framebridge_envelope::EnvelopeError),

    /// Validator registry error.
    #[error("schema error: {0}")]
    Schema(#[from] framebridge_schema::SchemaError),

    /// The session frame could not be created or did not come up.
    #[error("session unavailable: {0}")]
    SessionUnavailable(String),

    /// The inbound dispatcher received a message before `configure`.
    #[error("zone is not configured")]
    NotConfigured,
}

pub type Result<T> = std::result::Result<T, PeerError>;

/// Why an outbound request did not complete successfully.
///
/// Delivered to the error continuation of the request. [`code`](Self::code)
/// is the stable wire-level error code.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RequestError {
    /// No reply arrived before the deadline.
    #[error("request '{action}' timed out")]
    Timeout { action: String },

    /// The remote handler replied with an error.
    #[error("remote error '{code}'")]
    Application { code: String, data: Payload },

    /// The reply payload was rejected by the action's validator.
    #[error("reply to '{action}' rejected: {reason}")]
    InvalidData { action: String, reason: String },

    /// No validator is registered for the action, so a reply could never be accepted.
    #[error("no validator registered for action '{0}'")]
    NoValidator(String),

    /// The session frame is unavailable for this tab.
    #[error("session unavailable: {0}")]
    SessionUnavailable(String),

    /// The request could not be encoded or posted.
    #[error("failed to send request: {0}")]
    Send(String),
}

impl RequestError {
    pub fn code(&self) -> &str {
        match self {
            RequestError::Timeout { .. } => ERROR_TIMEOUT,
            RequestError::Application { code, .. } => code,
            RequestError::InvalidData { .. } => ERROR_INVALID_DATA,
            RequestError::NoValidator(_) => ERROR_ACTION_NOT_FOUND,
            RequestError::SessionUnavailable(_) => ERROR_SESSION_UNAVAILABLE,
            RequestError::Send(_) => ERROR_SEND_FAILED,
        }
    }

    /// Error details. Remote errors carry the handler's data verbatim; local
    /// errors carry a `message`.
    pub fn data(&self) -> Payload {
        match self {
            RequestError::Application { data, .. } => data.clone(),
            other => {
                let mut data = Payload::new();
                data.insert("message".to_string(), Value::String(other.to_string()));
                data
            }
        }
    }
}
