use std::fmt;
use std::io;

use framebridge_envelope::EnvelopeError;
use framebridge_peer::{PeerError, RequestError};
use framebridge_schema::SchemaError;
use framebridge_transport::TransportError;

// Exit codes follow sysexits where one fits.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const SESSION_UNAVAILABLE: i32 = 3;
pub const HEALTH_CHECK_FAILED: i32 = 30;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const INPUT_UNREADABLE: i32 = 66;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(USAGE, message)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => INPUT_UNREADABLE,
        io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => DATA_INVALID,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::InvalidOrigin { .. } => CliError::new(USAGE, format!("{context}: {err}")),
        TransportError::FrameCreation { .. } | TransportError::WindowClosed(_) => {
            CliError::new(SESSION_UNAVAILABLE, format!("{context}: {err}"))
        }
        TransportError::Storage { .. } => CliError::new(FAILURE, format!("{context}: {err}")),
    }
}

pub fn envelope_error(context: &str, err: EnvelopeError) -> CliError {
    match err {
        EnvelopeError::Transport(err) => transport_error(context, err),
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

pub fn schema_error(context: &str, err: SchemaError) -> CliError {
    match err {
        SchemaError::UnknownType(_) => CliError::new(USAGE, format!("{context}: {err}")),
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

pub fn peer_error(context: &str, err: PeerError) -> CliError {
    match err {
        PeerError::Transport(err) => transport_error(context, err),
        PeerError::Envelope(err) => envelope_error(context, err),
        PeerError::Schema(err) => schema_error(context, err),
        PeerError::SessionUnavailable(_) => {
            CliError::new(SESSION_UNAVAILABLE, format!("{context}: {err}"))
        }
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn request_error(context: &str, err: &RequestError) -> CliError {
    let code = match err {
        RequestError::Timeout { .. } => TIMEOUT,
        RequestError::InvalidData { .. } => DATA_INVALID,
        RequestError::SessionUnavailable(_) => SESSION_UNAVAILABLE,
        RequestError::NoValidator(_) => USAGE,
        RequestError::Application { .. } | RequestError::Send(_) => FAILURE,
    };
    CliError::new(code, format!("{context}: [{}] {err}", err.code()))
}
