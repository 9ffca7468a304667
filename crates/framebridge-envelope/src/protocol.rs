//! Protocol constants shared by every zone.
//!
//! These names are part of the wire contract: tabs built from different
//! releases must agree on them to find each other's session frame.

/// Envelope `version` field written by this build.
pub const PROTOCOL_VERSION: u32 = 1;

/// Subdomain prefix of the session domain (`https://session.<page host>`).
pub const DEFAULT_SESSION_SUBDOMAIN: &str = "session";

/// Path of the document loaded into the hidden session frame.
pub const SESSION_FRAME_PATH: &str = "/frame";

/// Window name of the hidden session frame. Every tab looks it up by this name.
pub const SESSION_FRAME_NAME: &str = "framebridge-session";

/// Shared storage key holding the heartbeat record.
pub const HEARTBEAT_KEY: &str = "framebridge.session.heartbeat";

/// Control action: the session frame finished booting.
pub const ACTION_READY: &str = "ready";

/// Control action: ask a running session frame to announce readiness again.
pub const ACTION_PING: &str = "ping";

/// No reply arrived before the request deadline.
pub const ERROR_TIMEOUT: &str = "timeout";

/// A reply arrived but its payload failed validation.
pub const ERROR_INVALID_DATA: &str = "invalid_data";

/// The receiving zone has no handler for the requested action.
pub const ERROR_ACTION_NOT_FOUND: &str = "action_not_found";

/// The handler finished without replying.
pub const ERROR_NO_REPLY: &str = "no_reply";

/// The session frame could not be created or reached.
pub const ERROR_SESSION_UNAVAILABLE: &str = "session_unavailable";

/// The request could not be posted to its destination window.
pub const ERROR_SEND_FAILED: &str = "send_failed";

/// Longest accepted action name.
pub const MAX_ACTION_LEN: usize = 128;

/// Longest accepted correlation id.
pub const MAX_UUID_LEN: usize = 64;

/// Returns true for actions reserved by the protocol itself.
pub fn is_control_action(action: &str) -> bool {
    matches!(action, ACTION_READY | ACTION_PING)
}

/// Returns true for error codes produced by the protocol layer rather than
/// by an application handler.
pub fn is_protocol_error(code: &str) -> bool {
    matches!(
        code,
        ERROR_TIMEOUT
            | ERROR_INVALID_DATA
            | ERROR_ACTION_NOT_FOUND
            | ERROR_NO_REPLY
            | ERROR_SESSION_UNAVAILABLE
            | ERROR_SEND_FAILED
    )
}
