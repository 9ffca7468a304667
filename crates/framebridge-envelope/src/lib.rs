//! Correlated JSON message envelopes for cross-frame RPC.
//!
//! Every message between zones is one JSON object:
//! - requests carry `action`, `request_data`, a fresh `request_uuid` and an
//!   absolute `timeout` deadline in epoch milliseconds
//! - replies carry `response_data`, the `request_uuid` they answer, and their
//!   own `response_uuid` for tracing
//!
//! Decoding classifies the message into a tagged [`Envelope`] so nothing
//! downstream re-inspects raw fields.

pub mod codec;
pub mod error;
pub mod heartbeat;
pub mod protocol;
pub mod reader;
pub mod writer;

pub use codec::{
    decode, decode_with_config, encode, encode_with_config, Envelope, EnvelopeConfig, Payload,
    Reply, ReplyBody, Request, DEFAULT_MAX_ENVELOPE,
};
pub use error::{EnvelopeError, Result};
pub use heartbeat::HeartbeatRecord;
pub use protocol::{
    is_control_action, is_protocol_error, ACTION_PING, ACTION_READY, DEFAULT_SESSION_SUBDOMAIN,
    ERROR_ACTION_NOT_FOUND, ERROR_INVALID_DATA, ERROR_NO_REPLY, ERROR_SEND_FAILED,
    ERROR_SESSION_UNAVAILABLE, ERROR_TIMEOUT, HEARTBEAT_KEY, MAX_ACTION_LEN, MAX_UUID_LEN, PROTOCOL_VERSION,
    SESSION_FRAME_NAME, SESSION_FRAME_PATH,
};
pub use reader::{EnvelopeReader, OriginRule};
pub use writer::EnvelopeWriter;
