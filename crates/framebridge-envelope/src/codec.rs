use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{EnvelopeError, Result};
use crate::protocol::{MAX_ACTION_LEN, MAX_UUID_LEN, PROTOCOL_VERSION};

/// Default maximum encoded envelope size: 4 MiB.
pub const DEFAULT_MAX_ENVELOPE: usize = 4 * 1024 * 1024;

/// JSON object payload carried by requests and replies.
pub type Payload = Map<String, Value>;

/// A decoded message.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Request(Request),
    Reply(Reply),
}

impl Envelope {
    /// The correlation key shared by a request and its reply.
    pub fn request_uuid(&self) -> &str {
        match self {
            Envelope::Request(request) => &request.request_uuid,
            Envelope::Reply(reply) => &reply.request_uuid,
        }
    }
}

impl From<Request> for Envelope {
    fn from(request: Request) -> Self {
        Envelope::Request(request)
    }
}

impl From<Reply> for Envelope {
    fn from(reply: Reply) -> Self {
        Envelope::Reply(reply)
    }
}

/// A call into another zone.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub version: u32,
    pub action: String,
    pub data: Payload,
    pub request_uuid: String,
    /// Absolute deadline in epoch milliseconds.
    pub deadline_ms: u64,
    pub testing: bool,
}

impl Request {
    /// Build a request with a fresh correlation id and an absolute deadline
    /// of `now_ms + timeout_ms`.
    pub fn new(action: impl Into<String>, data: Payload, now_ms: u64, timeout_ms: u64) -> Self {
        Self::with_deadline(action, data, now_ms.saturating_add(timeout_ms))
    }

    /// Build a request with a fresh correlation id and an explicit deadline.
    pub fn with_deadline(action: impl Into<String>, data: Payload, deadline_ms: u64) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            action: action.into(),
            data,
            request_uuid: Uuid::new_v4().to_string(),
            deadline_ms,
            testing: false,
        }
    }

    pub fn testing(mut self, testing: bool) -> Self {
        self.testing = testing;
        self
    }

    /// Milliseconds left before the deadline, zero once it has passed.
    pub fn remaining_ms(&self, now_ms: u64) -> u64 {
        self.deadline_ms.saturating_sub(now_ms)
    }
}

/// The answer to a [`Request`].
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub version: u32,
    /// Correlation key copied from the request.
    pub request_uuid: String,
    /// Fresh id for tracing this reply; never used for matching.
    pub response_uuid: String,
    pub body: ReplyBody,
    pub testing: bool,
}

/// Outcome carried by a reply.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyBody {
    Success(Payload),
    Error { code: String, data: Payload },
}

impl Reply {
    /// Successful reply to the request with id `request_uuid`.
    pub fn success(request_uuid: impl Into<String>, data: Payload) -> Self {
        Self::new(request_uuid.into(), ReplyBody::Success(data))
    }

    /// Error reply to the request with id `request_uuid`.
    pub fn error(request_uuid: impl Into<String>, code: impl Into<String>, data: Payload) -> Self {
        Self::new(
            request_uuid.into(),
            ReplyBody::Error {
                code: code.into(),
                data,
            },
        )
    }

    fn new(request_uuid: String, body: ReplyBody) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            request_uuid,
            response_uuid: Uuid::new_v4().to_string(),
            body,
            testing: false,
        }
    }

    pub fn testing(mut self, testing: bool) -> Self {
        self.testing = testing;
        self
    }

    pub fn is_error(&self) -> bool {
        matches!(self.body, ReplyBody::Error { .. })
    }
}

/// Configuration for the envelope codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeConfig {
    /// Maximum encoded size in bytes. Default: 4 MiB.
    pub max_envelope_size: usize,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            max_envelope_size: DEFAULT_MAX_ENVELOPE,
        }
    }
}

/// Wire representation. Field names are fixed by the protocol.
///
/// ```text
/// request: {"version":1,"action":"..","request_data":{..},"request_uuid":"..","timeout":<epoch-ms>}
/// reply:   {"version":1,"response_data":{..},"request_uuid":"..","response_uuid":".."}
/// error:   response_data = {"error_code":"..","error_data":{..}}
/// ```
#[derive(Debug, Serialize, Deserialize)]
struct WireEnvelope {
    version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    request_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    response_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    request_uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    response_uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "is_false")]
    testing: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

const ERROR_CODE_FIELD: &str = "error_code";
const ERROR_DATA_FIELD: &str = "error_data";

/// Encode an envelope using the default configuration.
pub fn encode(envelope: &Envelope) -> Result<String> {
    encode_with_config(envelope, &EnvelopeConfig::default())
}

/// Encode an envelope into its JSON wire form.
pub fn encode_with_config(envelope: &Envelope, config: &EnvelopeConfig) -> Result<String> {
    let wire = match envelope {
        Envelope::Request(request) => WireEnvelope {
            version: u64::from(request.version),
            action: Some(request.action.clone()),
            request_data: Some(Value::Object(request.data.clone())),
            response_data: None,
            request_uuid: Some(request.request_uuid.clone()),
            response_uuid: None,
            timeout: Some(request.deadline_ms),
            testing: request.testing,
        },
        Envelope::Reply(reply) => {
            let response_data = match &reply.body {
                ReplyBody::Success(data) => Value::Object(data.clone()),
                ReplyBody::Error { code, data } => {
                    let mut body = Map::new();
                    body.insert(ERROR_CODE_FIELD.to_string(), Value::String(code.clone()));
                    body.insert(ERROR_DATA_FIELD.to_string(), Value::Object(data.clone()));
                    Value::Object(body)
                }
            };
            WireEnvelope {
                version: u64::from(reply.version),
                action: None,
                request_data: None,
                response_data: Some(response_data),
                request_uuid: Some(reply.request_uuid.clone()),
                response_uuid: Some(reply.response_uuid.clone()),
                timeout: None,
                testing: reply.testing,
            }
        }
    };

    let encoded = serde_json::to_string(&wire)?;
    if encoded.len() > config.max_envelope_size {
        return Err(EnvelopeError::TooLarge {
            size: encoded.len(),
            max: config.max_envelope_size,
        });
    }
    Ok(encoded)
}

/// Decode an envelope using the default configuration.
pub fn decode(raw: &str) -> Result<Envelope> {
    decode_with_config(raw, &EnvelopeConfig::default())
}

/// Decode and classify a raw posted string.
///
/// Never panics on hostile input: every failure is reported as an
/// [`EnvelopeError`] the caller can log.
pub fn decode_with_config(raw: &str, config: &EnvelopeConfig) -> Result<Envelope> {
    if raw.len() > config.max_envelope_size {
        return Err(EnvelopeError::TooLarge {
            size: raw.len(),
            max: config.max_envelope_size,
        });
    }

    let value: Value = serde_json::from_str(raw)?;
    if !value.is_object() {
        return Err(EnvelopeError::NotAnObject);
    }
    let wire: WireEnvelope = serde_json::from_value(value)?;

    if wire.version != u64::from(PROTOCOL_VERSION) {
        return Err(EnvelopeError::UnsupportedVersion {
            found: wire.version,
            expected: PROTOCOL_VERSION,
        });
    }
    let version = PROTOCOL_VERSION;

    if wire.action.is_some() && wire.response_uuid.is_some() {
        return Err(EnvelopeError::Ambiguous);
    }

    if let Some(action) = wire.action {
        validate_action(&action)?;
        let request_uuid = wire
            .request_uuid
            .ok_or(EnvelopeError::MissingField("request_uuid"))?;
        validate_uuid("request_uuid", &request_uuid)?;
        let data = require_object("request_data", wire.request_data)?;
        let deadline_ms = wire.timeout.ok_or(EnvelopeError::MissingField("timeout"))?;

        return Ok(Envelope::Request(Request {
            version,
            action,
            data,
            request_uuid,
            deadline_ms,
            testing: wire.testing,
        }));
    }

    if wire.response_uuid.is_none() && wire.response_data.is_none() {
        return Err(EnvelopeError::MissingField("action"));
    }

    let request_uuid = match (wire.request_uuid, wire.response_uuid.as_ref()) {
        (Some(request_uuid), _) => request_uuid,
        (None, Some(response_uuid)) => {
            return Err(EnvelopeError::Uncorrelated {
                response_uuid: response_uuid.clone(),
            })
        }
        (None, None) => return Err(EnvelopeError::MissingField("request_uuid")),
    };
    validate_uuid("request_uuid", &request_uuid)?;
    let response_uuid = wire
        .response_uuid
        .ok_or(EnvelopeError::MissingField("response_uuid"))?;
    validate_uuid("response_uuid", &response_uuid)?;
    let data = require_object("response_data", wire.response_data)?;

    Ok(Envelope::Reply(Reply {
        version,
        request_uuid,
        response_uuid,
        body: classify_reply_body(data)?,
        testing: wire.testing,
    }))
}

fn classify_reply_body(mut data: Payload) -> Result<ReplyBody> {
    let code = match data.get(ERROR_CODE_FIELD) {
        None => return Ok(ReplyBody::Success(data)),
        Some(Value::String(code)) => code.clone(),
        Some(_) => {
            return Err(EnvelopeError::InvalidField {
                field: "response_data.error_code",
                reason: "expected a string".to_string(),
            })
        }
    };

    let error_data = match data.remove(ERROR_DATA_FIELD) {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map,
        Some(_) => {
            return Err(EnvelopeError::InvalidField {
                field: "response_data.error_data",
                reason: "expected an object".to_string(),
            })
        }
    };

    Ok(ReplyBody::Error {
        code,
        data: error_data,
    })
}

fn require_object(field: &'static str, value: Option<Value>) -> Result<Payload> {
    match value {
        Some(Value::Object(map)) => Ok(map),
        Some(other) => Err(EnvelopeError::InvalidField {
            field,
            reason: format!("expected an object, got {}", json_kind(&other)),
        }),
        None => Err(EnvelopeError::MissingField(field)),
    }
}

fn validate_action(action: &str) -> Result<()> {
    if action.is_empty() || action.len() > MAX_ACTION_LEN {
        return Err(EnvelopeError::InvalidField {
            field: "action",
            reason: format!("invalid length {}", action.len()),
        });
    }
    Ok(())
}

fn validate_uuid(field: &'static str, id: &str) -> Result<()> {
    if id.is_empty() || id.len() > MAX_UUID_LEN {
        return Err(EnvelopeError::InvalidField {
            field,
            reason: format!("invalid length {}", id.len()),
        });
    }
    Ok(())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::protocol::ERROR_TIMEOUT;

    fn payload(value: Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn request_roundtrip_preserves_every_field() {
        let request = Request::new(
            "FetchPage",
            payload(json!({"page": 2, "filters": ["a", "b"]})),
            1_000,
            30_000,
        )
        .testing(true);
        let envelope = Envelope::Request(request.clone());

        let decoded = decode(&encode(&envelope).unwrap()).unwrap();
        assert_eq!(decoded, envelope);
        assert_eq!(request.deadline_ms, 31_000);
    }

    #[test]
    fn reply_roundtrips_for_success_and_error() {
        let ok = Envelope::Reply(Reply::success("req-1", payload(json!({"x": 1}))));
        assert_eq!(decode(&encode(&ok).unwrap()).unwrap(), ok);

        let err = Envelope::Reply(Reply::error(
            "req-1",
            "permission_denied",
            payload(json!({"reason": "nope"})),
        ));
        assert_eq!(decode(&encode(&err).unwrap()).unwrap(), err);
    }

    #[test]
    fn request_wire_uses_protocol_field_names() {
        let request = Request::new("Ping", Map::new(), 10, 5);
        let wire: Value =
            serde_json::from_str(&encode(&Envelope::Request(request.clone())).unwrap()).unwrap();

        assert_eq!(wire["version"], 1);
        assert_eq!(wire["action"], "Ping");
        assert_eq!(wire["request_data"], json!({}));
        assert_eq!(wire["request_uuid"], request.request_uuid.as_str());
        assert_eq!(wire["timeout"], 15);
        assert!(wire.get("testing").is_none());
        assert!(wire.get("response_uuid").is_none());
    }

    #[test]
    fn error_reply_wire_shape() {
        let reply = Reply::error("req-9", ERROR_TIMEOUT, Map::new());
        let wire: Value = serde_json::from_str(&encode(&Envelope::Reply(reply)).unwrap()).unwrap();
        assert_eq!(wire["response_data"]["error_code"], "timeout");
        assert_eq!(wire["response_data"]["error_data"], json!({}));
        assert_eq!(wire["request_uuid"], "req-9");
        assert!(wire.get("action").is_none());
    }

    #[test]
    fn fresh_ids_per_request_and_reply() {
        let first = Request::new("A", Map::new(), 0, 1);
        let second = Request::new("A", Map::new(), 0, 1);
        assert_ne!(first.request_uuid, second.request_uuid);

        let reply = Reply::success(first.request_uuid.clone(), Map::new());
        assert_eq!(reply.request_uuid, first.request_uuid);
        assert_ne!(reply.response_uuid, first.request_uuid);
    }

    #[test]
    fn rejects_non_json_and_non_objects() {
        assert!(matches!(
            decode("{not json"),
            Err(EnvelopeError::InvalidJson(_))
        ));
        assert!(matches!(decode("[1,2]"), Err(EnvelopeError::NotAnObject)));
        assert!(matches!(decode("\"x\""), Err(EnvelopeError::NotAnObject)));
    }

    #[test]
    fn rejects_unknown_version() {
        let raw = r#"{"version":7,"action":"A","request_data":{},"request_uuid":"r","timeout":1}"#;
        assert!(matches!(
            decode(raw),
            Err(EnvelopeError::UnsupportedVersion { found: 7, .. })
        ));
    }

    #[test]
    fn request_requires_uuid_object_data_and_timeout() {
        let no_uuid = r#"{"version":1,"action":"A","request_data":{},"timeout":1}"#;
        assert!(matches!(
            decode(no_uuid),
            Err(EnvelopeError::MissingField("request_uuid"))
        ));

        let array_data = r#"{"version":1,"action":"A","request_data":[],"request_uuid":"r","timeout":1}"#;
        assert!(matches!(
            decode(array_data),
            Err(EnvelopeError::InvalidField {
                field: "request_data",
                ..
            })
        ));

        let no_timeout = r#"{"version":1,"action":"A","request_data":{},"request_uuid":"r"}"#;
        assert!(matches!(
            decode(no_timeout),
            Err(EnvelopeError::MissingField("timeout"))
        ));
    }

    #[test]
    fn reply_correlation_field_rules() {
        let neither = r#"{"version":1,"response_data":{}}"#;
        assert!(matches!(
            decode(neither),
            Err(EnvelopeError::MissingField("request_uuid"))
        ));

        let only_response = r#"{"version":1,"response_data":{},"response_uuid":"resp-1"}"#;
        match decode(only_response) {
            Err(EnvelopeError::Uncorrelated { response_uuid }) => {
                assert_eq!(response_uuid, "resp-1")
            }
            other => panic!("expected uncorrelated error, got {other:?}"),
        }

        let no_data = r#"{"version":1,"request_uuid":"r","response_uuid":"s"}"#;
        assert!(matches!(
            decode(no_data),
            Err(EnvelopeError::MissingField("response_data"))
        ));
    }

    #[test]
    fn rejects_ambiguous_and_empty_envelopes() {
        let both = r#"{"version":1,"action":"A","request_data":{},"request_uuid":"r","response_uuid":"s","timeout":1}"#;
        assert!(matches!(decode(both), Err(EnvelopeError::Ambiguous)));

        let empty = r#"{"version":1,"request_uuid":"r"}"#;
        assert!(matches!(
            decode(empty),
            Err(EnvelopeError::MissingField("action"))
        ));
    }

    #[test]
    fn rejects_bad_error_code_type() {
        let raw = r#"{"version":1,"request_uuid":"r","response_uuid":"s","response_data":{"error_code":5}}"#;
        assert!(matches!(
            decode(raw),
            Err(EnvelopeError::InvalidField {
                field: "response_data.error_code",
                ..
            })
        ));
    }

    #[test]
    fn error_reply_without_error_data_decodes_empty() {
        let raw = r#"{"version":1,"request_uuid":"r","response_uuid":"s","response_data":{"error_code":"gone"}}"#;
        let envelope = decode(raw).unwrap();
        match envelope {
            Envelope::Reply(reply) => assert_eq!(
                reply.body,
                ReplyBody::Error {
                    code: "gone".to_string(),
                    data: Map::new()
                }
            ),
            other => panic!("expected reply, got {other:?}"),
        }
    }

    #[test]
    fn size_limit_applies_both_ways() {
        let config = EnvelopeConfig {
            max_envelope_size: 64,
        };
        let big = Request::new("A", payload(json!({"blob": "x".repeat(128)})), 0, 1);
        assert!(matches!(
            encode_with_config(&Envelope::Request(big), &config),
            Err(EnvelopeError::TooLarge { .. })
        ));
        assert!(matches!(
            decode_with_config(&" ".repeat(65), &config),
            Err(EnvelopeError::TooLarge { size: 65, max: 64 })
        ));
    }

    #[test]
    fn remaining_budget_saturates() {
        let request = Request::with_deadline("A", Map::new(), 100);
        assert_eq!(request.remaining_ms(40), 60);
        assert_eq!(request.remaining_ms(400), 0);
    }
}
