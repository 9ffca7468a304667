use framebridge_envelope::{
    decode_with_config, is_protocol_error, Envelope, EnvelopeConfig, Payload, ReplyBody,
};
use framebridge_transport::{Clock, SystemClock};
use serde::Serialize;

use crate::cmd::{read_input, DecodeArgs};
use crate::exit::{envelope_error, CliResult, SUCCESS};
use crate::output::{print_record, OutputFormat};

#[derive(Debug, Serialize, PartialEq)]
pub struct DecodedEnvelope {
    pub kind: &'static str,
    pub request_uuid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_uuid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Whether the error code is one the protocol itself produces.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol_error: Option<bool>,
    pub testing: bool,
    pub data: Payload,
}

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let raw = read_input(args.envelope.as_deref(), args.file.as_ref())?;
    let mut config = EnvelopeConfig::default();
    if let Some(max) = args.max_size {
        config.max_envelope_size = max;
    }
    let envelope =
        decode_with_config(raw.trim(), &config).map_err(|err| envelope_error("decode failed", err))?;
    print_record(&describe(envelope, SystemClock.now_ms()), format);
    Ok(SUCCESS)
}

pub fn describe(envelope: Envelope, now_ms: u64) -> DecodedEnvelope {
    match envelope {
        Envelope::Request(request) => DecodedEnvelope {
            kind: "request",
            remaining_ms: Some(request.remaining_ms(now_ms)),
            request_uuid: request.request_uuid,
            action: Some(request.action),
            response_uuid: None,
            deadline_ms: Some(request.deadline_ms),
            error_code: None,
            protocol_error: None,
            testing: request.testing,
            data: request.data,
        },
        Envelope::Reply(reply) => {
            let (kind, error_code, data) = match reply.body {
                ReplyBody::Success(data) => ("reply", None, data),
                ReplyBody::Error { code, data } => ("error", Some(code), data),
            };
            DecodedEnvelope {
                kind,
                request_uuid: reply.request_uuid,
                action: None,
                response_uuid: Some(reply.response_uuid),
                deadline_ms: None,
                remaining_ms: None,
                protocol_error: error_code.as_deref().map(is_protocol_error),
                error_code,
                testing: reply.testing,
                data,
            }
        }
    }
}
