use framebridge_envelope::{encode, Envelope, Reply, MAX_UUID_LEN};
use serde::Serialize;

use crate::cmd::{parse_payload, ReplyArgs};
use crate::exit::{envelope_error, CliError, CliResult, SUCCESS};
use crate::output::{print_record, OutputFormat};

#[derive(Serialize)]
struct EncodedReply<'a> {
    request_uuid: &'a str,
    response_uuid: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_code: Option<&'a str>,
    envelope: String,
}

pub fn run(args: ReplyArgs, format: OutputFormat) -> CliResult<i32> {
    if args.request_uuid.is_empty() || args.request_uuid.len() > MAX_UUID_LEN {
        return Err(CliError::usage(format!(
            "request uuid must be 1..={MAX_UUID_LEN} bytes"
        )));
    }
    let data = parse_payload("--data", args.data.as_deref())?;
    let reply = match args.error.as_deref() {
        Some("") => return Err(CliError::usage("--error code must not be empty")),
        Some(code) => Reply::error(&args.request_uuid, code, data),
        None => Reply::success(&args.request_uuid, data),
    }
    .testing(args.testing);

    let envelope = encode(&Envelope::Reply(reply.clone()))
        .map_err(|err| envelope_error("encode failed", err))?;
    print_record(
        &EncodedReply {
            request_uuid: &reply.request_uuid,
            response_uuid: &reply.response_uuid,
            error_code: args.error.as_deref(),
            envelope,
        },
        format,
    );
    Ok(SUCCESS)
}
