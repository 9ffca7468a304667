use framebridge_envelope::{encode, Envelope, Request, MAX_ACTION_LEN};
use framebridge_transport::{Clock, SystemClock};
use serde::Serialize;

use crate::cmd::{duration_ms, parse_duration, parse_payload, RequestArgs};
use crate::exit::{envelope_error, CliError, CliResult, SUCCESS};
use crate::output::{print_record, OutputFormat};

#[derive(Serialize)]
struct EncodedRequest<'a> {
    request_uuid: &'a str,
    action: &'a str,
    deadline_ms: u64,
    envelope: String,
}

pub fn run(args: RequestArgs, format: OutputFormat) -> CliResult<i32> {
    if args.action.is_empty() || args.action.len() > MAX_ACTION_LEN {
        return Err(CliError::usage(format!(
            "action must be 1..={MAX_ACTION_LEN} bytes"
        )));
    }
    let data = parse_payload("--data", args.data.as_deref())?;
    let request = match args.deadline {
        Some(deadline) => Request::with_deadline(&args.action, data, deadline),
        None => {
            let timeout = parse_duration(&args.timeout)?;
            Request::new(
                &args.action,
                data,
                SystemClock.now_ms(),
                duration_ms(timeout),
            )
        }
    }
    .testing(args.testing);

    let envelope = encode(&Envelope::Request(request.clone()))
        .map_err(|err| envelope_error("encode failed", err))?;
    print_record(
        &EncodedRequest {
            request_uuid: &request.request_uuid,
            action: &request.action,
            deadline_ms: request.deadline_ms,
            envelope,
        },
        format,
    );
    Ok(SUCCESS)
}
