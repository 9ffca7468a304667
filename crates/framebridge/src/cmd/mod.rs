use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use framebridge_envelope::{Payload, DEFAULT_SESSION_SUBDOMAIN};
use serde_json::Value;

use crate::exit::{io_error, CliError, CliResult};
use crate::output::OutputFormat;

pub mod check;
pub mod decode;
pub mod heartbeat;
pub mod origin;
pub mod reply;
pub mod request;
pub mod simulate;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Classify and print a wire envelope.
    Decode(DecodeArgs),
    /// Encode a request envelope.
    Request(RequestArgs),
    /// Encode a reply envelope.
    Reply(ReplyArgs),
    /// Derive the session origin and test sender origins against each zone.
    Origin(OriginArgs),
    /// Run a type-check assertion against a JSON value.
    Check(CheckArgs),
    /// Evaluate a heartbeat record for freshness.
    Heartbeat(HeartbeatArgs),
    /// Run an in-memory multi-tab session and report what happened.
    Simulate(SimulateArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Decode(args) => decode::run(args, format),
        Command::Request(args) => request::run(args, format),
        Command::Reply(args) => reply::run(args, format),
        Command::Origin(args) => origin::run(args, format),
        Command::Check(args) => check::run(args, format),
        Command::Heartbeat(args) => heartbeat::run(args, format),
        Command::Simulate(args) => simulate::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Envelope JSON. Read from stdin when neither this nor --file is given.
    #[arg(conflicts_with = "file")]
    pub envelope: Option<String>,
    /// Read the envelope from a file.
    #[arg(long, value_name = "PATH")]
    pub file: Option<PathBuf>,
    /// Maximum accepted envelope size in bytes.
    #[arg(long, value_name = "BYTES")]
    pub max_size: Option<usize>,
}

#[derive(Args, Debug)]
pub struct RequestArgs {
    /// Action name.
    pub action: String,
    /// Request data as a JSON object.
    #[arg(long, value_name = "JSON")]
    pub data: Option<String>,
    /// Time until the deadline (e.g. 30s, 500ms).
    #[arg(long, env = "FRAMEBRIDGE_TIMEOUT", default_value = "30s")]
    pub timeout: String,
    /// Absolute deadline in epoch-ms; overrides --timeout.
    #[arg(long, value_name = "EPOCH_MS")]
    pub deadline: Option<u64>,
    /// Mark the request as test traffic.
    #[arg(long)]
    pub testing: bool,
}

#[derive(Args, Debug)]
pub struct ReplyArgs {
    /// Id of the request being answered.
    pub request_uuid: String,
    /// Response data (or error data with --error) as a JSON object.
    #[arg(long, value_name = "JSON")]
    pub data: Option<String>,
    /// Send an error reply with this code.
    #[arg(long, value_name = "CODE")]
    pub error: Option<String>,
    /// Mark the reply as test traffic.
    #[arg(long)]
    pub testing: bool,
}

#[derive(Args, Debug)]
pub struct OriginArgs {
    /// Origin (or any URL) of the visible page.
    pub page_origin: String,
    /// Subdomain label of the session domain.
    #[arg(long, env = "FRAMEBRIDGE_SUBDOMAIN", default_value = DEFAULT_SESSION_SUBDOMAIN)]
    pub subdomain: String,
    /// Sender origins to test against every zone.
    #[arg(long = "sender", value_name = "ORIGIN")]
    pub senders: Vec<String>,
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Type expression, e.g. `string|null` or `uint`.
    pub expr: String,
    /// JSON value to check. Omit to check an absent value.
    pub value: Option<String>,
    /// Label reported with failures.
    #[arg(long, default_value = "cli")]
    pub label: String,
}

#[derive(Args, Debug)]
pub struct HeartbeatArgs {
    /// Stored record, e.g. `{"time":1700000000000}`. Omit when nothing is stored.
    pub record: Option<String>,
    /// Evaluation time in epoch-ms. Default: now.
    #[arg(long, value_name = "EPOCH_MS")]
    pub now: Option<u64>,
    /// Heartbeat rewrite interval.
    #[arg(long, default_value = "1s")]
    pub interval: String,
    /// Extra age tolerated before the owner is presumed gone.
    #[arg(long, default_value = "2s")]
    pub overlap: String,
}

#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Page origin the tabs are served from.
    #[arg(long, default_value = "https://example.org")]
    pub page_origin: String,
    /// Subdomain label of the session domain.
    #[arg(long, env = "FRAMEBRIDGE_SUBDOMAIN", default_value = DEFAULT_SESSION_SUBDOMAIN)]
    pub subdomain: String,
    /// Number of tabs to open.
    #[arg(long, default_value_t = 2)]
    pub tabs: usize,
    /// Requests each tab sends per round.
    #[arg(long, default_value_t = 1)]
    pub requests: usize,
    /// Crash the owning tab after the first round, then send a second round
    /// from a newly opened tab.
    #[arg(long)]
    pub crash_owner: bool,
    /// Like --crash-owner, but the owner unloads cleanly.
    #[arg(long, conflicts_with = "crash_owner")]
    pub unload_owner: bool,
    /// Simulated time between rounds.
    #[arg(long, default_value = "500ms")]
    pub pause: String,
    /// Request timeout.
    #[arg(long, env = "FRAMEBRIDGE_TIMEOUT", default_value = "30s")]
    pub timeout: String,
    /// Print one row per request instead of the summary.
    #[arg(long)]
    pub requests_detail: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse `500ms`, `5s`, `2m` or a bare number of seconds.
pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::usage("duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else if let Some(num) = input.strip_suffix('m') {
        (num, "m")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .trim()
        .parse()
        .map_err(|_| CliError::usage(format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::usage("duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => value
            .checked_mul(60)
            .map(Duration::from_secs)
            .ok_or_else(|| CliError::usage(format!("duration too large: {input}"))),
        _ => Err(CliError::usage(format!("unsupported duration unit: {unit}"))),
    }
}

pub fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Parse an optional JSON object argument; absent means `{}`.
pub fn parse_payload(flag: &str, input: Option<&str>) -> CliResult<Payload> {
    let Some(input) = input else {
        return Ok(Payload::new());
    };
    match serde_json::from_str::<Value>(input) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(CliError::usage(format!("{flag} must be a JSON object"))),
        Err(err) => Err(CliError::usage(format!("{flag} is not valid JSON: {err}"))),
    }
}

/// Inline argument, else file, else stdin.
pub fn read_input(inline: Option<&str>, file: Option<&PathBuf>) -> CliResult<String> {
    if let Some(inline) = inline {
        return Ok(inline.to_string());
    }
    if let Some(path) = file {
        return fs::read_to_string(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err));
    }
    let mut buffer = String::new();
    std::io::stdin()
        .read_to_string(&mut buffer)
        .map_err(|err| io_error("failed reading stdin", err))?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn payload_must_be_an_object() {
        assert!(parse_payload("--data", None).unwrap().is_empty());
        assert_eq!(parse_payload("--data", Some(r#"{"a":1}"#)).unwrap().len(), 1);
        let err = parse_payload("--data", Some("[1]")).unwrap_err();
        assert_eq!(err.code, crate::exit::USAGE);
        assert!(parse_payload("--data", Some("{")).is_err());
    }
}
