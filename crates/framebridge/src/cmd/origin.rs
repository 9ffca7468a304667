use framebridge_envelope::SESSION_FRAME_PATH;
use framebridge_peer::ZoneConfig;
use framebridge_transport::{session_origin, Origin};
use serde::Serialize;

use crate::cmd::OriginArgs;
use crate::exit::{peer_error, transport_error, CliResult, FAILURE, SUCCESS};
use crate::output::{print_record, OutputFormat};

#[derive(Debug, Serialize)]
struct SenderVerdict {
    origin: String,
    /// Accepted by page zones (must be the session domain).
    page_zone: bool,
    /// Accepted by the session frame (must be the page origin).
    session_zone: bool,
}

#[derive(Debug, Serialize)]
struct OriginReport {
    page_origin: String,
    session_origin: String,
    frame_src: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    senders: Vec<SenderVerdict>,
}

/// Exits with [`FAILURE`] when some sender is rejected by both zones.
pub fn run(args: OriginArgs, format: OutputFormat) -> CliResult<i32> {
    let page = Origin::parse(&args.page_origin)
        .map_err(|err| transport_error("invalid page origin", err))?;
    let session = session_origin(&page.to_string(), &args.subdomain)
        .map_err(|err| transport_error("cannot derive session origin", err))?;

    let mut page_zone = ZoneConfig::page(page.to_string());
    page_zone.subdomain = args.subdomain.clone();
    let page_rule = page_zone
        .origin_rule()
        .map_err(|err| peer_error("page zone", err))?;
    let session_rule = ZoneConfig::session(page.to_string())
        .origin_rule()
        .map_err(|err| peer_error("session zone", err))?;

    let senders: Vec<SenderVerdict> = args
        .senders
        .iter()
        .map(|sender| SenderVerdict {
            origin: sender.clone(),
            page_zone: page_rule.allows(sender),
            session_zone: session_rule.allows(sender),
        })
        .collect();
    let rejected = senders
        .iter()
        .any(|verdict| !verdict.page_zone && !verdict.session_zone);

    print_record(
        &OriginReport {
            page_origin: page.to_string(),
            frame_src: format!("{session}{SESSION_FRAME_PATH}"),
            session_origin: session.to_string(),
            senders,
        },
        format,
    );
    Ok(if rejected { FAILURE } else { SUCCESS })
}
