//! Reserved `ready` and `ping` actions shared by every zone.
//!
//! The session frame sends `ready` to its parent once it has booted. A tab
//! reusing a frame it did not create sends `ping`; the frame answers and
//! then sends `ready` to that tab as well.

use framebridge_envelope::{Payload, ACTION_PING, ACTION_READY};
use framebridge_schema::{AcceptAll, ValidatorRegistry};
use tracing::{debug, warn};

use crate::error::RequestError;
use crate::inbound::{ActionHandler, HandlerContext, HandlerTable};
use crate::outbound::OutboundDispatcher;
use crate::session::SessionCoordinator;

/// Accept any payload for replies to control actions.
pub fn register_control_validators(validators: &mut ValidatorRegistry) {
    validators.register(ACTION_READY, AcceptAll);
    validators.register(ACTION_PING, AcceptAll);
}

/// Page side of `ready`: the session frame is up, flush queued requests.
pub fn ready_handler(
    coordinator: SessionCoordinator,
    outbound: OutboundDispatcher,
) -> impl ActionHandler {
    move |_data: Payload, ctx: HandlerContext| {
        debug!(origin = %ctx.caller_origin(), "session frame announced readiness");
        let failed = match ctx.source() {
            Some(source) => coordinator.mark_ready(source.as_ref()),
            None => Vec::new(),
        };
        ctx.reply_success(Payload::new());
        if !failed.is_empty() {
            outbound.fail_requests(
                failed,
                RequestError::Send("queued request could not be posted".to_string()),
            );
        }
    }
}

/// Session side of `ping`: answer, then announce readiness to the caller.
pub fn ping_handler(outbound: OutboundDispatcher) -> impl ActionHandler {
    move |_data: Payload, ctx: HandlerContext| {
        let caller = ctx.caller_writer();
        ctx.reply_success(Payload::new());
        let Some(caller) = caller else {
            return;
        };
        outbound.send_via(caller, ACTION_READY, Payload::new(), |outcome| {
            if let Err(err) = outcome {
                warn!(error = %err, "readiness announcement to pinging tab failed");
            }
        });
    }
}

pub fn register_page_controls(
    handlers: &mut HandlerTable,
    coordinator: &SessionCoordinator,
    outbound: &OutboundDispatcher,
) {
    handlers.register(
        ACTION_READY,
        ready_handler(coordinator.clone(), outbound.clone()),
    );
}

pub fn register_session_controls(handlers: &mut HandlerTable, outbound: &OutboundDispatcher) {
    handlers.register(ACTION_PING, ping_handler(outbound.clone()));
}

/// Tell the parent page that the session frame has booted.
pub fn announce_ready(outbound: &OutboundDispatcher) -> Option<String> {
    outbound.send(ACTION_READY, Payload::new(), |outcome| {
        if let Err(err) = outcome {
            warn!(error = %err, "readiness announcement failed");
        }
    })
}
