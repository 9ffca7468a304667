//! Inbound message dispatch for one zone.
//!
//! Every posted message passes the zone's origin gate before it is parsed.
//! Requests are routed to the handler registered for their action; replies
//! are handed to the zone's outbound dispatcher for correlation.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use framebridge_envelope::{
    Envelope, EnvelopeConfig, EnvelopeError, EnvelopeReader, EnvelopeWriter, OriginRule, Payload,
    Reply, DEFAULT_SESSION_SUBDOMAIN, ERROR_ACTION_NOT_FOUND, ERROR_NO_REPLY,
};
use framebridge_transport::{session_origin, ClockHandle, MessageEvent, Origin, PortHandle};
use serde_json::Value;
use tracing::{debug, error, trace, warn};

use crate::error::{PeerError, Result};
use crate::outbound::OutboundDispatcher;

/// Which senders a zone accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginPolicy {
    /// Only the session domain derived from the base origin. Used by pages.
    SessionDomain,
    /// Only the base origin itself. Used by the session frame, whose clients
    /// are pages of the base origin.
    Client,
    /// Any sender.
    Public,
}

/// Configuration for an inbound dispatcher.
#[derive(Debug, Clone)]
pub struct ZoneConfig {
    /// Zone name used in logs.
    pub name: String,
    /// Page origin the expected sender origin is derived from.
    pub base_origin: String,
    pub policy: OriginPolicy,
    /// Subdomain label of the session domain.
    pub subdomain: String,
    /// Subtracted from an inbound deadline before handlers see it, leaving
    /// time for the reply to travel back.
    pub deadline_margin: Duration,
    pub envelope: EnvelopeConfig,
}

impl ZoneConfig {
    /// A page zone: accepts messages from its session domain only.
    pub fn page(page_origin: impl Into<String>) -> Self {
        Self {
            name: "page".to_string(),
            base_origin: page_origin.into(),
            policy: OriginPolicy::SessionDomain,
            ..Self::default()
        }
    }

    /// The session zone: accepts messages from pages of `page_origin` only.
    pub fn session(page_origin: impl Into<String>) -> Self {
        Self {
            name: "session".to_string(),
            base_origin: page_origin.into(),
            policy: OriginPolicy::Client,
            ..Self::default()
        }
    }

    /// A public zone accepting any sender.
    pub fn public(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            policy: OriginPolicy::Public,
            ..Self::default()
        }
    }

    /// Origin rule for this zone, derived from the base origin each call.
    pub fn origin_rule(&self) -> Result<OriginRule> {
        let rule = match self.policy {
            OriginPolicy::SessionDomain => {
                OriginRule::Exact(session_origin(&self.base_origin, &self.subdomain)?)
            }
            OriginPolicy::Client => OriginRule::Exact(Origin::parse(&self.base_origin)?),
            OriginPolicy::Public => OriginRule::Any,
        };
        Ok(rule)
    }
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            name: "zone".to_string(),
            base_origin: String::new(),
            policy: OriginPolicy::SessionDomain,
            subdomain: DEFAULT_SESSION_SUBDOMAIN.to_string(),
            deadline_margin: Duration::from_millis(250),
            envelope: EnvelopeConfig::default(),
        }
    }
}

/// Handles one request action.
///
/// The handler must eventually answer through `ctx`; a context dropped
/// without an answer replies `no_reply`.
pub trait ActionHandler {
    fn handle(&self, data: Payload, ctx: HandlerContext);
}

impl<F> ActionHandler for F
where
    F: Fn(Payload, HandlerContext),
{
    fn handle(&self, data: Payload, ctx: HandlerContext) {
        self(data, ctx)
    }
}

/// Action-keyed handlers of one zone.
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: HashMap<String, Rc<dyn ActionHandler>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, action: impl Into<String>, handler: impl ActionHandler + 'static) {
        self.handlers.insert(action.into(), Rc::new(handler));
    }

    pub fn get(&self, action: &str) -> Option<Rc<dyn ActionHandler>> {
        self.handlers.get(action).cloned()
    }

    pub fn contains(&self, action: &str) -> bool {
        self.handlers.contains_key(action)
    }

    /// Registered action names, sorted.
    pub fn actions(&self) -> Vec<&str> {
        let mut actions: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        actions.sort_unstable();
        actions
    }
}

impl fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerTable")
            .field("actions", &self.actions())
            .finish()
    }
}

/// A handler's view of the request it is serving.
pub struct HandlerContext {
    zone: String,
    action: String,
    request_uuid: String,
    caller_origin: String,
    deadline_ms: u64,
    testing: bool,
    writer: Option<EnvelopeWriter>,
}

impl HandlerContext {
    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn request_uuid(&self) -> &str {
        &self.request_uuid
    }

    /// Origin of the window that sent the request.
    pub fn caller_origin(&self) -> &str {
        &self.caller_origin
    }

    /// Deadline in epoch-ms, already reduced by the zone's safety margin.
    /// Forward it with `send_within` when calling further zones.
    pub fn deadline(&self) -> u64 {
        self.deadline_ms
    }

    pub fn is_testing(&self) -> bool {
        self.testing
    }

    /// Port back to the caller.
    pub fn source(&self) -> Option<PortHandle> {
        self.writer.as_ref().map(|writer| writer.port().clone())
    }

    /// Writer addressed to the caller, for sending it requests of our own.
    pub fn caller_writer(&self) -> Option<EnvelopeWriter> {
        self.writer.clone()
    }

    pub fn reply_success(mut self, data: Payload) {
        let reply = Reply::success(self.request_uuid.clone(), data);
        self.send(reply);
    }

    pub fn reply_error(mut self, code: impl Into<String>, data: Payload) {
        let reply = Reply::error(self.request_uuid.clone(), code, data);
        self.send(reply);
    }

    fn send(&mut self, reply: Reply) {
        let Some(writer) = self.writer.take() else {
            return;
        };
        let reply = reply.testing(self.testing);
        match writer.send(&Envelope::Reply(reply)) {
            Ok(()) => trace!(zone = %self.zone, action = %self.action, request_uuid = %self.request_uuid, "reply sent"),
            Err(err) => warn!(
                zone = %self.zone,
                action = %self.action,
                request_uuid = %self.request_uuid,
                error = %err,
                "reply could not be posted"
            ),
        }
    }
}

impl Drop for HandlerContext {
    fn drop(&mut self) {
        if self.writer.is_some() {
            warn!(zone = %self.zone, action = %self.action, request_uuid = %self.request_uuid, "handler finished without replying");
            let reply = Reply::error(self.request_uuid.clone(), ERROR_NO_REPLY, Payload::new());
            self.send(reply);
        }
    }
}

impl fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerContext")
            .field("zone", &self.zone)
            .field("action", &self.action)
            .field("request_uuid", &self.request_uuid)
            .field("caller_origin", &self.caller_origin)
            .field("deadline_ms", &self.deadline_ms)
            .field("answered", &self.writer.is_none())
            .finish()
    }
}

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// A request was handed to its handler.
    Handled,
    /// A reply was handed to the outbound dispatcher.
    ReplyForwarded,
    /// A request named an action with no handler; an error reply was sent.
    ActionNotFound,
    Dropped(DropReason),
}

/// Why an inbound message was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    NotConfigured,
    Origin,
    Malformed,
    Uncorrelated,
    Expired,
}

struct InboundState {
    zone: Option<ZoneConfig>,
    handlers: HandlerTable,
    reader: EnvelopeReader,
    outbound: OutboundDispatcher,
    clock: ClockHandle,
}

/// Entry point for every message posted to a zone.
#[derive(Clone)]
pub struct InboundDispatcher {
    inner: Rc<RefCell<InboundState>>,
}

impl InboundDispatcher {
    /// Create an unconfigured dispatcher; messages are dropped until
    /// [`configure`](Self::configure) runs.
    pub fn new(outbound: OutboundDispatcher, clock: ClockHandle) -> Self {
        Self {
            inner: Rc::new(RefCell::new(InboundState {
                zone: None,
                handlers: HandlerTable::new(),
                reader: EnvelopeReader::new(),
                outbound,
                clock,
            })),
        }
    }

    pub fn configure(&self, handlers: HandlerTable, zone: ZoneConfig) {
        let mut state = self.inner.borrow_mut();
        debug!(zone = %zone.name, actions = ?handlers.actions(), "zone configured");
        state.reader = EnvelopeReader::with_config(zone.envelope);
        state.handlers = handlers;
        state.zone = Some(zone);
    }

    pub fn outbound(&self) -> OutboundDispatcher {
        self.inner.borrow().outbound.clone()
    }

    pub fn zone(&self) -> Option<ZoneConfig> {
        self.inner.borrow().zone.clone()
    }

    pub fn on_message(&self, event: MessageEvent) -> Dispatch {
        let state = self.inner.borrow();
        let Some(zone) = &state.zone else {
            warn!(origin = %event.origin, error = %PeerError::NotConfigured, "message dropped");
            return Dispatch::Dropped(DropReason::NotConfigured);
        };

        let rule = match zone.origin_rule() {
            Ok(rule) => rule,
            Err(err) => {
                error!(zone = %zone.name, error = %err, "cannot derive expected origin");
                return Dispatch::Dropped(DropReason::Origin);
            }
        };

        let envelope = match state.reader.read(&event, &rule) {
            Ok(envelope) => envelope,
            Err(EnvelopeError::OriginRejected { expected, actual }) => {
                warn!(zone = %zone.name, expected = %expected, origin = %actual, "message from untrusted origin dropped");
                return Dispatch::Dropped(DropReason::Origin);
            }
            Err(EnvelopeError::Uncorrelated { response_uuid }) => {
                warn!(zone = %zone.name, response_uuid = %response_uuid, "reply without request_uuid dropped");
                return Dispatch::Dropped(DropReason::Uncorrelated);
            }
            Err(err) => {
                warn!(zone = %zone.name, origin = %event.origin, error = %err, "malformed message dropped");
                return Dispatch::Dropped(DropReason::Malformed);
            }
        };

        let request = match envelope {
            Envelope::Reply(reply) => {
                let outbound = state.outbound.clone();
                drop(state);
                outbound.handle_reply(reply);
                return Dispatch::ReplyForwarded;
            }
            Envelope::Request(request) => request,
        };

        let now = state.clock.now_ms();
        if request.deadline_ms <= now {
            warn!(
                zone = %zone.name,
                action = %request.action,
                request_uuid = %request.request_uuid,
                "request arrived past its deadline; dropped"
            );
            return Dispatch::Dropped(DropReason::Expired);
        }
        // Inside the margin the handler still runs, but nested calls made
        // with its deadline fail at once.
        let margin = u64::try_from(zone.deadline_margin.as_millis()).unwrap_or(u64::MAX);
        let deadline = request.deadline_ms.saturating_sub(margin).max(now);

        let target_origin = reply_target(zone.policy, &event.origin);
        let writer = EnvelopeWriter::with_config(event.source.clone(), target_origin, zone.envelope);
        let handler = state.handlers.get(&request.action);
        let zone_name = zone.name.clone();
        drop(state);

        let Some(handler) = handler else {
            warn!(zone = %zone_name, action = %request.action, "no handler for action");
            let mut data = Payload::new();
            data.insert("action".to_string(), Value::String(request.action.clone()));
            let reply = Reply::error(request.request_uuid, ERROR_ACTION_NOT_FOUND, data)
                .testing(request.testing);
            if let Err(err) = writer.send(&Envelope::Reply(reply)) {
                warn!(zone = %zone_name, error = %err, "error reply could not be posted");
            }
            return Dispatch::ActionNotFound;
        };

        debug!(zone = %zone_name, action = %request.action, request_uuid = %request.request_uuid, "dispatching request");
        let ctx = HandlerContext {
            zone: zone_name,
            action: request.action,
            request_uuid: request.request_uuid,
            caller_origin: event.origin,
            deadline_ms: deadline,
            testing: request.testing,
            writer: Some(writer),
        };
        handler.handle(request.data, ctx);
        Dispatch::Handled
    }
}

/// Target origin for replies to `caller_origin`.
///
/// Opaque (`"null"`) callers can only be answered with the `*` wildcard,
/// which is reserved for public zones.
fn reply_target(policy: OriginPolicy, caller_origin: &str) -> String {
    match policy {
        OriginPolicy::Public if caller_origin == "null" => "*".to_string(),
        _ => caller_origin.to_string(),
    }
}

impl fmt::Debug for InboundDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.borrow();
        f.debug_struct("InboundDispatcher")
            .field("zone", &state.zone.as_ref().map(|zone| zone.name.as_str()))
            .field("handlers", &state.handlers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use framebridge_envelope::{decode, encode, Request, ReplyBody};
    use framebridge_schema::ValidatorRegistry;
    use framebridge_transport::{ManualClock, MessageBus};
    use serde_json::json;

    use super::*;
    use crate::outbound::{OutboundConfig, Route};

    const PAGE: &str = "https://example.org";
    const SESSION: &str = "https://session.example.org";

    struct Fixture {
        bus: MessageBus,
        clock: ManualClock,
        inbound: InboundDispatcher,
        calls: Rc<Cell<usize>>,
    }

    fn session_zone() -> Fixture {
        let bus = MessageBus::new();
        bus.open_window("page", "https://example.org/app").unwrap();
        bus.open_window("session", "https://session.example.org/frame")
            .unwrap();
        bus.open_window("evil", "https://evil.example.net/").unwrap();
        let clock = ManualClock::new(1_000);

        let outbound = OutboundDispatcher::new(
            Route::Direct(EnvelopeWriter::new(bus.port("session", "page"), PAGE)),
            Rc::new(ValidatorRegistry::new()),
            OutboundConfig::new("session"),
            Rc::new(clock.clone()),
        );
        let inbound = InboundDispatcher::new(outbound, Rc::new(clock.clone()));

        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        let mut handlers = HandlerTable::new();
        handlers.register("Echo", move |data: Payload, ctx: HandlerContext| {
            counter.set(counter.get() + 1);
            ctx.reply_success(data);
        });
        handlers.register("Fail", |_data: Payload, ctx: HandlerContext| {
            ctx.reply_error("permission_denied", Payload::new());
        });
        handlers.register("Forget", |_data: Payload, _ctx: HandlerContext| {});
        handlers.register("Deadline", |_data: Payload, ctx: HandlerContext| {
            let mut out = Payload::new();
            out.insert("deadline".to_string(), json!(ctx.deadline()));
            ctx.reply_success(out);
        });
        inbound.configure(handlers, ZoneConfig::session(PAGE));

        Fixture {
            bus,
            clock,
            inbound,
            calls,
        }
    }

    fn post(fx: &Fixture, from: &str, request: Request) -> Dispatch {
        let port = fx.bus.port(from, "session");
        port.post_message(&encode(&Envelope::Request(request)).unwrap(), SESSION)
            .unwrap();
        let delivery = fx.bus.pop().unwrap();
        fx.inbound.on_message(delivery.event)
    }

    fn reply_body(fx: &Fixture) -> ReplyBody {
        let delivery = fx.bus.pop().unwrap();
        assert_eq!(delivery.target, "page");
        match decode(&delivery.event.data).unwrap() {
            Envelope::Reply(reply) => reply.body,
            other => panic!("expected reply, got {other:?}"),
        }
    }

    fn request(action: &str, data: Value) -> Request {
        Request::new(action, data.as_object().cloned().unwrap(), 1_000, 5_000)
    }

    #[test]
    fn request_reaches_handler_and_reply_returns() {
        let fx = session_zone();
        let dispatch = post(&fx, "page", request("Echo", json!({"a": 1})));
        assert_eq!(dispatch, Dispatch::Handled);
        assert_eq!(fx.calls.get(), 1);
        assert_eq!(
            reply_body(&fx),
            ReplyBody::Success(json!({"a": 1}).as_object().cloned().unwrap())
        );
    }

    #[test]
    fn wrong_origin_reaches_no_handler() {
        let fx = session_zone();
        let dispatch = post(&fx, "evil", request("Echo", json!({})));
        assert_eq!(dispatch, Dispatch::Dropped(DropReason::Origin));
        assert_eq!(fx.calls.get(), 0);
        assert_eq!(fx.bus.pending(), 0);
    }

    #[test]
    fn unknown_action_gets_error_reply() {
        let fx = session_zone();
        let dispatch = post(&fx, "page", request("Nope", json!({})));
        assert_eq!(dispatch, Dispatch::ActionNotFound);
        match reply_body(&fx) {
            ReplyBody::Error { code, data } => {
                assert_eq!(code, ERROR_ACTION_NOT_FOUND);
                assert_eq!(data.get("action"), Some(&json!("Nope")));
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[test]
    fn application_error_and_dropped_context() {
        let fx = session_zone();
        post(&fx, "page", request("Fail", json!({})));
        assert!(matches!(reply_body(&fx), ReplyBody::Error { code, .. } if code == "permission_denied"));

        post(&fx, "page", request("Forget", json!({})));
        assert!(matches!(reply_body(&fx), ReplyBody::Error { code, .. } if code == ERROR_NO_REPLY));
    }

    #[test]
    fn handlers_see_deadline_minus_margin() {
        let fx = session_zone();
        post(&fx, "page", request("Deadline", json!({})));
        match reply_body(&fx) {
            ReplyBody::Success(data) => assert_eq!(data.get("deadline"), Some(&json!(5_750))),
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[test]
    fn expired_request_is_dropped_before_handler() {
        let fx = session_zone();
        fx.clock.set(6_000);
        let dispatch = post(&fx, "page", request("Echo", json!({})));
        assert_eq!(dispatch, Dispatch::Dropped(DropReason::Expired));
        assert_eq!(fx.calls.get(), 0);
        assert_eq!(fx.bus.pending(), 0);
    }

    #[test]
    fn request_inside_margin_still_reaches_handler() {
        let fx = session_zone();
        fx.clock.set(5_900);
        let dispatch = post(&fx, "page", request("Deadline", json!({})));
        assert_eq!(dispatch, Dispatch::Handled);
        match reply_body(&fx) {
            ReplyBody::Success(data) => assert_eq!(data.get("deadline"), Some(&json!(5_900))),
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[test]
    fn wildcard_reply_target_only_for_public_zones() {
        assert_eq!(reply_target(OriginPolicy::Public, "null"), "*");
        assert_eq!(reply_target(OriginPolicy::Client, "null"), "null");
        assert_eq!(reply_target(OriginPolicy::SessionDomain, "null"), "null");
        assert_eq!(reply_target(OriginPolicy::Public, PAGE), PAGE);
    }

    #[test]
    fn malformed_and_uncorrelated_are_dropped() {
        let fx = session_zone();
        let port = fx.bus.port("page", "session");
        port.post_message("not json", SESSION).unwrap();
        port.post_message(r#"{"version":1,"response_uuid":"r","response_data":{}}"#, SESSION)
            .unwrap();

        let first = fx.bus.pop().unwrap();
        assert_eq!(
            fx.inbound.on_message(first.event),
            Dispatch::Dropped(DropReason::Malformed)
        );
        let second = fx.bus.pop().unwrap();
        assert_eq!(
            fx.inbound.on_message(second.event),
            Dispatch::Dropped(DropReason::Uncorrelated)
        );
    }

    #[test]
    fn unconfigured_zone_drops_everything() {
        let fx = session_zone();
        let outbound = fx.inbound.outbound();
        let bare = InboundDispatcher::new(outbound, Rc::new(fx.clock.clone()));
        let port = fx.bus.port("page", "session");
        port.post_message(&encode(&request("Echo", json!({})).into()).unwrap(), SESSION)
            .unwrap();
        let delivery = fx.bus.pop().unwrap();
        assert_eq!(
            bare.on_message(delivery.event),
            Dispatch::Dropped(DropReason::NotConfigured)
        );
    }

    #[test]
    fn origin_rules_follow_policy() {
        let page = ZoneConfig::page(PAGE).origin_rule().unwrap();
        assert!(page.allows(SESSION));
        assert!(!page.allows(PAGE));

        let session = ZoneConfig::session(PAGE).origin_rule().unwrap();
        assert!(session.allows(PAGE));
        assert!(!session.allows(SESSION));

        assert!(ZoneConfig::public("widget")
            .origin_rule()
            .unwrap()
            .allows("https://anywhere.test"));
    }
}
