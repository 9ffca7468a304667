//! Outbound request dispatch and reply correlation for one zone.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use framebridge_envelope::{
    encode_with_config, Envelope, EnvelopeConfig, EnvelopeWriter, Payload, Reply, ReplyBody,
    Request,
};
use framebridge_schema::{Validation, ValidationDone, ValidatorRegistry};
use framebridge_transport::ClockHandle;
use tracing::{debug, error, trace, warn};

use crate::error::{PeerError, RequestError};
use crate::pending::{Completion, PendingRecord, PendingTable};
use crate::session::SessionCoordinator;

/// Outcome delivered to a request's continuation.
pub type Outcome = std::result::Result<Payload, RequestError>;

/// Error continuation of the split-callback form.
pub type ErrorCallback = Box<dyn FnOnce(RequestError)>;

/// Counter advanced whenever the page navigates away from the view that
/// issued a request. Cloned handles share the counter.
#[derive(Debug, Clone, Default)]
pub struct NavigationGeneration {
    current: Rc<Cell<u64>>,
}

impl NavigationGeneration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.current.get()
    }

    /// Mark a navigation; returns the new generation.
    pub fn advance(&self) -> u64 {
        let next = self.current.get().wrapping_add(1);
        self.current.set(next);
        next
    }
}

/// Where a zone's requests go.
#[derive(Debug, Clone)]
pub enum Route {
    /// Straight to one window, e.g. a satellite zone talking to its parent.
    Direct(EnvelopeWriter),
    /// Through the tab's session coordinator, queued until the frame is ready.
    Session(SessionCoordinator),
}

/// Configuration for an outbound dispatcher.
#[derive(Debug, Clone)]
pub struct OutboundConfig {
    /// Zone name used in logs.
    pub zone: String,
    /// Timeout applied when the caller gives none.
    pub default_timeout: Duration,
    /// Actions whose successful replies are delivered even after navigation.
    pub always_complete: HashSet<String>,
    /// Set the `testing` flag on every request.
    pub testing: bool,
    pub envelope: EnvelopeConfig,
}

impl OutboundConfig {
    pub fn new(zone: impl Into<String>) -> Self {
        Self {
            zone: zone.into(),
            ..Self::default()
        }
    }

    pub fn always_complete<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.always_complete
            .extend(actions.into_iter().map(Into::into));
        self
    }
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            zone: "page".to_string(),
            default_timeout: Duration::from_secs(30),
            always_complete: HashSet::new(),
            testing: false,
            envelope: EnvelopeConfig::default(),
        }
    }
}

struct OutboundState {
    config: OutboundConfig,
    route: Route,
    validators: Rc<ValidatorRegistry>,
    pending: PendingTable,
    navigation: NavigationGeneration,
    clock: ClockHandle,
}

/// Sends requests and completes each exactly once, from its reply or its
/// deadline, whichever comes first.
///
/// No internal borrow is held while a continuation or validator runs, so
/// both may send further requests through the same handle.
#[derive(Clone)]
pub struct OutboundDispatcher {
    inner: Rc<RefCell<OutboundState>>,
}

impl OutboundDispatcher {
    pub fn new(
        route: Route,
        validators: Rc<ValidatorRegistry>,
        config: OutboundConfig,
        clock: ClockHandle,
    ) -> Self {
        Self {
            inner: Rc::new(RefCell::new(OutboundState {
                config,
                route,
                validators,
                pending: PendingTable::new(),
                navigation: NavigationGeneration::new(),
                clock,
            })),
        }
    }

    /// Handle to the navigation counter consulted before delivering successes.
    pub fn navigation(&self) -> NavigationGeneration {
        self.inner.borrow().navigation.clone()
    }

    /// Share a navigation counter owned elsewhere (e.g. by the page router).
    pub fn set_navigation(&self, navigation: NavigationGeneration) {
        self.inner.borrow_mut().navigation = navigation;
    }

    pub fn coordinator(&self) -> Option<SessionCoordinator> {
        match &self.inner.borrow().route {
            Route::Session(coordinator) => Some(coordinator.clone()),
            Route::Direct(_) => None,
        }
    }

    pub fn zone(&self) -> String {
        self.inner.borrow().config.zone.clone()
    }

    /// Requests still waiting for a reply.
    pub fn pending(&self) -> usize {
        self.inner.borrow().pending.len()
    }

    pub fn is_pending(&self, request_uuid: &str) -> bool {
        self.inner.borrow().pending.contains(request_uuid)
    }

    /// Send with the default timeout. Returns the request id when the
    /// request is in flight; immediate failures go to `on_done`.
    pub fn send<F>(&self, action: &str, data: Payload, on_done: F) -> Option<String>
    where
        F: FnOnce(Outcome) + 'static,
    {
        let deadline = self.deadline_after(None);
        self.dispatch(action, data, deadline, None, Box::new(on_done))
    }

    pub fn send_timeout<F>(
        &self,
        action: &str,
        data: Payload,
        timeout: Duration,
        on_done: F,
    ) -> Option<String>
    where
        F: FnOnce(Outcome) + 'static,
    {
        let deadline = self.deadline_after(Some(timeout));
        self.dispatch(action, data, deadline, None, Box::new(on_done))
    }

    /// Split-callback form. Without `on_error`, failures are only logged.
    pub fn send_with<S>(
        &self,
        action: &str,
        data: Payload,
        on_success: S,
        on_error: Option<ErrorCallback>,
        timeout: Option<Duration>,
    ) -> Option<String>
    where
        S: FnOnce(Payload) + 'static,
    {
        let deadline = self.deadline_after(timeout);
        let label = action.to_string();
        let completion: Completion = Box::new(move |outcome| match outcome {
            Ok(payload) => on_success(payload),
            Err(err) => match on_error {
                Some(on_error) => on_error(err),
                None => warn!(action = %label, code = err.code(), error = %err, "request failed"),
            },
        });
        self.dispatch(action, data, deadline, None, completion)
    }

    /// Send on behalf of a caller whose own deadline is `deadline_ms`; the
    /// request never outlives it.
    pub fn send_within<F>(
        &self,
        action: &str,
        data: Payload,
        deadline_ms: u64,
        on_done: F,
    ) -> Option<String>
    where
        F: FnOnce(Outcome) + 'static,
    {
        let deadline = self.deadline_after(None).min(deadline_ms);
        self.dispatch(action, data, deadline, None, Box::new(on_done))
    }

    /// Send to a specific window instead of the zone's route.
    pub fn send_via<F>(
        &self,
        writer: EnvelopeWriter,
        action: &str,
        data: Payload,
        on_done: F,
    ) -> Option<String>
    where
        F: FnOnce(Outcome) + 'static,
    {
        let deadline = self.deadline_after(None);
        self.dispatch(action, data, deadline, Some(writer), Box::new(on_done))
    }

    /// Complete the request a reply answers. Replies for unknown or already
    /// completed requests are dropped.
    pub fn handle_reply(&self, reply: Reply) {
        let (record, validators, navigation, always, zone) = {
            let mut state = self.inner.borrow_mut();
            let Some(record) = state.pending.take(&reply.request_uuid) else {
                debug!(
                    zone = %state.config.zone,
                    request_uuid = %reply.request_uuid,
                    response_uuid = %reply.response_uuid,
                    "reply for unknown request dropped"
                );
                return;
            };
            let always = state.config.always_complete.contains(&record.action);
            (
                record,
                Rc::clone(&state.validators),
                state.navigation.clone(),
                always,
                state.config.zone.clone(),
            )
        };

        let PendingRecord {
            action,
            generation,
            completion,
            ..
        } = record;

        match reply.body {
            ReplyBody::Error { code, data } => {
                debug!(zone = %zone, action = %action, code = %code, "error reply");
                completion(Err(RequestError::Application { code, data }));
            }
            ReplyBody::Success(payload) => {
                let original = payload.clone();
                let label = action.clone();
                let done = ValidationDone::new(action.clone(), move |verdict| {
                    let delivered = match verdict {
                        Validation::Accept => original,
                        Validation::Replace(replacement) => replacement,
                        Validation::Reject(reason) => {
                            warn!(zone = %zone, action = %label, reason = %reason, "reply rejected by validator");
                            completion(Err(RequestError::InvalidData {
                                action: label,
                                reason,
                            }));
                            return;
                        }
                    };
                    if navigation.current() != generation && !always {
                        debug!(zone = %zone, action = %label, "success suppressed after navigation");
                        return;
                    }
                    completion(Ok(delivered));
                });
                validators.validate(&action, payload, done);
            }
        }
    }

    /// Fire the timeout continuation of every expired request and let the
    /// session coordinator run its timers. Returns how many requests failed.
    pub fn poll_timeouts(&self) -> usize {
        let coordinator = self.coordinator();
        let mut failed = 0;

        if let Some(coordinator) = coordinator {
            let ids = coordinator.poll();
            if !ids.is_empty() {
                let reason = coordinator
                    .failure()
                    .unwrap_or_else(|| "session frame failed".to_string());
                failed += self.fail_requests(ids, RequestError::SessionUnavailable(reason));
            }
        }

        let (expired, zone) = {
            let mut state = self.inner.borrow_mut();
            let now = state.clock.now_ms();
            (state.pending.take_expired(now), state.config.zone.clone())
        };
        for (request_uuid, record) in expired {
            warn!(zone = %zone, action = %record.action, request_uuid = %request_uuid, "request timed out");
            (record.completion)(Err(RequestError::Timeout {
                action: record.action,
            }));
            failed += 1;
        }
        failed
    }

    /// Fail the listed requests with `error`. Ids no longer pending are skipped.
    pub fn fail_requests(&self, ids: Vec<String>, error: RequestError) -> usize {
        let mut failed = 0;
        for id in ids {
            let record = self.inner.borrow_mut().pending.take(&id);
            if let Some(record) = record {
                (record.completion)(Err(error.clone()));
                failed += 1;
            }
        }
        failed
    }

    /// Earliest epoch-ms at which [`poll_timeouts`](Self::poll_timeouts) has work.
    pub fn next_deadline(&self) -> Option<u64> {
        let (pending, coordinator) = {
            let state = self.inner.borrow();
            let coordinator = match &state.route {
                Route::Session(coordinator) => Some(coordinator.clone()),
                Route::Direct(_) => None,
            };
            (state.pending.next_deadline(), coordinator)
        };
        let wake = coordinator.and_then(|coordinator| coordinator.next_wake());
        match (pending, wake) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn deadline_after(&self, timeout: Option<Duration>) -> u64 {
        let state = self.inner.borrow();
        let timeout = timeout.unwrap_or(state.config.default_timeout);
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        state.clock.now_ms().saturating_add(timeout_ms)
    }

    fn dispatch(
        &self,
        action: &str,
        data: Payload,
        deadline_ms: u64,
        via: Option<EnvelopeWriter>,
        completion: Completion,
    ) -> Option<String> {
        let prepared = self.prepare(action, data, deadline_ms, completion);
        let (request_uuid, encoded, route) = match prepared {
            Ok(prepared) => prepared,
            Err((completion, err)) => {
                completion(Err(err));
                return None;
            }
        };

        let delivered = match via.map(Route::Direct).unwrap_or(route) {
            Route::Direct(writer) => writer
                .send_encoded(&encoded)
                .map_err(|err| RequestError::Send(err.to_string())),
            Route::Session(coordinator) => {
                coordinator
                    .post(&request_uuid, encoded)
                    .map_err(|err| match err {
                        PeerError::SessionUnavailable(reason) => {
                            RequestError::SessionUnavailable(reason)
                        }
                        other => RequestError::Send(other.to_string()),
                    })
            }
        };

        match delivered {
            Ok(()) => {
                trace!(action, request_uuid = %request_uuid, deadline_ms, "request sent");
                Some(request_uuid)
            }
            Err(err) => {
                warn!(action, request_uuid = %request_uuid, error = %err, "request could not be delivered");
                self.fail_requests(vec![request_uuid], err);
                None
            }
        }
    }

    #[allow(clippy::type_complexity)]
    fn prepare(
        &self,
        action: &str,
        data: Payload,
        deadline_ms: u64,
        completion: Completion,
    ) -> std::result::Result<(String, String, Route), (Completion, RequestError)> {
        let mut state = self.inner.borrow_mut();
        if !state.validators.has_validator(action) {
            error!(zone = %state.config.zone, action, "no validator registered; request not sent");
            return Err((completion, RequestError::NoValidator(action.to_string())));
        }

        let request = Request::with_deadline(action, data, deadline_ms).testing(state.config.testing);
        let request_uuid = request.request_uuid.clone();
        let encoded = match encode_with_config(&Envelope::Request(request), &state.config.envelope) {
            Ok(encoded) => encoded,
            Err(err) => return Err((completion, RequestError::Send(err.to_string()))),
        };

        let record = PendingRecord {
            action: action.to_string(),
            generation: state.navigation.current(),
            created_ms: state.clock.now_ms(),
            deadline_ms,
            completion,
        };
        if let Err(record) = state.pending.insert(request_uuid.clone(), record) {
            return Err((
                record.completion,
                RequestError::Send(format!("request id {request_uuid} already in flight")),
            ));
        }

        Ok((request_uuid, encoded, state.route.clone()))
    }
}

impl fmt::Debug for OutboundDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.borrow();
        f.debug_struct("OutboundDispatcher")
            .field("zone", &state.config.zone)
            .field("pending", &state.pending.len())
            .field("generation", &state.navigation.current())
            .finish()
    }
}
