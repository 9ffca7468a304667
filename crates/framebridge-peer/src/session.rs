//! Single live session frame per browser.
//!
//! The tab that creates the hidden session frame owns it and keeps a
//! heartbeat record fresh in shared storage. Other tabs read the heartbeat,
//! find the frame by window name and reuse it. A stale heartbeat or an
//! unreachable frame means the owner is gone and a new frame is created.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use framebridge_envelope::{
    encode_with_config, Envelope, EnvelopeConfig, EnvelopeWriter, HeartbeatRecord, Payload,
    Request, ACTION_PING, DEFAULT_SESSION_SUBDOMAIN, HEARTBEAT_KEY, SESSION_FRAME_NAME,
    SESSION_FRAME_PATH,
};
use framebridge_transport::{
    session_origin, ClockHandle, FramePort, Origin, SharedStore, WindowHost,
};
use tracing::{debug, error, info, warn};

use crate::error::{PeerError, Result};

/// Where a tab is in resolving its session frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unresolved,
    CheckingSharedState,
    ReusingExisting,
    CreatingNew,
    Ready,
    /// Terminal: the frame could not be created or never came up.
    Failed,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Unresolved => "unresolved",
            SessionState::CheckingSharedState => "checking_shared_state",
            SessionState::ReusingExisting => "reusing_existing",
            SessionState::CreatingNew => "creating_new",
            SessionState::Ready => "ready",
            SessionState::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for session frame coordination.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Origin of the page hosting this tab.
    pub page_origin: String,
    /// Label prefixed to the page host to form the session origin.
    pub subdomain: String,
    /// Window name shared by every tab's view of the session frame.
    pub frame_name: String,
    /// Path loaded in the session frame.
    pub frame_path: String,
    /// Shared store key of the heartbeat record.
    pub heartbeat_key: String,
    /// How often the owner rewrites the heartbeat.
    pub heartbeat_interval: Duration,
    /// Extra age a heartbeat may reach before the owner is presumed dead.
    pub overlap_tolerance: Duration,
    /// How long a frame has to announce readiness.
    pub ready_timeout: Duration,
    pub envelope: EnvelopeConfig,
}

impl SessionConfig {
    pub fn new(page_origin: impl Into<String>) -> Self {
        Self {
            page_origin: page_origin.into(),
            ..Self::default()
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            page_origin: String::new(),
            subdomain: DEFAULT_SESSION_SUBDOMAIN.to_string(),
            frame_name: SESSION_FRAME_NAME.to_string(),
            frame_path: SESSION_FRAME_PATH.to_string(),
            heartbeat_key: HEARTBEAT_KEY.to_string(),
            heartbeat_interval: Duration::from_millis(1_000),
            overlap_tolerance: Duration::from_millis(2_000),
            ready_timeout: Duration::from_secs(10),
            envelope: EnvelopeConfig::default(),
        }
    }
}

struct Queued {
    request_uuid: String,
    encoded: String,
}

struct CoordinatorState {
    config: SessionConfig,
    host: Rc<dyn WindowHost>,
    store: Rc<dyn SharedStore>,
    clock: ClockHandle,
    state: SessionState,
    writer: Option<EnvelopeWriter>,
    owner: bool,
    queue: VecDeque<Queued>,
    ready_deadline: Option<u64>,
    next_heartbeat: Option<u64>,
    fell_back: bool,
    failure: Option<String>,
}

/// Per-tab handle resolving, owning or reusing the session frame.
///
/// Cloned handles share state. Methods never call back into user code, so
/// they are safe to use from handlers and completions.
#[derive(Clone)]
pub struct SessionCoordinator {
    inner: Rc<RefCell<CoordinatorState>>,
}

impl SessionCoordinator {
    pub fn new(
        config: SessionConfig,
        host: Rc<dyn WindowHost>,
        store: Rc<dyn SharedStore>,
        clock: ClockHandle,
    ) -> Self {
        Self {
            inner: Rc::new(RefCell::new(CoordinatorState {
                config,
                host,
                store,
                clock,
                state: SessionState::Unresolved,
                writer: None,
                owner: false,
                queue: VecDeque::new(),
                ready_deadline: None,
                next_heartbeat: None,
                fell_back: false,
                failure: None,
            })),
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.borrow().state
    }

    /// True when this tab created the frame and keeps its heartbeat.
    pub fn is_owner(&self) -> bool {
        self.inner.borrow().owner
    }

    /// Requests waiting for the frame to become ready.
    pub fn queued(&self) -> usize {
        self.inner.borrow().queue.len()
    }

    pub fn failure(&self) -> Option<String> {
        self.inner.borrow().failure.clone()
    }

    pub fn config(&self) -> SessionConfig {
        self.inner.borrow().config.clone()
    }

    /// Session origin derived from the page origin.
    pub fn session_origin(&self) -> Result<Origin> {
        let state = self.inner.borrow();
        Ok(session_origin(
            &state.config.page_origin,
            &state.config.subdomain,
        )?)
    }

    /// Resolve the frame if nothing has been attempted yet.
    ///
    /// Returns ids of queued requests that failed as a result.
    pub fn ensure(&self) -> Vec<String> {
        let mut state = self.inner.borrow_mut();
        if state.state == SessionState::Unresolved {
            state.resolve()
        } else {
            Vec::new()
        }
    }

    /// Deliver an encoded request, queueing it until the frame is ready.
    pub fn post(&self, request_uuid: &str, encoded: String) -> Result<()> {
        let mut state = self.inner.borrow_mut();
        if state.state == SessionState::Unresolved {
            state.resolve();
        }

        let current = state.state;
        match current {
            SessionState::Ready => match &state.writer {
                Some(writer) => Ok(writer.send_encoded(&encoded)?),
                None => Err(PeerError::SessionUnavailable(
                    "ready without a frame".to_string(),
                )),
            },
            SessionState::Failed => Err(PeerError::SessionUnavailable(
                state
                    .failure
                    .clone()
                    .unwrap_or_else(|| "session frame failed".to_string()),
            )),
            _ => {
                debug!(request_uuid, state = %current, "request queued until session is ready");
                state.queue.push_back(Queued {
                    request_uuid: request_uuid.to_string(),
                    encoded,
                });
                Ok(())
            }
        }
    }

    /// Record the frame's readiness announcement and flush queued requests
    /// in the order they were sent.
    ///
    /// `source` is the window the announcement came from. Announcements
    /// from any window other than the frame this tab currently targets are
    /// ignored.
    ///
    /// Returns ids of queued requests that could not be posted.
    pub fn mark_ready(&self, source: &dyn FramePort) -> Vec<String> {
        let mut state = self.inner.borrow_mut();
        let expected = state
            .writer
            .as_ref()
            .map(|writer| writer.port().window_id().to_string());
        if expected.as_deref() != Some(source.window_id()) {
            warn!(
                window = %source.window_id(),
                expected = ?expected,
                state = %state.state,
                "readiness announcement from another window ignored"
            );
            return Vec::new();
        }
        match state.state {
            SessionState::ReusingExisting | SessionState::CreatingNew => {}
            SessionState::Ready => {
                debug!("duplicate readiness announcement ignored");
                return Vec::new();
            }
            other => {
                warn!(state = %other, "readiness announcement ignored");
                return Vec::new();
            }
        }

        state.state = SessionState::Ready;
        state.ready_deadline = None;
        info!(owner = state.owner, queued = state.queue.len(), "session frame ready");

        let queued: Vec<Queued> = state.queue.drain(..).collect();
        let mut failed = Vec::new();
        for item in queued {
            let sent = match &state.writer {
                Some(writer) => writer.send_encoded(&item.encoded).map_err(|err| err.to_string()),
                None => Err("no session frame".to_string()),
            };
            if let Err(err) = sent {
                warn!(request_uuid = %item.request_uuid, error = %err, "queued request could not be posted");
                failed.push(item.request_uuid);
            }
        }
        failed
    }

    /// Run time-driven work: heartbeat rewrites and readiness deadlines.
    ///
    /// Returns ids of queued requests that failed because the session failed.
    pub fn poll(&self) -> Vec<String> {
        let mut state = self.inner.borrow_mut();
        let now = state.clock.now_ms();

        if state.owner {
            if let Some(due) = state.next_heartbeat {
                if now >= due {
                    state.write_heartbeat(now);
                }
            }
        }

        let Some(deadline) = state.ready_deadline else {
            return Vec::new();
        };
        if now < deadline {
            return Vec::new();
        }

        let current = state.state;
        match current {
            SessionState::ReusingExisting if !state.fell_back => {
                warn!("reused session frame did not announce readiness; creating a new one");
                state.fell_back = true;
                state.create()
            }
            SessionState::ReusingExisting | SessionState::CreatingNew => {
                state.fail("session frame did not announce readiness in time".to_string())
            }
            _ => {
                state.ready_deadline = None;
                Vec::new()
            }
        }
    }

    /// Earliest epoch-ms at which [`poll`](Self::poll) has work to do.
    pub fn next_wake(&self) -> Option<u64> {
        let state = self.inner.borrow();
        let heartbeat = if state.owner {
            state.next_heartbeat
        } else {
            None
        };
        match (state.ready_deadline, heartbeat) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Clean shutdown of the tab. The owner removes its heartbeat so the
    /// next tab does not wait for it to go stale.
    pub fn unload(&self) {
        let mut state = self.inner.borrow_mut();
        if state.owner {
            state.store.remove(&state.config.heartbeat_key);
            info!("session heartbeat removed on unload");
        }
        state.owner = false;
        state.next_heartbeat = None;
    }
}

impl fmt::Debug for SessionCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.borrow();
        f.debug_struct("SessionCoordinator")
            .field("state", &state.state)
            .field("owner", &state.owner)
            .field("queued", &state.queue.len())
            .finish()
    }
}

impl CoordinatorState {
    fn resolve(&mut self) -> Vec<String> {
        self.state = SessionState::CheckingSharedState;
        let origin = match session_origin(&self.config.page_origin, &self.config.subdomain) {
            Ok(origin) => origin,
            Err(err) => return self.fail(err.to_string()),
        };

        let now = self.clock.now_ms();
        let fresh = self
            .store
            .get(&self.config.heartbeat_key)
            .and_then(|raw| HeartbeatRecord::decode(&raw))
            .is_some_and(|record| {
                record.is_fresh(
                    now,
                    millis(self.config.heartbeat_interval),
                    millis(self.config.overlap_tolerance),
                )
            });

        if !fresh {
            debug!("no live heartbeat; creating session frame");
            return self.create();
        }

        let Some(port) = self.host.find_named_frame(&self.config.frame_name) else {
            info!("heartbeat is fresh but session frame is gone; creating a new one");
            return self.create();
        };
        let reachable = port
            .location()
            .is_some_and(|location| origin.matches(&location));
        if !reachable {
            info!("session frame is unreachable; previous owner presumed crashed");
            return self.create();
        }

        let writer =
            EnvelopeWriter::with_config(port, origin.to_string(), self.config.envelope);
        let ping = Request::new(
            ACTION_PING,
            Payload::new(),
            now,
            millis(self.config.ready_timeout),
        );
        let probe = encode_with_config(&Envelope::Request(ping), &self.config.envelope)
            .and_then(|encoded| writer.send_encoded(&encoded));
        if let Err(err) = probe {
            warn!(error = %err, "probe of existing session frame failed; creating a new one");
            return self.create();
        }

        info!("reusing existing session frame");
        self.writer = Some(writer);
        self.state = SessionState::ReusingExisting;
        self.ready_deadline = Some(now.saturating_add(millis(self.config.ready_timeout)));
        Vec::new()
    }

    fn create(&mut self) -> Vec<String> {
        let origin = match session_origin(&self.config.page_origin, &self.config.subdomain) {
            Ok(origin) => origin,
            Err(err) => return self.fail(err.to_string()),
        };
        let src = format!("{origin}{}", self.config.frame_path);

        let port = match self.host.create_hidden_frame(&self.config.frame_name, &src) {
            Ok(port) => port,
            Err(err) => return self.fail(err.to_string()),
        };

        let now = self.clock.now_ms();
        self.writer = Some(EnvelopeWriter::with_config(
            port,
            origin.to_string(),
            self.config.envelope,
        ));
        self.owner = true;
        self.state = SessionState::CreatingNew;
        self.ready_deadline = Some(now.saturating_add(millis(self.config.ready_timeout)));
        self.write_heartbeat(now);
        info!(src = %src, "session frame created");
        Vec::new()
    }

    fn write_heartbeat(&mut self, now: u64) {
        let record = HeartbeatRecord::new(now).encode();
        if let Err(err) = self.store.set(&self.config.heartbeat_key, &record) {
            warn!(error = %err, "failed to write session heartbeat");
        }
        self.next_heartbeat = Some(now.saturating_add(millis(self.config.heartbeat_interval)));
    }

    fn fail(&mut self, reason: String) -> Vec<String> {
        error!(reason = %reason, "session frame unavailable");
        self.state = SessionState::Failed;
        self.failure = Some(reason);
        self.writer = None;
        self.ready_deadline = None;
        if self.owner {
            self.store.remove(&self.config.heartbeat_key);
        }
        self.owner = false;
        self.next_heartbeat = None;
        self.queue.drain(..).map(|item| item.request_uuid).collect()
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use framebridge_envelope::decode;
    use framebridge_transport::{ManualClock, MemoryBrowser, MemoryStore, MemoryWindowHost};

    use super::*;

    const PAGE: &str = "https://example.org";

    struct Tab {
        host: Rc<MemoryWindowHost>,
        coordinator: SessionCoordinator,
    }

    fn tab(browser: &MemoryBrowser, clock: &ManualClock, id: &str) -> Tab {
        let host = Rc::new(browser.open_tab(id, "https://example.org/app").unwrap());
        let store: Rc<MemoryStore> = Rc::new(browser.store());
        let coordinator = SessionCoordinator::new(
            SessionConfig::new(PAGE),
            host.clone(),
            store,
            Rc::new(clock.clone()),
        );
        Tab { host, coordinator }
    }

    fn heartbeat(browser: &MemoryBrowser) -> Option<HeartbeatRecord> {
        browser
            .store()
            .get(HEARTBEAT_KEY)
            .and_then(|raw| HeartbeatRecord::decode(&raw))
    }

    #[test]
    fn first_tab_creates_and_owns_the_frame() {
        let browser = MemoryBrowser::new();
        let clock = ManualClock::new(10_000);
        let a = tab(&browser, &clock, "a");

        a.coordinator.post("r1", "{}".to_string()).unwrap();
        assert_eq!(a.coordinator.state(), SessionState::CreatingNew);
        assert!(a.coordinator.is_owner());
        assert_eq!(a.coordinator.queued(), 1);
        assert_eq!(heartbeat(&browser), Some(HeartbeatRecord::new(10_000)));
        assert_eq!(
            browser.named_window(SESSION_FRAME_NAME),
            Some(a.host.frame_id(SESSION_FRAME_NAME))
        );
    }

    #[test]
    fn ready_flushes_queue_in_order() {
        let browser = MemoryBrowser::new();
        let clock = ManualClock::new(0);
        let a = tab(&browser, &clock, "a");

        a.coordinator.post("r1", "first".to_string()).unwrap();
        a.coordinator.post("r2", "second".to_string()).unwrap();
        assert_eq!(browser.bus().pending(), 0);

        let frame = browser
            .bus()
            .port("a", &a.host.frame_id(SESSION_FRAME_NAME));
        assert!(a.coordinator.mark_ready(frame.as_ref()).is_empty());
        assert_eq!(a.coordinator.state(), SessionState::Ready);
        assert_eq!(browser.bus().pop().unwrap().event.data, "first");
        assert_eq!(browser.bus().pop().unwrap().event.data, "second");

        a.coordinator.post("r3", "third".to_string()).unwrap();
        assert_eq!(browser.bus().pop().unwrap().event.data, "third");
    }

    #[test]
    fn owner_rewrites_heartbeat_every_interval() {
        let browser = MemoryBrowser::new();
        let clock = ManualClock::new(0);
        let a = tab(&browser, &clock, "a");
        a.coordinator.ensure();
        assert_eq!(a.coordinator.next_wake(), Some(1_000));

        clock.advance(999);
        a.coordinator.poll();
        assert_eq!(heartbeat(&browser), Some(HeartbeatRecord::new(0)));

        clock.advance(1);
        a.coordinator.poll();
        assert_eq!(heartbeat(&browser), Some(HeartbeatRecord::new(1_000)));

        a.coordinator.unload();
        assert_eq!(heartbeat(&browser), None);
    }

    #[test]
    fn second_tab_reuses_and_probes() {
        let browser = MemoryBrowser::new();
        let clock = ManualClock::new(0);
        let a = tab(&browser, &clock, "a");
        a.coordinator.ensure();
        let frame_id = a.host.frame_id(SESSION_FRAME_NAME);

        let b = tab(&browser, &clock, "b");
        clock.advance(500);
        b.coordinator.ensure();
        assert_eq!(b.coordinator.state(), SessionState::ReusingExisting);
        assert!(!b.coordinator.is_owner());

        let probe = browser.bus().pop().unwrap();
        assert_eq!(probe.target, frame_id);
        match decode(&probe.event.data).unwrap() {
            Envelope::Request(request) => assert_eq!(request.action, ACTION_PING),
            other => panic!("expected ping, got {other:?}"),
        }

        b.coordinator.unload();
        assert!(heartbeat(&browser).is_some());
    }

    #[test]
    fn stale_heartbeat_means_new_frame() {
        let browser = MemoryBrowser::new();
        let clock = ManualClock::new(0);
        let a = tab(&browser, &clock, "a");
        a.coordinator.ensure();

        let b = tab(&browser, &clock, "b");
        clock.advance(3_001);
        b.coordinator.ensure();
        assert_eq!(b.coordinator.state(), SessionState::CreatingNew);
        assert!(b.coordinator.is_owner());
    }

    #[test]
    fn crashed_owner_with_fresh_heartbeat_means_new_frame() {
        let browser = MemoryBrowser::new();
        let clock = ManualClock::new(0);
        let a = tab(&browser, &clock, "a");
        a.coordinator.ensure();
        browser.close_tab("a");

        let b = tab(&browser, &clock, "b");
        b.coordinator.ensure();
        assert_eq!(b.coordinator.state(), SessionState::CreatingNew);
        assert_eq!(
            browser.named_window(SESSION_FRAME_NAME),
            Some(b.host.frame_id(SESSION_FRAME_NAME))
        );
    }

    #[test]
    fn silent_reused_frame_falls_back_once() {
        let browser = MemoryBrowser::new();
        let clock = ManualClock::new(0);
        let a = tab(&browser, &clock, "a");
        a.coordinator.ensure();

        let b = tab(&browser, &clock, "b");
        b.coordinator.post("r1", "queued".to_string()).unwrap();
        assert_eq!(b.coordinator.state(), SessionState::ReusingExisting);

        clock.advance(10_000);
        assert!(b.coordinator.poll().is_empty());
        assert_eq!(b.coordinator.state(), SessionState::CreatingNew);
        assert_eq!(b.coordinator.queued(), 1);

        clock.advance(10_000);
        assert_eq!(b.coordinator.poll(), vec!["r1".to_string()]);
        assert_eq!(b.coordinator.state(), SessionState::Failed);
    }

    #[test]
    fn late_ready_from_abandoned_frame_is_ignored() {
        let browser = MemoryBrowser::new();
        let clock = ManualClock::new(0);
        let a = tab(&browser, &clock, "a");
        a.coordinator.ensure();
        let abandoned = a.host.frame_id(SESSION_FRAME_NAME);

        let b = tab(&browser, &clock, "b");
        b.coordinator.post("r1", "queued".to_string()).unwrap();
        clock.advance(10_000);
        b.coordinator.poll();
        assert_eq!(b.coordinator.state(), SessionState::CreatingNew);
        while browser.bus().pop().is_some() {}

        let late = browser.bus().port("b", &abandoned);
        assert!(b.coordinator.mark_ready(late.as_ref()).is_empty());
        assert_eq!(b.coordinator.state(), SessionState::CreatingNew);
        assert_eq!(b.coordinator.queued(), 1);
        assert_eq!(browser.bus().pending(), 0);

        let own_frame = b.host.frame_id(SESSION_FRAME_NAME);
        let own = browser.bus().port("b", &own_frame);
        assert!(b.coordinator.mark_ready(own.as_ref()).is_empty());
        assert_eq!(b.coordinator.state(), SessionState::Ready);
        let flushed = browser.bus().pop().unwrap();
        assert_eq!(flushed.target, own_frame);
        assert_eq!(flushed.event.data, "queued");
    }

    #[test]
    fn frame_creation_failure_is_terminal() {
        let browser = MemoryBrowser::new();
        let clock = ManualClock::new(0);
        let a = tab(&browser, &clock, "a");
        a.host.block_frames(true);

        let err = a.coordinator.post("r1", "x".to_string()).unwrap_err();
        assert!(matches!(err, PeerError::SessionUnavailable(_)));
        assert_eq!(a.coordinator.state(), SessionState::Failed);
        assert!(a.coordinator.failure().is_some());

        a.host.block_frames(false);
        assert!(a.coordinator.post("r2", "x".to_string()).is_err());
        assert_eq!(heartbeat(&browser), None);
    }
}
