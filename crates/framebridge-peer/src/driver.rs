//! Tokio event loop for one zone.
//!
//! Zone handles are `!Send`, so the driver runs on a
//! [`tokio::task::LocalSet`]. It feeds posted messages to the inbound
//! dispatcher and wakes at the earliest pending deadline or heartbeat.

use std::time::Duration;

use framebridge_transport::{Clock, ClockHandle, MessageEvent, SystemClock};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::inbound::InboundDispatcher;
use crate::outbound::OutboundDispatcher;
use crate::session::SessionCoordinator;
use crate::zone::{PageZone, SessionZone};

/// Clock following tokio's time source, so paused test time drives deadlines.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    origin_ms: u64,
    start: Instant,
}

impl TokioClock {
    /// Anchor at the current wall-clock time.
    pub fn new() -> Self {
        Self::starting_at(SystemClock.now_ms())
    }

    pub fn starting_at(origin_ms: u64) -> Self {
        Self {
            origin_ms,
            start: Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now_ms(&self) -> u64 {
        let elapsed = u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.origin_ms.saturating_add(elapsed)
    }
}

/// Driver settings.
#[derive(Debug, Clone, Copy)]
pub struct DriverConfig {
    /// Sleep used when nothing is scheduled.
    pub idle_tick: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            idle_tick: Duration::from_secs(1),
        }
    }
}

/// What a driver did before it stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverStats {
    pub messages: usize,
    pub polls: usize,
    pub failed: usize,
}

pub struct Driver {
    inbound: InboundDispatcher,
    outbound: OutboundDispatcher,
    coordinator: Option<SessionCoordinator>,
    clock: ClockHandle,
    config: DriverConfig,
}

impl Driver {
    pub fn new(inbound: InboundDispatcher, clock: ClockHandle) -> Self {
        let outbound = inbound.outbound();
        let coordinator = outbound.coordinator();
        Self {
            inbound,
            outbound,
            coordinator,
            clock,
            config: DriverConfig::default(),
        }
    }

    pub fn for_page(zone: &PageZone, clock: ClockHandle) -> Self {
        Self::new(zone.inbound.clone(), clock)
    }

    pub fn for_session(zone: &SessionZone, clock: ClockHandle) -> Self {
        Self::new(zone.inbound.clone(), clock)
    }

    pub fn with_config(mut self, config: DriverConfig) -> Self {
        self.config = config;
        self
    }

    /// Run until `shutdown` fires or every event sender is dropped. A page
    /// driver unloads its coordinator on the way out.
    pub async fn run(
        self,
        mut events: mpsc::UnboundedReceiver<MessageEvent>,
        mut shutdown: oneshot::Receiver<()>,
    ) -> DriverStats {
        let mut stats = DriverStats::default();
        let zone = self.outbound.zone();
        info!(zone = %zone, "driver started");

        loop {
            let wait = self.next_wait();
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    debug!(zone = %zone, "shutdown requested");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => {
                        stats.messages += 1;
                        self.inbound.on_message(event);
                    }
                    None => {
                        debug!(zone = %zone, "event channel closed");
                        break;
                    }
                },
                _ = tokio::time::sleep(wait) => {
                    stats.polls += 1;
                    stats.failed += self.outbound.poll_timeouts();
                }
            }
        }

        if let Some(coordinator) = &self.coordinator {
            coordinator.unload();
        }
        info!(zone = %zone, messages = stats.messages, failed = stats.failed, "driver stopped");
        stats
    }

    fn next_wait(&self) -> Duration {
        match self.outbound.next_deadline() {
            Some(deadline) => {
                Duration::from_millis(deadline.saturating_sub(self.clock.now_ms()))
            }
            None => self.config.idle_tick,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use framebridge_envelope::{encode, Envelope, EnvelopeWriter, Payload, Reply};
    use framebridge_schema::{AcceptAll, ValidatorRegistry};
    use framebridge_transport::MessageBus;
    use tokio::task::LocalSet;

    use super::*;
    use crate::error::RequestError;
    use crate::inbound::{HandlerTable, ZoneConfig};
    use crate::outbound::{OutboundConfig, Route};

    #[tokio::test(start_paused = true)]
    async fn driver_delivers_replies_and_fires_timeouts() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let bus = MessageBus::new();
                bus.open_window("page", "https://example.org/").unwrap();
                bus.open_window("remote", "https://remote.example.org/")
                    .unwrap();
                let clock: ClockHandle = Rc::new(TokioClock::starting_at(0));

                let mut validators = ValidatorRegistry::new();
                validators.register("FetchPage", AcceptAll);
                let outbound = OutboundDispatcher::new(
                    Route::Direct(EnvelopeWriter::new(
                        bus.port("page", "remote"),
                        "https://remote.example.org",
                    )),
                    Rc::new(validators),
                    OutboundConfig::default(),
                    clock.clone(),
                );
                let inbound = InboundDispatcher::new(outbound.clone(), clock.clone());
                inbound.configure(HandlerTable::new(), ZoneConfig::public("page"));

                let outcomes: Rc<RefCell<Vec<(u8, Result<Payload, RequestError>)>>> =
                    Rc::new(RefCell::new(Vec::new()));
                let first = Rc::clone(&outcomes);
                outbound.send_timeout(
                    "FetchPage",
                    Payload::new(),
                    Duration::from_millis(500),
                    move |outcome| first.borrow_mut().push((1, outcome)),
                );
                let second = Rc::clone(&outcomes);
                let answered = outbound
                    .send_timeout(
                        "FetchPage",
                        Payload::new(),
                        Duration::from_millis(500),
                        move |outcome| second.borrow_mut().push((2, outcome)),
                    )
                    .unwrap();

                let (events_tx, events_rx) = mpsc::unbounded_channel();
                let (shutdown_tx, shutdown_rx) = oneshot::channel();
                let reply = encode(&Envelope::Reply(Reply::success(answered, Payload::new())))
                    .unwrap();
                events_tx
                    .send(MessageEvent::new(
                        "https://remote.example.org",
                        reply,
                        bus.port("page", "remote"),
                    ))
                    .unwrap();

                let driver = Driver::new(inbound, clock.clone());
                let handle = tokio::task::spawn_local(driver.run(events_rx, shutdown_rx));

                tokio::time::sleep(Duration::from_millis(600)).await;
                shutdown_tx.send(()).unwrap();
                let stats = handle.await.unwrap();

                assert_eq!(stats.messages, 1);
                assert_eq!(stats.failed, 1);
                let outcomes = outcomes.borrow();
                assert_eq!(outcomes.len(), 2);
                assert_eq!(outcomes[0], (2, Ok(Payload::new())));
                assert_eq!(outcomes[1].0, 1);
                assert_eq!(outcomes[1].1.as_ref().unwrap_err().code(), "timeout");
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn driver_stops_when_senders_are_dropped() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let bus = MessageBus::new();
                bus.open_window("page", "https://example.org/").unwrap();
                let clock: ClockHandle = Rc::new(TokioClock::starting_at(0));
                let outbound = OutboundDispatcher::new(
                    Route::Direct(EnvelopeWriter::new(bus.port("page", "page"), "*")),
                    Rc::new(ValidatorRegistry::new()),
                    OutboundConfig::default(),
                    clock.clone(),
                );
                let inbound = InboundDispatcher::new(outbound, clock.clone());

                let (events_tx, events_rx) = mpsc::unbounded_channel::<MessageEvent>();
                let (_shutdown_tx, shutdown_rx) = oneshot::channel();
                drop(events_tx);

                let stats = Driver::new(inbound, clock)
                    .with_config(DriverConfig {
                        idle_tick: Duration::from_millis(50),
                    })
                    .run(events_rx, shutdown_rx)
                    .await;
                assert_eq!(stats.messages, 0);
            })
            .await;
    }
}
