//! Deterministic multi-tab simulation on the in-memory browser.
//!
//! Tabs are page zones; every session frame a tab inserts is booted as a
//! session zone as soon as it appears. Messages are pumped one at a time
//! in posting order, and time only moves through [`Simulation::advance`].

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use framebridge_envelope::Payload;
use framebridge_schema::ValidatorRegistry;
use framebridge_transport::{ManualClock, MemoryBrowser, SharedStore};
use tracing::{debug, trace};

use crate::error::Result;
use crate::inbound::{Dispatch, DropReason, HandlerTable};
use crate::outbound::{OutboundConfig, Outcome};
use crate::session::SessionConfig;
use crate::zone::{PageZone, SessionZone};

/// Builds the handler table of a freshly booted session frame; receives the
/// frame's window id.
pub type SessionHandlers = Rc<dyn Fn(&str) -> HandlerTable>;

/// Builds the validator registry of a newly opened tab.
pub type PageValidators = Rc<dyn Fn() -> ValidatorRegistry>;

/// Settings of a simulation run.
#[derive(Clone)]
pub struct SimulationConfig {
    pub page_origin: String,
    /// Start of the simulated clock in epoch-ms.
    pub start_ms: u64,
    pub session: SessionConfig,
    pub session_handlers: SessionHandlers,
    pub page_validators: PageValidators,
    pub page_outbound: OutboundConfig,
    /// Safety bound on messages pumped by one [`Simulation::run_until_idle`].
    pub max_steps: usize,
}

impl SimulationConfig {
    pub fn new(page_origin: impl Into<String>) -> Self {
        let page_origin = page_origin.into();
        Self {
            session: SessionConfig::new(page_origin.clone()),
            page_origin,
            start_ms: 1_700_000_000_000,
            session_handlers: Rc::new(|_frame: &str| HandlerTable::new()),
            page_validators: Rc::new(ValidatorRegistry::new),
            page_outbound: OutboundConfig::new("page"),
            max_steps: 10_000,
        }
    }
}

impl fmt::Debug for SimulationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulationConfig")
            .field("page_origin", &self.page_origin)
            .field("start_ms", &self.start_ms)
            .field("session", &self.session)
            .field("max_steps", &self.max_steps)
            .finish()
    }
}

/// Counters collected while pumping messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulationStats {
    pub delivered: usize,
    pub handled: usize,
    pub replies: usize,
    pub dropped: usize,
    pub frames_booted: usize,
}

pub struct Simulation {
    config: SimulationConfig,
    browser: MemoryBrowser,
    clock: ManualClock,
    tabs: BTreeMap<String, PageZone>,
    frames: BTreeMap<String, SessionZone>,
    stats: SimulationStats,
}

impl Simulation {
    pub fn new(config: SimulationConfig) -> Self {
        let clock = ManualClock::new(config.start_ms);
        Self {
            config,
            browser: MemoryBrowser::new(),
            clock,
            tabs: BTreeMap::new(),
            frames: BTreeMap::new(),
            stats: SimulationStats::default(),
        }
    }

    pub fn browser(&self) -> &MemoryBrowser {
        &self.browser
    }

    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    pub fn now_ms(&self) -> u64 {
        framebridge_transport::Clock::now_ms(&self.clock)
    }

    pub fn stats(&self) -> SimulationStats {
        self.stats
    }

    pub fn tab(&self, id: &str) -> Option<&PageZone> {
        self.tabs.get(id)
    }

    pub fn tab_ids(&self) -> Vec<&str> {
        self.tabs.keys().map(String::as_str).collect()
    }

    /// Window ids of every session frame booted so far.
    pub fn frame_ids(&self) -> Vec<&str> {
        self.frames.keys().map(String::as_str).collect()
    }

    /// Window id the session frame name currently resolves to.
    pub fn live_frame(&self) -> Option<String> {
        self.browser.named_window(&self.config.session.frame_name)
    }

    /// Raw heartbeat record, if any.
    pub fn heartbeat(&self) -> Option<String> {
        self.browser.store().get(&self.config.session.heartbeat_key)
    }

    /// Open a tab showing the page origin.
    pub fn open_tab(&mut self, id: &str) -> Result<PageZone> {
        let host = self
            .browser
            .open_tab(id, &format!("{}/", self.config.page_origin))?;
        let zone = PageZone::builder(self.config.page_origin.clone())
            .session_config(self.config.session.clone())
            .validators((self.config.page_validators)())
            .outbound_config(self.config.page_outbound.clone())
            .build(
                Rc::new(host),
                Rc::new(self.browser.store()),
                Rc::new(self.clock.clone()),
            );
        self.tabs.insert(id.to_string(), zone.clone());
        debug!(tab = id, "tab opened");
        Ok(zone)
    }

    /// Close a tab cleanly, removing its heartbeat if it owned the frame.
    pub fn unload_tab(&mut self, id: &str) {
        if let Some(zone) = self.tabs.remove(id) {
            zone.unload();
        }
        self.browser.close_tab(id);
    }

    /// Kill a tab without running its unload path.
    pub fn crash_tab(&mut self, id: &str) {
        self.tabs.remove(id);
        self.browser.close_tab(id);
    }

    /// Send from a tab, then pump until quiet.
    pub fn send<F>(&mut self, tab: &str, action: &str, data: Payload, on_done: F) -> Option<String>
    where
        F: FnOnce(Outcome) + 'static,
    {
        let zone = self.tabs.get(tab)?.clone();
        let id = zone.send(action, data, on_done);
        self.run_until_idle();
        id
    }

    /// Move the clock, fire timers in every tab and frame, then pump.
    pub fn advance(&mut self, ms: u64) {
        self.clock.advance(ms);
        let tabs: Vec<PageZone> = self.tabs.values().cloned().collect();
        for zone in tabs {
            zone.outbound.poll_timeouts();
        }
        let frames: Vec<SessionZone> = self.frames.values().cloned().collect();
        for zone in frames {
            zone.outbound.poll_timeouts();
        }
        self.run_until_idle();
    }

    /// Boot new frames and deliver queued messages until nothing is left.
    pub fn run_until_idle(&mut self) -> SimulationStats {
        for _ in 0..self.config.max_steps {
            self.boot_new_frame();
            let Some(delivery) = self.browser.bus().pop() else {
                break;
            };
            self.stats.delivered += 1;

            let dispatch = if let Some(zone) = self.tabs.get(&delivery.target) {
                zone.on_message(delivery.event)
            } else if let Some(zone) = self.frames.get(&delivery.target) {
                zone.on_message(delivery.event)
            } else {
                trace!(window = %delivery.target, "message for window without a zone");
                Dispatch::Dropped(DropReason::NotConfigured)
            };

            match dispatch {
                Dispatch::Handled | Dispatch::ActionNotFound => self.stats.handled += 1,
                Dispatch::ReplyForwarded => self.stats.replies += 1,
                Dispatch::Dropped(_) => self.stats.dropped += 1,
            }
        }
        self.stats
    }

    fn boot_new_frame(&mut self) {
        let Some(frame_id) = self.live_frame() else {
            return;
        };
        if self.frames.contains_key(&frame_id) {
            return;
        }
        let Some((parent, _)) = frame_id.split_once('/') else {
            return;
        };

        let port = self.browser.bus().port(&frame_id, parent);
        let zone = SessionZone::builder(self.config.page_origin.clone())
            .handlers((self.config.session_handlers)(&frame_id))
            .build(port, Rc::new(self.clock.clone()));
        zone.boot();
        self.frames.insert(frame_id.clone(), zone);
        self.stats.frames_booted += 1;
        debug!(frame = %frame_id, "session frame booted");
    }
}

impl fmt::Debug for Simulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Simulation")
            .field("tabs", &self.tab_ids())
            .field("frames", &self.frame_ids())
            .field("stats", &self.stats)
            .finish()
    }
}
