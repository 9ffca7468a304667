//! Ready-wired zones: the page side of a tab and the session frame.

use std::rc::Rc;

use framebridge_envelope::{EnvelopeWriter, Payload};
use framebridge_schema::ValidatorRegistry;
use framebridge_transport::{ClockHandle, MessageEvent, PortHandle, SharedStore, WindowHost};

use crate::control::{
    announce_ready, register_control_validators, register_page_controls,
    register_session_controls,
};
use crate::inbound::{Dispatch, HandlerTable, InboundDispatcher, ZoneConfig};
use crate::outbound::{OutboundConfig, OutboundDispatcher, Outcome, Route};
use crate::session::{SessionConfig, SessionCoordinator};

/// A visible page: requests go through the tab's session coordinator and
/// only the session domain may post back.
#[derive(Debug, Clone)]
pub struct PageZone {
    pub coordinator: SessionCoordinator,
    pub outbound: OutboundDispatcher,
    pub inbound: InboundDispatcher,
}

impl PageZone {
    pub fn builder(page_origin: impl Into<String>) -> PageZoneBuilder {
        let page_origin = page_origin.into();
        PageZoneBuilder {
            session: SessionConfig::new(page_origin.clone()),
            zone: ZoneConfig::page(page_origin),
            outbound: OutboundConfig::new("page"),
            validators: ValidatorRegistry::new(),
            handlers: HandlerTable::new(),
        }
    }

    pub fn send<F>(&self, action: &str, data: Payload, on_done: F) -> Option<String>
    where
        F: FnOnce(Outcome) + 'static,
    {
        self.outbound.send(action, data, on_done)
    }

    pub fn on_message(&self, event: MessageEvent) -> Dispatch {
        self.inbound.on_message(event)
    }

    /// Clean unload of the tab.
    pub fn unload(&self) {
        self.coordinator.unload();
    }
}

pub struct PageZoneBuilder {
    session: SessionConfig,
    zone: ZoneConfig,
    outbound: OutboundConfig,
    validators: ValidatorRegistry,
    handlers: HandlerTable,
}

impl PageZoneBuilder {
    pub fn session_config(mut self, session: SessionConfig) -> Self {
        self.zone.base_origin = session.page_origin.clone();
        self.zone.subdomain = session.subdomain.clone();
        self.zone.envelope = session.envelope;
        self.session = session;
        self
    }

    pub fn zone_config(mut self, zone: ZoneConfig) -> Self {
        self.zone = zone;
        self
    }

    pub fn outbound_config(mut self, outbound: OutboundConfig) -> Self {
        self.outbound = outbound;
        self
    }

    pub fn validators(mut self, validators: ValidatorRegistry) -> Self {
        self.validators = validators;
        self
    }

    /// Handlers for requests the session frame sends to the page.
    pub fn handlers(mut self, handlers: HandlerTable) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn build(
        self,
        host: Rc<dyn WindowHost>,
        store: Rc<dyn SharedStore>,
        clock: ClockHandle,
    ) -> PageZone {
        let Self {
            session,
            zone,
            outbound,
            mut validators,
            mut handlers,
        } = self;

        register_control_validators(&mut validators);
        let coordinator = SessionCoordinator::new(session, host, store, clock.clone());
        let outbound = OutboundDispatcher::new(
            Route::Session(coordinator.clone()),
            Rc::new(validators),
            outbound,
            clock.clone(),
        );
        let inbound = InboundDispatcher::new(outbound.clone(), clock);
        register_page_controls(&mut handlers, &coordinator, &outbound);
        inbound.configure(handlers, zone);

        PageZone {
            coordinator,
            outbound,
            inbound,
        }
    }
}

/// The hidden session frame: serves pages of the base origin and talks
/// directly to the page that created it.
#[derive(Debug, Clone)]
pub struct SessionZone {
    pub outbound: OutboundDispatcher,
    pub inbound: InboundDispatcher,
}

impl SessionZone {
    pub fn builder(page_origin: impl Into<String>) -> SessionZoneBuilder {
        SessionZoneBuilder {
            zone: ZoneConfig::session(page_origin),
            outbound: OutboundConfig::new("session"),
            validators: ValidatorRegistry::new(),
            handlers: HandlerTable::new(),
        }
    }

    /// Announce readiness to the parent page.
    pub fn boot(&self) -> Option<String> {
        announce_ready(&self.outbound)
    }

    pub fn on_message(&self, event: MessageEvent) -> Dispatch {
        self.inbound.on_message(event)
    }
}

pub struct SessionZoneBuilder {
    zone: ZoneConfig,
    outbound: OutboundConfig,
    validators: ValidatorRegistry,
    handlers: HandlerTable,
}

impl SessionZoneBuilder {
    pub fn zone_config(mut self, zone: ZoneConfig) -> Self {
        self.zone = zone;
        self
    }

    pub fn outbound_config(mut self, outbound: OutboundConfig) -> Self {
        self.outbound = outbound;
        self
    }

    /// Validators for replies to requests the frame sends to pages.
    pub fn validators(mut self, validators: ValidatorRegistry) -> Self {
        self.validators = validators;
        self
    }

    pub fn handlers(mut self, handlers: HandlerTable) -> Self {
        self.handlers = handlers;
        self
    }

    /// Wire the zone; `parent` is the port to the page that created the frame.
    pub fn build(self, parent: PortHandle, clock: ClockHandle) -> SessionZone {
        let Self {
            zone,
            outbound,
            mut validators,
            mut handlers,
        } = self;

        register_control_validators(&mut validators);
        let parent = EnvelopeWriter::with_config(parent, zone.base_origin.clone(), zone.envelope);
        let outbound = OutboundDispatcher::new(
            Route::Direct(parent),
            Rc::new(validators),
            outbound,
            clock.clone(),
        );
        let inbound = InboundDispatcher::new(outbound.clone(), clock);
        register_session_controls(&mut handlers, &outbound);
        inbound.configure(handlers, zone);

        SessionZone { outbound, inbound }
    }
}
