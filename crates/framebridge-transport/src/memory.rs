//! In-process model of a browser: windows, posted-message queue, named
//! frame registry, shared storage and a manual clock.
//!
//! Posting only enqueues; the owner of the bus pumps deliveries one at a
//! time, mirroring how `postMessage` schedules a task on the receiver.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use tracing::{debug, trace};

use crate::error::{Result, TransportError};
use crate::origin::Origin;
use crate::traits::{Clock, FramePort, MessageEvent, PortHandle, SharedStore, WindowHost};

const BLANK_LOCATION: &str = "about:blank";

/// A message waiting to be delivered to `target`.
#[derive(Debug)]
pub struct Delivery {
    /// Window id of the receiver.
    pub target: String,
    pub event: MessageEvent,
}

#[derive(Default)]
struct BusState {
    windows: HashMap<String, WindowState>,
    queue: VecDeque<Delivery>,
    dropped: usize,
}

struct WindowState {
    origin: Option<Origin>,
    location: Option<String>,
}

/// Queue of posted messages between in-memory windows.
#[derive(Clone, Default)]
pub struct MessageBus {
    inner: Rc<RefCell<BusState>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a window with id `id` showing `location`.
    pub fn open_window(&self, id: &str, location: &str) -> Result<()> {
        let origin = if location == BLANK_LOCATION {
            None
        } else {
            Some(Origin::parse(location)?)
        };
        self.inner.borrow_mut().windows.insert(
            id.to_string(),
            WindowState {
                origin,
                location: Some(location.to_string()),
            },
        );
        Ok(())
    }

    /// Close a window. Messages posted to it afterwards are dropped.
    pub fn close_window(&self, id: &str) {
        if let Some(window) = self.inner.borrow_mut().windows.get_mut(id) {
            window.location = None;
            window.origin = None;
        }
    }

    /// Replace a window's document with an empty one.
    pub fn blank_window(&self, id: &str) {
        if let Some(window) = self.inner.borrow_mut().windows.get_mut(id) {
            window.location = Some(BLANK_LOCATION.to_string());
            window.origin = None;
        }
    }

    /// Port through which window `from` posts to window `to`.
    pub fn port(&self, from: &str, to: &str) -> PortHandle {
        Rc::new(MemoryPort {
            bus: self.clone(),
            from: from.to_string(),
            to: to.to_string(),
        })
    }

    /// Take the oldest undelivered message.
    pub fn pop(&self) -> Option<Delivery> {
        self.inner.borrow_mut().queue.pop_front()
    }

    /// Number of queued messages.
    pub fn pending(&self) -> usize {
        self.inner.borrow().queue.len()
    }

    /// Number of messages the browser discarded (closed target, origin mismatch).
    pub fn dropped(&self) -> usize {
        self.inner.borrow().dropped
    }

    fn close_prefixed(&self, prefix: &str) {
        let ids: Vec<String> = self
            .inner
            .borrow()
            .windows
            .keys()
            .filter(|id| id.starts_with(prefix))
            .cloned()
            .collect();
        for id in ids {
            self.close_window(&id);
        }
    }
}

struct MemoryPort {
    bus: MessageBus,
    from: String,
    to: String,
}

impl FramePort for MemoryPort {
    fn post_message(&self, data: &str, target_origin: &str) -> Result<()> {
        let mut state = self.bus.inner.borrow_mut();

        let sender_origin = match state.windows.get(&self.from) {
            Some(WindowState {
                location: Some(_),
                origin,
            }) => origin
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "null".to_string()),
            _ => return Err(TransportError::WindowClosed(self.from.clone())),
        };

        let deliverable = match state.windows.get(&self.to) {
            Some(WindowState {
                location: Some(_),
                origin,
            }) => {
                target_origin == "*"
                    || origin
                        .as_ref()
                        .is_some_and(|origin| origin.matches(target_origin))
            }
            _ => false,
        };

        if !deliverable {
            state.dropped += 1;
            debug!(from = %self.from, to = %self.to, target_origin, "browser dropped posted message");
            return Ok(());
        }

        trace!(from = %self.from, to = %self.to, size = data.len(), "message queued");
        let reply_port: PortHandle = Rc::new(MemoryPort {
            bus: self.bus.clone(),
            from: self.to.clone(),
            to: self.from.clone(),
        });
        state.queue.push_back(Delivery {
            target: self.to.clone(),
            event: MessageEvent::new(sender_origin, data, reply_port),
        });
        Ok(())
    }

    fn location(&self) -> Option<String> {
        self.bus
            .inner
            .borrow()
            .windows
            .get(&self.to)
            .and_then(|window| window.location.clone())
    }

    fn window_id(&self) -> &str {
        &self.to
    }
}

/// Browser-wide storage map, cloned handles share the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Rc<RefCell<HashMap<String, String>>>,
    read_only: Rc<Cell<bool>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail, as with a full or disabled store.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.set(read_only);
    }
}

impl SharedStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.borrow().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        if self.read_only.get() {
            return Err(TransportError::Storage {
                key: key.to_string(),
                reason: "store is read-only".to_string(),
            });
        }
        self.entries
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) {
        self.entries.borrow_mut().remove(key);
    }
}

/// Settable clock shared between every component of a test or simulation.
#[derive(Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<u64>>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: Rc::new(Cell::new(start_ms)),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get().saturating_add(ms));
    }

    pub fn set(&self, ms: u64) {
        self.now.set(ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }
}

/// A browser process: one message bus, one shared store and one registry
/// of named windows, shared by every tab opened from it.
#[derive(Clone, Default)]
pub struct MemoryBrowser {
    bus: MessageBus,
    store: MemoryStore,
    names: Rc<RefCell<HashMap<String, String>>>,
}

impl MemoryBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    pub fn store(&self) -> MemoryStore {
        self.store.clone()
    }

    /// Open a top-level tab showing `location`.
    pub fn open_tab(&self, id: &str, location: &str) -> Result<MemoryWindowHost> {
        self.bus.open_window(id, location)?;
        Ok(MemoryWindowHost {
            bus: self.bus.clone(),
            tab: id.to_string(),
            names: Rc::clone(&self.names),
            block_frames: Cell::new(false),
        })
    }

    /// Close a tab together with every frame it inserted.
    pub fn close_tab(&self, id: &str) {
        self.bus.close_window(id);
        self.bus.close_prefixed(&format!("{id}/"));
    }

    /// Window id currently registered under `name`.
    pub fn named_window(&self, name: &str) -> Option<String> {
        self.names.borrow().get(name).cloned()
    }
}

/// [`WindowHost`] for one tab of a [`MemoryBrowser`].
pub struct MemoryWindowHost {
    bus: MessageBus,
    tab: String,
    names: Rc<RefCell<HashMap<String, String>>>,
    block_frames: Cell<bool>,
}

impl MemoryWindowHost {
    /// Window id of this tab.
    pub fn tab_id(&self) -> &str {
        &self.tab
    }

    /// Make frame insertion fail, as when a content blocker rejects it.
    pub fn block_frames(&self, block: bool) {
        self.block_frames.set(block);
    }

    /// Window id a frame named `name` created by this tab receives.
    pub fn frame_id(&self, name: &str) -> String {
        format!("{}/{name}", self.tab)
    }
}

impl WindowHost for MemoryWindowHost {
    fn find_named_frame(&self, name: &str) -> Option<PortHandle> {
        let id = self.names.borrow().get(name).cloned()?;
        Some(self.bus.port(&self.tab, &id))
    }

    fn create_hidden_frame(&self, name: &str, src: &str) -> Result<PortHandle> {
        if self.block_frames.get() {
            return Err(TransportError::FrameCreation {
                name: name.to_string(),
                reason: "frame insertion blocked".to_string(),
            });
        }
        let id = self.frame_id(name);
        self.bus
            .open_window(&id, src)
            .map_err(|err| TransportError::FrameCreation {
                name: name.to_string(),
                reason: err.to_string(),
            })?;
        self.names.borrow_mut().insert(name.to_string(), id.clone());
        debug!(tab = %self.tab, frame = %id, "hidden frame inserted");
        Ok(self.bus.port(&self.tab, &id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn posted_messages_are_queued_with_sender_origin() {
        let bus = MessageBus::new();
        bus.open_window("page", "https://example.org/").unwrap();
        bus.open_window("frame", "https://domus.example.org/").unwrap();

        let port = bus.port("page", "frame");
        port.post_message("hello", "https://domus.example.org")
            .unwrap();

        assert_eq!(bus.pending(), 1);
        let delivery = bus.pop().unwrap();
        assert_eq!(delivery.target, "frame");
        assert_eq!(delivery.event.origin, "https://example.org");
        assert_eq!(delivery.event.data, "hello");
        assert_eq!(delivery.event.source.window_id(), "page");
        assert_eq!(port.window_id(), "frame");

        delivery.event.source.post_message("back", "*").unwrap();
        let reply = bus.pop().unwrap();
        assert_eq!(reply.target, "page");
        assert_eq!(reply.event.origin, "https://domus.example.org");
    }

    #[test]
    fn origin_mismatch_and_closed_target_are_dropped() {
        let bus = MessageBus::new();
        bus.open_window("page", "https://example.org/").unwrap();
        bus.open_window("frame", "https://domus.example.org/").unwrap();
        let port = bus.port("page", "frame");

        port.post_message("x", "https://other.example.org").unwrap();
        bus.close_window("frame");
        port.post_message("y", "*").unwrap();

        assert_eq!(bus.pending(), 0);
        assert_eq!(bus.dropped(), 2);
        assert!(port.location().is_none());
    }

    #[test]
    fn closed_sender_cannot_post() {
        let bus = MessageBus::new();
        bus.open_window("page", "https://example.org/").unwrap();
        bus.open_window("frame", "https://domus.example.org/").unwrap();
        let port = bus.port("page", "frame");
        bus.close_window("page");

        assert!(matches!(
            port.post_message("x", "*"),
            Err(TransportError::WindowClosed(_))
        ));
    }

    #[test]
    fn named_frames_are_visible_across_tabs() {
        let browser = MemoryBrowser::new();
        let first = browser.open_tab("tab-1", "https://example.org/").unwrap();
        let second = browser.open_tab("tab-2", "https://example.org/").unwrap();

        assert!(second.find_named_frame("session").is_none());
        first
            .create_hidden_frame("session", "https://domus.example.org/frame")
            .unwrap();

        let found = second.find_named_frame("session").unwrap();
        assert_eq!(
            found.location().as_deref(),
            Some("https://domus.example.org/frame")
        );

        browser.close_tab("tab-1");
        let found = second.find_named_frame("session").unwrap();
        assert!(found.location().is_none());
    }

    #[test]
    fn blocked_frame_creation_fails() {
        let browser = MemoryBrowser::new();
        let tab = browser.open_tab("tab-1", "https://example.org/").unwrap();
        tab.block_frames(true);
        assert!(matches!(
            tab.create_hidden_frame("session", "https://domus.example.org/"),
            Err(TransportError::FrameCreation { .. })
        ));
        assert!(browser.named_window("session").is_none());
    }

    #[test]
    fn store_and_clock_are_shared_between_clones() {
        let store = MemoryStore::new();
        let other = store.clone();
        store.set("k", "v").unwrap();
        assert_eq!(other.get("k").as_deref(), Some("v"));
        other.remove("k");
        assert!(store.get("k").is_none());

        store.set_read_only(true);
        assert!(matches!(
            other.set("k", "v"),
            Err(TransportError::Storage { .. })
        ));

        let clock = ManualClock::new(100);
        let shared = clock.clone();
        clock.advance(50);
        assert_eq!(shared.now_ms(), 150);
        shared.set(10);
        assert_eq!(clock.now_ms(), 10);
    }
}
