use std::fmt;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::Result;

/// A window that can receive posted messages.
///
/// In a browser this wraps a `WindowProxy` (an iframe's `contentWindow`, the
/// parent window, or the result of a named-window lookup). Posting never
/// blocks and never delivers synchronously: the receiver sees the message on
/// a later turn of its own event loop.
pub trait FramePort {
    /// Post a serialized envelope to the window behind this port.
    ///
    /// `target_origin` is enforced by the receiving side of the browser: if
    /// the window's current origin differs, the message is silently dropped.
    fn post_message(&self, data: &str, target_origin: &str) -> Result<()>;

    /// Location of the document currently loaded in the window.
    ///
    /// `None` means the window is gone. `Some("about:blank")` means the name
    /// resolved to an empty window, which is how a crashed or closed owner
    /// tab shows up after a named lookup.
    fn location(&self) -> Option<String>;

    /// Identity of the window behind this port. Ports reaching the same
    /// window report the same id, so a message's `source` can be compared
    /// with a port obtained earlier.
    fn window_id(&self) -> &str;
}

/// Shared, reference-counted port handle.
pub type PortHandle = Rc<dyn FramePort>;

/// A message delivered to a window.
#[derive(Clone)]
pub struct MessageEvent {
    /// Origin of the window that posted the message, as reported by the browser.
    pub origin: String,
    /// The raw posted string.
    pub data: String,
    /// Port back to the sender, used to post correlated replies.
    pub source: PortHandle,
}

impl MessageEvent {
    pub fn new(origin: impl Into<String>, data: impl Into<String>, source: PortHandle) -> Self {
        Self {
            origin: origin.into(),
            data: data.into(),
            source,
        }
    }
}

impl fmt::Debug for MessageEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageEvent")
            .field("origin", &self.origin)
            .field("data_len", &self.data.len())
            .finish()
    }
}

/// Access to the windows of the browser process hosting this tab.
pub trait WindowHost {
    /// Resolve a window by its name across every tab of the browser.
    ///
    /// Returns `None` when no window with that name exists.
    fn find_named_frame(&self, name: &str) -> Option<PortHandle>;

    /// Insert a hidden frame with the given window name loading `src`.
    fn create_hidden_frame(&self, name: &str, src: &str) -> Result<PortHandle>;
}

/// Browser-wide key-value storage shared by all tabs of one origin
/// (`localStorage` in a browser).
///
/// Reads and writes are individually atomic but there is no compare-and-set:
/// two tabs can interleave freely.
pub trait SharedStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str);
}

/// Wall clock in epoch milliseconds.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

/// Clock backed by [`SystemTime`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Shared clock handle.
pub type ClockHandle = Rc<dyn Clock>;
