//! Browser frame messaging abstraction.
//!
//! Everything the protocol layers need from the browser sits behind a small
//! trait here:
//! - [`FramePort`]: `postMessage` to another window
//! - [`WindowHost`]: named window lookup and hidden frame insertion
//! - [`SharedStore`]: tab-shared key-value storage
//! - [`Clock`]: wall-clock time in epoch milliseconds
//!
//! This is the lowest layer of framebridge. The [`memory`] module provides an
//! in-process browser used by tests, the simulator, and native hosts.

pub mod error;
pub mod memory;
pub mod origin;
pub mod traits;

pub use error::{Result, TransportError};
pub use memory::{
    Delivery, ManualClock, MemoryBrowser, MemoryStore, MemoryWindowHost, MessageBus,
};
pub use origin::{session_origin, Origin};
pub use traits::{
    Clock, ClockHandle, FramePort, MessageEvent, PortHandle, SharedStore, SystemClock, WindowHost,
};
