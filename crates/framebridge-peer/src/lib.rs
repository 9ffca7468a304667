//! Request/reply correlation, zone dispatch and single-session coordination.
//!
//! A page zone sends requests through its tab's [`SessionCoordinator`], which
//! makes sure exactly one hidden session frame serves every tab of the
//! origin. The session zone answers them and can call back into pages. All
//! handles are single-threaded; drive them from a browser-style event loop,
//! the deterministic [`Simulation`], or the tokio [`Driver`] behind the
//! `async` feature.

pub mod control;
#[cfg(any(feature = "async", test))]
pub mod driver;
pub mod error;
pub mod inbound;
pub mod outbound;
pub mod pending;
pub mod session;
pub mod sim;
pub mod zone;

pub use control::{announce_ready, register_control_validators};
#[cfg(any(feature = "async", test))]
pub use driver::{Driver, DriverConfig, DriverStats, TokioClock};
pub use error::{PeerError, RequestError, Result};
pub use inbound::{
    ActionHandler, Dispatch, DropReason, HandlerContext, HandlerTable, InboundDispatcher,
    OriginPolicy, ZoneConfig,
};
pub use outbound::{
    ErrorCallback, NavigationGeneration, OutboundConfig, OutboundDispatcher, Outcome, Route,
};
pub use pending::{PendingRecord, PendingTable};
pub use session::{SessionConfig, SessionCoordinator, SessionState};
pub use sim::{Simulation, SimulationConfig, SimulationStats};
pub use zone::{PageZone, PageZoneBuilder, SessionZone, SessionZoneBuilder};
