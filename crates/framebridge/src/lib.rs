//! Correlated cross-frame RPC with a single shared session frame per browser.
//!
//! A visible page proxies its work to a hidden session frame on a sibling
//! subdomain. Every tab of the browser shares one such frame, elected through
//! a heartbeat in shared storage.
//!
//! # Crate Structure
//!
//! - [`transport`]: browser facilities behind traits, origins, in-memory browser
//! - [`envelope`]: wire envelope codec and protocol constants
//! - [`schema`]: type checks and response validators (behind `schema` feature)
//! - [`peer`]: dispatchers, session coordination, simulation (behind `peer` feature)

/// Re-export transport types.
pub mod transport {
    pub use framebridge_transport::*;
}

/// Re-export envelope types.
pub mod envelope {
    pub use framebridge_envelope::*;
}

/// Re-export schema types (requires `schema` feature).
#[cfg(feature = "schema")]
pub mod schema {
    pub use framebridge_schema::*;
}

/// Re-export peer types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use framebridge_peer::*;
}
