//! # tooth-core
//!
//! Shared domain library for Toothlink, a short-range radio pairing engine.
//!
//! One peer advertises itself and accepts a single incoming connection (the
//! *host*); the other scans, finds the host, and connects (the *client*).
//! This crate holds the vocabulary both roles share and has no dependency on
//! any radio driver:
//!
//! - **`domain`** – peers, service identifiers, the peer registry, and the
//!   state enums the engine publishes.
//! - **`session`** – the cloneable handle to a live byte stream, usable from
//!   any task and closable without blocking.

pub mod domain;
pub mod session;

// Re-export the most-used types so callers can write `tooth_core::Peer`.
pub use domain::peer::{
    decorate_host_name, is_host_name, strip_host_marker, Peer, PeerAddress, PeerError, HOST_MARKER,
};
pub use domain::registry::{PeerRegistry, RecordOutcome, DEFAULT_REGISTRY_CAPACITY};
pub use domain::service_id::{ServiceId, KNOWN_SERVICE_IDS};
pub use domain::state::{
    DiscoveryState, PowerState, ScanOutcome, SessionState, VisibilityState,
};
pub use session::{BoxedStream, PeerStream, Session};
