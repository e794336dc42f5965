//! Pure domain types for the pairing engine.
//!
//! Nothing in this module touches a radio, a socket, or the clock beyond
//! stamping discovery times.
//!
//! - **`peer`** – hardware addresses, display names, and the host-marker
//!   naming convention.
//! - **`service_id`** – the 128-bit rendezvous identifier and its table of
//!   well-known values.
//! - **`registry`** – the bounded cache of discovered peers.
//! - **`state`** – small state enums published by the engine's controllers.

pub mod peer;
pub mod registry;
pub mod service_id;
pub mod state;
