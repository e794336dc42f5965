//! Infrastructure layer: adapters to the outside world.
//!
//! - **`radio`** – the transport seam the application layer consumes, plus
//!   the in-process loopback implementation.
//! - **`storage`** – TOML configuration persistence.
//!
//! **Dependency rule**: the application layer sees only the traits in
//! `radio`; it never names a concrete transport.

pub mod radio;
pub mod storage;
