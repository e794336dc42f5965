//! Application layer: the controllers and the orchestration facade.
//!
//! # What lives here? (for beginners)
//!
//! Every type in this layer depends only on the [`Radio`] trait, never on a
//! concrete transport, so the whole engine runs unchanged against real
//! hardware, the in-process loopback airspace, or a `mockall` double.
//!
//! Leaf-first:
//!
//! - **`power`** – captures the radio's pre-engine power state and restores
//!   it on graceful shutdown.
//! - **`discovery`** – drives inquiry scans, records peers in the registry,
//!   and powers the radio down after an idle grace period.
//! - **`visibility`** – fixed and self-renewing discoverability windows.
//! - **`client_handshake`** – one outbound connection attempt.
//! - **`server_handshake`** – one listening activation that accepts exactly
//!   one peer and restores the advertised name on shutdown.
//! - **`message_listener`** – background reader that turns a session's
//!   byte stream into message callbacks.
//! - **`orchestrator`** – the facade composing all of the above into the
//!   host (`teeth`) and client (`tooth`) workflows.
//!
//! [`Radio`]: crate::infrastructure::radio::Radio

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tooth_core::{ServiceId, DEFAULT_REGISTRY_CAPACITY};

pub mod callbacks;
pub mod client_handshake;
pub mod discovery;
pub mod message_listener;
pub mod orchestrator;
pub mod power;
pub mod server_handshake;
pub mod visibility;

/// Longest visibility window a single request may ask for, in seconds.
pub const MAX_VISIBILITY_SECS: u32 = 300;
/// Idle time after a non-keep-alive scan before the radio is powered down.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Error type for engine lifecycle operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The device has no radio adapter.
    #[error("no radio adapter found")]
    AdapterNotFound,

    /// The adapter exists but refused to power on.
    #[error("radio adapter refused to power on")]
    PowerOnFailed,
}

/// Tunables for the engine, usually built from the on-disk config.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub grace_period: Duration,
    pub max_visibility: Duration,
    pub registry_capacity: usize,
    pub default_service: ServiceId,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            grace_period: DEFAULT_GRACE_PERIOD,
            max_visibility: Duration::from_secs(u64::from(MAX_VISIBILITY_SECS)),
            registry_capacity: DEFAULT_REGISTRY_CAPACITY,
            default_service: ServiceId::default(),
        }
    }
}

/// Locks a std mutex, recovering the data if a panicking thread poisoned it.
///
/// Every critical section in this crate leaves its data consistent before
/// calling out, so a poisoned lock still guards valid state.
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
