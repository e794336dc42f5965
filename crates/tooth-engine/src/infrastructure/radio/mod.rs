//! Radio transport seam.
//!
//! The engine never talks to hardware directly.  Everything it needs from a
//! short-range radio stack is listed on the [`Radio`] trait: power control,
//! inquiry scans, the advertised name, the visibility window, and stream
//! sockets bound to a [`ServiceId`].
//!
//! # Event stream
//!
//! Scans and power changes are asynchronous on every real stack: the call
//! returns immediately and the outcome arrives later as an event.  A radio
//! publishes [`RadioEvent`]s on a `tokio::sync::broadcast` channel; each
//! consumer calls [`Radio::subscribe`] and drains its own receiver.
//!
//! # Testability
//!
//! [`loopback::Airspace`] simulates any number of radios inside one process
//! and is what the integration tests and the `toothd` demo run against.  Unit
//! tests that only need to script a handful of calls use the `mockall`
//! generated `MockRadio`.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;
use tooth_core::{BoxedStream, PeerAddress, PowerState, ServiceId};

pub mod loopback;

/// Error type for transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The adapter is absent or powered off.
    #[error("radio adapter is unavailable or powered off")]
    Unavailable,

    /// The remote channel is occupied by another connection.
    #[error("channel busy")]
    Busy,

    /// Nothing is listening under the requested service on the peer.
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    /// The listening channel was closed while a call was in flight.
    #[error("channel closed")]
    Closed,

    /// Any other stream-level failure.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// An event published by the radio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    ScanStarted,
    ScanFinished,
    /// A peer answered the inquiry scan.
    ///
    /// The address is raw text as reported by the stack; it may be empty or
    /// malformed and is validated by the consumer.
    PeerFound {
        address: String,
        name: Option<String>,
    },
    PowerChanged(PowerState),
}

/// A listening socket published under one service identifier.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ListeningChannel: Send + Sync {
    /// Blocks until a peer connects or the channel is closed.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] once [`close`](Self::close) has
    /// been called, from any task.
    async fn accept(&self) -> Result<(BoxedStream, PeerAddress), TransportError>;

    /// Closes the channel and wakes a pending [`accept`](Self::accept).
    /// Idempotent.
    fn close(&self);

    fn service_id(&self) -> ServiceId;
}

/// Capabilities the engine consumes from a radio stack.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Radio: Send + Sync {
    /// Returns `false` when the device has no adapter at all.
    fn exists(&self) -> bool;

    fn is_enabled(&self) -> bool;

    /// Requests power-on.  Completion is reported as
    /// `PowerChanged(PowerState::On)`.
    fn enable(&self) -> bool;

    /// Requests power-off.  Returns `false` if the stack refused.
    fn disable(&self) -> bool;

    /// Starts an inquiry scan.  Returns `false` if the stack refused.
    fn start_scan(&self) -> bool;

    /// Cancels the running inquiry scan.
    fn cancel_scan(&self) -> bool;

    fn is_scanning(&self) -> bool;

    /// Returns a fresh receiver on the radio's event stream.
    fn subscribe(&self) -> broadcast::Receiver<RadioEvent>;

    fn set_advertised_name(&self, name: &str) -> bool;

    fn advertised_name(&self) -> String;

    /// Asks for the device to answer scans for `duration`.
    ///
    /// On real stacks this is gated by user consent; the grant is not
    /// reported back to the caller.
    fn request_visibility(&self, duration: Duration);

    /// Publishes a listening channel under `service_id`, registered in the
    /// local service directory as `channel_name`.
    async fn listen(
        &self,
        service_id: ServiceId,
        channel_name: &str,
    ) -> Result<Box<dyn ListeningChannel>, TransportError>;

    /// Opens a stream to the channel published under `service_id` on the
    /// peer at `address`.
    async fn connect(
        &self,
        address: &PeerAddress,
        service_id: ServiceId,
    ) -> Result<BoxedStream, TransportError>;

    /// Privileged unpair call.  Returns `true` if a bond was removed.
    fn remove_bond(&self, address: &PeerAddress) -> bool;
}
