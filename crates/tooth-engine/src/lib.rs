//! tooth-engine library entry point.
//!
//! The pairing engine: discovery, visibility, host and client handshakes,
//! and the [`Orchestrator`] facade that composes them.  Everything talks to
//! the radio through the [`Radio`] trait; [`Airspace`] provides an
//! in-process implementation for tests and the `toothd` demo.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tooth_core::PeerAddress;
//! use tooth_engine::{Airspace, EngineSettings, Orchestrator, TeethRequest};
//!
//! # #[tokio::main] async fn main() {
//! let air = Airspace::new();
//! let radio = air.add_radio(PeerAddress::from_octets([2, 0, 0, 0, 0, 1]), "phone");
//! let engine = Orchestrator::init(Arc::new(radio), EngineSettings::default()).unwrap();
//! engine.teeth(TeethRequest {
//!     name: Some("HOST1".into()),
//!     ..TeethRequest::default()
//! });
//! # }
//! ```
//!
//! [`Radio`]: infrastructure::radio::Radio
//! [`Airspace`]: infrastructure::radio::loopback::Airspace

pub mod application;
pub mod infrastructure;

pub use application::callbacks::{ErrorCallback, Notify, PeerCallback, SessionCallback, Subscription};
pub use application::client_handshake::{ClientHandshake, HandshakeError};
pub use application::discovery::{DiscoveryController, DiscoveryEvent};
pub use application::message_listener::{send_message, MessageCallback, MessageListener};
pub use application::orchestrator::{Orchestrator, ScanRequest, TeethRequest, ToothRequest};
pub use application::power::{PowerManager, PowerOff};
pub use application::server_handshake::{ServerActivation, ServerHandshake, ServerLifecycle};
pub use application::visibility::{VisibilityController, VisibilityWindow};
pub use application::{EngineError, EngineSettings, DEFAULT_GRACE_PERIOD, MAX_VISIBILITY_SECS};
pub use infrastructure::radio::loopback::{Airspace, LoopbackConfig, LoopbackRadio};
pub use infrastructure::radio::{ListeningChannel, Radio, RadioEvent, TransportError};
