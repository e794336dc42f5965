//! ClientHandshake: one outbound connection attempt toward a peer.
//!
//! # Lifecycle (for beginners)
//!
//! The handshake builds its socket handle (a [`Session`] with no stream yet)
//! the moment it is created, so callers can grab the handle before the
//! connection exists.  [`ClientHandshake::connect`] then runs the actual
//! connect as one background task:
//!
//! ```text
//!            connect() ok                 close()
//! Connecting ────────────────► Connected ─────────► Closed
//!     │                                               ▲
//!     │ connect() error                               │ close()
//!     ▼                                               │
//!   Failed ◄── close() keeps Failed        Connecting ┘
//! ```
//!
//! A failed attempt releases the partial socket before the error callback
//! runs, so the caller never holds a half-open handle.
//!
//! Construction is fallible in the same way it is on real stacks: with the
//! radio off there is no socket yet.  The background connect retries the
//! construction once before giving up.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tooth_core::{Peer, PeerAddress, ServiceId, Session, SessionState};
use tracing::{debug, info, warn};

use super::callbacks::{ErrorCallback, SessionCallback, Slot, Subscription};
use super::lock;
use crate::infrastructure::radio::{Radio, TransportError};

/// Error type for client handshakes.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// The transport refused or failed the connect.
    #[error("handshake transport failure: {0}")]
    Transport(#[from] TransportError),

    /// The handshake ended before a socket handle existed.
    #[error("no socket available for {0}")]
    SocketUnavailable(PeerAddress),

    /// [`ClientHandshake::socket`] gave up waiting.
    #[error("timed out waiting for the socket handle")]
    Timeout,
}

pub struct ClientHandshake {
    me: Weak<Self>,
    peer: Peer,
    radio: Arc<dyn Radio>,
    service_id: Mutex<ServiceId>,
    socket: watch::Sender<Option<Session>>,
    state: watch::Sender<SessionState>,
    connected: Slot<dyn Fn(Session) + Send + Sync>,
    failed: Slot<dyn Fn(HandshakeError) + Send + Sync>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ClientHandshake {
    /// Creates the handshake and eagerly builds its socket handle.
    ///
    /// A construction failure is logged, not returned: the handshake still
    /// exists and [`connect`](Self::connect) retries.
    pub fn new(peer: Peer, service_id: ServiceId, radio: Arc<dyn Radio>) -> Arc<Self> {
        let handshake = Arc::new_cyclic(|me| Self {
            me: me.clone(),
            peer,
            radio,
            service_id: Mutex::new(service_id),
            socket: watch::channel(None).0,
            state: watch::channel(SessionState::Connecting).0,
            connected: Slot::new(),
            failed: Slot::new(),
            task: Mutex::new(None),
        });
        if let Err(e) = handshake.init_socket() {
            warn!(peer = %handshake.peer.address, error = %e, "socket construction failed");
        }
        handshake
    }

    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    pub fn service_id(&self) -> ServiceId {
        *lock(&self.service_id)
    }

    /// Rebinds the handshake to `service_id`, rebuilding the socket handle.
    ///
    /// The old handle is closed.  Has no effect on an attempt already in
    /// flight.
    pub fn set_service_id(&self, service_id: ServiceId) {
        *lock(&self.service_id) = service_id;
        if let Err(e) = self.init_socket() {
            warn!(peer = %self.peer.address, %service_id, error = %e, "socket rebuild failed");
        }
    }

    pub fn on_connected(&self, callback: SessionCallback) -> Subscription<dyn Fn(Session) + Send + Sync> {
        self.connected.set(callback)
    }

    pub fn on_error(&self, callback: ErrorCallback) -> Subscription<dyn Fn(HandshakeError) + Send + Sync> {
        self.failed.set(callback)
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// The current socket handle, if one has been built.
    pub fn session(&self) -> Option<Session> {
        self.socket.borrow().clone()
    }

    /// Returns `true` while the background connect is in flight.
    pub fn is_running(&self) -> bool {
        lock(&self.task)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Waits for the socket handle to exist (not for the connection).
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError::SocketUnavailable`] if the handshake fails
    /// or is closed first, and [`HandshakeError::Timeout`] when `timeout`
    /// elapses.
    pub async fn socket(&self, timeout: Option<Duration>) -> Result<Session, HandshakeError> {
        let wait = self.wait_for_socket();
        match timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| HandshakeError::Timeout)?,
            None => wait.await,
        }
    }

    async fn wait_for_socket(&self) -> Result<Session, HandshakeError> {
        let mut socket = self.socket.subscribe();
        let mut state = self.state.subscribe();
        loop {
            let current = socket.borrow_and_update().clone();
            if let Some(session) = current {
                return Ok(session);
            }
            if state.borrow_and_update().is_terminal() {
                return Err(HandshakeError::SocketUnavailable(self.peer.address));
            }
            tokio::select! {
                _ = socket.changed() => {}
                _ = state.changed() => {}
            }
        }
    }

    /// Starts the background connect.
    ///
    /// Returns `false` if an attempt is already running or the handshake
    /// has left the `Connecting` state.
    pub fn connect(&self) -> bool {
        if self.state() != SessionState::Connecting {
            debug!(peer = %self.peer.address, state = ?self.state(), "connect ignored");
            return false;
        }
        let mut task = lock(&self.task);
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return false;
        }
        let me = self.me.clone();
        *task = Some(tokio::spawn(async move {
            let Some(this) = me.upgrade() else {
                return;
            };
            match this.establish().await {
                Ok(session) => this.succeed(session),
                Err(e) => this.fail(e),
            }
        }));
        true
    }

    /// Releases the socket.  Idempotent and never blocks.
    ///
    /// A failed handshake stays `Failed`; any other state becomes `Closed`.
    pub fn close(&self) {
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
        if let Some(session) = self.socket.send_replace(None) {
            session.close();
        }
        let changed = self.state.send_if_modified(|state| {
            if state.is_terminal() {
                false
            } else {
                *state = SessionState::Closed;
                true
            }
        });
        if changed {
            info!(peer = %self.peer.address, "client handshake closed");
        }
    }

    fn init_socket(&self) -> Result<Session, TransportError> {
        if !self.radio.exists() || !self.radio.is_enabled() {
            return Err(TransportError::Unavailable);
        }
        let session = Session::new(self.peer.address, self.service_id());
        if let Some(old) = self.socket.send_replace(Some(session.clone())) {
            old.close();
        }
        debug!(peer = %self.peer.address, service = %session.service_id(), "socket handle built");
        Ok(session)
    }

    async fn establish(&self) -> Result<Session, HandshakeError> {
        let current = self.session().filter(|s| !s.is_closed());
        let session = match current {
            Some(session) => session,
            None => self.init_socket()?,
        };

        // An inquiry scan starves the connect on real stacks.
        if self.radio.is_scanning() {
            self.radio.cancel_scan();
        }

        info!(peer = %self.peer.address, service = %session.service_id(), "connecting");
        let stream = self
            .radio
            .connect(&self.peer.address, session.service_id())
            .await?;
        if !session.attach(stream).await {
            return Err(TransportError::Closed.into());
        }
        Ok(session)
    }

    fn succeed(&self, session: Session) {
        let moved = self.state.send_if_modified(|state| {
            if *state == SessionState::Connecting {
                *state = SessionState::Connected;
                true
            } else {
                false
            }
        });
        if !moved {
            session.close();
            return;
        }
        info!(peer = %self.peer.address, "client handshake connected");
        if let Some(callback) = self.connected.get() {
            callback(session);
        }
    }

    fn fail(&self, error: HandshakeError) {
        if let Some(session) = self.socket.send_replace(None) {
            session.close();
        }
        let moved = self.state.send_if_modified(|state| {
            if *state == SessionState::Connecting {
                *state = SessionState::Failed;
                true
            } else {
                false
            }
        });
        if !moved {
            return;
        }
        warn!(peer = %self.peer.address, %error, "client handshake failed");
        if let Some(callback) = self.failed.get() {
            callback(error);
        }
    }
}

impl Drop for ClientHandshake {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
