//! ServerHandshake: one listening activation that accepts exactly one peer.
//!
//! # Lifecycle (for beginners)
//!
//! ```text
//!  Idle/Closed ──activate()──► Activated ──accept ok──► AcceptedOnce
//!       ▲                          │                         │
//!       └──── shutdown_server() ◄──┴── listen/accept error ◄─┘ (auto)
//! ```
//!
//! An activation renames the device (remembering the old name), opens a
//! listening channel, reports `started`, and waits for one peer.  The first
//! accepted peer is reported through `accepted`, after which the activation
//! shuts itself down: there is no loop, so a second peer can never be
//! accepted by the same activation.
//!
//! A radio that was just asked to power on may not be ready yet.  The
//! activation waits for its `PowerChanged(On)` event, up to
//! [`POWER_ON_TIMEOUT`], before opening the channel.
//!
//! Every way out (the automatic shutdown, an error, an explicit
//! [`ServerHandshake::shutdown_server`], dropping the handshake) goes
//! through the same teardown.  It closes the channel, which is what
//! unblocks a pending accept, and restores the recorded name exactly once
//! because the record is taken out of the activation as it is restored.
//!
//! Each activation carries a generation number.  A background task only
//! touches shared state while its generation is current, so a task that
//! outlives its activation (shut down mid-listen) cannot clobber the next
//! one.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tooth_core::{decorate_host_name, PowerState, ServiceId, Session};
use tracing::{debug, info, warn};

use super::callbacks::{Notify, SessionCallback};
use super::lock;
use crate::infrastructure::radio::{ListeningChannel, Radio, RadioEvent, TransportError};

/// How long an activation waits for a radio that is still powering on
/// before it gives up listening.
pub const POWER_ON_TIMEOUT: Duration = Duration::from_secs(10);

/// Where an activation stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerLifecycle {
    #[default]
    Idle,
    /// Renamed and listening (or about to listen).
    Activated,
    /// The single peer was accepted; teardown is under way.
    AcceptedOnce,
    /// Torn down.  A new activation may start from here.
    Closed,
}

impl ServerLifecycle {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Activated | Self::AcceptedOnce)
    }
}

/// What the current activation changed, kept so it can be undone.
#[derive(Debug, Clone)]
pub struct ServerActivation {
    pub service_id: ServiceId,
    pub advertised_name: String,
    /// Name to restore on shutdown.  Cleared once restored.
    pub previous_name: Option<String>,
    /// The peer this activation accepted, once it has.
    pub accepted_session: Option<Session>,
}

#[derive(Default)]
struct Shared {
    generation: u64,
    activation: Option<ServerActivation>,
    channel: Option<Arc<dyn ListeningChannel>>,
    standby: Option<Arc<dyn ListeningChannel>>,
    task: Option<JoinHandle<()>>,
    last_service: Option<ServiceId>,
}

pub struct ServerHandshake {
    me: Weak<Self>,
    radio: Arc<dyn Radio>,
    shared: Mutex<Shared>,
    lifecycle: watch::Sender<ServerLifecycle>,
}

impl ServerHandshake {
    pub fn new(radio: Arc<dyn Radio>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            radio,
            shared: Mutex::new(Shared::default()),
            lifecycle: watch::channel(ServerLifecycle::Idle).0,
        })
    }

    pub fn lifecycle(&self) -> ServerLifecycle {
        *self.lifecycle.borrow()
    }

    pub fn subscribe_lifecycle(&self) -> watch::Receiver<ServerLifecycle> {
        self.lifecycle.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle().is_running()
    }

    /// The running activation, if any.
    pub fn activation(&self) -> Option<ServerActivation> {
        lock(&self.shared).activation.clone()
    }

    /// Returns `true` while a standby channel opened by
    /// [`restart_server`](Self::restart_server) is waiting to be reused.
    pub fn has_standby(&self) -> bool {
        lock(&self.shared).standby.is_some()
    }

    /// Starts an activation under `service_id`.
    ///
    /// The device is renamed to `name`, or to its current name carrying the
    /// host marker when `name` is `None`.  Returns `false`, changing
    /// nothing, if an activation is already running.
    pub fn activate(
        &self,
        service_id: ServiceId,
        name: Option<&str>,
        on_started: Option<Notify>,
        on_accepted: Option<SessionCallback>,
    ) -> bool {
        let mut shared = lock(&self.shared);
        if self.is_running() {
            warn!(%service_id, "server already running, activation refused");
            return false;
        }

        let previous = self.radio.advertised_name();
        let advertised = match name {
            Some(name) => name.to_string(),
            None => decorate_host_name(&previous),
        };
        if advertised != previous {
            self.radio.set_advertised_name(&advertised);
        }

        shared.generation += 1;
        let generation = shared.generation;
        shared.last_service = Some(service_id);
        shared.activation = Some(ServerActivation {
            service_id,
            advertised_name: advertised.clone(),
            previous_name: Some(previous),
            accepted_session: None,
        });
        let standby = match shared.standby.take() {
            Some(channel) if channel.service_id() == service_id => Some(channel),
            Some(other) => {
                other.close();
                None
            }
            None => None,
        };
        self.lifecycle.send_replace(ServerLifecycle::Activated);
        info!(%service_id, name = %advertised, generation, "server activated");

        shared.task = Some(tokio::spawn(run_activation(
            self.me.clone(),
            generation,
            service_id,
            standby,
            on_started,
            on_accepted,
        )));
        true
    }

    /// Tears down the running activation.  Idempotent.
    ///
    /// Returns `true` if there was anything to tear down.
    pub fn shutdown_server(&self) -> bool {
        let mut shared = lock(&self.shared);
        if let Some(task) = shared.task.take() {
            task.abort();
        }
        let closed_standby = match shared.standby.take() {
            Some(standby) => {
                standby.close();
                true
            }
            None => false,
        };
        self.teardown(&mut shared) || closed_standby
    }

    /// Shuts down, then re-opens a standby channel under the last
    /// activation's service id without accepting on it.
    ///
    /// The next activation under the same id reuses the standby channel.
    /// Returns `Ok(false)` when there has never been an activation.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the channel cannot be opened.
    pub async fn restart_server(&self) -> Result<bool, TransportError> {
        self.shutdown_server();
        let Some(service_id) = lock(&self.shared).last_service else {
            return Ok(false);
        };
        let channel: Arc<dyn ListeningChannel> = Arc::from(
            self.radio
                .listen(service_id, &ServiceId::channel_name())
                .await?,
        );
        if let Some(stale) = lock(&self.shared).standby.replace(channel) {
            stale.close();
        }
        info!(%service_id, "server restarted on standby channel");
        Ok(true)
    }

    fn teardown(&self, shared: &mut Shared) -> bool {
        shared.generation += 1;
        shared.task = None;
        if let Some(channel) = shared.channel.take() {
            channel.close();
        }
        let Some(mut activation) = shared.activation.take() else {
            return false;
        };
        if let Some(previous) = activation.previous_name.take() {
            if self.radio.advertised_name() != previous {
                self.radio.set_advertised_name(&previous);
                info!(name = %previous, "advertised name restored");
            }
        }
        self.lifecycle.send_replace(ServerLifecycle::Closed);
        info!(service_id = %activation.service_id, "server shut down");
        true
    }

    /// Publishes the listening channel if `generation` is still current.
    fn install_channel(&self, generation: u64, channel: Arc<dyn ListeningChannel>) -> bool {
        let mut shared = lock(&self.shared);
        if shared.generation != generation {
            return false;
        }
        shared.channel = Some(channel);
        true
    }

    fn mark_accepted(&self, generation: u64, session: &Session) -> bool {
        let mut shared = lock(&self.shared);
        if shared.generation != generation {
            return false;
        }
        if let Some(activation) = shared.activation.as_mut() {
            activation.accepted_session = Some(session.clone());
        }
        self.lifecycle.send_replace(ServerLifecycle::AcceptedOnce);
        true
    }

    /// Teardown from inside the activation's own task.
    fn finish(&self, generation: u64) {
        let mut shared = lock(&self.shared);
        if shared.generation == generation {
            self.teardown(&mut shared);
        }
    }
}

impl Drop for ServerHandshake {
    fn drop(&mut self) {
        let mut shared = lock(&self.shared);
        if let Some(task) = shared.task.take() {
            task.abort();
        }
        if let Some(standby) = shared.standby.take() {
            standby.close();
        }
        if self.teardown(&mut shared) {
            debug!("server dropped while hosting");
        }
    }
}

/// Waits until `radio` is powered, for at most `limit`.
///
/// `Radio::enable` only requests power-on; completion arrives later as
/// `PowerChanged(On)`.  The receiver is taken before the first check so an
/// event racing the check is not missed.
async fn wait_for_power(radio: &dyn Radio, limit: Duration) -> bool {
    let mut events = radio.subscribe();
    if radio.is_enabled() {
        return true;
    }
    debug!(?limit, "waiting for the radio to power on");
    let powered = async {
        loop {
            match events.recv().await {
                Ok(RadioEvent::PowerChanged(PowerState::On)) => return true,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {
                    if radio.is_enabled() {
                        return true;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return radio.is_enabled(),
            }
        }
    };
    tokio::time::timeout(limit, powered).await.unwrap_or(false)
}

async fn run_activation(
    me: Weak<ServerHandshake>,
    generation: u64,
    service_id: ServiceId,
    standby: Option<Arc<dyn ListeningChannel>>,
    on_started: Option<Notify>,
    on_accepted: Option<SessionCallback>,
) {
    let channel = match standby {
        Some(channel) => {
            debug!(%service_id, "reusing standby channel");
            channel
        }
        None => {
            let Some(radio) = me.upgrade().map(|this| Arc::clone(&this.radio)) else {
                return;
            };
            if !wait_for_power(radio.as_ref(), POWER_ON_TIMEOUT).await {
                warn!(
                    %service_id,
                    timeout = ?POWER_ON_TIMEOUT,
                    "radio never powered on, shutting server down"
                );
                if let Some(this) = me.upgrade() {
                    this.finish(generation);
                }
                return;
            }
            match radio.listen(service_id, &ServiceId::channel_name()).await {
                Ok(channel) => Arc::from(channel),
                Err(e) => {
                    warn!(%service_id, error = %e, "listen failed, shutting server down");
                    if let Some(this) = me.upgrade() {
                        this.finish(generation);
                    }
                    return;
                }
            }
        }
    };

    let installed = me
        .upgrade()
        .is_some_and(|this| this.install_channel(generation, Arc::clone(&channel)));
    if !installed {
        channel.close();
        return;
    }
    info!(%service_id, "server listening");
    if let Some(callback) = on_started {
        callback();
    }

    let outcome = channel.accept().await;
    let Some(this) = me.upgrade() else {
        return;
    };
    match outcome {
        Ok((stream, from)) => {
            let session = Session::from_stream(from, service_id, stream);
            if !this.mark_accepted(generation, &session) {
                session.close();
                return;
            }
            info!(peer = %from, %service_id, "server accepted peer");
            if let Some(callback) = on_accepted {
                callback(session);
            }
        }
        Err(e) => debug!(%service_id, error = %e, "accept ended"),
    }
    this.finish(generation);
}

// ── Tests ─────────────────────────────────────────────────────────────────────
