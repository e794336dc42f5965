//! Orchestrator: the facade composing the controllers into pairing workflows.
//!
//! # Roles (for beginners)
//!
//! - **Host** (`teeth`): power on, rename with the host marker (or a chosen
//!   name), become visible, accept exactly one peer.
//! - **Client** (`tooth`): scan with the radio kept on, pick the first peer
//!   whose name matches (or that carries the host marker), stop the scan,
//!   and connect to it.
//!
//! ```text
//!   host                                   client
//!   ────                                   ──────
//!   teeth("HOST1") ── rename, visible      tooth(Some("HOST1"))
//!        │                                     │ scan
//!        │ listen ◄─────────── connect ─────── │ PeerFound("HOST1") → stop scan
//!        ▼                                     ▼
//!   on_accepted(session)                   on_connected(session)
//!   shutdown, name restored
//! ```
//!
//! There is no global instance: [`Orchestrator::init`] returns a handle and
//! every operation goes through it.  Outgoing client handshakes are tracked
//! by name so `untooth` can close them later.

use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, Weak,
};

use tooth_core::{Peer, PeerAddress, ScanOutcome, ServiceId, Session};
use tracing::{debug, info, warn};

use super::callbacks::{ErrorCallback, Notify, PeerCallback, SessionCallback};
use super::client_handshake::ClientHandshake;
use super::discovery::DiscoveryController;
use super::message_listener::{MessageCallback, MessageListener};
use super::power::{PowerManager, PowerOff};
use super::server_handshake::ServerHandshake;
use super::visibility::{VisibilityController, VisibilityWindow};
use super::{lock, EngineError, EngineSettings};
use crate::infrastructure::radio::{Radio, TransportError};

// ── Requests ──────────────────────────────────────────────────────────────────

/// Parameters of [`Orchestrator::scan_radius`].
#[derive(Default, Clone)]
pub struct ScanRequest {
    /// Leave the radio on after the scan instead of arming the grace
    /// power-down.
    pub keep_alive: bool,
    /// Stop scanning once a peer with exactly this name is found.  Only
    /// that peer is reported when set.
    pub target_name: Option<String>,
    pub on_scan_started: Option<Notify>,
    pub on_scan_finished: Option<Notify>,
    pub on_peer_found: Option<PeerCallback>,
}

/// Parameters of [`Orchestrator::teeth`].
#[derive(Default, Clone)]
pub struct TeethRequest {
    /// Name to advertise.  `None` keeps the device name and adds the host
    /// marker.
    pub name: Option<String>,
    /// `None` uses the configured default service.
    pub service_id: Option<ServiceId>,
    pub on_started: Option<Notify>,
    pub on_accepted: Option<SessionCallback>,
}

/// Parameters of [`Orchestrator::tooth`].
#[derive(Default, Clone)]
pub struct ToothRequest {
    /// Host to join.  `None` joins the first peer carrying the host marker.
    pub target_name: Option<String>,
    /// `None` uses the configured default service.
    pub service_id: Option<ServiceId>,
    pub on_scan_started: Option<Notify>,
    pub on_connected: Option<SessionCallback>,
    /// Receives every discovered peer, matching or not.
    pub on_peer_found: Option<PeerCallback>,
    pub on_error: Option<ErrorCallback>,
}

// ── Orchestrator ──────────────────────────────────────────────────────────────

pub struct Orchestrator {
    me: Weak<Self>,
    radio: Arc<dyn Radio>,
    settings: EngineSettings,
    power: Arc<PowerManager>,
    discovery: Arc<DiscoveryController>,
    visibility: VisibilityController,
    server: Arc<ServerHandshake>,
    outgoing: Mutex<HashMap<String, Arc<ClientHandshake>>>,
    message_listener: Mutex<Option<MessageListener>>,
}

impl Orchestrator {
    /// Builds the engine around `radio` and attaches the discovery
    /// listeners.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::AdapterNotFound`] when the device has no
    /// radio.  Nothing else is touched in that case.
    pub fn init(radio: Arc<dyn Radio>, settings: EngineSettings) -> Result<Arc<Self>, EngineError> {
        if !radio.exists() {
            warn!("no radio adapter found");
            return Err(EngineError::AdapterNotFound);
        }
        let power = Arc::new(PowerManager::new(Arc::clone(&radio)));
        let discovery = DiscoveryController::new(Arc::clone(&radio), Arc::clone(&power), &settings);
        discovery.attach();
        let visibility = VisibilityController::new(Arc::clone(&radio), &settings);
        let server = ServerHandshake::new(Arc::clone(&radio));
        info!(name = %radio.advertised_name(), "engine initialised");

        Ok(Arc::new_cyclic(|me| Self {
            me: me.clone(),
            radio,
            settings,
            power,
            discovery,
            visibility,
            server,
            outgoing: Mutex::new(HashMap::new()),
            message_listener: Mutex::new(None),
        }))
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn discovery(&self) -> &Arc<DiscoveryController> {
        &self.discovery
    }

    pub fn visibility(&self) -> &VisibilityController {
        &self.visibility
    }

    pub fn server(&self) -> &Arc<ServerHandshake> {
        &self.server
    }

    // ── Discovery ─────────────────────────────────────────────────────────────

    /// Scans the neighbourhood.
    ///
    /// The request's callbacks replace whatever discovery subscribers were
    /// registered before.
    pub fn scan_radius(&self, request: ScanRequest) -> ScanOutcome {
        let ScanRequest {
            keep_alive,
            target_name,
            on_scan_started,
            on_scan_finished,
            on_peer_found,
        } = request;

        self.discovery.clear_subscriptions();
        if let Some(callback) = on_scan_started {
            self.discovery.on_scan_started(callback);
        }
        if let Some(callback) = on_scan_finished {
            self.discovery.on_scan_finished(callback);
        }
        let on_peer_found = match target_name {
            None => on_peer_found,
            Some(target) => {
                let discovery = Arc::downgrade(&self.discovery);
                let forward = on_peer_found;
                let wrapped: PeerCallback = Arc::new(move |peer: Peer| {
                    if peer.display_name != target {
                        return;
                    }
                    if let Some(callback) = &forward {
                        callback(peer);
                    }
                    if let Some(discovery) = discovery.upgrade() {
                        debug!(target = %target, "target found, stopping scan");
                        discovery.stop_scan();
                    }
                });
                Some(wrapped)
            }
        };
        if let Some(callback) = on_peer_found {
            self.discovery.on_peer_found(callback);
        }
        self.discovery.set_keep_alive(keep_alive);

        let outcome = self.discovery.start_scan(false);
        info!(%outcome, keep_alive, "scan radius");
        outcome
    }

    /// Cancels the running scan.
    pub fn stop_scan(&self) -> bool {
        self.discovery.stop_scan()
    }

    /// Snapshot of every peer seen so far.
    pub fn peers(&self) -> Vec<Peer> {
        self.discovery.peers()
    }

    /// Peers seen in the current (or most recent) scan cycle.
    pub fn latest_scan(&self) -> Vec<Peer> {
        self.discovery.latest_scan()
    }

    // ── Visibility ────────────────────────────────────────────────────────────

    /// Becomes visible for `secs` seconds (`0` = maximum window).
    pub fn become_visible(&self, secs: u32) -> bool {
        self.visibility.become_visible(secs)
    }

    pub fn become_visible_indefinitely(&self) -> bool {
        self.visibility.become_visible_indefinitely()
    }

    pub fn force_visible(&self, window: VisibilityWindow) -> bool {
        self.visibility.force_visible(window)
    }

    pub fn stop_visibility(&self) {
        self.visibility.stop_visibility();
    }

    pub fn stop_indefinite_visibility(&self) -> bool {
        self.visibility.stop_indefinite_visibility()
    }

    // ── Radio ─────────────────────────────────────────────────────────────────

    pub fn device_name(&self) -> String {
        self.radio.advertised_name()
    }

    pub fn change_device_name(&self, name: &str) -> bool {
        self.radio.set_advertised_name(name)
    }

    /// Powers the radio on if needed.  Returns `false` if it stays off.
    pub fn ensure_radio_on(&self) -> bool {
        match self.power.ensure_on() {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "radio could not be powered on");
                false
            }
        }
    }

    /// Removes the bond with `address`.  Privileged on real stacks.
    pub fn unpair_peer(&self, address: &PeerAddress) -> bool {
        let removed = self.radio.remove_bond(address);
        debug!(peer = %address, removed, "unpair requested");
        removed
    }

    // ── Host role ─────────────────────────────────────────────────────────────

    /// Starts hosting: power on, rename, become visible, accept one peer.
    ///
    /// Returns `false` without side effects if a server is already running,
    /// and `false` if the radio cannot be powered on.
    pub fn teeth(&self, request: TeethRequest) -> bool {
        if self.server.is_running() {
            debug!("teeth refused, server already running");
            return false;
        }
        if !self.ensure_radio_on() {
            return false;
        }
        let service_id = request.service_id.unwrap_or(self.settings.default_service);
        if !self.server.activate(
            service_id,
            request.name.as_deref(),
            request.on_started,
            request.on_accepted,
        ) {
            return false;
        }
        self.visibility.become_visible(0);
        true
    }

    /// Shuts down any running server, then calls [`teeth`](Self::teeth).
    pub fn reteeth(&self, request: TeethRequest) -> bool {
        if self.server.is_running() {
            self.server.shutdown_server();
        }
        self.teeth(request)
    }

    /// Shuts the server down.  Safe to call at any time.
    pub fn unteeth(&self) {
        self.server.shutdown_server();
    }

    // ── Client role ───────────────────────────────────────────────────────────

    /// Scans for a host and connects to the first match.
    ///
    /// A peer matches when its name equals `target_name`, or, without a
    /// target, when it carries the host marker.  Only the first match of
    /// this request starts a handshake.
    pub fn tooth(&self, request: ToothRequest) -> ScanOutcome {
        let ToothRequest {
            target_name,
            service_id,
            on_scan_started,
            on_connected,
            on_peer_found,
            on_error,
        } = request;
        let service_id = service_id.unwrap_or(self.settings.default_service);
        let matched = AtomicBool::new(false);
        let me = self.me.clone();

        let on_peer: PeerCallback = Arc::new(move |peer: Peer| {
            let Some(this) = me.upgrade() else { return };
            let is_match = match &target_name {
                Some(target) => peer.display_name == *target,
                None => peer.is_host(),
            };
            if is_match && !matched.swap(true, Ordering::SeqCst) {
                this.discovery.stop_scan();
                let key = target_name
                    .clone()
                    .unwrap_or_else(|| peer.display_name.clone());
                this.start_handshake(key, peer.clone(), service_id, on_connected.clone(), on_error.clone());
            }
            if let Some(callback) = &on_peer_found {
                callback(peer);
            }
        });

        self.scan_radius(ScanRequest {
            keep_alive: true,
            target_name: None,
            on_scan_started,
            on_scan_finished: None,
            on_peer_found: Some(on_peer),
        })
    }

    /// Closes and forgets the outgoing session registered under `name`, or
    /// every outgoing session when `name` is `None`.
    ///
    /// Returns how many sessions were closed.
    pub fn untooth(&self, name: Option<&str>) -> usize {
        let closing: Vec<Arc<ClientHandshake>> = {
            let mut outgoing = lock(&self.outgoing);
            match name {
                Some(name) => outgoing.remove(name).into_iter().collect(),
                None => outgoing.drain().map(|(_, handshake)| handshake).collect(),
            }
        };
        for handshake in &closing {
            handshake.close();
        }
        debug!(?name, closed = closing.len(), "untooth");
        closing.len()
    }

    /// Names of the tracked outgoing sessions.
    pub fn outgoing_sessions(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.outgoing).keys().cloned().collect();
        names.sort();
        names
    }

    /// The handshake registered under `name`, if any.
    pub fn outgoing(&self, name: &str) -> Option<Arc<ClientHandshake>> {
        lock(&self.outgoing).get(name).cloned()
    }

    fn start_handshake(
        &self,
        key: String,
        peer: Peer,
        service_id: ServiceId,
        on_connected: Option<SessionCallback>,
        on_error: Option<ErrorCallback>,
    ) {
        info!(peer = %peer.address, name = %peer.display_name, %service_id, "joining host");
        let handshake = ClientHandshake::new(peer, service_id, Arc::clone(&self.radio));

        let discovery = Arc::downgrade(&self.discovery);
        handshake.on_connected(Arc::new(move |session: Session| {
            if let Some(discovery) = discovery.upgrade() {
                discovery.attach_session(&session.peer(), session.clone());
            }
            if let Some(callback) = &on_connected {
                callback(session);
            }
        }));
        if let Some(callback) = on_error {
            handshake.on_error(callback);
        }

        let replaced = lock(&self.outgoing).insert(key, Arc::clone(&handshake));
        if let Some(replaced) = replaced {
            replaced.close();
        }
        handshake.connect();
    }

    // ── Messages ──────────────────────────────────────────────────────────────

    /// Reads text messages from `session` in the background, replacing any
    /// previous listener.
    pub fn listen_for_message(&self, session: Session, on_message: Option<MessageCallback>) {
        let listener = MessageListener::spawn(session, on_message);
        if let Some(previous) = lock(&self.message_listener).replace(listener) {
            previous.stop();
        }
    }

    /// Stops the message listener and returns whatever it received and was
    /// not yet taken.
    pub fn stop_listening_for_message(&self) -> Option<String> {
        let listener = lock(&self.message_listener).take()?;
        listener.stop();
        Some(listener.take_inbox())
    }

    // ── Teardown and diagnostics ──────────────────────────────────────────────

    /// Shuts down the server, then either powers the radio off or only
    /// detaches the event listeners.  Either way the listeners are detached.
    pub fn release_resources(&self, power_off: bool) {
        self.server.shutdown_server();
        self.discovery.cancel_power_down();
        if power_off {
            self.visibility.stop_indefinite_visibility();
            self.power.power_off(PowerOff::Forced);
        }
        self.discovery.detach();
        info!(power_off, "resources released");
    }

    /// Probes whether `peer` answers under `service_id` with a throwaway
    /// connect.
    ///
    /// The probe connection is a real one: a host waiting for its single
    /// peer will accept the probe.
    pub async fn is_peer_alive(&self, peer: &Peer, service_id: ServiceId) -> bool {
        match self.radio.connect(&peer.address, service_id).await {
            Ok(stream) => {
                drop(stream);
                true
            }
            // Heuristic: a busy channel means something on the peer serves
            // it, although a stale listener reports busy as well.
            Err(TransportError::Busy) => true,
            Err(e) => {
                debug!(peer = %peer.address, error = %e, "peer unreachable");
                false
            }
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.server.shutdown_server();
        for handshake in lock(&self.outgoing).values() {
            handshake.close();
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::radio::loopback::{Airspace, LoopbackRadio};
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;
    use tooth_core::{DiscoveryState, SessionState};

    const ME: PeerAddress = PeerAddress::from_octets([2, 0, 0, 0, 0, 1]);
    const OTHER: PeerAddress = PeerAddress::from_octets([2, 0, 0, 0, 0, 2]);

    fn engine(radio: &LoopbackRadio) -> Arc<Orchestrator> {
        Orchestrator::init(Arc::new(radio.clone()), EngineSettings::default()).unwrap()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test]
    async fn test_init_without_adapter_fails() {
        let air = Airspace::new();
        let result = Orchestrator::init(Arc::new(air.absent_radio()), EngineSettings::default());
        assert!(matches!(result, Err(EngineError::AdapterNotFound)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_radius_with_target_reports_only_target_and_stops() {
        // Arrange
        let air = Airspace::new();
        let me = air.add_radio(ME, "me");
        for (n, name) in [(2u8, "noise"), (3, "wanted")] {
            let other = air.add_radio(PeerAddress::from_octets([2, 0, 0, 0, 0, n]), name);
            other.request_visibility(Duration::from_secs(300));
        }
        let engine = engine(&me);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        // Act
        let outcome = engine.scan_radius(ScanRequest {
            keep_alive: true,
            target_name: Some("wanted".into()),
            on_peer_found: Some(Arc::new(move |peer: Peer| {
                let _ = tx.send(peer.display_name);
            })),
            ..ScanRequest::default()
        });
        let found = rx.recv().await.unwrap();
        settle().await;

        // Assert
        assert_eq!(outcome, ScanOutcome::Started);
        assert_eq!(found, "wanted");
        assert!(rx.try_recv().is_err());
        assert_eq!(engine.discovery().state(), DiscoveryState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teeth_twice_is_refused() {
        let air = Airspace::new();
        let me = air.add_radio(ME, "phone");
        let engine = engine(&me);

        assert!(engine.teeth(TeethRequest {
            name: Some("HOST1".into()),
            ..TeethRequest::default()
        }));
        let second = engine.teeth(TeethRequest {
            name: Some("HOST2".into()),
            ..TeethRequest::default()
        });

        assert!(!second);
        assert_eq!(me.advertised_name(), "HOST1");
        assert!(me.is_visible());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_hosting_engine_restores_name() {
        // Arrange
        let air = Airspace::new();
        let me = air.add_radio(ME, "phone");
        let other = air.add_radio(OTHER, "tablet");
        let engine = engine(&me);
        assert!(engine.teeth(TeethRequest::default()));
        settle().await;
        assert_eq!(me.advertised_name(), "phone_THOST");

        // Act
        drop(engine);
        settle().await;

        // Assert
        assert_eq!(me.advertised_name(), "phone");
        assert!(other.connect(&ME, ServiceId::default()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reteeth_replaces_running_server() {
        let air = Airspace::new();
        let me = air.add_radio(ME, "phone");
        let engine = engine(&me);
        engine.teeth(TeethRequest {
            name: Some("HOST1".into()),
            ..TeethRequest::default()
        });
        settle().await;

        let restarted = engine.reteeth(TeethRequest {
            name: Some("HOST2".into()),
            ..TeethRequest::default()
        });

        assert!(restarted);
        assert_eq!(me.advertised_name(), "HOST2");
        engine.unteeth();
        assert_eq!(me.advertised_name(), "phone");
    }

    #[tokio::test]
    async fn test_untooth_unknown_and_empty_are_noops() {
        let air = Airspace::new();
        let engine = engine(&air.add_radio(ME, "me"));

        assert_eq!(engine.untooth(Some("nobody")), 0);
        assert_eq!(engine.untooth(None), 0);
        assert!(engine.outgoing_sessions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tooth_without_target_joins_first_host() {
        // Arrange
        let air = Airspace::new();
        let me = air.add_radio(ME, "me");
        let host_radio = air.add_radio(OTHER, "phone");
        let host = engine(&host_radio);
        let client = engine(&me);
        assert!(host.teeth(TeethRequest::default()));
        let connected = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&connected);

        // Act
        client.tooth(ToothRequest {
            on_connected: Some(Arc::new(move |_: Session| {
                c.fetch_add(1, Ordering::SeqCst);
            })),
            ..ToothRequest::default()
        });
        tokio::time::sleep(Duration::from_secs(2)).await;

        // Assert
        assert_eq!(connected.load(Ordering::SeqCst), 1);
        assert_eq!(client.outgoing_sessions(), vec!["phone_THOST".to_string()]);
        let handshake = client.outgoing("phone_THOST").unwrap();
        assert_eq!(handshake.state(), SessionState::Connected);
        assert!(client.peers().iter().any(|p| p.address == OTHER && p.is_connected()));

        assert_eq!(client.untooth(None), 1);
        assert_eq!(handshake.state(), SessionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_liveness_probe() {
        // Arrange
        let air = Airspace::new();
        let me = air.add_radio(ME, "me");
        let other = air.add_radio(OTHER, "other");
        let engine = engine(&me);
        let peer = Peer::new(OTHER, "other");
        let _channel = other
            .listen(ServiceId::default(), &ServiceId::channel_name())
            .await
            .unwrap();

        // Act: the first probe fills the one-slot backlog, the second finds
        // the channel busy.
        let first = engine.is_peer_alive(&peer, ServiceId::default()).await;
        let second = engine.is_peer_alive(&peer, ServiceId::default()).await;
        let wrong_service = engine
            .is_peer_alive(&peer, ServiceId::known(3).unwrap())
            .await;

        // Assert
        assert!(first);
        assert!(second);
        assert!(!wrong_service);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_resources_with_power_off() {
        let air = Airspace::new();
        let me = air.add_radio(ME, "phone");
        let engine = engine(&me);
        engine.teeth(TeethRequest::default());
        settle().await;

        engine.release_resources(true);

        assert!(!me.is_enabled());
        assert!(!engine.server().is_running());
        assert!(!engine.discovery().is_attached());
        assert_eq!(me.advertised_name(), "phone");
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_resources_keeps_radio_state() {
        let air = Airspace::new();
        let me = air.add_radio(ME, "phone");
        let engine = engine(&me);

        engine.release_resources(false);

        assert!(me.is_enabled());
        assert!(!engine.discovery().is_attached());
    }

    #[tokio::test]
    async fn test_change_device_name_and_unpair() {
        let air = Airspace::new();
        let me = air.add_radio(ME, "phone");
        let engine = engine(&me);

        assert!(engine.change_device_name("renamed"));
        assert_eq!(engine.device_name(), "renamed");
        assert!(!engine.unpair_peer(&OTHER));
    }
}
