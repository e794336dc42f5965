//! In-process radio simulation.
//!
//! An [`Airspace`] is a shared room of simulated radios.  Each
//! [`LoopbackRadio`] in the room can scan for the others, advertise a name,
//! become visible, publish listening channels, and connect to channels
//! published by its neighbours.  Streams are `tokio::io::duplex` pipes.
//!
//! # Timing model
//!
//! All delays use `tokio::time`, so tests running with a paused clock
//! (`#[tokio::test(start_paused = true)]`) advance through a twelve-second
//! inquiry scan instantly.
//!
//! ```text
//! start_scan()
//!   │ ScanStarted
//!   ├── inquiry_delay ──► PeerFound × (powered, visible neighbours)
//!   └── scan_duration ──► ScanFinished
//! ```
//!
//! A scan cancelled midway reports `ScanFinished` immediately and nothing
//! else from that cycle.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tooth_core::{BoxedStream, PeerAddress, PowerState, ServiceId};
use tracing::{debug, trace};

use super::{ListeningChannel, Radio, RadioEvent, TransportError};

/// Capacity of each radio's event channel.
const EVENT_CAPACITY: usize = 256;
/// Buffer size of each simulated stream direction.
const STREAM_BUFFER: usize = 64 * 1024;

type Pending = (BoxedStream, PeerAddress);
type ListenerKey = (PeerAddress, ServiceId);

/// Tunables for one simulated radio.
#[derive(Debug, Clone)]
pub struct LoopbackConfig {
    /// Whether the radio starts powered on.
    pub powered: bool,
    /// Delay between `ScanStarted` and the first `PeerFound`.
    pub inquiry_delay: Duration,
    /// Total length of one scan cycle.
    pub scan_duration: Duration,
    /// Simulated time the transport needs to resolve a connect.
    pub connect_delay: Duration,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            powered: true,
            inquiry_delay: Duration::from_millis(500),
            scan_duration: Duration::from_secs(12),
            connect_delay: Duration::from_millis(50),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Airspace ──────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Room {
    devices: Mutex<HashMap<PeerAddress, Arc<Device>>>,
    listeners: Mutex<HashMap<ListenerKey, mpsc::Sender<Pending>>>,
}

/// A shared room of simulated radios.
#[derive(Clone, Default)]
pub struct Airspace {
    room: Arc<Room>,
}

impl Airspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a powered-on, hidden radio with default timings.
    pub fn add_radio(&self, address: PeerAddress, name: &str) -> LoopbackRadio {
        self.add_radio_with(address, name, LoopbackConfig::default())
    }

    /// Adds a radio with explicit timings and initial power.
    pub fn add_radio_with(
        &self,
        address: PeerAddress,
        name: &str,
        config: LoopbackConfig,
    ) -> LoopbackRadio {
        let device = Arc::new(Device::new(address, name, true, config));
        lock(&self.room.devices).insert(address, Arc::clone(&device));
        LoopbackRadio {
            room: Arc::clone(&self.room),
            device,
        }
    }

    /// Returns a radio handle for a device with no adapter.
    ///
    /// It is not part of the room: nobody can find or reach it.
    pub fn absent_radio(&self) -> LoopbackRadio {
        let config = LoopbackConfig {
            powered: false,
            ..LoopbackConfig::default()
        };
        LoopbackRadio {
            room: Arc::clone(&self.room),
            device: Arc::new(Device::new(
                PeerAddress::from_octets([0; 6]),
                "",
                false,
                config,
            )),
        }
    }

    /// Number of radios in the room.
    pub fn len(&self) -> usize {
        lock(&self.room.devices).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Device ────────────────────────────────────────────────────────────────────

struct DeviceState {
    powered: bool,
    name: String,
    visible_until: Option<Instant>,
    scanning: bool,
    scan_generation: u64,
    scan_task: Option<JoinHandle<()>>,
    visibility_requests: Vec<Duration>,
    bonds: HashSet<PeerAddress>,
}

struct Device {
    address: PeerAddress,
    present: bool,
    config: LoopbackConfig,
    state: Mutex<DeviceState>,
    events: broadcast::Sender<RadioEvent>,
}

impl Device {
    fn new(address: PeerAddress, name: &str, present: bool, config: LoopbackConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            address,
            present,
            state: Mutex::new(DeviceState {
                powered: present && config.powered,
                name: name.to_string(),
                visible_until: None,
                scanning: false,
                scan_generation: 0,
                scan_task: None,
                visibility_requests: Vec::new(),
                bonds: HashSet::new(),
            }),
            config,
            events,
        }
    }

    fn emit(&self, event: RadioEvent) {
        trace!(radio = %self.address, ?event, "loopback event");
        // No receivers is fine: nobody is listening yet.
        let _ = self.events.send(event);
    }

    fn is_reachable(&self) -> bool {
        self.present && lock(&self.state).powered
    }

    fn is_visible(&self) -> bool {
        let state = lock(&self.state);
        state.powered && state.visible_until.is_some_and(|until| Instant::now() < until)
    }

    fn name(&self) -> String {
        lock(&self.state).name.clone()
    }

    /// Ends the running scan cycle, if any, emitting its single
    /// `ScanFinished`.
    fn finish_scan(&self, state: &mut DeviceState) -> bool {
        if !state.scanning {
            return false;
        }
        state.scanning = false;
        state.scan_generation += 1;
        if let Some(task) = state.scan_task.take() {
            task.abort();
        }
        self.emit(RadioEvent::ScanFinished);
        true
    }
}

// ── LoopbackRadio ─────────────────────────────────────────────────────────────

/// A simulated radio living in an [`Airspace`].
#[derive(Clone)]
pub struct LoopbackRadio {
    room: Arc<Room>,
    device: Arc<Device>,
}

impl LoopbackRadio {
    pub fn address(&self) -> PeerAddress {
        self.device.address
    }

    /// Returns `true` while the last granted visibility window is open.
    pub fn is_visible(&self) -> bool {
        self.device.is_visible()
    }

    /// Durations passed to every `request_visibility` call, oldest first.
    pub fn visibility_requests(&self) -> Vec<Duration> {
        lock(&self.device.state).visibility_requests.clone()
    }

    pub fn is_bonded(&self, address: &PeerAddress) -> bool {
        lock(&self.device.state).bonds.contains(address)
    }

    /// Publishes an arbitrary event, as if reported by the stack.
    pub fn inject(&self, event: RadioEvent) {
        self.device.emit(event);
    }

    fn neighbours(&self) -> Vec<Arc<Device>> {
        lock(&self.room.devices)
            .values()
            .filter(|d| d.address != self.device.address)
            .cloned()
            .collect()
    }

    fn spawn_scan(&self, generation: u64) -> JoinHandle<()> {
        let radio = self.clone();
        tokio::spawn(async move {
            let config = &radio.device.config;
            tokio::time::sleep(config.inquiry_delay).await;

            for peer in radio.neighbours() {
                if !peer.is_visible() {
                    continue;
                }
                let state = lock(&radio.device.state);
                if state.scan_generation != generation || !state.scanning {
                    return;
                }
                radio.device.emit(RadioEvent::PeerFound {
                    address: peer.address.to_string(),
                    name: Some(peer.name()).filter(|n| !n.is_empty()),
                });
            }

            let remaining = config.scan_duration.saturating_sub(config.inquiry_delay);
            tokio::time::sleep(remaining).await;

            let mut state = lock(&radio.device.state);
            if state.scan_generation == generation && state.scanning {
                state.scanning = false;
                state.scan_task = None;
                radio.device.emit(RadioEvent::ScanFinished);
            }
        })
    }
}

#[async_trait]
impl Radio for LoopbackRadio {
    fn exists(&self) -> bool {
        self.device.present
    }

    fn is_enabled(&self) -> bool {
        self.device.is_reachable()
    }

    fn enable(&self) -> bool {
        if !self.device.present {
            return false;
        }
        let mut state = lock(&self.device.state);
        if !state.powered {
            self.device.emit(RadioEvent::PowerChanged(PowerState::TurningOn));
            state.powered = true;
            self.device.emit(RadioEvent::PowerChanged(PowerState::On));
            debug!(radio = %self.device.address, "loopback radio powered on");
        }
        true
    }

    fn disable(&self) -> bool {
        if !self.device.present {
            return false;
        }
        let mut state = lock(&self.device.state);
        if state.powered {
            self.device.finish_scan(&mut state);
            self.device.emit(RadioEvent::PowerChanged(PowerState::TurningOff));
            state.powered = false;
            state.visible_until = None;
            self.device.emit(RadioEvent::PowerChanged(PowerState::Off));
            debug!(radio = %self.device.address, "loopback radio powered off");
        }
        true
    }

    fn start_scan(&self) -> bool {
        let mut state = lock(&self.device.state);
        if !self.device.present || !state.powered || state.scanning {
            return false;
        }
        state.scanning = true;
        state.scan_generation += 1;
        let generation = state.scan_generation;
        self.device.emit(RadioEvent::ScanStarted);
        state.scan_task = Some(self.spawn_scan(generation));
        true
    }

    fn cancel_scan(&self) -> bool {
        let mut state = lock(&self.device.state);
        if !self.device.present || !state.powered {
            return false;
        }
        self.device.finish_scan(&mut state);
        true
    }

    fn is_scanning(&self) -> bool {
        lock(&self.device.state).scanning
    }

    fn subscribe(&self) -> broadcast::Receiver<RadioEvent> {
        self.device.events.subscribe()
    }

    fn set_advertised_name(&self, name: &str) -> bool {
        if !self.device.present {
            return false;
        }
        lock(&self.device.state).name = name.to_string();
        true
    }

    fn advertised_name(&self) -> String {
        self.device.name()
    }

    fn request_visibility(&self, duration: Duration) {
        let mut state = lock(&self.device.state);
        state.visibility_requests.push(duration);
        if self.device.present && state.powered {
            state.visible_until = Some(Instant::now() + duration);
        }
    }

    async fn listen(
        &self,
        service_id: ServiceId,
        channel_name: &str,
    ) -> Result<Box<dyn ListeningChannel>, TransportError> {
        if !self.device.is_reachable() {
            return Err(TransportError::Unavailable);
        }
        let key = (self.device.address, service_id);
        let (tx, rx) = mpsc::channel(1);
        {
            let mut listeners = lock(&self.room.listeners);
            if listeners.get(&key).is_some_and(|existing| !existing.is_closed()) {
                return Err(TransportError::Busy);
            }
            listeners.insert(key, tx.clone());
        }
        debug!(radio = %self.device.address, %service_id, channel_name, "loopback channel listening");

        let (closed, _) = watch::channel(false);
        Ok(Box::new(LoopbackChannel {
            room: Arc::clone(&self.room),
            key,
            own: tx,
            backlog: tokio::sync::Mutex::new(rx),
            closed,
        }))
    }

    async fn connect(
        &self,
        address: &PeerAddress,
        service_id: ServiceId,
    ) -> Result<BoxedStream, TransportError> {
        if !self.device.is_reachable() {
            return Err(TransportError::Unavailable);
        }
        tokio::time::sleep(self.device.config.connect_delay).await;

        let target = lock(&self.room.devices).get(address).cloned();
        let Some(target) = target.filter(|t| t.is_reachable()) else {
            return Err(TransportError::ConnectionRefused(format!("{address} is out of range")));
        };
        let listener = lock(&self.room.listeners).get(&(*address, service_id)).cloned();
        let Some(listener) = listener else {
            return Err(TransportError::ConnectionRefused(format!(
                "no channel for {service_id} on {address}"
            )));
        };

        let (near, far) = tokio::io::duplex(STREAM_BUFFER);
        listener
            .try_send((Box::new(far), self.device.address))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => TransportError::Busy,
                mpsc::error::TrySendError::Closed(_) => {
                    TransportError::ConnectionRefused(format!("channel on {address} closed"))
                }
            })?;

        lock(&self.device.state).bonds.insert(*address);
        lock(&target.state).bonds.insert(self.device.address);
        debug!(radio = %self.device.address, peer = %address, %service_id, "loopback connect");
        Ok(Box::new(near))
    }

    fn remove_bond(&self, address: &PeerAddress) -> bool {
        lock(&self.device.state).bonds.remove(address)
    }
}

// ── LoopbackChannel ───────────────────────────────────────────────────────────

struct LoopbackChannel {
    room: Arc<Room>,
    key: ListenerKey,
    own: mpsc::Sender<Pending>,
    backlog: tokio::sync::Mutex<mpsc::Receiver<Pending>>,
    closed: watch::Sender<bool>,
}

#[async_trait]
impl ListeningChannel for LoopbackChannel {
    async fn accept(&self) -> Result<(BoxedStream, PeerAddress), TransportError> {
        let closed = self.closed.subscribe();
        if *closed.borrow() {
            return Err(TransportError::Closed);
        }
        let mut backlog = self.backlog.lock().await;
        tokio::select! {
            pending = backlog.recv() => pending.ok_or(TransportError::Closed),
            _ = wait_closed(closed) => Err(TransportError::Closed),
        }
    }

    fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }
        let mut listeners = lock(&self.room.listeners);
        if listeners
            .get(&self.key)
            .is_some_and(|registered| registered.same_channel(&self.own))
        {
            listeners.remove(&self.key);
        }
        debug!(radio = %self.key.0, service_id = %self.key.1, "loopback channel closed");
    }

    fn service_id(&self) -> ServiceId {
        self.key.1
    }
}

async fn wait_closed(mut closed: watch::Receiver<bool>) {
    let _ = closed.wait_for(|c| *c).await;
}

impl Drop for LoopbackChannel {
    fn drop(&mut self) {
        self.close();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
