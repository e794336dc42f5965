//! DiscoveryController: inquiry scans, peer recording, and idle power-down.
//!
//! The controller subscribes to the radio's event stream through a spawned
//! *pump* task and turns raw [`RadioEvent`]s into engine state:
//!
//! ```text
//!            start_scan(force=false)
//!   Idle ──────────────────────────────► Scanning
//!    ▲                                     │  │
//!    │         ScanFinished (once)         │  │ start_scan(force=true)
//!    └─────────────────────────────────────┘  │  = cancel, then start
//!                                             ▼
//!                                  Scanning (fresh cycle)
//! ```
//!
//! # Ordering
//!
//! Every radio event goes through one broadcast receiver drained by one
//! task, so a cycle's `ScanFinished` is always handled before the next
//! cycle's `ScanStarted` and peers.  A duplicate `ScanFinished` (state
//! already `Idle`) is dropped, which makes "finished fires exactly once per
//! cycle" hold even when the radio reports twice.
//!
//! # Idle power-down
//!
//! Unless the caller asked for a keep-alive scan, each `ScanFinished` arms a
//! grace timer.  The timer wakes once per second and gives up as soon as a
//! new scan is running.  If the whole grace period passes idle, the radio is
//! powered down through [`PowerOff::Graceful`], and the event listeners are
//! detached if the radio actually went off.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex, Weak,
};
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tooth_core::{DiscoveryState, Peer, PeerAddress, PeerRegistry, PowerState, ScanOutcome, Session};
use tracing::{debug, info, trace, warn};

use super::callbacks::{Notify, PeerCallback, Slot, Subscription};
use super::power::{PowerManager, PowerOff};
use super::{lock, EngineSettings};
use crate::infrastructure::radio::{Radio, RadioEvent};

/// Capacity of the discovery event broadcast channel.
const EVENT_CAPACITY: usize = 256;
/// Granularity of the grace-period re-check.
const GRACE_TICK: Duration = Duration::from_secs(1);

/// An event published on [`DiscoveryController::events`].
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    ScanStarted { cycle: u64 },
    ScanFinished { cycle: u64 },
    PeerFound(Peer),
}

pub struct DiscoveryController {
    me: Weak<Self>,
    radio: Arc<dyn Radio>,
    power: Arc<PowerManager>,
    registry: Arc<Mutex<PeerRegistry>>,
    grace_period: Duration,
    state: watch::Sender<DiscoveryState>,
    cycle: AtomicU64,
    latest_scan: Mutex<Vec<Peer>>,
    scan_started: Slot<dyn Fn() + Send + Sync>,
    scan_finished: Slot<dyn Fn() + Send + Sync>,
    peer_found: Slot<dyn Fn(Peer) + Send + Sync>,
    events: broadcast::Sender<DiscoveryEvent>,
    start_on_power_on: AtomicBool,
    power_down_when_idle: AtomicBool,
    grace_task: Mutex<Option<JoinHandle<()>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl DiscoveryController {
    pub fn new(
        radio: Arc<dyn Radio>,
        power: Arc<PowerManager>,
        settings: &EngineSettings,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(DiscoveryState::Idle);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            radio,
            power,
            registry: Arc::new(Mutex::new(PeerRegistry::with_capacity(
                settings.registry_capacity,
            ))),
            grace_period: settings.grace_period,
            state,
            cycle: AtomicU64::new(0),
            latest_scan: Mutex::new(Vec::new()),
            scan_started: Slot::new(),
            scan_finished: Slot::new(),
            peer_found: Slot::new(),
            events,
            start_on_power_on: AtomicBool::new(false),
            power_down_when_idle: AtomicBool::new(false),
            grace_task: Mutex::new(None),
            pump: Mutex::new(None),
        })
    }

    // ── Scan control ──────────────────────────────────────────────────────────

    /// Starts an inquiry scan.
    ///
    /// A powered-off radio is switched on and the scan starts as soon as the
    /// radio reports `On`; that deferred case returns
    /// [`ScanOutcome::Started`].  With `force`, a running scan is cancelled
    /// (its `ScanFinished` still fires) and a fresh cycle is started.
    pub fn start_scan(&self, force: bool) -> ScanOutcome {
        if !self.radio.exists() {
            warn!("scan requested but no radio adapter exists");
            return ScanOutcome::AdapterUnavailable;
        }
        self.attach();
        self.cancel_power_down();

        if !self.radio.is_enabled() {
            self.start_on_power_on.store(true, Ordering::SeqCst);
            if let Err(e) = self.power.ensure_on() {
                self.start_on_power_on.store(false, Ordering::SeqCst);
                warn!(error = %e, "cannot scan");
                return ScanOutcome::Rejected;
            }
            if !self.radio.is_enabled() {
                debug!("scan deferred until the radio reports power on");
                return ScanOutcome::Started;
            }
            if !self.start_on_power_on.swap(false, Ordering::SeqCst) {
                // The power-on event was handled first and already started it.
                return ScanOutcome::Started;
            }
        }

        let mut outcome = ScanOutcome::Started;
        if self.radio.is_scanning() {
            if !force {
                debug!("scan already ongoing");
                return ScanOutcome::AlreadyOngoing;
            }
            self.radio.cancel_scan();
            outcome = ScanOutcome::Restarted;
        }

        if self.radio.start_scan() {
            info!(%outcome, "inquiry scan requested");
            outcome
        } else {
            warn!("radio refused to start a scan");
            ScanOutcome::Rejected
        }
    }

    /// Cancels the running scan.  Returns the radio's verdict.
    pub fn stop_scan(&self) -> bool {
        self.start_on_power_on.store(false, Ordering::SeqCst);
        let stopped = self.radio.cancel_scan();
        debug!(stopped, "scan cancel requested");
        stopped
    }

    /// With `keep_alive`, the radio stays on after scans finish.  Without
    /// it, every finished scan arms the grace-period power-down.
    pub fn set_keep_alive(&self, keep_alive: bool) {
        self.power_down_when_idle.store(!keep_alive, Ordering::SeqCst);
        if keep_alive {
            self.cancel_power_down();
        }
    }

    /// Disarms a pending grace-period power-down.
    pub fn cancel_power_down(&self) {
        if let Some(task) = lock(&self.grace_task).take() {
            task.abort();
            trace!("grace timer disarmed");
        }
    }

    pub fn is_power_down_pending(&self) -> bool {
        lock(&self.grace_task)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    // ── Listener lifecycle ────────────────────────────────────────────────────

    /// Subscribes to the radio's event stream.  Idempotent.
    pub fn attach(&self) {
        let mut pump = lock(&self.pump);
        if pump.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        let rx = self.radio.subscribe();
        let scanning = self.radio.is_scanning();
        self.state.send_replace(if scanning {
            DiscoveryState::Scanning
        } else {
            DiscoveryState::Idle
        });
        *pump = Some(tokio::spawn(pump_events(self.me.clone(), rx)));
        debug!("discovery listeners attached");
    }

    /// Stops listening to the radio.  Registered callbacks are kept.
    pub fn detach(&self) {
        self.start_on_power_on.store(false, Ordering::SeqCst);
        if let Some(task) = lock(&self.pump).take() {
            task.abort();
            debug!("discovery listeners detached");
        }
    }

    pub fn is_attached(&self) -> bool {
        lock(&self.pump)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    // ── Subscriptions ─────────────────────────────────────────────────────────

    pub fn on_scan_started(&self, callback: Notify) -> Subscription<dyn Fn() + Send + Sync> {
        self.scan_started.set(callback)
    }

    pub fn on_scan_finished(&self, callback: Notify) -> Subscription<dyn Fn() + Send + Sync> {
        self.scan_finished.set(callback)
    }

    pub fn on_peer_found(
        &self,
        callback: PeerCallback,
    ) -> Subscription<dyn Fn(Peer) + Send + Sync> {
        self.peer_found.set(callback)
    }

    /// Removes every single-slot subscriber.
    pub fn clear_subscriptions(&self) {
        self.scan_started.clear();
        self.scan_finished.clear();
        self.peer_found.clear();
    }

    /// Returns a receiver of every discovery event, for any number of
    /// observers.
    pub fn events(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.events.subscribe()
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    pub fn state(&self) -> DiscoveryState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<DiscoveryState> {
        self.state.subscribe()
    }

    /// Number of scan cycles observed so far.
    pub fn cycle(&self) -> u64 {
        self.cycle.load(Ordering::SeqCst)
    }

    /// Snapshot of the long-lived registry, in discovery order.
    pub fn peers(&self) -> Vec<Peer> {
        lock(&self.registry).all()
    }

    /// Peers found during the current (or most recent) scan cycle.
    pub fn latest_scan(&self) -> Vec<Peer> {
        lock(&self.latest_scan).clone()
    }

    pub fn registry(&self) -> Arc<Mutex<PeerRegistry>> {
        Arc::clone(&self.registry)
    }

    /// Records a paired session on the registry entry for `address`.
    pub fn attach_session(&self, address: &PeerAddress, session: Session) -> bool {
        lock(&self.registry).attach_session(address, session)
    }

    // ── Event handling ────────────────────────────────────────────────────────

    fn is_scanning(&self) -> bool {
        self.state() == DiscoveryState::Scanning || self.radio.is_scanning()
    }

    fn handle_event(&self, event: RadioEvent) {
        match event {
            RadioEvent::ScanStarted => self.scan_did_start(),
            RadioEvent::ScanFinished => self.scan_did_finish(),
            RadioEvent::PeerFound { address, name } => self.record_peer(&address, name.as_deref()),
            RadioEvent::PowerChanged(PowerState::On) => {
                debug!("radio powered on");
                if self.start_on_power_on.swap(false, Ordering::SeqCst) {
                    let outcome = self.start_scan(false);
                    debug!(%outcome, "deferred scan started");
                }
            }
            RadioEvent::PowerChanged(state) => debug!(?state, "radio power changed"),
        }
    }

    fn scan_did_start(&self) {
        let cycle = self.cycle.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.send_replace(DiscoveryState::Scanning);
        lock(&self.latest_scan).clear();
        self.cancel_power_down();
        debug!(cycle, "scan started");

        let _ = self.events.send(DiscoveryEvent::ScanStarted { cycle });
        if let Some(cb) = self.scan_started.get() {
            cb();
        }
    }

    fn scan_did_finish(&self) {
        let was_scanning = self.state.send_if_modified(|state| {
            if *state == DiscoveryState::Scanning {
                *state = DiscoveryState::Idle;
                true
            } else {
                false
            }
        });
        if !was_scanning {
            trace!("duplicate scan-finished ignored");
            return;
        }

        let cycle = self.cycle();
        let found = lock(&self.latest_scan).len();
        info!(cycle, found, "scan finished");

        let _ = self.events.send(DiscoveryEvent::ScanFinished { cycle });
        if let Some(cb) = self.scan_finished.get() {
            cb();
        }
        if self.power_down_when_idle.load(Ordering::SeqCst) {
            self.arm_power_down();
        }
    }

    fn record_peer(&self, address: &str, name: Option<&str>) {
        let peer = match Peer::from_discovery(address, name) {
            Ok(peer) => peer,
            Err(e) => {
                warn!(error = %e, ?name, "discarding malformed discovery record");
                return;
            }
        };

        let outcome = lock(&self.registry).record_discovery(peer.clone());
        {
            let mut latest = lock(&self.latest_scan);
            match latest.iter_mut().find(|p| p.address == peer.address) {
                Some(existing) => *existing = peer.clone(),
                None => latest.push(peer.clone()),
            }
        }
        debug!(peer = %peer.address, name = %peer.display_name, ?outcome, "peer found");

        let _ = self.events.send(DiscoveryEvent::PeerFound(peer.clone()));
        if let Some(cb) = self.peer_found.get() {
            cb(peer);
        }
    }

    fn arm_power_down(&self) {
        let me = self.me.clone();
        let grace = self.grace_period;
        let task = tokio::spawn(async move {
            let mut waited = Duration::ZERO;
            while waited < grace {
                let step = GRACE_TICK.min(grace - waited);
                tokio::time::sleep(step).await;
                waited += step;

                let Some(this) = me.upgrade() else { return };
                if this.is_scanning() {
                    debug!(?waited, "scan resumed during grace period, radio stays on");
                    return;
                }
                trace!(?waited, "grace period tick");
            }

            let Some(this) = me.upgrade() else { return };
            if this.is_scanning() {
                return;
            }
            info!(?grace, "no scan activity, powering radio down");
            if this.power.power_off(PowerOff::Graceful) {
                this.detach();
            }
        });

        if let Some(previous) = lock(&self.grace_task).replace(task) {
            previous.abort();
        }
        debug!(?grace, "grace timer armed");
    }
}

impl Drop for DiscoveryController {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.pump).take() {
            task.abort();
        }
        if let Some(task) = lock(&self.grace_task).take() {
            task.abort();
        }
    }
}

async fn pump_events(me: Weak<DiscoveryController>, mut rx: broadcast::Receiver<RadioEvent>) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "discovery listener lagged behind the radio");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        let Some(this) = me.upgrade() else { break };
        this.handle_event(event);
    }
    trace!("discovery pump stopped");
}

// ── Tests ─────────────────────────────────────────────────────────────────────
