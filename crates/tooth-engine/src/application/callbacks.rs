//! Single-slot callback registrations.
//!
//! Each notification kind (scan started, peer found, connected, ...) has
//! exactly one subscriber slot.  Registering a new callback replaces the
//! previous one.  The returned [`Subscription`] clears the slot on
//! [`cancel`](Subscription::cancel), but only if the slot still holds the
//! callback that subscription registered: a stale handle never removes a
//! newer subscriber.
//!
//! Observers that need to see every event side by side should use the
//! broadcast stream the controllers expose instead (e.g.
//! `DiscoveryController::events`).

use std::sync::{Arc, Mutex, Weak};

use tooth_core::{Peer, Session};

use super::client_handshake::HandshakeError;
use super::lock;

/// A callback with no payload.
pub type Notify = Arc<dyn Fn() + Send + Sync>;
/// A callback receiving a discovered peer.
pub type PeerCallback = Arc<dyn Fn(Peer) + Send + Sync>;
/// A callback receiving a live session.
pub type SessionCallback = Arc<dyn Fn(Session) + Send + Sync>;
/// A callback receiving a handshake failure.
pub type ErrorCallback = Arc<dyn Fn(HandshakeError) + Send + Sync>;

struct SlotState<F: ?Sized> {
    generation: u64,
    callback: Option<Arc<F>>,
}

/// One replaceable subscriber.
pub struct Slot<F: ?Sized> {
    state: Arc<Mutex<SlotState<F>>>,
}

impl<F: ?Sized> Default for Slot<F> {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(SlotState {
                generation: 0,
                callback: None,
            })),
        }
    }
}

impl<F: ?Sized> Slot<F> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `callback`, replacing whatever was registered before.
    pub fn set(&self, callback: Arc<F>) -> Subscription<F> {
        let mut state = lock(&self.state);
        state.generation += 1;
        state.callback = Some(callback);
        Subscription {
            slot: Arc::downgrade(&self.state),
            generation: state.generation,
        }
    }

    /// Installs `callback` if `Some`, otherwise leaves the slot untouched.
    pub fn set_opt(&self, callback: Option<Arc<F>>) -> Option<Subscription<F>> {
        callback.map(|cb| self.set(cb))
    }

    pub fn clear(&self) {
        let mut state = lock(&self.state);
        state.generation += 1;
        state.callback = None;
    }

    /// Returns the current subscriber.
    ///
    /// The callback is cloned out of the lock so invoking it can never
    /// deadlock against a concurrent `set`.
    pub fn get(&self) -> Option<Arc<F>> {
        lock(&self.state).callback.clone()
    }

    pub fn is_set(&self) -> bool {
        lock(&self.state).callback.is_some()
    }
}

/// Handle returned by [`Slot::set`].
///
/// Dropping it does nothing; call [`cancel`](Self::cancel) to unsubscribe.
pub struct Subscription<F: ?Sized> {
    slot: Weak<Mutex<SlotState<F>>>,
    generation: u64,
}

impl<F: ?Sized> Subscription<F> {
    /// Clears the slot if it still holds this subscription's callback.
    /// Returns `true` when something was removed.
    pub fn cancel(self) -> bool {
        let Some(slot) = self.slot.upgrade() else {
            return false;
        };
        let mut state = lock(&slot);
        if state.generation == self.generation && state.callback.is_some() {
            state.callback = None;
            true
        } else {
            false
        }
    }

    /// Returns `true` while this subscription's callback is installed.
    pub fn is_active(&self) -> bool {
        self.slot.upgrade().is_some_and(|slot| {
            let state = lock(&slot);
            state.generation == self.generation && state.callback.is_some()
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counter() -> (Arc<AtomicU32>, Notify) {
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);
        (count, Arc::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }))
    }

    #[test]
    fn test_empty_slot_has_no_callback() {
        let slot: Slot<dyn Fn() + Send + Sync> = Slot::new();
        assert!(slot.get().is_none());
        assert!(!slot.is_set());
    }

    #[test]
    fn test_set_replaces_previous_subscriber() {
        // Arrange
        let slot: Slot<dyn Fn() + Send + Sync> = Slot::new();
        let (first_count, first) = counter();
        let (second_count, second) = counter();

        // Act
        slot.set(first);
        slot.set(second);
        (slot.get().unwrap())();

        // Assert
        assert_eq!(first_count.load(Ordering::SeqCst), 0);
        assert_eq!(second_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stale_subscription_does_not_cancel_newer_one() {
        // Arrange
        let slot: Slot<dyn Fn() + Send + Sync> = Slot::new();
        let (_, first) = counter();
        let (_, second) = counter();
        let stale = slot.set(first);
        let current = slot.set(second);

        // Act
        let removed = stale.cancel();

        // Assert
        assert!(!removed);
        assert!(slot.is_set());
        assert!(current.is_active());
    }

    #[test]
    fn test_cancel_clears_own_subscription() {
        let slot: Slot<dyn Fn() + Send + Sync> = Slot::new();
        let (_, cb) = counter();
        let sub = slot.set(cb);

        assert!(sub.cancel());
        assert!(!slot.is_set());
    }

    #[test]
    fn test_set_opt_none_keeps_existing() {
        let slot: Slot<dyn Fn() + Send + Sync> = Slot::new();
        let (_, cb) = counter();
        slot.set(cb);

        assert!(slot.set_opt(None).is_none());
        assert!(slot.is_set());
    }

    #[test]
    fn test_cancel_after_slot_dropped_is_noop() {
        let slot: Slot<dyn Fn() + Send + Sync> = Slot::new();
        let (_, cb) = counter();
        let sub = slot.set(cb);
        drop(slot);

        assert!(!sub.cancel());
    }
}
