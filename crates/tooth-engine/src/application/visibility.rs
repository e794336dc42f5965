//! VisibilityController: discoverability windows.
//!
//! A device answers scans only while a visibility window granted by the
//! radio is open.  Windows are capped (300 s by default), so staying visible
//! for longer takes a background loop that asks again every time the
//! previous window runs out.
//!
//! Exactly one visibility task runs at a time:
//!
//! | task running? | unforced request      | forced request            |
//! |---------------|-----------------------|---------------------------|
//! | no            | start new task        | start new task            |
//! | yes           | ignored (no-op)       | cancel it, start new task |
//!
//! A finished or cancelled task is simply discarded the next time a window
//! is requested.
//!
//! The indefinite loop waits on a `watch` flag alongside its sleep, so
//! [`VisibilityController::stop_indefinite_visibility`] takes effect
//! immediately instead of after the current window.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tooth_core::VisibilityState;
use tracing::{debug, info};

use super::{lock, EngineSettings};
use crate::infrastructure::radio::Radio;

/// Shortest window the radio accepts; requesting it is the only portable
/// way to end visibility early.
const MIN_WINDOW: Duration = Duration::from_secs(1);

/// Length of a visibility request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisibilityWindow {
    /// The maximum window (300 s unless configured otherwise).
    Default,
    Seconds(u32),
    /// Renew the maximum window until told to stop.
    Indefinite,
}

impl VisibilityWindow {
    /// Zero seconds means [`VisibilityWindow::Default`].
    pub fn from_secs(secs: u32) -> Self {
        if secs == 0 {
            Self::Default
        } else {
            Self::Seconds(secs)
        }
    }
}

pub struct VisibilityController {
    radio: Arc<dyn Radio>,
    max_window: Duration,
    state: Arc<watch::Sender<VisibilityState>>,
    indefinite: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl VisibilityController {
    pub fn new(radio: Arc<dyn Radio>, settings: &EngineSettings) -> Self {
        let (state, _) = watch::channel(VisibilityState::Hidden);
        let (indefinite, _) = watch::channel(false);
        Self {
            radio,
            max_window: settings.max_visibility,
            state: Arc::new(state),
            indefinite,
            task: Mutex::new(None),
        }
    }

    /// Requests a visibility window.
    ///
    /// Returns `true` when a new visibility task was started.
    pub fn request(&self, window: VisibilityWindow, forced: bool) -> bool {
        let mut task = lock(&self.task);
        if let Some(running) = task.as_ref().filter(|t| !t.is_finished()) {
            if !forced {
                debug!(?window, "visibility task already running, request ignored");
                return false;
            }
            running.abort();
            debug!("running visibility task cancelled by forced request");
        }

        self.indefinite
            .send_replace(window == VisibilityWindow::Indefinite);
        *task = Some(match window {
            VisibilityWindow::Indefinite => self.spawn_indefinite(),
            VisibilityWindow::Default => self.spawn_fixed(self.max_window),
            VisibilityWindow::Seconds(secs) => {
                let requested = Duration::from_secs(u64::from(secs));
                self.spawn_fixed(requested.min(self.max_window))
            }
        });
        true
    }

    /// Becomes visible for `secs` seconds (`0` = maximum window) unless a
    /// window is already active.
    pub fn become_visible(&self, secs: u32) -> bool {
        self.request(VisibilityWindow::from_secs(secs), false)
    }

    /// Stays visible until [`stop_indefinite_visibility`] is called.
    ///
    /// [`stop_indefinite_visibility`]: Self::stop_indefinite_visibility
    pub fn become_visible_indefinitely(&self) -> bool {
        self.request(VisibilityWindow::Indefinite, false)
    }

    /// Replaces any active window with `window`.
    pub fn force_visible(&self, window: VisibilityWindow) -> bool {
        self.request(window, true)
    }

    /// Ends any visibility window by requesting the shortest one the radio
    /// accepts.
    pub fn stop_visibility(&self) {
        self.indefinite.send_replace(false);
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
        self.radio.request_visibility(MIN_WINDOW);
        self.state.send_replace(VisibilityState::Hidden);
        info!("visibility stopped");
    }

    /// Stops the renewal loop.  Returns `false` if indefinite mode was not
    /// active.  The window already granted by the radio runs out on its own.
    pub fn stop_indefinite_visibility(&self) -> bool {
        if !self.indefinite.send_replace(false) {
            return false;
        }
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
        self.state.send_replace(VisibilityState::Hidden);
        info!("indefinite visibility stopped");
        true
    }

    pub fn state(&self) -> VisibilityState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<VisibilityState> {
        self.state.subscribe()
    }

    /// Returns `true` while a visibility task is running.
    pub fn is_active(&self) -> bool {
        lock(&self.task)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    pub fn is_indefinite(&self) -> bool {
        *self.indefinite.borrow()
    }

    fn spawn_fixed(&self, window: Duration) -> JoinHandle<()> {
        let radio = Arc::clone(&self.radio);
        let state = Arc::clone(&self.state);
        let secs = u32::try_from(window.as_secs()).unwrap_or(u32::MAX);
        tokio::spawn(async move {
            radio.request_visibility(window);
            state.send_replace(VisibilityState::Visible(secs));
            info!(secs, "visibility window requested");

            tokio::time::sleep(window).await;
            state.send_replace(VisibilityState::Hidden);
            debug!(secs, "visibility window elapsed");
        })
    }

    fn spawn_indefinite(&self) -> JoinHandle<()> {
        let radio = Arc::clone(&self.radio);
        let state = Arc::clone(&self.state);
        let window = self.max_window;
        let mut flag = self.indefinite.subscribe();
        tokio::spawn(async move {
            state.send_replace(VisibilityState::VisibleIndefinite);
            info!(?window, "indefinite visibility started");
            loop {
                if !*flag.borrow() {
                    break;
                }
                radio.request_visibility(window);
                debug!(?window, "visibility window renewed");
                tokio::select! {
                    _ = tokio::time::sleep(window) => {}
                    _ = wait_cleared(&mut flag) => break,
                }
            }
            state.send_replace(VisibilityState::Hidden);
        })
    }
}

impl Drop for VisibilityController {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
    }
}

async fn wait_cleared(flag: &mut watch::Receiver<bool>) {
    let _ = flag.wait_for(|requested| !*requested).await;
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::radio::loopback::{Airspace, LoopbackRadio};
    use tooth_core::PeerAddress;

    fn setup() -> (LoopbackRadio, VisibilityController) {
        let air = Airspace::new();
        let radio = air.add_radio(PeerAddress::from_octets([2, 0, 0, 0, 0, 1]), "me");
        let controller = VisibilityController::new(Arc::new(radio.clone()), &EngineSettings::default());
        (radio, controller)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[test]
    fn test_zero_seconds_is_default_window() {
        assert_eq!(VisibilityWindow::from_secs(0), VisibilityWindow::Default);
        assert_eq!(VisibilityWindow::from_secs(30), VisibilityWindow::Seconds(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_window_requests_maximum() {
        // Arrange
        let (radio, visibility) = setup();

        // Act
        assert!(visibility.become_visible(0));
        settle().await;

        // Assert
        assert_eq!(radio.visibility_requests(), vec![Duration::from_secs(300)]);
        assert_eq!(visibility.state(), VisibilityState::Visible(300));
        assert!(radio.is_visible());
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_window_is_capped() {
        let (radio, visibility) = setup();

        visibility.become_visible(3600);
        settle().await;

        assert_eq!(radio.visibility_requests(), vec![Duration::from_secs(300)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_window_returns_to_hidden() {
        let (_radio, visibility) = setup();

        visibility.become_visible(30);
        tokio::time::sleep(Duration::from_secs(31)).await;

        assert_eq!(visibility.state(), VisibilityState::Hidden);
        assert!(!visibility.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unforced_request_while_active_is_noop() {
        // Arrange
        let (radio, visibility) = setup();
        visibility.become_visible(60);
        settle().await;

        // Act
        let started = visibility.become_visible(120);
        settle().await;

        // Assert
        assert!(!started);
        assert_eq!(radio.visibility_requests(), vec![Duration::from_secs(60)]);
        assert_eq!(visibility.state(), VisibilityState::Visible(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_request_replaces_active_window() {
        let (radio, visibility) = setup();
        visibility.become_visible(60);
        settle().await;

        assert!(visibility.force_visible(VisibilityWindow::Seconds(120)));
        settle().await;

        assert_eq!(
            radio.visibility_requests(),
            vec![Duration::from_secs(60), Duration::from_secs(120)]
        );
        assert_eq!(visibility.state(), VisibilityState::Visible(120));
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_after_window_elapsed_starts_fresh_task() {
        let (radio, visibility) = setup();
        visibility.become_visible(10);
        tokio::time::sleep(Duration::from_secs(11)).await;

        assert!(visibility.become_visible(10));
        settle().await;

        assert_eq!(radio.visibility_requests().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_indefinite_mode_renews_every_window() {
        // Arrange
        let (radio, visibility) = setup();

        // Act
        visibility.become_visible_indefinitely();
        tokio::time::sleep(Duration::from_secs(301 * 2)).await;

        // Assert: initial request plus two renewals.
        assert_eq!(radio.visibility_requests().len(), 3);
        assert_eq!(visibility.state(), VisibilityState::VisibleIndefinite);
        assert!(visibility.is_indefinite());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_indefinite_takes_effect_immediately() {
        // Arrange
        let (radio, visibility) = setup();
        visibility.become_visible_indefinitely();
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Act
        assert!(visibility.stop_indefinite_visibility());
        settle().await;

        // Assert
        assert!(!visibility.is_active());
        assert_eq!(visibility.state(), VisibilityState::Hidden);
        tokio::time::sleep(Duration::from_secs(900)).await;
        assert_eq!(radio.visibility_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_stop_indefinite_when_not_indefinite_is_false() {
        let (_radio, visibility) = setup();
        visibility.become_visible(10);
        assert!(!visibility.stop_indefinite_visibility());
        assert!(visibility.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_visibility_requests_minimum_window() {
        let (radio, visibility) = setup();
        visibility.become_visible(120);
        settle().await;

        visibility.stop_visibility();

        assert_eq!(radio.visibility_requests().last(), Some(&Duration::from_secs(1)));
        assert_eq!(visibility.state(), VisibilityState::Hidden);
        assert!(!visibility.is_active());
    }
}
