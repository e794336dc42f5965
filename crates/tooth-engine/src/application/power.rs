//! Radio power management.
//!
//! The engine may power the radio on to scan or to host, and later wants to
//! put it back.  "Back" means the state the radio was in before the engine
//! first touched it, captured once when the [`PowerManager`] is built:
//!
//! | captured state | `power_off(Graceful)`     | `power_off(Forced)`    |
//! |----------------|---------------------------|------------------------|
//! | was on         | leave on (re-enable)      | cancel scan, turn off  |
//! | was off        | turn off                  | cancel scan, turn off  |

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::EngineError;
use crate::infrastructure::radio::Radio;

/// How [`PowerManager::power_off`] treats a radio that was on before the
/// engine started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerOff {
    /// Restore the pre-engine power state.
    Graceful,
    /// Cancel any scan and turn the radio off regardless.
    Forced,
}

pub struct PowerManager {
    radio: Arc<dyn Radio>,
    previously_on: bool,
}

impl PowerManager {
    /// Captures the radio's current power state as the state to restore.
    pub fn new(radio: Arc<dyn Radio>) -> Self {
        let previously_on = radio.exists() && radio.is_enabled();
        debug!(previously_on, "captured radio power state");
        Self {
            radio,
            previously_on,
        }
    }

    /// Whether the radio was on when this manager was built.
    pub fn previously_on(&self) -> bool {
        self.previously_on
    }

    pub fn radio_exists(&self) -> bool {
        self.radio.exists()
    }

    pub fn is_on(&self) -> bool {
        self.radio.exists() && self.radio.is_enabled()
    }

    /// Powers the radio on if it is off.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::AdapterNotFound`] when there is no radio and
    /// [`EngineError::PowerOnFailed`] when the stack refuses to power on.
    pub fn ensure_on(&self) -> Result<(), EngineError> {
        if !self.radio.exists() {
            return Err(EngineError::AdapterNotFound);
        }
        if self.radio.is_enabled() {
            return Ok(());
        }
        info!("powering radio on");
        if self.radio.enable() {
            Ok(())
        } else {
            warn!("radio refused to power on");
            Err(EngineError::PowerOnFailed)
        }
    }

    /// Powers the radio down.
    ///
    /// Returns `true` when the radio was actually turned off, which tells
    /// the caller to detach its event listeners.
    pub fn power_off(&self, mode: PowerOff) -> bool {
        if !self.radio.exists() {
            return false;
        }
        match mode {
            PowerOff::Graceful if self.previously_on => {
                if !self.radio.is_enabled() {
                    debug!("radio was on before the engine, turning it back on");
                    self.radio.enable();
                }
                false
            }
            PowerOff::Graceful => {
                info!("powering radio off");
                self.radio.disable()
            }
            PowerOff::Forced => {
                if self.radio.is_scanning() {
                    self.radio.cancel_scan();
                }
                info!("forcing radio off");
                self.radio.disable()
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::radio::MockRadio;

    fn radio(exists: bool, enabled: bool) -> MockRadio {
        let mut mock = MockRadio::new();
        mock.expect_exists().return_const(exists);
        mock.expect_is_enabled().return_const(enabled);
        mock
    }

    #[test]
    fn test_captures_previous_state_once() {
        let manager = PowerManager::new(Arc::new(radio(true, true)));
        assert!(manager.previously_on());
    }

    #[test]
    fn test_absent_radio_is_never_previously_on() {
        let manager = PowerManager::new(Arc::new(radio(false, false)));
        assert!(!manager.previously_on());
        assert!(!manager.radio_exists());
    }

    #[test]
    fn test_ensure_on_without_adapter_fails() {
        let manager = PowerManager::new(Arc::new(radio(false, false)));
        assert!(matches!(
            manager.ensure_on(),
            Err(EngineError::AdapterNotFound)
        ));
    }

    #[test]
    fn test_ensure_on_enables_powered_off_radio() {
        // Arrange
        let mut mock = radio(true, false);
        mock.expect_enable().times(1).return_const(true);
        let manager = PowerManager::new(Arc::new(mock));

        // Act / Assert
        assert!(manager.ensure_on().is_ok());
    }

    #[test]
    fn test_ensure_on_reports_refusal() {
        let mut mock = radio(true, false);
        mock.expect_enable().times(1).return_const(false);
        let manager = PowerManager::new(Arc::new(mock));

        assert!(matches!(manager.ensure_on(), Err(EngineError::PowerOnFailed)));
    }

    #[test]
    fn test_ensure_on_leaves_powered_radio_alone() {
        let mut mock = radio(true, true);
        mock.expect_enable().never();
        let manager = PowerManager::new(Arc::new(mock));

        assert!(manager.ensure_on().is_ok());
    }

    #[test]
    fn test_graceful_off_leaves_previously_on_radio_on() {
        // Arrange
        let mut mock = radio(true, true);
        mock.expect_disable().never();
        mock.expect_enable().never();
        let manager = PowerManager::new(Arc::new(mock));

        // Act
        let turned_off = manager.power_off(PowerOff::Graceful);

        // Assert
        assert!(!turned_off);
    }

    #[test]
    fn test_graceful_off_turns_off_radio_engine_powered_on() {
        // Arrange: off at construction, enabled later by the engine.
        let mut mock = MockRadio::new();
        mock.expect_exists().return_const(true);
        let mut seq = mockall::Sequence::new();
        mock.expect_is_enabled()
            .times(1)
            .in_sequence(&mut seq)
            .return_const(false);
        mock.expect_disable().times(1).return_const(true);
        let manager = PowerManager::new(Arc::new(mock));

        // Act / Assert
        assert!(manager.power_off(PowerOff::Graceful));
    }

    #[test]
    fn test_forced_off_cancels_scan_first() {
        // Arrange
        let mut mock = radio(true, true);
        let mut seq = mockall::Sequence::new();
        mock.expect_is_scanning().return_const(true);
        mock.expect_cancel_scan()
            .times(1)
            .in_sequence(&mut seq)
            .return_const(true);
        mock.expect_disable()
            .times(1)
            .in_sequence(&mut seq)
            .return_const(true);
        let manager = PowerManager::new(Arc::new(mock));

        // Act / Assert
        assert!(manager.power_off(PowerOff::Forced));
    }
}
