//! State enums shared by the engine's controllers.
//!
//! Each enum is small and `Copy` so controllers can publish it over a
//! `tokio::sync::watch` channel and observers can compare it cheaply.

use std::fmt;

/// Whether an inquiry scan is running.
///
/// Transitions are driven only by the radio's scan-started and
/// scan-finished events, never by the caller's request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiscoveryState {
    #[default]
    Idle,
    Scanning,
}

/// Whether this device currently answers scans from others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VisibilityState {
    #[default]
    Hidden,
    /// Visible for a fixed window of the given number of seconds.
    Visible(u32),
    /// Visible with automatic renewal until explicitly stopped.
    VisibleIndefinite,
}

impl VisibilityState {
    pub fn is_visible(&self) -> bool {
        !matches!(self, Self::Hidden)
    }
}

/// Progress of one client handshake attempt.
///
/// `Connecting` is the initial state.  `Failed` and `Closed` are terminal:
/// no transition leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Connecting,
    Connected,
    Failed,
    Closed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }
}

/// Radio power transitions as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    TurningOn,
    On,
    TurningOff,
    Off,
}

/// Result of a scan request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// A new scan cycle was started.
    Started,
    /// A scan was already running and `force` was not set.  Informational.
    AlreadyOngoing,
    /// The running cycle was cancelled and a fresh one started.
    Restarted,
    /// No radio adapter exists.  Fatal to the calling workflow.
    AdapterUnavailable,
    /// The adapter exists but refused to start the scan.
    Rejected,
}

impl ScanOutcome {
    /// Returns `true` when a scan cycle is running after the request.
    pub fn is_scanning(&self) -> bool {
        matches!(self, Self::Started | Self::AlreadyOngoing | Self::Restarted)
    }
}

impl fmt::Display for ScanOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Started => "started",
            Self::AlreadyOngoing => "already ongoing",
            Self::Restarted => "restarted",
            Self::AdapterUnavailable => "adapter unavailable",
            Self::Rejected => "rejected",
        };
        f.write_str(text)
    }
}
