//! Peer identity: hardware addresses, display names, and the host-marker
//! naming convention.
//!
//! # How peers find each other (for beginners)
//!
//! A short-range radio answers an inquiry scan with two things: its 48-bit
//! hardware address (`00:1A:7D:DA:71:13`) and, optionally, a human-readable
//! name.  The address is the only stable identity; the name is whatever the
//! owner last configured and may be missing entirely.
//!
//! A device that wants to be found as a *host* decorates its advertised name
//! with [`HOST_MARKER`].  A client that scans without a specific target name
//! connects to the first peer whose name carries the marker.
//!
//! ```text
//! advertised name     is_host()   host_label()
//! ─────────────────   ─────────   ────────────
//! "Kitchen_THOST"     true        "Kitchen"
//! "Kitchen"           false       "Kitchen"
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::Session;

/// Suffix appended to an advertised name to announce the host role.
pub const HOST_MARKER: &str = "_THOST";

/// Error type for peer construction.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PeerError {
    /// A discovery record arrived without a hardware address.
    #[error("discovery record carries no hardware address")]
    MissingAddress,

    /// The hardware address is not six colon-separated hex octets.
    #[error("invalid hardware address {0:?}: expected XX:XX:XX:XX:XX:XX")]
    InvalidAddress(String),
}

// ── PeerAddress ───────────────────────────────────────────────────────────────

/// A 48-bit radio hardware address, the unique key of a [`Peer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct PeerAddress([u8; 6]);

impl PeerAddress {
    /// Builds an address from raw octets, most significant first.
    pub const fn from_octets(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    /// Returns the raw octets, most significant first.
    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Parses the canonical `XX:XX:XX:XX:XX:XX` text form (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns [`PeerError::MissingAddress`] for empty or whitespace-only
    /// input and [`PeerError::InvalidAddress`] for anything else that is not
    /// six hex octets.
    pub fn parse(text: &str) -> Result<Self, PeerError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(PeerError::MissingAddress);
        }

        let mut octets = [0u8; 6];
        let mut parts = trimmed.split(':');
        for octet in octets.iter_mut() {
            let part = parts
                .next()
                .filter(|p| p.len() == 2)
                .ok_or_else(|| PeerError::InvalidAddress(trimmed.to_string()))?;
            *octet = u8::from_str_radix(part, 16)
                .map_err(|_| PeerError::InvalidAddress(trimmed.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(PeerError::InvalidAddress(trimmed.to_string()));
        }
        Ok(Self(octets))
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl FromStr for PeerAddress {
    type Err = PeerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<PeerAddress> for String {
    fn from(address: PeerAddress) -> Self {
        address.to_string()
    }
}

impl TryFrom<String> for PeerAddress {
    type Error = PeerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

// ── Host-marker helpers ───────────────────────────────────────────────────────

/// Returns `true` when `name` carries the [`HOST_MARKER`] suffix.
pub fn is_host_name(name: &str) -> bool {
    name.ends_with(HOST_MARKER)
}

/// Appends [`HOST_MARKER`] to `name` unless it is already decorated.
pub fn decorate_host_name(name: &str) -> String {
    if is_host_name(name) {
        name.to_string()
    } else {
        format!("{name}{HOST_MARKER}")
    }
}

/// Strips one trailing [`HOST_MARKER`] from `name`, if present.
pub fn strip_host_marker(name: &str) -> &str {
    name.strip_suffix(HOST_MARKER).unwrap_or(name)
}

// ── Peer ──────────────────────────────────────────────────────────────────────

/// A remote device seen during discovery.
///
/// Peers are created from discovery events and only ever mutated to attach a
/// [`Session`] once paired.  Attaching a new session replaces the old handle
/// (last write wins); the replaced handle is not closed here.
#[derive(Debug, Clone)]
pub struct Peer {
    pub address: PeerAddress,
    pub display_name: String,
    pub discovered_at: SystemTime,
    pub session: Option<Session>,
}

impl Peer {
    /// Creates a freshly discovered peer with no session.
    pub fn new(address: PeerAddress, display_name: impl Into<String>) -> Self {
        Self {
            address,
            display_name: display_name.into(),
            discovered_at: SystemTime::now(),
            session: None,
        }
    }

    /// Builds a peer from a raw discovery record.
    ///
    /// A record without a name is displayed under its address text.
    ///
    /// # Errors
    ///
    /// Returns a [`PeerError`] when `address` is missing or malformed.
    pub fn from_discovery(address: &str, name: Option<&str>) -> Result<Self, PeerError> {
        let address = PeerAddress::parse(address)?;
        let display_name = match name.map(str::trim) {
            Some(n) if !n.is_empty() => n.to_string(),
            _ => address.to_string(),
        };
        Ok(Self::new(address, display_name))
    }

    /// Returns `true` when the advertised name carries the host marker.
    pub fn is_host(&self) -> bool {
        is_host_name(&self.display_name)
    }

    /// The display name with the host marker removed.
    pub fn host_label(&self) -> &str {
        strip_host_marker(&self.display_name)
    }

    /// Returns `true` when a session handle is attached and its stream is live.
    pub fn is_connected(&self) -> bool {
        self.session.as_ref().is_some_and(Session::is_connected)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_upper_and_lower_case() {
        // Arrange / Act
        let upper = PeerAddress::parse("00:1A:7D:DA:71:13").unwrap();
        let lower = PeerAddress::parse("00:1a:7d:da:71:13").unwrap();

        // Assert
        assert_eq!(upper, lower);
        assert_eq!(upper.octets(), [0x00, 0x1A, 0x7D, 0xDA, 0x71, 0x13]);
    }

    #[test]
    fn test_display_uses_upper_case_colon_form() {
        let addr = PeerAddress::from_octets([0xAB, 0x01, 0x02, 0x03, 0x04, 0xEF]);
        assert_eq!(addr.to_string(), "AB:01:02:03:04:EF");
    }

    #[test]
    fn test_parse_empty_address_is_missing() {
        assert_eq!(PeerAddress::parse(""), Err(PeerError::MissingAddress));
        assert_eq!(PeerAddress::parse("   "), Err(PeerError::MissingAddress));
    }

    #[test]
    fn test_parse_rejects_malformed_addresses() {
        for bad in [
            "00:11:22:33:44",
            "00:11:22:33:44:55:66",
            "0:11:22:33:44:55",
            "zz:11:22:33:44:55",
            "00-11-22-33-44-55",
        ] {
            assert!(
                matches!(PeerAddress::parse(bad), Err(PeerError::InvalidAddress(_))),
                "{bad} must be rejected"
            );
        }
    }

    #[test]
    fn test_address_serde_uses_text_form() {
        // Arrange
        let addr = PeerAddress::parse("10:20:30:40:50:60").unwrap();

        // Act
        let text: String = addr.into();
        let back = PeerAddress::try_from(text.clone()).unwrap();

        // Assert
        assert_eq!(text, "10:20:30:40:50:60");
        assert_eq!(back, addr);
    }

    #[test]
    fn test_from_discovery_without_name_uses_address() {
        let peer = Peer::from_discovery("00:11:22:33:44:55", None).unwrap();
        assert_eq!(peer.display_name, "00:11:22:33:44:55");
        assert!(peer.session.is_none());
    }

    #[test]
    fn test_from_discovery_blank_name_uses_address() {
        let peer = Peer::from_discovery("00:11:22:33:44:55", Some("  ")).unwrap();
        assert_eq!(peer.display_name, "00:11:22:33:44:55");
    }

    #[test]
    fn test_from_discovery_without_address_fails() {
        let result = Peer::from_discovery("", Some("Kitchen"));
        assert_eq!(result.unwrap_err(), PeerError::MissingAddress);
    }

    #[test]
    fn test_host_marker_classification() {
        // Arrange
        let host = Peer::from_discovery("00:11:22:33:44:55", Some("Kitchen_THOST")).unwrap();
        let plain = Peer::from_discovery("00:11:22:33:44:56", Some("Kitchen")).unwrap();

        // Assert
        assert!(host.is_host());
        assert_eq!(host.host_label(), "Kitchen");
        assert!(!plain.is_host());
        assert_eq!(plain.host_label(), "Kitchen");
    }

    #[test]
    fn test_decorate_host_name_is_idempotent() {
        let once = decorate_host_name("Desk");
        let twice = decorate_host_name(&once);
        assert_eq!(once, "Desk_THOST");
        assert_eq!(twice, once);
    }

    #[test]
    fn test_new_peer_is_not_connected() {
        let peer = Peer::new(PeerAddress::from_octets([1, 2, 3, 4, 5, 6]), "x");
        assert!(!peer.is_connected());
    }
}
