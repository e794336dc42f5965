//! Service identifiers: the rendezvous value host and client agree on.
//!
//! A host listens under a 128-bit service identifier and a client connects
//! to that same identifier on the host's address.  Both sides pick the value
//! out of band, usually from the small table of [`KNOWN_SERVICE_IDS`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Well-known service identifiers.
///
/// Index 0 is the standard serial-port profile identifier, which every
/// stack understands.  The remaining entries are private to Toothlink.
pub const KNOWN_SERVICE_IDS: [ServiceId; 4] = [
    ServiceId(Uuid::from_u128(0x0000_1101_0000_1000_8000_0080_5f9b_34fb)),
    ServiceId(Uuid::from_u128(0x5c1e_2b7a_3f44_4d8e_9a0b_7d1f_2c6e_9b31)),
    ServiceId(Uuid::from_u128(0xa3d9_5f12_6c70_4b1a_8e55_2f9c_0d4e_7b68)),
    ServiceId(Uuid::from_u128(0xe07b_4c39_91d2_4f6a_b8c3_5a6e_1f0d_2c97)),
];

/// Prefix of every generated service-record name.
const CHANNEL_NAME_PREFIX: &str = "tooth_";

/// A 128-bit service identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceId(Uuid);

impl ServiceId {
    pub const fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Looks up entry `index` of [`KNOWN_SERVICE_IDS`].
    pub fn known(index: usize) -> Option<Self> {
        KNOWN_SERVICE_IDS.get(index).copied()
    }

    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Generates a fresh, unique service-record name (`tooth_<digits>`).
    ///
    /// Each listen call publishes its record under a new name so a stale
    /// record left behind by a crashed process never shadows the new one.
    pub fn channel_name() -> String {
        let digits = Uuid::new_v4().as_u128() % 10_000_000_000;
        format!("{CHANNEL_NAME_PREFIX}{digits}")
    }
}

impl Default for ServiceId {
    fn default() -> Self {
        KNOWN_SERVICE_IDS[0]
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ServiceId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

impl From<Uuid> for ServiceId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_serial_port_profile() {
        assert_eq!(
            ServiceId::default().to_string(),
            "00001101-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_known_out_of_range_is_none() {
        assert!(ServiceId::known(3).is_some());
        assert!(ServiceId::known(4).is_none());
    }

    #[test]
    fn test_known_ids_are_distinct() {
        for (i, a) in KNOWN_SERVICE_IDS.iter().enumerate() {
            for b in &KNOWN_SERVICE_IDS[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_parse_accepts_hyphenated_uuid() {
        let id: ServiceId = " 00001101-0000-1000-8000-00805f9b34fb ".parse().unwrap();
        assert_eq!(id, ServiceId::default());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("not-a-uuid".parse::<ServiceId>().is_err());
    }

    #[test]
    fn test_channel_names_are_prefixed_and_unique() {
        // Arrange / Act
        let a = ServiceId::channel_name();
        let b = ServiceId::channel_name();

        // Assert
        assert!(a.starts_with("tooth_"));
        assert!(a["tooth_".len()..].chars().all(|c| c.is_ascii_digit()));
        assert_ne!(a, b);
    }
}
