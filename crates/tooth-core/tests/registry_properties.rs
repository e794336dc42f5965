//! Integration tests for the peer registry through the public crate API.
//!
//! These tests drive long, mixed sequences of discoveries and check the two
//! properties every caller relies on:
//!
//! - No two entries ever share an address, and the latest record for an
//!   address is the one retained.
//! - Exceeding capacity clears the registry entirely.

use std::collections::HashSet;

use tooth_core::{Peer, PeerAddress, PeerRegistry, RecordOutcome, ServiceId, Session};

fn address(n: u32) -> PeerAddress {
    let b = n.to_be_bytes();
    PeerAddress::from_octets([0x0A, 0x00, b[0], b[1], b[2], b[3]])
}

#[test]
fn test_mixed_sequence_never_duplicates_addresses() {
    // Arrange: a deterministic sequence revisiting 40 addresses 300 times.
    let mut registry = PeerRegistry::new();
    let mut latest = std::collections::HashMap::new();

    // Act
    for step in 0..300u32 {
        let n = (step * 7 + 3) % 40;
        let name = format!("peer-{n}-v{step}");
        registry.record_discovery(Peer::new(address(n), name.clone()));
        latest.insert(n, name);
    }

    // Assert
    let snapshot = registry.all();
    let unique: HashSet<_> = snapshot.iter().map(|p| p.address).collect();
    assert_eq!(unique.len(), snapshot.len());
    assert_eq!(snapshot.len(), latest.len());
    for (n, name) in latest {
        assert_eq!(registry.get(&address(n)).unwrap().display_name, name);
    }
}

#[test]
fn test_501_distinct_discoveries_empty_the_registry() {
    // Arrange
    let mut registry = PeerRegistry::new();
    let mut outcomes = Vec::new();

    // Act
    for n in 0..501 {
        outcomes.push(registry.record_discovery(Peer::new(address(n), format!("p{n}"))));
    }

    // Assert
    assert!(registry.is_empty());
    assert_eq!(outcomes.last(), Some(&RecordOutcome::Overflowed));
    assert!(outcomes[..500].iter().all(|o| *o == RecordOutcome::Inserted));
}

#[test]
fn test_snapshot_is_detached_from_registry() {
    // Arrange
    let mut registry = PeerRegistry::new();
    registry.record_discovery(Peer::new(address(1), "a"));
    let snapshot = registry.all();

    // Act
    registry.clear();

    // Assert
    assert_eq!(snapshot.len(), 1);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_session_attached_via_registry_is_shared_with_caller() {
    // Arrange
    let (near, far) = tokio::io::duplex(64);
    let mut registry = PeerRegistry::new();
    registry.record_discovery(Peer::new(address(1), "host"));
    let session = Session::from_stream(address(1), ServiceId::default(), Box::new(near));

    // Act
    registry.attach_session(&address(1), session.clone());
    registry
        .get(&address(1))
        .and_then(|p| p.session.clone())
        .unwrap()
        .close();

    // Assert: closing through the registry's clone closes the caller's handle.
    assert!(session.is_closed());
    drop(far);
}
