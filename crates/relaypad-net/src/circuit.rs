//! Circuit-relay address construction.
//!
//! The relay advertises peers as `<relay-addr>/p2p-circuit/p2p/<peerId>`;
//! both sides of the protocol derive these addresses locally from the
//! relay's base address, so no further coordination is needed to dial.

use libp2p::{multiaddr::Protocol, Multiaddr, PeerId};

/// `<relay_addr>/p2p/<relay_peer_id>/p2p-circuit`: the address a peer
/// listens on to accept relayed connections.
pub fn build_circuit_addr(relay_addr: &Multiaddr, relay_peer_id: &PeerId) -> Multiaddr {
    let mut addr = relay_addr.clone();
    if extract_peer_id(relay_addr) != Some(*relay_peer_id) {
        addr = addr.with(Protocol::P2p(*relay_peer_id));
    }
    addr.with(Protocol::P2pCircuit)
}

/// `<relay_addr>/p2p/<relay_peer_id>/p2p-circuit/p2p/<target>`: the
/// address used to reach `target` through the relay.
pub fn build_relayed_addr(
    relay_addr: &Multiaddr,
    relay_peer_id: &PeerId,
    target_peer_id: &PeerId,
) -> Multiaddr {
    build_circuit_addr(relay_addr, relay_peer_id).with(Protocol::P2p(*target_peer_id))
}

/// Extract the trailing `PeerId` from a multiaddr, if one is present.
pub fn extract_peer_id(addr: &Multiaddr) -> Option<PeerId> {
    addr.iter().find_map(|p| {
        if let Protocol::P2p(peer_id) = p {
            Some(peer_id)
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_relayed_addr() {
        let relay: PeerId = PeerId::random();
        let target: PeerId = PeerId::random();
        let base: Multiaddr = "/ip4/10.0.0.1/tcp/4003/ws".parse().unwrap();

        let addr = build_relayed_addr(&base, &relay, &target);
        let expected: Multiaddr =
            format!("/ip4/10.0.0.1/tcp/4003/ws/p2p/{relay}/p2p-circuit/p2p/{target}")
                .parse()
                .unwrap();
        assert_eq!(addr, expected);
    }

    #[test]
    fn test_relay_id_not_duplicated() {
        let relay: PeerId = PeerId::random();
        let base: Multiaddr = format!("/ip4/10.0.0.1/tcp/4003/ws/p2p/{relay}")
            .parse()
            .unwrap();

        let addr = build_circuit_addr(&base, &relay);
        let expected: Multiaddr = format!("/ip4/10.0.0.1/tcp/4003/ws/p2p/{relay}/p2p-circuit")
            .parse()
            .unwrap();
        assert_eq!(addr, expected);
    }

    #[test]
    fn test_extract_peer_id() {
        let peer = PeerId::random();
        let addr: Multiaddr = format!("/ip4/127.0.0.1/tcp/4003/ws/p2p/{peer}")
            .parse()
            .unwrap();
        assert_eq!(extract_peer_id(&addr), Some(peer));

        let bare: Multiaddr = "/ip4/127.0.0.1/tcp/4003/ws".parse().unwrap();
        assert_eq!(extract_peer_id(&bare), None);
    }
}
