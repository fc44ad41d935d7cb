//! Discovery notification assembly.
//!
//! When a peer subscribes to a topic (or identifies itself), the relay
//! tells it which other peers share its topics, advertising each one at a
//! circuit address through this relay:
//! `<relay-base>/p2p-circuit/p2p/<peerId>`. The notification is published
//! on the peer's private discovery channel. Only currently-connected
//! peers are advertised; a circuit address for a peer without a live
//! reservation would be a guaranteed dead dial.

use std::collections::HashSet;

use libp2p::{Multiaddr, PeerId};

use relaypad_shared::envelope::{DiscoveredPeer, Envelope};

use crate::ledger::MembershipLedger;

/// Build a `relay-discovery` envelope for `target`, or `None` when no
/// connected peer shares a topic with it.
///
/// `relay_base` is the relay's public address including its own
/// `/p2p/<relay-id>` suffix.
pub fn build_notification(
    ledger: &MembershipLedger,
    target: &PeerId,
    connected: &HashSet<PeerId>,
    relay_id: &PeerId,
    relay_base: &Multiaddr,
) -> Option<Envelope> {
    let peers: Vec<DiscoveredPeer> = ledger
        .peers_sharing_topics(target)
        .into_iter()
        .filter(|peer| connected.contains(peer))
        .map(|peer| DiscoveredPeer {
            peer_id: peer.to_string(),
            multiaddrs: vec![format!("{relay_base}/p2p-circuit/p2p/{peer}")],
        })
        .collect();

    if peers.is_empty() {
        return None;
    }

    Some(Envelope::RelayDiscovery {
        relay_id: relay_id.to_string(),
        peers,
    })
}
