//! Composed libp2p `NetworkBehaviour` for relaypad peers.
//!
//! Combines GossipSub (topic messaging and signaling), Identify (protocol
//! negotiation and address exchange), Relay client (circuit relay through
//! the rendezvous node), and DCUtR (direct connection upgrade through
//! relay).

use libp2p::{dcutr, gossipsub, identify, relay, swarm::NetworkBehaviour};

/// Composed network behaviour for relaypad peers.
///
/// All sub-behaviours are driven by the single swarm event loop.
/// Construction is handled by [`super::transport::build_swarm`] via
/// `SwarmBuilder`.
#[derive(NetworkBehaviour)]
#[behaviour(to_swarm = "NodeEvent")]
pub struct NodeBehaviour {
    /// Pub/sub messaging for shared topics, discovery and session channels
    pub gossipsub: gossipsub::Behaviour,
    /// Protocol identification and listen-address advertisement
    pub identify: identify::Behaviour,
    /// Circuit relay v2 client for NAT traversal
    pub relay_client: relay::client::Behaviour,
    /// Direct Connection Upgrade through Relay
    pub dcutr: dcutr::Behaviour,
}

/// Events emitted by the composed behaviour, one variant per sub-behaviour.
#[derive(Debug)]
pub enum NodeEvent {
    Gossipsub(gossipsub::Event),
    Identify(identify::Event),
    RelayClient(relay::client::Event),
    Dcutr(dcutr::Event),
}

impl From<gossipsub::Event> for NodeEvent {
    fn from(event: gossipsub::Event) -> Self {
        NodeEvent::Gossipsub(event)
    }
}

impl From<identify::Event> for NodeEvent {
    fn from(event: identify::Event) -> Self {
        NodeEvent::Identify(event)
    }
}

impl From<relay::client::Event> for NodeEvent {
    fn from(event: relay::client::Event) -> Self {
        NodeEvent::RelayClient(event)
    }
}

impl From<dcutr::Event> for NodeEvent {
    fn from(event: dcutr::Event) -> Self {
        NodeEvent::Dcutr(event)
    }
}
