// Peer-side P2P networking layer built on libp2p with TCP/WebSocket
// transports and circuit-relay NAT traversal.

pub mod behaviour;
pub mod circuit;
pub mod dialer;
pub mod publish;
pub mod swarm;
pub mod transport;

pub use behaviour::{NodeBehaviour, NodeEvent};
pub use circuit::{build_circuit_addr, build_relayed_addr, extract_peer_id};
pub use dialer::{DialOutcome, Dialer};
pub use publish::{publish_once, publish_with_retry, PublishFault};
pub use swarm::{spawn_swarm, SwarmCommand, SwarmConfig, SwarmNotification};
pub use transport::build_swarm;
