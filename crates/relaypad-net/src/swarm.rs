//! Main swarm orchestration with tokio mpsc command/notification pattern.
//!
//! The swarm event loop runs in a dedicated tokio task. External code
//! communicates with it through typed command and notification channels,
//! keeping the networking layer fully asynchronous and decoupled.
//!
//! Dials are request/reply: the caller gets a oneshot that resolves when
//! the connection is established or the dial fails, which is what lets the
//! connection-strategy engine try fallbacks in order.

use std::collections::HashMap;

use futures::StreamExt;
use libp2p::{
    gossipsub, identify,
    multiaddr::Protocol,
    relay,
    swarm::{dial_opts::DialOpts, SwarmEvent},
    Multiaddr, PeerId,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::behaviour::NodeEvent;
use crate::circuit::extract_peer_id;
use crate::publish::PublishFault;
use crate::transport::build_swarm;

// ---------------------------------------------------------------------------
// Command / notification types
// ---------------------------------------------------------------------------

/// Commands sent *into* the swarm task.
#[derive(Debug)]
pub enum SwarmCommand {
    /// Dial a multiaddr; the reply resolves on connection or dial failure.
    Dial {
        addr: Multiaddr,
        reply: oneshot::Sender<Result<(), String>>,
    },
    /// Dial a peer by id, using whatever addresses the swarm already knows.
    DialPeer {
        peer_id: PeerId,
        reply: oneshot::Sender<Result<(), String>>,
    },
    /// Publish a message on a GossipSub topic.
    Publish {
        topic: String,
        data: Vec<u8>,
        reply: oneshot::Sender<Result<(), PublishFault>>,
    },
    /// Subscribe to a GossipSub topic.
    Subscribe(String),
    /// Unsubscribe from a GossipSub topic.
    Unsubscribe(String),
    /// Start listening on an address (e.g. a relay circuit address).
    ListenOn(Multiaddr),
    /// Check whether any live connection to the peer exists.
    IsConnected {
        peer_id: PeerId,
        reply: oneshot::Sender<bool>,
    },
    /// Request the current listen addresses.
    GetListenAddrs(oneshot::Sender<Vec<Multiaddr>>),
    /// Gracefully shut down the swarm.
    Shutdown,
}

/// Notifications sent *from* the swarm task to the application.
#[derive(Debug, Clone)]
pub enum SwarmNotification {
    /// A new peer connected.
    PeerConnected {
        peer_id: PeerId,
        address: Multiaddr,
        relayed: bool,
    },
    /// A peer fully disconnected.
    PeerDisconnected { peer_id: PeerId },
    /// A GossipSub message was received.
    MessageReceived {
        source: Option<PeerId>,
        topic: String,
        data: Vec<u8>,
    },
    /// A connected peer subscribed to or unsubscribed from a topic.
    SubscriptionChanged {
        peer_id: PeerId,
        topic: String,
        subscribed: bool,
    },
    /// Identify completed for a peer; its listen addresses are now known.
    PeerIdentified {
        peer_id: PeerId,
        listen_addrs: Vec<Multiaddr>,
    },
    /// A relay reservation was accepted.
    RelayReservation { relay_peer: PeerId },
}

/// Configuration for spawning the peer swarm.
pub struct SwarmConfig {
    /// Whether to listen on an OS-assigned TCP port for direct dials.
    pub listen_tcp: bool,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self { listen_tcp: true }
    }
}

/// Spawn the libp2p swarm in a background tokio task.
///
/// Returns channels for sending commands and receiving notifications,
/// plus the local `PeerId`.
pub async fn spawn_swarm(
    keypair: libp2p::identity::Keypair,
    config: SwarmConfig,
) -> anyhow::Result<(
    mpsc::Sender<SwarmCommand>,
    mpsc::Receiver<SwarmNotification>,
    PeerId,
)> {
    let mut swarm = build_swarm(keypair).await?;
    let local_peer_id = *swarm.local_peer_id();

    if config.listen_tcp {
        let listen_addr: Multiaddr = "/ip4/0.0.0.0/tcp/0".parse()?;
        swarm.listen_on(listen_addr)?;
    }

    info!(peer_id = %local_peer_id, "Swarm listening");

    let (cmd_tx, mut cmd_rx) = mpsc::channel::<SwarmCommand>(256);
    let (notif_tx, notif_rx) = mpsc::channel::<SwarmNotification>(256);

    tokio::spawn(async move {
        // Dials awaiting a connection outcome, keyed by target peer.
        let mut pending_dials: HashMap<PeerId, Vec<oneshot::Sender<Result<(), String>>>> =
            HashMap::new();

        loop {
            tokio::select! {
                // --- Incoming commands ---
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(SwarmCommand::Dial { addr, reply }) => {
                            let target = extract_peer_id(&addr);
                            match swarm.dial(addr.clone()) {
                                Ok(()) => match target {
                                    Some(peer_id) => {
                                        pending_dials.entry(peer_id).or_default().push(reply);
                                    }
                                    None => {
                                        // No peer id to wait on; report initiation.
                                        let _ = reply.send(Ok(()));
                                    }
                                },
                                Err(e) => {
                                    debug!(addr = %addr, error = %e, "Dial failed to start");
                                    let _ = reply.send(Err(e.to_string()));
                                }
                            }
                        }
                        Some(SwarmCommand::DialPeer { peer_id, reply }) => {
                            if swarm.is_connected(&peer_id) {
                                let _ = reply.send(Ok(()));
                            } else {
                                match swarm.dial(DialOpts::peer_id(peer_id).build()) {
                                    Ok(()) => {
                                        pending_dials.entry(peer_id).or_default().push(reply);
                                    }
                                    Err(e) => {
                                        debug!(peer = %peer_id, error = %e, "Peer dial failed to start");
                                        let _ = reply.send(Err(e.to_string()));
                                    }
                                }
                            }
                        }
                        Some(SwarmCommand::Publish { topic, data, reply }) => {
                            let gossipsub_topic = gossipsub::IdentTopic::new(&topic);
                            let result = swarm
                                .behaviour_mut()
                                .gossipsub
                                .publish(gossipsub_topic, data)
                                .map(|_| ())
                                .map_err(PublishFault::from);
                            if let Err(ref fault) = result {
                                debug!(topic = %topic, fault = %fault, "Publish failed");
                            }
                            let _ = reply.send(result);
                        }
                        Some(SwarmCommand::Subscribe(topic)) => {
                            let gossipsub_topic = gossipsub::IdentTopic::new(&topic);
                            if let Err(e) = swarm
                                .behaviour_mut()
                                .gossipsub
                                .subscribe(&gossipsub_topic)
                            {
                                warn!(topic = %topic, error = %e, "Subscribe failed");
                            }
                        }
                        Some(SwarmCommand::Unsubscribe(topic)) => {
                            let gossipsub_topic = gossipsub::IdentTopic::new(&topic);
                            if !swarm
                                .behaviour_mut()
                                .gossipsub
                                .unsubscribe(&gossipsub_topic)
                                .unwrap_or(false)
                            {
                                debug!(topic = %topic, "Unsubscribe: was not subscribed");
                            }
                        }
                        Some(SwarmCommand::ListenOn(addr)) => {
                            if let Err(e) = swarm.listen_on(addr.clone()) {
                                warn!(addr = %addr, error = %e, "listen_on failed");
                            }
                        }
                        Some(SwarmCommand::IsConnected { peer_id, reply }) => {
                            let _ = reply.send(swarm.is_connected(&peer_id));
                        }
                        Some(SwarmCommand::GetListenAddrs(reply)) => {
                            let addrs: Vec<Multiaddr> =
                                swarm.listeners().cloned().collect();
                            let _ = reply.send(addrs);
                        }
                        Some(SwarmCommand::Shutdown) => {
                            info!("Swarm shutdown requested");
                            break;
                        }
                        None => {
                            info!("Command channel closed, shutting down swarm");
                            break;
                        }
                    }
                }

                // --- Swarm events ---
                event = swarm.select_next_some() => {
                    match event {
                        SwarmEvent::Behaviour(NodeEvent::Gossipsub(
                            gossipsub::Event::Message { message, .. },
                        )) => {
                            let topic = message.topic.to_string();
                            debug!(
                                topic = %topic,
                                source = ?message.source,
                                len = message.data.len(),
                                "GossipSub message received"
                            );
                            let _ = notif_tx
                                .send(SwarmNotification::MessageReceived {
                                    source: message.source,
                                    topic,
                                    data: message.data,
                                })
                                .await;
                        }

                        SwarmEvent::Behaviour(NodeEvent::Gossipsub(
                            gossipsub::Event::Subscribed { peer_id, topic },
                        )) => {
                            let _ = notif_tx
                                .send(SwarmNotification::SubscriptionChanged {
                                    peer_id,
                                    topic: topic.to_string(),
                                    subscribed: true,
                                })
                                .await;
                        }

                        SwarmEvent::Behaviour(NodeEvent::Gossipsub(
                            gossipsub::Event::Unsubscribed { peer_id, topic },
                        )) => {
                            let _ = notif_tx
                                .send(SwarmNotification::SubscriptionChanged {
                                    peer_id,
                                    topic: topic.to_string(),
                                    subscribed: false,
                                })
                                .await;
                        }

                        SwarmEvent::Behaviour(NodeEvent::Identify(
                            identify::Event::Received { peer_id, info, .. },
                        )) => {
                            debug!(
                                peer = %peer_id,
                                protocol = ?info.protocol_version,
                                "Identify: received info from peer"
                            );
                            // Remember observed addresses so bare peer-id
                            // dials can resolve them later.
                            for addr in &info.listen_addrs {
                                swarm.add_peer_address(peer_id, addr.clone());
                            }
                            let _ = notif_tx
                                .send(SwarmNotification::PeerIdentified {
                                    peer_id,
                                    listen_addrs: info.listen_addrs,
                                })
                                .await;
                        }

                        SwarmEvent::Behaviour(NodeEvent::RelayClient(
                            relay::client::Event::ReservationReqAccepted {
                                relay_peer_id,
                                ..
                            },
                        )) => {
                            info!(relay = %relay_peer_id, "Relay reservation accepted");
                            let _ = notif_tx
                                .send(SwarmNotification::RelayReservation {
                                    relay_peer: relay_peer_id,
                                })
                                .await;
                        }

                        SwarmEvent::Behaviour(NodeEvent::Dcutr(event)) => {
                            debug!(event = ?event, "DCUtR event");
                        }

                        SwarmEvent::ConnectionEstablished {
                            peer_id, endpoint, ..
                        } => {
                            let addr = endpoint.get_remote_address().clone();
                            let relayed =
                                addr.iter().any(|p| matches!(p, Protocol::P2pCircuit));

                            info!(
                                peer = %peer_id,
                                addr = %addr,
                                relayed,
                                "Peer connected"
                            );

                            if let Some(waiters) = pending_dials.remove(&peer_id) {
                                for waiter in waiters {
                                    let _ = waiter.send(Ok(()));
                                }
                            }

                            let _ = notif_tx
                                .send(SwarmNotification::PeerConnected {
                                    peer_id,
                                    address: addr,
                                    relayed,
                                })
                                .await;
                        }

                        SwarmEvent::ConnectionClosed {
                            peer_id,
                            num_established,
                            ..
                        } => {
                            if num_established == 0 {
                                info!(peer = %peer_id, "Peer disconnected");
                                let _ = notif_tx
                                    .send(SwarmNotification::PeerDisconnected { peer_id })
                                    .await;
                            }
                        }

                        SwarmEvent::NewListenAddr { address, .. } => {
                            info!(addr = %address, "Listening on new address");
                        }

                        SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
                            debug!(
                                peer = ?peer_id,
                                error = %error,
                                "Outgoing connection error"
                            );
                            if let Some(peer_id) = peer_id {
                                if let Some(waiters) = pending_dials.remove(&peer_id) {
                                    for waiter in waiters {
                                        let _ = waiter.send(Err(error.to_string()));
                                    }
                                }
                            }
                        }

                        SwarmEvent::IncomingConnectionError { error, .. } => {
                            debug!(error = %error, "Incoming connection error");
                        }

                        _ => {}
                    }
                }
            }
        }

        info!("Swarm event loop terminated");
    });

    Ok((cmd_tx, notif_rx, local_peer_id))
}
