//! libp2p relay rendezvous node.
//!
//! Builds a swarm acting as circuit relay v2 **server**, plus GossipSub so
//! it can observe topic subscriptions and publish discovery notifications
//! on per-peer discovery channels. The relay subscribes to no application
//! topic itself; flood publish delivers its notifications to the channel's
//! subscriber directly.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use futures::StreamExt;
use libp2p::{
    gossipsub, identify, noise, relay,
    swarm::{NetworkBehaviour, SwarmEvent},
    PeerId, SwarmBuilder,
};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use relaypad_shared::constants::{
    GOSSIPSUB_HEARTBEAT_SECS, MAX_MESSAGE_SIZE, PROTOCOL_VERSION, RESERVATION_TTL_SECS,
    SWEEP_INTERVAL_SECS,
};
use relaypad_shared::{now_millis, topics};

use crate::config::RelayConfig;
use crate::discovery::build_notification;
use crate::ledger::MembershipLedger;

// ---------------------------------------------------------------------------
// Behaviour
// ---------------------------------------------------------------------------

/// Composed `NetworkBehaviour` for the relay node.
#[derive(NetworkBehaviour)]
#[behaviour(to_swarm = "RelayServerEvent")]
pub struct RelayServerBehaviour {
    /// Circuit relay v2 server behaviour.
    pub relay: relay::Behaviour,
    /// Protocol identification and liveness signal.
    pub identify: identify::Behaviour,
    /// Subscription observation and discovery-channel publishing.
    pub gossipsub: gossipsub::Behaviour,
}

/// Events emitted by the relay server behaviour.
#[derive(Debug)]
pub enum RelayServerEvent {
    Relay(relay::Event),
    Identify(identify::Event),
    Gossipsub(gossipsub::Event),
}

impl From<relay::Event> for RelayServerEvent {
    fn from(event: relay::Event) -> Self {
        RelayServerEvent::Relay(event)
    }
}

impl From<identify::Event> for RelayServerEvent {
    fn from(event: identify::Event) -> Self {
        RelayServerEvent::Identify(event)
    }
}

impl From<gossipsub::Event> for RelayServerEvent {
    fn from(event: gossipsub::Event) -> Self {
        RelayServerEvent::Gossipsub(event)
    }
}

// ---------------------------------------------------------------------------
// Status API queries
// ---------------------------------------------------------------------------

/// Queries the HTTP status API sends into the relay task.
#[derive(Debug)]
pub enum RelayQuery {
    Status(oneshot::Sender<StatusSnapshot>),
    Peers(oneshot::Sender<Vec<PeerSummary>>),
    Topics(oneshot::Sender<Vec<TopicSummary>>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub peer_id: String,
    pub uptime_secs: u64,
    pub connected_peers: usize,
    pub tracked_peers: usize,
    pub topics: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerSummary {
    pub peer_id: String,
    pub connected: bool,
    pub topics: Vec<String>,
    pub last_seen_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicSummary {
    pub topic: String,
    pub member_count: usize,
    pub members: Vec<String>,
}

// ---------------------------------------------------------------------------
// Spawn
// ---------------------------------------------------------------------------

/// Spawn the relay node as a background tokio task.
///
/// Returns the relay `PeerId` and a query channel for the status API.
pub async fn spawn_relay(
    config: RelayConfig,
    keypair: libp2p::identity::Keypair,
) -> anyhow::Result<(PeerId, mpsc::Sender<RelayQuery>)> {
    let local_peer_id = keypair.public().to_peer_id();
    info!(peer_id = %local_peer_id, "Starting relay node");

    let max_reservations = config.max_reservations;
    let max_circuits = config.max_circuits;

    let mut swarm = SwarmBuilder::with_existing_identity(keypair)
        .with_tokio()
        .with_tcp(
            libp2p::tcp::Config::default().nodelay(true),
            noise::Config::new,
            libp2p::yamux::Config::default,
        )?
        .with_websocket(noise::Config::new, libp2p::yamux::Config::default)
        .await?
        .with_behaviour(|key| -> std::result::Result<RelayServerBehaviour, Box<dyn std::error::Error + Send + Sync>> {
            let peer_id = key.public().to_peer_id();

            let relay_config = relay::Config {
                max_reservations,
                reservation_duration: Duration::from_secs(RESERVATION_TTL_SECS),
                max_circuits,
                ..Default::default()
            };
            let relay_behaviour = relay::Behaviour::new(peer_id, relay_config);

            let identify_config =
                identify::Config::new(PROTOCOL_VERSION.to_string(), key.public())
                    .with_push_listen_addr_updates(true)
                    .with_interval(Duration::from_secs(60));
            let identify_behaviour = identify::Behaviour::new(identify_config);

            let gossipsub_config = gossipsub::ConfigBuilder::default()
                .heartbeat_interval(Duration::from_secs(GOSSIPSUB_HEARTBEAT_SECS))
                .validation_mode(gossipsub::ValidationMode::Strict)
                .max_transmit_size(MAX_MESSAGE_SIZE)
                .flood_publish(true)
                .build()
                .map_err(|e| -> Box<dyn std::error::Error + Send + Sync> {
                    format!("GossipSub config: {e}").into()
                })?;
            let gossipsub_behaviour = gossipsub::Behaviour::new(
                gossipsub::MessageAuthenticity::Signed(key.clone()),
                gossipsub_config,
            )
            .map_err(|e| -> Box<dyn std::error::Error + Send + Sync> {
                format!("GossipSub init: {e}").into()
            })?;

            Ok(RelayServerBehaviour {
                relay: relay_behaviour,
                identify: identify_behaviour,
                gossipsub: gossipsub_behaviour,
            })
        })?
        .with_swarm_config(|cfg| cfg.with_idle_connection_timeout(Duration::from_secs(120)))
        .build();

    swarm.listen_on(config.listen_addr.clone())?;
    info!(addr = %config.listen_addr, "Relay listening");

    let public_base = config.public_base(&local_peer_id);
    info!(base = %public_base, "Advertising circuit addresses under");

    let (query_tx, mut query_rx) = mpsc::channel::<RelayQuery>(32);
    let started = Instant::now();

    tokio::spawn(async move {
        let mut ledger = MembershipLedger::new();
        let mut connected: HashSet<PeerId> = HashSet::new();
        let mut sweep = tokio::time::interval(Duration::from_secs(SWEEP_INTERVAL_SECS));

        loop {
            tokio::select! {
                _ = sweep.tick() => {
                    let stats = ledger.sweep(now_millis(), &connected);
                    // Counts go out on every sweep; evictions get promoted
                    // to info so quiet relays stay quiet at that level.
                    if !stats.is_empty() {
                        info!(
                            evicted = stats.evicted_members,
                            dropped_topics = stats.dropped_topics,
                            pruned_cooldowns = stats.pruned_cooldowns,
                            topics = ledger.topic_count(),
                            peers = ledger.peer_count(),
                            "Membership sweep"
                        );
                    } else {
                        debug!(
                            topics = ledger.topic_count(),
                            peers = ledger.peer_count(),
                            "Membership sweep, nothing to evict"
                        );
                    }
                }

                query = query_rx.recv() => {
                    match query {
                        Some(query) => answer_query(
                            query,
                            &ledger,
                            &connected,
                            &local_peer_id,
                            started,
                        ),
                        None => {
                            info!("Query channel closed, relay task exiting");
                            break;
                        }
                    }
                }

                event = swarm.select_next_some() => {
                    match event {
                        SwarmEvent::Behaviour(RelayServerEvent::Gossipsub(
                            gossipsub::Event::Subscribed { peer_id, topic },
                        )) => {
                            let topic = topic.to_string();
                            let now = now_millis();
                            if topics::is_reserved_topic(&topic) {
                                // A peer opening its discovery channel is
                                // ready to receive notifications.
                                ledger.touch(&peer_id, now);
                                notify(&mut swarm, &mut ledger, &connected, &peer_id, &local_peer_id, &public_base);
                            } else {
                                debug!(peer = %peer_id, topic = %topic, "Peer subscribed");
                                ledger.record_subscribe(&topic, peer_id, now);
                                // Tell the newcomer who is here, and the
                                // members that someone arrived.
                                notify(&mut swarm, &mut ledger, &connected, &peer_id, &local_peer_id, &public_base);
                                for member in ledger.members_of(&topic) {
                                    if member != peer_id {
                                        notify(&mut swarm, &mut ledger, &connected, &member, &local_peer_id, &public_base);
                                    }
                                }
                            }
                        }

                        SwarmEvent::Behaviour(RelayServerEvent::Gossipsub(
                            gossipsub::Event::Unsubscribed { peer_id, topic },
                        )) => {
                            let topic = topic.to_string();
                            if !topics::is_reserved_topic(&topic) {
                                debug!(peer = %peer_id, topic = %topic, "Peer unsubscribed");
                                ledger.record_unsubscribe(&topic, &peer_id);
                            }
                        }

                        SwarmEvent::Behaviour(RelayServerEvent::Identify(
                            identify::Event::Received { peer_id, info, .. },
                        )) => {
                            debug!(
                                peer = %peer_id,
                                protocol = ?info.protocol_version,
                                "Identify: received info from peer"
                            );
                            ledger.touch(&peer_id, now_millis());
                            notify(&mut swarm, &mut ledger, &connected, &peer_id, &local_peer_id, &public_base);
                        }

                        SwarmEvent::Behaviour(RelayServerEvent::Relay(event)) => {
                            log_relay_event(&event);
                        }

                        SwarmEvent::ConnectionEstablished { peer_id, endpoint, .. } => {
                            debug!(
                                peer = %peer_id,
                                addr = %endpoint.get_remote_address(),
                                "Peer connected to relay"
                            );
                            connected.insert(peer_id);
                            ledger.touch(&peer_id, now_millis());
                        }

                        SwarmEvent::ConnectionClosed { peer_id, num_established, .. } => {
                            if num_established == 0 {
                                connected.remove(&peer_id);
                                let removed = ledger.remove_peer(&peer_id);
                                debug!(
                                    peer = %peer_id,
                                    memberships = removed,
                                    "Peer fully disconnected from relay"
                                );
                            }
                        }

                        SwarmEvent::NewListenAddr { address, .. } => {
                            info!(addr = %address, "Relay listening on new address");
                        }

                        SwarmEvent::IncomingConnectionError { error, .. } => {
                            warn!(error = %error, "Incoming connection error");
                        }

                        _ => {}
                    }
                }
            }
        }
    });

    Ok((local_peer_id, query_tx))
}

/// Publish a discovery notification to `target`'s discovery channel if the
/// cooldown permits and there is anything to say.
fn notify(
    swarm: &mut libp2p::Swarm<RelayServerBehaviour>,
    ledger: &mut MembershipLedger,
    connected: &HashSet<PeerId>,
    target: &PeerId,
    relay_id: &PeerId,
    public_base: &libp2p::Multiaddr,
) {
    let now = now_millis();
    if !ledger.may_notify(target, now) {
        return;
    }
    let Some(envelope) = build_notification(ledger, target, connected, relay_id, public_base)
    else {
        return;
    };
    let bytes = match envelope.to_bytes() {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "Failed to encode discovery notification");
            return;
        }
    };

    let channel = gossipsub::IdentTopic::new(topics::discovery_topic(&target.to_string()));
    match swarm.behaviour_mut().gossipsub.publish(channel, bytes) {
        Ok(_) => {
            debug!(peer = %target, "Sent discovery notification");
            ledger.mark_notified(*target, now);
        }
        Err(gossipsub::PublishError::InsufficientPeers) => {
            // Discovery channel not open yet; the next trigger retries.
            debug!(peer = %target, "Discovery channel not ready");
        }
        Err(e) => {
            warn!(peer = %target, error = %e, "Discovery publish failed");
        }
    }
}

fn answer_query(
    query: RelayQuery,
    ledger: &MembershipLedger,
    connected: &HashSet<PeerId>,
    local_peer_id: &PeerId,
    started: Instant,
) {
    match query {
        RelayQuery::Status(reply) => {
            let _ = reply.send(StatusSnapshot {
                peer_id: local_peer_id.to_string(),
                uptime_secs: started.elapsed().as_secs(),
                connected_peers: connected.len(),
                tracked_peers: ledger.peer_count(),
                topics: ledger.topic_count(),
            });
        }
        RelayQuery::Peers(reply) => {
            let mut peers: HashMap<PeerId, PeerSummary> = HashMap::new();
            for (topic, members) in ledger.iter_topics() {
                for peer in members.keys() {
                    peers
                        .entry(*peer)
                        .or_insert_with(|| PeerSummary {
                            peer_id: peer.to_string(),
                            connected: connected.contains(peer),
                            topics: Vec::new(),
                            last_seen_ms: ledger.last_seen(peer),
                        })
                        .topics
                        .push(topic.clone());
                }
            }
            for peer in connected {
                peers.entry(*peer).or_insert_with(|| PeerSummary {
                    peer_id: peer.to_string(),
                    connected: true,
                    topics: Vec::new(),
                    last_seen_ms: ledger.last_seen(peer),
                });
            }
            let _ = reply.send(peers.into_values().collect());
        }
        RelayQuery::Topics(reply) => {
            let summaries = ledger
                .iter_topics()
                .map(|(topic, members)| TopicSummary {
                    topic: topic.clone(),
                    member_count: members.len(),
                    members: members.keys().map(|p| p.to_string()).collect(),
                })
                .collect();
            let _ = reply.send(summaries);
        }
    }
}

fn log_relay_event(event: &relay::Event) {
    match event {
        relay::Event::ReservationReqAccepted { src_peer_id, .. } => {
            info!(peer = %src_peer_id, "Relay reservation accepted");
        }
        relay::Event::ReservationTimedOut { src_peer_id, .. } => {
            debug!(peer = %src_peer_id, "Relay reservation timed out");
        }
        relay::Event::CircuitReqDenied {
            src_peer_id,
            dst_peer_id,
            ..
        } => {
            debug!(src = %src_peer_id, dst = %dst_peer_id, "Circuit request denied");
        }
        relay::Event::CircuitReqAccepted {
            src_peer_id,
            dst_peer_id,
            ..
        } => {
            info!(src = %src_peer_id, dst = %dst_peer_id, "Circuit relay established");
        }
        relay::Event::CircuitClosed {
            src_peer_id,
            dst_peer_id,
            ..
        } => {
            debug!(src = %src_peer_id, dst = %dst_peer_id, "Circuit relay closed");
        }
        other => {
            debug!(event = ?other, "Relay event");
        }
    }
}
