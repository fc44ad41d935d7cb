//! Connection strategy engine.
//!
//! Tries cheap paths before falling back to the relay circuit:
//!
//! 1. known direct addresses (from identify or discovery payloads)
//! 2. bare peer-id dial using whatever the swarm's address book holds
//! 3. circuit address through the relay
//!
//! A successful circuit connection is still upgraded to a direct one later
//! by DCUtR, so landing on the relay path is not a dead end.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use libp2p::{multiaddr::Protocol, Multiaddr, PeerId};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::circuit::{build_relayed_addr, extract_peer_id};
use crate::swarm::SwarmCommand;

/// Result of a [`Dialer::connect`] attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialOutcome {
    /// A live connection already existed, nothing was dialed.
    AlreadyConnected,
    /// Another connect attempt to the same peer is still running.
    InFlight,
    /// A connection was established; `relayed` tells which path won.
    Connected { relayed: bool },
    /// Every strategy failed.
    Failed,
}

/// Dials peers with ordered fallback strategies.
///
/// Cheap to clone; clones share the in-flight guard.
#[derive(Clone)]
pub struct Dialer {
    cmd_tx: mpsc::Sender<SwarmCommand>,
    relay_addr: Multiaddr,
    relay_peer_id: PeerId,
    in_flight: Arc<Mutex<HashSet<PeerId>>>,
}

impl Dialer {
    pub fn new(
        cmd_tx: mpsc::Sender<SwarmCommand>,
        relay_addr: Multiaddr,
        relay_peer_id: PeerId,
    ) -> Self {
        Self {
            cmd_tx,
            relay_addr,
            relay_peer_id,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Connect to `target`, trying `known_addrs` first, then a bare
    /// peer-id dial, then the relay circuit.
    ///
    /// Concurrent calls for the same target short-circuit with
    /// [`DialOutcome::InFlight`] instead of stacking duplicate dials.
    pub async fn connect(&self, target: PeerId, known_addrs: &[Multiaddr]) -> DialOutcome {
        if self.is_connected(target).await {
            return DialOutcome::AlreadyConnected;
        }

        {
            let mut guard = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            if !guard.insert(target) {
                debug!(peer = %target, "Connect already in flight");
                return DialOutcome::InFlight;
            }
        }

        let outcome = self.run_strategies(target, known_addrs).await;

        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&target);

        outcome
    }

    async fn run_strategies(&self, target: PeerId, known_addrs: &[Multiaddr]) -> DialOutcome {
        // 1. Known direct addresses.
        for addr in known_addrs {
            // Circuit addresses from discovery payloads are handled by the
            // relay fallback below; skip them here so "direct" means direct.
            if addr.iter().any(|p| matches!(p, Protocol::P2pCircuit)) {
                continue;
            }
            let addr = ensure_peer_id(addr.clone(), target);
            debug!(peer = %target, addr = %addr, "Trying direct address");
            if self.dial_addr(addr.clone()).await {
                info!(peer = %target, addr = %addr, "Connected via direct address");
                return DialOutcome::Connected { relayed: false };
            }
        }

        // 2. Bare peer-id dial; resolves through the swarm's address book.
        debug!(peer = %target, "Trying peer-id dial");
        if self.dial_peer(target).await {
            info!(peer = %target, "Connected via address book");
            return DialOutcome::Connected { relayed: false };
        }

        // 3. Relay circuit.
        let circuit = build_relayed_addr(&self.relay_addr, &self.relay_peer_id, &target);
        debug!(peer = %target, addr = %circuit, "Trying relay circuit");
        if self.dial_addr(circuit).await {
            info!(peer = %target, "Connected via relay circuit");
            return DialOutcome::Connected { relayed: true };
        }

        warn!(peer = %target, "All connection strategies failed");
        DialOutcome::Failed
    }

    async fn is_connected(&self, peer_id: PeerId) -> bool {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(SwarmCommand::IsConnected {
                peer_id,
                reply: reply_tx,
            })
            .await
            .is_err()
        {
            return false;
        }
        reply_rx.await.unwrap_or(false)
    }

    async fn dial_addr(&self, addr: Multiaddr) -> bool {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(SwarmCommand::Dial {
                addr,
                reply: reply_tx,
            })
            .await
            .is_err()
        {
            return false;
        }
        matches!(reply_rx.await, Ok(Ok(())))
    }

    async fn dial_peer(&self, peer_id: PeerId) -> bool {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(SwarmCommand::DialPeer {
                peer_id,
                reply: reply_tx,
            })
            .await
            .is_err()
        {
            return false;
        }
        matches!(reply_rx.await, Ok(Ok(())))
    }
}

/// Append `/p2p/<peer_id>` if the address does not carry one already.
fn ensure_peer_id(addr: Multiaddr, peer_id: PeerId) -> Multiaddr {
    if extract_peer_id(&addr).is_some() {
        addr
    } else {
        addr.with(Protocol::P2p(peer_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawn_responder(
        mut cmd_rx: mpsc::Receiver<SwarmCommand>,
        connected: bool,
        dial_ok: impl Fn(&Multiaddr) -> bool + Send + 'static,
        peer_dial_ok: bool,
    ) {
        tokio::spawn(async move {
            while let Some(cmd) = cmd_rx.recv().await {
                match cmd {
                    SwarmCommand::IsConnected { reply, .. } => {
                        let _ = reply.send(connected);
                    }
                    SwarmCommand::Dial { addr, reply } => {
                        let result = if dial_ok(&addr) {
                            Ok(())
                        } else {
                            Err("refused".to_string())
                        };
                        let _ = reply.send(result);
                    }
                    SwarmCommand::DialPeer { reply, .. } => {
                        let result = if peer_dial_ok {
                            Ok(())
                        } else {
                            Err("no addresses".to_string())
                        };
                        let _ = reply.send(result);
                    }
                    _ => {}
                }
            }
        });
    }

    fn dialer(cmd_tx: mpsc::Sender<SwarmCommand>, relay: PeerId) -> Dialer {
        let relay_addr: Multiaddr = "/ip4/10.0.0.1/tcp/4003/ws".parse().unwrap();
        Dialer::new(cmd_tx, relay_addr, relay)
    }

    #[tokio::test]
    async fn test_already_connected_short_circuits() {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        spawn_responder(cmd_rx, true, |_| false, false);

        let d = dialer(cmd_tx, PeerId::random());
        let outcome = d.connect(PeerId::random(), &[]).await;
        assert_eq!(outcome, DialOutcome::AlreadyConnected);
    }

    #[tokio::test]
    async fn test_direct_address_wins() {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        spawn_responder(cmd_rx, false, |_| true, false);

        let d = dialer(cmd_tx, PeerId::random());
        let target = PeerId::random();
        let direct: Multiaddr = "/ip4/192.168.1.5/tcp/9000".parse().unwrap();
        let outcome = d.connect(target, &[direct]).await;
        assert_eq!(outcome, DialOutcome::Connected { relayed: false });
    }

    #[tokio::test]
    async fn test_falls_back_to_relay_circuit() {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        // Only circuit dials succeed.
        spawn_responder(
            cmd_rx,
            false,
            |addr| addr.iter().any(|p| matches!(p, Protocol::P2pCircuit)),
            false,
        );

        let d = dialer(cmd_tx, PeerId::random());
        let target = PeerId::random();
        let direct: Multiaddr = "/ip4/192.168.1.5/tcp/9000".parse().unwrap();
        let outcome = d.connect(target, &[direct]).await;
        assert_eq!(outcome, DialOutcome::Connected { relayed: true });
    }

    #[tokio::test]
    async fn test_all_strategies_fail() {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        spawn_responder(cmd_rx, false, |_| false, false);

        let d = dialer(cmd_tx, PeerId::random());
        let outcome = d.connect(PeerId::random(), &[]).await;
        assert_eq!(outcome, DialOutcome::Failed);
    }

    #[tokio::test]
    async fn test_circuit_addrs_skipped_in_direct_phase() {
        let (cmd_tx, mut cmd_rx) = mpsc::channel(16);
        let relay = PeerId::random();
        let target = PeerId::random();

        let counter = Arc::new(Mutex::new(0usize));
        let counter_clone = counter.clone();
        tokio::spawn(async move {
            while let Some(cmd) = cmd_rx.recv().await {
                match cmd {
                    SwarmCommand::IsConnected { reply, .. } => {
                        let _ = reply.send(false);
                    }
                    SwarmCommand::Dial { reply, .. } => {
                        *counter_clone.lock().unwrap() += 1;
                        let _ = reply.send(Err("refused".into()));
                    }
                    SwarmCommand::DialPeer { reply, .. } => {
                        let _ = reply.send(Err("no addresses".into()));
                    }
                    _ => {}
                }
            }
        });

        let d = dialer(cmd_tx, relay);
        let circuit: Multiaddr =
            format!("/ip4/10.0.0.1/tcp/4003/ws/p2p/{relay}/p2p-circuit/p2p/{target}")
                .parse()
                .unwrap();
        let outcome = d.connect(target, &[circuit]).await;
        assert_eq!(outcome, DialOutcome::Failed);
        // One dial only: the fallback circuit, not the discovery copy.
        assert_eq!(*counter.lock().unwrap(), 1);
    }
}
