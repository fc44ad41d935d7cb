//! Peer coordinator.
//!
//! Single actor owning all peer-side state: the session table, nickname
//! directory, discovered addresses and the active document session. It
//! consumes swarm notifications, user commands and timer ticks, and is the
//! only writer to any of its maps.

use std::collections::HashMap;
use std::time::Duration;

use libp2p::{Multiaddr, PeerId};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use relaypad_net::{
    build_circuit_addr, publish_with_retry, Dialer, SwarmCommand, SwarmNotification,
};
use relaypad_shared::constants::{MESH_SETTLE_DELAY_MS, REDISCOVERY_INTERVAL_SECS};
use relaypad_shared::envelope::{AwarenessState, DiscoveredPeer, Envelope};
use relaypad_shared::topics::{
    discovery_topic, editor_topic, SESSION_PREFIX,
};
use relaypad_shared::now_millis;

use crate::doc::YrsDocument;
use crate::doc_session::{DocOutput, DocSession};
use crate::nicknames::NicknameDirectory;
use crate::session::{ChatEntry, RequestOutcome, SessionPhase, SessionTable};

/// Interval of the document-session timer wheel.
const DOC_TICK_MS: u64 = 200;

/// Commands from the user interface.
#[derive(Debug)]
pub enum PeerCommand {
    ListPeers,
    Connect(String),
    Accept(String),
    Reject(String),
    Say { peer: String, content: String },
    End(String),
    /// Open a fresh editor session, or join an existing channel by name.
    OpenEditor(Option<String>),
    Insert { index: u32, text: String },
    Delete { index: u32, len: u32 },
    ShowDoc,
    Shutdown,
}

/// Events surfaced to the user interface.
#[derive(Debug)]
pub enum PeerEvent {
    Discovered { peer_id: String, nickname: String },
    PeerConnected { peer_id: String, relayed: bool },
    PeerDisconnected { peer_id: String },
    NicknameChanged { peer_id: String, nickname: String },
    SessionRequest { peer_id: String, nickname: String },
    SessionConnected { peer_id: String, topic: String },
    SessionRejected { peer_id: String },
    Chat { sender: String, content: String },
    EditorOpened { topic: String, client_id: u64 },
    EditorPeerJoined { client_id: u64 },
    EditorAwareness {
        client_id: u64,
        nickname: String,
        cursor: Option<u32>,
    },
    DocChanged { contents: String },
    Info(String),
}

pub struct Coordinator {
    local_peer_id: PeerId,
    nickname: String,
    shared_topic: String,
    relay_addr: Multiaddr,
    relay_peer_id: PeerId,
    auto_accept: bool,

    cmd_tx: mpsc::Sender<SwarmCommand>,
    event_tx: mpsc::Sender<PeerEvent>,
    dialer: Dialer,

    sessions: SessionTable,
    nicknames: NicknameDirectory,
    known_addrs: HashMap<String, Vec<Multiaddr>>,
    doc: Option<DocSession<YrsDocument>>,
}

impl Coordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        local_peer_id: PeerId,
        nickname: String,
        shared_topic: String,
        relay_addr: Multiaddr,
        relay_peer_id: PeerId,
        auto_accept: bool,
        cmd_tx: mpsc::Sender<SwarmCommand>,
        event_tx: mpsc::Sender<PeerEvent>,
    ) -> Self {
        let dialer = Dialer::new(cmd_tx.clone(), relay_addr.clone(), relay_peer_id);
        Self {
            local_peer_id,
            nickname,
            shared_topic,
            relay_addr,
            relay_peer_id,
            auto_accept,
            cmd_tx,
            event_tx,
            dialer,
            sessions: SessionTable::new(local_peer_id.to_string()),
            nicknames: NicknameDirectory::new(),
            known_addrs: HashMap::new(),
            doc: None,
        }
    }

    /// Join the network and run until shutdown. Failing to reach the
    /// relay is fatal; without it there is no rendezvous.
    pub async fn run(
        mut self,
        mut notif_rx: mpsc::Receiver<SwarmNotification>,
        mut command_rx: mpsc::Receiver<PeerCommand>,
    ) -> anyhow::Result<()> {
        // 1. Reach the relay.
        let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
        self.cmd_tx
            .send(SwarmCommand::Dial {
                addr: self.relay_addr.clone(),
                reply: reply_tx,
            })
            .await?;
        match reply_rx.await {
            Ok(Ok(())) => info!(relay = %self.relay_peer_id, "Connected to relay"),
            Ok(Err(e)) => anyhow::bail!("relay unreachable at {}: {e}", self.relay_addr),
            Err(_) => anyhow::bail!("swarm task gone during relay dial"),
        }

        // 2. Take a reservation so others can reach us through the relay.
        let circuit = build_circuit_addr(&self.relay_addr, &self.relay_peer_id);
        self.cmd_tx.send(SwarmCommand::ListenOn(circuit)).await?;

        // 3. Let the gossip mesh settle before subscribing, then join the
        // discovery channel and the shared topic.
        tokio::time::sleep(Duration::from_millis(MESH_SETTLE_DELAY_MS)).await;
        self.cmd_tx
            .send(SwarmCommand::Subscribe(discovery_topic(
                &self.local_peer_id.to_string(),
            )))
            .await?;
        self.cmd_tx
            .send(SwarmCommand::Subscribe(self.shared_topic.clone()))
            .await?;

        self.announce().await;

        let mut rediscovery =
            tokio::time::interval(Duration::from_secs(REDISCOVERY_INTERVAL_SECS));
        let mut doc_tick = tokio::time::interval(Duration::from_millis(DOC_TICK_MS));

        loop {
            tokio::select! {
                notification = notif_rx.recv() => {
                    match notification {
                        Some(notification) => self.on_notification(notification).await,
                        None => {
                            warn!("Swarm notification stream ended");
                            break;
                        }
                    }
                }

                command = command_rx.recv() => {
                    match command {
                        Some(PeerCommand::Shutdown) | None => {
                            let _ = self.cmd_tx.send(SwarmCommand::Shutdown).await;
                            break;
                        }
                        Some(command) => self.on_command(command).await,
                    }
                }

                _ = rediscovery.tick() => {
                    self.announce().await;
                    // Re-run the connection strategy against everyone we
                    // know about; already-connected targets short-circuit.
                    let known: Vec<PeerId> = self
                        .known_addrs
                        .keys()
                        .filter_map(|id| id.parse().ok())
                        .collect();
                    for peer in known {
                        self.spawn_connect(peer);
                    }
                }

                _ = doc_tick.tick() => {
                    if let Some(doc) = self.doc.as_mut() {
                        let outputs = doc.tick(now_millis());
                        self.emit_doc_outputs(outputs).await;
                    }
                }
            }
        }

        Ok(())
    }

    /// Publish nickname and presence on the shared topic. Runs every
    /// rediscovery interval; also how late joiners learn about us.
    async fn announce(&mut self) {
        let nickname = Envelope::Nickname {
            peer_id: self.local_peer_id.to_string(),
            nickname: self.nickname.clone(),
        };
        self.publish_retrying(self.shared_topic.clone(), &nickname);

        let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
        let addresses = if self
            .cmd_tx
            .send(SwarmCommand::GetListenAddrs(reply_tx))
            .await
            .is_ok()
        {
            reply_rx
                .await
                .unwrap_or_default()
                .iter()
                .map(|a| a.to_string())
                .collect()
        } else {
            Vec::new()
        };

        let presence = Envelope::PeerPresence {
            peer_id: self.local_peer_id.to_string(),
            nickname: self.nickname.clone(),
            timestamp: now_millis(),
            addresses,
            topic: self.shared_topic.clone(),
        };
        self.publish_retrying(self.shared_topic.clone(), &presence);
    }

    // -----------------------------------------------------------------
    // Swarm notifications
    // -----------------------------------------------------------------

    async fn on_notification(&mut self, notification: SwarmNotification) {
        match notification {
            SwarmNotification::MessageReceived { source, topic, data } => {
                let envelope = match Envelope::from_bytes(&data) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        debug!(topic = %topic, error = %e, "Dropping malformed envelope");
                        return;
                    }
                };
                self.on_envelope(&topic, envelope, source).await;
            }

            SwarmNotification::SubscriptionChanged {
                peer_id,
                topic,
                subscribed,
            } => {
                // Someone joined the shared topic next to us; make sure a
                // link exists without waiting for the relay round-trip.
                if subscribed && topic == self.shared_topic && peer_id != self.relay_peer_id {
                    self.spawn_connect(peer_id);
                }
            }

            SwarmNotification::PeerIdentified {
                peer_id,
                listen_addrs,
            } => {
                if peer_id != self.relay_peer_id {
                    self.known_addrs.insert(peer_id.to_string(), listen_addrs);
                }
            }

            SwarmNotification::PeerConnected {
                peer_id, relayed, ..
            } => {
                if peer_id != self.relay_peer_id {
                    // Make sure the newcomer learns our display name even
                    // if it missed the last announcement.
                    let nickname = Envelope::Nickname {
                        peer_id: self.local_peer_id.to_string(),
                        nickname: self.nickname.clone(),
                    };
                    self.publish_retrying(self.shared_topic.clone(), &nickname);
                    self.emit(PeerEvent::PeerConnected {
                        peer_id: peer_id.to_string(),
                        relayed,
                    })
                    .await;
                }
            }

            SwarmNotification::PeerDisconnected { peer_id } => {
                if peer_id != self.relay_peer_id {
                    // Gone peers get rediscovered from scratch; drop what
                    // we knew so rediscovery does not redial stale addresses.
                    self.known_addrs.remove(&peer_id.to_string());
                    self.nicknames.forget(&peer_id.to_string());
                    self.emit(PeerEvent::PeerDisconnected {
                        peer_id: peer_id.to_string(),
                    })
                    .await;
                }
            }

            SwarmNotification::RelayReservation { relay_peer } => {
                self.emit(PeerEvent::Info(format!(
                    "relay reservation active via {relay_peer}"
                )))
                .await;
            }
        }
    }

    async fn on_envelope(&mut self, topic: &str, envelope: Envelope, source: Option<PeerId>) {
        let own_discovery = topic == discovery_topic(&self.local_peer_id.to_string());
        if topic == self.shared_topic || own_discovery {
            self.on_control_envelope(envelope).await;
        } else if topic.starts_with(SESSION_PREFIX) {
            self.on_session_envelope(topic, envelope).await;
        } else if self.doc.as_ref().is_some_and(|d| d.topic() == topic) {
            let outputs = match self.doc.as_mut() {
                Some(doc) => doc.handle_envelope(&envelope, now_millis()),
                None => return,
            };
            self.emit_doc_outputs(outputs).await;
        } else {
            debug!(topic = %topic, source = ?source, "Message on unexpected topic");
        }
    }

    async fn on_control_envelope(&mut self, envelope: Envelope) {
        let local_id = self.local_peer_id.to_string();
        match envelope {
            Envelope::Nickname { peer_id, nickname } => {
                if peer_id != local_id {
                    self.nicknames.record(&peer_id, &nickname);
                    self.emit(PeerEvent::NicknameChanged { peer_id, nickname })
                        .await;
                }
            }

            Envelope::PeerPresence {
                peer_id,
                nickname,
                addresses,
                ..
            } => {
                if peer_id == local_id {
                    return;
                }
                self.nicknames.record(&peer_id, &nickname);
                let addrs: Vec<Multiaddr> = addresses
                    .iter()
                    .filter_map(|a| a.parse().ok())
                    .collect();
                if !addrs.is_empty() {
                    self.known_addrs.insert(peer_id.clone(), addrs);
                }
                if let Ok(peer) = peer_id.parse::<PeerId>() {
                    self.spawn_connect(peer);
                }
            }

            Envelope::ConnectionRequest {
                peer_id,
                nickname,
                target_peer_id,
                ..
            } => {
                if peer_id == local_id {
                    return;
                }
                if let Some(target) = &target_peer_id {
                    if *target != local_id {
                        return;
                    }
                }
                if self.sessions.on_request(&peer_id, &nickname, now_millis()) {
                    self.emit(PeerEvent::SessionRequest {
                        peer_id: peer_id.clone(),
                        nickname,
                    })
                    .await;
                    if self.auto_accept {
                        self.accept_session(&peer_id).await;
                    }
                }
            }

            Envelope::ConnectionAccepted {
                peer_id,
                private_topic,
                ..
            } => {
                if peer_id == local_id {
                    return;
                }
                match self
                    .sessions
                    .on_accepted(&peer_id, &private_topic, now_millis())
                {
                    Ok(()) => {
                        let _ = self
                            .cmd_tx
                            .send(SwarmCommand::Subscribe(private_topic.clone()))
                            .await;
                        self.emit(PeerEvent::SessionConnected {
                            peer_id,
                            topic: private_topic,
                        })
                        .await;
                    }
                    Err(e) => debug!(peer = %peer_id, error = %e, "Dropping acceptance"),
                }
            }

            Envelope::ConnectionRejected { peer_id, .. } => {
                if peer_id == local_id {
                    return;
                }
                match self.sessions.on_rejected(&peer_id) {
                    Ok(()) => self.emit(PeerEvent::SessionRejected { peer_id }).await,
                    Err(e) => debug!(peer = %peer_id, error = %e, "Dropping rejection"),
                }
            }

            Envelope::RelayDiscovery { peers, .. }
            | Envelope::PeerDiscovery { peers, .. } => {
                self.on_discovered(peers).await;
            }

            Envelope::NewPeer { peer, .. } => {
                self.on_discovered(vec![peer]).await;
            }

            other => {
                debug!(envelope = ?other, "Unhandled envelope on control topic");
            }
        }
    }

    async fn on_discovered(&mut self, peers: Vec<DiscoveredPeer>) {
        let local_id = self.local_peer_id.to_string();
        for discovered in peers {
            if discovered.peer_id == local_id {
                continue;
            }
            let addrs: Vec<Multiaddr> = discovered
                .multiaddrs
                .iter()
                .filter_map(|a| a.parse().ok())
                .collect();
            self.known_addrs
                .entry(discovered.peer_id.clone())
                .or_default()
                .extend(addrs);

            self.emit(PeerEvent::Discovered {
                peer_id: discovered.peer_id.clone(),
                nickname: self.nicknames.display(&discovered.peer_id),
            })
            .await;

            if let Ok(peer) = discovered.peer_id.parse::<PeerId>() {
                self.spawn_connect(peer);
            }
        }
    }

    async fn on_session_envelope(&mut self, topic: &str, envelope: Envelope) {
        if let Envelope::PrivateMessage {
            sender,
            content,
            timestamp,
        } = envelope
        {
            if sender == self.local_peer_id.to_string() {
                return;
            }
            let display = self.nicknames.display(&sender);
            self.sessions.record_message(
                topic,
                ChatEntry {
                    sender: sender.clone(),
                    content: content.clone(),
                    timestamp,
                },
            );
            self.emit(PeerEvent::Chat {
                sender: display,
                content,
            })
            .await;
        }
    }

    // -----------------------------------------------------------------
    // User commands
    // -----------------------------------------------------------------

    async fn on_command(&mut self, command: PeerCommand) {
        match command {
            PeerCommand::ListPeers => {
                let mut lines = Vec::new();
                for (peer_id, addrs) in &self.known_addrs {
                    let session = match self.sessions.get(peer_id) {
                        Some(s) => format!("{:?} msgs={}", s.phase, s.messages.len()),
                        None => "-".to_string(),
                    };
                    lines.push(format!(
                        "{} ({}) addrs={} session={}",
                        self.nicknames.display(peer_id),
                        peer_id,
                        addrs.len(),
                        session
                    ));
                }
                // Sessions can outlive address knowledge (e.g. the remote
                // restarted); show those too.
                for record in self.sessions.iter() {
                    if !self.known_addrs.contains_key(&record.peer_id) {
                        lines.push(format!(
                            "{} ({}) addrs=0 session={:?} msgs={} since={}",
                            record.nickname,
                            record.peer_id,
                            record.phase,
                            record.messages.len(),
                            record.since
                        ));
                    }
                }
                if lines.is_empty() {
                    lines.push("no peers discovered yet".to_string());
                }
                self.emit(PeerEvent::Info(lines.join("\n"))).await;
            }

            PeerCommand::Connect(target) => {
                let Some(peer_id) = self.resolve_peer(&target) else {
                    self.emit(PeerEvent::Info(format!("unknown peer: {target}")))
                        .await;
                    return;
                };
                match self
                    .sessions
                    .start_request(&peer_id, &self.nickname, now_millis())
                {
                    Ok(RequestOutcome::Sent) => {
                        let request = Envelope::ConnectionRequest {
                            peer_id: self.local_peer_id.to_string(),
                            nickname: self.nickname.clone(),
                            timestamp: now_millis(),
                            target_peer_id: Some(peer_id.clone()),
                        };
                        self.publish_retrying(self.shared_topic.clone(), &request);
                        self.emit(PeerEvent::Info(format!("request sent to {peer_id}")))
                            .await;
                    }
                    Ok(RequestOutcome::Resume(topic)) => {
                        // The session may have been ended locally; rejoin
                        // its channel. Subscribing twice is harmless.
                        let _ = self
                            .cmd_tx
                            .send(SwarmCommand::Subscribe(topic.clone()))
                            .await;
                        self.emit(PeerEvent::Info(format!(
                            "resuming session on {topic}"
                        )))
                        .await;
                    }
                    Ok(RequestOutcome::AwaitingResponse) => {
                        self.emit(PeerEvent::Info("request already pending".into()))
                            .await;
                    }
                    Err(e) => self.emit(PeerEvent::Info(e.to_string())).await,
                }
            }

            PeerCommand::Accept(target) => {
                let Some(peer_id) = self.resolve_peer(&target) else {
                    self.emit(PeerEvent::Info(format!("unknown peer: {target}")))
                        .await;
                    return;
                };
                self.accept_session(&peer_id).await;
            }

            PeerCommand::Reject(target) => {
                let Some(peer_id) = self.resolve_peer(&target) else {
                    self.emit(PeerEvent::Info(format!("unknown peer: {target}")))
                        .await;
                    return;
                };
                match self.sessions.reject(&peer_id) {
                    Ok(()) => {
                        let rejection = Envelope::ConnectionRejected {
                            peer_id: self.local_peer_id.to_string(),
                            timestamp: now_millis(),
                        };
                        self.publish_retrying(self.shared_topic.clone(), &rejection);
                    }
                    Err(e) => self.emit(PeerEvent::Info(e.to_string())).await,
                }
            }

            PeerCommand::Say { peer, content } => {
                let Some(peer_id) = self.resolve_peer(&peer) else {
                    self.emit(PeerEvent::Info(format!("unknown peer: {peer}")))
                        .await;
                    return;
                };
                let topic = match self.sessions.get(&peer_id) {
                    Some(record) if record.phase == SessionPhase::Connected => {
                        record.private_topic.clone()
                    }
                    _ => None,
                };
                let Some(topic) = topic else {
                    self.emit(PeerEvent::Info(format!("no session with {peer_id}")))
                        .await;
                    return;
                };
                let timestamp = now_millis();
                let message = Envelope::PrivateMessage {
                    sender: self.local_peer_id.to_string(),
                    content: content.clone(),
                    timestamp,
                };
                self.sessions.record_message(
                    &topic,
                    ChatEntry {
                        sender: self.local_peer_id.to_string(),
                        content,
                        timestamp,
                    },
                );
                self.publish_retrying(topic, &message);
            }

            PeerCommand::End(target) => {
                let Some(peer_id) = self.resolve_peer(&target) else {
                    self.emit(PeerEvent::Info(format!("unknown peer: {target}")))
                        .await;
                    return;
                };
                match self.sessions.end(&peer_id) {
                    Some(topic) => {
                        let _ = self.cmd_tx.send(SwarmCommand::Unsubscribe(topic)).await;
                        self.emit(PeerEvent::Info(format!("session with {peer_id} ended")))
                            .await;
                    }
                    None => {
                        self.emit(PeerEvent::Info(format!("no live session with {peer_id}")))
                            .await;
                    }
                }
            }

            PeerCommand::OpenEditor(channel) => {
                if let Some(doc) = &self.doc {
                    self.emit(PeerEvent::Info(format!(
                        "editor already open on {}",
                        doc.topic()
                    )))
                    .await;
                    return;
                }
                let topic = channel
                    .unwrap_or_else(|| editor_topic(&self.shared_topic, now_millis()));
                let _ = self
                    .cmd_tx
                    .send(SwarmCommand::Subscribe(topic.clone()))
                    .await;
                let client_id = rand::random::<u32>() as u64;
                let (doc, outputs) = DocSession::new(
                    topic.clone(),
                    YrsDocument::new(),
                    client_id,
                    AwarenessState {
                        nickname: self.nickname.clone(),
                        cursor: None,
                    },
                    now_millis(),
                );
                self.doc = Some(doc);
                self.emit(PeerEvent::EditorOpened { topic, client_id }).await;
                self.emit_doc_outputs(outputs).await;
            }

            PeerCommand::Insert { index, text } => {
                let outputs = match self.doc.as_mut() {
                    Some(doc) => {
                        let mut outputs = doc.local_insert(index, &text);
                        outputs.extend(doc.set_local_awareness(AwarenessState {
                            nickname: self.nickname.clone(),
                            cursor: Some(index + text.chars().count() as u32),
                        }));
                        outputs
                    }
                    None => {
                        self.emit(PeerEvent::Info("no editor open".into())).await;
                        return;
                    }
                };
                self.emit_doc_outputs(outputs).await;
            }

            PeerCommand::Delete { index, len } => {
                let outputs = match self.doc.as_mut() {
                    Some(doc) => {
                        let mut outputs = doc.local_delete(index, len);
                        outputs.extend(doc.set_local_awareness(AwarenessState {
                            nickname: self.nickname.clone(),
                            cursor: Some(index),
                        }));
                        outputs
                    }
                    None => {
                        self.emit(PeerEvent::Info("no editor open".into())).await;
                        return;
                    }
                };
                self.emit_doc_outputs(outputs).await;
            }

            PeerCommand::ShowDoc => {
                let info = match &self.doc {
                    Some(doc) => {
                        let mut lines = vec![format!(
                            "[{}] client={} synced={}",
                            doc.topic(),
                            doc.client_id(),
                            doc.is_synced()
                        )];
                        for (client_id, state) in doc.awareness() {
                            let cursor = state
                                .cursor
                                .map(|c| format!(" at {c}"))
                                .unwrap_or_default();
                            lines.push(format!(
                                "  {} (client {client_id}){cursor}",
                                state.nickname
                            ));
                        }
                        lines.push(doc.contents());
                        lines.join("\n")
                    }
                    None => "no editor open".to_string(),
                };
                self.emit(PeerEvent::Info(info)).await;
            }

            PeerCommand::Shutdown => unreachable!("handled in run loop"),
        }
    }

    async fn accept_session(&mut self, peer_id: &str) {
        match self.sessions.accept(peer_id, now_millis()) {
            Ok(topic) => {
                let _ = self
                    .cmd_tx
                    .send(SwarmCommand::Subscribe(topic.clone()))
                    .await;
                let acceptance = Envelope::ConnectionAccepted {
                    peer_id: self.local_peer_id.to_string(),
                    private_topic: topic.clone(),
                    timestamp: now_millis(),
                };
                self.publish_retrying(self.shared_topic.clone(), &acceptance);
                self.emit(PeerEvent::SessionConnected {
                    peer_id: peer_id.to_string(),
                    topic,
                })
                .await;
            }
            Err(e) => self.emit(PeerEvent::Info(e.to_string())).await,
        }
    }

    // -----------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------

    async fn emit_doc_outputs(&mut self, outputs: Vec<DocOutput>) {
        let topic = match &self.doc {
            Some(doc) => doc.topic().to_string(),
            None => return,
        };
        for output in outputs {
            match output {
                DocOutput::Publish(envelope) => {
                    self.publish_retrying(topic.clone(), &envelope);
                }
                DocOutput::ContentChanged => {
                    let contents = self
                        .doc
                        .as_ref()
                        .map(|d| d.contents())
                        .unwrap_or_default();
                    self.emit(PeerEvent::DocChanged { contents }).await;
                }
                DocOutput::PeerJoined(client_id) => {
                    self.emit(PeerEvent::EditorPeerJoined { client_id }).await;
                }
                DocOutput::AwarenessChanged { client_id, state } => {
                    self.emit(PeerEvent::EditorAwareness {
                        client_id,
                        nickname: state.nickname,
                        cursor: state.cursor,
                    })
                    .await;
                }
            }
        }
    }

    /// Fire-and-forget publish with mesh-formation retry.
    fn publish_retrying(&self, topic: String, envelope: &Envelope) {
        let bytes = match envelope.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "Failed to encode envelope");
                return;
            }
        };
        let cmd_tx = self.cmd_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = publish_with_retry(&cmd_tx, &topic, bytes).await {
                warn!(topic = %topic, error = %e, "Giving up on publish");
            }
        });
    }

    /// Dial a peer in the background; all failure handling is logging.
    fn spawn_connect(&self, peer: PeerId) {
        let dialer = self.dialer.clone();
        let addrs = self
            .known_addrs
            .get(&peer.to_string())
            .cloned()
            .unwrap_or_default();
        tokio::spawn(async move {
            let outcome = dialer.connect(peer, &addrs).await;
            debug!(peer = %peer, outcome = ?outcome, "Connect attempt finished");
        });
    }

    /// Resolve user input to a known peer id: exact id, unique id prefix,
    /// or exact nickname.
    fn resolve_peer(&self, input: &str) -> Option<String> {
        if self.known_addrs.contains_key(input) || self.sessions.get(input).is_some() {
            return Some(input.to_string());
        }
        let mut candidates: Vec<&String> = self
            .known_addrs
            .keys()
            .filter(|id| id.starts_with(input) || self.nicknames.display(id) == input)
            .collect();
        candidates.sort();
        candidates.dedup();
        match candidates.as_slice() {
            [single] => Some((*single).clone()),
            _ => None,
        }
    }

    async fn emit(&self, event: PeerEvent) {
        let _ = self.event_tx.send(event).await;
    }
}
