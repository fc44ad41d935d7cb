//! JSON wire envelopes exchanged over gossipsub topics.
//!
//! Every message is a UTF-8 JSON object with a `type` discriminator. Field
//! names are camelCase on the wire. Binary CRDT payloads travel as JSON
//! number arrays, which keeps the whole protocol inspectable at the cost
//! of some overhead, acceptable at the message sizes involved.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// A peer the relay is advertising, together with addresses it can be
/// dialed at (typically a single circuit-relay address).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredPeer {
    pub peer_id: String,
    pub multiaddrs: Vec<String>,
}

/// Ephemeral participant state carried opaquely inside `yjs-awareness`
/// payloads: a display name plus an optional caret position. Last write
/// per client id wins; nothing here is persisted or merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwarenessState {
    pub nickname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<u32>,
}

impl AwarenessState {
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// All wire messages, discriminated by the `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum Envelope {
    /// Cosmetic display-name announcement on the shared topic.
    Nickname { peer_id: String, nickname: String },

    /// Ask a specific peer to open a private session.
    ConnectionRequest {
        peer_id: String,
        nickname: String,
        timestamp: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_peer_id: Option<String>,
    },

    /// Accept a pending request; names the freshly derived private topic.
    ConnectionAccepted {
        peer_id: String,
        private_topic: String,
        timestamp: u64,
    },

    /// Decline a pending request.
    ConnectionRejected { peer_id: String, timestamp: u64 },

    /// Chat message on a private session topic.
    PrivateMessage {
        sender: String,
        content: String,
        timestamp: u64,
    },

    /// Presence announcement carrying dialable addresses.
    PeerPresence {
        peer_id: String,
        nickname: String,
        timestamp: u64,
        addresses: Vec<String>,
        topic: String,
    },

    /// Relay -> peer: existing members of a topic (private channel form).
    PeerDiscovery {
        topic: String,
        peers: Vec<DiscoveredPeer>,
    },

    /// Relay -> peer: a single peer just joined a topic.
    NewPeer { topic: String, peer: DiscoveredPeer },

    /// Relay -> peer: existing members, published on the shared topic itself.
    RelayDiscovery {
        relay_id: String,
        peers: Vec<DiscoveredPeer>,
    },

    /// Document session: announce an ephemeral client id on the channel.
    YjsPresence { client_id: u64, timestamp: u64 },

    /// Document session: ask any peer for a full state transfer.
    YjsSyncRequest { client_id: u64, timestamp: u64 },

    /// Document session: full encoded document state, optionally targeted.
    YjsSync {
        client_id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_client_id: Option<u64>,
        state: Vec<u8>,
    },

    /// Document session: incremental CRDT update.
    YjsUpdate { client_id: u64, update: Vec<u8> },

    /// Document session: ephemeral participant state, encoded
    /// [`AwarenessState`] bytes.
    YjsAwareness { client_id: u64, update: Vec<u8> },
}

impl Envelope {
    /// Serialize to UTF-8 JSON bytes for publishing.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize from received bytes. Unknown `type` values and JSON
    /// parse failures both surface as `MalformedEnvelope`; callers drop
    /// such messages.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_tags_match_wire_names() {
        let env = Envelope::ConnectionRequest {
            peer_id: "12D3KooWA".into(),
            nickname: "alice".into(),
            timestamp: 1_700_000_000_000,
            target_peer_id: Some("12D3KooWB".into()),
        };
        let json: serde_json::Value =
            serde_json::from_slice(&env.to_bytes().unwrap()).unwrap();
        assert_eq!(json["type"], "connection-request");
        assert_eq!(json["peerId"], "12D3KooWA");
        assert_eq!(json["targetPeerId"], "12D3KooWB");
    }

    #[test]
    fn test_roundtrip_relay_discovery() {
        let env = Envelope::RelayDiscovery {
            relay_id: "12D3KooWRelay".into(),
            peers: vec![DiscoveredPeer {
                peer_id: "12D3KooWA".into(),
                multiaddrs: vec![
                    "/ip4/10.0.0.1/tcp/4003/ws/p2p/12D3KooWRelay/p2p-circuit/p2p/12D3KooWA"
                        .into(),
                ],
            }],
        };
        let restored = Envelope::from_bytes(&env.to_bytes().unwrap()).unwrap();
        assert_eq!(env, restored);
    }

    #[test]
    fn test_yjs_sync_optional_target() {
        // Broadcast form omits targetClientId entirely
        let env = Envelope::YjsSync {
            client_id: 42,
            target_client_id: None,
            state: vec![1, 2, 3],
        };
        let json: serde_json::Value =
            serde_json::from_slice(&env.to_bytes().unwrap()).unwrap();
        assert_eq!(json["type"], "yjs-sync");
        assert!(json.get("targetClientId").is_none());
        assert_eq!(json["state"], serde_json::json!([1, 2, 3]));
    }

    #[test]
    fn test_foreign_fields_are_rejected_gracefully() {
        // A message with an unknown type must not parse
        let raw = br#"{"type":"totally-unknown","peerId":"x"}"#;
        assert!(Envelope::from_bytes(raw).is_err());
        // Plain text is not an envelope either
        assert!(Envelope::from_bytes(b"hello world").is_err());
    }

    #[test]
    fn test_awareness_state_roundtrip() {
        let state = AwarenessState {
            nickname: "alice".into(),
            cursor: Some(14),
        };
        let bytes = state.to_bytes().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["nickname"], "alice");
        assert_eq!(json["cursor"], 14);
        assert_eq!(AwarenessState::from_bytes(&bytes).unwrap(), state);

        // Cursor-less form omits the field and still parses.
        let bare = AwarenessState {
            nickname: "bob".into(),
            cursor: None,
        };
        let bytes = bare.to_bytes().unwrap();
        assert!(serde_json::from_slice::<serde_json::Value>(&bytes)
            .unwrap()
            .get("cursor")
            .is_none());
        assert_eq!(AwarenessState::from_bytes(&bytes).unwrap(), bare);
    }

    #[test]
    fn test_connection_request_without_target_parses() {
        let raw = br#"{"type":"connection-request","peerId":"a","nickname":"n","timestamp":1}"#;
        let env = Envelope::from_bytes(raw).unwrap();
        match env {
            Envelope::ConnectionRequest {
                target_peer_id, ..
            } => assert!(target_peer_id.is_none()),
            other => panic!("unexpected envelope: {other:?}"),
        }
    }
}
