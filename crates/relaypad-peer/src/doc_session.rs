//! Document session protocol.
//!
//! Runs over one editor topic and keeps a [`MergeableDocument`] converged
//! across its subscribers. The machine is pure: callers feed in envelopes
//! and clock ticks, and get back envelopes to publish plus local events.
//!
//! Joining works without any coordinator:
//! - every participant picks a random numeric client id and announces it
//! - a joiner asks for full state (`yjs-sync-request`) and retries every
//!   resync interval until some peer answers
//! - if nobody answers and the document is empty, the lowest client id
//!   present seeds the document after a short debounce, so exactly one
//!   peer wins the empty-room race
//! - when a new client id shows up, the side with the smaller id pushes
//!   full state to it after a short delay, covering joiners whose
//!   sync-request was lost while the mesh formed
//!
//! Alongside document state, each participant broadcasts an ephemeral
//! [`AwarenessState`] (display name, caret position). The machine keeps
//! the last state per remote client id; entries disappear with the
//! session.
//!
//! All messages echo back through the mesh; the machine drops anything
//! carrying its own client id.

use std::collections::HashMap;

use relaypad_shared::constants::{
    RESYNC_INTERVAL_SECS, SEED_DEBOUNCE_MS, STATE_PUSH_DELAY_MS,
};
use relaypad_shared::envelope::{AwarenessState, Envelope};
use tracing::{debug, warn};

use crate::doc::MergeableDocument;

/// Placed into an empty document by whichever participant wins the seed
/// race, so joiners land in a non-blank editor.
const INITIAL_CONTENT: &str =
    "Welcome to the shared document.\nEveryone on this channel edits the same text.\n";

/// What the machine wants done after processing an input.
#[derive(Debug)]
pub enum DocOutput {
    /// Publish this envelope on the session's editor topic.
    Publish(Envelope),
    /// Local document content changed.
    ContentChanged,
    /// A new participant announced itself.
    PeerJoined(u64),
    /// Another participant's ephemeral state changed.
    AwarenessChanged { client_id: u64, state: AwarenessState },
}

/// One collaborative editing session on an editor topic.
pub struct DocSession<D: MergeableDocument> {
    topic: String,
    client_id: u64,
    doc: D,
    synced: bool,
    /// client id -> last seen, millis
    peers: HashMap<u64, u64>,
    local_awareness: AwarenessState,
    /// client id -> last received ephemeral state
    remote_awareness: HashMap<u64, AwarenessState>,
    seed_deadline: Option<u64>,
    push_deadlines: Vec<(u64, u64)>,
    last_sync_request: u64,
}

impl<D: MergeableDocument> DocSession<D> {
    /// Start a session: announce presence and awareness, request state,
    /// and arm the empty-room seed debounce.
    pub fn new(
        topic: String,
        doc: D,
        client_id: u64,
        awareness: AwarenessState,
        now: u64,
    ) -> (Self, Vec<DocOutput>) {
        let session = Self {
            topic,
            client_id,
            doc,
            synced: false,
            peers: HashMap::new(),
            local_awareness: awareness,
            remote_awareness: HashMap::new(),
            seed_deadline: Some(now + SEED_DEBOUNCE_MS),
            push_deadlines: Vec::new(),
            last_sync_request: now,
        };
        let mut outputs = vec![
            DocOutput::Publish(Envelope::YjsPresence {
                client_id,
                timestamp: now,
            }),
            DocOutput::Publish(Envelope::YjsSyncRequest {
                client_id,
                timestamp: now,
            }),
        ];
        outputs.extend(session.awareness_envelope().map(DocOutput::Publish));
        (session, outputs)
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn client_id(&self) -> u64 {
        self.client_id
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn contents(&self) -> String {
        self.doc.contents()
    }

    /// Last known ephemeral state per remote participant.
    pub fn awareness(&self) -> &HashMap<u64, AwarenessState> {
        &self.remote_awareness
    }

    /// Replace the local ephemeral state and broadcast it.
    pub fn set_local_awareness(&mut self, state: AwarenessState) -> Vec<DocOutput> {
        self.local_awareness = state;
        self.awareness_envelope()
            .map(DocOutput::Publish)
            .into_iter()
            .collect()
    }

    fn awareness_envelope(&self) -> Option<Envelope> {
        match self.local_awareness.to_bytes() {
            Ok(update) => Some(Envelope::YjsAwareness {
                client_id: self.client_id,
                update,
            }),
            Err(e) => {
                warn!(topic = %self.topic, error = %e, "Failed to encode awareness");
                None
            }
        }
    }

    /// Feed one received envelope through the machine.
    pub fn handle_envelope(&mut self, envelope: &Envelope, now: u64) -> Vec<DocOutput> {
        let mut out = Vec::new();
        match envelope {
            Envelope::YjsPresence { client_id, .. } => {
                if *client_id == self.client_id {
                    return out;
                }
                let newcomer = self.peers.insert(*client_id, now).is_none();
                if newcomer {
                    debug!(
                        topic = %self.topic,
                        client = client_id,
                        "Editor participant joined"
                    );
                    out.push(DocOutput::PeerJoined(*client_id));
                    // Introduce ourselves to the newcomer.
                    out.push(DocOutput::Publish(Envelope::YjsPresence {
                        client_id: self.client_id,
                        timestamp: now,
                    }));
                    out.extend(self.awareness_envelope().map(DocOutput::Publish));
                    // Smaller id is responsible for bringing them up to date.
                    if self.client_id < *client_id {
                        self.push_deadlines
                            .push((*client_id, now + STATE_PUSH_DELAY_MS));
                    }
                }
            }

            Envelope::YjsSyncRequest { client_id, .. } => {
                if *client_id == self.client_id {
                    return out;
                }
                self.peers.insert(*client_id, now);
                // Answer only when we have authoritative state to give.
                if self.synced || !self.doc.is_empty() {
                    out.push(DocOutput::Publish(Envelope::YjsSync {
                        client_id: self.client_id,
                        target_client_id: Some(*client_id),
                        state: self.doc.full_state(),
                    }));
                }
            }

            Envelope::YjsSync {
                client_id,
                target_client_id,
                state,
            } => {
                if *client_id == self.client_id {
                    return out;
                }
                if let Some(target) = target_client_id {
                    if *target != self.client_id {
                        return out;
                    }
                }
                self.peers.insert(*client_id, now);
                match self.doc.apply_update(state) {
                    Ok(()) => {
                        self.synced = true;
                        self.seed_deadline = None;
                        out.push(DocOutput::ContentChanged);
                    }
                    Err(e) => {
                        warn!(topic = %self.topic, error = %e, "Dropping bad sync state");
                    }
                }
            }

            Envelope::YjsUpdate { client_id, update } => {
                if *client_id == self.client_id {
                    return out;
                }
                self.peers.insert(*client_id, now);
                match self.doc.apply_update(update) {
                    Ok(()) => {
                        // Live updates imply the document exists; stop
                        // waiting for a full transfer.
                        self.synced = true;
                        self.seed_deadline = None;
                        out.push(DocOutput::ContentChanged);
                    }
                    Err(e) => {
                        warn!(topic = %self.topic, error = %e, "Dropping bad update");
                    }
                }
            }

            Envelope::YjsAwareness { client_id, update } => {
                if *client_id == self.client_id {
                    return out;
                }
                self.peers.insert(*client_id, now);
                match AwarenessState::from_bytes(update) {
                    Ok(state) => {
                        let changed =
                            self.remote_awareness.get(client_id) != Some(&state);
                        self.remote_awareness.insert(*client_id, state.clone());
                        if changed {
                            out.push(DocOutput::AwarenessChanged {
                                client_id: *client_id,
                                state,
                            });
                        }
                    }
                    Err(e) => {
                        warn!(topic = %self.topic, error = %e, "Dropping bad awareness payload");
                    }
                }
            }

            _ => {}
        }
        out
    }

    /// Advance timers. Call periodically while the session is open.
    pub fn tick(&mut self, now: u64) -> Vec<DocOutput> {
        let mut out = Vec::new();

        // Empty-room seeding: the debounce expired with no state received.
        if let Some(deadline) = self.seed_deadline {
            if now >= deadline {
                self.seed_deadline = None;
                let lowest = self
                    .peers
                    .keys()
                    .copied()
                    .chain(std::iter::once(self.client_id))
                    .min()
                    .unwrap_or(self.client_id);
                if !self.synced && self.doc.is_empty() && lowest == self.client_id {
                    debug!(topic = %self.topic, "Seeding empty document");
                    self.doc.insert(0, INITIAL_CONTENT);
                    self.synced = true;
                    out.push(DocOutput::Publish(Envelope::YjsSync {
                        client_id: self.client_id,
                        target_client_id: None,
                        state: self.doc.full_state(),
                    }));
                    out.push(DocOutput::ContentChanged);
                }
            }
        }

        // Proactive state pushes to newcomers.
        let due: Vec<u64> = self
            .push_deadlines
            .iter()
            .filter(|(_, deadline)| now >= *deadline)
            .map(|(target, _)| *target)
            .collect();
        self.push_deadlines.retain(|(_, deadline)| now < *deadline);
        for target in due {
            if self.synced || !self.doc.is_empty() {
                out.push(DocOutput::Publish(Envelope::YjsSync {
                    client_id: self.client_id,
                    target_client_id: Some(target),
                    state: self.doc.full_state(),
                }));
            }
        }

        // Not synced yet: keep asking.
        if !self.synced && now.saturating_sub(self.last_sync_request) >= RESYNC_INTERVAL_SECS * 1_000
        {
            self.last_sync_request = now;
            out.push(DocOutput::Publish(Envelope::YjsSyncRequest {
                client_id: self.client_id,
                timestamp: now,
            }));
        }

        out
    }

    /// Apply a local insert and broadcast the resulting update.
    pub fn local_insert(&mut self, index: u32, text: &str) -> Vec<DocOutput> {
        let update = self.doc.insert(index, text);
        self.synced = true;
        self.seed_deadline = None;
        vec![
            DocOutput::Publish(Envelope::YjsUpdate {
                client_id: self.client_id,
                update,
            }),
            DocOutput::ContentChanged,
        ]
    }

    /// Apply a local delete and broadcast the resulting update.
    pub fn local_delete(&mut self, index: u32, len: u32) -> Vec<DocOutput> {
        let update = self.doc.delete(index, len);
        self.synced = true;
        self.seed_deadline = None;
        vec![
            DocOutput::Publish(Envelope::YjsUpdate {
                client_id: self.client_id,
                update,
            }),
            DocOutput::ContentChanged,
        ]
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc::YrsDocument;

    fn session(client_id: u64, now: u64) -> (DocSession<YrsDocument>, Vec<DocOutput>) {
        DocSession::new(
            "editor-demo-1".into(),
            YrsDocument::new(),
            client_id,
            AwarenessState {
                nickname: format!("peer-{client_id}"),
                cursor: None,
            },
            now,
        )
    }

    fn published(outputs: &[DocOutput]) -> Vec<&Envelope> {
        outputs
            .iter()
            .filter_map(|o| match o {
                DocOutput::Publish(env) => Some(env),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_start_announces_and_requests_state() {
        let (_, outputs) = session(7, 1_000);
        let envs = published(&outputs);
        assert_eq!(envs.len(), 3);
        assert!(matches!(envs[0], Envelope::YjsPresence { client_id: 7, .. }));
        assert!(matches!(envs[1], Envelope::YjsSyncRequest { client_id: 7, .. }));
        assert!(matches!(envs[2], Envelope::YjsAwareness { client_id: 7, .. }));
    }

    #[test]
    fn test_own_messages_ignored() {
        let (mut s, _) = session(7, 1_000);
        let echo = Envelope::YjsUpdate {
            client_id: 7,
            update: vec![1, 2, 3],
        };
        assert!(s.handle_envelope(&echo, 1_100).is_empty());
    }

    #[test]
    fn test_lone_lowest_peer_seeds_after_debounce() {
        let (mut s, _) = session(7, 1_000);
        assert!(s.tick(1_000 + SEED_DEBOUNCE_MS - 1).is_empty());
        let outputs = s.tick(1_000 + SEED_DEBOUNCE_MS);
        let envs = published(&outputs);
        assert_eq!(envs.len(), 1);
        match envs[0] {
            Envelope::YjsSync {
                client_id: 7,
                target_client_id: None,
                state,
            } => assert!(!state.is_empty()),
            other => panic!("unexpected envelope: {other:?}"),
        }
        assert!(s.is_synced());
        // Seeding writes the starter text, not an empty document.
        assert_eq!(s.contents(), INITIAL_CONTENT);
        assert!(outputs
            .iter()
            .any(|o| matches!(o, DocOutput::ContentChanged)));
    }

    #[test]
    fn test_seed_broadcast_carries_starter_text() {
        let (mut a, _) = session(1, 1_000);
        let (mut b, _) = session(2, 1_000);

        let seed = a.tick(1_000 + SEED_DEBOUNCE_MS);
        for env in published(&seed) {
            b.handle_envelope(env, 1_000 + SEED_DEBOUNCE_MS);
        }
        assert_eq!(b.contents(), INITIAL_CONTENT);
        assert!(!b.contents().is_empty());
    }

    #[test]
    fn test_higher_id_defers_seeding() {
        let (mut s, _) = session(9, 1_000);
        let presence = Envelope::YjsPresence {
            client_id: 3,
            timestamp: 1_050,
        };
        s.handle_envelope(&presence, 1_050);

        let outputs = s.tick(1_000 + SEED_DEBOUNCE_MS);
        assert!(published(&outputs)
            .iter()
            .all(|e| !matches!(e, Envelope::YjsSync { .. })));
        assert!(!s.is_synced());
    }

    #[test]
    fn test_incoming_sync_cancels_seeding() {
        let (mut s, _) = session(7, 1_000);
        let mut source = YrsDocument::new();
        source.insert(0, "existing");
        let sync = Envelope::YjsSync {
            client_id: 9,
            target_client_id: None,
            state: source.full_state(),
        };
        let outputs = s.handle_envelope(&sync, 1_100);
        assert!(outputs
            .iter()
            .any(|o| matches!(o, DocOutput::ContentChanged)));
        assert_eq!(s.contents(), "existing");
        assert!(s.is_synced());

        // No seed broadcast later.
        let outputs = s.tick(1_000 + SEED_DEBOUNCE_MS);
        assert!(published(&outputs).is_empty());
    }

    #[test]
    fn test_sync_targeted_at_other_client_ignored() {
        let (mut s, _) = session(7, 1_000);
        let mut source = YrsDocument::new();
        source.insert(0, "not for us");
        let sync = Envelope::YjsSync {
            client_id: 9,
            target_client_id: Some(8),
            state: source.full_state(),
        };
        assert!(s.handle_envelope(&sync, 1_100).is_empty());
        assert!(!s.is_synced());
    }

    #[test]
    fn test_sync_request_answered_with_targeted_state() {
        let (mut s, _) = session(7, 1_000);
        s.local_insert(0, "content");

        let request = Envelope::YjsSyncRequest {
            client_id: 22,
            timestamp: 2_000,
        };
        let outputs = s.handle_envelope(&request, 2_000);
        let envs = published(&outputs);
        assert_eq!(envs.len(), 1);
        match envs[0] {
            Envelope::YjsSync {
                client_id: 7,
                target_client_id: Some(22),
                state,
            } => assert!(!state.is_empty()),
            other => panic!("unexpected envelope: {other:?}"),
        }
    }

    #[test]
    fn test_unsynced_empty_peer_stays_quiet_on_sync_request() {
        let (mut s, _) = session(7, 1_000);
        let request = Envelope::YjsSyncRequest {
            client_id: 22,
            timestamp: 1_100,
        };
        assert!(published(&s.handle_envelope(&request, 1_100)).is_empty());
    }

    #[test]
    fn test_smaller_id_pushes_state_to_newcomer() {
        let (mut s, _) = session(5, 1_000);
        s.local_insert(0, "doc");

        let presence = Envelope::YjsPresence {
            client_id: 80,
            timestamp: 2_000,
        };
        s.handle_envelope(&presence, 2_000);

        let outputs = s.tick(2_000 + STATE_PUSH_DELAY_MS);
        let envs = published(&outputs);
        assert!(envs.iter().any(|e| matches!(
            e,
            Envelope::YjsSync {
                target_client_id: Some(80),
                ..
            }
        )));
    }

    #[test]
    fn test_larger_id_does_not_push() {
        let (mut s, _) = session(90, 1_000);
        s.local_insert(0, "doc");

        let presence = Envelope::YjsPresence {
            client_id: 10,
            timestamp: 2_000,
        };
        s.handle_envelope(&presence, 2_000);

        let outputs = s.tick(2_000 + STATE_PUSH_DELAY_MS);
        assert!(published(&outputs)
            .iter()
            .all(|e| !matches!(e, Envelope::YjsSync { .. })));
    }

    #[test]
    fn test_resync_request_repeats_until_synced() {
        let (mut s, _) = session(9, 1_000);
        // Another participant exists with a lower id, so no self-seed.
        s.handle_envelope(
            &Envelope::YjsPresence {
                client_id: 2,
                timestamp: 1_001,
            },
            1_001,
        );
        let _ = s.tick(1_000 + SEED_DEBOUNCE_MS);

        let outputs = s.tick(1_000 + RESYNC_INTERVAL_SECS * 1_000);
        assert!(published(&outputs)
            .iter()
            .any(|e| matches!(e, Envelope::YjsSyncRequest { client_id: 9, .. })));
    }

    #[test]
    fn test_awareness_updates_cross_between_sessions() {
        let (mut a, start_a) = session(1, 1_000);
        let (mut b, _) = session(2, 1_000);

        // b learns a's display name from the startup broadcast.
        for env in published(&start_a) {
            b.handle_envelope(env, 1_000);
        }
        assert_eq!(
            b.awareness().get(&1).map(|s| s.nickname.as_str()),
            Some("peer-1")
        );

        // A caret move propagates and surfaces as a change.
        let moved = a.set_local_awareness(AwarenessState {
            nickname: "peer-1".into(),
            cursor: Some(5),
        });
        let mut changed = Vec::new();
        for env in published(&moved) {
            changed.extend(b.handle_envelope(env, 1_200));
        }
        assert!(changed.iter().any(|o| matches!(
            o,
            DocOutput::AwarenessChanged {
                client_id: 1,
                state: AwarenessState {
                    cursor: Some(5),
                    ..
                },
            }
        )));
        assert_eq!(b.awareness().get(&1).and_then(|s| s.cursor), Some(5));
    }

    #[test]
    fn test_unchanged_awareness_not_resurfaced() {
        let (mut s, _) = session(7, 1_000);
        let state = AwarenessState {
            nickname: "peer-9".into(),
            cursor: Some(3),
        };
        let env = Envelope::YjsAwareness {
            client_id: 9,
            update: state.to_bytes().unwrap(),
        };
        let first = s.handle_envelope(&env, 1_100);
        assert!(first
            .iter()
            .any(|o| matches!(o, DocOutput::AwarenessChanged { client_id: 9, .. })));
        // Same state again: recorded but no event.
        let second = s.handle_envelope(&env, 1_200);
        assert!(second
            .iter()
            .all(|o| !matches!(o, DocOutput::AwarenessChanged { .. })));
    }

    #[test]
    fn test_malformed_awareness_dropped() {
        let (mut s, _) = session(7, 1_000);
        let env = Envelope::YjsAwareness {
            client_id: 9,
            update: b"not json".to_vec(),
        };
        assert!(s.handle_envelope(&env, 1_100).is_empty());
        assert!(s.awareness().is_empty());
    }

    #[test]
    fn test_two_sessions_converge() {
        let now = 1_000;
        let (mut a, _) = session(1, now);
        let (mut b, _) = session(2, now);

        // a seeds, b receives the broadcast.
        let seed = a.tick(now + SEED_DEBOUNCE_MS);
        for env in published(&seed) {
            b.handle_envelope(env, now + SEED_DEBOUNCE_MS);
        }
        assert!(b.is_synced());

        // Concurrent edits cross over.
        let ea = a.local_insert(0, "alpha ");
        let eb = b.local_insert(0, "beta ");
        for env in published(&ea) {
            b.handle_envelope(env, now + 1_000);
        }
        for env in published(&eb) {
            a.handle_envelope(env, now + 1_000);
        }
        assert_eq!(a.contents(), b.contents());
    }
}
