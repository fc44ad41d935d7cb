//! Private session negotiation.
//!
//! Sessions move through a small state machine, driven from both sides:
//!
//! ```text
//!   (outgoing)  start_request -> Requested -> on_accepted -> Connected
//!                                          -> on_rejected -> Rejected
//!   (incoming)  on_request    -> Pending   -> accept      -> Connected
//!                                          -> reject      -> Rejected
//! ```
//!
//! `Rejected` is terminal for the pair: a declined peer cannot re-request
//! through the same record. The accepting side derives the private topic
//! name from both peer ids plus the acceptance timestamp and sends it in
//! the `connection-accepted` envelope; the requesting side adopts whatever
//! name arrives. Transitions check their precondition and drop
//! out-of-order envelopes, so replayed or duplicated messages cannot
//! corrupt a session. Records persist for the life of the process; ending
//! a session releases its channel but keeps the chat log and phase.

use std::collections::HashMap;

use thiserror::Error;

use relaypad_shared::topics::private_session_topic;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("no session with peer {0}")]
    UnknownPeer(String),

    #[error("no pending request from peer {0}")]
    NoPendingRequest(String),

    #[error("peer {0} rejected a previous request")]
    Rejected(String),

    #[error("peer {0} is awaiting our answer; accept or reject instead")]
    AwaitingOurAnswer(String),
}

/// Where a session currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// We sent a request and await the answer.
    Requested,
    /// They sent a request and await our answer.
    Pending,
    /// Both sides agreed; the private topic is live.
    Connected,
    /// The request was declined. Terminal.
    Rejected,
}

/// What `start_request` decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    /// A new request record was created; publish the request envelope.
    Sent,
    /// A session already exists; resume it on this topic.
    Resume(String),
    /// A request is already out; nothing to do.
    AwaitingResponse,
}

/// A chat line exchanged on a private topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEntry {
    pub sender: String,
    pub content: String,
    pub timestamp: u64,
}

/// One negotiation with a remote peer, plus its chat history once
/// connected.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub peer_id: String,
    pub nickname: String,
    pub phase: SessionPhase,
    pub private_topic: Option<String>,
    pub since: u64,
    pub messages: Vec<ChatEntry>,
}

impl SessionRecord {
    fn new(peer_id: &str, nickname: &str, phase: SessionPhase, now: u64) -> Self {
        Self {
            peer_id: peer_id.to_string(),
            nickname: nickname.to_string(),
            phase,
            private_topic: None,
            since: now,
            messages: Vec::new(),
        }
    }
}

/// All sessions of the local peer, keyed by remote peer id.
#[derive(Debug)]
pub struct SessionTable {
    local_peer_id: String,
    sessions: HashMap<String, SessionRecord>,
}

impl SessionTable {
    pub fn new(local_peer_id: String) -> Self {
        Self {
            local_peer_id,
            sessions: HashMap::new(),
        }
    }

    /// Begin an outgoing request.
    pub fn start_request(
        &mut self,
        peer_id: &str,
        nickname: &str,
        now: u64,
    ) -> Result<RequestOutcome, SessionError> {
        match self.sessions.get(peer_id) {
            Some(record) => match record.phase {
                SessionPhase::Connected => {
                    // Resume rather than renegotiate.
                    let topic = record
                        .private_topic
                        .clone()
                        .unwrap_or_default();
                    Ok(RequestOutcome::Resume(topic))
                }
                SessionPhase::Requested => Ok(RequestOutcome::AwaitingResponse),
                SessionPhase::Pending => {
                    Err(SessionError::AwaitingOurAnswer(peer_id.to_string()))
                }
                SessionPhase::Rejected => Err(SessionError::Rejected(peer_id.to_string())),
            },
            None => {
                self.sessions.insert(
                    peer_id.to_string(),
                    SessionRecord::new(peer_id, nickname, SessionPhase::Requested, now),
                );
                Ok(RequestOutcome::Sent)
            }
        }
    }

    /// Handle an incoming `connection-request`: creates or overwrites the
    /// record as `Pending`. Returns `true` when the application should
    /// surface a fresh accept/reject decision (a repeat of an
    /// already-pending request does not re-prompt).
    pub fn on_request(&mut self, peer_id: &str, nickname: &str, now: u64) -> bool {
        let was_pending = matches!(
            self.sessions.get(peer_id).map(|s| s.phase),
            Some(SessionPhase::Pending)
        );
        self.sessions.insert(
            peer_id.to_string(),
            SessionRecord::new(peer_id, nickname, SessionPhase::Pending, now),
        );
        !was_pending
    }

    /// Accept a pending request; derives and returns the private topic
    /// name the acceptance envelope must carry.
    pub fn accept(&mut self, peer_id: &str, now: u64) -> Result<String, SessionError> {
        let record = self
            .sessions
            .get_mut(peer_id)
            .ok_or_else(|| SessionError::UnknownPeer(peer_id.to_string()))?;
        if record.phase != SessionPhase::Pending {
            return Err(SessionError::NoPendingRequest(peer_id.to_string()));
        }
        let topic = private_session_topic(&self.local_peer_id, peer_id, now);
        record.phase = SessionPhase::Connected;
        record.private_topic = Some(topic.clone());
        record.since = now;
        Ok(topic)
    }

    /// Reject a pending request.
    pub fn reject(&mut self, peer_id: &str) -> Result<(), SessionError> {
        let record = self
            .sessions
            .get_mut(peer_id)
            .ok_or_else(|| SessionError::UnknownPeer(peer_id.to_string()))?;
        if record.phase != SessionPhase::Pending {
            return Err(SessionError::NoPendingRequest(peer_id.to_string()));
        }
        record.phase = SessionPhase::Rejected;
        Ok(())
    }

    /// Handle `connection-accepted` for a request we sent. Acted on only
    /// when the record is exactly `Requested`.
    pub fn on_accepted(
        &mut self,
        peer_id: &str,
        private_topic: &str,
        now: u64,
    ) -> Result<(), SessionError> {
        let record = self
            .sessions
            .get_mut(peer_id)
            .ok_or_else(|| SessionError::UnknownPeer(peer_id.to_string()))?;
        if record.phase != SessionPhase::Requested {
            return Err(SessionError::NoPendingRequest(peer_id.to_string()));
        }
        record.phase = SessionPhase::Connected;
        record.private_topic = Some(private_topic.to_string());
        record.since = now;
        Ok(())
    }

    /// Handle `connection-rejected` for a request we sent.
    pub fn on_rejected(&mut self, peer_id: &str) -> Result<(), SessionError> {
        let record = self
            .sessions
            .get_mut(peer_id)
            .ok_or_else(|| SessionError::UnknownPeer(peer_id.to_string()))?;
        if record.phase != SessionPhase::Requested {
            return Err(SessionError::NoPendingRequest(peer_id.to_string()));
        }
        record.phase = SessionPhase::Rejected;
        Ok(())
    }

    /// Stop a live session; returns the private topic to unsubscribe from.
    /// The record itself stays, so the chat log and phase survive and a
    /// later request resumes on the same channel.
    pub fn end(&self, peer_id: &str) -> Option<String> {
        self.sessions.get(peer_id).and_then(|record| {
            if record.phase == SessionPhase::Connected {
                record.private_topic.clone()
            } else {
                None
            }
        })
    }

    /// Append a chat line to the session owning `topic`.
    pub fn record_message(&mut self, topic: &str, entry: ChatEntry) -> bool {
        for record in self.sessions.values_mut() {
            if record.private_topic.as_deref() == Some(topic) {
                record.messages.push(entry);
                return true;
            }
        }
        false
    }

    pub fn get(&self, peer_id: &str) -> Option<&SessionRecord> {
        self.sessions.get(peer_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SessionRecord> {
        self.sessions.values()
    }
}
