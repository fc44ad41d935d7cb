//! Nickname directory.
//!
//! Nicknames are cosmetic: announced on the shared topic, never verified,
//! and falling back to a truncated peer id for peers that have not
//! announced one.

use std::collections::HashMap;

use relaypad_shared::topics::short_peer_id;

#[derive(Debug, Default)]
pub struct NicknameDirectory {
    names: HashMap<String, String>,
}

impl NicknameDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an announced nickname; the latest announcement wins.
    /// Empty or whitespace-only names are ignored.
    pub fn record(&mut self, peer_id: &str, nickname: &str) {
        let nickname = nickname.trim();
        if nickname.is_empty() {
            return;
        }
        self.names
            .insert(peer_id.to_string(), nickname.to_string());
    }

    /// Display name for `peer_id`: the announced nickname, or the
    /// truncated id.
    pub fn display(&self, peer_id: &str) -> String {
        match self.names.get(peer_id) {
            Some(name) => name.clone(),
            None => short_peer_id(peer_id).to_string(),
        }
    }

    pub fn forget(&mut self, peer_id: &str) {
        self.names.remove(peer_id);
    }
}
