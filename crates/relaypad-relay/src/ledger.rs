//! Topic membership ledger.
//!
//! The relay observes GossipSub subscription changes and keeps a map of
//! which peer is on which topic, with a last-seen timestamp per entry.
//! The ledger is pure state: callers pass the current time in, which keeps
//! eviction and cooldown behaviour deterministic under test.
//!
//! Eviction rules:
//! - a member with no activity for [`STALE_TIMEOUT_MS`] whose connection is
//!   gone is dropped by the periodic sweep
//! - topics with no members left are dropped
//! - discovery cooldown entries older than twice the cooldown are pruned,
//!   since they can no longer gate anything

use std::collections::{HashMap, HashSet};

use libp2p::PeerId;

use relaypad_shared::constants::{DISCOVERY_COOLDOWN_MS, STALE_TIMEOUT_MS};

/// What a sweep removed, for logging.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub evicted_members: usize,
    pub dropped_topics: usize,
    pub pruned_cooldowns: usize,
}

impl SweepStats {
    pub fn is_empty(&self) -> bool {
        self.evicted_members == 0 && self.dropped_topics == 0 && self.pruned_cooldowns == 0
    }
}

/// Which peers subscribe to which topics, with per-entry last-seen times
/// and per-peer discovery cooldowns.
#[derive(Debug, Default)]
pub struct MembershipLedger {
    /// topic -> (member -> last seen, millis)
    topics: HashMap<String, HashMap<PeerId, u64>>,
    /// peer -> last discovery notification, millis
    cooldowns: HashMap<PeerId, u64>,
}

impl MembershipLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `peer` subscribed to `topic`.
    pub fn record_subscribe(&mut self, topic: &str, peer: PeerId, now: u64) {
        self.topics
            .entry(topic.to_string())
            .or_default()
            .insert(peer, now);
    }

    /// Record that `peer` unsubscribed from `topic`. Empty topics are
    /// dropped immediately.
    pub fn record_unsubscribe(&mut self, topic: &str, peer: &PeerId) {
        if let Some(members) = self.topics.get_mut(topic) {
            members.remove(peer);
            if members.is_empty() {
                self.topics.remove(topic);
            }
        }
    }

    /// Drop `peer` from every topic and forget its cooldown. Called on
    /// transport-level disconnect. Returns how many memberships were
    /// removed.
    pub fn remove_peer(&mut self, peer: &PeerId) -> usize {
        let mut removed = 0;
        for members in self.topics.values_mut() {
            if members.remove(peer).is_some() {
                removed += 1;
            }
        }
        self.topics.retain(|_, members| !members.is_empty());
        self.cooldowns.remove(peer);
        removed
    }

    /// Refresh the last-seen time of `peer` on every topic it belongs to.
    /// Called on any sign of life (identify, messages through the relay).
    pub fn touch(&mut self, peer: &PeerId, now: u64) {
        for members in self.topics.values_mut() {
            if let Some(last_seen) = members.get_mut(peer) {
                *last_seen = now;
            }
        }
    }

    /// Members of `topic`, in no particular order.
    pub fn members_of(&self, topic: &str) -> Vec<PeerId> {
        self.topics
            .get(topic)
            .map(|members| members.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Peers that share at least one topic with `peer`, excluding `peer`
    /// itself, deduplicated.
    ///
    /// This is the union across every topic the peer is on, not a
    /// per-topic view: discovery notifications also fire on events with
    /// no topic attached (identify refreshes, discovery-channel
    /// subscribes), so the relay advertises everyone reachable through
    /// any shared topic.
    pub fn peers_sharing_topics(&self, peer: &PeerId) -> Vec<PeerId> {
        let mut seen = HashSet::new();
        let mut result = Vec::new();
        for members in self.topics.values() {
            if !members.contains_key(peer) {
                continue;
            }
            for member in members.keys() {
                if member != peer && seen.insert(*member) {
                    result.push(*member);
                }
            }
        }
        result
    }

    /// Whether a discovery notification to `peer` is allowed right now.
    pub fn may_notify(&self, peer: &PeerId, now: u64) -> bool {
        match self.cooldowns.get(peer) {
            Some(last) => now.saturating_sub(*last) >= DISCOVERY_COOLDOWN_MS,
            None => true,
        }
    }

    /// Record that a discovery notification was just sent to `peer`.
    pub fn mark_notified(&mut self, peer: PeerId, now: u64) {
        self.cooldowns.insert(peer, now);
    }

    /// Evict stale members and prune expired cooldowns.
    ///
    /// A member is stale when its last-seen is older than the stale timeout
    /// AND it has no live connection; connected peers are never evicted,
    /// however quiet.
    pub fn sweep(&mut self, now: u64, connected: &HashSet<PeerId>) -> SweepStats {
        let mut stats = SweepStats::default();

        for members in self.topics.values_mut() {
            let before = members.len();
            members.retain(|peer, last_seen| {
                connected.contains(peer)
                    || now.saturating_sub(*last_seen) < STALE_TIMEOUT_MS
            });
            stats.evicted_members += before - members.len();
        }

        let before = self.topics.len();
        self.topics.retain(|_, members| !members.is_empty());
        stats.dropped_topics = before - self.topics.len();

        let before = self.cooldowns.len();
        self.cooldowns
            .retain(|_, last| now.saturating_sub(*last) < 2 * DISCOVERY_COOLDOWN_MS);
        stats.pruned_cooldowns = before - self.cooldowns.len();

        stats
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    /// Total distinct peers across all topics.
    pub fn peer_count(&self) -> usize {
        let mut seen = HashSet::new();
        for members in self.topics.values() {
            seen.extend(members.keys().copied());
        }
        seen.len()
    }

    /// Iterate topics with their member maps (for the status API).
    pub fn iter_topics(&self) -> impl Iterator<Item = (&String, &HashMap<PeerId, u64>)> {
        self.topics.iter()
    }

    /// Last-seen time of `peer` across its topics, if any.
    pub fn last_seen(&self, peer: &PeerId) -> Option<u64> {
        self.topics
            .values()
            .filter_map(|members| members.get(peer).copied())
            .max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peers(n: usize) -> Vec<PeerId> {
        (0..n).map(|_| PeerId::random()).collect()
    }

    #[test]
    fn test_subscribe_and_unsubscribe() {
        let mut ledger = MembershipLedger::new();
        let p = peers(2);

        ledger.record_subscribe("room", p[0], 1_000);
        ledger.record_subscribe("room", p[1], 1_000);
        assert_eq!(ledger.members_of("room").len(), 2);

        ledger.record_unsubscribe("room", &p[0]);
        assert_eq!(ledger.members_of("room"), vec![p[1]]);
    }

    #[test]
    fn test_empty_topic_dropped_on_unsubscribe() {
        let mut ledger = MembershipLedger::new();
        let p = PeerId::random();

        ledger.record_subscribe("room", p, 0);
        assert_eq!(ledger.topic_count(), 1);
        ledger.record_unsubscribe("room", &p);
        assert_eq!(ledger.topic_count(), 0);
    }

    #[test]
    fn test_peers_sharing_topics_dedup_and_exclude_self() {
        let mut ledger = MembershipLedger::new();
        let p = peers(3);

        ledger.record_subscribe("a", p[0], 0);
        ledger.record_subscribe("a", p[1], 0);
        ledger.record_subscribe("b", p[0], 0);
        ledger.record_subscribe("b", p[1], 0);
        ledger.record_subscribe("b", p[2], 0);

        let mut shared = ledger.peers_sharing_topics(&p[0]);
        shared.sort();
        let mut expected = vec![p[1], p[2]];
        expected.sort();
        assert_eq!(shared, expected);
    }

    #[test]
    fn test_sweep_evicts_stale_disconnected_only() {
        let mut ledger = MembershipLedger::new();
        let p = peers(3);

        ledger.record_subscribe("room", p[0], 0); // stale, disconnected
        ledger.record_subscribe("room", p[1], 0); // stale, but connected
        ledger.record_subscribe("room", p[2], STALE_TIMEOUT_MS); // fresh

        let connected: HashSet<PeerId> = [p[1]].into_iter().collect();
        let stats = ledger.sweep(STALE_TIMEOUT_MS + 1, &connected);

        assert_eq!(stats.evicted_members, 1);
        let members = ledger.members_of("room");
        assert!(!members.contains(&p[0]));
        assert!(members.contains(&p[1]));
        assert!(members.contains(&p[2]));
    }

    #[test]
    fn test_sweep_drops_emptied_topic() {
        let mut ledger = MembershipLedger::new();
        let p = PeerId::random();

        ledger.record_subscribe("room", p, 0);
        let stats = ledger.sweep(STALE_TIMEOUT_MS + 1, &HashSet::new());

        assert_eq!(stats.evicted_members, 1);
        assert_eq!(stats.dropped_topics, 1);
        assert_eq!(ledger.topic_count(), 0);
    }

    #[test]
    fn test_touch_prevents_eviction() {
        let mut ledger = MembershipLedger::new();
        let p = PeerId::random();

        ledger.record_subscribe("room", p, 0);
        ledger.touch(&p, STALE_TIMEOUT_MS);
        let stats = ledger.sweep(STALE_TIMEOUT_MS + 1, &HashSet::new());

        assert_eq!(stats.evicted_members, 0);
        assert_eq!(ledger.members_of("room"), vec![p]);
    }

    #[test]
    fn test_cooldown_gates_notifications() {
        let mut ledger = MembershipLedger::new();
        let p = PeerId::random();

        assert!(ledger.may_notify(&p, 1_000));
        ledger.mark_notified(p, 1_000);
        assert!(!ledger.may_notify(&p, 1_000 + DISCOVERY_COOLDOWN_MS - 1));
        assert!(ledger.may_notify(&p, 1_000 + DISCOVERY_COOLDOWN_MS));
    }

    #[test]
    fn test_sweep_prunes_expired_cooldowns() {
        let mut ledger = MembershipLedger::new();
        let p = peers(2);

        ledger.mark_notified(p[0], 0);
        ledger.mark_notified(p[1], 2 * DISCOVERY_COOLDOWN_MS);

        let stats = ledger.sweep(2 * DISCOVERY_COOLDOWN_MS, &HashSet::new());
        assert_eq!(stats.pruned_cooldowns, 1);
        // The surviving entry still gates.
        assert!(!ledger.may_notify(&p[1], 2 * DISCOVERY_COOLDOWN_MS + 1));
    }

    #[test]
    fn test_remove_peer_clears_everything() {
        let mut ledger = MembershipLedger::new();
        let p = peers(2);

        ledger.record_subscribe("a", p[0], 0);
        ledger.record_subscribe("b", p[0], 0);
        ledger.record_subscribe("b", p[1], 0);
        ledger.mark_notified(p[0], 0);

        assert_eq!(ledger.remove_peer(&p[0]), 2);
        assert_eq!(ledger.topic_count(), 1);
        assert!(!ledger.members_of("b").contains(&p[0]));
        // Cooldown gone too.
        assert!(ledger.may_notify(&p[0], 1));
    }

    #[test]
    fn test_resubscribe_refreshes_last_seen() {
        let mut ledger = MembershipLedger::new();
        let p = PeerId::random();

        ledger.record_subscribe("room", p, 0);
        ledger.record_subscribe("room", p, 50_000);
        assert_eq!(ledger.last_seen(&p), Some(50_000));

        let stats = ledger.sweep(STALE_TIMEOUT_MS + 1, &HashSet::new());
        assert_eq!(stats.evicted_members, 0);
    }
}
