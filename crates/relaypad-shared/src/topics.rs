//! Topic naming conventions.
//!
//! Three namespaces share the gossipsub topic space:
//! - user-chosen shared topics (any string without a reserved prefix),
//! - per-peer private discovery channels (`__discovery__<peerId>`),
//! - per-pair session channels, derived from the sorted peer ids plus a
//!   creation timestamp so a reconnecting pair never collides with a
//!   previous session's channel.

use crate::error::ProtocolError;

/// Prefix of per-peer private discovery channels.
pub const DISCOVERY_PREFIX: &str = "__discovery__";

/// Prefix of negotiated per-pair chat channels.
pub const SESSION_PREFIX: &str = "private-";

/// Prefix of collaborative editor channels.
pub const EDITOR_PREFIX: &str = "editor-";

/// The private discovery channel for a given peer.
pub fn discovery_topic(peer_id: &str) -> String {
    format!("{DISCOVERY_PREFIX}{peer_id}")
}

/// Whether a topic belongs to a reserved namespace the relay must not
/// track as an application topic.
pub fn is_reserved_topic(topic: &str) -> bool {
    topic.starts_with(DISCOVERY_PREFIX)
}

/// Check that a user-chosen shared topic does not collide with a
/// reserved or derived namespace.
pub fn validate_shared_topic(topic: &str) -> Result<(), ProtocolError> {
    if topic.is_empty() {
        return Err(ProtocolError::InvalidTopic("empty topic name".into()));
    }
    for prefix in [DISCOVERY_PREFIX, SESSION_PREFIX, EDITOR_PREFIX] {
        if topic.starts_with(prefix) {
            return Err(ProtocolError::InvalidTopic(format!(
                "topic must not start with `{prefix}`"
            )));
        }
    }
    Ok(())
}

/// Derive the session channel name for a pair of peers. Ordering of the
/// two ids does not matter; both sides derive the same name.
pub fn private_session_topic(peer_a: &str, peer_b: &str, timestamp_ms: u64) -> String {
    let (lo, hi) = if peer_a <= peer_b {
        (peer_a, peer_b)
    } else {
        (peer_b, peer_a)
    };
    format!("{SESSION_PREFIX}{lo}-{hi}-{timestamp_ms}")
}

/// Derive an editor channel name scoped to a shared topic.
pub fn editor_topic(shared_topic: &str, timestamp_ms: u64) -> String {
    format!("{EDITOR_PREFIX}{shared_topic}-{timestamp_ms}")
}

/// Shorten a peer id for log lines and default nicknames.
pub fn short_peer_id(peer_id: &str) -> &str {
    &peer_id[..peer_id.len().min(8)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovery_topic_is_reserved() {
        let topic = discovery_topic("12D3KooWA");
        assert_eq!(topic, "__discovery__12D3KooWA");
        assert!(is_reserved_topic(&topic));
        assert!(!is_reserved_topic("demo"));
        assert!(!is_reserved_topic("private-a-b-1"));
    }

    #[test]
    fn test_validate_shared_topic() {
        assert!(validate_shared_topic("demo").is_ok());
        assert!(validate_shared_topic("").is_err());
        assert!(validate_shared_topic("__discovery__x").is_err());
        assert!(validate_shared_topic("private-a-b-1").is_err());
        assert!(validate_shared_topic("editor-demo-1").is_err());
    }

    #[test]
    fn test_session_topic_order_independent() {
        let t1 = private_session_topic("12D3KooWA", "12D3KooWB", 1000);
        let t2 = private_session_topic("12D3KooWB", "12D3KooWA", 1000);
        assert_eq!(t1, t2);
        assert_eq!(t1, "private-12D3KooWA-12D3KooWB-1000");
    }

    #[test]
    fn test_session_topic_unique_per_negotiation() {
        let t1 = private_session_topic("a", "b", 1000);
        let t2 = private_session_topic("a", "b", 2000);
        assert_ne!(t1, t2);
    }

    #[test]
    fn test_editor_topic() {
        assert_eq!(editor_topic("demo", 42), "editor-demo-42");
    }

    #[test]
    fn test_short_peer_id() {
        assert_eq!(short_peer_id("12D3KooWABCDEF"), "12D3KooW");
        assert_eq!(short_peer_id("abc"), "abc");
    }
}
