// Shared protocol definitions for relaypad: wire envelopes, topic naming,
// constants, and error types used by both the relay and peer binaries.

pub mod constants;
pub mod envelope;
pub mod error;
pub mod time;
pub mod topics;

pub use envelope::{AwarenessState, DiscoveredPeer, Envelope};
pub use error::ProtocolError;
pub use time::now_millis;
pub use topics::{
    discovery_topic, editor_topic, is_reserved_topic, private_session_topic,
    validate_shared_topic,
};
