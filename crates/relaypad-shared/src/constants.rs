/// Protocol version string for libp2p identify
pub const PROTOCOL_VERSION: &str = "/relaypad/1.0.0";

/// Application name
pub const APP_NAME: &str = "relaypad";

/// Maximum gossipsub message size in bytes (256 KiB)
pub const MAX_MESSAGE_SIZE: usize = 262_144;

/// GossipSub heartbeat interval in seconds
pub const GOSSIPSUB_HEARTBEAT_SECS: u64 = 2;

/// Default relay libp2p listen port (TCP/WebSocket)
pub const DEFAULT_RELAY_PORT: u16 = 4003;

/// Default HTTP status API port (relay)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Minimum interval between discovery notifications to the same peer
pub const DISCOVERY_COOLDOWN_MS: u64 = 5_000;

/// A topic member with no subscription events for this long, and no live
/// connection, is evicted by the sweep
pub const STALE_TIMEOUT_MS: u64 = 60_000;

/// Interval between relay bookkeeping sweeps
pub const SWEEP_INTERVAL_SECS: u64 = 30;

/// Maximum relay reservations accepted at once
pub const MAX_RESERVATIONS: usize = 50;

/// Relay reservation TTL in seconds
pub const RESERVATION_TTL_SECS: u64 = 30;

/// Maximum concurrent circuits through the relay, each direction
pub const MAX_CIRCUITS: usize = 50;

/// Publish retry budget for topics whose gossip mesh has not formed yet
pub const PUBLISH_RETRY_ATTEMPTS: u32 = 5;

/// Base delay before the first publish retry
pub const PUBLISH_RETRY_BASE_MS: u64 = 500;

/// Growth factor applied to the retry delay after each failed attempt
pub const PUBLISH_RETRY_GROWTH: u32 = 2;

/// Delay after dialing the relay before subscribing, to let the gossip
/// mesh stabilize
pub const MESH_SETTLE_DELAY_MS: u64 = 3_000;

/// Re-sync interval for document sessions that have not reached synced state
pub const RESYNC_INTERVAL_SECS: u64 = 10;

/// Peer-side periodic re-discovery interval
pub const REDISCOVERY_INTERVAL_SECS: u64 = 10;

/// Debounce before the lowest-client-id peer seeds an empty document
pub const SEED_DEBOUNCE_MS: u64 = 400;

/// Delay before proactively pushing full state to a higher-client-id peer
pub const STATE_PUSH_DELAY_MS: u64 = 500;
