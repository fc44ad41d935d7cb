//! Relay configuration loaded from environment variables.
//!
//! Everything has a default so the relay starts with zero configuration
//! for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use libp2p::{multiaddr::Protocol, Multiaddr, PeerId};

use relaypad_shared::constants::{
    DEFAULT_HTTP_PORT, DEFAULT_RELAY_PORT, MAX_CIRCUITS, MAX_RESERVATIONS,
};

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// libp2p multiaddr to listen on (WebSocket over TCP).
    /// Env: `LISTEN_ADDR`
    /// Default: `/ip4/0.0.0.0/tcp/4003/ws`
    pub listen_addr: Multiaddr,

    /// Public IP to advertise in circuit addresses. When unset, the first
    /// listen address is used, which only works on hosts with a public
    /// interface address.
    /// Env: `PUBLIC_IP`
    pub public_ip: Option<String>,

    /// Socket address for the HTTP status API.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Path of the persisted identity key file.
    /// Env: `KEY_PATH`
    /// Default: `./relay-key`
    pub key_path: PathBuf,

    /// Maximum concurrent relay reservations.
    /// Env: `MAX_RESERVATIONS`
    pub max_reservations: usize,

    /// Maximum concurrent relayed circuits.
    /// Env: `MAX_CIRCUITS`
    pub max_circuits: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            public_ip: None,
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            key_path: PathBuf::from("./relay-key"),
            max_reservations: MAX_RESERVATIONS,
            max_circuits: MAX_CIRCUITS,
        }
    }
}

fn default_listen_addr() -> Multiaddr {
    Multiaddr::empty()
        .with(Protocol::Ip4([0, 0, 0, 0].into()))
        .with(Protocol::Tcp(DEFAULT_RELAY_PORT))
        .with(Protocol::Ws("/".into()))
}

impl RelayConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("LISTEN_ADDR") {
            match addr.parse::<Multiaddr>() {
                Ok(parsed) => config.listen_addr = parsed,
                Err(e) => {
                    tracing::warn!(value = %addr, error = %e, "Invalid LISTEN_ADDR, using default");
                }
            }
        }

        if let Ok(ip) = std::env::var("PUBLIC_IP") {
            if !ip.is_empty() {
                config.public_ip = Some(ip);
            }
        }

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.http_addr = parsed,
                Err(_) => {
                    tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
                }
            }
        }

        if let Ok(path) = std::env::var("KEY_PATH") {
            config.key_path = PathBuf::from(path);
        }

        if let Ok(val) = std::env::var("MAX_RESERVATIONS") {
            if let Ok(n) = val.parse::<usize>() {
                config.max_reservations = n;
            }
        }

        if let Ok(val) = std::env::var("MAX_CIRCUITS") {
            if let Ok(n) = val.parse::<usize>() {
                config.max_circuits = n;
            }
        }

        config
    }

    /// Public base address for circuit templates, including the relay's
    /// own `/p2p/<id>` suffix: `PUBLIC_IP` spliced over the listen
    /// address when configured, the listen address otherwise.
    pub fn public_base(&self, relay_id: &PeerId) -> Multiaddr {
        let mut base = Multiaddr::empty();
        for protocol in self.listen_addr.iter() {
            match (protocol, &self.public_ip) {
                (Protocol::Ip4(_), Some(ip)) | (Protocol::Ip6(_), Some(ip)) => {
                    match ip.parse::<std::net::IpAddr>() {
                        Ok(std::net::IpAddr::V4(v4)) => base.push(Protocol::Ip4(v4)),
                        Ok(std::net::IpAddr::V6(v6)) => base.push(Protocol::Ip6(v6)),
                        Err(_) => base.push(Protocol::Dns(ip.clone().into())),
                    }
                }
                (other, _) => base.push(other),
            }
        }
        base.with(Protocol::P2p(*relay_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into());
        assert_eq!(
            config.listen_addr,
            "/ip4/0.0.0.0/tcp/4003/ws".parse::<Multiaddr>().unwrap()
        );
    }

    #[test]
    fn test_public_base_splices_public_ip() {
        let config = RelayConfig {
            public_ip: Some("203.0.113.7".into()),
            ..RelayConfig::default()
        };
        let relay_id = PeerId::random();
        let base = config.public_base(&relay_id);
        assert_eq!(
            base,
            format!("/ip4/203.0.113.7/tcp/4003/ws/p2p/{relay_id}")
                .parse::<Multiaddr>()
                .unwrap()
        );
    }

    #[test]
    fn test_public_base_accepts_hostname() {
        let config = RelayConfig {
            public_ip: Some("relay.example.org".into()),
            ..RelayConfig::default()
        };
        let relay_id = PeerId::random();
        let base = config.public_base(&relay_id);
        assert_eq!(
            base,
            format!("/dns/relay.example.org/tcp/4003/ws/p2p/{relay_id}")
                .parse::<Multiaddr>()
                .unwrap()
        );
    }
}
