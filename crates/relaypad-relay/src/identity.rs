//! Persisted relay identity.
//!
//! The relay's PeerId must survive restarts: peers hold its address with
//! the `/p2p/<id>` suffix, and circuit addresses embed it. The keypair is
//! stored protobuf-encoded on disk and created on first start.

use std::path::Path;

use libp2p::identity::Keypair;
use tracing::{info, warn};

use relaypad_shared::ProtocolError;

/// Load the relay keypair from `path`, generating and persisting a fresh
/// one when the file is missing. A corrupt key file is replaced with a
/// fresh identity rather than refusing to start.
pub fn load_or_create_keypair(path: &Path) -> Result<Keypair, ProtocolError> {
    match std::fs::read(path) {
        Ok(bytes) => match Keypair::from_protobuf_encoding(&bytes) {
            Ok(keypair) => {
                info!(path = %path.display(), "Loaded relay identity");
                Ok(keypair)
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Key file corrupt, generating a new identity"
                );
                create_and_persist(path)
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => create_and_persist(path),
        Err(e) => Err(e.into()),
    }
}

fn create_and_persist(path: &Path) -> Result<Keypair, ProtocolError> {
    let keypair = Keypair::generate_ed25519();
    let bytes = keypair
        .to_protobuf_encoding()
        .map_err(|e| ProtocolError::KeyFile(e.to_string()))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, bytes)?;

    info!(
        path = %path.display(),
        peer_id = %keypair.public().to_peer_id(),
        "Generated new relay identity"
    );
    Ok(keypair)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creates_then_reloads_same_identity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay-key");

        let first = load_or_create_keypair(&path).unwrap();
        let second = load_or_create_keypair(&path).unwrap();
        assert_eq!(
            first.public().to_peer_id(),
            second.public().to_peer_id()
        );
    }

    #[test]
    fn test_corrupt_file_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay-key");
        std::fs::write(&path, b"not a protobuf keypair").unwrap();

        let keypair = load_or_create_keypair(&path).unwrap();
        // The replacement must be readable on the next start.
        let reloaded = load_or_create_keypair(&path).unwrap();
        assert_eq!(
            keypair.public().to_peer_id(),
            reloaded.public().to_peer_id()
        );
    }

    #[test]
    fn test_creates_missing_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/keys/relay-key");
        assert!(load_or_create_keypair(&path).is_ok());
        assert!(path.exists());
    }
}
