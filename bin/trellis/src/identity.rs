//! Local peer identity.

use eyre::{Result, WrapErr, ensure};
use libp2p::PeerId;
use libp2p::identity::{Keypair, ed25519};

/// Peer id from a hex seed, or from a freshly generated key.
pub(crate) fn local_peer_id(seed: Option<&str>) -> Result<PeerId> {
    let keypair = match seed {
        Some(seed) => {
            let bytes =
                hex::decode(seed.trim_start_matches("0x")).wrap_err("identity seed is not hex")?;
            ensure!(
                bytes.len() == 32,
                "identity seed must be 32 bytes, got {}",
                bytes.len()
            );
            let secret =
                ed25519::SecretKey::try_from_bytes(bytes).wrap_err("invalid identity seed")?;
            Keypair::from(ed25519::Keypair::from(secret))
        }
        None => Keypair::generate_ed25519(),
    };
    Ok(keypair.public().to_peer_id())
}
