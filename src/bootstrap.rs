//! Bootstrap Mode (spec.md §4.9): the overlay alone, with a persistent
//! identity other nodes can rely on. No SSH, no UI, no Session/Directory —
//! just an `iroh::Endpoint` + `iroh_gossip::net::Gossip` kept alive, logging
//! its lifecycle and shutting down cleanly on a termination signal.

use std::path::PathBuf;
use std::time::Duration;

use tracing::info;

use crate::error::WhisperError;
use crate::overlay::IrohOverlay;

#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    pub key_path: Option<PathBuf>,
    pub p2p_port: u16,
}

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

/// Loads the key at `path` if it exists, otherwise generates one and (if a
/// path was given) persists the raw secret key bytes there.
fn load_or_generate_key(path: &Option<PathBuf>) -> std::io::Result<iroh::SecretKey> {
    if let Some(path) = path {
        if path.exists() {
            let bytes = std::fs::read(path)?;
            if let Ok(array) = <[u8; 32]>::try_from(bytes.as_slice()) {
                return Ok(iroh::SecretKey::from_bytes(&array));
            }
            info!(?path, "existing key file has unexpected length, regenerating");
        }
    }
    let key = iroh::SecretKey::generate(&mut rand::rng());
    if let Some(path) = path {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, key.to_bytes())?;
    }
    Ok(key)
}

/// Runs the overlay-only bootstrap node until a termination signal arrives.
/// Returns `Ok(())` on clean shutdown; a startup failure is surfaced as
/// `WhisperError::OverlayFatal` so `main.rs` can map it to exit code 1.
pub async fn run_bootstrap(config: BootstrapConfig) -> Result<(), WhisperError> {
    let secret_key = load_or_generate_key(&config.key_path)
        .map_err(|e| WhisperError::OverlayFatal(e.to_string()))?;

    let overlay = IrohOverlay::bind_with_key(config.p2p_port, Some(secret_key))
        .await
        .map_err(|e| WhisperError::OverlayFatal(e.to_string()))?;

    let endpoint_id = overlay.endpoint().id();
    info!(%endpoint_id, port = config.p2p_port, "bootstrap node listening");
    if let Ok(node_addr) = overlay.endpoint().node_addr().await {
        for addr in &node_addr.direct_addresses {
            info!(%addr, "listening address");
        }
    }

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await; // first tick fires immediately; skip it

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                info!(%endpoint_id, connections = overlay.connected_count(), "bootstrap node heartbeat");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("received shutdown signal");
                break;
            }
        }
    }

    overlay
        .shutdown()
        .await
        .map_err(|e| WhisperError::OverlayFatal(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_key_round_trips_through_a_file() {
        let dir = std::env::temp_dir().join(format!("whisper-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("host.key");

        let first = load_or_generate_key(&Some(path.clone())).unwrap();
        let second = load_or_generate_key(&Some(path.clone())).unwrap();
        assert_eq!(first.to_bytes(), second.to_bytes());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn no_path_always_generates_a_fresh_key() {
        let a = load_or_generate_key(&None).unwrap();
        let b = load_or_generate_key(&None).unwrap();
        assert_ne!(a.to_bytes(), b.to_bytes());
    }
}
