//! Whisper — anonymous, ephemeral, peer-to-peer chat over SSH.
//!
//! Two modes, selected by `--bootstrap` / `IS_BOOTSTRAP`:
//! - Normal mode: accepts one chat session (SSH is out of scope here; see
//!   `transport.rs` for the stdio stand-in this binary actually runs), with a
//!   fresh ephemeral identity, bridged onto the gossip overlay.
//! - Bootstrap mode: the overlay alone, with a persistent identity, so other
//!   nodes have something stable to list as a bootstrap peer.

mod bootstrap;
mod buffer;
mod command;
mod config;
mod directory;
mod error;
mod fingerprint;
mod identity;
mod message;
mod overlay;
mod ratelimit;
mod router;
mod session;
mod transport;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use bootstrap::BootstrapConfig;
use config::{Cli, Config};
use directory::ChatDirectory;
use identity::EphemeralIdentity;
use overlay::IrohOverlay;
use session::Session;
use transport::{run_stdio_loop, StdioUi};

#[tokio::main]
async fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().resolve(cli);

    let result = if config.is_bootstrap {
        bootstrap::run_bootstrap(BootstrapConfig {
            key_path: Some(PathBuf::from(&config.ssh_host_key_path)),
            p2p_port: config.p2p_port,
        })
        .await
    } else {
        run_chat_node(config).await
    };

    match result {
        Ok(()) => std::process::ExitCode::from(0),
        Err(e) => {
            tracing::error!(error = %e, "fatal error");
            std::process::ExitCode::from(1)
        }
    }
}

async fn run_chat_node(config: Config) -> Result<(), error::WhisperError> {
    let overlay = IrohOverlay::bind(config.p2p_port)
        .await
        .map_err(|e| error::WhisperError::OverlayFatal(e.to_string()))?;
    let directory = Arc::new(ChatDirectory::new(config.max_messages_in_memory));
    let identity = EphemeralIdentity::generate();
    let ui = Arc::new(StdioUi);

    let session = Session::new(identity, overlay, directory, config, ui);
    run_stdio_loop(session)
        .await
        .map_err(|e| error::WhisperError::TransportClosed(e.to_string()))
}
