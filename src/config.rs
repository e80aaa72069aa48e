//! Configuration (spec.md §6): environment defaults layered with CLI
//! overrides, mirroring the reference's `#[derive(Parser)]` style.

use clap::Parser;

#[derive(Debug, Clone)]
pub struct Config {
    pub ssh_port: u16,
    pub ssh_host_key_path: String,
    pub p2p_port: u16,
    pub bootstrap_nodes: Vec<String>,
    pub default_room: String,
    pub max_message_size: usize,
    pub max_messages_in_memory: usize,
    pub rate_limit: usize,
    pub max_nick_length: usize,
    pub max_room_name_length: usize,
    pub is_bootstrap: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ssh_port: 2222,
            ssh_host_key_path: "./keys/host.key".to_string(),
            p2p_port: 4001,
            bootstrap_nodes: Vec::new(),
            default_room: "lobby".to_string(),
            max_message_size: 4096,
            max_messages_in_memory: 100,
            rate_limit: 10,
            max_nick_length: 32,
            max_room_name_length: 32,
            is_bootstrap: false,
        }
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            ssh_port: env_parsed("SSH_PORT", defaults.ssh_port),
            ssh_host_key_path: std::env::var("SSH_HOST_KEY_PATH")
                .unwrap_or(defaults.ssh_host_key_path),
            p2p_port: env_parsed("P2P_PORT", defaults.p2p_port),
            bootstrap_nodes: std::env::var("BOOTSTRAP_NODES")
                .ok()
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or(defaults.bootstrap_nodes),
            default_room: std::env::var("DEFAULT_ROOM").unwrap_or(defaults.default_room),
            max_message_size: env_parsed("MAX_MESSAGE_SIZE", defaults.max_message_size),
            max_messages_in_memory: env_parsed(
                "MAX_MESSAGES_IN_MEMORY",
                defaults.max_messages_in_memory,
            ),
            rate_limit: env_parsed("RATE_LIMIT", defaults.rate_limit),
            max_nick_length: env_parsed("MAX_NICK_LENGTH", defaults.max_nick_length),
            max_room_name_length: env_parsed(
                "MAX_ROOM_NAME_LENGTH",
                defaults.max_room_name_length,
            ),
            is_bootstrap: env_parsed("IS_BOOTSTRAP", defaults.is_bootstrap),
        }
    }

    /// Layers `cli` over `self`, letting an explicit flag override the
    /// environment-derived value field by field.
    pub fn resolve(mut self, cli: Cli) -> Self {
        if let Some(v) = cli.ssh_port {
            self.ssh_port = v;
        }
        if let Some(v) = cli.ssh_host_key_path {
            self.ssh_host_key_path = v;
        }
        if let Some(v) = cli.p2p_port {
            self.p2p_port = v;
        }
        if let Some(v) = cli.bootstrap_nodes {
            self.bootstrap_nodes = v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect();
        }
        if let Some(v) = cli.default_room {
            self.default_room = v;
        }
        if let Some(v) = cli.max_message_size {
            self.max_message_size = v;
        }
        if let Some(v) = cli.max_messages_in_memory {
            self.max_messages_in_memory = v;
        }
        if let Some(v) = cli.rate_limit {
            self.rate_limit = v;
        }
        if let Some(v) = cli.max_nick_length {
            self.max_nick_length = v;
        }
        if let Some(v) = cli.max_room_name_length {
            self.max_room_name_length = v;
        }
        if cli.bootstrap {
            self.is_bootstrap = true;
        }
        self
    }
}

/// CLI overrides for `Config`. Every field is optional so an unset flag
/// falls through to the environment-derived default.
#[derive(Parser, Debug, Default)]
#[command(name = "whisper", about = "Anonymous, ephemeral, peer-to-peer chat over SSH")]
pub struct Cli {
    #[arg(long)]
    pub ssh_port: Option<u16>,

    #[arg(long)]
    pub ssh_host_key_path: Option<String>,

    #[arg(long)]
    pub p2p_port: Option<u16>,

    #[arg(long)]
    pub bootstrap_nodes: Option<String>,

    #[arg(long)]
    pub default_room: Option<String>,

    #[arg(long)]
    pub max_message_size: Option<usize>,

    #[arg(long)]
    pub max_messages_in_memory: Option<usize>,

    #[arg(long)]
    pub rate_limit: Option<usize>,

    #[arg(long)]
    pub max_nick_length: Option<usize>,

    #[arg(long)]
    pub max_room_name_length: Option<usize>,

    /// Run as a bootstrap/relay node instead of an SSH chat server.
    #[arg(long)]
    pub bootstrap: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_spec_documented_values() {
        let c = Config::default();
        assert_eq!(c.ssh_port, 2222);
        assert_eq!(c.p2p_port, 4001);
        assert_eq!(c.default_room, "lobby");
        assert_eq!(c.max_message_size, 4096);
        assert_eq!(c.max_messages_in_memory, 100);
        assert_eq!(c.rate_limit, 10);
        assert!(!c.is_bootstrap);
    }

    #[test]
    fn resolve_overrides_only_the_fields_the_cli_set() {
        let base = Config::default();
        let cli = Cli {
            default_room: Some("dev".into()),
            ..Default::default()
        };
        let resolved = base.resolve(cli);
        assert_eq!(resolved.default_room, "dev");
        assert_eq!(resolved.ssh_port, 2222);
    }

    #[test]
    fn bootstrap_flag_forces_is_bootstrap_true() {
        let base = Config::default();
        let cli = Cli {
            bootstrap: true,
            ..Default::default()
        };
        assert!(base.resolve(cli).is_bootstrap);
    }
}
