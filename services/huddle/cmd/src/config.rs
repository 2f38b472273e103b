//! Configuration handling for the huddle binary.
//!
//! Values come from an optional YAML file, then `HUDDLE_*` environment
//! variables on top. A missing or unparsable file falls back to defaults;
//! only the final values are logged.

use anyhow::Result;
use serde::Deserialize;
use std::path::Path;
use tracing::{info, warn};

/// Huddle configuration
#[derive(Debug, Clone)]
pub struct HuddleConfig {
    /// Host name or address of the directory service
    pub directory_host: String,
    /// Well-known port the directory listens on
    pub directory_port: u16,
    /// First rendezvous/listen port the directory hands out
    pub base_p2p_port: u16,
    /// Substrings a star host refuses to broadcast
    pub banned_words: Vec<String>,
    /// Warnings a star host issues before removing a peer
    pub max_warnings: u32,
}

impl Default for HuddleConfig {
    fn default() -> Self {
        Self {
            directory_host: "localhost".to_string(),
            directory_port: 2000,
            base_p2p_port: 3100,
            banned_words: vec!["xxx".to_string(), "yyy".to_string(), "zzz".to_string()],
            max_warnings: 3,
        }
    }
}

/// Root configuration structure (matches the YAML structure)
#[derive(Debug, Deserialize)]
struct RootConfig {
    directory: Option<DirectorySection>,
    moderation: Option<ModerationSection>,
}

#[derive(Debug, Deserialize)]
struct DirectorySection {
    host: Option<String>,
    port: Option<u16>,
    base_p2p_port: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct ModerationSection {
    banned_words: Option<Vec<String>>,
    max_warnings: Option<u32>,
}

impl HuddleConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config = Self::default();

        if let Ok(content) = std::fs::read_to_string(&config_path) {
            if let Ok(root_config) = serde_yaml::from_str::<RootConfig>(&content) {
                config.apply_root_config(root_config);
                info!("Loaded configuration from {:?}", config_path.as_ref());
            } else {
                warn!(
                    "Failed to parse config file {:?}, using defaults",
                    config_path.as_ref()
                );
            }
        } else {
            warn!(
                "Config file {:?} not found, using defaults",
                config_path.as_ref()
            );
        }

        config.apply_environment_overrides();

        info!(
            "Final configuration: directory={}:{}, base_p2p_port={}, max_warnings={}",
            config.directory_host, config.directory_port, config.base_p2p_port, config.max_warnings
        );

        Ok(config)
    }

    fn apply_root_config(&mut self, root_config: RootConfig) {
        if let Some(directory) = root_config.directory {
            if let Some(host) = directory.host {
                self.directory_host = host;
            }
            if let Some(port) = directory.port {
                self.directory_port = port;
            }
            if let Some(base) = directory.base_p2p_port {
                self.base_p2p_port = base;
            }
        }

        if let Some(moderation) = root_config.moderation {
            if let Some(words) = moderation.banned_words {
                self.banned_words = words;
            }
            if let Some(max) = moderation.max_warnings {
                self.max_warnings = max;
            }
        }
    }

    fn apply_environment_overrides(&mut self) {
        if let Ok(host) = std::env::var("HUDDLE_DIRECTORY_HOST") {
            self.directory_host = host;
            info!(
                "Directory host overridden by environment: {}",
                self.directory_host
            );
        }

        if let Ok(port) = std::env::var("HUDDLE_DIRECTORY_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.directory_port = port;
                info!("Directory port overridden by environment: {}", port);
            }
        }

        if let Ok(base) = std::env::var("HUDDLE_BASE_P2P_PORT") {
            if let Ok(base) = base.parse::<u16>() {
                self.base_p2p_port = base;
                info!("Base p2p port overridden by environment: {}", base);
            }
        }
    }
}
