//! Client configuration
//!
//! Layered with the `config` crate: built-in defaults, then
//! `<config_dir>/meshcall/config.toml`, then the file named by
//! `MESHCALL_CONFIG`, then `MESHCALL_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

use meshcall_protocol::IceServer;
use serde::Deserialize;

use crate::call::GlarePolicy;
use crate::error::{CallError, Result};

const ENV_PREFIX: &str = "MESHCALL";
const CONFIG_PATH_VAR: &str = "MESHCALL_CONFIG";

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// WebSocket URL of the signaling relay
    #[serde(default = "default_signaling_url")]
    pub signaling_url: String,
    /// Room key; every client using the same key joins the same call
    #[serde(default)]
    pub room: String,
    /// Name attached to outgoing chat messages
    #[serde(default = "default_display_name")]
    pub display_name: String,
    #[serde(default = "default_ice_servers")]
    pub ice_servers: Vec<IceServer>,
    #[serde(default = "default_true")]
    pub start_with_video: bool,
    #[serde(default = "default_true")]
    pub start_with_audio: bool,
    #[serde(default = "default_negotiation_timeout_ms")]
    pub negotiation_timeout_ms: u64,
    #[serde(default)]
    pub glare_policy: GlarePolicy,
}

fn default_signaling_url() -> String {
    "ws://127.0.0.1:8000/ws".to_string()
}

fn default_display_name() -> String {
    "guest".to_string()
}

fn default_ice_servers() -> Vec<IceServer> {
    vec![IceServer::stun("stun:stun.l.google.com:19302")]
}

fn default_true() -> bool {
    true
}

fn default_negotiation_timeout_ms() -> u64 {
    10_000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            signaling_url: default_signaling_url(),
            room: String::new(),
            display_name: default_display_name(),
            ice_servers: default_ice_servers(),
            start_with_video: true,
            start_with_audio: true,
            negotiation_timeout_ms: default_negotiation_timeout_ms(),
            glare_policy: GlarePolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Default location of the user config file
    pub fn config_file_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("meshcall").join("config.toml"))
    }

    /// Load configuration from files and the environment
    pub fn load() -> Result<Self> {
        Self::load_with_room(None)
    }

    /// Like [`Self::load`], with `room` taking precedence over every source
    pub fn load_with_room(room: Option<String>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder();

        if let Some(path) = Self::config_file_path() {
            tracing::debug!("Looking for config file at {:?}", path);
            builder = builder.add_source(config::File::from(path).required(false));
        }

        if let Ok(path) = std::env::var(CONFIG_PATH_VAR) {
            builder = builder.add_source(config::File::from(PathBuf::from(path)).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );
        builder = builder.set_override_option("room", room)?;

        let config: ClientConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document on its own, without files or environment
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: ClientConfig = config::Config::builder()
            .add_source(config::File::from_str(contents, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.signaling_url.trim().is_empty() {
            return Err(CallError::Config("signaling_url must not be empty".to_string()));
        }
        if self.room.trim().is_empty() {
            return Err(CallError::Config("room must not be empty".to_string()));
        }
        if self.negotiation_timeout_ms == 0 {
            return Err(CallError::Config(
                "negotiation_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_millis(self.negotiation_timeout_ms)
    }
}
