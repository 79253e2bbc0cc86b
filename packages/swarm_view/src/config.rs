use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Two equivalent ways to configure:
//
//   config.toml:     [publisher]
//                    port = 30123
//
//   env var:         SWARM_PUBLISHER__PORT=30123   (double underscore = nesting)
//
// CLI flags override both (resolved in main, not here).

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub publisher: PublisherFileConfig,
}

/// Publisher endpoint tunables (lives under `[publisher]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PublisherFileConfig {
    /// Full `ws://` endpoint. When set, `host`/`port` are ignored.
    #[serde(default)]
    pub url: Option<String>,
    /// Host the publisher runs on (default: loopback).
    #[serde(default)]
    pub host: Option<String>,
    /// The publisher's fixed well-known port.
    #[serde(default = "default_publisher_port")]
    pub port: u16,
    /// Pause between losing the connection and the next attempt.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

impl Default for PublisherFileConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: None,
            port: default_publisher_port(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
        }
    }
}

fn default_publisher_port() -> u16 {
    29999
}

fn default_reconnect_delay_ms() -> u64 {
    crate::connection::DEFAULT_RECONNECT_DELAY.as_millis() as u64
}

/// Build a figment that layers: defaults → config.toml → SWARM_* env vars.
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("SWARM_").split("__"))
}

// =============================================================================
// Runtime config structs (derived from FileConfig, used by the client)
// =============================================================================

/// Resolved connection parameters for one viewer instance.
#[derive(Clone, Debug)]
pub struct ViewerConfig {
    /// Publisher endpoint, `ws://host:port`.
    pub url: String,
    /// Fixed reconnect delay.
    pub reconnect_delay: Duration,
}

impl ViewerConfig {
    pub fn from_file(fc: &FileConfig) -> Self {
        let url = fc.publisher.url.clone().unwrap_or_else(|| {
            let host = fc.publisher.host.as_deref().unwrap_or("127.0.0.1");
            format!("ws://{}:{}", host, fc.publisher.port)
        });
        Self {
            url,
            reconnect_delay: Duration::from_millis(fc.publisher.reconnect_delay_ms),
        }
    }
}

// =============================================================================
// Directory layout config (not tunable via figment — derived from --data-dir)
// =============================================================================

#[derive(Clone, Debug)]
pub struct SwarmViewConfig {
    pub data_dir: PathBuf,
}

impl SwarmViewConfig {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = custom_dir.unwrap_or_else(|| {
            dirs::home_dir()
                .expect("Could not find home directory")
                .join(".swarmview")
        });

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        info!("Data directory: {}", data_dir.display());

        Ok(Self { data_dir })
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }
}
