//! Configuration schema and TOML loading.

use std::collections::BTreeMap;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::{Limits, PeerIdx};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub coherency: CoherencyConfig,
    pub limits: Limits,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoherencyConfig {
    /// The peer index designated "this process".
    pub this_peer: PeerIdx,
    pub listen_addr: String,
    /// Communication gate; accessor hooks are no-ops when false.
    pub enabled: bool,
    pub peers: Vec<PeerEntry>,
}

impl Default for CoherencyConfig {
    fn default() -> Self {
        Self {
            this_peer: PeerIdx::new(0),
            listen_addr: "127.0.0.1:9430".to_string(),
            enabled: true,
            peers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerEntry {
    pub idx: PeerIdx,
    pub addr: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub stdout: bool,
    pub stdout_format: LogFormat,
    /// `tracing` filter directive; `RUST_LOG` overrides it.
    pub filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            stdout: true,
            stdout_format: LogFormat::Compact,
            filter: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("peer {idx} address did not resolve: {addr}")]
    PeerAddrUnresolved { idx: PeerIdx, addr: String },
    #[error("duplicate peer index {idx} in roster")]
    DuplicatePeer { idx: PeerIdx },
}

impl Config {
    /// Load from a TOML file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}

impl CoherencyConfig {
    /// Resolve the peer roster into the transport's address table.
    pub fn peer_table(&self) -> Result<BTreeMap<PeerIdx, SocketAddr>, ConfigError> {
        let mut table = BTreeMap::new();
        for entry in &self.peers {
            let addr = entry
                .addr
                .to_socket_addrs()
                .ok()
                .and_then(|mut addrs| addrs.next())
                .ok_or_else(|| ConfigError::PeerAddrUnresolved {
                    idx: entry.idx,
                    addr: entry.addr.clone(),
                })?;
            if table.insert(entry.idx, addr).is_some() {
                return Err(ConfigError::DuplicatePeer { idx: entry.idx });
            }
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.coherency.this_peer, PeerIdx::new(0));
        assert!(config.coherency.enabled);
        assert!(config.coherency.peers.is_empty());
        assert_eq!(config.limits, Limits::default());
    }

    #[test]
    fn full_config_parses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("treecache.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            r#"
[coherency]
this_peer = 1
listen_addr = "0.0.0.0:9431"
enabled = true
peers = [
    {{ idx = 0, addr = "127.0.0.1:9430" }},
    {{ idx = 2, addr = "127.0.0.1:9432" }},
]

[limits]
max_frame_bytes = 1048576
read_stall_timeout_ms = 2500

[logging]
stdout_format = "json"
filter = "treecache=debug"
"#
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.coherency.this_peer, PeerIdx::new(1));
        assert_eq!(config.coherency.listen_addr, "0.0.0.0:9431");
        assert_eq!(config.limits.max_frame_bytes, 1048576);
        assert_eq!(config.limits.read_stall_timeout_ms, Some(2500));
        // Unset limits keep their defaults.
        assert_eq!(config.limits.connect_timeout_ms, 5_000);
        assert_eq!(config.logging.stdout_format, LogFormat::Json);

        let table = config.coherency.peer_table().unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(
            table[&PeerIdx::new(0)],
            "127.0.0.1:9430".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn duplicate_peer_indices_are_rejected() {
        let config = CoherencyConfig {
            peers: vec![
                PeerEntry {
                    idx: PeerIdx::new(1),
                    addr: "127.0.0.1:9430".into(),
                },
                PeerEntry {
                    idx: PeerIdx::new(1),
                    addr: "127.0.0.1:9431".into(),
                },
            ],
            ..CoherencyConfig::default()
        };
        assert!(matches!(
            config.peer_table().unwrap_err(),
            ConfigError::DuplicatePeer { idx } if idx == PeerIdx::new(1)
        ));
    }
}
