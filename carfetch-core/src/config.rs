//! Explicit configuration for gateway pools
//!
//! Configuration is a plain value handed to the engine at construction;
//! nothing is cached process-wide, so one process can run several
//! independently configured pools. The discovery helpers implement the
//! IPIP-280 lookup order for hosts that configure a gateway through the
//! environment or well-known files.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::gateway::ResolutionStrategy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(
        "no IPFS gateway configured; set the IPFS_GATEWAY environment variable \
         or write a gateway URL to ~/.ipfs/gateway (IPIP-280)"
    )]
    NoGateway,

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

/// Configuration of one gateway pool
#[derive(Debug, Clone)]
pub struct GatewayPoolConfig {
    /// Gateway base URLs, in initial priority order
    pub gateways: Vec<String>,
    /// TCP connect timeout per attempt
    pub connect_timeout: Duration,
    /// Whole-request timeout per attempt
    pub request_timeout: Duration,
    /// Wall-clock bound on one logical retrieval across all retry rounds
    pub operation_timeout: Duration,
    /// Lower bound of the exponential backoff
    pub start_backoff: Duration,
    /// Upper bound of the exponential backoff
    pub max_backoff: Duration,
    /// Outer retry rounds before a retrieval gives up
    pub max_backoff_rounds: usize,
    /// Concurrent per-entry resolutions in batch operations
    pub max_concurrent: usize,
    /// How CID paths are mapped onto gateway URLs
    pub strategy: ResolutionStrategy,
}

impl Default for GatewayPoolConfig {
    fn default() -> Self {
        Self {
            gateways: Vec::new(),
            connect_timeout: Duration::from_secs(1),
            request_timeout: Duration::from_secs(5),
            operation_timeout: Duration::from_secs(30),
            start_backoff: Duration::from_secs_f64(1e-5),
            max_backoff: Duration::from_secs(5),
            max_backoff_rounds: 50,
            max_concurrent: 8,
            strategy: ResolutionStrategy::Path,
        }
    }
}

impl GatewayPoolConfig {
    /// Default bounds around an explicit gateway list
    pub fn with_gateways<I, S>(gateways: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            gateways: gateways.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Discover a gateway per IPIP-280 and build a config around it
    ///
    /// Lookup order: the `IPFS_GATEWAY` environment variable, then the
    /// `gateway` file under `$IPFS_PATH`, `$HOME/.ipfs`,
    /// `$XDG_CONFIG_HOME/ipfs` and `/etc/ipfs`.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(url) = env::var("IPFS_GATEWAY") {
            let url = url.trim();
            if !url.is_empty() {
                return Ok(Self::with_gateways([url]));
            }
        }
        for candidate in gateway_file_candidates() {
            if let Some(url) = gateway_from_file(&candidate) {
                return Ok(Self::with_gateways([url]));
            }
        }
        Err(ConfigError::NoGateway)
    }
}

fn gateway_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Ok(ipfs_path) = env::var("IPFS_PATH") {
        candidates.push(Path::new(&ipfs_path).join("gateway"));
    }
    if let Ok(home) = env::var("HOME") {
        candidates.push(Path::new(&home).join(".ipfs").join("gateway"));
    }
    if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        candidates.push(Path::new(&config_home).join("ipfs").join("gateway"));
    }
    candidates.push(PathBuf::from("/etc/ipfs/gateway"));
    candidates
}

/// Read a gateway URL from the first line of an IPIP-280 gateway file
pub fn gateway_from_file(path: &Path) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    let url = content.lines().next()?.trim();
    if url.is_empty() {
        None
    } else {
        Some(url.to_string())
    }
}
