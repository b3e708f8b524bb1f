use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::error::{DeployError, Result};

/// File name looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "deploy.toml";

pub const DEFAULT_NETWORK: &str = "sepolia";

const DEFAULT_SOLC_VERSION: &str = "0.8.20";
const DEFAULT_OPTIMIZER_RUNS: u32 = 200;
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const SEPOLIA_CHAIN_ID: u64 = 11_155_111;

// ---------------------------------------------------------------------------
// File configuration
// ---------------------------------------------------------------------------

/// Project configuration, normally read from `deploy.toml`.
///
/// Every section is optional; anything left out falls back to the defaults
/// below, which target Sepolia with solc 0.8.20 and sources in `./contracts`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub solidity: SolidityConfig,
    pub paths: PathsConfig,
    pub networks: BTreeMap<String, NetworkConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolidityConfig {
    /// Exact compiler version the sources are built with.
    pub version: String,
    /// Path or name of the `solc` binary.
    pub solc: PathBuf,
    pub optimizer: OptimizerConfig,
    /// Target EVM version; solc picks its own default when unset.
    pub evm_version: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub enabled: bool,
    pub runs: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub sources: PathBuf,
    pub artifacts: PathBuf,
    pub deployments: PathBuf,
    /// Extra roots solc searches for imports such as `@openzeppelin/...`.
    pub include: Vec<PathBuf>,
}

/// A named network endpoint.
///
/// The RPC URL is either written literally (`url`) or read from the
/// environment variable named by `url_env`. The signing key is always read
/// from the environment (`account_env`) and never stored in the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub url: Option<String>,
    pub url_env: Option<String>,
    pub account_env: String,
    pub chain_id: Option<u64>,
    pub timeout_secs: u64,
}

impl Default for SolidityConfig {
    fn default() -> Self {
        Self {
            version: DEFAULT_SOLC_VERSION.to_string(),
            solc: PathBuf::from("solc"),
            optimizer: OptimizerConfig::default(),
            evm_version: None,
        }
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            runs: DEFAULT_OPTIMIZER_RUNS,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            sources: PathBuf::from("contracts"),
            artifacts: PathBuf::from("artifacts"),
            deployments: PathBuf::from("deployments"),
            include: vec![PathBuf::from("node_modules")],
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            url: None,
            url_env: None,
            account_env: "PRIVATE_KEY".to_string(),
            chain_id: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl Default for ProjectConfig {
    fn default() -> Self {
        let mut networks = BTreeMap::new();
        networks.insert(
            DEFAULT_NETWORK.to_string(),
            NetworkConfig {
                url_env: Some("SEPOLIA_RPC_URL".to_string()),
                chain_id: Some(SEPOLIA_CHAIN_ID),
                ..NetworkConfig::default()
            },
        );

        Self {
            solidity: SolidityConfig::default(),
            paths: PathsConfig::default(),
            networks,
        }
    }
}

impl ProjectConfig {
    /// Load the config from a TOML file, or return defaults if the file is
    /// missing. A file that exists but does not parse is an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let data = std::fs::read_to_string(path)?;
        let config: ProjectConfig = toml::from_str(&data)
            .map_err(|e| DeployError::Config(format!("{}: {e}", path.display())))?;
        info!(path = %path.display(), networks = config.networks.len(), "config loaded");
        Ok(config)
    }

    /// Resolve the named network against the environment.
    ///
    /// `env` returns the value of an environment variable; blank values count
    /// as unset.
    pub fn network<F>(&self, name: &str, env: F) -> Result<ResolvedNetwork>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let network = self.networks.get(name).ok_or_else(|| {
            let known: Vec<&str> = self.networks.keys().map(String::as_str).collect();
            DeployError::Config(format!(
                "unknown network '{name}' (configured: {})",
                known.join(", ")
            ))
        })?;

        let raw_url = match (&network.url, &network.url_env) {
            (Some(url), _) if !url.trim().is_empty() => url.trim().to_string(),
            (_, Some(var)) => lookup(var.as_str()).ok_or_else(|| {
                DeployError::Config(format!("network '{name}' has no RPC URL (set {var})"))
            })?,
            _ => {
                return Err(DeployError::Config(format!(
                    "network '{name}' has no RPC URL configured"
                )));
            }
        };
        let url = parse_rpc_url(&raw_url).ok_or_else(|| {
            DeployError::Config(format!("network '{name}' has an invalid RPC URL"))
        })?;
        if network.timeout_secs == 0 {
            return Err(DeployError::Config(format!(
                "network '{name}' has timeout_secs = 0"
            )));
        }

        let private_key = lookup(network.account_env.as_str()).ok_or_else(|| {
            DeployError::Config(format!(
                "network '{name}' has no signing account (set {})",
                network.account_env
            ))
        })?;

        Ok(ResolvedNetwork {
            name: name.to_string(),
            url,
            private_key,
            chain_id: network.chain_id,
            timeout: Duration::from_secs(network.timeout_secs),
        })
    }
}

// ---------------------------------------------------------------------------
// Resolved network
// ---------------------------------------------------------------------------

/// A network entry with its environment values filled in.
#[derive(Clone)]
pub struct ResolvedNetwork {
    pub name: String,
    pub url: Url,
    pub private_key: String,
    pub chain_id: Option<u64>,
    pub timeout: Duration,
}

impl fmt::Debug for ResolvedNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedNetwork")
            .field("name", &self.name)
            .field("host", &self.url.host_str())
            .field("private_key", &"<redacted>")
            .field("chain_id", &self.chain_id)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Validate that a URL is well-formed and uses HTTP or HTTPS.
pub fn validate_url(url: &str) -> bool {
    parse_rpc_url(url).is_some()
}

/// Parse an RPC URL, accepting only HTTP(S) URLs with a host.
fn parse_rpc_url(url: &str) -> Option<Url> {
    let parsed = Url::parse(url).ok()?;
    let scheme = parsed.scheme();
    ((scheme == "http" || scheme == "https") && parsed.host().is_some()).then_some(parsed)
}
