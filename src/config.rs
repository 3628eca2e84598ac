use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tokio::fs;

use crate::ethereum::{WatchOpts, DEFAULT_SUBSCRIPTION_BUFFER};

pub const RPC_URL_ENV: &str = "ABI_BIND_RPC_URL";
pub const PRIVATE_KEY_ENV: &str = "ABI_BIND_PRIVATE_KEY";
pub const ALCHEMY_API_KEY_ENV: &str = "ALCHEMY_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub networks: HashMap<String, NetworkConfig>,
    pub default_network: String,
    #[serde(default)]
    pub subscription: SubscriptionConfig,
    #[serde(default)]
    pub signer: SignerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    pub explorer_url: Option<String>,
    #[serde(default)]
    pub gas: GasConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GasConfig {
    pub default_gas_limit: Option<u64>,
    pub max_gas_price: Option<u64>,
    pub priority_fee: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    /// Capacity of each live subscription's channel
    pub buffer: usize,
    /// How often `eth_getFilterChanges` is polled
    pub poll_interval_ms: u64,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            buffer: DEFAULT_SUBSCRIPTION_BUFFER,
            poll_interval_ms: 4000,
        }
    }
}

impl SubscriptionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn watch_opts(&self) -> WatchOpts {
        WatchOpts::with_buffer(self.buffer)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignerConfig {
    /// Hex private key. Prefer the environment variable over writing it here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        let mut networks = HashMap::new();

        networks.insert(
            "ethereum".to_string(),
            NetworkConfig {
                rpc_url: "https://eth-mainnet.g.alchemy.com/v2/demo".to_string(),
                chain_id: 1,
                explorer_url: Some("https://etherscan.io".to_string()),
                gas: GasConfig {
                    default_gas_limit: None,
                    max_gas_price: Some(50_000_000_000), // 50 Gwei
                    priority_fee: Some(2_000_000_000),   // 2 Gwei
                },
            },
        );

        networks.insert(
            "sepolia".to_string(),
            NetworkConfig {
                rpc_url: "https://eth-sepolia.g.alchemy.com/v2/demo".to_string(),
                chain_id: 11155111,
                explorer_url: Some("https://sepolia.etherscan.io".to_string()),
                gas: GasConfig {
                    default_gas_limit: None,
                    max_gas_price: Some(20_000_000_000), // 20 Gwei
                    priority_fee: Some(1_000_000_000),   // 1 Gwei
                },
            },
        );

        networks.insert(
            "local".to_string(),
            NetworkConfig {
                rpc_url: "http://127.0.0.1:8545".to_string(),
                chain_id: 31337,
                explorer_url: None,
                gas: GasConfig::default(),
            },
        );

        Self {
            networks,
            default_network: "ethereum".to_string(),
            subscription: SubscriptionConfig::default(),
            signer: SignerConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {:?}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {:?}: {}", path, e))?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)
            .map_err(|e| anyhow!("Failed to serialize config: {}", e))?;

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    anyhow!("Failed to create config directory {:?}: {}", parent, e)
                })?;
            }
        }

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {:?}: {}", path, e))?;

        Ok(())
    }

    /// Load configuration with fallback to default
    pub async fn load_or_default<P: AsRef<Path>>(path: Option<P>) -> Self {
        let mut config = match path {
            Some(path) => match Self::load_from_file(path).await {
                Ok(config) => {
                    tracing::info!("Loaded configuration from file");
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to load config file, using defaults: {}", e);
                    Self::default()
                }
            },
            None => Self::default(),
        };

        config.apply_env_vars();
        config
    }

    pub fn add_network(&mut self, name: String, config: NetworkConfig) {
        self.networks.insert(name, config);
    }

    /// Look up a network, falling back to `default_network`.
    pub fn network(&self, name: Option<&str>) -> Result<&NetworkConfig> {
        let name = name.unwrap_or(&self.default_network);
        self.networks.get(name).ok_or_else(|| {
            let mut known: Vec<_> = self.networks.keys().map(String::as_str).collect();
            known.sort_unstable();
            anyhow!(
                "Unknown network '{}'. Configured networks: {}",
                name,
                known.join(", ")
            )
        })
    }

    pub fn private_key(&self) -> Option<&str> {
        self.signer.private_key.as_deref()
    }

    /// Apply environment overrides on top of file or default values
    pub fn apply_env_vars(&mut self) {
        if let Ok(api_key) = std::env::var(ALCHEMY_API_KEY_ENV) {
            tracing::info!("Using {} for Alchemy RPC URLs", ALCHEMY_API_KEY_ENV);

            for (network_name, network_config) in &mut self.networks {
                if network_config.rpc_url.contains("alchemy.com/v2/demo") {
                    network_config.rpc_url = network_config
                        .rpc_url
                        .replace("/demo", &format!("/{}", api_key));
                    tracing::debug!("Updated {} RPC URL with API key", network_name);
                } else if network_config.rpc_url.contains("YOUR_API_KEY_HERE") {
                    network_config.rpc_url = network_config
                        .rpc_url
                        .replace("YOUR_API_KEY_HERE", &api_key);
                    tracing::debug!("Updated {} RPC URL with API key", network_name);
                }
            }
        } else {
            for (network_name, network_config) in &self.networks {
                if network_config.rpc_url.contains("/demo") {
                    tracing::warn!(
                        "Using demo RPC endpoint for {}, set {} for better reliability",
                        network_name,
                        ALCHEMY_API_KEY_ENV
                    );
                }
            }
        }

        if let Ok(rpc_url) = std::env::var(RPC_URL_ENV) {
            let default_network = self.default_network.clone();
            match self.networks.get_mut(&default_network) {
                Some(network) => {
                    tracing::debug!("Overriding {} RPC URL from {}", default_network, RPC_URL_ENV);
                    network.rpc_url = rpc_url;
                }
                None => tracing::warn!(
                    "{} is set but default network '{}' is not configured",
                    RPC_URL_ENV,
                    default_network
                ),
            }
        }

        if let Ok(private_key) = std::env::var(PRIVATE_KEY_ENV) {
            tracing::debug!("Using signer key from {}", PRIVATE_KEY_ENV);
            self.signer.private_key = Some(private_key);
        }
    }

    /// Get default config file path
    pub fn default_config_path() -> Result<std::path::PathBuf> {
        let config_dir =
            dirs::config_dir().ok_or_else(|| anyhow!("Could not determine config directory"))?;
        Ok(config_dir.join("abi-bind").join("config.toml"))
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let sample_config = r#"# abi-bind configuration file

# Network used when none is specified
default_network = "ethereum"

[networks.ethereum]
rpc_url = "https://eth-mainnet.g.alchemy.com/v2/YOUR_API_KEY_HERE"
chain_id = 1
explorer_url = "https://etherscan.io"

[networks.ethereum.gas]
max_gas_price = 50_000_000_000  # 50 Gwei
priority_fee = 2_000_000_000    # 2 Gwei

[networks.sepolia]
rpc_url = "https://eth-sepolia.g.alchemy.com/v2/YOUR_API_KEY_HERE"
chain_id = 11155111
explorer_url = "https://sepolia.etherscan.io"

[networks.sepolia.gas]
max_gas_price = 20_000_000_000  # 20 Gwei
priority_fee = 1_000_000_000    # 1 Gwei

[networks.local]
rpc_url = "http://127.0.0.1:8545"
chain_id = 31337

[networks.local.gas]
default_gas_limit = 3_000_000

# Live log subscriptions
[subscription]
buffer = 128
poll_interval_ms = 4000

# Environment variables that can be used:
# ABI_BIND_RPC_URL - overrides the default network's RPC URL
# ABI_BIND_PRIVATE_KEY - hex key used to sign transactions
# ALCHEMY_API_KEY - your Alchemy API key (replaces YOUR_API_KEY_HERE above)
"#;
        sample_config.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_sample_parses() {
        let config: Config = toml::from_str(&Config::generate_sample()).unwrap();
        assert_eq!(config.default_network, "ethereum");
        assert_eq!(config.subscription.buffer, 128);
        assert_eq!(config.subscription.poll_interval(), Duration::from_secs(4));
        assert_eq!(config.subscription.watch_opts().buffer, 128);
        assert_eq!(
            config.network(Some("local")).unwrap().gas.default_gas_limit,
            Some(3_000_000)
        );
        assert!(config.private_key().is_none());
    }

    #[test]
    fn test_network_lookup() {
        let config = Config::default();
        assert_eq!(config.network(None).unwrap().chain_id, 1);
        assert_eq!(config.network(Some("sepolia")).unwrap().chain_id, 11155111);

        let err = config.network(Some("nowhere")).unwrap_err().to_string();
        assert!(err.contains("nowhere"));
        assert!(err.contains("ethereum"));
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let config: Config = toml::from_str(
            r#"
            default_network = "local"
            [networks.local]
            rpc_url = "http://127.0.0.1:8545"
            chain_id = 31337
            "#,
        )
        .unwrap();

        assert_eq!(config.subscription.buffer, DEFAULT_SUBSCRIPTION_BUFFER);
        assert!(config.network(None).unwrap().gas.max_gas_price.is_none());
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.subscription.buffer = 16;
        config.signer.private_key = Some("0x01".to_string());
        config.save_to_file(&path).await.unwrap();

        let loaded = Config::load_from_file(&path).await.unwrap();
        assert_eq!(loaded.subscription.buffer, 16);
        assert_eq!(loaded.private_key(), Some("0x01"));
        assert_eq!(loaded.networks.len(), config.networks.len());
        assert_eq!(
            loaded.network(Some("ethereum")).unwrap().rpc_url,
            config.network(Some("ethereum")).unwrap().rpc_url
        );
    }

    #[tokio::test]
    async fn test_load_or_default_falls_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        let config = Config::load_or_default(Some(&path)).await;
        assert!(config.networks.contains_key("ethereum"));
    }
}
