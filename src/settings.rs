use crate::contracts::KnownContract;
use crate::error::IndexerError;
use crate::types::conversions::string_to_address;
use crate::types::BlockTag;
use config::{Config, ConfigError, File};
use ethers::types::Address;
use indexmap::IndexMap;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Rpc {
    #[serde(default)]
    pub url: String,
    /// Widest block window requested in a single `eth_getLogs` call.
    #[serde(default = "default_max_block_span")]
    pub max_block_span: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: usize,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Requests per second towards the node; unlimited when unset.
    #[serde(default)]
    pub qps_limit: Option<u32>,
}

fn default_max_block_span() -> u64 {
    2000
}
fn default_retry_attempts() -> usize {
    3
}
fn default_retry_base_delay_ms() -> u64 {
    250
}

impl Default for Rpc {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_block_span: default_max_block_span(),
            retry_attempts: default_retry_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            qps_limit: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Chain {
    /// Stamped on every stored row.
    #[serde(default)]
    pub id: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Database {
    #[serde(default)]
    pub dsn: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
}

fn default_max_connections() -> u32 {
    5
}
fn default_connect_attempts() -> u32 {
    10
}

impl Default for Database {
    fn default() -> Self {
        Self {
            dsn: None,
            max_connections: default_max_connections(),
            connect_attempts: default_connect_attempts(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Scan {
    #[serde(default)]
    pub from_block: u64,
    #[serde(default)]
    pub to_block: BlockTag,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Abi {
    /// Directory holding `<Name>.abi.json`; the bundled descriptions are used when unset.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub rpc: Rpc,
    #[serde(default)]
    pub chain: Chain,
    #[serde(default)]
    pub database: Database,
    #[serde(default)]
    pub scan: Scan,
    #[serde(default)]
    pub abi: Abi,
    /// Monitored contracts by name, in processing order.
    #[serde(default)]
    pub contracts: IndexMap<String, String>,
}

impl Settings {
    /// `Config.toml` from the working directory (if present) plus process environment.
    pub fn new() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Like [`Settings::new`] but reading `path`, which must exist when given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name("Config.toml").required(false),
        };
        let s = Config::builder().add_source(file).build()?;

        let mut settings: Self = s.try_deserialize()?;
        settings.apply_env_overrides(|key| env::var(key).ok())?;
        Ok(settings)
    }

    /// Overlay environment keys on top of file values. `lookup` is the environment.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(url) = get("RPC_URL") {
            self.rpc.url = url;
        }
        if let Some(raw) = get("CHAIN_ID") {
            self.chain.id = raw
                .parse()
                .map_err(|_| ConfigError::Message(format!("CHAIN_ID '{raw}' is not a number")))?;
        }
        if let Some(dsn) = get("POSTGRES_DSN").or_else(|| get("DATABASE_URL")) {
            self.database.dsn = Some(dsn);
        }
        if let Some(raw) = get("FROM_BLOCK") {
            self.scan.from_block = raw
                .parse()
                .map_err(|_| ConfigError::Message(format!("FROM_BLOCK '{raw}' is not a number")))?;
        }
        if let Some(raw) = get("TO_BLOCK") {
            self.scan.to_block = raw.parse().map_err(ConfigError::Message)?;
        }
        if let Some(dir) = get("ABI_DIR") {
            self.abi.dir = Some(PathBuf::from(dir));
        }
        for contract in KnownContract::ALL {
            if let Some(address) = get(contract.address_env()) {
                self.contracts.insert(contract.name().to_string(), address);
            }
        }
        Ok(())
    }

    /// Checks everything a pass depends on before it starts.
    pub fn validate(&self, dry_run: bool) -> Result<(), IndexerError> {
        url::Url::parse(&self.rpc.url).map_err(|e| {
            IndexerError::config(format!("RPC_URL '{}' is not a valid URL: {e}", self.rpc.url))
        })?;
        if self.chain.id == 0 {
            return Err(IndexerError::config("CHAIN_ID must be set"));
        }
        if !dry_run && self.database.dsn.is_none() {
            return Err(IndexerError::config(
                "POSTGRES_DSN (or DATABASE_URL) must be set",
            ));
        }
        if self.contracts.is_empty() {
            return Err(IndexerError::config(
                "no contracts configured; set at least one <CONTRACT>_ADDRESS",
            ));
        }
        self.contract_addresses()?;
        if let BlockTag::Number(to) = self.scan.to_block {
            if self.scan.from_block > to {
                return Err(IndexerError::config(format!(
                    "from block {} is after to block {}",
                    self.scan.from_block, to
                )));
            }
        }
        Ok(())
    }

    /// Parsed contract addresses, preserving configuration order.
    pub fn contract_addresses(&self) -> Result<IndexMap<String, Address>, IndexerError> {
        self.contracts
            .iter()
            .map(|(name, raw)| {
                string_to_address(raw)
                    .map(|address| (name.clone(), address))
                    .map_err(|e| IndexerError::config(format!("{name} address: {e}")))
            })
            .collect()
    }
}
