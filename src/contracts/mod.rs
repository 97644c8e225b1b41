//! # Contracts
//!
//! The monitored contracts and their interface descriptions.
//!
//! Interface descriptions are JSON ABI files named `<ContractName>.abi.json`. Both a bare
//! array of entries and the export format `{ "contractName": ..., "abi": [...] }` are
//! accepted. When no directory is configured, the descriptions bundled under `abis/` are used.

use crate::error::{IndexerError, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Contracts the indexer knows how to monitor out of the box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KnownContract {
    DealEngine,
    DeferredVault,
    PayoutRouter,
    ReceiptNft,
}

impl KnownContract {
    pub const ALL: [KnownContract; 4] = [
        KnownContract::DealEngine,
        KnownContract::DeferredVault,
        KnownContract::PayoutRouter,
        KnownContract::ReceiptNft,
    ];

    pub fn name(self) -> &'static str {
        match self {
            KnownContract::DealEngine => "DealEngine",
            KnownContract::DeferredVault => "DeferredVault",
            KnownContract::PayoutRouter => "PayoutRouter",
            KnownContract::ReceiptNft => "ReceiptNFT",
        }
    }

    /// Environment key carrying the deployed address.
    pub fn address_env(self) -> &'static str {
        match self {
            KnownContract::DealEngine => "DEAL_ENGINE_ADDRESS",
            KnownContract::DeferredVault => "VAULT_ADDRESS",
            KnownContract::PayoutRouter => "ROUTER_ADDRESS",
            KnownContract::ReceiptNft => "RECEIPT_NFT_ADDRESS",
        }
    }

    pub fn bundled_abi(self) -> &'static str {
        match self {
            KnownContract::DealEngine => include_str!("../../abis/DealEngine.abi.json"),
            KnownContract::DeferredVault => include_str!("../../abis/DeferredVault.abi.json"),
            KnownContract::PayoutRouter => include_str!("../../abis/PayoutRouter.abi.json"),
            KnownContract::ReceiptNft => include_str!("../../abis/ReceiptNFT.abi.json"),
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }
}

/// One entry of an interface description. Only `event` entries are consumed.
#[derive(Debug, Clone, Deserialize)]
pub struct AbiEntry {
    #[serde(rename = "type", default = "default_entry_kind")]
    pub kind: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub inputs: Vec<AbiParam>,
    #[serde(default)]
    pub anonymous: bool,
}

// Solidity treats an entry without "type" as a function
fn default_entry_kind() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct AbiParam {
    #[serde(default)]
    pub name: String,
    /// Kept optional so a missing type can be reported with its location.
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub indexed: bool,
}

impl AbiEntry {
    pub fn is_event(&self) -> bool {
        self.kind == "event"
    }
}

/// Parsed interface description of one contract.
#[derive(Debug, Clone)]
pub struct InterfaceDescription {
    pub contract: String,
    pub entries: Vec<AbiEntry>,
}

impl InterfaceDescription {
    pub fn parse(contract: &str, json: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| IndexerError::abi(contract, format!("not valid JSON: {e}")))?;

        let entries_value = match value {
            serde_json::Value::Array(_) => value,
            serde_json::Value::Object(mut map) => map.remove("abi").ok_or_else(|| {
                IndexerError::abi(contract, "expected an array or an object with an \"abi\" field")
            })?,
            _ => {
                return Err(IndexerError::abi(
                    contract,
                    "expected an array or an object with an \"abi\" field",
                ))
            }
        };

        let entries: Vec<AbiEntry> = serde_json::from_value(entries_value)
            .map_err(|e| IndexerError::abi(contract, format!("malformed entry: {e}")))?;

        Ok(Self {
            contract: contract.to_string(),
            entries,
        })
    }

    /// Load `<dir>/<contract>.abi.json`, or the bundled description when `dir` is `None`.
    pub fn load(dir: Option<&Path>, contract: &str) -> Result<Self> {
        match dir {
            Some(dir) => {
                let path = dir.join(format!("{contract}.abi.json"));
                let raw = fs::read_to_string(&path).map_err(|e| {
                    IndexerError::abi(contract, format!("cannot read {}: {e}", path.display()))
                })?;
                Self::parse(contract, &raw)
            }
            None => {
                let known = KnownContract::from_name(contract).ok_or_else(|| {
                    IndexerError::abi(
                        contract,
                        "no bundled interface description; configure an ABI directory",
                    )
                })?;
                Self::parse(contract, known.bundled_abi())
            }
        }
    }

    pub fn events(&self) -> impl Iterator<Item = &AbiEntry> {
        self.entries.iter().filter(|e| e.is_event())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_bundled_descriptions_parse() {
        for contract in KnownContract::ALL {
            let desc = InterfaceDescription::load(None, contract.name()).unwrap();
            assert!(desc.events().count() >= 2, "{} has too few events", contract.name());
        }
    }

    #[test]
    fn test_accepts_export_wrapper() {
        let desc = InterfaceDescription::load(None, "PayoutRouter").unwrap();
        let names: Vec<_> = desc.events().filter_map(|e| e.name.clone()).collect();
        assert_eq!(names, vec!["SplitDefined", "PayoutExecuted"]);
    }

    #[test]
    fn test_loads_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = fs::File::create(dir.path().join("Custom.abi.json")).unwrap();
        write!(
            f,
            r#"[{{"type":"event","name":"Ping","inputs":[{{"name":"n","type":"uint8","indexed":false}}]}}]"#
        )
        .unwrap();

        let desc = InterfaceDescription::load(Some(dir.path()), "Custom").unwrap();
        assert_eq!(desc.events().count(), 1);
        assert!(InterfaceDescription::load(Some(dir.path()), "Missing").is_err());
    }

    #[test]
    fn test_unknown_contract_without_directory_is_config_error() {
        let err = InterfaceDescription::load(None, "Unknown").unwrap_err();
        assert!(err.is_startup_error());
    }

    #[test]
    fn test_entry_without_type_defaults_to_function() {
        let desc = InterfaceDescription::parse("X", r#"[{"name":"f","inputs":[]}]"#).unwrap();
        assert_eq!(desc.entries[0].kind, "function");
        assert_eq!(desc.events().count(), 0);
    }

    #[test]
    fn test_lookup_by_name() {
        assert_eq!(KnownContract::from_name("ReceiptNFT"), Some(KnownContract::ReceiptNft));
        assert_eq!(KnownContract::from_name("receiptnft"), None);
        assert_eq!(KnownContract::DeferredVault.address_env(), "VAULT_ADDRESS");
    }
}
