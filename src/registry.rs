//! # Signature Registry
//!
//! Maps the first topic of a log to the event schema that produced it, scoped per contract.
//!
//! The identifier is `keccak256("Name(type1,type2,...)")` over the canonical parameter
//! types in declaration order, so overloads with the same name get distinct identifiers.
//! The registry is built once at startup and passed by reference; a malformed interface
//! description fails construction instead of surfacing mid-ingestion.

use crate::contracts::{AbiEntry, InterfaceDescription};
use crate::error::{IndexerError, Result};
use ethers::abi::param_type::{Reader, Writer};
use ethers::abi::{encode, Event, EventParam, ParamType, Token};
use ethers::types::H256;
use ethers::utils::keccak256;
use log::{debug, info};
use std::collections::HashMap;
use std::path::Path;

/// A resolved event schema.
#[derive(Debug, Clone)]
pub struct EventSchema {
    pub contract: String,
    /// Canonical text form, e.g. `DealSettled(uint256,uint256,uint256)`.
    pub signature: String,
    pub topic: H256,
    pub event: Event,
}

impl EventSchema {
    pub fn name(&self) -> &str {
        &self.event.name
    }

    /// Encode argument values (in declaration order) into `(topics, data)` as the
    /// contract would emit them. Indexed parameters must be static types.
    pub fn encode_log(&self, values: &[Token]) -> Result<(Vec<H256>, Vec<u8>)> {
        if values.len() != self.event.inputs.len() {
            return Err(IndexerError::decode(
                self.name(),
                format!(
                    "expected {} values, got {}",
                    self.event.inputs.len(),
                    values.len()
                ),
            ));
        }

        let mut topics = vec![self.topic];
        let mut data_tokens = Vec::new();
        for (param, value) in self.event.inputs.iter().zip(values) {
            if !value.type_check(&param.kind) {
                return Err(IndexerError::decode(
                    self.name(),
                    format!(
                        "value for '{}' does not match {}",
                        param.name,
                        Writer::write(&param.kind)
                    ),
                ));
            }
            if param.indexed {
                if param.kind.is_dynamic() {
                    return Err(IndexerError::decode(
                        self.name(),
                        format!("indexed dynamic parameter '{}' is not encodable", param.name),
                    ));
                }
                topics.push(H256::from_slice(&encode(&[value.clone()])));
            } else {
                data_tokens.push(value.clone());
            }
        }
        Ok((topics, encode(&data_tokens)))
    }
}

#[derive(Debug, Default, Clone)]
struct ContractEvents {
    by_topic: HashMap<H256, EventSchema>,
}

#[derive(Debug, Default, Clone)]
pub struct SignatureRegistry {
    contracts: HashMap<String, ContractEvents>,
}

pub fn canonical_signature(name: &str, params: &[ParamType]) -> String {
    let types: Vec<String> = params.iter().map(Writer::write).collect();
    format!("{}({})", name, types.join(","))
}

pub fn signature_topic(signature: &str) -> H256 {
    H256::from(keccak256(signature.as_bytes()))
}

impl SignatureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry for the named contracts, loading each description from `abi_dir`
    /// (or the bundled copies when `abi_dir` is `None`).
    pub fn load<'a>(
        abi_dir: Option<&Path>,
        contracts: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self> {
        let mut registry = Self::new();
        for contract in contracts {
            let desc = InterfaceDescription::load(abi_dir, contract)?;
            registry.register(&desc)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, desc: &InterfaceDescription) -> Result<()> {
        let mut events = ContractEvents::default();

        for entry in desc.events() {
            let schema = build_schema(&desc.contract, entry)?;
            if entry.anonymous {
                // Anonymous events carry no signature topic and cannot be resolved
                debug!(
                    "Skipping anonymous event {} of {}",
                    schema.signature, desc.contract
                );
                continue;
            }
            events.by_topic.entry(schema.topic).or_insert(schema);
        }

        info!(
            "Registered {} event signatures for {}",
            events.by_topic.len(),
            desc.contract
        );
        self.contracts.insert(desc.contract.clone(), events);
        Ok(())
    }

    pub fn lookup(&self, contract: &str, topic0: &H256) -> Option<&EventSchema> {
        self.contracts.get(contract)?.by_topic.get(topic0)
    }

    pub fn contains_contract(&self, contract: &str) -> bool {
        self.contracts.contains_key(contract)
    }

    pub fn events_for<'a>(&'a self, contract: &str) -> impl Iterator<Item = &'a EventSchema> + 'a {
        self.contracts
            .get(contract)
            .into_iter()
            .flat_map(|c| c.by_topic.values())
    }
}

fn build_schema(contract: &str, entry: &AbiEntry) -> Result<EventSchema> {
    let name = entry
        .name
        .clone()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| IndexerError::abi(contract, "event entry without a name"))?;

    let mut inputs = Vec::with_capacity(entry.inputs.len());
    for (position, param) in entry.inputs.iter().enumerate() {
        let ty = param.kind.as_deref().ok_or_else(|| {
            IndexerError::abi(
                contract,
                format!("event {name}: parameter #{position} ('{}') has no type", param.name),
            )
        })?;
        let kind = Reader::read(ty).map_err(|e| {
            IndexerError::abi(
                contract,
                format!("event {name}: parameter '{}' has unsupported type '{ty}': {e}", param.name),
            )
        })?;
        inputs.push(EventParam {
            name: param.name.clone(),
            kind,
            indexed: param.indexed,
        });
    }

    let types: Vec<ParamType> = inputs.iter().map(|p| p.kind.clone()).collect();
    let signature = canonical_signature(&name, &types);
    let topic = signature_topic(&signature);

    Ok(EventSchema {
        contract: contract.to_string(),
        signature,
        topic,
        event: Event {
            name,
            inputs,
            anonymous: entry.anonymous,
        },
    })
}
