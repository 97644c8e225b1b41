//! # Ledger Store
//!
//! Storage seam for the event log and its projections.
//!
//! A pass opens one [`PassTransaction`] and performs every append and projection write
//! through it; nothing becomes visible until [`PassTransaction::commit`]. Dropping or
//! rolling back the transaction leaves the store exactly as it was before the pass.
//!
//! Two backends ship with the crate: [`postgres::PgLedgerStore`] for production and
//! [`memory::MemoryStore`] for tests and dry runs.

pub mod memory;
pub mod postgres;

use crate::decoder::DecodedEvent;
use crate::error::{IndexerError, Result};
use crate::projector::ProjectionWrite;
use crate::types::conversions::{
    address_to_string, h256_to_string, string_to_address, string_to_h256,
};
use crate::types::RawLog;
use async_trait::async_trait;
use ethers::types::{H256, U256};
use serde_json::Value;

/// Identity of an ingested log. Unique across the whole event log.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventIdentity {
    pub chain_id: u64,
    pub tx_hash: String,
    pub log_index: u64,
}

/// One immutable row of `chain_events`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainEvent {
    pub chain_id: u64,
    pub block_number: u64,
    pub block_hash: String,
    pub tx_hash: String,
    pub tx_index: u64,
    pub log_index: u64,
    pub contract_address: String,
    pub event_signature: String,
    pub event_name: String,
    pub topics: Vec<String>,
    pub data: Vec<u8>,
    /// Normalised argument object, see [`crate::decoder::token_to_value`].
    pub decoded: Value,
}

impl ChainEvent {
    pub fn new(chain_id: u64, raw: &RawLog, event: &DecodedEvent) -> Self {
        let decoded = Value::Object(
            event
                .args
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        );
        Self {
            chain_id,
            block_number: raw.block_number,
            block_hash: h256_to_string(raw.block_hash),
            tx_hash: h256_to_string(raw.transaction_hash),
            tx_index: raw.transaction_index,
            log_index: raw.log_index,
            contract_address: address_to_string(raw.address),
            event_signature: h256_to_string(event.signature),
            event_name: event.name.clone(),
            topics: raw.topics.iter().copied().map(h256_to_string).collect(),
            data: raw.data.to_vec(),
            decoded,
        }
    }

    pub fn identity(&self) -> EventIdentity {
        EventIdentity {
            chain_id: self.chain_id,
            tx_hash: self.tx_hash.clone(),
            log_index: self.log_index,
        }
    }

    /// Ordering key within a chain.
    pub fn position(&self) -> (u64, u64, u64) {
        (self.block_number, self.tx_index, self.log_index)
    }

    /// Reconstruct the log as the node returned it, for re-decoding stored rows.
    pub fn to_raw_log(&self) -> Result<RawLog> {
        let corrupt = |what: &str, e: &dyn std::fmt::Display| {
            IndexerError::decode(&self.event_name, format!("stored {what} is corrupt: {e}"))
        };
        let topics = self
            .topics
            .iter()
            .map(|t| string_to_h256(t).map_err(|e| corrupt("topic", &e)))
            .collect::<Result<Vec<H256>>>()?;
        Ok(RawLog {
            block_number: self.block_number,
            block_hash: string_to_h256(&self.block_hash).map_err(|e| corrupt("block hash", &e))?,
            transaction_hash: string_to_h256(&self.tx_hash)
                .map_err(|e| corrupt("transaction hash", &e))?,
            transaction_index: self.tx_index,
            log_index: self.log_index,
            address: string_to_address(&self.contract_address)
                .map_err(|e| corrupt("contract address", &e))?,
            topics,
            data: self.data.clone().into(),
        })
    }
}

/// Result of executing a [`ProjectionWrite`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// A row was inserted or updated.
    Applied,
    /// The row already held this information (write-once or first-insert-wins).
    Unchanged,
    /// The update targets an entity with no row yet.
    Missing,
    /// The row exists but a guard rejected the transition.
    Stale,
}

/// A lifecycle event that arrived before its entity was projected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectionGap {
    pub chain_id: u64,
    pub tx_hash: String,
    pub log_index: u64,
    pub event_name: String,
    pub entity: &'static str,
    pub entity_id: U256,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Open the transaction a whole pass runs in.
    async fn begin(&self) -> Result<Box<dyn PassTransaction>>;
}

#[async_trait]
pub trait PassTransaction: Send {
    /// Append to the event log. Returns `true` only when the identity was not present.
    async fn append_event(&mut self, event: &ChainEvent) -> Result<bool>;

    async fn apply(&mut self, chain_id: u64, write: &ProjectionWrite) -> Result<ApplyOutcome>;

    async fn record_gap(&mut self, gap: &ProjectionGap) -> Result<()>;

    /// Every stored event of the chain, ordered by block, transaction index and log index.
    async fn load_events(&mut self, chain_id: u64) -> Result<Vec<ChainEvent>>;

    /// Clear projection tables and recorded gaps for the chain. The event log is untouched.
    async fn reset_projections(&mut self, chain_id: u64) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
