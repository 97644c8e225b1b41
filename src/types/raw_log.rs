use crate::error::IndexerError;
use ethers::types::{Address, Bytes, Log, H256};

/// A log entry as retrieved from the node, with every positional field resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    pub block_number: u64,
    pub block_hash: H256,
    pub transaction_hash: H256,
    pub transaction_index: u64,
    pub log_index: u64,
    pub address: Address,
    pub topics: Vec<H256>,
    pub data: Bytes,
}

impl RawLog {
    /// Ordering key: within a transaction the node's log index order is kept.
    pub fn position(&self) -> (u64, u64, u64) {
        (self.block_number, self.transaction_index, self.log_index)
    }

    pub fn topic0(&self) -> Option<&H256> {
        self.topics.first()
    }
}

impl TryFrom<Log> for RawLog {
    type Error = IndexerError;

    fn try_from(log: Log) -> Result<Self, Self::Error> {
        // Pending logs come back without position fields; those are not ingestible.
        let block_number = log
            .block_number
            .ok_or(IndexerError::IncompleteLog { field: "blockNumber" })?
            .as_u64();
        let block_hash = log
            .block_hash
            .ok_or(IndexerError::IncompleteLog { field: "blockHash" })?;
        let transaction_hash = log
            .transaction_hash
            .ok_or(IndexerError::IncompleteLog { field: "transactionHash" })?;
        let transaction_index = log.transaction_index.map(|i| i.as_u64()).unwrap_or(0);
        let log_index = log
            .log_index
            .ok_or(IndexerError::IncompleteLog { field: "logIndex" })?
            .as_u64();

        Ok(RawLog {
            block_number,
            block_hash,
            transaction_hash,
            transaction_index,
            log_index,
            address: log.address,
            topics: log.topics,
            data: log.data,
        })
    }
}
