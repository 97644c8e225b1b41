// src/error.rs
// Error taxonomy for the ingestion pipeline

/// Errors surfaced by the indexer library.
///
/// Duplicate ingestion and projection gaps are not errors; they are reported
/// through `store::ApplyOutcome` and the pass report instead.
#[derive(Debug, thiserror::Error)]
pub enum IndexerError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid interface description for {contract}: {reason}")]
    Abi { contract: String, reason: String },

    #[error("failed to decode {event}: {reason}")]
    Decode { event: String, reason: String },

    #[error("log returned by the node is missing {field}")]
    IncompleteLog { field: &'static str },

    #[error("node request failed: {0}")]
    Rpc(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("{source} (chain {chain_id}, tx {tx_hash}, log {log_index})")]
    AtLog {
        chain_id: u64,
        tx_hash: String,
        log_index: u64,
        #[source]
        source: Box<IndexerError>,
    },
}

impl IndexerError {
    pub fn config(msg: impl Into<String>) -> Self {
        IndexerError::Config(msg.into())
    }

    pub fn abi(contract: &str, reason: impl Into<String>) -> Self {
        IndexerError::Abi {
            contract: contract.to_string(),
            reason: reason.into(),
        }
    }

    pub fn decode(event: &str, reason: impl Into<String>) -> Self {
        IndexerError::Decode {
            event: event.to_string(),
            reason: reason.into(),
        }
    }

    /// Attach the chain position of the log that was being processed.
    pub fn at_log(self, chain_id: u64, tx_hash: impl Into<String>, log_index: u64) -> Self {
        match self {
            already @ IndexerError::AtLog { .. } => already,
            other => IndexerError::AtLog {
                chain_id,
                tx_hash: tx_hash.into(),
                log_index,
                source: Box::new(other),
            },
        }
    }

    /// True for the configuration class of errors that must stop the process before a pass starts.
    pub fn is_startup_error(&self) -> bool {
        matches!(self, IndexerError::Config(_) | IndexerError::Abi { .. })
    }
}

pub type Result<T, E = IndexerError> = std::result::Result<T, E>;
