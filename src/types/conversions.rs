use ethers::types::{Address, H256, U256};
use std::str::FromStr;

// Addresses: always lowercase with 0x prefix
pub fn address_to_string(addr: Address) -> String {
    format!("{:?}", addr).to_lowercase()
}

pub fn string_to_address(s: &str) -> Result<Address, ConversionError> {
    Address::from_str(s.trim()).map_err(|e| ConversionError::InvalidAddress(format!("{s}: {e}")))
}

/// Hashes stored in raw columns (tx hash, block hash, topics) keep the `0x` prefix.
pub fn h256_to_string(hash: H256) -> String {
    format!("{:?}", hash)
}

pub fn string_to_h256(s: &str) -> Result<H256, ConversionError> {
    H256::from_str(s.trim()).map_err(|e| ConversionError::InvalidHash(format!("{s}: {e}")))
}

/// Byte-typed event arguments leave the decoder as bare lowercase hex.
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// Decimal rendering used for every on-chain integer (bound as NUMERIC).
pub fn u256_to_numeric(value: U256) -> String {
    value.to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("Invalid hash: {0}")]
    InvalidHash(String),
}
