//! # Event Decoder
//!
//! Turns a [`RawLog`] into a [`DecodedEvent`] using the schema resolved from its first topic.
//!
//! - No topics, or a first topic unknown for that contract: the log is skipped (`Ok(None)`).
//! - A known signature with a malformed payload: `Err`, which aborts the enclosing pass.
//!
//! Argument values are normalised before they leave this module: addresses as lowercase
//! `0x` hex, integers as decimal strings, byte sequences as lowercase hex without prefix.

use crate::error::{IndexerError, Result};
use crate::events::EventKind;
use crate::registry::SignatureRegistry;
use crate::types::conversions::{address_to_string, bytes_to_hex, u256_to_numeric};
use crate::types::RawLog;
use ethers::abi::{self, Token};
use ethers::types::{H256, I256};
use indexmap::IndexMap;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedEvent {
    pub contract: String,
    pub signature: H256,
    pub name: String,
    /// Normalised arguments in declaration order, frozen into the audit row.
    pub args: IndexMap<String, Value>,
    pub kind: EventKind,
}

pub fn decode_log(
    contract: &str,
    raw: &RawLog,
    registry: &SignatureRegistry,
) -> Result<Option<DecodedEvent>> {
    let Some(topic0) = raw.topic0() else {
        return Ok(None);
    };
    let Some(schema) = registry.lookup(contract, topic0) else {
        return Ok(None);
    };

    let parsed = schema
        .event
        .parse_log(abi::RawLog {
            topics: raw.topics.clone(),
            data: raw.data.to_vec(),
        })
        .map_err(|e| IndexerError::decode(&schema.signature, e.to_string()))?;

    let args = parsed
        .params
        .iter()
        .map(|p| (p.name.clone(), token_to_value(&p.value)))
        .collect();
    let kind = EventKind::from_params(schema.name(), &parsed.params)?;

    Ok(Some(DecodedEvent {
        contract: contract.to_string(),
        signature: schema.topic,
        name: schema.name().to_string(),
        args,
        kind,
    }))
}

pub fn token_to_value(token: &Token) -> Value {
    match token {
        Token::Address(a) => Value::String(address_to_string(*a)),
        Token::FixedBytes(b) | Token::Bytes(b) => Value::String(bytes_to_hex(b)),
        Token::Uint(v) => Value::String(u256_to_numeric(*v)),
        Token::Int(v) => Value::String(I256::from_raw(*v).to_string()),
        Token::Bool(b) => Value::Bool(*b),
        Token::String(s) => Value::String(s.clone()),
        Token::FixedArray(items) | Token::Array(items) | Token::Tuple(items) => {
            Value::Array(items.iter().map(token_to_value).collect())
        }
    }
}
