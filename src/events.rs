//! # Events
//!
//! Closed set of event kinds the projector understands, each with its typed payload.
//!
//! Decoded ABI parameters are mapped onto these payloads by name. A recognised event
//! whose parameters do not fit its payload is a decode mismatch; events without a
//! projection rule become [`EventKind::Unprojected`].

use crate::error::{IndexerError, Result};
use ethers::abi::{LogParam, Token};
use ethers::types::{Address, H256, U256};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DealCreated {
    pub deal_id: U256,
    pub sponsor: Address,
    pub athlete: Address,
    pub token: Address,
    pub amount: U256,
    pub deadline: U256,
    pub terms_hash: H256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DealDelivered {
    pub deal_id: U256,
    pub evidence_hash: H256,
    pub delivered_at: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DealSettled {
    pub deal_id: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DealRefunded {
    pub deal_id: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantCreated {
    pub grant_id: U256,
    pub sponsor: Address,
    pub beneficiary: Address,
    pub token: Address,
    pub amount: U256,
    pub unlock_time: U256,
    pub terms_hash: H256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantAttested {
    pub grant_id: U256,
    pub attestation_hash: H256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantWithdrawn {
    pub grant_id: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantRefunded {
    pub grant_id: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutExecuted {
    pub payout_id: U256,
    pub reference: H256,
    pub payer: Address,
    pub token: Address,
    pub amount: U256,
    pub split_id: U256,
    pub executed_at: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptMinted {
    pub token_id: U256,
    pub order_hash: H256,
    pub buyer: Address,
    pub seller: Address,
    pub token: Address,
    pub price: U256,
    pub platform_fee: U256,
    pub token_uri: String,
}

/// Every event the pipeline stores, tagged by kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    DealCreated(DealCreated),
    DealDelivered(DealDelivered),
    DealSettled(DealSettled),
    DealRefunded(DealRefunded),
    GrantCreated(GrantCreated),
    GrantAttested(GrantAttested),
    GrantWithdrawn(GrantWithdrawn),
    GrantRefunded(GrantRefunded),
    PayoutExecuted(PayoutExecuted),
    ReceiptMinted(ReceiptMinted),
    /// Stored for audit but has no projection rule (e.g. `Transfer`, `SplitDefined`).
    Unprojected { name: String },
}

impl EventKind {
    /// Map decoded parameters of event `name` onto its typed payload.
    pub fn from_params(name: &str, params: &[LogParam]) -> Result<Self> {
        let args = Args { event: name, params };
        let kind = match name {
            "DealCreated" => EventKind::DealCreated(DealCreated {
                deal_id: args.uint("dealId")?,
                sponsor: args.address("sponsor")?,
                athlete: args.address("athlete")?,
                token: args.address("token")?,
                amount: args.uint("amount")?,
                deadline: args.uint("deadline")?,
                terms_hash: args.bytes32("termsHash")?,
            }),
            "DealDelivered" => EventKind::DealDelivered(DealDelivered {
                deal_id: args.uint("dealId")?,
                evidence_hash: args.bytes32("evidenceHash")?,
                delivered_at: args.uint("deliveredAt")?,
            }),
            "DealSettled" => EventKind::DealSettled(DealSettled {
                deal_id: args.uint("dealId")?,
            }),
            "DealRefunded" => EventKind::DealRefunded(DealRefunded {
                deal_id: args.uint("dealId")?,
            }),
            "GrantCreated" => EventKind::GrantCreated(GrantCreated {
                grant_id: args.uint("grantId")?,
                sponsor: args.address("sponsor")?,
                beneficiary: args.address("beneficiary")?,
                token: args.address("token")?,
                amount: args.uint("amount")?,
                unlock_time: args.uint("unlockTime")?,
                terms_hash: args.bytes32("termsHash")?,
            }),
            "GrantAttested" => EventKind::GrantAttested(GrantAttested {
                grant_id: args.uint("grantId")?,
                attestation_hash: args.bytes32("attestationHash")?,
            }),
            "GrantWithdrawn" => EventKind::GrantWithdrawn(GrantWithdrawn {
                grant_id: args.uint("grantId")?,
            }),
            "GrantRefunded" => EventKind::GrantRefunded(GrantRefunded {
                grant_id: args.uint("grantId")?,
            }),
            "PayoutExecuted" => EventKind::PayoutExecuted(PayoutExecuted {
                payout_id: args.uint("payoutId")?,
                reference: args.bytes32("ref")?,
                payer: args.address("payer")?,
                token: args.address("token")?,
                amount: args.uint("amount")?,
                split_id: args.uint("splitId")?,
                executed_at: args.uint("at")?,
            }),
            "ReceiptMinted" => EventKind::ReceiptMinted(ReceiptMinted {
                token_id: args.uint("tokenId")?,
                order_hash: args.bytes32("orderHash")?,
                buyer: args.address("buyer")?,
                seller: args.address("seller")?,
                token: args.address("token")?,
                price: args.uint("price")?,
                platform_fee: args.uint("platformFee")?,
                token_uri: args.string("tokenURI")?,
            }),
            other => EventKind::Unprojected {
                name: other.to_string(),
            },
        };
        Ok(kind)
    }

    pub fn name(&self) -> &str {
        match self {
            EventKind::DealCreated(_) => "DealCreated",
            EventKind::DealDelivered(_) => "DealDelivered",
            EventKind::DealSettled(_) => "DealSettled",
            EventKind::DealRefunded(_) => "DealRefunded",
            EventKind::GrantCreated(_) => "GrantCreated",
            EventKind::GrantAttested(_) => "GrantAttested",
            EventKind::GrantWithdrawn(_) => "GrantWithdrawn",
            EventKind::GrantRefunded(_) => "GrantRefunded",
            EventKind::PayoutExecuted(_) => "PayoutExecuted",
            EventKind::ReceiptMinted(_) => "ReceiptMinted",
            EventKind::Unprojected { name } => name,
        }
    }
}

struct Args<'a> {
    event: &'a str,
    params: &'a [LogParam],
}

impl<'a> Args<'a> {
    fn token(&self, name: &str) -> Result<&'a Token> {
        self.params
            .iter()
            .find(|p| p.name == name)
            .map(|p| &p.value)
            .ok_or_else(|| IndexerError::decode(self.event, format!("argument '{name}' is missing")))
    }

    fn mismatch(&self, name: &str, expected: &str, got: &Token) -> IndexerError {
        IndexerError::decode(
            self.event,
            format!("argument '{name}' should be {expected}, got {got:?}"),
        )
    }

    fn uint(&self, name: &str) -> Result<U256> {
        match self.token(name)? {
            Token::Uint(v) => Ok(*v),
            other => Err(self.mismatch(name, "an unsigned integer", other)),
        }
    }

    fn address(&self, name: &str) -> Result<Address> {
        match self.token(name)? {
            Token::Address(a) => Ok(*a),
            other => Err(self.mismatch(name, "an address", other)),
        }
    }

    fn bytes32(&self, name: &str) -> Result<H256> {
        match self.token(name)? {
            Token::FixedBytes(b) if b.len() == 32 => Ok(H256::from_slice(b)),
            other => Err(self.mismatch(name, "bytes32", other)),
        }
    }

    fn string(&self, name: &str) -> Result<String> {
        match self.token(name)? {
            Token::String(s) => Ok(s.clone()),
            other => Err(self.mismatch(name, "a string", other)),
        }
    }
}
