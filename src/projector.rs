//! # State Projector
//!
//! Folds newly appended events into the `*_current` tables.
//!
//! Each [`EventKind`] maps to at most one [`ProjectionWrite`] through a total `match`;
//! kinds without a rule produce no write. Backends execute the write with the per-table
//! conflict policy:
//!
//! | Write | Policy |
//! |---|---|
//! | `OpenDeal` | insert, on conflict overwrite mutable fields while still FUNDED, otherwise stale |
//! | `OpenGrant` | insert, on conflict keep the first row |
//! | `RecordPayout`, `RecordReceipt` | write-once, on conflict do nothing |
//! | `DeliverDeal`, `CloseDeal` | update, only along FUNDED → DELIVERED → {SETTLED, REFUNDED} |
//! | `AttestGrant` | update, only while neither withdrawn nor refunded |
//! | `CloseGrant` | update, only while neither withdrawn nor refunded; zeroes amount |
//!
//! An update that finds no row is a projection gap: it is logged, recorded through the
//! store and reported, but never fails the pass.

use crate::error::Result;
use crate::events::EventKind;
use crate::store::{ApplyOutcome, ChainEvent, PassTransaction, ProjectionGap};
use crate::types::conversions::{address_to_string, bytes_to_hex};
use ethers::types::U256;
use log::{debug, warn};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DealStatus {
    Funded,
    Delivered,
    Settled,
    Refunded,
}

impl DealStatus {
    pub const ALL: [DealStatus; 4] = [
        DealStatus::Funded,
        DealStatus::Delivered,
        DealStatus::Settled,
        DealStatus::Refunded,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DealStatus::Funded => "FUNDED",
            DealStatus::Delivered => "DELIVERED",
            DealStatus::Settled => "SETTLED",
            DealStatus::Refunded => "REFUNDED",
        }
    }

    fn rank(self) -> u8 {
        match self {
            DealStatus::Funded => 0,
            DealStatus::Delivered => 1,
            DealStatus::Settled | DealStatus::Refunded => 2,
        }
    }

    /// Status only moves forward; the two terminal states are mutually exclusive.
    pub fn can_advance_to(self, next: DealStatus) -> bool {
        next.rank() > self.rank()
    }

    /// Statuses from which `next` may be entered.
    pub fn predecessors(next: DealStatus) -> Vec<DealStatus> {
        Self::ALL
            .into_iter()
            .filter(|s| s.can_advance_to(next))
            .collect()
    }
}

impl fmt::Display for DealStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DealStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown deal status '{s}'"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantClosure {
    Withdrawn,
    Refunded,
}

impl GrantClosure {
    pub fn column(self) -> &'static str {
        match self {
            GrantClosure::Withdrawn => "withdrawn",
            GrantClosure::Refunded => "refunded",
        }
    }
}

/// A single write against the projection tables. Hashes and addresses are already
/// rendered; integers stay unbounded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectionWrite {
    OpenDeal {
        deal_id: U256,
        sponsor: String,
        athlete: String,
        token: String,
        amount: U256,
        deadline: U256,
        terms_hash: String,
    },
    DeliverDeal {
        deal_id: U256,
        evidence_hash: String,
        delivered_at: U256,
    },
    CloseDeal {
        deal_id: U256,
        status: DealStatus,
    },
    OpenGrant {
        grant_id: U256,
        sponsor: String,
        beneficiary: String,
        token: String,
        amount: U256,
        unlock_time: U256,
        terms_hash: String,
    },
    AttestGrant {
        grant_id: U256,
        attestation_hash: String,
    },
    CloseGrant {
        grant_id: U256,
        closure: GrantClosure,
    },
    RecordPayout {
        payout_id: U256,
        reference: String,
        payer: String,
        token: String,
        amount: U256,
        split_id: U256,
        executed_at: U256,
    },
    RecordReceipt {
        token_id: U256,
        order_hash: String,
        buyer: String,
        seller: String,
        token: String,
        price: U256,
        platform_fee: U256,
        token_uri: String,
    },
}

impl ProjectionWrite {
    /// Table-level entity and identity targeted by this write.
    pub fn target(&self) -> (&'static str, U256) {
        match self {
            ProjectionWrite::OpenDeal { deal_id, .. }
            | ProjectionWrite::DeliverDeal { deal_id, .. }
            | ProjectionWrite::CloseDeal { deal_id, .. } => ("deal", *deal_id),
            ProjectionWrite::OpenGrant { grant_id, .. }
            | ProjectionWrite::AttestGrant { grant_id, .. }
            | ProjectionWrite::CloseGrant { grant_id, .. } => ("grant", *grant_id),
            ProjectionWrite::RecordPayout { payout_id, .. } => ("payout", *payout_id),
            ProjectionWrite::RecordReceipt { token_id, .. } => ("receipt", *token_id),
        }
    }
}

/// The rule table. Exhaustive over [`EventKind`], so a new kind cannot be forgotten here.
pub fn projection_for(kind: &EventKind) -> Option<ProjectionWrite> {
    let write = match kind {
        EventKind::DealCreated(e) => ProjectionWrite::OpenDeal {
            deal_id: e.deal_id,
            sponsor: address_to_string(e.sponsor),
            athlete: address_to_string(e.athlete),
            token: address_to_string(e.token),
            amount: e.amount,
            deadline: e.deadline,
            terms_hash: bytes_to_hex(e.terms_hash.as_bytes()),
        },
        EventKind::DealDelivered(e) => ProjectionWrite::DeliverDeal {
            deal_id: e.deal_id,
            evidence_hash: bytes_to_hex(e.evidence_hash.as_bytes()),
            delivered_at: e.delivered_at,
        },
        EventKind::DealSettled(e) => ProjectionWrite::CloseDeal {
            deal_id: e.deal_id,
            status: DealStatus::Settled,
        },
        EventKind::DealRefunded(e) => ProjectionWrite::CloseDeal {
            deal_id: e.deal_id,
            status: DealStatus::Refunded,
        },
        EventKind::GrantCreated(e) => ProjectionWrite::OpenGrant {
            grant_id: e.grant_id,
            sponsor: address_to_string(e.sponsor),
            beneficiary: address_to_string(e.beneficiary),
            token: address_to_string(e.token),
            amount: e.amount,
            unlock_time: e.unlock_time,
            terms_hash: bytes_to_hex(e.terms_hash.as_bytes()),
        },
        EventKind::GrantAttested(e) => ProjectionWrite::AttestGrant {
            grant_id: e.grant_id,
            attestation_hash: bytes_to_hex(e.attestation_hash.as_bytes()),
        },
        EventKind::GrantWithdrawn(e) => ProjectionWrite::CloseGrant {
            grant_id: e.grant_id,
            closure: GrantClosure::Withdrawn,
        },
        EventKind::GrantRefunded(e) => ProjectionWrite::CloseGrant {
            grant_id: e.grant_id,
            closure: GrantClosure::Refunded,
        },
        EventKind::PayoutExecuted(e) => ProjectionWrite::RecordPayout {
            payout_id: e.payout_id,
            reference: bytes_to_hex(e.reference.as_bytes()),
            payer: address_to_string(e.payer),
            token: address_to_string(e.token),
            amount: e.amount,
            split_id: e.split_id,
            executed_at: e.executed_at,
        },
        EventKind::ReceiptMinted(e) => ProjectionWrite::RecordReceipt {
            token_id: e.token_id,
            order_hash: bytes_to_hex(e.order_hash.as_bytes()),
            buyer: address_to_string(e.buyer),
            seller: address_to_string(e.seller),
            token: address_to_string(e.token),
            price: e.price,
            platform_fee: e.platform_fee,
            token_uri: e.token_uri.clone(),
        },
        EventKind::Unprojected { .. } => return None,
    };
    Some(write)
}

/// Applies projection rules for one chain inside a pass transaction.
#[derive(Debug, Clone, Copy)]
pub struct Projector {
    chain_id: u64,
}

impl Projector {
    pub fn new(chain_id: u64) -> Self {
        Self { chain_id }
    }

    /// Project one newly appended event. Returns `None` when the kind has no rule.
    pub async fn project(
        &self,
        tx: &mut dyn PassTransaction,
        event: &ChainEvent,
        kind: &EventKind,
    ) -> Result<Option<ApplyOutcome>> {
        let Some(write) = projection_for(kind) else {
            debug!("No projection rule for {}", kind.name());
            return Ok(None);
        };

        let outcome = tx.apply(self.chain_id, &write).await?;
        let (entity, entity_id) = write.target();

        match outcome {
            ApplyOutcome::Missing => {
                warn!(
                    "Projection gap: {} for {} {} has no row (chain {}, tx {}, log {})",
                    kind.name(),
                    entity,
                    entity_id,
                    self.chain_id,
                    event.tx_hash,
                    event.log_index
                );
                tx.record_gap(&ProjectionGap {
                    chain_id: self.chain_id,
                    tx_hash: event.tx_hash.clone(),
                    log_index: event.log_index,
                    event_name: kind.name().to_string(),
                    entity,
                    entity_id,
                })
                .await?;
            }
            ApplyOutcome::Stale => {
                warn!(
                    "Ignoring out-of-order {} for {} {} (chain {}, tx {}, log {})",
                    kind.name(),
                    entity,
                    entity_id,
                    self.chain_id,
                    event.tx_hash,
                    event.log_index
                );
            }
            ApplyOutcome::Applied | ApplyOutcome::Unchanged => {}
        }

        Ok(Some(outcome))
    }
}
