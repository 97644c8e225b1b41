//! In-memory ledger backend.
//!
//! A transaction holds the store lock from `begin` until commit or rollback and works on a
//! private copy of the state, so passes are serialised and an abandoned pass leaves no trace.

use super::{
    ApplyOutcome, ChainEvent, EventIdentity, LedgerStore, PassTransaction, ProjectionGap,
};
use crate::error::Result;
use crate::projector::{DealStatus, GrantClosure, ProjectionWrite};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ethers::types::U256;
use log::debug;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DealRow {
    pub sponsor: String,
    pub athlete: String,
    pub token: String,
    pub amount: U256,
    pub deadline: U256,
    pub terms_hash: String,
    pub evidence_hash: Option<String>,
    pub delivered_at: Option<U256>,
    pub status: DealStatus,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantRow {
    pub sponsor: String,
    pub beneficiary: String,
    pub token: String,
    pub amount: U256,
    pub unlock_time: U256,
    pub terms_hash: String,
    pub attested: bool,
    pub attestation_hash: Option<String>,
    pub withdrawn: bool,
    pub refunded: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutRow {
    pub reference: String,
    pub payer: String,
    pub token: String,
    pub amount: U256,
    pub split_id: U256,
    pub executed_at: U256,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptRow {
    pub order_hash: String,
    pub buyer: String,
    pub seller: String,
    pub token: String,
    pub price: U256,
    pub platform_fee: U256,
    pub token_uri: String,
    pub updated_at: DateTime<Utc>,
}

/// Full contents of the store. Tables are keyed by `(chain_id, entity_id)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerState {
    pub events: Vec<ChainEvent>,
    identities: HashSet<EventIdentity>,
    pub deals: BTreeMap<(u64, U256), DealRow>,
    pub grants: BTreeMap<(u64, U256), GrantRow>,
    pub payouts: BTreeMap<(u64, U256), PayoutRow>,
    pub receipts: BTreeMap<(u64, U256), ReceiptRow>,
    pub gaps: Vec<ProjectionGap>,
}

impl LedgerState {
    /// Copy with every `updated_at` zeroed, for comparing states built at different times.
    pub fn without_timestamps(&self) -> Self {
        let epoch = DateTime::<Utc>::default();
        let mut state = self.clone();
        state.deals.values_mut().for_each(|r| r.updated_at = epoch);
        state.grants.values_mut().for_each(|r| r.updated_at = epoch);
        state.payouts.values_mut().for_each(|r| r.updated_at = epoch);
        state.receipts.values_mut().for_each(|r| r.updated_at = epoch);
        state
    }

    /// Projection tables only, without timestamps.
    pub fn projections(&self) -> Self {
        let mut state = self.without_timestamps();
        state.events.clear();
        state.identities.clear();
        state.gaps.clear();
        state
    }

    fn apply(&mut self, chain_id: u64, write: &ProjectionWrite) -> ApplyOutcome {
        let now = Utc::now();
        match write {
            ProjectionWrite::OpenDeal {
                deal_id,
                sponsor,
                athlete,
                token,
                amount,
                deadline,
                terms_hash,
            } => {
                let fresh = DealRow {
                    sponsor: sponsor.clone(),
                    athlete: athlete.clone(),
                    token: token.clone(),
                    amount: *amount,
                    deadline: *deadline,
                    terms_hash: terms_hash.clone(),
                    evidence_hash: None,
                    delivered_at: None,
                    status: DealStatus::Funded,
                    updated_at: now,
                };
                match self.deals.get_mut(&(chain_id, *deal_id)) {
                    None => {
                        self.deals.insert((chain_id, *deal_id), fresh);
                        ApplyOutcome::Applied
                    }
                    Some(row) if row.status == DealStatus::Funded => {
                        row.sponsor = fresh.sponsor;
                        row.athlete = fresh.athlete;
                        row.token = fresh.token;
                        row.amount = fresh.amount;
                        row.deadline = fresh.deadline;
                        row.terms_hash = fresh.terms_hash;
                        row.updated_at = now;
                        ApplyOutcome::Applied
                    }
                    Some(_) => ApplyOutcome::Stale,
                }
            }
            ProjectionWrite::DeliverDeal {
                deal_id,
                evidence_hash,
                delivered_at,
            } => match self.deals.get_mut(&(chain_id, *deal_id)) {
                None => ApplyOutcome::Missing,
                Some(row) if !row.status.can_advance_to(DealStatus::Delivered) => {
                    ApplyOutcome::Stale
                }
                Some(row) => {
                    row.evidence_hash = Some(evidence_hash.clone());
                    row.delivered_at = Some(*delivered_at);
                    row.status = DealStatus::Delivered;
                    row.updated_at = now;
                    ApplyOutcome::Applied
                }
            },
            ProjectionWrite::CloseDeal { deal_id, status } => {
                match self.deals.get_mut(&(chain_id, *deal_id)) {
                    None => ApplyOutcome::Missing,
                    Some(row) if !row.status.can_advance_to(*status) => ApplyOutcome::Stale,
                    Some(row) => {
                        row.amount = U256::zero();
                        row.status = *status;
                        row.updated_at = now;
                        ApplyOutcome::Applied
                    }
                }
            }
            ProjectionWrite::OpenGrant {
                grant_id,
                sponsor,
                beneficiary,
                token,
                amount,
                unlock_time,
                terms_hash,
            } => match self.grants.get_mut(&(chain_id, *grant_id)) {
                Some(row) => {
                    row.updated_at = now;
                    ApplyOutcome::Unchanged
                }
                None => {
                    self.grants.insert(
                        (chain_id, *grant_id),
                        GrantRow {
                            sponsor: sponsor.clone(),
                            beneficiary: beneficiary.clone(),
                            token: token.clone(),
                            amount: *amount,
                            unlock_time: *unlock_time,
                            terms_hash: terms_hash.clone(),
                            attested: false,
                            attestation_hash: None,
                            withdrawn: false,
                            refunded: false,
                            updated_at: now,
                        },
                    );
                    ApplyOutcome::Applied
                }
            },
            ProjectionWrite::AttestGrant {
                grant_id,
                attestation_hash,
            } => match self.grants.get_mut(&(chain_id, *grant_id)) {
                None => ApplyOutcome::Missing,
                Some(row) if row.withdrawn || row.refunded => ApplyOutcome::Stale,
                Some(row) => {
                    row.attested = true;
                    row.attestation_hash = Some(attestation_hash.clone());
                    row.updated_at = now;
                    ApplyOutcome::Applied
                }
            },
            ProjectionWrite::CloseGrant { grant_id, closure } => {
                match self.grants.get_mut(&(chain_id, *grant_id)) {
                    None => ApplyOutcome::Missing,
                    Some(row) if row.withdrawn || row.refunded => ApplyOutcome::Stale,
                    Some(row) => {
                        match closure {
                            GrantClosure::Withdrawn => row.withdrawn = true,
                            GrantClosure::Refunded => row.refunded = true,
                        }
                        row.amount = U256::zero();
                        row.updated_at = now;
                        ApplyOutcome::Applied
                    }
                }
            }
            ProjectionWrite::RecordPayout {
                payout_id,
                reference,
                payer,
                token,
                amount,
                split_id,
                executed_at,
            } => {
                if self.payouts.contains_key(&(chain_id, *payout_id)) {
                    return ApplyOutcome::Unchanged;
                }
                self.payouts.insert(
                    (chain_id, *payout_id),
                    PayoutRow {
                        reference: reference.clone(),
                        payer: payer.clone(),
                        token: token.clone(),
                        amount: *amount,
                        split_id: *split_id,
                        executed_at: *executed_at,
                        updated_at: now,
                    },
                );
                ApplyOutcome::Applied
            }
            ProjectionWrite::RecordReceipt {
                token_id,
                order_hash,
                buyer,
                seller,
                token,
                price,
                platform_fee,
                token_uri,
            } => {
                if self.receipts.contains_key(&(chain_id, *token_id)) {
                    return ApplyOutcome::Unchanged;
                }
                self.receipts.insert(
                    (chain_id, *token_id),
                    ReceiptRow {
                        order_hash: order_hash.clone(),
                        buyer: buyer.clone(),
                        seller: seller.clone(),
                        token: token.clone(),
                        price: *price,
                        platform_fee: *platform_fee,
                        token_uri: token_uri.clone(),
                        updated_at: now,
                    },
                );
                ApplyOutcome::Applied
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<LedgerState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed state. Waits for an in-flight pass to finish.
    pub async fn snapshot(&self) -> LedgerState {
        self.state.lock().await.clone()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn PassTransaction>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTransaction { guard, working }))
    }
}

pub struct MemoryTransaction {
    guard: OwnedMutexGuard<LedgerState>,
    working: LedgerState,
}

#[async_trait]
impl PassTransaction for MemoryTransaction {
    async fn append_event(&mut self, event: &ChainEvent) -> Result<bool> {
        if !self.working.identities.insert(event.identity()) {
            return Ok(false);
        }
        self.working.events.push(event.clone());
        Ok(true)
    }

    async fn apply(&mut self, chain_id: u64, write: &ProjectionWrite) -> Result<ApplyOutcome> {
        Ok(self.working.apply(chain_id, write))
    }

    async fn record_gap(&mut self, gap: &ProjectionGap) -> Result<()> {
        self.working.gaps.push(gap.clone());
        Ok(())
    }

    async fn load_events(&mut self, chain_id: u64) -> Result<Vec<ChainEvent>> {
        let mut events: Vec<ChainEvent> = self
            .working
            .events
            .iter()
            .filter(|e| e.chain_id == chain_id)
            .cloned()
            .collect();
        events.sort_by_key(ChainEvent::position);
        Ok(events)
    }

    async fn reset_projections(&mut self, chain_id: u64) -> Result<()> {
        let state = &mut self.working;
        state.deals.retain(|(chain, _), _| *chain != chain_id);
        state.grants.retain(|(chain, _), _| *chain != chain_id);
        state.payouts.retain(|(chain, _), _| *chain != chain_id);
        state.receipts.retain(|(chain, _), _| *chain != chain_id);
        state.gaps.retain(|g| g.chain_id != chain_id);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTransaction { mut guard, working } = *self;
        debug!("Committing {} events to memory store", working.events.len());
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
