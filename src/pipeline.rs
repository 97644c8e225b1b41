//! # Pipeline Coordinator
//!
//! Runs a pass: fetch → decode → append → project, for every monitored contract, inside one
//! store transaction. The transaction is committed only when every log of every contract went
//! through; any decode or storage error rolls the whole pass back and is returned with the
//! identity of the offending log attached.
//!
//! Each contract's logs are put into chain order before processing, whatever order the node
//! returned them in; logs sharing a transaction are applied by ascending log index.
//!
//! Only events the store reports as newly appended are projected, so re-running a range
//! (or two overlapping ranges) converges on the same state.

use crate::decoder::decode_log;
use crate::error::{IndexerError, Result};
use crate::fetcher::LogSource;
use crate::metrics;
use crate::projector::Projector;
use crate::registry::SignatureRegistry;
use crate::store::{ApplyOutcome, ChainEvent, LedgerStore, PassTransaction};
use crate::types::conversions::{address_to_string, h256_to_string};
use crate::types::{BlockTag, RawLog};
use crate::utils::sort_chain_order;
use ethers::types::Address;
use futures::future::try_join_all;
use indexmap::IndexMap;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::time::Instant;
use uuid::Uuid;

/// Counters of one committed pass (or rebuild).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub pass_id: Uuid,
    pub from_block: u64,
    pub to_block: u64,
    /// Logs returned by the node (rows loaded, for a rebuild).
    pub fetched: usize,
    /// Logs with no registered signature for their contract.
    pub skipped: usize,
    pub appended: usize,
    pub duplicates: usize,
    pub projected: usize,
    pub unchanged: usize,
    pub gaps: usize,
    pub stale: usize,
}

impl PassReport {
    fn new(pass_id: Uuid, from_block: u64, to_block: u64) -> Self {
        Self {
            pass_id,
            from_block,
            to_block,
            ..Self::default()
        }
    }

    fn tally(&mut self, outcome: Option<ApplyOutcome>) {
        match outcome {
            Some(ApplyOutcome::Applied) => self.projected += 1,
            Some(ApplyOutcome::Unchanged) => self.unchanged += 1,
            Some(ApplyOutcome::Missing) => self.gaps += 1,
            Some(ApplyOutcome::Stale) => self.stale += 1,
            None => {}
        }
    }
}

pub struct Pipeline<'a> {
    chain_id: u64,
    registry: &'a SignatureRegistry,
    source: &'a dyn LogSource,
    store: &'a dyn LedgerStore,
    projector: Projector,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        chain_id: u64,
        registry: &'a SignatureRegistry,
        source: &'a dyn LogSource,
        store: &'a dyn LedgerStore,
    ) -> Self {
        Self {
            chain_id,
            registry,
            source,
            store,
            projector: Projector::new(chain_id),
        }
    }

    fn check_contracts(&self, contracts: &IndexMap<String, Address>) -> Result<()> {
        for name in contracts.keys() {
            if !self.registry.contains_contract(name) {
                return Err(IndexerError::config(format!(
                    "contract {name} has no interface description loaded"
                )));
            }
        }
        Ok(())
    }

    /// Ingest `[from_block, to_block]` for every contract, all-or-nothing.
    pub async fn run_pass(
        &self,
        from_block: u64,
        to_block: BlockTag,
        contracts: &IndexMap<String, Address>,
    ) -> Result<PassReport> {
        self.check_contracts(contracts)?;

        let pass_id = Uuid::new_v4();
        let started = Instant::now();

        // Resolved once so every contract sees the same head
        let to = to_block.resolve(|| self.source.latest_block()).await?;
        let mut report = PassReport::new(pass_id, from_block, to);
        if from_block > to {
            info!(
                "[pass {}] Nothing to do: from block {} is past head {}",
                pass_id, from_block, to
            );
            return Ok(report);
        }

        info!(
            "[pass {}] Scanning blocks {}..={} on chain {} for {} contracts",
            pass_id,
            from_block,
            to,
            self.chain_id,
            contracts.len()
        );

        let fetched = try_join_all(contracts.iter().map(|(name, address)| async move {
            let mut logs = self.source.get_logs(*address, from_block, to).await?;
            sort_chain_order(&mut logs);
            debug!("[pass {}] {} returned {} logs", pass_id, name, logs.len());
            Ok::<_, IndexerError>((name.as_str(), logs))
        }))
        .await;
        let fetched = match fetched {
            Ok(fetched) => fetched,
            Err(e) => {
                metrics::record_pass_failed(started.elapsed());
                return Err(e);
            }
        };

        let mut tx = self.store.begin().await?;
        let mut outcome = Ok(());
        'contracts: for (contract, logs) in &fetched {
            for raw in logs {
                report.fetched += 1;
                if let Err(e) = self.ingest(tx.as_mut(), contract, raw, &mut report).await {
                    outcome = Err(e);
                    break 'contracts;
                }
            }
        }

        self.finish(tx, outcome, report, started).await
    }

    /// Re-fold every stored event of the chain into empty projection tables.
    pub async fn rebuild(&self, contracts: &IndexMap<String, Address>) -> Result<PassReport> {
        self.check_contracts(contracts)?;

        let pass_id = Uuid::new_v4();
        let started = Instant::now();
        let by_address: HashMap<String, &str> = contracts
            .iter()
            .map(|(name, address)| (address_to_string(*address), name.as_str()))
            .collect();

        let mut tx = self.store.begin().await?;
        let loaded = match tx.reset_projections(self.chain_id).await {
            Ok(()) => tx.load_events(self.chain_id).await,
            Err(e) => Err(e),
        };
        let events = match loaded {
            Ok(events) => events,
            Err(e) => {
                let report = PassReport::new(pass_id, 0, 0);
                return self.finish(tx, Err(e), report, started).await;
            }
        };

        let mut report = PassReport::new(
            pass_id,
            events.first().map_or(0, |e| e.block_number),
            events.last().map_or(0, |e| e.block_number),
        );
        info!(
            "[pass {}] Rebuilding projections for chain {} from {} stored events",
            pass_id,
            self.chain_id,
            events.len()
        );

        let mut outcome = Ok(());
        for event in &events {
            report.fetched += 1;
            let Some(contract) = by_address.get(&event.contract_address) else {
                warn!(
                    "[pass {}] Skipping stored event {} from unmonitored address {}",
                    pass_id, event.event_name, event.contract_address
                );
                report.skipped += 1;
                continue;
            };
            if let Err(e) = self.replay(tx.as_mut(), contract, event, &mut report).await {
                outcome = Err(e.at_log(self.chain_id, event.tx_hash.clone(), event.log_index));
                break;
            }
        }

        self.finish(tx, outcome, report, started).await
    }

    async fn ingest(
        &self,
        tx: &mut dyn PassTransaction,
        contract: &str,
        raw: &RawLog,
        report: &mut PassReport,
    ) -> Result<()> {
        let at_log = |e: IndexerError| {
            e.at_log(self.chain_id, h256_to_string(raw.transaction_hash), raw.log_index)
        };

        let Some(decoded) = decode_log(contract, raw, self.registry).map_err(at_log)? else {
            report.skipped += 1;
            return Ok(());
        };

        let event = ChainEvent::new(self.chain_id, raw, &decoded);
        if !tx.append_event(&event).await.map_err(at_log)? {
            report.duplicates += 1;
            return Ok(());
        }
        report.appended += 1;

        let outcome = self
            .projector
            .project(tx, &event, &decoded.kind)
            .await
            .map_err(at_log)?;
        report.tally(outcome);
        Ok(())
    }

    async fn replay(
        &self,
        tx: &mut dyn PassTransaction,
        contract: &str,
        event: &ChainEvent,
        report: &mut PassReport,
    ) -> Result<()> {
        let raw = event.to_raw_log()?;
        let Some(decoded) = decode_log(contract, &raw, self.registry)? else {
            warn!(
                "Stored event {} of {} no longer matches a registered signature",
                event.event_name, contract
            );
            report.skipped += 1;
            return Ok(());
        };
        let outcome = self.projector.project(tx, event, &decoded.kind).await?;
        report.tally(outcome);
        Ok(())
    }

    /// Commit on success, roll back otherwise. Every exit path of a pass goes through here.
    async fn finish(
        &self,
        tx: Box<dyn PassTransaction>,
        outcome: Result<()>,
        report: PassReport,
        started: Instant,
    ) -> Result<PassReport> {
        match outcome {
            Ok(()) => {
                tx.commit().await?;
                let elapsed = started.elapsed();
                metrics::record_pass_committed(&report, elapsed);
                info!(
                    "[pass {}] Committed in {:.2?}: {} fetched, {} skipped, {} appended, {} duplicates, {} projected, {} unchanged, {} gaps, {} stale",
                    report.pass_id,
                    elapsed,
                    report.fetched,
                    report.skipped,
                    report.appended,
                    report.duplicates,
                    report.projected,
                    report.unchanged,
                    report.gaps,
                    report.stale
                );
                Ok(report)
            }
            Err(e) => {
                warn!("[pass {}] Aborting, rolling back: {}", report.pass_id, e);
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(
                        "[pass {}] Rollback failed: {}",
                        report.pass_id, rollback_err
                    );
                }
                metrics::record_pass_failed(started.elapsed());
                Err(e)
            }
        }
    }
}
