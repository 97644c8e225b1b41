//! PostgreSQL ledger backend.
//!
//! Unbounded integers live in `NUMERIC(78,0)` columns and are bound as decimal text with a
//! `$n::NUMERIC` cast. A pass maps onto a single database transaction.

use super::{ApplyOutcome, ChainEvent, LedgerStore, PassTransaction, ProjectionGap};
use crate::error::{IndexerError, Result};
use crate::projector::{DealStatus, ProjectionWrite};
use crate::types::conversions::u256_to_numeric;
use async_trait::async_trait;
use ethers::types::U256;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{Connection, Pool, Postgres, Row, Transaction};
use std::time::Duration;

/// PostgreSQL connection pool type alias.
pub type DbPool = Pool<Postgres>;

/// Database schema name
pub const SCHEMA: &str = "public";

/// Connects with capped exponential backoff and makes sure the schema exists.
pub async fn connect(dsn: &str, max_connections: u32, max_attempts: u32) -> Result<DbPool> {
    let max_attempts = max_attempts.max(1);
    let mut last_err: Option<IndexerError> = None;
    for attempt in 1..=max_attempts {
        match PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(dsn)
            .await
        {
            Ok(pool) => {
                log::info!(
                    "Connected to database (attempt {}/{}).",
                    attempt,
                    max_attempts
                );
                match initialize_database(&pool).await {
                    Ok(()) => return Ok(pool),
                    Err(e) => last_err = Some(e),
                }
            }
            Err(e) => last_err = Some(e.into()),
        }
        if attempt == max_attempts {
            break;
        }
        let delay_ms = (1u64 << attempt.min(6)) * 200; // 400ms, 800ms, ... capped at ~12.8s
        log::warn!(
            "DB connect/init attempt {}/{} failed. Retrying in {} ms...",
            attempt,
            max_attempts,
            delay_ms
        );
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }
    Err(last_err.unwrap_or_else(|| IndexerError::config("database connection was never attempted")))
}

pub async fn initialize_database(pool: &DbPool) -> Result<()> {
    const MIGRATION_LOCK_ID: i64 = 0x4C45444745524442; // "LEDGERDB"

    let mut conn = pool.acquire().await?;
    let mut tx = conn.begin().await?;

    log::info!("Acquiring database migration lock...");
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(MIGRATION_LOCK_ID)
        .execute(tx.as_mut())
        .await?;

    sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", SCHEMA))
        .execute(tx.as_mut())
        .await?;
    create_tables(&mut tx).await?;

    tx.commit().await?;
    log::info!("Database schema ready.");
    Ok(())
}

async fn create_tables(tx: &mut Transaction<'_, Postgres>) -> Result<()> {
    let statements = [
        format!(
            "CREATE TABLE IF NOT EXISTS {}.chain_events (
                id BIGSERIAL PRIMARY KEY,
                chain_id BIGINT NOT NULL,
                block_number BIGINT NOT NULL,
                block_hash TEXT NOT NULL,
                tx_hash TEXT NOT NULL,
                tx_index BIGINT NOT NULL,
                log_index BIGINT NOT NULL,
                contract_address TEXT NOT NULL,
                event_signature TEXT NOT NULL,
                event_name TEXT NOT NULL,
                topics JSONB NOT NULL,
                data BYTEA NOT NULL,
                decoded JSONB NOT NULL,
                ingested_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE (chain_id, tx_hash, log_index)
            )",
            SCHEMA
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS idx_chain_events_position
                ON {}.chain_events (chain_id, block_number, tx_index, log_index)",
            SCHEMA
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {}.deals_current (
                chain_id BIGINT NOT NULL,
                deal_id NUMERIC(78,0) NOT NULL,
                sponsor TEXT NOT NULL,
                athlete TEXT NOT NULL,
                token TEXT NOT NULL,
                amount NUMERIC(78,0) NOT NULL,
                deadline NUMERIC(78,0) NOT NULL,
                terms_hash TEXT NOT NULL,
                evidence_hash TEXT,
                delivered_at NUMERIC(78,0),
                status TEXT NOT NULL CHECK (status IN ('FUNDED','DELIVERED','SETTLED','REFUNDED')),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (chain_id, deal_id)
            )",
            SCHEMA
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {}.grants_current (
                chain_id BIGINT NOT NULL,
                grant_id NUMERIC(78,0) NOT NULL,
                sponsor TEXT NOT NULL,
                beneficiary TEXT NOT NULL,
                token TEXT NOT NULL,
                amount NUMERIC(78,0) NOT NULL,
                unlock_time NUMERIC(78,0) NOT NULL,
                terms_hash TEXT NOT NULL,
                attested BOOLEAN NOT NULL DEFAULT FALSE,
                attestation_hash TEXT,
                withdrawn BOOLEAN NOT NULL DEFAULT FALSE,
                refunded BOOLEAN NOT NULL DEFAULT FALSE,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (chain_id, grant_id),
                CHECK (NOT (withdrawn AND refunded))
            )",
            SCHEMA
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {}.payouts_current (
                chain_id BIGINT NOT NULL,
                payout_id NUMERIC(78,0) NOT NULL,
                ref TEXT NOT NULL,
                payer TEXT NOT NULL,
                token TEXT NOT NULL,
                amount NUMERIC(78,0) NOT NULL,
                split_id NUMERIC(78,0) NOT NULL,
                executed_at NUMERIC(78,0) NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (chain_id, payout_id)
            )",
            SCHEMA
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {}.receipts_current (
                chain_id BIGINT NOT NULL,
                token_id NUMERIC(78,0) NOT NULL,
                order_hash TEXT NOT NULL,
                buyer TEXT NOT NULL,
                seller TEXT NOT NULL,
                token TEXT NOT NULL,
                price NUMERIC(78,0) NOT NULL,
                platform_fee NUMERIC(78,0) NOT NULL,
                token_uri TEXT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (chain_id, token_id)
            )",
            SCHEMA
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {}.projection_gaps (
                id BIGSERIAL PRIMARY KEY,
                chain_id BIGINT NOT NULL,
                tx_hash TEXT NOT NULL,
                log_index BIGINT NOT NULL,
                event_name TEXT NOT NULL,
                entity TEXT NOT NULL,
                entity_id NUMERIC(78,0) NOT NULL,
                recorded_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
            SCHEMA
        ),
    ];

    for statement in &statements {
        sqlx::query(statement).execute(tx.as_mut()).await?;
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    pool: DbPool,
}

impl PgLedgerStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn connect(dsn: &str, max_connections: u32, max_attempts: u32) -> Result<Self> {
        Ok(Self::new(connect(dsn, max_connections, max_attempts).await?))
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn begin(&self) -> Result<Box<dyn PassTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgPassTransaction { tx }))
    }
}

pub struct PgPassTransaction {
    tx: Transaction<'static, Postgres>,
}

impl PgPassTransaction {
    async fn row_exists(
        &mut self,
        table: &str,
        id_column: &str,
        chain_id: u64,
        id: U256,
    ) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(&format!(
            "SELECT EXISTS (SELECT 1 FROM {}.{} WHERE chain_id = $1 AND {} = $2::NUMERIC)",
            SCHEMA, table, id_column
        ))
        .bind(chain_id as i64)
        .bind(u256_to_numeric(id))
        .fetch_one(self.tx.as_mut())
        .await?;
        Ok(exists)
    }

    /// Classifies an update that touched no rows.
    async fn untouched(
        &mut self,
        table: &str,
        id_column: &str,
        chain_id: u64,
        id: U256,
    ) -> Result<ApplyOutcome> {
        if self.row_exists(table, id_column, chain_id, id).await? {
            Ok(ApplyOutcome::Stale)
        } else {
            Ok(ApplyOutcome::Missing)
        }
    }

    /// Moves a deal to `next` from any status allowed to precede it. `assignments` may
    /// reference `extra` values as `$5`, `$6`, ...
    async fn advance_deal(
        &mut self,
        chain_id: u64,
        deal_id: U256,
        next: DealStatus,
        assignments: &str,
        extra: &[String],
    ) -> Result<ApplyOutcome> {
        let allowed: Vec<String> = DealStatus::predecessors(next)
            .into_iter()
            .map(|s| s.as_str().to_string())
            .collect();
        let sql = format!(
            "UPDATE {}.deals_current SET {}status = $3, updated_at = NOW()
             WHERE chain_id = $1 AND deal_id = $2::NUMERIC AND status = ANY($4)",
            SCHEMA,
            assignments
        );
        let mut query = sqlx::query(&sql)
            .bind(chain_id as i64)
            .bind(u256_to_numeric(deal_id))
            .bind(next.as_str())
            .bind(allowed);
        for value in extra {
            query = query.bind(value.clone());
        }
        let affected = query.execute(self.tx.as_mut()).await?.rows_affected();
        if affected > 0 {
            return Ok(ApplyOutcome::Applied);
        }
        self.untouched("deals_current", "deal_id", chain_id, deal_id).await
    }
}

fn event_from_row(row: &PgRow) -> Result<ChainEvent> {
    let topics: Json<Vec<String>> = row.try_get("topics")?;
    Ok(ChainEvent {
        chain_id: row.try_get::<i64, _>("chain_id")? as u64,
        block_number: row.try_get::<i64, _>("block_number")? as u64,
        block_hash: row.try_get("block_hash")?,
        tx_hash: row.try_get("tx_hash")?,
        tx_index: row.try_get::<i64, _>("tx_index")? as u64,
        log_index: row.try_get::<i64, _>("log_index")? as u64,
        contract_address: row.try_get("contract_address")?,
        event_signature: row.try_get("event_signature")?,
        event_name: row.try_get("event_name")?,
        topics: topics.0,
        data: row.try_get("data")?,
        decoded: row.try_get("decoded")?,
    })
}

#[async_trait]
impl PassTransaction for PgPassTransaction {
    async fn append_event(&mut self, event: &ChainEvent) -> Result<bool> {
        let result = sqlx::query(&format!(
            "INSERT INTO {}.chain_events
                (chain_id, block_number, block_hash, tx_hash, tx_index, log_index,
                 contract_address, event_signature, event_name, topics, data, decoded)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
             ON CONFLICT (chain_id, tx_hash, log_index) DO NOTHING",
            SCHEMA
        ))
        .bind(event.chain_id as i64)
        .bind(event.block_number as i64)
        .bind(&event.block_hash)
        .bind(&event.tx_hash)
        .bind(event.tx_index as i64)
        .bind(event.log_index as i64)
        .bind(&event.contract_address)
        .bind(&event.event_signature)
        .bind(&event.event_name)
        .bind(Json(&event.topics))
        .bind(&event.data)
        .bind(&event.decoded)
        .execute(self.tx.as_mut())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn apply(&mut self, chain_id: u64, write: &ProjectionWrite) -> Result<ApplyOutcome> {
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
                // A deal that already moved past FUNDED keeps its state
                let affected = sqlx::query(&format!(
                    "INSERT INTO {0}.deals_current
                        (chain_id, deal_id, sponsor, athlete, token, amount, deadline, terms_hash, status)
                     VALUES ($1, $2::NUMERIC, $3, $4, $5, $6::NUMERIC, $7::NUMERIC, $8, 'FUNDED')
                     ON CONFLICT (chain_id, deal_id) DO UPDATE SET
                        sponsor = EXCLUDED.sponsor,
                        athlete = EXCLUDED.athlete,
                        token = EXCLUDED.token,
                        amount = EXCLUDED.amount,
                        deadline = EXCLUDED.deadline,
                        terms_hash = EXCLUDED.terms_hash,
                        updated_at = NOW()
                     WHERE {0}.deals_current.status = 'FUNDED'",
                    SCHEMA
                ))
                .bind(chain_id as i64)
                .bind(u256_to_numeric(*deal_id))
                .bind(sponsor)
                .bind(athlete)
                .bind(token)
                .bind(u256_to_numeric(*amount))
                .bind(u256_to_numeric(*deadline))
                .bind(terms_hash)
                .execute(self.tx.as_mut())
                .await?
                .rows_affected();
                Ok(if affected > 0 {
                    ApplyOutcome::Applied
                } else {
                    ApplyOutcome::Stale
                })
            }
            ProjectionWrite::DeliverDeal {
                deal_id,
                evidence_hash,
                delivered_at,
            } => {
                self.advance_deal(
                    chain_id,
                    *deal_id,
                    DealStatus::Delivered,
                    "evidence_hash = $5, delivered_at = $6::NUMERIC, ",
                    &[evidence_hash.clone(), u256_to_numeric(*delivered_at)],
                )
                .await
            }
            ProjectionWrite::CloseDeal { deal_id, status } => {
                self.advance_deal(chain_id, *deal_id, *status, "amount = 0, ", &[])
                    .await
            }
            ProjectionWrite::OpenGrant {
                grant_id,
                sponsor,
                beneficiary,
                token,
                amount,
                unlock_time,
                terms_hash,
            } => {
                let inserted: bool = sqlx::query_scalar(&format!(
                    "INSERT INTO {}.grants_current
                        (chain_id, grant_id, sponsor, beneficiary, token, amount, unlock_time, terms_hash)
                     VALUES ($1, $2::NUMERIC, $3, $4, $5, $6::NUMERIC, $7::NUMERIC, $8)
                     ON CONFLICT (chain_id, grant_id) DO UPDATE SET updated_at = NOW()
                     RETURNING (xmax = 0)",
                    SCHEMA
                ))
                .bind(chain_id as i64)
                .bind(u256_to_numeric(*grant_id))
                .bind(sponsor)
                .bind(beneficiary)
                .bind(token)
                .bind(u256_to_numeric(*amount))
                .bind(u256_to_numeric(*unlock_time))
                .bind(terms_hash)
                .fetch_one(self.tx.as_mut())
                .await?;
                Ok(if inserted {
                    ApplyOutcome::Applied
                } else {
                    ApplyOutcome::Unchanged
                })
            }
            ProjectionWrite::AttestGrant {
                grant_id,
                attestation_hash,
            } => {
                let affected = sqlx::query(&format!(
                    "UPDATE {}.grants_current
                     SET attested = TRUE, attestation_hash = $3, updated_at = NOW()
                     WHERE chain_id = $1 AND grant_id = $2::NUMERIC
                       AND NOT withdrawn AND NOT refunded",
                    SCHEMA
                ))
                .bind(chain_id as i64)
                .bind(u256_to_numeric(*grant_id))
                .bind(attestation_hash)
                .execute(self.tx.as_mut())
                .await?
                .rows_affected();
                if affected > 0 {
                    return Ok(ApplyOutcome::Applied);
                }
                self.untouched("grants_current", "grant_id", chain_id, *grant_id)
                    .await
            }
            ProjectionWrite::CloseGrant { grant_id, closure } => {
                let affected = sqlx::query(&format!(
                    "UPDATE {}.grants_current
                     SET {} = TRUE, amount = 0, updated_at = NOW()
                     WHERE chain_id = $1 AND grant_id = $2::NUMERIC
                       AND NOT withdrawn AND NOT refunded",
                    SCHEMA,
                    closure.column()
                ))
                .bind(chain_id as i64)
                .bind(u256_to_numeric(*grant_id))
                .execute(self.tx.as_mut())
                .await?
                .rows_affected();
                if affected > 0 {
                    return Ok(ApplyOutcome::Applied);
                }
                self.untouched("grants_current", "grant_id", chain_id, *grant_id)
                    .await
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
                let affected = sqlx::query(&format!(
                    "INSERT INTO {}.payouts_current
                        (chain_id, payout_id, ref, payer, token, amount, split_id, executed_at)
                     VALUES ($1, $2::NUMERIC, $3, $4, $5, $6::NUMERIC, $7::NUMERIC, $8::NUMERIC)
                     ON CONFLICT (chain_id, payout_id) DO NOTHING",
                    SCHEMA
                ))
                .bind(chain_id as i64)
                .bind(u256_to_numeric(*payout_id))
                .bind(reference)
                .bind(payer)
                .bind(token)
                .bind(u256_to_numeric(*amount))
                .bind(u256_to_numeric(*split_id))
                .bind(u256_to_numeric(*executed_at))
                .execute(self.tx.as_mut())
                .await?
                .rows_affected();
                Ok(if affected > 0 {
                    ApplyOutcome::Applied
                } else {
                    ApplyOutcome::Unchanged
                })
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
                let affected = sqlx::query(&format!(
                    "INSERT INTO {}.receipts_current
                        (chain_id, token_id, order_hash, buyer, seller, token, price, platform_fee, token_uri)
                     VALUES ($1, $2::NUMERIC, $3, $4, $5, $6, $7::NUMERIC, $8::NUMERIC, $9)
                     ON CONFLICT (chain_id, token_id) DO NOTHING",
                    SCHEMA
                ))
                .bind(chain_id as i64)
                .bind(u256_to_numeric(*token_id))
                .bind(order_hash)
                .bind(buyer)
                .bind(seller)
                .bind(token)
                .bind(u256_to_numeric(*price))
                .bind(u256_to_numeric(*platform_fee))
                .bind(token_uri)
                .execute(self.tx.as_mut())
                .await?
                .rows_affected();
                Ok(if affected > 0 {
                    ApplyOutcome::Applied
                } else {
                    ApplyOutcome::Unchanged
                })
            }
        }
    }

    async fn record_gap(&mut self, gap: &ProjectionGap) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO {}.projection_gaps (chain_id, tx_hash, log_index, event_name, entity, entity_id)
             VALUES ($1, $2, $3, $4, $5, $6::NUMERIC)",
            SCHEMA
        ))
        .bind(gap.chain_id as i64)
        .bind(&gap.tx_hash)
        .bind(gap.log_index as i64)
        .bind(&gap.event_name)
        .bind(gap.entity)
        .bind(u256_to_numeric(gap.entity_id))
        .execute(self.tx.as_mut())
        .await?;
        Ok(())
    }

    async fn load_events(&mut self, chain_id: u64) -> Result<Vec<ChainEvent>> {
        let rows = sqlx::query(&format!(
            "SELECT chain_id, block_number, block_hash, tx_hash, tx_index, log_index,
                    contract_address, event_signature, event_name, topics, data, decoded
             FROM {}.chain_events
             WHERE chain_id = $1
             ORDER BY block_number, tx_index, log_index",
            SCHEMA
        ))
        .bind(chain_id as i64)
        .fetch_all(self.tx.as_mut())
        .await?;
        rows.iter().map(event_from_row).collect()
    }

    async fn reset_projections(&mut self, chain_id: u64) -> Result<()> {
        for table in [
            "deals_current",
            "grants_current",
            "payouts_current",
            "receipts_current",
            "projection_gaps",
        ] {
            let cleared = sqlx::query(&format!(
                "DELETE FROM {}.{} WHERE chain_id = $1",
                SCHEMA, table
            ))
            .bind(chain_id as i64)
            .execute(self.tx.as_mut())
            .await?
            .rows_affected();
            log::debug!("Cleared {} rows from {}", cleared, table);
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
