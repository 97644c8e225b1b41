//! # Deal Ledger Indexer
//!
//! Ingests events emitted by the DealEngine, DeferredVault, PayoutRouter and ReceiptNFT
//! contracts into an append-only event log and folds them into current-state tables.
//!
//! ## Overview
//!
//! A pass walks a closed block range and, for every monitored contract:
//!
//! - **Fetch**: pulls logs from the node in bounded windows
//! - **Decode**: resolves each log's first topic against the contract's interface description
//! - **Append**: stores the log exactly once, keyed by `(chain_id, tx_hash, log_index)`
//! - **Project**: applies newly appended events to the `*_current` tables
//!
//! Everything a pass writes becomes visible atomically on commit, or not at all.
//!
//! ## Architecture
//!
//! ### Ingestion Layer
//! [`fetcher`] talks to the node, [`registry`] and [`decoder`] turn raw logs into typed
//! [`events::EventKind`] values.
//!
//! ### Storage Layer
//! [`store`] defines the transactional seam with a PostgreSQL and an in-memory backend;
//! [`projector`] holds the per-event projection rules.
//!
//! ### Coordination
//! [`pipeline`] owns the pass transaction and decides commit or rollback.

// Core Types
/// Error taxonomy
pub mod error;
/// Common types and value rendering
pub mod types;
/// Utility functions
pub mod utils;

// Configuration
/// Runtime settings (file, environment, validation)
pub mod settings;
/// Monitored contracts and their interface descriptions
pub mod contracts;

// Ingestion Layer
/// Event signature registry
pub mod registry;
/// Typed event payloads
pub mod events;
/// Log decoding
pub mod decoder;
/// Log fetching from the node
pub mod fetcher;

// Storage Layer
/// Event log and projection persistence
pub mod store;
/// Projection rules
pub mod projector;

// Coordination
/// Pass coordinator
pub mod pipeline;

// Observability
/// Metrics (no-ops unless the `observability` feature is enabled)
pub mod metrics;

pub use error::{IndexerError, Result};
pub use pipeline::{PassReport, Pipeline};
pub use registry::SignatureRegistry;
pub use settings::Settings;
