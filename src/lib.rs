//! Tamper-evident ledger for medical booking events.
//!
//! Records are linked by SHA-256 digests into a single chain owned by one
//! writer. This crate provides:
//! - the ledger engine (`ledger`): genesis, append and full-chain verification
//! - the reconciliation view (`reconcile`): bookings still awaiting fulfillment
//! - persistence of the chain as one JSON blob (`storage`)
//! - advisory chain analysis (`analysis`)
//! - the HTTP node that owns the chain (`app`, `routes`)

pub mod analysis;
pub mod app;
pub mod config;
pub mod crypto;
pub mod error;
pub mod ledger;
pub mod model;
pub mod reconcile;
pub mod routes;
pub mod storage;

pub use analysis::{Analyzer, LocalAuditor, RemoteAnalyzer};
pub use app::{build_router, AppState};
pub use config::NodeConfig;
pub use crypto::digest_of;
pub use error::{AnalysisError, ConfigError, LedgerError, StorageError};
pub use ledger::{append, audit, create_first_record, verify, IntegrityReport, Violation};
pub use model::{Action, Payload, Priority, Record};
pub use reconcile::{pending, stats, ChainStats};
pub use storage::{BlobStore, FileStore, MemoryStore};
