//! Core of the reputation miner.
//!
//! Holds the authenticated reputation map, its versioned on-disk history, the
//! change-log applier that writes new versions and the proof oracle that
//! reads them.

pub mod applier;
pub mod config;
pub mod error;
pub mod logging;
pub mod oracle;
pub mod proof;
pub mod store;
pub mod trie;
pub mod types;

pub use applier::{ApplyError, ApplyOutcome, ChangeLogApplier, ChangeLogEntry};
pub use config::{
    ApplierConfig, LedgerConfig, NodeConfig, OracleConfig, SchedulerConfig, StoreConfig,
};
pub use error::{Error, Result};
pub use oracle::{
    NotFoundReason, OracleError, OracleOutcome, ProofOracle, ProofRequest, ProofResponse,
    NOT_FOUND_MESSAGE,
};
pub use proof::{BranchMask, ReputationProof};
pub use store::{
    Snapshot, StagedVersion, StoreError, StoreHealth, StoreMetrics, VersionRecord,
    VersionedStore,
};
pub use trie::{AuthenticatedMap, TrieError};
pub use types::{
    Address, Digest, Key, ReputationValue, SequenceNumber, VersionId, VersionSelector,
};
