//! The external ledger as seen by the scheduler.
//!
//! The ledger stores only digests. It reports the current accepted root and
//! the open window, hands out the pending change log, and accepts the
//! two-step submit/confirm handshake.

use async_trait::async_trait;
use repmine_core::{ChangeLogEntry, Digest, SequenceNumber};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// Network failure or ledger-side outage. Retried on the next poll.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    #[error("nonce already consumed: {0}")]
    NonceConflict(String),

    #[error("request rejected by ledger: {0}")]
    Rejected(String),

    #[error("malformed ledger response: {0}")]
    Malformed(String),
}

impl LedgerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Unavailable(_) | LedgerError::NonceConflict(_))
    }
}

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

/// A broadcast transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxHandle {
    pub hash: String,
    pub nonce: u64,
}

/// Inclusion receipt of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub tx_hash: String,
    pub block_number: u64,
    pub success: bool,
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Root currently accepted by the ledger.
    async fn current_root(&self) -> LedgerResult<Digest>;

    /// Ledger time (seconds) at which the current window opened.
    async fn window_open_timestamp(&self) -> LedgerResult<u64>;

    /// Timestamp (seconds) of the latest ledger block.
    async fn current_block_timestamp(&self) -> LedgerResult<u64>;

    /// Change-log entries with sequence numbers above `after`.
    async fn pending_change_log(
        &self,
        after: Option<SequenceNumber>,
    ) -> LedgerResult<Vec<ChangeLogEntry>>;

    /// This publisher's submission in the open window, if any.
    async fn submitted_root(&self) -> LedgerResult<Option<Digest>>;

    async fn submit_root(&self, root: Digest, key_count: u64) -> LedgerResult<TxHandle>;

    async fn confirm_root(&self, round: u64, nonce_override: Option<u64>) -> LedgerResult<TxHandle>;

    /// Resolves once `tx` is included. No timeout beyond the ledger's own.
    async fn wait_for_inclusion(&self, tx: &TxHandle) -> LedgerResult<Receipt>;

    /// Next unused nonce of this publisher.
    async fn next_nonce(&self) -> LedgerResult<u64>;
}
