//! Scheduler error types

use crate::ledger::LedgerError;
use repmine_core::{ApplyError, Digest, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Apply error: {0}")]
    Apply(#[from] ApplyError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The ledger's root was never committed locally.
    #[error("Ledger root {ledger_root} is unknown to the local store")]
    Diverged { ledger_root: Digest },

    #[error("Transaction {tx_hash} failed on the ledger")]
    TransactionFailed { tx_hash: String },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Blocking task failed: {0}")]
    Task(String),
}

impl SchedulerError {
    /// Errors worth retrying after the poll interval.
    ///
    /// Everything else halts the scheduler for operator attention.
    pub fn is_transient(&self) -> bool {
        match self {
            SchedulerError::Ledger(e) => e.is_transient(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
