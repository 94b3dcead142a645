//! Submission scheduler for the reputation miner.
//!
//! Drives the publish cycle against the external ledger: wait for the window
//! to elapse, fold the pending change log into a new version, submit its root
//! and confirm it. The cycle is an explicit state machine whose starting state
//! is re-derived from the ledger and the local store on every start.

pub mod error;
pub mod http_client;
pub mod ledger;
pub mod scheduler;
pub mod state;

pub use error::{Result, SchedulerError};
pub use http_client::HttpLedgerClient;
pub use ledger::{LedgerClient, LedgerError, Receipt, TxHandle};
pub use scheduler::SubmissionScheduler;
pub use state::{reconcile, SchedulerState};
